//! Small, bounded shellouts to local tools (`node`, `npm`).
//!
//! Used to locate the Playwright install and to report tool versions from `doctor`.
//! Never surfaces env values; callers decide what to print.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

pub fn which(bin: &str) -> Option<PathBuf> {
    // Absolute or relative paths are taken as given.
    if bin.contains(std::path::MAIN_SEPARATOR) {
        let p = PathBuf::from(bin);
        return p.is_file().then_some(p);
    }
    let path = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path) {
        let cand = dir.join(bin);
        if cand.is_file() {
            return Some(cand);
        }
        if cfg!(windows) {
            let cand = dir.join(format!("{bin}.exe"));
            if cand.is_file() {
                return Some(cand);
            }
        }
    }
    None
}

pub fn has(bin: &str) -> bool {
    which(bin).is_some()
}

/// Run a command and capture stdout (bounded) with a coarse timeout.
///
/// Does not stream; meant for one-line answers like `node --version` or `npm root -g`.
pub fn run_stdout_bounded(
    mut cmd: Command,
    timeout: Duration,
    max_stdout_bytes: usize,
) -> Result<Vec<u8>, &'static str> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            "shellout_tool_not_found"
        } else {
            "shellout_spawn_failed"
        }
    })?;

    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait().map_err(|_| "shellout_wait_failed")? {
            if !status.success() {
                return Err("shellout_nonzero_exit");
            }
            break;
        }
        if start.elapsed() > timeout {
            let _ = child.kill();
            let _ = child.wait();
            return Err("shellout_timeout");
        }
        std::thread::sleep(Duration::from_millis(25));
    }

    let mut out = Vec::new();
    if let Some(s) = child.stdout.take() {
        use std::io::Read;
        s.take(max_stdout_bytes as u64)
            .read_to_end(&mut out)
            .map_err(|_| "shellout_read_failed")?;
    }
    Ok(out)
}

/// First non-empty stdout line of `bin args...`, or `None` if the tool is missing or fails.
pub fn first_line(bin: &str, args: &[&str], timeout: Duration) -> Option<String> {
    let mut cmd = Command::new(bin);
    cmd.args(args);
    let out = run_stdout_bounded(cmd, timeout, 16 * 1024).ok()?;
    String::from_utf8_lossy(&out)
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn which_finds_sh_and_misses_nonsense() {
        assert!(has("sh"));
        assert!(!has("askweb-definitely-not-a-real-binary"));
        assert!(which("/definitely/not/here").is_none());
    }

    #[test]
    fn first_line_skips_blank_output() {
        let got = first_line("sh", &["-c", "echo; echo '  v20.11.1  '"], Duration::from_secs(5));
        assert_eq!(got.as_deref(), Some("v20.11.1"));
    }

    #[test]
    fn failures_are_classified() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "exit 3"]);
        assert_eq!(
            run_stdout_bounded(cmd, Duration::from_secs(5), 1024),
            Err("shellout_nonzero_exit")
        );

        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 5"]);
        assert_eq!(
            run_stdout_bounded(cmd, Duration::from_millis(100), 1024),
            Err("shellout_timeout")
        );

        let cmd = Command::new("askweb-definitely-not-a-real-binary");
        assert_eq!(
            run_stdout_bounded(cmd, Duration::from_secs(1), 1024),
            Err("shellout_tool_not_found")
        );
    }

    #[test]
    fn stdout_is_capped() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "printf 'abcdefghij'"]);
        let out = run_stdout_bounded(cmd, Duration::from_secs(5), 4).unwrap();
        assert_eq!(out, b"abcd");
    }
}
