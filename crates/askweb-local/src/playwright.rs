use askweb_core::{BrowserLauncher, BrowserSession, Error, Result};
use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout};

pub const DEFAULT_SEARCH_URL: &str = "https://www.google.com";
pub const DEFAULT_SEARCH_BOX_SELECTOR: &str = r#"textarea[name="q"], input[name="q"]"#;
pub const DEFAULT_RESULT_SELECTOR: &str = ".tF2Cxc .yuRUbf a";

#[derive(Debug, Clone)]
pub struct PlaywrightConfig {
    /// `ASKWEB_RENDER_DISABLE`: refuse to launch (tests and machines without Node).
    pub disabled: bool,
    pub node_bin: String,
    /// Explicit `NODE_PATH`; when unset the global npm root is probed for `playwright`.
    pub node_path: Option<String>,
    pub search_url: String,
    pub search_box_selector: String,
    pub result_selector: String,
    /// How long Chromium may take to start before the launch is abandoned.
    pub launch_timeout: Duration,
    /// Added to every in-browser wait to form the hard deadline on a reply, and the time a
    /// closing browser gets before its process group is signalled.
    pub grace: Duration,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            node_bin: "node".to_string(),
            node_path: None,
            search_url: DEFAULT_SEARCH_URL.to_string(),
            search_box_selector: DEFAULT_SEARCH_BOX_SELECTOR.to_string(),
            result_selector: DEFAULT_RESULT_SELECTOR.to_string(),
            launch_timeout: Duration::from_secs(30),
            grace: Duration::from_secs(2),
        }
    }
}

impl PlaywrightConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            disabled: crate::env_truthy("ASKWEB_RENDER_DISABLE"),
            node_bin: crate::env("ASKWEB_NODE_BIN").unwrap_or(d.node_bin),
            node_path: crate::env("ASKWEB_NODE_PATH"),
            search_url: crate::env("ASKWEB_SEARCH_URL").unwrap_or(d.search_url),
            search_box_selector: crate::env("ASKWEB_SEARCH_BOX_SELECTOR")
                .unwrap_or(d.search_box_selector),
            result_selector: crate::env("ASKWEB_RESULT_SELECTOR").unwrap_or(d.result_selector),
            launch_timeout: Duration::from_millis(crate::env_u64(
                "ASKWEB_BROWSER_LAUNCH_TIMEOUT_MS",
                d.launch_timeout.as_millis() as u64,
            )),
            grace: d.grace,
        }
    }
}

fn node_path_has_playwright(np: &str) -> bool {
    std::env::split_paths(np)
        .filter(|p| !p.as_os_str().is_empty())
        .any(|p| p.join("playwright").is_dir())
}

fn node_path_candidates() -> Vec<std::path::PathBuf> {
    let mut out = Vec::new();
    if let Some(home) = std::env::var_os("HOME").map(std::path::PathBuf::from) {
        out.push(home.join(".npm-global").join("lib").join("node_modules"));
    }
    out.push("/opt/homebrew/lib/node_modules".into());
    out.push("/usr/local/lib/node_modules".into());
    out.push("/usr/lib/node_modules".into());
    out
}

/// `NODE_PATH` to hand the child so a globally installed Playwright resolves, or `None` to
/// leave the inherited environment alone.
pub fn detect_node_path(explicit: Option<&str>) -> Option<String> {
    if let Some(v) = explicit.map(str::trim).filter(|v| !v.is_empty()) {
        return Some(v.to_string());
    }

    let existing = std::env::var("NODE_PATH").unwrap_or_default();
    if node_path_has_playwright(&existing) {
        return None;
    }

    let found = crate::shellout::first_line("npm", &["root", "-g"], Duration::from_secs(5))
        .filter(|root| node_path_has_playwright(root))
        .or_else(|| {
            node_path_candidates()
                .into_iter()
                .find(|p| p.join("playwright").is_dir())
                .map(|p| p.to_string_lossy().to_string())
        })?;

    if existing.trim().is_empty() {
        Some(found)
    } else {
        Some(format!("{existing}:{found}"))
    }
}

// Expected setup: Node.js, the `playwright` npm package resolvable from NODE_PATH, and
// Chromium installed (`npx playwright install chromium`). Stdout carries JSON lines only.
const JS: &str = r#"
const readline = require('readline');

function send(obj) { process.stdout.write(JSON.stringify(obj) + '\n'); }
function fail(code, message) { send({ ok: false, error: { code, message } }); }
function msg(e) { return String(e && e.message ? e.message : e); }

async function main() {
  let cfg;
  try { cfg = JSON.parse(process.env.ASKWEB_PLAYWRIGHT_ARGS || '{}'); }
  catch (e) { return fail('invalid_params', 'bad JSON args'); }

  let pw;
  try { pw = require('playwright'); } catch (e) {
    return fail('not_configured',
      'Playwright is not installed for Node.js (require("playwright") failed). ' +
      'Install it with `npm i -g playwright` and `npx playwright install chromium`.');
  }

  let browser;
  let page;
  try {
    browser = await pw.chromium.launch({
      headless: true,
      args: ['--disable-gpu', '--disable-extensions', '--blink-settings=imagesEnabled=false'],
    });
    const context = await browser.newContext({ serviceWorkers: 'block' });
    page = await context.newPage();
    await page.route('**/*', (route) => {
      const rt = route.request().resourceType();
      if (rt === 'image' || rt === 'media' || rt === 'font') return route.abort();
      return route.continue();
    });
  } catch (e) {
    try { if (browser) await browser.close(); } catch (_) {}
    return fail('launch_failed', msg(e));
  }
  send({ ok: true, ready: true });

  const rl = readline.createInterface({ input: process.stdin });
  for await (const line of rl) {
    let req;
    try { req = JSON.parse(line); } catch (_) { fail('invalid_params', 'bad JSON op'); continue; }
    if (req.op === 'close') break;
    // One budget per op; every step gets what is left of it.
    const deadline = Date.now() + Number(req.wait_ms || 5000);
    const left = () => Math.max(1, deadline - Date.now());
    try {
      if (req.op === 'submit') {
        await page.goto(cfg.search_url, { waitUntil: 'domcontentloaded', timeout: left() });
        const box = await page.waitForSelector(cfg.search_box_selector, { timeout: left() });
        await box.fill(String(req.query || ''), { timeout: left() });
        await box.press('Enter', { timeout: left() });
        await page.waitForLoadState('domcontentloaded', { timeout: left() });
        send({ ok: true });
      } else if (req.op === 'first_result') {
        const a = await page.waitForSelector(cfg.result_selector, { timeout: left() });
        // The `href` property is already resolved against the page.
        const href = await a.evaluate((el) => el.href || el.getAttribute('href'));
        if (!href) fail('no_href', 'first result has no href');
        else send({ ok: true, href, page_url: page.url() });
      } else {
        fail('invalid_params', 'unknown op ' + String(req.op));
      }
    } catch (e) {
      if (e && e.name === 'TimeoutError') fail('timeout', msg(e));
      else fail('browser_failed', msg(e));
    }
  }
  try { await browser.close(); } catch (_) {}
}

main()
  .catch((e) => fail('browser_failed', msg(e)))
  .finally(() => process.exit(0));
"#;

#[derive(Debug, Deserialize)]
struct Reply {
    ok: bool,
    #[serde(default)]
    href: Option<String>,
    #[serde(default)]
    page_url: Option<String>,
    #[serde(default)]
    error: Option<ReplyError>,
}

#[derive(Debug, Deserialize)]
struct ReplyError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Decode one reply line from the browser process. `what` and `waited_ms` name the wait
/// when the browser reports a timeout.
fn decode_reply(line: &str, what: &str, waited_ms: u64) -> Result<Reply> {
    let reply: Reply = serde_json::from_str(line.trim())
        .map_err(|e| Error::Browser(format!("playwright returned invalid JSON: {e}")))?;
    if reply.ok {
        return Ok(reply);
    }
    let (code, message) = reply
        .error
        .map(|e| (e.code, e.message))
        .unwrap_or_else(|| ("browser_failed".to_string(), String::new()));
    tracing::debug!(code = %code, message = %message, "playwright reported an error");
    Err(match code.as_str() {
        "timeout" => Error::SearchTimeout {
            what: what.to_string(),
            waited_ms,
        },
        "not_configured" => Error::NotConfigured(message),
        "invalid_params" => Error::NotSupported(message),
        _ if message.is_empty() => Error::Browser(code.clone()),
        _ => Error::Browser(message),
    })
}

/// Make a link target absolute against the page it was read from. Links that cannot be
/// resolved are returned unchanged.
fn resolve_href(href: &str, page_url: Option<&str>) -> String {
    if url::Url::parse(href).is_ok() {
        return href.to_string();
    }
    page_url
        .and_then(|p| url::Url::parse(p).ok())
        .and_then(|base| base.join(href).ok())
        .map(|u| u.to_string())
        .unwrap_or_else(|| href.to_string())
}

#[derive(Debug, Clone, Copy)]
#[cfg_attr(not(unix), allow(dead_code))]
enum Signal {
    Term,
    Kill,
}

/// Signal every process in the group led by `pgid`.
#[cfg(unix)]
fn signal_group(pgid: Option<u32>, signal: Signal) {
    let Some(pgid) = pgid.and_then(|p| libc::pid_t::try_from(p).ok()).filter(|p| *p > 1) else {
        return;
    };
    let sig = match signal {
        Signal::Term => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    // SAFETY: killpg only sends a signal; a group that no longer exists yields ESRCH.
    unsafe {
        libc::killpg(pgid, sig);
    }
}

#[cfg(not(unix))]
fn signal_group(_pgid: Option<u32>, _signal: Signal) {}

/// Wait `grace` for the process to exit on its own, then escalate on its whole group:
/// SIGTERM (Playwright takes Chromium down with it) and finally SIGKILL.
/// Returns whether the process exited without being signalled.
async fn reap(child: &mut Child, pgid: Option<u32>, grace: Duration) -> bool {
    if let Ok(Ok(_)) = tokio::time::timeout(grace, child.wait()).await {
        // Anything the process left behind in its group.
        signal_group(pgid, Signal::Kill);
        return true;
    }
    signal_group(pgid, Signal::Term);
    let _ = tokio::time::timeout(grace, child.wait()).await;
    signal_group(pgid, Signal::Kill);
    let _ = child.kill().await;
    false
}

/// Command for a browser process: piped stdio and its own process group, so the browser
/// it starts can be signalled together with it.
fn browser_command(program: &str) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.kill_on_drop(true)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    cmd.process_group(0);
    cmd
}

/// One Chromium instance driven over stdin/stdout.
///
/// Dropping a session without [`BrowserSession::close`] hands the process to a background
/// reaper: stdin is closed so the script can shut the browser down, and the process group is
/// signalled if it has not exited within the grace period.
pub struct PlaywrightSession {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Lines<BufReader<ChildStdout>>,
    pgid: Option<u32>,
    grace: Duration,
}

impl PlaywrightSession {
    /// Take over a spawned browser process and wait for its ready line.
    pub async fn attach(mut child: Child, ready_within: Duration, grace: Duration) -> Result<Self> {
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Browser("playwright: missing stdin pipe".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Browser("playwright: missing stdout pipe".to_string()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "askweb::playwright", "{line}");
                }
            });
        }

        let mut session = Self {
            pgid: child.id(),
            child: Some(child),
            stdin: Some(stdin),
            stdout: BufReader::new(stdout).lines(),
            grace,
        };
        let waited_ms = ready_within.as_millis() as u64;
        match session.read_reply("browser launch", waited_ms, ready_within).await {
            Ok(_) => Ok(session),
            Err(e) => {
                session.shut_down().await;
                Err(e)
            }
        }
    }

    async fn read_reply(&mut self, what: &str, waited_ms: u64, deadline: Duration) -> Result<Reply> {
        match tokio::time::timeout(deadline, self.stdout.next_line()).await {
            Ok(Ok(Some(line))) => decode_reply(&line, what, waited_ms),
            Ok(Ok(None)) => Err(Error::Browser(
                "playwright process exited unexpectedly".to_string(),
            )),
            Ok(Err(e)) => Err(Error::Browser(e.to_string())),
            Err(_) => Err(Error::SearchTimeout {
                what: what.to_string(),
                waited_ms: deadline.as_millis() as u64,
            }),
        }
    }

    async fn send(&mut self, op: &serde_json::Value) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| Error::Browser("playwright stdin is closed".to_string()))?;
        let mut line = op.to_string();
        line.push('\n');
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| Error::Browser(format!("playwright stdin: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| Error::Browser(format!("playwright stdin: {e}")))
    }

    async fn request(&mut self, op: serde_json::Value, what: &str, wait: Duration) -> Result<Reply> {
        self.send(&op).await?;
        // The browser enforces `wait` itself; this bound only catches a wedged process.
        self.read_reply(what, wait.as_millis() as u64, wait + self.grace)
            .await
    }

    /// Close stdin and reap the process. Returns whether it exited on its own.
    async fn shut_down(&mut self) -> bool {
        self.stdin.take();
        match self.child.take() {
            Some(mut child) => reap(&mut child, self.pgid, self.grace).await,
            None => true,
        }
    }
}

impl Drop for PlaywrightSession {
    fn drop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        let stdin = self.stdin.take();
        let (pgid, grace) = (self.pgid, self.grace);
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                rt.spawn(async move {
                    drop(stdin);
                    if !reap(&mut child, pgid, grace).await {
                        tracing::debug!("dropped playwright session had to be killed");
                    }
                });
            }
            Err(_) => {
                signal_group(pgid, Signal::Kill);
                drop(child);
            }
        }
    }
}

#[async_trait::async_trait]
impl BrowserSession for PlaywrightSession {
    async fn submit_query(&mut self, query: &str, wait: Duration) -> Result<()> {
        let op = serde_json::json!({
            "op": "submit",
            "query": query,
            "wait_ms": wait.as_millis() as u64,
        });
        self.request(op, "results page", wait).await.map(|_| ())
    }

    async fn first_result_href(&mut self, wait: Duration) -> Result<String> {
        let op = serde_json::json!({
            "op": "first_result",
            "wait_ms": wait.as_millis() as u64,
        });
        let reply = self.request(op, "first result", wait).await?;
        let href = reply
            .href
            .ok_or_else(|| Error::Browser("first result has no href".to_string()))?;
        Ok(resolve_href(&href, reply.page_url.as_deref()))
    }

    async fn close(mut self: Box<Self>) -> Result<()> {
        let asked = self.send(&serde_json::json!({ "op": "close" })).await;
        if self.shut_down().await {
            asked
        } else {
            Err(Error::Browser(format!(
                "playwright did not exit within {}ms; killed",
                self.grace.as_millis()
            )))
        }
    }
}

/// Starts one headless Chromium per search via `node -e <script>`.
#[derive(Debug, Clone)]
pub struct PlaywrightLauncher {
    cfg: PlaywrightConfig,
}

impl PlaywrightLauncher {
    pub fn new(cfg: PlaywrightConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &PlaywrightConfig {
        &self.cfg
    }
}

#[async_trait::async_trait]
impl BrowserLauncher for PlaywrightLauncher {
    fn name(&self) -> &'static str {
        "playwright"
    }

    async fn launch(&self) -> Result<Box<dyn BrowserSession>> {
        if self.cfg.disabled {
            return Err(Error::NotConfigured(
                "browser search disabled (ASKWEB_RENDER_DISABLE)".to_string(),
            ));
        }

        let args = serde_json::json!({
            "search_url": self.cfg.search_url,
            "search_box_selector": self.cfg.search_box_selector,
            "result_selector": self.cfg.result_selector,
        })
        .to_string();

        let mut cmd = browser_command(&self.cfg.node_bin);
        if let Some(node_path) = detect_node_path(self.cfg.node_path.as_deref()) {
            cmd.env("NODE_PATH", node_path);
        }
        let child = cmd
            .arg("-e")
            .arg(JS)
            .env("ASKWEB_PLAYWRIGHT_ARGS", args)
            .spawn()
            .map_err(|e| {
                Error::NotConfigured(format!(
                    "browser search requires Node.js (`{}`) and the Playwright npm package: {e}",
                    self.cfg.node_bin
                ))
            })?;

        let session =
            PlaywrightSession::attach(child, self.cfg.launch_timeout, self.cfg.grace).await?;
        tracing::debug!("playwright browser ready");
        Ok(Box::new(session))
    }
}
