use anyhow::{Context, Result};
use askweb::config::{PipelineArgs, ResponseSchema};
use clap::{ArgAction, Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "askweb")]
#[command(about = "Answer questions with a chat model, using one web page of context when needed", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the HTTP API (`POST /send_message`, `GET /healthz`).
    Serve(ServeCmd),
    /// Answer one message and print the answer record (json).
    Ask(AskCmd),
    /// Diagnose configuration/launch issues (json; no secrets).
    Doctor(DoctorCmd),
    /// Print version info.
    Version(VersionCmd),
}

#[derive(clap::Args, Debug)]
struct ServeCmd {
    #[arg(long, env = "ASKWEB_BIND", default_value = "127.0.0.1:5000")]
    bind: SocketAddr,
    /// Allowed: messages, flat
    #[arg(long, env = "ASKWEB_RESPONSE_SCHEMA", default_value = "messages")]
    response_schema: ResponseSchema,
    /// Load the model before accepting requests.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    warm_up: bool,
    #[command(flatten)]
    pipeline: PipelineArgs,
}

#[derive(clap::Args, Debug)]
struct AskCmd {
    message: String,
    /// Output format. Allowed: json, text
    #[arg(long, default_value = "json")]
    output: String,
    #[command(flatten)]
    pipeline: PipelineArgs,
}

#[derive(clap::Args, Debug)]
struct DoctorCmd {
    /// Probe the model backend (`warm_up`) with a timeout.
    #[arg(long, default_value_t = false, action = ArgAction::Set)]
    check_llm: bool,
    #[arg(long, default_value_t = 5_000)]
    timeout_ms: u64,
    #[command(flatten)]
    pipeline: PipelineArgs,
}

#[derive(clap::Args, Debug)]
struct VersionCmd {
    /// Output format. Allowed: json, text
    #[arg(long, default_value = "json")]
    output: String,
}

/// Optional env-file loader (opt-in via `ASKWEB_ENV_FILE`).
///
/// Sets vars only if not already set in the process environment and never logs values.
fn load_env_file() {
    let Ok(p) = std::env::var("ASKWEB_ENV_FILE") else {
        return;
    };
    let p = p.trim();
    if p.is_empty() {
        return;
    }
    let Ok(txt) = std::fs::read_to_string(p) else {
        return;
    };
    for raw in txt.lines() {
        let s = raw.trim();
        if s.is_empty() || s.starts_with('#') {
            continue;
        }
        let Some((k, v)) = s.split_once('=') else {
            continue;
        };
        let k = k.trim();
        let v = v.trim();
        if k.is_empty() {
            continue;
        }
        if std::env::var_os(k).is_none() {
            std::env::set_var(k, v);
        }
    }
}

/// Logs go to stderr; stdout is reserved for JSON output.
fn init_logging() {
    let filter = std::env::var("ASKWEB_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(EnvFilter::new)
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

async fn serve(args: ServeCmd) -> Result<()> {
    let orchestrator = Arc::new(
        args.pipeline
            .build_orchestrator()
            .context("building the answer pipeline")?,
    );
    let model = orchestrator.model().clone();
    if args.warm_up {
        model
            .warm_up()
            .await
            .with_context(|| format!("warming up the {} model backend", model.name()))?;
    }

    let app = askweb::http::router(orchestrator, args.response_schema);
    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("binding {}", args.bind))?;
    tracing::info!(addr = %listener.local_addr()?, backend = model.name(), "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Err(e) = model.shut_down().await {
        tracing::warn!(error = %e, "model shutdown failed");
    }
    Ok(())
}

async fn ask(args: AskCmd) -> Result<()> {
    let orchestrator = args
        .pipeline
        .build_orchestrator()
        .context("building the answer pipeline")?;
    let answer = orchestrator.answer(&args.message).await?;
    match args.output.to_ascii_lowercase().as_str() {
        "text" => println!("{}", answer.answer),
        _ => println!("{}", serde_json::to_string(&answer)?),
    }
    Ok(())
}

async fn doctor(args: DoctorCmd) -> Result<()> {
    fn has_env(k: &str) -> bool {
        std::env::var(k).ok().is_some_and(|v| !v.trim().is_empty())
    }

    let t0 = std::time::Instant::now();
    let mut checks: Vec<serde_json::Value> = Vec::new();

    let cfg = args.pipeline.pipeline_config();
    let cfg_ok = cfg.validate();
    checks.push(serde_json::json!({
        "name": "pipeline_config",
        "ok": cfg_ok.is_ok(),
        "error": cfg_ok.as_ref().err().map(|e| e.to_string()),
    }));

    let transcript = args.pipeline.transcript();
    checks.push(serde_json::json!({
        "name": "exemplar_transcript",
        "ok": transcript.is_ok(),
        "exemplars": transcript.as_ref().map(|t| t.exemplars.len()).ok(),
        "error": transcript.as_ref().err().map(|e| e.to_string()),
    }));

    let pw = askweb_local::PlaywrightConfig::from_env();
    let node_version = if pw.disabled {
        None
    } else {
        askweb_local::shellout::first_line(
            &pw.node_bin,
            &["--version"],
            std::time::Duration::from_millis(args.timeout_ms),
        )
    };
    checks.push(serde_json::json!({
        "name": "node_available",
        "ok": pw.disabled || node_version.is_some(),
        "skipped": pw.disabled,
        "node_version": node_version,
        "hint": if pw.disabled || node_version.is_some() { "" } else {
            "Install Node.js and Playwright (`npm i -g playwright && npx playwright install chromium`), or set ASKWEB_NODE_BIN."
        },
    }));

    let backend = args.pipeline.llm_backend.resolve();
    let mut llm_check = serde_json::json!({
        "name": "llm_reachable",
        "ok": true,
        "skipped": !args.check_llm,
        "error": serde_json::Value::Null,
        "elapsed_ms": serde_json::Value::Null,
    });
    if args.check_llm {
        let probe_t0 = std::time::Instant::now();
        let res = match args.pipeline.build_model() {
            Ok(model) => tokio::time::timeout(
                std::time::Duration::from_millis(args.timeout_ms),
                model.warm_up(),
            )
            .await
            .map_err(|_| format!("timed out after {}ms", args.timeout_ms))
            .and_then(|r| r.map_err(|e| e.to_string())),
            Err(e) => Err(e.to_string()),
        };
        llm_check["ok"] = serde_json::json!(res.is_ok());
        llm_check["error"] = serde_json::json!(res.err());
        llm_check["elapsed_ms"] = serde_json::json!(probe_t0.elapsed().as_millis() as u64);
    }
    checks.push(llm_check);

    let ok = checks
        .iter()
        .filter(|c| c["name"] != "node_available")
        .all(|c| c["ok"].as_bool() == Some(true));

    let v = serde_json::json!({
        "schema_version": 1,
        "kind": "doctor",
        "ok": ok,
        "name": "askweb",
        "version": env!("CARGO_PKG_VERSION"),
        "elapsed_ms": t0.elapsed().as_millis() as u64,
        "configured": {
            "llm": {
                "backend": args.pipeline.llm_backend.as_str(),
                "resolved_backend": backend.as_str(),
                "openai_compat": has_env("ASKWEB_OPENAI_COMPAT_BASE_URL"),
                "openai_compat_api_key": has_env("ASKWEB_OPENAI_COMPAT_API_KEY"),
                "ollama_base_url": has_env("ASKWEB_OLLAMA_BASE_URL"),
            },
            "search": {
                "disabled": pw.disabled,
                "search_url": pw.search_url,
                "node_bin_override": has_env("ASKWEB_NODE_BIN"),
            },
            "exemplars_file": args.pipeline.exemplars_file.is_some(),
            "pipeline": cfg,
        },
        "checks": checks,
    });
    println!("{v}");
    Ok(())
}

fn version(args: VersionCmd) {
    let v = serde_json::json!({
        "schema_version": 1,
        "kind": "version",
        "ok": true,
        "name": "askweb",
        "version": env!("CARGO_PKG_VERSION"),
    });
    match args.output.to_ascii_lowercase().as_str() {
        "text" => println!("askweb {}", env!("CARGO_PKG_VERSION")),
        _ => println!("{v}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env_file();
    init_logging();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve(args) => serve(args).await,
        Commands::Ask(args) => ask(args).await,
        Commands::Doctor(args) => doctor(args).await,
        Commands::Version(args) => {
            version(args);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use askweb::config::LlmBackend;

    #[test]
    fn cli_parses_serve_flags() {
        let cli = Cli::try_parse_from([
            "askweb",
            "serve",
            "--bind",
            "0.0.0.0:8080",
            "--response-schema",
            "flat",
            "--warm-up=false",
            "--llm-backend",
            "ollama",
        ])
        .unwrap();
        let Commands::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.bind.port(), 8080);
        assert_eq!(args.response_schema, ResponseSchema::Flat);
        assert!(!args.warm_up);
        assert_eq!(args.pipeline.llm_backend, LlmBackend::Ollama);
    }

    #[test]
    fn ask_requires_a_message() {
        assert!(Cli::try_parse_from(["askweb", "ask"]).is_err());
    }
}
