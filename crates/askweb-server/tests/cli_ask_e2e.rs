use axum::{extract::State, routing::post, Json, Router};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

type Seen = Arc<Mutex<Vec<serde_json::Value>>>;

/// OpenAI-compatible stub: the 5-token classifier call gets `label`, anything else an answer.
async fn serve_llm(label: &'static str) -> (SocketAddr, Seen) {
    async fn completions(
        State((label, seen)): State<(&'static str, Seen)>,
        Json(body): Json<serde_json::Value>,
    ) -> Json<serde_json::Value> {
        let content = if body["max_tokens"] == 5 {
            label.to_string()
        } else {
            "Paris is the capital of France.".to_string()
        };
        seen.lock().unwrap().push(body);
        Json(serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": content } }]
        }))
    }

    let seen: Seen = Arc::default();
    let app = Router::new()
        .route("/v1/chat/completions", post(completions))
        .with_state((label, seen.clone()));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, seen)
}

async fn ask(addr: SocketAddr, extra: &[&str]) -> std::process::Output {
    let bin = assert_cmd::cargo::cargo_bin!("askweb");
    tokio::process::Command::new(bin)
        .arg("ask")
        .args(extra)
        .env_remove("ASKWEB_ENV_FILE")
        .env_remove("ASKWEB_EXEMPLARS_FILE")
        .env("ASKWEB_LLM_BACKEND", "openai_compat")
        .env("ASKWEB_OPENAI_COMPAT_BASE_URL", format!("http://{addr}"))
        .env("ASKWEB_OPENAI_COMPAT_MODEL", "stub")
        // No browser in tests: every search fails fast.
        .env("ASKWEB_RENDER_DISABLE", "1")
        .output()
        .await
        .expect("run askweb ask")
}

#[test]
fn general_knowledge_question_is_answered_without_retrieval() {
    let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
    rt.block_on(async {
        let (addr, seen) = serve_llm("TRUE").await;
        let out = ask(addr, &["What is the capital of France?"]).await;
        assert!(
            out.status.success(),
            "ask failed: {}",
            String::from_utf8_lossy(&out.stderr)
        );

        let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("answer json");
        assert_eq!(v["message"], "What is the capital of France?");
        assert_eq!(v["answer"], "Paris is the capital of France.");
        assert_eq!(v["verdict"], "general_knowledge");
        assert_eq!(v["prompt"], "open_domain");
        assert!(v["source_url"].is_null());

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        // System + 8 exemplar pairs + the query.
        assert_eq!(seen[0]["messages"].as_array().unwrap().len(), 18);
        assert_eq!(seen[1]["max_tokens"], 120);
        assert_eq!(
            seen[1]["messages"][0]["content"],
            "You are an AI assistant. Answer the user's question in a clear and helpful way."
        );
    });
}

#[test]
fn live_question_degrades_when_search_is_unavailable() {
    let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
    rt.block_on(async {
        let (addr, _seen) = serve_llm("FALSE").await;
        let out = ask(addr, &["What is the weather in Tokyo?"]).await;
        assert!(out.status.success());

        let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("answer json");
        assert_eq!(v["verdict"], "needs_retrieval");
        assert_eq!(v["prompt"], "open_domain");
        assert!(v["retrieval_error"]
            .as_str()
            .unwrap_or("")
            .contains("ASKWEB_RENDER_DISABLE"));
    });
}

#[test]
fn live_question_fails_under_the_fail_policy() {
    let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
    rt.block_on(async {
        let (addr, seen) = serve_llm("false").await;
        let out = ask(
            addr,
            &["--retrieval-failure", "fail", "What is the weather in Tokyo?"],
        )
        .await;
        assert!(!out.status.success());
        assert!(out.stdout.is_empty());
        // Only the classifier ran.
        assert_eq!(seen.lock().unwrap().len(), 1);
    });
}

#[test]
fn text_output_prints_only_the_answer() {
    let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
    rt.block_on(async {
        let (addr, _seen) = serve_llm("TRUE").await;
        let out = ask(addr, &["--output", "text", "capital of France?"]).await;
        assert!(out.status.success());
        assert_eq!(
            String::from_utf8_lossy(&out.stdout).trim(),
            "Paris is the capital of France."
        );
    });
}
