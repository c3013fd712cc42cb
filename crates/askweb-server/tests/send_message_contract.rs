use askweb::config::ResponseSchema;
use askweb::core::{
    ChatModel, ContentExtractor, Error, ExemplarTranscript, ExtractedDocument, Extraction,
    Orchestrator, PipelineConfig, Result, Turn, WebSearch,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Says `label` to the classifier and `answer` (or fails) to the synthesizer.
struct ScriptedModel {
    label: &'static str,
    answer: std::result::Result<&'static str, &'static str>,
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl ChatModel for ScriptedModel {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn generate(&self, conversation: &[Turn], max_new_tokens: u32) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if max_new_tokens == PipelineConfig::default().classifier_max_tokens {
            return Ok(self.label.to_string());
        }
        let system = &conversation[0].content;
        match self.answer {
            Ok(a) if system.contains("knowledge base") => Ok(format!("{a} [with context]")),
            Ok(a) => Ok(a.to_string()),
            Err(e) => Err(Error::Llm(e.to_string())),
        }
    }
}

struct OneResult;

#[async_trait::async_trait]
impl WebSearch for OneResult {
    fn name(&self) -> &'static str {
        "one"
    }

    async fn first_result_url(&self, _query: &str) -> Result<String> {
        Ok("https://weather.example/tokyo".to_string())
    }
}

struct StaticPage;

#[async_trait::async_trait]
impl ContentExtractor for StaticPage {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn extract(&self, url: &str) -> Extraction {
        Extraction::Text(ExtractedDocument {
            url: url.to_string(),
            text: "Tokyo 21C clear".to_string(),
        })
    }
}

async fn serve(model: ScriptedModel, schema: ResponseSchema) -> SocketAddr {
    let orchestrator = Orchestrator::new(
        Arc::new(model),
        Arc::new(OneResult),
        Arc::new(StaticPage),
        ExemplarTranscript::default(),
        PipelineConfig::default(),
    )
    .unwrap();
    let app = askweb::http::router(Arc::new(orchestrator), schema);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn model(label: &'static str, answer: std::result::Result<&'static str, &'static str>) -> ScriptedModel {
    ScriptedModel {
        label,
        answer,
        calls: AtomicUsize::new(0),
    }
}

#[tokio::test]
async fn json_body_gets_the_messages_schema() {
    let addr = serve(model("TRUE", Ok("Paris.")), ResponseSchema::Messages).await;
    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/send_message"))
        .json(&serde_json::json!({ "message": "What is the capital of France?" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let v: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(
        v,
        serde_json::json!({
            "status": "success",
            "messages": [
                { "sender": "User", "text": "What is the capital of France?" },
                { "sender": "System", "text": "Paris." },
            ],
        })
    );
}

#[tokio::test]
async fn form_body_gets_the_flat_schema() {
    let addr = serve(model("FALSE", Ok("21C in Tokyo.")), ResponseSchema::Flat).await;
    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/send_message"))
        .header("content-type", "application/x-www-form-urlencoded")
        .body("message=What%20is%20the%20weather%20in%20Tokyo%3F")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let v: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(v["status"], "success");
    assert_eq!(v["response"], "21C in Tokyo. [with context]");
    assert!(v.get("messages").is_none());
}

#[tokio::test]
async fn missing_or_blank_message_is_a_400_before_the_model_runs() {
    let m = Arc::new(model("TRUE", Ok("unused")));
    let orchestrator = Orchestrator::new(
        m.clone(),
        Arc::new(OneResult),
        Arc::new(StaticPage),
        ExemplarTranscript::default(),
        PipelineConfig::default(),
    )
    .unwrap();
    let app = askweb::http::router(Arc::new(orchestrator), ResponseSchema::Messages);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = reqwest::Client::new();
    let url = format!("http://{addr}/send_message");
    let bodies = [
        client.post(&url).json(&serde_json::json!({})),
        client.post(&url).json(&serde_json::json!({ "message": "   " })),
        client
            .post(&url)
            .header("content-type", "application/x-www-form-urlencoded")
            .body("other=1"),
        client.post(&url),
    ];
    for rb in bodies {
        let resp = rb.send().await.unwrap();
        assert_eq!(resp.status(), 400);
        let v: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(
            v,
            serde_json::json!({ "status": "error", "message": "No message provided" })
        );
    }
    assert_eq!(m.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn inference_failure_is_a_generic_500() {
    let addr = serve(
        model("TRUE", Err("CUDA out of memory at 0xdeadbeef")),
        ResponseSchema::Messages,
    )
    .await;
    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/send_message"))
        .json(&serde_json::json!({ "message": "hello" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
    let text = resp.text().await.unwrap();
    let v: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(
        v,
        serde_json::json!({ "status": "error", "message": "Failed to generate a response" })
    );
    assert!(!text.contains("deadbeef"));
}

#[tokio::test]
async fn healthz_is_ok() {
    let addr = serve(model("TRUE", Ok("x")), ResponseSchema::Messages).await;
    let v: serde_json::Value = reqwest::get(format!("http://{addr}/healthz"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(v, serde_json::json!({ "status": "ok" }));
}
