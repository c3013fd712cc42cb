//! HTTP boundary: `POST /send_message` and `GET /healthz`.

use crate::config::ResponseSchema;
use askweb_core::{Answer, Error, Orchestrator};
use axum::{
    extract::{FromRequest, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Clone)]
struct AppState {
    orchestrator: Arc<Orchestrator>,
    schema: ResponseSchema,
}

pub fn router(orchestrator: Arc<Orchestrator>, schema: ResponseSchema) -> Router {
    Router::new()
        .route("/send_message", post(send_message))
        .route("/healthz", get(healthz))
        .with_state(AppState {
            orchestrator,
            schema,
        })
}

#[derive(Debug, Default, Deserialize)]
struct MessageBody {
    #[serde(default)]
    message: Option<String>,
}

/// Accept `{"message": ...}` as JSON or `message=...` as a form; anything else counts as missing.
async fn message_from(req: Request) -> Option<String> {
    let is_json = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.trim().to_ascii_lowercase().starts_with("application/json"));
    let body = if is_json {
        Json::<MessageBody>::from_request(req, &()).await.ok().map(|Json(b)| b)
    } else {
        Form::<MessageBody>::from_request(req, &()).await.ok().map(|Form(b)| b)
    };
    body.and_then(|b| b.message).filter(|m| !m.trim().is_empty())
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "status": "error", "message": message }))).into_response()
}

fn success_response(schema: ResponseSchema, answer: Answer) -> Response {
    let body = match schema {
        ResponseSchema::Messages => json!({
            "status": "success",
            "messages": [
                { "sender": "User", "text": answer.message },
                { "sender": "System", "text": answer.answer },
            ],
        }),
        ResponseSchema::Flat => json!({ "status": "success", "response": answer.answer }),
    };
    (StatusCode::OK, Json(body)).into_response()
}

async fn send_message(State(state): State<AppState>, req: Request) -> Response {
    let Some(message) = message_from(req).await else {
        return error_response(StatusCode::BAD_REQUEST, "No message provided");
    };

    tracing::info!(message_chars = message.chars().count(), "message received");
    match state.orchestrator.answer(&message).await {
        Ok(answer) => success_response(state.schema, answer),
        Err(Error::MissingInput) => error_response(StatusCode::BAD_REQUEST, "No message provided"),
        Err(e) => {
            tracing::error!(error = %e, "request failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to generate a response",
            )
        }
    }
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
