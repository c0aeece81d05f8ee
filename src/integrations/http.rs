//! HTTP 接入（axum）
//!
//! - POST /message     `{user_id, text}` → `{reply}`
//! - POST /attachment  `{user_id, mime_type, path | data_base64}` → `{reply}`
//! - POST /event       `{user_id, event: subscribe | unsubscribe}` → `{reply}`
//! - GET  /health
//! - GET  /stats
//!
//! 所有消息经 WorkerPool 排队；队列满时返回 503。

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::agent::{Assistant, AssistantStats, Inbound};
use crate::gateway::{SubmitError, WorkerPool};
use crate::memory::AttachmentRef;

pub struct HttpState {
    pub assistant: Arc<Assistant>,
    pub pool: WorkerPool,
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub user_id: String,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct AttachmentRequest {
    pub user_id: String,
    #[serde(default = "default_mime")]
    pub mime_type: String,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub data_base64: Option<String>,
}

fn default_mime() -> String {
    "image/jpeg".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Subscribe,
    Unsubscribe,
}

#[derive(Debug, Deserialize)]
pub struct EventRequest {
    pub user_id: String,
    pub event: EventKind,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReplyBody {
    pub reply: String,
}

#[derive(Debug, Serialize)]
pub struct StatsBody {
    #[serde(flatten)]
    pub assistant: AssistantStats,
    pub queued: usize,
    pub queue_capacity: usize,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

pub fn create_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/message", post(post_message))
        .route("/attachment", post(post_attachment))
        .route("/event", post(post_event))
        .route("/health", get(|| async { "OK" }))
        .route("/stats", get(get_stats))
        .with_state(state)
}

async fn post_message(State(state): State<Arc<HttpState>>, Json(req): Json<MessageRequest>) -> ApiResult<ReplyBody> {
    if req.user_id.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "user_id is required".to_string()));
    }
    submit(&state, &req.user_id, Inbound::Text(req.text)).await
}

async fn post_attachment(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<AttachmentRequest>,
) -> ApiResult<ReplyBody> {
    let attachment = match (req.path, req.data_base64) {
        (Some(path), _) => AttachmentRef::from_path(path, req.mime_type),
        (None, Some(data)) => {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(data.trim())
                .map_err(|e| (StatusCode::BAD_REQUEST, format!("invalid base64: {e}")))?;
            AttachmentRef::from_bytes(bytes, req.mime_type)
        }
        (None, None) => {
            return Err((StatusCode::BAD_REQUEST, "path or data_base64 is required".to_string()));
        }
    };
    submit(&state, &req.user_id, Inbound::Attachment(attachment)).await
}

async fn post_event(State(state): State<Arc<HttpState>>, Json(req): Json<EventRequest>) -> ApiResult<ReplyBody> {
    let inbound = match req.event {
        EventKind::Subscribe => Inbound::Subscribe,
        EventKind::Unsubscribe => Inbound::Unsubscribe,
    };
    submit(&state, &req.user_id, inbound).await
}

async fn get_stats(State(state): State<Arc<HttpState>>) -> Json<StatsBody> {
    Json(StatsBody {
        assistant: state.assistant.stats().await,
        queued: state.pool.queued(),
        queue_capacity: state.pool.capacity(),
    })
}

async fn submit(state: &HttpState, user_id: &str, inbound: Inbound) -> ApiResult<ReplyBody> {
    let rx = state.pool.try_submit(user_id, inbound).map_err(unavailable)?;
    let reply = rx.await.map_err(|_| unavailable(SubmitError::Closed))?;
    Ok(Json(ReplyBody { reply }))
}

fn unavailable(e: SubmitError) -> (StatusCode, String) {
    (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::create_assistant;
    use crate::config::AppConfig;
    use axum::body::Body;
    use axum::http::Request;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    fn app() -> Router {
        let mut cfg = AppConfig::default();
        cfg.llm.active = "mock".into();
        let assistant = Arc::new(create_assistant(&cfg).unwrap());
        let (pool, _handle) = WorkerPool::start(assistant.clone(), &cfg.workers, CancellationToken::new());
        create_router(Arc::new(HttpState { assistant, pool }))
    }

    async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> (StatusCode, String) {
        let resp = app
            .oneshot(
                Request::post(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_message_round_trip() {
        let (status, body) = post_json(app(), "/message", serde_json::json!({"user_id": "u1", "text": "在吗"})).await;
        assert_eq!(status, StatusCode::OK);
        let reply: ReplyBody = serde_json::from_str(&body).unwrap();
        assert_eq!(reply.reply, "收到：在吗");
    }

    #[tokio::test]
    async fn test_attachment_base64() {
        let (status, body) = post_json(
            app(),
            "/attachment",
            serde_json::json!({"user_id": "u1", "mime_type": "image/png", "data_base64": "AQID"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("共1张"));

        let (status, _) = post_json(app(), "/attachment", serde_json::json!({"user_id": "u1"})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health_and_stats() {
        let router = app();
        let resp = router
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = router
            .oneshot(Request::get("/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let stats: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(stats["active_model"], "mock");
        assert_eq!(stats["queue_capacity"], 64);
    }
}
