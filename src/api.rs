//! HTTP surface. Everything except the stream read is session-authenticated;
//! stream reads are capability-addressed by the unguessable stream id and
//! carry permissive CORS so browsers can poll them cross-origin.

use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{HeaderMap, StatusCode},
    middleware,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;

use crate::auth;
use crate::chats::{self, ChatGroup};
use crate::constants::MAX_STREAM_WAIT_MS;
use crate::health;
use crate::keys::{self, KeyPreview};
use crate::logging::request_id_middleware;
use crate::messages::{self, MessageRecord};
use crate::orchestrator;
use crate::str_utils::tail_on_boundary;
use crate::types::{
    ChatId, ClientId, MessageId, ProviderFamily, Result, RockpoolError, StreamId, StreamStatus,
};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub prompt: String,
    #[serde(default)]
    pub chat_id: Option<String>,
    pub model: String,
    #[serde(default)]
    pub force_tool: Option<String>,
    pub client_id: String,
}

impl SendMessageRequest {
    pub fn validate(&self) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(
                RockpoolError::InvalidRequest("prompt must not be empty".to_string()).into(),
            );
        }
        if self.model.is_empty() {
            return Err(
                RockpoolError::InvalidRequest("model must not be empty".to_string()).into(),
            );
        }
        if self.client_id.is_empty() {
            return Err(
                RockpoolError::InvalidRequest("client_id must not be empty".to_string()).into(),
            );
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub stream_id: StreamId,
}

async fn send_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<SendMessageResponse>> {
    let user_id = auth::authenticate(&state.db, &headers).await?;
    req.validate()?;

    let ticket = orchestrator::start_generation(
        &state,
        &user_id,
        &req.prompt,
        req.chat_id.map(ChatId::from),
        &req.model,
        req.force_tool.as_deref(),
        &ClientId(req.client_id.clone()),
    )
    .await?;

    Ok(Json(SendMessageResponse {
        chat_id: ticket.chat_id,
        message_id: ticket.message_id,
        stream_id: ticket.stream_id,
    }))
}

#[derive(Debug, Deserialize)]
pub struct StreamReadQuery {
    #[serde(default)]
    pub from: Option<usize>,
    #[serde(default)]
    pub wait_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct StreamReadResponse {
    pub status: StreamStatus,
    pub body: String,
    pub len: usize,
}

/// Long-poll read. `from` is the byte length the caller already has; when it
/// lands on a char boundary of the current body the response carries only
/// the suffix, otherwise the full body. `wait_ms` is clamped server-side.
async fn read_stream(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<StreamReadQuery>,
) -> Result<Json<StreamReadResponse>> {
    let stream_id = StreamId(id);
    let from = query.from.unwrap_or(0);
    let wait_ms = query
        .wait_ms
        .unwrap_or(state.args.stream_wait_secs * 1000)
        .min(MAX_STREAM_WAIT_MS);

    let snapshot = state
        .streams
        .read_blocking(&stream_id, from, Duration::from_millis(wait_ms))
        .await?;

    let len = snapshot.body.len();
    let body = match tail_on_boundary(&snapshot.body, from) {
        Some(tail) => tail.to_string(),
        None => snapshot.body,
    };

    Ok(Json(StreamReadResponse {
        status: snapshot.status,
        body,
        len,
    }))
}

async fn list_chats(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<ChatGroup>>> {
    let user_id = auth::authenticate(&state.db, &headers).await?;
    let groups = chats::list_chats_grouped(&state.db, &user_id).await?;
    Ok(Json(groups))
}

async fn list_chat_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Vec<MessageRecord>>> {
    let user_id = auth::authenticate(&state.db, &headers).await?;
    let chat_id = ChatId(id);

    // Foreign chats are reported exactly like missing ones.
    match chats::chat_owner(&state.db, &chat_id).await? {
        Some(owner) if owner == user_id => {}
        _ => return Err(RockpoolError::NotFound(format!("Chat not found: {}", chat_id)).into()),
    }

    let records = messages::list_for_chat(&state.db, &chat_id).await?;
    Ok(Json(records))
}

#[derive(Debug, Deserialize)]
pub struct SaveKeyRequest {
    pub provider: String,
    pub key: String,
}

async fn save_key(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<SaveKeyRequest>,
) -> Result<StatusCode> {
    let user_id = auth::authenticate(&state.db, &headers).await?;
    let family = match ProviderFamily::parse(&req.provider) {
        Some(f) => f,
        None => {
            return Err(RockpoolError::InvalidRequest(format!(
                "Unknown provider: {}",
                req.provider
            ))
            .into())
        }
    };
    if req.key.is_empty() {
        return Err(RockpoolError::InvalidRequest("key must not be empty".to_string()).into());
    }

    keys::save_key(
        &state.db,
        &user_id,
        family,
        &req.key,
        &state.encryption_secret,
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_keys(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<KeyPreview>>> {
    let user_id = auth::authenticate(&state.db, &headers).await?;
    let previews = keys::key_previews(&state.db, &user_id, &state.encryption_secret).await?;
    Ok(Json(previews))
}

async fn delete_key(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(provider): Path<String>,
) -> Result<StatusCode> {
    let user_id = auth::authenticate(&state.db, &headers).await?;
    let family = match ProviderFamily::parse(&provider) {
        Some(f) => f,
        None => {
            return Err(
                RockpoolError::InvalidRequest(format!("Unknown provider: {}", provider)).into(),
            )
        }
    };

    keys::remove_key(&state.db, &user_id, family).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn build_router(state: Arc<AppState>) -> Router {
    // Stream reads get their own CORS layer; nothing else is cross-origin.
    let stream_reads = Router::new()
        .route("/v1/streams/:id", get(read_stream))
        .layer(CorsLayer::permissive());

    Router::new()
        .route("/v1/messages", post(send_message))
        .route("/v1/chats", get(list_chats))
        .route("/v1/chats/:id/messages", get(list_chat_messages))
        .route("/v1/keys", post(save_key).get(list_keys))
        .route("/v1/keys/:provider", delete(delete_key))
        .route("/health", get(health::liveness))
        .route("/readyz", get(health::readiness))
        .merge(stream_reads)
        .layer(DefaultBodyLimit::max(state.args.max_body_size))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

#[cfg(test)]
mod validation_tests {
    use super::*;

    fn request(prompt: &str, model: &str, client_id: &str) -> SendMessageRequest {
        SendMessageRequest {
            prompt: prompt.to_string(),
            chat_id: None,
            model: model.to_string(),
            force_tool: None,
            client_id: client_id.to_string(),
        }
    }

    #[test]
    fn test_rejects_blank_prompt() {
        let req = request("   ", "gpt-4.1", "client_1");
        match req.validate() {
            Err(e) => match e.inner {
                RockpoolError::InvalidRequest(_) => {}
                other => panic!("Expected InvalidRequest, got {:?}", other),
            },
            Ok(()) => panic!("Blank prompt should be rejected"),
        }
    }

    #[test]
    fn test_rejects_missing_model_and_client() {
        assert!(request("hi", "", "client_1").validate().is_err());
        assert!(request("hi", "gpt-4.1", "").validate().is_err());
    }

    #[test]
    fn test_accepts_complete_request() {
        assert!(request("hi", "gpt-4.1", "client_1").validate().is_ok());
    }
}
