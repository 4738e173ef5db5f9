//! Session-token authentication.
//!
//! Sessions are provisioned out of band by the auth service that shares this
//! database; this module only validates presented tokens. Stream reads are
//! deliberately unauthenticated (the stream id is the capability), so only
//! the chat, message, and key surfaces come through here.

use axum::http::{header, HeaderMap};

use crate::db::{now_ms, DbPool};
use crate::types::{Result, RockpoolError, UserId};

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    value.strip_prefix("Bearer ")
}

/// Resolves the caller from the Authorization header. Expired sessions are
/// treated the same as unknown tokens.
pub async fn authenticate(db: &DbPool, headers: &HeaderMap) -> Result<UserId> {
    let token = match bearer_token(headers) {
        Some(t) if !t.is_empty() => t,
        _ => return Err(RockpoolError::Unauthorized.into()),
    };

    let row = sqlx::query_as::<_, (String,)>(
        "SELECT user_id FROM sessions WHERE token = ? AND expires_at > ?",
    )
    .bind(token)
    .bind(now_ms())
    .fetch_optional(db)
    .await?;

    match row {
        Some((user_id,)) => Ok(UserId(user_id)),
        None => Err(RockpoolError::Unauthorized.into()),
    }
}
