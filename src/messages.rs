//! Message rows and conversation history assembly.
//!
//! Messages are a tagged union over `role`. User rows are immutable. An
//! assistant row starts as a placeholder pointing at its stream and is
//! patched exactly once, when generation finishes; streaming chunks never
//! touch the row.

use serde::Serialize;

use crate::db::{now_ms, DbPool};
use crate::types::{ChatId, ClientId, HistoryTurn, MessageId, Result, Role, StreamId, UserId};

/// Full projection of one message row for the transcript endpoint.
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct MessageRecord {
    pub id: String,
    pub role: String,
    pub content: Option<String>,
    pub model: Option<String>,
    pub client_id: Option<String>,
    pub stream_id: Option<String>,
    pub generation_done: bool,
    pub error: Option<String>,
    pub created_at: i64,
}

pub async fn insert_user_message(
    db: &DbPool,
    chat_id: &ChatId,
    user_id: &UserId,
    content: &str,
) -> Result<MessageId> {
    let id = MessageId::new();
    sqlx::query(
        "INSERT INTO messages (id, chat_id, user_id, role, content, created_at) \
         VALUES (?, ?, ?, 'user', ?, ?)",
    )
    .bind(&id.0)
    .bind(&chat_id.0)
    .bind(&user_id.0)
    .bind(content)
    .bind(now_ms())
    .execute(db)
    .await?;
    Ok(id)
}

pub async fn insert_assistant_placeholder(
    db: &DbPool,
    chat_id: &ChatId,
    user_id: &UserId,
    model: &str,
    client_id: &ClientId,
    force_tool: Option<&str>,
    stream_id: &StreamId,
) -> Result<MessageId> {
    let id = MessageId::new();
    sqlx::query(
        "INSERT INTO messages \
         (id, chat_id, user_id, role, model, client_id, force_tool, stream_id, generation_done, created_at) \
         VALUES (?, ?, ?, 'assistant', ?, ?, ?, ?, 0, ?)",
    )
    .bind(&id.0)
    .bind(&chat_id.0)
    .bind(&user_id.0)
    .bind(model)
    .bind(&client_id.0)
    .bind(force_tool)
    .bind(&stream_id.0)
    .bind(now_ms())
    .execute(db)
    .await?;
    Ok(id)
}

/// One-shot write-back at the end of generation. Calling it again (or for a
/// missing row) is a logged no-op, so the row never regresses.
pub async fn finalize_assistant_message(
    db: &DbPool,
    message_id: &MessageId,
    content: Option<&str>,
    error: Option<&str>,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE messages SET content = ?, generation_done = 1, error = ? \
         WHERE id = ? AND generation_done = 0",
    )
    .bind(content)
    .bind(error)
    .bind(&message_id.0)
    .execute(db)
    .await?;

    if result.rows_affected() == 0 {
        tracing::warn!("[⚙️ ] Message {} already finalized or missing", message_id);
    }
    Ok(())
}

pub async fn list_for_chat(db: &DbPool, chat_id: &ChatId) -> Result<Vec<MessageRecord>> {
    let rows = sqlx::query_as::<_, MessageRecord>(
        "SELECT id, role, content, model, client_id, stream_id, generation_done, error, created_at \
         FROM messages WHERE chat_id = ? ORDER BY created_at, rowid",
    )
    .bind(&chat_id.0)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

/// Conversation history for the next model call, recomputed fresh each time.
/// User turns contribute their stored content. Assistant turns contribute
/// their stream's body only when that stream completed normally; in-flight
/// and failed turns are skipped so a retry never sees half an answer.
pub async fn chat_history(db: &DbPool, chat_id: &ChatId) -> Result<Vec<HistoryTurn>> {
    let rows = sqlx::query_as::<_, (String, Option<String>, Option<String>, Option<String>)>(
        "SELECT m.role, m.content, s.status, s.body \
         FROM messages m LEFT JOIN streams s ON s.id = m.stream_id \
         WHERE m.chat_id = ? ORDER BY m.created_at, m.rowid",
    )
    .bind(&chat_id.0)
    .fetch_all(db)
    .await?;

    let mut turns = Vec::new();
    for (role, content, stream_status, stream_body) in rows {
        match Role::parse(&role) {
            Some(Role::User) => {
                if let Some(text) = content {
                    turns.push(HistoryTurn {
                        role: Role::User,
                        content: text,
                    });
                }
            }
            Some(Role::Assistant) => {
                if stream_status.as_deref() == Some("done") {
                    if let Some(body) = stream_body {
                        if !body.is_empty() {
                            turns.push(HistoryTurn {
                                role: Role::Assistant,
                                content: body,
                            });
                        }
                    }
                }
            }
            None => {
                tracing::warn!("[⚙️ ] Skipping message with unknown role {:?}", role);
            }
        }
    }
    Ok(turns)
}
