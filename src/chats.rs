//! Chat rows, the date-grouped sidebar listing, and first-message titles.

use chrono::{DateTime, Days, Local, NaiveDate, TimeZone};
use serde::Serialize;
use tracing_error::SpanTrace;

use crate::constants::{CHAT_LIST_LIMIT, GROQ_BASE_URL, TITLE_MAX_TOKENS, TITLE_MODEL};
use crate::db::{now_ms, DbPool};
use crate::prompts::generate_title_prompt;
use crate::types::{ChatId, Result, RockpoolError, UserId};

#[derive(Debug, Serialize)]
pub struct ChatSummary {
    pub id: String,
    pub title: String,
    pub created_at: i64,
}

#[derive(Debug, Serialize)]
pub struct ChatGroup {
    pub label: String,
    pub chats: Vec<ChatSummary>,
}

pub async fn create_chat(db: &DbPool, user_id: &UserId) -> Result<ChatId> {
    let id = ChatId::new();
    sqlx::query("INSERT INTO chats (id, title, user_id, created_at) VALUES (?, 'New Chat', ?, ?)")
        .bind(&id.0)
        .bind(&user_id.0)
        .bind(now_ms())
        .execute(db)
        .await?;
    tracing::info!("[⚙️ ] Created chat {} for {}", id, user_id);
    Ok(id)
}

pub async fn chat_owner(db: &DbPool, chat_id: &ChatId) -> Result<Option<UserId>> {
    let row = sqlx::query_as::<_, (String,)>("SELECT user_id FROM chats WHERE id = ?")
        .bind(&chat_id.0)
        .fetch_optional(db)
        .await?;
    Ok(row.map(|(user_id,)| UserId(user_id)))
}

pub async fn update_title(db: &DbPool, chat_id: &ChatId, title: &str) -> Result<()> {
    sqlx::query("UPDATE chats SET title = ? WHERE id = ?")
        .bind(title)
        .bind(&chat_id.0)
        .execute(db)
        .await?;
    Ok(())
}

/// Newest-first chats bucketed under calendar-day labels, capped at the
/// listing limit. Labels collapse to "Today" / "Yesterday" for the two most
/// recent days.
pub async fn list_chats_grouped(db: &DbPool, user_id: &UserId) -> Result<Vec<ChatGroup>> {
    let rows = sqlx::query_as::<_, (String, String, i64)>(
        "SELECT id, title, created_at FROM chats WHERE user_id = ? \
         ORDER BY created_at DESC, rowid DESC LIMIT ?",
    )
    .bind(&user_id.0)
    .bind(CHAT_LIST_LIMIT)
    .fetch_all(db)
    .await?;

    Ok(group_rows(rows, Local::now().date_naive()))
}

fn group_rows(rows: Vec<(String, String, i64)>, today: NaiveDate) -> Vec<ChatGroup> {
    let mut groups: Vec<ChatGroup> = Vec::new();
    for (id, title, created_at) in rows {
        let label = date_label(created_at, today);
        let summary = ChatSummary {
            id,
            title,
            created_at,
        };
        match groups.last_mut() {
            Some(group) if group.label == label => group.chats.push(summary),
            _ => groups.push(ChatGroup {
                label,
                chats: vec![summary],
            }),
        }
    }
    groups
}

fn date_label(created_ms: i64, today: NaiveDate) -> String {
    let day = match DateTime::from_timestamp_millis(created_ms) {
        Some(ts) => ts.with_timezone(&Local).date_naive(),
        None => return "Older".to_string(),
    };
    if day == today {
        return "Today".to_string();
    }
    if Some(day) == today.checked_sub_days(Days::new(1)) {
        return "Yesterday".to_string();
    }
    day.format("%A, %B %-d, %Y").to_string()
}

/// Fire-and-forget first-message title. Runs on the server's own Groq key;
/// every failure path leaves the default "New Chat" title in place.
pub fn spawn_title_generation(
    client: reqwest::Client,
    db: DbPool,
    chat_id: ChatId,
    prompt: String,
) {
    tokio::spawn(async move {
        let api_key = match std::env::var("GROQ_API_KEY") {
            Ok(k) if !k.is_empty() => k,
            _ => {
                tracing::debug!(
                    "[⚙️ ] GROQ_API_KEY not set, skipping title generation for {}",
                    chat_id
                );
                return;
            }
        };

        match generate_title(&client, &api_key, &prompt).await {
            Ok(title) => match update_title(&db, &chat_id, &title).await {
                Ok(()) => tracing::info!("[⚙️ ] Titled chat {}: {:?}", chat_id, title),
                Err(e) => tracing::warn!("[⚙️ ] Failed to store title for {}: {}", chat_id, e),
            },
            Err(e) => {
                tracing::warn!("[⚙️ ] Title generation for {} failed: {}", chat_id, e);
            }
        }
    });
}

async fn generate_title(client: &reqwest::Client, api_key: &str, prompt: &str) -> Result<String> {
    let body = serde_json::json!({
        "model": TITLE_MODEL,
        "messages": [
            { "role": "system", "content": generate_title_prompt() },
            { "role": "user", "content": prompt },
        ],
        "max_completion_tokens": TITLE_MAX_TOKENS,
    });

    tracing::info!("[⚙️  -> ☁️ ] Requesting chat title from {}", TITLE_MODEL);
    let response = client
        .post(format!("{}/chat/completions", GROQ_BASE_URL))
        .bearer_auth(api_key)
        .json(&body)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(RockpoolError::Upstream(status, text).into());
    }

    let payload: serde_json::Value = response.json().await?;
    let raw = payload["choices"][0]["message"]["content"]
        .as_str()
        .unwrap_or("");

    let title = clean_title(raw);
    if title.is_empty() {
        return Err(
            RockpoolError::Internal("empty title completion".to_string(), SpanTrace::capture())
                .into(),
        );
    }
    Ok(title)
}

/// Models often wrap the asked-for title in quotes; strip one wrapping pair.
fn clean_title(raw: &str) -> String {
    let trimmed = raw.trim();
    let unquoted = trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed);
    unquoted.trim().to_string()
}
