//! Per-family upstream invocation.
//!
//! Every provider is called as a streaming SSE request; text fragments flow
//! out through an mpsc channel and the caller appends them to the stream
//! record. The initial POST is retried with backoff; once the body stream
//! has opened, failures propagate instead.

use axum::http::StatusCode;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing_error::SpanTrace;

use crate::constants::{
    ANTHROPIC_MAX_TOKENS, ANTHROPIC_MESSAGES_URL, ANTHROPIC_VERSION, GOOGLE_BASE_URL,
    GROQ_BASE_URL, MAX_SSE_LINE_BYTES, OPENAI_BASE_URL, OPENROUTER_BASE_URL,
};
use crate::hardening::RetryPolicy;
use crate::registry::Resolved;
use crate::types::{HistoryTurn, ObservedError, ProviderFamily, Result, RockpoolError, Role};

const MAX_STREAM_LINES: usize = 100_000;

/// Runs one streaming completion, sending each text fragment through `tx`.
/// Returns when the upstream stream ends; Ok can still mean zero fragments.
pub async fn invoke(
    client: &reqwest::Client,
    retry: &RetryPolicy,
    resolved: &Resolved,
    system_prompt: &str,
    history: &[HistoryTurn],
    tx: mpsc::Sender<String>,
) -> Result<()> {
    match resolved.spec.family {
        ProviderFamily::OpenAi => {
            invoke_openai_compatible(client, retry, OPENAI_BASE_URL, resolved, system_prompt, history, tx)
                .await
        }
        ProviderFamily::Groq => {
            invoke_openai_compatible(client, retry, GROQ_BASE_URL, resolved, system_prompt, history, tx)
                .await
        }
        ProviderFamily::OpenRouter => {
            invoke_openai_compatible(
                client,
                retry,
                OPENROUTER_BASE_URL,
                resolved,
                system_prompt,
                history,
                tx,
            )
            .await
        }
        ProviderFamily::Anthropic => {
            invoke_anthropic(client, retry, resolved, system_prompt, history, tx).await
        }
        ProviderFamily::Google => {
            invoke_google(client, retry, resolved, system_prompt, history, tx).await
        }
    }
}

/// Opens the SSE connection, retrying connect-level failures. The response
/// is handed back unread so the caller owns the drain.
async fn open_sse<F>(retry: &RetryPolicy, build: F) -> Result<reqwest::Response>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    retry
        .execute_with_retry(|| {
            let request = build();
            async move {
                let response = request.send().await?;
                let status = response.status();
                if !status.is_success() {
                    let text = response.text().await.unwrap_or_default();
                    tracing::error!("[☁️  -> ⚙️ ] Upstream returned {}: {}", status, text);
                    return Err(RockpoolError::Upstream(status, text).into());
                }
                Ok(response)
            }
        })
        .await
}

fn line_error(e: LinesCodecError) -> ObservedError {
    tracing::error!("[☁️  -> ⚙️ ] Line parse error: {}", e);
    let io_err = match e {
        LinesCodecError::Io(io) => io,
        LinesCodecError::MaxLineLengthExceeded => std::io::Error::other("Max line length exceeded"),
    };
    RockpoolError::Io(io_err).into()
}

fn line_limit_error() -> ObservedError {
    tracing::error!(
        "[☁️  -> ⚙️ ] Stream exceeded max line limit ({})",
        MAX_STREAM_LINES
    );
    RockpoolError::Internal(
        "Stream exceeded max line limit".to_string(),
        SpanTrace::capture(),
    )
    .into()
}

/// Error event embedded in the stream body. The status code is taken from
/// the payload when present, else treated as a bad gateway.
fn provider_error(error: &serde_json::Value) -> ObservedError {
    tracing::error!("[☁️  -> ⚙️ ] Stream error event: {}", error);
    let message = error["message"].as_str().unwrap_or("unknown provider error");
    let status = error["code"]
        .as_u64()
        .and_then(|c| u16::try_from(c).ok())
        .and_then(|c| StatusCode::from_u16(c).ok())
        .unwrap_or(StatusCode::BAD_GATEWAY);
    RockpoolError::Upstream(status, message.to_string()).into()
}

// --- OpenAI-compatible wire (OpenAI, Groq, OpenRouter) ---

fn openai_request_body(
    resolved: &Resolved,
    system_prompt: &str,
    history: &[HistoryTurn],
) -> serde_json::Value {
    let mut messages = vec![serde_json::json!({ "role": "system", "content": system_prompt })];
    for turn in history {
        messages.push(serde_json::json!({
            "role": turn.role.as_str(),
            "content": turn.content,
        }));
    }

    let mut body = serde_json::json!({
        "model": resolved.spec.upstream,
        "messages": messages,
        "stream": true,
    });
    if let Some(tools) = &resolved.tools {
        body["tools"] = serde_json::json!([{ "type": tools.tool }]);
        if tools.forced {
            body["tool_choice"] = serde_json::json!({ "type": tools.tool });
        }
    }
    body
}

fn openai_delta_text(value: &serde_json::Value) -> Option<&str> {
    value["choices"][0]["delta"]["content"].as_str()
}

async fn invoke_openai_compatible(
    client: &reqwest::Client,
    retry: &RetryPolicy,
    base_url: &str,
    resolved: &Resolved,
    system_prompt: &str,
    history: &[HistoryTurn],
    tx: mpsc::Sender<String>,
) -> Result<()> {
    let body = openai_request_body(resolved, system_prompt, history);
    let url = format!("{}/chat/completions", base_url);

    tracing::info!(
        "[⚙️  -> ☁️ ] Opening {} stream for {}",
        resolved.spec.family,
        resolved.spec.upstream
    );
    let response = open_sse(retry, || {
        client
            .post(&url)
            .bearer_auth(&resolved.api_key)
            .json(&body)
    })
    .await?;

    let bytes_stream = response
        .bytes_stream()
        .map(|r| r.map_err(std::io::Error::other));
    let mut lines = FramedRead::new(
        tokio_util::io::StreamReader::new(bytes_stream),
        LinesCodec::new_with_max_length(MAX_SSE_LINE_BYTES),
    );
    let mut line_count = 0usize;
    while let Some(line_result) = lines.next().await {
        let line = match line_result {
            Ok(line) => line,
            Err(e) => return Err(line_error(e)),
        };
        line_count += 1;
        if line_count > MAX_STREAM_LINES {
            return Err(line_limit_error());
        }

        let data = match line.strip_prefix("data: ") {
            Some(d) => d,
            None => continue,
        };
        if data == "[DONE]" {
            tracing::debug!("[☁️  -> ⚙️ ] Stream end marker [DONE] received");
            break;
        }

        let value: serde_json::Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!("[☁️  -> ⚙️ ] Unparseable stream line: {}", data);
                continue;
            }
        };
        if let Some(error) = value.get("error") {
            return Err(provider_error(error));
        }
        if let Some(text) = openai_delta_text(&value) {
            if !text.is_empty() && tx.send(text.to_string()).await.is_err() {
                tracing::trace!("Fragment receiver dropped, stopping drain");
                break;
            }
        }
    }
    Ok(())
}

// --- Anthropic messages wire ---

fn anthropic_request_body(
    resolved: &Resolved,
    system_prompt: &str,
    history: &[HistoryTurn],
) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = history
        .iter()
        .map(|turn| {
            serde_json::json!({
                "role": turn.role.as_str(),
                "content": turn.content,
            })
        })
        .collect();

    serde_json::json!({
        "model": resolved.spec.upstream,
        "max_tokens": ANTHROPIC_MAX_TOKENS,
        "system": system_prompt,
        "messages": messages,
        "stream": true,
    })
}

fn anthropic_delta_text(value: &serde_json::Value) -> Option<&str> {
    if value["type"].as_str() == Some("content_block_delta") {
        value["delta"]["text"].as_str()
    } else {
        None
    }
}

async fn invoke_anthropic(
    client: &reqwest::Client,
    retry: &RetryPolicy,
    resolved: &Resolved,
    system_prompt: &str,
    history: &[HistoryTurn],
    tx: mpsc::Sender<String>,
) -> Result<()> {
    let body = anthropic_request_body(resolved, system_prompt, history);

    tracing::info!(
        "[⚙️  -> ☁️ ] Opening anthropic stream for {}",
        resolved.spec.upstream
    );
    let response = open_sse(retry, || {
        client
            .post(ANTHROPIC_MESSAGES_URL)
            .header("x-api-key", &resolved.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
    })
    .await?;

    let bytes_stream = response
        .bytes_stream()
        .map(|r| r.map_err(std::io::Error::other));
    let mut lines = FramedRead::new(
        tokio_util::io::StreamReader::new(bytes_stream),
        LinesCodec::new_with_max_length(MAX_SSE_LINE_BYTES),
    );
    let mut line_count = 0usize;
    while let Some(line_result) = lines.next().await {
        let line = match line_result {
            Ok(line) => line,
            Err(e) => return Err(line_error(e)),
        };
        line_count += 1;
        if line_count > MAX_STREAM_LINES {
            return Err(line_limit_error());
        }

        // Event-name lines and keep-alive comments carry no payload.
        let data = match line.strip_prefix("data: ") {
            Some(d) => d,
            None => continue,
        };

        let value: serde_json::Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!("[☁️  -> ⚙️ ] Unparseable stream line: {}", data);
                continue;
            }
        };
        match value["type"].as_str() {
            Some("message_stop") => break,
            Some("error") => return Err(provider_error(&value["error"])),
            _ => {
                if let Some(text) = anthropic_delta_text(&value) {
                    if !text.is_empty() && tx.send(text.to_string()).await.is_err() {
                        tracing::trace!("Fragment receiver dropped, stopping drain");
                        break;
                    }
                }
            }
        }
    }
    Ok(())
}

// --- Google generateContent wire ---

fn google_request_body(system_prompt: &str, history: &[HistoryTurn]) -> serde_json::Value {
    let contents: Vec<serde_json::Value> = history
        .iter()
        .map(|turn| {
            let role = match turn.role {
                Role::User => "user",
                Role::Assistant => "model",
            };
            serde_json::json!({
                "role": role,
                "parts": [{ "text": turn.content }],
            })
        })
        .collect();

    serde_json::json!({
        "system_instruction": { "parts": [{ "text": system_prompt }] },
        "contents": contents,
    })
}

fn google_fragment(value: &serde_json::Value) -> String {
    let mut out = String::new();
    if let Some(parts) = value["candidates"][0]["content"]["parts"].as_array() {
        for part in parts {
            if let Some(text) = part["text"].as_str() {
                out.push_str(text);
            }
        }
    }
    out
}

async fn invoke_google(
    client: &reqwest::Client,
    retry: &RetryPolicy,
    resolved: &Resolved,
    system_prompt: &str,
    history: &[HistoryTurn],
    tx: mpsc::Sender<String>,
) -> Result<()> {
    let body = google_request_body(system_prompt, history);
    let url = format!(
        "{}/{}:streamGenerateContent?alt=sse",
        GOOGLE_BASE_URL, resolved.spec.upstream
    );

    tracing::info!(
        "[⚙️  -> ☁️ ] Opening google stream for {}",
        resolved.spec.upstream
    );
    let response = open_sse(retry, || {
        client
            .post(&url)
            .header("x-goog-api-key", &resolved.api_key)
            .json(&body)
    })
    .await?;

    let bytes_stream = response
        .bytes_stream()
        .map(|r| r.map_err(std::io::Error::other));
    let mut lines = FramedRead::new(
        tokio_util::io::StreamReader::new(bytes_stream),
        LinesCodec::new_with_max_length(MAX_SSE_LINE_BYTES),
    );
    let mut line_count = 0usize;
    while let Some(line_result) = lines.next().await {
        let line = match line_result {
            Ok(line) => line,
            Err(e) => return Err(line_error(e)),
        };
        line_count += 1;
        if line_count > MAX_STREAM_LINES {
            return Err(line_limit_error());
        }

        let data = match line.strip_prefix("data: ") {
            Some(d) => d,
            None => continue,
        };

        let value: serde_json::Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!("[☁️  -> ⚙️ ] Unparseable stream line: {}", data);
                continue;
            }
        };
        if let Some(error) = value.get("error") {
            return Err(provider_error(error));
        }

        let fragment = google_fragment(&value);
        if !fragment.is_empty() && tx.send(fragment).await.is_err() {
            tracing::trace!("Fragment receiver dropped, stopping drain");
            break;
        }
    }
    Ok(())
}
