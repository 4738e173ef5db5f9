//! Generation lifecycle: from an accepted prompt to a finalized stream and
//! message row.
//!
//! The synchronous half runs inside the request handler and persists
//! everything another request might look for (user message, stream record,
//! assistant placeholder) before returning. The asynchronous half is one
//! spawned worker per stream id; nothing ever re-triggers it.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing_error::SpanTrace;

use crate::app::AppState;
use crate::chats;
use crate::constants::RETRY_BASE_DELAY_MS;
use crate::hardening::RetryPolicy;
use crate::keys;
use crate::messages;
use crate::prompts;
use crate::providers;
use crate::registry::{self, Resolved};
use crate::types::{
    ChatId, ClientId, MessageId, Result, RockpoolError, StreamId, StreamStatus, UserId,
    GENERATION_FAILED_MESSAGE,
};

/// Ids handed back from a successful send: where the reply will live and
/// which stream to follow for it.
#[derive(Debug, Clone)]
pub struct GenerationTicket {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub stream_id: StreamId,
}

/// Persists the request side of a generation and spawns the worker.
///
/// The ticket ids are committed before this returns, so a reader arriving
/// right after the response can always find the stream and the placeholder.
/// Model resolution and the provider call happen on the worker; their
/// failures surface on the stream, not as a request error.
pub async fn start_generation(
    state: &AppState,
    user_id: &UserId,
    prompt: &str,
    chat: Option<ChatId>,
    model: &str,
    force_tool: Option<&str>,
    client_id: &ClientId,
) -> Result<GenerationTicket> {
    let chat_id = match chat {
        Some(id) => match chats::chat_owner(&state.db, &id).await? {
            Some(owner) if owner == *user_id => id,
            // Unknown and foreign chats are indistinguishable to the caller.
            _ => return Err(RockpoolError::NotFound(format!("Chat not found: {}", id)).into()),
        },
        None => {
            let id = chats::create_chat(&state.db, user_id).await?;
            chats::spawn_title_generation(
                state.client.clone(),
                state.db.clone(),
                id.clone(),
                prompt.to_string(),
            );
            id
        }
    };

    messages::insert_user_message(&state.db, &chat_id, user_id, prompt).await?;

    let stream_id = state.streams.create().await?;
    let message_id = messages::insert_assistant_placeholder(
        &state.db,
        &chat_id,
        user_id,
        model,
        client_id,
        force_tool,
        &stream_id,
    )
    .await?;

    tracing::info!(
        "[⚙️ ] Generation started: chat {} model {} stream {}",
        chat_id,
        model,
        stream_id.short()
    );

    tokio::spawn(run_generation(
        state.clone(),
        user_id.clone(),
        chat_id.clone(),
        message_id.clone(),
        stream_id.clone(),
        model.to_string(),
        force_tool.map(str::to_string),
    ));

    Ok(GenerationTicket {
        chat_id,
        message_id,
        stream_id,
    })
}

/// Worker half: resolve, invoke, drain, finalize. Every exit path leaves the
/// stream terminal and the placeholder row finalized.
async fn run_generation(
    state: AppState,
    user_id: UserId,
    chat_id: ChatId,
    message_id: MessageId,
    stream_id: StreamId,
    model: String,
    force_tool: Option<String>,
) {
    let resolved = match resolve_for_user(&state, &user_id, &model, force_tool.as_deref()).await {
        Ok(r) => r,
        Err(e) => {
            // Resolution failures are the caller's to fix, so their message
            // goes to the stream verbatim. Anything else stays generic.
            let user_message = match &e.inner {
                RockpoolError::UnknownModel(_) | RockpoolError::MissingApiKey(_) => {
                    e.inner.to_string()
                }
                _ => GENERATION_FAILED_MESSAGE.to_string(),
            };
            tracing::warn!(
                "[⚙️ ] Generation for stream {} aborted before invocation: {}",
                stream_id.short(),
                e.inner
            );
            fail_generation(
                &state,
                &stream_id,
                &message_id,
                StreamStatus::Error,
                &user_message,
            )
            .await;
            return;
        }
    };

    let budget = Duration::from_secs(state.args.generation_timeout_secs);
    let outcome = tokio::time::timeout(
        budget,
        stream_completion(&state, &chat_id, &stream_id, &resolved),
    )
    .await;

    match outcome {
        Ok(Ok(())) => {
            let body = match state.streams.read(&stream_id).await {
                Ok(snapshot) => snapshot.body,
                Err(e) => {
                    tracing::error!(
                        "[⚙️ ] Could not read back stream {} after completion: {}",
                        stream_id.short(),
                        e
                    );
                    fail_generation(
                        &state,
                        &stream_id,
                        &message_id,
                        StreamStatus::Error,
                        GENERATION_FAILED_MESSAGE,
                    )
                    .await;
                    return;
                }
            };

            if let Err(e) = state
                .streams
                .finalize(&stream_id, StreamStatus::Done, Some(&body))
                .await
            {
                tracing::warn!(
                    "[⚙️ ] Finalize of stream {} failed: {}",
                    stream_id.short(),
                    e
                );
            }
            if let Err(e) =
                messages::finalize_assistant_message(&state.db, &message_id, Some(&body), None)
                    .await
            {
                tracing::warn!("[⚙️ ] Write-back to message {} failed: {}", message_id, e);
            }
            tracing::info!(
                "[⚙️ ] Generation for stream {} done ({} bytes)",
                stream_id.short(),
                body.len()
            );
        }
        Ok(Err(e)) => {
            tracing::error!(
                "[⚙️ ] Generation for stream {} failed: {}",
                stream_id.short(),
                e
            );
            fail_generation(
                &state,
                &stream_id,
                &message_id,
                StreamStatus::Error,
                GENERATION_FAILED_MESSAGE,
            )
            .await;
        }
        Err(_) => {
            tracing::warn!(
                "[⚙️ ] Generation for stream {} exceeded {:?}",
                stream_id.short(),
                budget
            );
            fail_generation(
                &state,
                &stream_id,
                &message_id,
                StreamStatus::Timeout,
                GENERATION_FAILED_MESSAGE,
            )
            .await;
        }
    }
}

async fn resolve_for_user(
    state: &AppState,
    user_id: &UserId,
    model: &str,
    force_tool: Option<&str>,
) -> Result<Resolved> {
    let keys = keys::load_keys(&state.db, user_id, &state.encryption_secret).await?;
    registry::resolve(model, &keys, force_tool)
}

/// Runs one provider call and appends each emitted fragment to the stream.
/// The provider worker owns the connection; appends happen here so a slow
/// append backpressures the channel instead of stalling the socket read.
async fn stream_completion(
    state: &AppState,
    chat_id: &ChatId,
    stream_id: &StreamId,
    resolved: &Resolved,
) -> Result<()> {
    let history = messages::chat_history(&state.db, chat_id).await?;
    let system_prompt = prompts::system_prompt(resolved.spec.id);
    let retry = RetryPolicy::new(state.args.max_retries + 1, RETRY_BASE_DELAY_MS);

    let (tx, mut rx) = mpsc::channel::<String>(100);
    let worker = {
        let client = state.client.clone();
        let resolved = resolved.clone();
        tokio::spawn(async move {
            providers::invoke(&client, &retry, &resolved, &system_prompt, &history, tx).await
        })
    };

    while let Some(fragment) = rx.recv().await {
        state.streams.append(stream_id, &fragment).await?;
    }

    match worker.await {
        Ok(result) => result,
        Err(join_err) => Err(RockpoolError::Internal(
            format!("Provider worker panicked: {}", join_err),
            SpanTrace::capture(),
        )
        .into()),
    }
}

/// Terminal bookkeeping for any failed path. Both writes are idempotent, so
/// losing a race against another finalize cannot corrupt state.
async fn fail_generation(
    state: &AppState,
    stream_id: &StreamId,
    message_id: &MessageId,
    status: StreamStatus,
    user_message: &str,
) {
    if let Err(e) = state.streams.finalize(stream_id, status, None).await {
        tracing::warn!(
            "[⚙️ ] Finalize of stream {} failed: {}",
            stream_id.short(),
            e
        );
    }
    if let Err(e) =
        messages::finalize_assistant_message(&state.db, message_id, None, Some(user_message)).await
    {
        tracing::warn!(
            "[⚙️ ] Error write-back to message {} failed: {}",
            message_id,
            e
        );
    }
}
