//! Client-side stream following.
//!
//! A reader carries only the byte length of the body it has applied so far
//! and repeats bounded reads until the stream turns terminal. The transport
//! is behind `StreamSource`: in-process against the store, or long-poll over
//! the HTTP surface. Both return the same chunk shape, so the loop is
//! transport-blind.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::str_utils::tail_on_boundary;
use crate::streams::StreamStore;
use crate::types::{ClientId, Result, RockpoolError, StreamId, StreamStatus};

/// Whether this reader's client started the generation it is following.
/// Presentation bookkeeping only; both roles run the identical loop and the
/// server never branches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderRole {
    Driving,
    Observing,
}

impl ReaderRole {
    pub fn for_message(local: &ClientId, recorded: Option<&str>) -> Self {
        match recorded {
            Some(origin) if origin == local.0 => Self::Driving,
            _ => Self::Observing,
        }
    }
}

/// One bounded read: current status, a body payload, and the total body
/// length on the server. `body` is the suffix after the reader's offset when
/// the server honored it as a delta, otherwise the full body; `len`
/// disambiguates the two for `apply_chunk`.
#[derive(Debug, Clone)]
pub struct ReadChunk {
    pub status: StreamStatus,
    pub body: String,
    pub len: usize,
}

/// A transport that can perform one bounded read against a stream. The call
/// may return before `wait` with no growth; that is a normal empty read.
#[async_trait]
pub trait StreamSource: Send + Sync {
    async fn read_from(&self, id: &StreamId, known_len: usize, wait: Duration)
        -> Result<ReadChunk>;
}

/// In-process source, reading the store directly. Applies the same
/// delta-or-full rule as the HTTP surface so both transports behave alike.
pub struct LocalSource {
    pub streams: Arc<StreamStore>,
}

#[async_trait]
impl StreamSource for LocalSource {
    async fn read_from(
        &self,
        id: &StreamId,
        known_len: usize,
        wait: Duration,
    ) -> Result<ReadChunk> {
        let snapshot = self.streams.read_blocking(id, known_len, wait).await?;
        let len = snapshot.body.len();
        let body = match tail_on_boundary(&snapshot.body, known_len) {
            Some(tail) => tail.to_string(),
            None => snapshot.body,
        };
        Ok(ReadChunk {
            status: snapshot.status,
            body,
            len,
        })
    }
}

/// Long-poll source over the HTTP surface. `base_url` is the server origin
/// without a trailing slash, e.g. "http://127.0.0.1:8080".
pub struct HttpSource {
    pub client: reqwest::Client,
    pub base_url: String,
}

#[derive(serde::Deserialize)]
struct WireChunk {
    status: StreamStatus,
    body: String,
    len: usize,
}

#[async_trait]
impl StreamSource for HttpSource {
    async fn read_from(
        &self,
        id: &StreamId,
        known_len: usize,
        wait: Duration,
    ) -> Result<ReadChunk> {
        let url = format!(
            "{}/v1/streams/{}?from={}&wait_ms={}",
            self.base_url,
            id.0,
            known_len,
            wait.as_millis()
        );
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            if status == axum::http::StatusCode::NOT_FOUND {
                return Err(RockpoolError::NotFound(format!("Stream not found: {}", id)).into());
            }
            return Err(RockpoolError::Upstream(status, text).into());
        }
        let wire: WireChunk = response.json().await?;
        Ok(ReadChunk {
            status: wire.status,
            body: wire.body,
            len: wire.len,
        })
    }
}

/// Merges one read into the accumulated body. A chunk whose payload extends
/// the current length to exactly `len` is a delta and appends; anything else
/// is a full body and replaces.
pub fn apply_chunk(body: &mut String, chunk: &ReadChunk) {
    if body.len() + chunk.body.len() == chunk.len {
        body.push_str(&chunk.body);
    } else {
        body.clear();
        body.push_str(&chunk.body);
    }
}

/// Follows a stream until it turns terminal and returns the final status
/// with the fully assembled body. `on_update` observes the accumulated body
/// after every applied read, including the terminal one. Attaching to an
/// already-finalized stream yields exactly one read.
pub async fn run_reader<F>(
    source: &dyn StreamSource,
    id: &StreamId,
    wait: Duration,
    mut on_update: F,
) -> Result<(StreamStatus, String)>
where
    F: FnMut(StreamStatus, &str),
{
    let mut body = String::new();
    loop {
        let chunk = source.read_from(id, body.len(), wait).await?;
        apply_chunk(&mut body, &chunk);
        on_update(chunk.status, &body);
        if chunk.status.is_terminal() {
            return Ok((chunk.status, body));
        }
    }
}
