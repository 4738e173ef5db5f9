use crate::db::{now_ms, DbPool};
use crate::types::{Result, RockpoolError, StreamId, StreamSnapshot, StreamStatus};
use sqlx::Row;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;

/// In-process wake fan-out: one version channel per live stream. The writer
/// bumps the version after every committed append; readers blocked in
/// `read_blocking` wake on the bump and re-read. Finalize drops the channel,
/// which wakes every remaining receiver for its final read. Readers in other
/// processes simply fall back to deadline-bounded polling.
#[derive(Default)]
struct WakeHub {
    channels: Mutex<HashMap<String, watch::Sender<u64>>>,
}

impl WakeHub {
    fn subscribe(&self, id: &str) -> watch::Receiver<u64> {
        let mut map = match self.channels.lock() {
            Ok(m) => m,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.entry(id.to_string())
            .or_insert_with(|| watch::channel(0).0)
            .subscribe()
    }

    fn bump(&self, id: &str) {
        let map = match self.channels.lock() {
            Ok(m) => m,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(tx) = map.get(id) {
            tx.send_modify(|v| *v += 1);
        }
    }

    fn close(&self, id: &str) {
        let mut map = match self.channels.lock() {
            Ok(m) => m,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.remove(id);
    }
}

/// Durable append-only stream records over SQLite. One logical writer per
/// stream id (the generation worker); any number of concurrent readers.
pub struct StreamStore {
    db: DbPool,
    hub: WakeHub,
}

impl StreamStore {
    pub fn new(db: DbPool) -> Self {
        Self {
            db,
            hub: WakeHub::default(),
        }
    }

    /// Allocates a new record with status=pending and an empty body.
    pub async fn create(&self) -> Result<StreamId> {
        let id = StreamId::new();
        let now = now_ms();
        sqlx::query(
            "INSERT INTO streams (id, status, body, created_at, updated_at) \
             VALUES (?, 'pending', '', ?, ?)",
        )
        .bind(&id.0)
        .bind(now)
        .bind(now)
        .execute(&self.db)
        .await?;

        tracing::debug!("[⚙️ ] Stream {} created", id.short());
        Ok(id)
    }

    /// Appends a chunk to the body and moves pending -> streaming. The status
    /// guard makes appends to a finalized stream a loud caller error instead
    /// of silent corruption.
    pub async fn append(&self, id: &StreamId, chunk: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE streams SET body = body || ?, status = 'streaming', updated_at = ? \
             WHERE id = ? AND status IN ('pending', 'streaming')",
        )
        .bind(chunk)
        .bind(now_ms())
        .bind(&id.0)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            let exists: Option<(String,)> =
                sqlx::query_as("SELECT status FROM streams WHERE id = ?")
                    .bind(&id.0)
                    .fetch_optional(&self.db)
                    .await?;
            return match exists {
                Some(_) => Err(RockpoolError::StreamClosed(id.0.clone()).into()),
                None => Err(RockpoolError::NotFound(format!("Stream not found: {}", id)).into()),
            };
        }

        self.hub.bump(&id.0);
        Ok(())
    }

    /// Single terminal transition. Idempotent: the status guard means only the
    /// first call takes effect; later calls (any arguments) are logged no-ops.
    /// `final_body` of None keeps whatever body has accumulated, so partial
    /// output survives an error or timeout finalize.
    pub async fn finalize(
        &self,
        id: &StreamId,
        status: StreamStatus,
        final_body: Option<&str>,
    ) -> Result<()> {
        if !status.is_terminal() {
            return Err(RockpoolError::InvalidRequest(format!(
                "{} is not a terminal stream status",
                status
            ))
            .into());
        }

        let result = sqlx::query(
            "UPDATE streams SET status = ?, body = COALESCE(?, body), updated_at = ? \
             WHERE id = ? AND status IN ('pending', 'streaming')",
        )
        .bind(status.as_str())
        .bind(final_body)
        .bind(now_ms())
        .bind(&id.0)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            let exists: Option<(String,)> =
                sqlx::query_as("SELECT status FROM streams WHERE id = ?")
                    .bind(&id.0)
                    .fetch_optional(&self.db)
                    .await?;
            match exists {
                Some((current,)) => {
                    tracing::debug!(
                        "[⚙️ ] Stream {} already terminal ({}), finalize({}) ignored",
                        id.short(),
                        current,
                        status
                    );
                }
                None => {
                    return Err(
                        RockpoolError::NotFound(format!("Stream not found: {}", id)).into(),
                    );
                }
            }
        } else {
            tracing::info!("[⚙️ ] Stream {} finalized: {}", id.short(), status);
        }

        self.hub.close(&id.0);
        Ok(())
    }

    /// Point-in-time snapshot, non-blocking.
    pub async fn read(&self, id: &StreamId) -> Result<StreamSnapshot> {
        let row = sqlx::query("SELECT status, body FROM streams WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.db)
            .await?;

        let row = match row {
            Some(r) => r,
            None => {
                return Err(RockpoolError::NotFound(format!("Stream not found: {}", id)).into())
            }
        };

        let status_str: String = row.get(0);
        let status = match StreamStatus::parse(&status_str) {
            Some(s) => s,
            None => {
                return Err(RockpoolError::Internal(
                    format!("Stream {} has unknown status '{}'", id, status_str),
                    tracing_error::SpanTrace::capture(),
                )
                .into())
            }
        };

        Ok(StreamSnapshot {
            status,
            body: row.get(1),
        })
    }

    /// Bounded long-poll primitive. Returns immediately when the body has
    /// grown past `known_len` or the stream is terminal; otherwise waits for
    /// an append wakeup or the deadline, whichever comes first, and never
    /// hangs past `timeout`. A deadline return with an unchanged body and a
    /// non-terminal status is a legal result.
    pub async fn read_blocking(
        &self,
        id: &StreamId,
        known_len: usize,
        timeout: Duration,
    ) -> Result<StreamSnapshot> {
        let deadline = tokio::time::Instant::now() + timeout;

        // Fast path; also validates the id before any hub entry is created.
        let first = self.read(id).await?;
        if first.is_terminal() || first.body.len() > known_len {
            return Ok(first);
        }

        let mut rx = self.hub.subscribe(&id.0);

        loop {
            // Re-read after subscribing: an append that landed between the
            // fast-path read and the subscription is caught here, so the
            // wait below can never miss it.
            let snapshot = self.read(id).await?;
            if snapshot.is_terminal() {
                // The subscription may have recreated a channel that
                // finalize already closed; drop it so nothing leaks.
                self.hub.close(&id.0);
                return Ok(snapshot);
            }
            if snapshot.body.len() > known_len {
                return Ok(snapshot);
            }

            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        // Writer finalized and dropped the channel.
                        return self.read(id).await;
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    return self.read(id).await;
                }
            }
        }
    }
}
