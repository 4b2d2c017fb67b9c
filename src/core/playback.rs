//! Typing playback.
//!
//! A finalized assistant response is revealed character by character,
//! independent of rendering. The reveal is an explicit resumable state
//! object driven by one tokio task; progress events flow to the consumer
//! over an unbounded channel tagged with a playback id, and every step
//! checkpoints to storage so an interrupted reveal can resume after a
//! reload. Checkpoints older than the staleness window are discarded and
//! the response is considered lost; it is never re-sent.

use crate::storage::{StorageBackend, TYPING_STATE_KEY};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Fastest and slowest per-character delay. The interval scales with
/// response length so long replies do not crawl.
const MIN_STEP: Duration = Duration::from_millis(8);
const MAX_STEP: Duration = Duration::from_millis(35);

/// Target for the whole reveal; the per-character interval is derived from
/// this and clamped to the floor/ceiling above.
const TARGET_TOTAL_MS: u64 = 4_000;

/// Checkpoints older than this are discarded on restore.
const CHECKPOINT_STALENESS: Duration = Duration::from_secs(5 * 60);

/// Resumable reveal progress for one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevealState {
    pub full_text: String,
    /// Byte offset of the reveal frontier; always on a char boundary.
    pub position: usize,
    pub interval: Duration,
    pub started_at: DateTime<Utc>,
}

impl RevealState {
    pub fn new(full_text: impl Into<String>) -> Self {
        let full_text = full_text.into();
        let interval = interval_for(full_text.chars().count());
        Self {
            full_text,
            position: 0,
            interval,
            started_at: Utc::now(),
        }
    }

    pub fn revealed(&self) -> &str {
        &self.full_text[..self.position]
    }

    pub fn is_complete(&self) -> bool {
        self.position >= self.full_text.len()
    }

    /// Advance the frontier by one character; returns the new position.
    pub fn advance(&mut self) -> usize {
        if let Some(ch) = self.full_text[self.position..].chars().next() {
            self.position += ch.len_utf8();
        }
        self.position
    }

    fn to_checkpoint(&self) -> Checkpoint {
        Checkpoint {
            text: self.full_text.clone(),
            position: self.position,
            speed: self.interval.as_millis() as u64,
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

/// Per-character delay scaled to response length, clamped to the bounds.
fn interval_for(char_count: usize) -> Duration {
    if char_count == 0 {
        return MAX_STEP;
    }
    Duration::from_millis(TARGET_TOTAL_MS / char_count as u64).clamp(MIN_STEP, MAX_STEP)
}

/// Persisted shape of an in-progress reveal.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Checkpoint {
    text: String,
    position: usize,
    speed: u64,
    timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// The frontier moved; `position` is a byte offset into the full text.
    Step { position: usize },
    /// All characters revealed; the checkpoint has been removed.
    Completed,
}

/// Owns the event channel and drives reveals, one task per playback.
#[derive(Clone)]
pub struct PlaybackDriver {
    tx: mpsc::UnboundedSender<(PlaybackEvent, u64)>,
    storage: Arc<dyn StorageBackend>,
}

impl PlaybackDriver {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
    ) -> (Self, mpsc::UnboundedReceiver<(PlaybackEvent, u64)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, storage }, rx)
    }

    /// Start revealing. The returned token cancels the reveal promptly; the
    /// checkpoint is left behind so a reload can resume it.
    pub fn spawn_reveal(&self, mut state: RevealState, playback_id: u64) -> CancellationToken {
        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();
        let tx = self.tx.clone();
        let storage = self.storage.clone();

        tokio::spawn(async move {
            debug!(playback_id, chars = state.full_text.len(), "reveal started");
            tokio::select! {
                _ = async {
                    while !state.is_complete() {
                        tokio::time::sleep(state.interval).await;
                        let position = state.advance();

                        if let Err(err) = write_checkpoint(storage.as_ref(), &state) {
                            warn!(error = %err, "failed to checkpoint reveal progress");
                        }
                        let _ = tx.send((PlaybackEvent::Step { position }, playback_id));
                    }

                    if let Err(err) = storage.remove(TYPING_STATE_KEY) {
                        warn!(error = %err, "failed to clear reveal checkpoint");
                    }
                    let _ = tx.send((PlaybackEvent::Completed, playback_id));
                    debug!(playback_id, "reveal completed");
                } => {}
                _ = token.cancelled() => {
                    debug!(playback_id, "reveal cancelled");
                }
            }
        });

        cancel_token
    }

    /// Restore an interrupted reveal from its checkpoint. Stale checkpoints
    /// are removed and yield `None`.
    pub fn restore_checkpoint(&self) -> Option<RevealState> {
        restore_checkpoint(self.storage.as_ref())
    }
}

fn write_checkpoint(
    storage: &dyn StorageBackend,
    state: &RevealState,
) -> Result<(), crate::storage::StorageError> {
    let serialized = serde_json::to_string(&state.to_checkpoint())
        .map_err(|source| crate::storage::StorageError::Serialize { source })?;
    storage.set(TYPING_STATE_KEY, &serialized)
}

fn restore_checkpoint(storage: &dyn StorageBackend) -> Option<RevealState> {
    let raw = storage.get(TYPING_STATE_KEY)?;
    let checkpoint: Checkpoint = match serde_json::from_str(&raw) {
        Ok(checkpoint) => checkpoint,
        Err(err) => {
            warn!(error = %err, "reveal checkpoint did not parse; discarding");
            let _ = storage.remove(TYPING_STATE_KEY);
            return None;
        }
    };

    let age_ms = Utc::now().timestamp_millis() - checkpoint.timestamp;
    if age_ms < 0 || age_ms as u128 > CHECKPOINT_STALENESS.as_millis() {
        debug!(age_ms, "reveal checkpoint is stale; discarding");
        let _ = storage.remove(TYPING_STATE_KEY);
        return None;
    }

    if !checkpoint.text.is_char_boundary(checkpoint.position) {
        let _ = storage.remove(TYPING_STATE_KEY);
        return None;
    }

    Some(RevealState {
        position: checkpoint.position.min(checkpoint.text.len()),
        interval: Duration::from_millis(checkpoint.speed).clamp(MIN_STEP, MAX_STEP),
        started_at: Utc::now(),
        full_text: checkpoint.text,
    })
}
