//! Durable FIFO queue of pending mutations.
//!
//! Mutations that fail with a transport error are parked here and replayed
//! once connectivity returns. The queue is persisted as a JSON registry so
//! pending work survives restarts; writes go through a temp file and rename
//! so a crash cannot leave a torn registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;

use usher_cache::keys;
use usher_common::{Error, EventId, Result, UserId};

/// Replay attempts before an operation is evicted.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Queue registry file name.
const QUEUE_FILE: &str = "queue.json";

/// A mutation that can be replayed later.
///
/// Only mutations that are safe to retry live here. Cancellations are
/// deliberately absent: un-subscribing offline and replaying it later would
/// silently undo a registration the user may have redone in between.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum MutationRequest {
    /// Subscribe the current user to an event.
    Subscribe { event_id: EventId },
    /// Create an account and register it for an event.
    QuickRegister {
        name: String,
        email: String,
        event_id: EventId,
    },
    /// Record a user's attendance at an event.
    MarkAttendance {
        user_id: UserId,
        event_id: EventId,
        present: bool,
    },
}

impl MutationRequest {
    pub fn kind(&self) -> MutationKind {
        match self {
            Self::Subscribe { .. } => MutationKind::Subscribe,
            Self::QuickRegister { .. } => MutationKind::QuickRegister,
            Self::MarkAttendance { .. } => MutationKind::MarkAttendance,
        }
    }

    /// The event the mutation touches.
    pub fn event_id(&self) -> EventId {
        match self {
            Self::Subscribe { event_id }
            | Self::QuickRegister { event_id, .. }
            | Self::MarkAttendance { event_id, .. } => *event_id,
        }
    }

    /// Cache keys that go stale once this mutation lands remotely.
    pub fn invalidates(&self) -> Vec<String> {
        match self {
            Self::Subscribe { event_id } => {
                vec![keys::my_subscriptions(), keys::event(*event_id)]
            }
            Self::QuickRegister { event_id, .. } => {
                vec![keys::users(), keys::registrations(*event_id)]
            }
            Self::MarkAttendance { event_id, .. } => {
                vec![keys::my_attendances(), keys::registrations(*event_id)]
            }
        }
    }
}

/// Which kind of mutation an operation carries, for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Subscribe,
    QuickRegister,
    MarkAttendance,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Subscribe => "subscribe",
            Self::QuickRegister => "quick_register",
            Self::MarkAttendance => "mark_attendance",
        };
        write!(f, "{}", name)
    }
}

/// One queued mutation with its replay bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    /// Stable identity across restarts.
    pub id: String,
    #[serde(flatten)]
    pub request: MutationRequest,
    pub created_at: DateTime<Utc>,
    /// Failed replay attempts so far.
    pub retry_count: u32,
}

/// Persistent FIFO of operations awaiting replay.
pub struct OperationQueue {
    operations: Vec<PendingOperation>,
    registry_path: PathBuf,
    depth_tx: watch::Sender<usize>,
}

impl OperationQueue {
    /// Open the queue rooted at `dir`, loading any persisted operations.
    /// A missing or unreadable registry starts empty.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).await?;
        let registry_path = dir.join(QUEUE_FILE);

        let operations: Vec<PendingOperation> = match fs::read_to_string(&registry_path).await {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            Err(_) => Vec::new(),
        };
        if !operations.is_empty() {
            info!(count = operations.len(), "loaded pending operations");
        }

        let (depth_tx, _) = watch::channel(operations.len());
        Ok(Self {
            operations,
            registry_path,
            depth_tx,
        })
    }

    /// Append a mutation and persist. Returns the stored operation.
    pub async fn enqueue(&mut self, request: MutationRequest) -> Result<PendingOperation> {
        let operation = PendingOperation {
            id: Uuid::new_v4().to_string(),
            request,
            created_at: Utc::now(),
            retry_count: 0,
        };
        self.operations.push(operation.clone());
        self.persist().await?;
        debug!(id = %operation.id, kind = %operation.request.kind(), "operation queued");
        Ok(operation)
    }

    /// Pending operations, oldest first.
    pub fn list(&self) -> &[PendingOperation] {
        &self.operations
    }

    /// Remove a completed operation.
    pub async fn dequeue(&mut self, id: &str) -> Result<PendingOperation> {
        let index = self
            .operations
            .iter()
            .position(|op| op.id == id)
            .ok_or_else(|| Error::NotFound(format!("operation {}", id)))?;
        let operation = self.operations.remove(index);
        self.persist().await?;
        Ok(operation)
    }

    /// Bump an operation's retry count after a failed replay.
    pub async fn bump_retry(&mut self, id: &str) -> Result<u32> {
        let operation = self
            .operations
            .iter_mut()
            .find(|op| op.id == id)
            .ok_or_else(|| Error::NotFound(format!("operation {}", id)))?;
        operation.retry_count += 1;
        let attempts = operation.retry_count;
        self.persist().await?;
        Ok(attempts)
    }

    /// Remove and return every operation whose retries are used up,
    /// preserving the order of what stays.
    pub async fn evict_exhausted(&mut self, max_retries: u32) -> Result<Vec<PendingOperation>> {
        let (exhausted, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.operations)
            .into_iter()
            .partition(|op| op.retry_count >= max_retries);
        self.operations = kept;
        if !exhausted.is_empty() {
            self.persist().await?;
        }
        Ok(exhausted)
    }

    pub fn count(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Drop everything, e.g. on logout.
    pub async fn clear(&mut self) -> Result<usize> {
        let dropped = self.operations.len();
        if dropped > 0 {
            self.operations.clear();
            self.persist().await?;
        }
        Ok(dropped)
    }

    /// Watch the queue depth. Updated after every persisted change.
    pub fn depth(&self) -> watch::Receiver<usize> {
        self.depth_tx.subscribe()
    }

    async fn persist(&self) -> Result<()> {
        let raw = serde_json::to_string_pretty(&self.operations)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        let tmp = self.registry_path.with_extension("json.tmp");
        fs::write(&tmp, raw).await?;
        fs::rename(&tmp, &self.registry_path).await?;
        self.depth_tx.send_replace(self.operations.len());
        Ok(())
    }
}
