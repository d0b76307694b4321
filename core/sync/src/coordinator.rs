//! Replays queued mutations against the live service.
//!
//! A pass walks the queue oldest-first, one operation at a time. Successes
//! and duplicate rejections leave the queue; anything else stays with a
//! bumped retry count and the pass moves on, so one stubborn operation
//! cannot block the rest. Operations that used up their retries are evicted
//! before replay starts. Concurrent callers share a single pass instead of
//! racing the queue.

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, info, warn};

use usher_api::EventService;
use usher_cache::CacheStore;
use usher_common::Error;
use usher_net::ConnectivityState;

use crate::queue::{MutationKind, MutationRequest, OperationQueue, PendingOperation};
use crate::DEFAULT_MAX_RETRIES;

/// Tunables for replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Failed attempts before an operation is dropped.
    pub max_retries: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// One operation that did not make it in a pass.
#[derive(Debug, Clone)]
pub struct SyncFailure {
    pub operation_id: String,
    pub kind: MutationKind,
    pub message: String,
}

/// Outcome of one replay pass.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Operations that landed, duplicate rejections included.
    pub success: usize,
    /// Operations still queued for another attempt.
    pub failed: usize,
    pub errors: Vec<SyncFailure>,
    /// Operations dropped for using up their retries.
    pub evicted: Vec<SyncFailure>,
}

type SharedPass = Shared<BoxFuture<'static, SyncReport>>;

/// Drives replay of the pending queue.
pub struct SyncCoordinator<S: EventService + ?Sized> {
    service: Arc<S>,
    queue: Arc<RwLock<OperationQueue>>,
    cache: Arc<RwLock<CacheStore>>,
    config: SyncConfig,
    in_flight: Arc<Mutex<Option<SharedPass>>>,
}

impl<S: EventService + ?Sized> Clone for SyncCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            queue: self.queue.clone(),
            cache: self.cache.clone(),
            config: self.config.clone(),
            in_flight: self.in_flight.clone(),
        }
    }
}

impl<S: EventService + ?Sized + 'static> SyncCoordinator<S> {
    pub fn new(
        service: Arc<S>,
        queue: Arc<RwLock<OperationQueue>>,
        cache: Arc<RwLock<CacheStore>>,
        config: SyncConfig,
    ) -> Self {
        Self {
            service,
            queue,
            cache,
            config,
            in_flight: Arc::new(Mutex::new(None)),
        }
    }

    /// Run a replay pass, or join the one already running.
    pub async fn sync(&self) -> SyncReport {
        let pass = {
            let mut slot = self.in_flight.lock().await;
            match slot.as_ref() {
                Some(existing) => {
                    debug!("sync already running, joining it");
                    existing.clone()
                }
                None => {
                    let pass = run_pass(
                        self.service.clone(),
                        self.queue.clone(),
                        self.cache.clone(),
                        self.config.clone(),
                        self.in_flight.clone(),
                    )
                    .boxed()
                    .shared();
                    *slot = Some(pass.clone());
                    pass
                }
            }
        };
        pass.await
    }

    /// Sync whenever connectivity is up and work is queued. Returns when
    /// the connectivity source goes away.
    pub async fn drain_when_reachable(self, mut states: watch::Receiver<ConnectivityState>) {
        loop {
            let reachable = states.borrow_and_update().is_reachable;
            if reachable && !self.queue.read().await.is_empty() {
                let report = self.sync().await;
                info!(
                    success = report.success,
                    failed = report.failed,
                    "connectivity-driven sync finished"
                );
            }
            if states.changed().await.is_err() {
                debug!("connectivity watch closed, stopping auto sync");
                break;
            }
        }
    }
}

async fn run_pass<S: EventService + ?Sized>(
    service: Arc<S>,
    queue: Arc<RwLock<OperationQueue>>,
    cache: Arc<RwLock<CacheStore>>,
    config: SyncConfig,
    slot: Arc<Mutex<Option<SharedPass>>>,
) -> SyncReport {
    let mut report = SyncReport::default();

    let evicted = {
        let mut queue = queue.write().await;
        match queue.evict_exhausted(config.max_retries).await {
            Ok(evicted) => evicted,
            Err(e) => {
                warn!("failed to evict exhausted operations: {}", e);
                Vec::new()
            }
        }
    };
    for op in evicted {
        let reason = Error::RetryExhausted {
            kind: op.request.kind().to_string(),
            attempts: op.retry_count,
        };
        warn!(id = %op.id, "dropping operation: {}", reason);
        report.evicted.push(SyncFailure {
            operation_id: op.id,
            kind: op.request.kind(),
            message: reason.to_string(),
        });
    }

    let pending = queue.read().await.list().to_vec();
    if !pending.is_empty() {
        info!(count = pending.len(), "replaying queued operations");
    }

    for op in pending {
        match dispatch(service.as_ref(), &op.request).await {
            Ok(()) => {
                complete(&queue, &cache, &op).await;
                report.success += 1;
            }
            Err(e) if e.already_applied() => {
                debug!(id = %op.id, "operation already applied remotely");
                complete(&queue, &cache, &op).await;
                report.success += 1;
            }
            Err(e) => {
                let attempts = queue
                    .write()
                    .await
                    .bump_retry(&op.id)
                    .await
                    .unwrap_or(op.retry_count + 1);
                warn!(
                    id = %op.id,
                    attempts,
                    "replay failed, keeping operation queued: {}", e
                );
                report.failed += 1;
                report.errors.push(SyncFailure {
                    operation_id: op.id,
                    kind: op.request.kind(),
                    message: e.to_string(),
                });
            }
        }
    }

    *slot.lock().await = None;
    report
}

/// Issue the service call behind a queued request, discarding the payload.
async fn dispatch<S: EventService + ?Sized>(
    service: &S,
    request: &MutationRequest,
) -> usher_common::Result<()> {
    match request {
        MutationRequest::Subscribe { event_id } => service.subscribe(*event_id).await.map(|_| ()),
        MutationRequest::QuickRegister {
            name,
            email,
            event_id,
        } => service
            .quick_register(name, email, *event_id)
            .await
            .map(|_| ()),
        MutationRequest::MarkAttendance {
            user_id,
            event_id,
            present,
        } => service
            .mark_attendance(*user_id, *event_id, *present)
            .await
            .map(|_| ()),
    }
}

/// Dequeue a landed operation and drop the cache entries it staled.
async fn complete(
    queue: &Arc<RwLock<OperationQueue>>,
    cache: &Arc<RwLock<CacheStore>>,
    op: &PendingOperation,
) {
    if let Err(e) = queue.write().await.dequeue(&op.id).await {
        warn!(id = %op.id, "failed to dequeue completed operation: {}", e);
    }
    let mut cache = cache.write().await;
    for key in op.request.invalidates() {
        if let Err(e) = cache.remove(&key).await {
            warn!(key = %key, "failed to invalidate cache entry: {}", e);
        }
    }
}
