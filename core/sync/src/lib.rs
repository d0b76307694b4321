//! Offline mutation handling for the event registration client.
//!
//! Mutations that fail for lack of connectivity are parked in a durable
//! FIFO queue, answered with a synthesized optimistic result, and replayed
//! by the coordinator once the backend is reachable again.

pub mod coordinator;
pub mod optimistic;
pub mod queue;

pub use coordinator::{SyncConfig, SyncCoordinator, SyncFailure, SyncReport};
pub use optimistic::synthesize_result;
pub use queue::{
    MutationKind, MutationRequest, OperationQueue, PendingOperation, DEFAULT_MAX_RETRIES,
};
