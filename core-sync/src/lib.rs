//! # Offline Sync Module
//!
//! Keeps mutations made without connectivity and replays them later.
//!
//! ## Components
//!
//! - **Sync Queue** (`queue`): persisted FIFO with write-through enqueue,
//!   non-reentrant drains and a bounded retry policy
//! - **Mutation seam** (`mutation`): `MutationApi`, implemented for
//!   `core_api::ResourceApi`

pub mod error;
pub mod mutation;
pub mod queue;

pub use error::{Result, SyncError};
pub use mutation::MutationApi;
pub use queue::{
    SyncItemId, SyncQueue, SyncQueueItem, SyncReport, SyncType, DEFAULT_MAX_RETRIES,
    LAST_SYNC_KEY, QUEUE_KEY,
};
