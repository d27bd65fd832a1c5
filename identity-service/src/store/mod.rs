//! Shared, out-of-process state: refresh sessions and rate-limit counters.
//!
//! Each concern has a Redis implementation for deployments with several
//! replicas and a memory implementation for tests and single-process runs.

pub mod counter;
pub mod session;

use service_core::context::ContextError;
use thiserror::Error;

pub use counter::{CounterState, CounterStore, MemoryCounterStore, RedisCounterStore};
pub use session::{MemorySessionStore, RedisSessionStore, RotationOutcome, SessionStore};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(anyhow::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Context(#[from] ContextError),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Unavailable(anyhow::Error::new(err))
    }
}

fn lock_poisoned<T>(e: std::sync::PoisonError<T>) -> StoreError {
    StoreError::Unavailable(anyhow::anyhow!("store mutex poisoned: {}", e))
}
