//! Pipeline: Discovery → Import → Scoring → Selection → Processing.
//!
//! Every stage runs its per-item work through [`crate::pool::BoundedPool`] and
//! shares one [`CancelFlag`] with the driver.

pub mod discovery;
pub mod driver;
pub mod handlers;
pub mod import;
pub mod processing;
pub mod progress;
pub mod scoring;
pub mod selection;
pub mod webhook;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::errors::AppError;

pub use driver::PipelineDriver;

/// Cooperative cancellation signal. Cloning shares the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if this call flipped the flag.
    pub fn cancel(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("All sources failed: {}", .0.join("; "))]
    AllSourcesFailed(Vec<String>),

    #[error("Pipeline is already running")]
    AlreadyRunning,

    #[error("Cancelled by user request")]
    Cancelled,

    #[error(transparent)]
    Store(#[from] AppError),
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::AlreadyRunning => AppError::Conflict(err.to_string()),
            PipelineError::Store(inner) => inner,
            other => AppError::Internal(anyhow::anyhow!(other.to_string())),
        }
    }
}
