use std::sync::Arc;

use crate::actions::ActionContext;
use crate::pipeline::PipelineDriver;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// Single pipeline driver; at most one run at a time.
    pub pipeline: Arc<PipelineDriver>,
    pub actions: ActionContext,
}
