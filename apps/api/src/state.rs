use std::sync::Arc;

use crate::config::Config;
use crate::interview::service::InterviewService;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// Interview core: engine, checkpoint store, context provider and feedback.
    pub service: Arc<InterviewService>,
    pub config: Config,
}
