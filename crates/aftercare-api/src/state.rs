//! Application state shared across all route handlers.

use std::sync::Arc;
use std::time::Instant;

use aftercare_agent::SupportController;

/// Shared application state, cheap to clone per request.
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<SupportController>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(controller: Arc<SupportController>) -> Self {
        Self {
            controller,
            start_time: Instant::now(),
        }
    }
}
