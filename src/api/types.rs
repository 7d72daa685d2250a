//! Shared types for the analysis API layer.

use std::sync::Arc;

use crate::monitor::ActivityLog;
use crate::pipeline::scheduler::BatchScheduler;

/// Shared context for all API routes.
#[derive(Clone)]
pub struct ApiContext {
    pub scheduler: Arc<BatchScheduler>,
    pub activity: Arc<ActivityLog>,
}

impl ApiContext {
    pub fn new(scheduler: Arc<BatchScheduler>) -> Self {
        let activity = scheduler.activity();
        Self {
            scheduler,
            activity,
        }
    }
}
