use std::sync::Arc;

use postqueue_core::scheduler::PostCallbackFactory;
use postqueue_core::{FanOutHub, Scheduler};

/// Shared state for every handler
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub hub: Arc<FanOutHub>,
    pub post_factory: PostCallbackFactory,
}

impl AppState {
    pub fn new(
        scheduler: Arc<Scheduler>,
        hub: Arc<FanOutHub>,
        post_factory: PostCallbackFactory,
    ) -> Self {
        Self {
            scheduler,
            hub,
            post_factory,
        }
    }
}
