//! Shared application context handed to HTTP handlers and background tasks.

use std::sync::Arc;

use altsmith_db::pool::DbPool;

use crate::config::Config;
use crate::providers::ProviderRouter;
use crate::ratelimit::RateLimiterSet;
use crate::scheduler::SchedulerHandle;

/// Everything a handler or background task needs, cheaply cloneable.
#[derive(Clone)]
pub struct AppContext {
    pub db: DbPool,
    pub config: Arc<Config>,
    pub router: Arc<ProviderRouter>,
    pub wp_limits: Arc<RateLimiterSet>,
    pub scheduler: SchedulerHandle,
}
