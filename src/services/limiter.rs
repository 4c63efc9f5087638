use std::sync::Arc;
use tokio::sync::{AcquireError, Semaphore, SemaphorePermit};
use tracing::debug;

/// Caps the number of remote requests in flight across all services.
pub struct RequestLimiter {
    semaphore: Arc<Semaphore>,
    max_requests: usize,
}

impl RequestLimiter {
    pub fn new(max_concurrent_requests: usize) -> Self {
        let max_requests = max_concurrent_requests.max(1);
        debug!("Initializing request limiter with {} slots", max_requests);

        Self {
            semaphore: Arc::new(Semaphore::new(max_requests)),
            max_requests,
        }
    }

    pub async fn acquire(&self) -> Result<SemaphorePermit<'_>, AcquireError> {
        debug!("Acquiring request permit. Available: {}", self.semaphore.available_permits());
        let permit = self.semaphore.acquire().await?;
        debug!("Request permit acquired. Remaining: {}", self.semaphore.available_permits());
        Ok(permit)
    }

    pub fn stats(&self) -> LimiterStats {
        LimiterStats {
            available: self.semaphore.available_permits(),
            total: self.max_requests,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimiterStats {
    pub available: usize,
    pub total: usize,
}

impl LimiterStats {
    pub fn active(&self) -> usize {
        self.total.saturating_sub(self.available)
    }
}
