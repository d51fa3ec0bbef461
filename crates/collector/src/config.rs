use std::time::Duration;

/// Tunables for the collection tasks and the broadcast hub
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Wait between polls when the server does not send an interval
    pub poll_fallback_interval: Duration,
    /// Retries after the first attempt of a seeding or paging step
    pub archive_max_retries: u32,
    pub archive_retry_delay: Duration,
    /// Per-subscriber buffer; batches beyond it are dropped for that subscriber
    pub subscriber_buffer: usize,
    /// Rows served per page by the cached read operations
    pub cached_page_size: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            poll_fallback_interval: Duration::from_secs(5),
            archive_max_retries: 3,
            archive_retry_delay: Duration::from_secs(5),
            subscriber_buffer: 64,
            cached_page_size: 500,
        }
    }
}
