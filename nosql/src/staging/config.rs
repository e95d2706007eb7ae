use std::time::Duration;

use crate::options::Options;
use crate::pagination::DEFAULT_PAGE_SIZE;

/// Settings for [`StagingEngine`](super::StagingEngine).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingConfig {
    page_size: usize,
    lock_timeout: Duration,
    emulated_transactions: bool,
}

impl StagingConfig {
    pub fn new() -> Self {
        StagingConfig {
            page_size: DEFAULT_PAGE_SIZE,
            lock_timeout: Duration::from_secs(30),
            emulated_transactions: true,
        }
    }

    pub fn from_options(options: &Options) -> Self {
        StagingConfig {
            page_size: options.page_size(),
            lock_timeout: options.lock_timeout(),
            emulated_transactions: options.emulated_transactions(),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Age after which a pending transaction may be aborted by others.
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// With emulation off, `update` fails with `NotImplemented`.
    pub fn with_emulated_transactions(mut self, enabled: bool) -> Self {
        self.emulated_transactions = enabled;
        self
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    pub fn emulated_transactions(&self) -> bool {
        self.emulated_transactions
    }
}

impl Default for StagingConfig {
    fn default() -> Self {
        StagingConfig::new()
    }
}
