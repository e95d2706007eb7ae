use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::options::Options;
use crate::pagination::DEFAULT_PAGE_SIZE;

/// Configuration for the in-memory driver.
#[derive(Clone)]
pub struct MemoryConfig {
    inner: Arc<MemoryConfigInner>,
}

impl MemoryConfig {
    pub fn new() -> MemoryConfig {
        MemoryConfig {
            inner: Arc::new(MemoryConfigInner {
                page_size: AtomicUsize::new(DEFAULT_PAGE_SIZE),
            }),
        }
    }

    pub fn from_options(options: &Options) -> MemoryConfig {
        let config = MemoryConfig::new();
        config.set_page_size(options.page_size());
        config
    }

    pub fn page_size(&self) -> usize {
        self.inner.page_size.load(Ordering::Relaxed)
    }

    pub fn set_page_size(&self, page_size: usize) {
        self.inner.page_size.store(page_size.max(1), Ordering::Relaxed);
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        MemoryConfig::new()
    }
}

struct MemoryConfigInner {
    page_size: AtomicUsize,
}
