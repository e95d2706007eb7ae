use nosql::options::Options;
use nosql::pagination::DEFAULT_PAGE_SIZE;

/// Settings for [`RedbDriver`](crate::RedbDriver).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedbConfig {
    db_path: String,
    cache_size: Option<usize>,
    page_size: usize,
}

impl RedbConfig {
    pub fn new(db_path: &str) -> RedbConfig {
        RedbConfig {
            db_path: db_path.to_string(),
            cache_size: None,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Derives a configuration from driver options. `cache_size` and
    /// `page_size` are honoured.
    pub fn from_options(db_path: &str, options: &Options) -> RedbConfig {
        let mut config = RedbConfig::new(db_path).with_page_size(options.page_size());
        if let Some(bytes) = options.cache_size() {
            config = config.with_cache_size(usize::try_from(bytes).unwrap_or(usize::MAX));
        }
        config
    }

    /// Page cache in bytes; redb picks its own default when unset.
    pub fn with_cache_size(mut self, bytes: usize) -> Self {
        self.cache_size = Some(bytes);
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    pub fn cache_size(&self) -> Option<usize> {
        self.cache_size
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_options() {
        let options = Options::builder().page_size(3).cache_size(4_096).build();
        let config = RedbConfig::from_options("/tmp/kv.redb", &options);
        assert_eq!(config.db_path(), "/tmp/kv.redb");
        assert_eq!(config.page_size(), 3);
        assert_eq!(config.cache_size(), Some(4_096));

        let config = RedbConfig::from_options("/tmp/kv.redb", &Options::default());
        assert_eq!(config.cache_size(), None);
        assert_eq!(config.page_size(), DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn page_size_is_at_least_one() {
        assert_eq!(RedbConfig::new("x").with_page_size(0).page_size(), 1);
    }
}
