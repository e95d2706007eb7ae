use fjall::{CompressionType, Config, PartitionCreateOptions};
use nosql::options::Options;
use nosql::pagination::DEFAULT_PAGE_SIZE;
use std::sync::atomic::{AtomicI8, AtomicU16, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

/// Fjall keyspace configuration.
///
/// A cloneable, thread-safe holder for fjall tuning parameters. Clones share the
/// same `Arc<FjallConfigInner>`, and every parameter is an atomic, so a config can
/// be read from any thread without locking.
///
/// Built from [`Options`] inside [`FjallDriver::open`](crate::FjallDriver::open):
/// `cache_size`, `fsync_ms` and `page_size` are honoured, everything else keeps
/// the defaults below.
#[derive(Clone)]
pub struct FjallConfig {
    inner: Arc<FjallConfigInner>,
}

impl FjallConfig {
    /// Creates a configuration with default values:
    /// - Cache: 96 MB shared block and blob cache
    /// - Write buffer: 128 MB
    /// - Max journaling size: 512 MB
    /// - Bloom filter: 10 bits per key
    /// - Compression: LZ4
    /// - Flush workers: available CPU cores
    /// - Compaction workers: half of the available CPU cores
    #[inline]
    pub fn new() -> FjallConfig {
        FjallConfig {
            inner: Arc::new(FjallConfigInner::new()),
        }
    }

    /// Derives a configuration from driver options.
    pub fn from_options(path: &str, options: &Options) -> FjallConfig {
        let config = FjallConfig::new();
        config.set_db_path(path);
        config.set_page_size(options.page_size());
        if let Some(cache_size) = options.cache_size() {
            config.set_cache_size(cache_size);
        }
        if let Some(fsync_ms) = options.fsync_ms() {
            config.set_fsync_ms(fsync_ms);
        }
        config
    }

    /// Translates this config into fjall's keyspace configuration.
    #[inline]
    pub(crate) fn keyspace_config(&self) -> Config {
        let mut config = Config::new(self.inner.db_path())
            .flush_workers(self.inner.flush_workers())
            .compaction_workers(self.inner.compaction_workers())
            .cache_size(self.inner.cache_size())
            .max_journaling_size(self.inner.max_journaling_size())
            .max_write_buffer_size(self.inner.max_write_buffer_size());

        if self.inner.fsync_ms() > 0 {
            config = config.fsync_ms(Some(self.inner.fsync_ms()));
        }
        config
    }

    /// Partition options used for every bucket.
    #[inline]
    pub(crate) fn partition_config(&self) -> PartitionCreateOptions {
        PartitionCreateOptions::default()
            .bloom_filter_bits(if self.inner.bloom_filter_bits() < 0 {
                None
            } else {
                Some(self.inner.bloom_filter_bits() as u8)
            })
            .compression(CompressionType::Lz4)
            .max_memtable_size(self.inner.max_memtable_size())
            .block_size(self.inner.block_size())
    }

    #[inline]
    pub fn db_path(&self) -> &str {
        self.inner.db_path()
    }

    /// Sets the keyspace directory. Only the first call has an effect.
    #[inline]
    pub fn set_db_path(&self, db_path: &str) {
        self.inner.db_path.get_or_init(|| db_path.to_string());
    }

    #[inline]
    pub fn cache_size(&self) -> u64 {
        self.inner.cache_size()
    }

    #[inline]
    pub fn set_cache_size(&self, bytes: u64) {
        self.inner.cache_size.store(bytes, Ordering::Relaxed)
    }

    /// Journal fsync interval in milliseconds; `0` leaves syncing to fjall.
    #[inline]
    pub fn fsync_ms(&self) -> u16 {
        self.inner.fsync_ms()
    }

    #[inline]
    pub fn set_fsync_ms(&self, millis: u16) {
        self.inner.fsync_ms.store(millis, Ordering::Relaxed)
    }

    #[inline]
    pub fn page_size(&self) -> usize {
        self.inner.page_size.load(Ordering::Relaxed)
    }

    /// Sets the list page size. Values below 1 are raised to 1.
    #[inline]
    pub fn set_page_size(&self, page_size: usize) {
        self.inner.page_size.store(page_size.max(1), Ordering::Relaxed)
    }

    #[inline]
    pub fn flush_workers(&self) -> usize {
        self.inner.flush_workers()
    }

    #[inline]
    pub fn set_flush_workers(&self, count: usize) {
        self.inner.flush_workers.store(count.max(1), Ordering::Relaxed)
    }

    #[inline]
    pub fn compaction_workers(&self) -> usize {
        self.inner.compaction_workers()
    }

    #[inline]
    pub fn set_compaction_workers(&self, count: usize) {
        self.inner.compaction_workers.store(count.max(1), Ordering::Relaxed)
    }

    #[inline]
    pub fn max_journaling_size(&self) -> u64 {
        self.inner.max_journaling_size()
    }

    #[inline]
    pub fn set_max_journaling_size(&self, bytes: u64) {
        self.inner.max_journaling_size.store(bytes, Ordering::Relaxed)
    }

    #[inline]
    pub fn max_write_buffer_size(&self) -> u64 {
        self.inner.max_write_buffer_size()
    }

    #[inline]
    pub fn set_max_write_buffer_size(&self, bytes: u64) {
        self.inner.max_write_buffer_size.store(bytes, Ordering::Relaxed)
    }

    /// Bloom filter bits per key; a negative value disables the filter.
    #[inline]
    pub fn bloom_filter_bits(&self) -> i8 {
        self.inner.bloom_filter_bits()
    }

    #[inline]
    pub fn set_bloom_filter_bits(&self, bits: i8) {
        self.inner.bloom_filter_bits.store(bits, Ordering::Relaxed)
    }

    #[inline]
    pub fn max_memtable_size(&self) -> u32 {
        self.inner.max_memtable_size()
    }

    #[inline]
    pub fn set_max_memtable_size(&self, bytes: u32) {
        self.inner.max_memtable_size.store(bytes, Ordering::Relaxed)
    }

    #[inline]
    pub fn block_size(&self) -> u32 {
        self.inner.block_size()
    }

    #[inline]
    pub fn set_block_size(&self, bytes: u32) {
        self.inner.block_size.store(bytes, Ordering::Relaxed)
    }
}

impl Default for FjallConfig {
    fn default() -> Self {
        FjallConfig::new()
    }
}

struct FjallConfigInner {
    db_path: OnceLock<String>,
    cache_size: AtomicU64,
    fsync_ms: AtomicU16,
    page_size: AtomicUsize,
    flush_workers: AtomicUsize,
    compaction_workers: AtomicUsize,
    max_journaling_size: AtomicU64,
    max_write_buffer_size: AtomicU64,
    bloom_filter_bits: AtomicI8,
    max_memtable_size: AtomicU32,
    block_size: AtomicU32,
}

impl FjallConfigInner {
    /// Block cache plus blob cache, 64 MB + 32 MB.
    const DEFAULT_CACHE_MB: u64 = 96;
    const DEFAULT_WRITE_BUFFER_MB: u64 = 128;
    const DEFAULT_MAX_JOURNALING_MB: u64 = 512;
    const DEFAULT_MEMTABLE_MB: u32 = 32;

    fn new() -> FjallConfigInner {
        let cpus = std::thread::available_parallelism()
            .map(usize::from)
            .unwrap_or(4);

        FjallConfigInner {
            db_path: OnceLock::new(),
            cache_size: AtomicU64::new(Self::DEFAULT_CACHE_MB * 1_024 * 1_024),
            fsync_ms: AtomicU16::new(0),
            page_size: AtomicUsize::new(DEFAULT_PAGE_SIZE),
            flush_workers: AtomicUsize::new(cpus.max(1)),
            // leave room for flushes and foreground work
            compaction_workers: AtomicUsize::new((cpus / 2).max(1)),
            max_journaling_size: AtomicU64::new(Self::DEFAULT_MAX_JOURNALING_MB * 1_024 * 1_024),
            max_write_buffer_size: AtomicU64::new(Self::DEFAULT_WRITE_BUFFER_MB * 1_024 * 1_024),
            bloom_filter_bits: AtomicI8::new(10),
            max_memtable_size: AtomicU32::new(Self::DEFAULT_MEMTABLE_MB * 1_024 * 1_024),
            block_size: AtomicU32::new(4 * 1_024),
        }
    }

    #[inline]
    fn db_path(&self) -> &str {
        self.db_path.get().map(String::as_str).unwrap_or("")
    }

    #[inline]
    fn cache_size(&self) -> u64 {
        self.cache_size.load(Ordering::Relaxed)
    }

    #[inline]
    fn fsync_ms(&self) -> u16 {
        self.fsync_ms.load(Ordering::Relaxed)
    }

    #[inline]
    fn flush_workers(&self) -> usize {
        self.flush_workers.load(Ordering::Relaxed)
    }

    #[inline]
    fn compaction_workers(&self) -> usize {
        self.compaction_workers.load(Ordering::Relaxed)
    }

    #[inline]
    fn max_journaling_size(&self) -> u64 {
        self.max_journaling_size.load(Ordering::Relaxed)
    }

    #[inline]
    fn max_write_buffer_size(&self) -> u64 {
        self.max_write_buffer_size.load(Ordering::Relaxed)
    }

    #[inline]
    fn bloom_filter_bits(&self) -> i8 {
        self.bloom_filter_bits.load(Ordering::Relaxed)
    }

    #[inline]
    fn max_memtable_size(&self) -> u32 {
        self.max_memtable_size.load(Ordering::Relaxed)
    }

    #[inline]
    fn block_size(&self) -> u32 {
        self.block_size.load(Ordering::Relaxed)
    }
}
