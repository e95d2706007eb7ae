//! Benchmark configuration

use nosql::driver::BackendKind;

/// Backends benchmarked by default. The service backends need a running
/// server and are left out.
pub const EMBEDDED_BACKENDS: [BackendKind; 3] = [BackendKind::Memory, BackendKind::Fjall, BackendKind::Redb];

/// Configuration for benchmark runs
#[derive(Debug, Clone)]
pub struct BenchmarkConfig {
    /// Entry counts to benchmark
    pub entry_counts: Vec<usize>,
    /// Size of each generated value in bytes
    pub value_size: usize,
    /// Page size handed to the drivers, which drives the number of list pages
    pub page_size: usize,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            entry_counts: vec![100, 1_000, 10_000],
            value_size: 128,
            page_size: nosql::pagination::DEFAULT_PAGE_SIZE,
        }
    }
}

impl BenchmarkConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Quick config with smaller entry counts for fast runs
    pub fn quick() -> Self {
        Self {
            entry_counts: vec![100, 1_000],
            ..Default::default()
        }
    }

    /// Picks [`BenchmarkConfig::quick`] when `NOSQL_BENCH_QUICK` is set.
    pub fn from_env() -> Self {
        if std::env::var_os("NOSQL_BENCH_QUICK").is_some() {
            Self::quick()
        } else {
            Self::new()
        }
    }
}
