//! Store factory functions for benchmarks

use crate::config::BenchmarkConfig;
use nosql::driver::{BackendKind, Database, Driver};
use nosql::entry::Entry;
use nosql::options::Options;
use std::future::Future;
use tempfile::TempDir;
use tokio::runtime::Runtime;

/// Result type for store operations
pub type StoreResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Bucket every benchmark writes to.
pub const BENCH_BUCKET: &[u8] = b"bench";

/// A database with its bucket created, the runtime driving it and the
/// directory holding its files.
pub struct BenchContext {
    db: Database,
    runtime: Runtime,
    _dir: Option<TempDir>,
}

impl BenchContext {
    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Writes `entries` one `set` at a time.
    pub fn populate(&self, entries: &[Entry]) -> StoreResult<()> {
        self.block_on(async {
            for entry in entries {
                self.db.set(&entry.bucket, &entry.key, &entry.value).await?;
            }
            Ok(())
        })
    }
}

impl Drop for BenchContext {
    fn drop(&mut self) {
        let db = self.db.clone();
        if let Err(err) = self.runtime.block_on(async move { db.close().await }) {
            log::warn!("Failed to close bench database: {}", err);
        }
    }
}

/// Opens `kind` in a fresh temporary directory and creates [`BENCH_BUCKET`].
pub fn create_db(kind: BackendKind, config: &BenchmarkConfig) -> StoreResult<BenchContext> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get().min(8))
        .enable_all()
        .build()?;

    let dir = if kind.is_embedded() {
        Some(TempDir::new()?)
    } else {
        None
    };
    let locator = match (&dir, kind) {
        (Some(dir), BackendKind::Redb) => dir.path().join("bench.redb").to_string_lossy().into_owned(),
        (Some(dir), _) => dir.path().join("bench").to_string_lossy().into_owned(),
        (None, _) => String::new(),
    };

    let options = Options::builder().page_size(config.page_size).build();
    let db = runtime.block_on(async {
        let db = nosql_backends::open(kind, &locator, options).await?;
        db.create_table(BENCH_BUCKET).await?;
        Ok::<_, nosql::NoSqlError>(db)
    })?;

    Ok(BenchContext {
        db,
        runtime,
        _dir: dir,
    })
}

/// Like [`create_db`], then writes `entries`.
pub fn create_populated_db(
    kind: BackendKind,
    config: &BenchmarkConfig,
    entries: &[Entry],
) -> StoreResult<BenchContext> {
    let ctx = create_db(kind, config)?;
    ctx.populate(entries)?;
    Ok(ctx)
}
