use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::bucket::MemoryBucket;
use super::config::MemoryConfig;
use crate::driver::{BackendKind, Driver};
use crate::entry::{display_bytes, validate_bucket, validate_key, Entry};
use crate::errors::{NoSqlError, NoSqlResult};
use crate::options::Options;
use crate::pagination::list_all_blocking;
use crate::transaction::{CasOutcome, Transaction, TxOutcome, WriteSet};

/// In-process reference driver.
///
/// Buckets live in a concurrent registry of skip lists. A write gate keeps
/// read-modify-write paths (compare-and-swap, update) and listing consistent:
/// readers share it, writers take it exclusively. Nothing is persisted, so all
/// data is dropped on close.
///
/// # Examples
///
/// ```rust
/// use nosql::driver::Driver;
/// use nosql::memory::MemoryDriver;
///
/// # futures::executor::block_on(async {
/// let driver = MemoryDriver::new();
/// driver.create_table(b"users").await.unwrap();
/// let outcome = driver.compare_and_swap(b"users", b"alice", None, b"v1").await.unwrap();
/// assert!(outcome.swapped);
/// # });
/// ```
#[derive(Clone)]
pub struct MemoryDriver {
    inner: Arc<MemoryDriverInner>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        MemoryDriver::with_config(MemoryConfig::new())
    }

    pub fn with_config(config: MemoryConfig) -> Self {
        MemoryDriver {
            inner: Arc::new(MemoryDriverInner::new(config)),
        }
    }

    /// Opens a memory driver. There is nothing to reach, so this cannot fail
    /// beyond option validation done by [`Options`] itself.
    pub fn open(options: &Options) -> NoSqlResult<Self> {
        let driver = MemoryDriver::with_config(MemoryConfig::from_options(options));
        log::debug!("Opened in-memory driver (page size {})", driver.inner.config.page_size());
        Ok(driver)
    }

    pub fn config(&self) -> MemoryConfig {
        self.inner.config.clone()
    }

    pub fn bucket_names(&self) -> NoSqlResult<Vec<Vec<u8>>> {
        self.inner.bucket_names()
    }
}

impl Default for MemoryDriver {
    fn default() -> Self {
        MemoryDriver::new()
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    async fn close(&self) -> NoSqlResult<()> {
        self.inner.close()
    }

    async fn create_table(&self, bucket: &[u8]) -> NoSqlResult<()> {
        self.inner
            .create_table(bucket)
            .map_err(|err| err.bucket_context("create", bucket))
    }

    async fn delete_table(&self, bucket: &[u8]) -> NoSqlResult<()> {
        self.inner
            .delete_table(bucket)
            .map_err(|err| err.bucket_context("delete", bucket))
    }

    async fn get(&self, bucket: &[u8], key: &[u8]) -> NoSqlResult<Vec<u8>> {
        self.inner
            .get(bucket, key)
            .map_err(|err| err.context("get", bucket, key))
    }

    async fn set(&self, bucket: &[u8], key: &[u8], value: &[u8]) -> NoSqlResult<()> {
        self.inner
            .set(bucket, key, value)
            .map_err(|err| err.context("set", bucket, key))
    }

    async fn del(&self, bucket: &[u8], key: &[u8]) -> NoSqlResult<()> {
        self.inner
            .del(bucket, key)
            .map_err(|err| err.context("del", bucket, key))
    }

    async fn list(&self, bucket: &[u8]) -> NoSqlResult<Vec<Entry>> {
        self.inner
            .list(bucket)
            .map_err(|err| err.bucket_context("list", bucket))
    }

    async fn update(&self, tx: Transaction) -> NoSqlResult<TxOutcome> {
        self.inner.update(&tx)
    }

    async fn compare_and_swap(
        &self,
        bucket: &[u8],
        key: &[u8],
        old: Option<&[u8]>,
        new: &[u8],
    ) -> NoSqlResult<CasOutcome> {
        self.inner
            .compare_and_swap(bucket, key, old, new)
            .map_err(|err| err.context("compare_and_swap", bucket, key))
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn backend_version(&self) -> String {
        format!("memory {}", env!("CARGO_PKG_VERSION"))
    }
}

struct MemoryDriverInner {
    buckets: DashMap<Vec<u8>, MemoryBucket>,
    gate: RwLock<()>,
    closed: AtomicBool,
    config: MemoryConfig,
}

impl MemoryDriverInner {
    fn new(config: MemoryConfig) -> Self {
        MemoryDriverInner {
            buckets: DashMap::new(),
            gate: RwLock::new(()),
            closed: AtomicBool::new(false),
            config,
        }
    }

    fn check_opened(&self) -> NoSqlResult<()> {
        if self.closed.load(Ordering::Acquire) {
            log::error!("In-memory driver is closed");
            return Err(NoSqlError::closed());
        }
        Ok(())
    }

    fn bucket(&self, bucket: &[u8]) -> NoSqlResult<MemoryBucket> {
        self.buckets
            .get(bucket)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| NoSqlError::bucket_not_found(bucket))
    }

    fn bucket_names(&self) -> NoSqlResult<Vec<Vec<u8>>> {
        self.check_opened()?;
        Ok(self.buckets.iter().map(|entry| entry.key().clone()).collect())
    }

    fn close(&self) -> NoSqlResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let _gate = self.gate.write();
        for entry in self.buckets.iter() {
            entry.value().clear();
        }
        self.buckets.clear();
        log::debug!("Closed in-memory driver");
        Ok(())
    }

    fn create_table(&self, bucket: &[u8]) -> NoSqlResult<()> {
        self.check_opened()?;
        validate_bucket(bucket)?;
        let _gate = self.gate.write();
        match self.buckets.entry(bucket.to_vec()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(NoSqlError::bucket_exists(bucket)),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(MemoryBucket::new());
                log::debug!("Created bucket {}", display_bytes(bucket));
                Ok(())
            }
        }
    }

    fn delete_table(&self, bucket: &[u8]) -> NoSqlResult<()> {
        self.check_opened()?;
        validate_bucket(bucket)?;
        let _gate = self.gate.write();
        match self.buckets.remove(bucket) {
            Some((_, removed)) => {
                removed.clear();
                log::debug!("Deleted bucket {}", display_bytes(bucket));
                Ok(())
            }
            None => Err(NoSqlError::bucket_not_found(bucket)),
        }
    }

    fn get(&self, bucket: &[u8], key: &[u8]) -> NoSqlResult<Vec<u8>> {
        self.check_opened()?;
        validate_key(bucket, key)?;
        let _gate = self.gate.read();
        self.bucket(bucket)?
            .get(key)
            .ok_or_else(|| NoSqlError::not_found(bucket, key))
    }

    fn set(&self, bucket: &[u8], key: &[u8], value: &[u8]) -> NoSqlResult<()> {
        self.check_opened()?;
        validate_key(bucket, key)?;
        let _gate = self.gate.write();
        self.bucket(bucket)?.put(key, value);
        Ok(())
    }

    fn del(&self, bucket: &[u8], key: &[u8]) -> NoSqlResult<()> {
        self.check_opened()?;
        validate_key(bucket, key)?;
        let _gate = self.gate.write();
        self.bucket(bucket)?.remove(key);
        Ok(())
    }

    fn list(&self, bucket: &[u8]) -> NoSqlResult<Vec<Entry>> {
        self.check_opened()?;
        validate_bucket(bucket)?;
        let _gate = self.gate.read();
        let data = self.bucket(bucket)?;
        let mut reader = data.reader(bucket, self.config.page_size());
        list_all_blocking(&mut reader)
    }

    fn compare_and_swap(
        &self,
        bucket: &[u8],
        key: &[u8],
        old: Option<&[u8]>,
        new: &[u8],
    ) -> NoSqlResult<CasOutcome> {
        self.check_opened()?;
        validate_key(bucket, key)?;
        let _gate = self.gate.write();
        let data = self.bucket(bucket)?;
        let current = data.get(key);
        let outcome = CasOutcome::evaluate(current.as_deref(), old);
        if outcome.swapped {
            data.put(key, new);
        }
        Ok(outcome)
    }

    fn update(&self, tx: &Transaction) -> NoSqlResult<TxOutcome> {
        self.check_opened()?;
        tx.validate()?;
        if tx.is_empty() {
            return Ok(TxOutcome::default());
        }

        let _gate = self.gate.write();
        let (write_set, outcome) =
            WriteSet::evaluate(tx, |bucket, key| Ok(self.bucket(bucket)?.get(key)))?;

        // every touched bucket was resolved during evaluation, so publishing cannot fail
        for change in write_set.changes() {
            let data = self.bucket(&change.bucket)?;
            match &change.value {
                Some(value) => data.put(&change.key, value),
                None => data.remove(&change.key),
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::transaction::OpResult;

    #[ctor::ctor]
    fn init() {
        colog::init();
    }

    async fn driver_with_bucket() -> MemoryDriver {
        let driver = MemoryDriver::new();
        driver.create_table(b"users").await.unwrap();
        driver
    }

    #[tokio::test]
    async fn round_trip_and_delete() {
        let driver = driver_with_bucket().await;
        driver.set(b"users", b"alice", b"v1").await.unwrap();
        assert_eq!(driver.get(b"users", b"alice").await.unwrap(), b"v1");
        driver.del(b"users", b"alice").await.unwrap();
        driver.del(b"users", b"alice").await.unwrap();
        assert!(driver.get(b"users", b"alice").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn table_lifecycle() {
        let driver = MemoryDriver::new();
        driver.create_table(b"users").await.unwrap();
        assert!(driver.create_table(b"users").await.unwrap_err().is_already_exists());
        driver.set(b"users", b"alice", b"v1").await.unwrap();
        driver.delete_table(b"users").await.unwrap();
        assert!(driver.delete_table(b"users").await.unwrap_err().is_not_found());
        assert!(driver.get(b"users", b"alice").await.unwrap_err().is_not_found());
        assert!(driver.set(b"users", b"alice", b"v1").await.unwrap_err().is_not_found());

        driver.create_table(b"users").await.unwrap();
        assert!(driver.list(b"users").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_names_are_invalid() {
        let driver = driver_with_bucket().await;
        assert_eq!(driver.create_table(b"").await.unwrap_err().kind(), &ErrorKind::Invalid);
        assert_eq!(driver.get(b"users", b"").await.unwrap_err().kind(), &ErrorKind::Invalid);
    }

    #[tokio::test]
    async fn compare_and_swap_semantics() {
        let driver = driver_with_bucket().await;
        let created = driver.compare_and_swap(b"users", b"alice", None, b"v1").await.unwrap();
        assert!(created.swapped);
        assert_eq!(created.current, None);

        let again = driver.compare_and_swap(b"users", b"alice", None, b"v9").await.unwrap();
        assert!(!again.swapped);
        assert_eq!(again.current, Some(b"v1".to_vec()));

        let swapped = driver
            .compare_and_swap(b"users", b"alice", Some(b"v1"), b"v2")
            .await
            .unwrap();
        assert!(swapped.swapped);
        assert_eq!(swapped.current, Some(b"v1".to_vec()));
        assert_eq!(driver.get(b"users", b"alice").await.unwrap(), b"v2");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_cas_has_one_winner() {
        let driver = driver_with_bucket().await;
        driver.set(b"users", b"counter", b"0").await.unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let driver = driver.clone();
            handles.push(tokio::spawn(async move {
                let new = format!("winner-{}", i).into_bytes();
                driver
                    .compare_and_swap(b"users", b"counter", Some(b"0"), &new)
                    .await
                    .unwrap()
            }));
        }

        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap());
        }
        let winners = outcomes.iter().filter(|o| o.swapped).count();
        assert_eq!(winners, 1);
        let stored = driver.get(b"users", b"counter").await.unwrap();
        for outcome in outcomes.iter().filter(|o| !o.swapped) {
            assert_eq!(outcome.current.as_deref(), Some(stored.as_slice()));
        }
    }

    #[tokio::test]
    async fn update_is_atomic() {
        let driver = driver_with_bucket().await;
        driver.set(b"users", b"a", b"1").await.unwrap();
        driver.set(b"users", b"b", b"2").await.unwrap();

        let tx = Transaction::new()
            .set("users", "a", "changed")
            .delete("users", "b")
            .set("missing", "c", "3");
        assert!(driver.update(tx).await.unwrap_err().is_not_found());
        assert_eq!(driver.get(b"users", b"a").await.unwrap(), b"1");
        assert_eq!(driver.get(b"users", b"b").await.unwrap(), b"2");

        let tx = Transaction::new()
            .set("users", "a", "changed")
            .delete("users", "b")
            .get("users", "a")
            .compare_and_swap("users", "c", Some(b"x".to_vec()), "y");
        let outcome = driver.update(tx).await.unwrap();
        assert_eq!(outcome.results[0], OpResult::Written);
        assert_eq!(outcome.results[1], OpResult::Deleted);
        assert_eq!(outcome.results[2], OpResult::Read(b"changed".to_vec()));
        assert!(!outcome.results[3].cas().unwrap().swapped);
        assert_eq!(driver.get(b"users", b"a").await.unwrap(), b"changed");
        assert!(driver.get(b"users", b"b").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn empty_update_is_noop() {
        let driver = driver_with_bucket().await;
        let outcome = driver.update(Transaction::new()).await.unwrap();
        assert!(outcome.is_empty());
    }

    #[tokio::test]
    async fn list_spans_pages() {
        let config = MemoryConfig::new();
        config.set_page_size(4);
        let driver = MemoryDriver::with_config(config);
        driver.create_table(b"users").await.unwrap();
        for i in 0..37 {
            driver
                .set(b"users", format!("user-{:03}", i).as_bytes(), b"x")
                .await
                .unwrap();
        }
        let entries = driver.list(b"users").await.unwrap();
        assert_eq!(entries.len(), 37);
        assert!(entries.iter().all(|e| e.bucket == b"users"));
        assert!(driver.list(b"missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn errors_name_the_operation_and_key() {
        let driver = driver_with_bucket().await;
        let err = driver.get(b"users", b"alice").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.message(), "failed to get users/alice");
        assert!(err.cause().is_some());

        let err = driver.set(b"missing", b"k", b"v").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.message(), "failed to set missing/k");

        let err = driver.list(b"missing").await.unwrap_err();
        assert_eq!(err.message(), "failed to list missing");
    }

    #[tokio::test]
    async fn operations_after_close_fail() {
        let driver = driver_with_bucket().await;
        driver.close().await.unwrap();
        driver.close().await.unwrap();
        assert_eq!(driver.get(b"users", b"a").await.unwrap_err().kind(), &ErrorKind::Closed);
        assert_eq!(driver.bucket_names().unwrap_err().kind(), &ErrorKind::Closed);
    }
}
