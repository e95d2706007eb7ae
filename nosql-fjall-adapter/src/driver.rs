use async_trait::async_trait;
use dashmap::DashMap;
use fjall::{Keyspace, PartitionHandle, PersistMode, Snapshot};
use nosql::driver::{BackendKind, Driver};
use nosql::entry::{display_bytes, validate_bucket, validate_key, Entry};
use nosql::errors::{NoSqlError, NoSqlResult};
use nosql::options::Options;
use nosql::pagination::{keyset_page, list_all_blocking, ContinuationToken, Page, PageReader};
use nosql::transaction::{CasOutcome, Transaction, TxOutcome, WriteSet};
use parking_lot::RwLock;
use std::error::Error;
use std::ops::Bound::{self, Excluded, Unbounded};
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::FjallConfig;
use crate::error::to_nosql_error;
use crate::naming::{decode_partition, encode_bucket};
use crate::version::fjall_version;

/// Driver over a fjall keyspace, one partition per bucket.
///
/// Fjall is safe for concurrent use, but compare-and-swap and update are
/// read-modify-write sequences, so the driver serializes writers behind a
/// write gate. Plain reads share the gate and `list` reads from a partition
/// snapshot. Multi-key updates are published with one atomic batch across
/// every touched partition.
#[derive(Clone)]
pub struct FjallDriver {
    inner: Arc<FjallDriverInner>,
}

impl FjallDriver {
    /// Opens (or creates) the keyspace at `path`.
    ///
    /// Fails with `Unavailable` or `Backend` if the directory cannot be opened
    /// or recovered.
    pub fn open(path: &str, options: &Options) -> NoSqlResult<FjallDriver> {
        FjallDriver::with_config(FjallConfig::from_options(path, options))
    }

    pub fn with_config(config: FjallConfig) -> NoSqlResult<FjallDriver> {
        if config.db_path().is_empty() {
            return Err(NoSqlError::configuration("fjall driver needs a directory path"));
        }

        let keyspace = Keyspace::open(config.keyspace_config()).map_err(|err| {
            log::error!("Failed to open or create keyspace at {}: {}", config.db_path(), err);
            to_nosql_error(err)
        })?;

        // reachability check: the partition catalog must be readable
        let partitions = keyspace.list_partitions().len();
        log::debug!(
            "Opened fjall keyspace at {} with {} partition(s)",
            config.db_path(),
            partitions
        );

        Ok(FjallDriver {
            inner: Arc::new(FjallDriverInner {
                keyspace,
                partitions: DashMap::new(),
                gate: RwLock::new(()),
                closed: AtomicBool::new(false),
                config,
            }),
        })
    }

    pub fn config(&self) -> FjallConfig {
        self.inner.config.clone()
    }

    /// Names of every bucket in the keyspace.
    pub fn bucket_names(&self) -> NoSqlResult<Vec<Vec<u8>>> {
        self.inner.bucket_names()
    }

    /// Flushes the journal to disk.
    pub fn persist(&self) -> NoSqlResult<()> {
        self.inner.check_opened()?;
        self.inner.persist()
    }
}

#[async_trait]
impl Driver for FjallDriver {
    async fn close(&self) -> NoSqlResult<()> {
        self.inner.close()
    }

    async fn create_table(&self, bucket: &[u8]) -> NoSqlResult<()> {
        self.inner.create_table(bucket)
    }

    async fn delete_table(&self, bucket: &[u8]) -> NoSqlResult<()> {
        self.inner.delete_table(bucket)
    }

    async fn get(&self, bucket: &[u8], key: &[u8]) -> NoSqlResult<Vec<u8>> {
        self.inner.get(bucket, key)
    }

    async fn set(&self, bucket: &[u8], key: &[u8], value: &[u8]) -> NoSqlResult<()> {
        self.inner.set(bucket, key, value)
    }

    async fn del(&self, bucket: &[u8], key: &[u8]) -> NoSqlResult<()> {
        self.inner.del(bucket, key)
    }

    async fn list(&self, bucket: &[u8]) -> NoSqlResult<Vec<Entry>> {
        self.inner.list(bucket)
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
        self.inner.compare_and_swap(bucket, key, old, new)
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Fjall
    }

    fn backend_version(&self) -> String {
        match fjall_version() {
            Ok(version) => format!("Fjall/{}", version),
            Err(e) => {
                log::warn!("Failed to determine Fjall version: {}", e);
                "Fjall/unknown".to_string()
            }
        }
    }
}

struct FjallDriverInner {
    keyspace: Keyspace,
    partitions: DashMap<Vec<u8>, PartitionHandle>,
    gate: RwLock<()>,
    closed: AtomicBool,
    config: FjallConfig,
}

impl FjallDriverInner {
    fn check_opened(&self) -> NoSqlResult<()> {
        if self.closed.load(Ordering::Acquire) {
            log::error!("Fjall driver is closed");
            return Err(NoSqlError::closed());
        }
        Ok(())
    }

    /// Handle of an existing bucket's partition. Never creates one.
    fn partition(&self, bucket: &[u8]) -> NoSqlResult<PartitionHandle> {
        if let Some(handle) = self.partitions.get(bucket) {
            return Ok(handle.value().clone());
        }

        let name = encode_bucket(bucket)?;
        if !self.keyspace.partition_exists(&name) {
            return Err(NoSqlError::bucket_not_found(bucket));
        }
        let handle = self
            .keyspace
            .open_partition(&name, self.config.partition_config())
            .map_err(|err| {
                log::error!("Failed to open partition {}: {}", name, err);
                to_nosql_error(err).bucket_context("open", bucket)
            })?;
        self.partitions.insert(bucket.to_vec(), handle.clone());
        Ok(handle)
    }

    fn read(&self, partition: &PartitionHandle, bucket: &[u8], key: &[u8]) -> NoSqlResult<Option<Vec<u8>>> {
        partition
            .get(key)
            .map(|value| value.map(|slice| slice.to_vec()))
            .map_err(|err| {
                log::error!("Failed to read {}/{}: {}", display_bytes(bucket), display_bytes(key), err);
                to_nosql_error(err).context("get", bucket, key)
            })
    }

    fn bucket_names(&self) -> NoSqlResult<Vec<Vec<u8>>> {
        self.check_opened()?;
        let mut names = Vec::new();
        for name in self.keyspace.list_partitions() {
            match decode_partition(&name) {
                Ok(bucket) => names.push(bucket),
                Err(err) => log::warn!("Skipping partition {}: {}", &*name, err),
            }
        }
        Ok(names)
    }

    fn persist(&self) -> NoSqlResult<()> {
        self.keyspace.persist(PersistMode::SyncAll).map_err(|err| {
            log::error!("Failed to persist keyspace: {}", err);
            to_nosql_error(err)
        })
    }

    fn close(&self) -> NoSqlResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let _gate = self.gate.write();
        let result = self.persist();
        self.partitions.clear();
        log::debug!("Closed fjall keyspace at {}", self.config.db_path());
        result
    }

    fn create_table(&self, bucket: &[u8]) -> NoSqlResult<()> {
        self.check_opened()?;
        validate_bucket(bucket)?;
        let name = encode_bucket(bucket)?;
        let _gate = self.gate.write();
        if self.keyspace.partition_exists(&name) {
            return Err(NoSqlError::bucket_exists(bucket));
        }
        let handle = self
            .keyspace
            .open_partition(&name, self.config.partition_config())
            .map_err(|err| {
                log::error!("Failed to create partition {}: {}", name, err);
                to_nosql_error(err).bucket_context("create", bucket)
            })?;
        self.partitions.insert(bucket.to_vec(), handle);
        log::debug!("Created bucket {} as partition {}", display_bytes(bucket), name);
        Ok(())
    }

    fn delete_table(&self, bucket: &[u8]) -> NoSqlResult<()> {
        self.check_opened()?;
        validate_bucket(bucket)?;
        let _gate = self.gate.write();
        let handle = self.partition(bucket)?;
        // drop the cached handle before the partition goes away
        self.partitions.remove(bucket);
        self.keyspace.delete_partition(handle).map_err(|err| {
            log::error!("Failed to delete partition of {}: {}", display_bytes(bucket), err);
            to_nosql_error(err).bucket_context("delete", bucket)
        })?;
        log::debug!("Deleted bucket {}", display_bytes(bucket));
        Ok(())
    }

    fn get(&self, bucket: &[u8], key: &[u8]) -> NoSqlResult<Vec<u8>> {
        self.check_opened()?;
        validate_key(bucket, key)?;
        let _gate = self.gate.read();
        let partition = self.partition(bucket)?;
        self.read(&partition, bucket, key)?
            .ok_or_else(|| NoSqlError::not_found(bucket, key))
    }

    fn set(&self, bucket: &[u8], key: &[u8], value: &[u8]) -> NoSqlResult<()> {
        self.check_opened()?;
        validate_key(bucket, key)?;
        let _gate = self.gate.write();
        self.partition(bucket)?.insert(key, value).map_err(|err| {
            log::error!("Failed to write {}/{}: {}", display_bytes(bucket), display_bytes(key), err);
            to_nosql_error(err).context("set", bucket, key)
        })
    }

    fn del(&self, bucket: &[u8], key: &[u8]) -> NoSqlResult<()> {
        self.check_opened()?;
        validate_key(bucket, key)?;
        let _gate = self.gate.write();
        self.partition(bucket)?.remove(key).map_err(|err| {
            log::error!("Failed to delete {}/{}: {}", display_bytes(bucket), display_bytes(key), err);
            to_nosql_error(err).context("del", bucket, key)
        })
    }

    fn list(&self, bucket: &[u8]) -> NoSqlResult<Vec<Entry>> {
        self.check_opened()?;
        validate_bucket(bucket)?;
        let _gate = self.gate.read();
        let mut reader = SnapshotReader {
            bucket: bucket.to_vec(),
            snapshot: self.partition(bucket)?.snapshot(),
            page_size: self.config.page_size(),
        };
        list_all_blocking(&mut reader).map_err(|err| err.bucket_context("list", bucket))
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
        let partition = self.partition(bucket)?;
        let current = self.read(&partition, bucket, key)?;
        let outcome = CasOutcome::evaluate(current.as_deref(), old);
        if outcome.swapped {
            partition.insert(key, new).map_err(|err| {
                log::error!("Failed to swap {}/{}: {}", display_bytes(bucket), display_bytes(key), err);
                to_nosql_error(err).context("compare_and_swap", bucket, key)
            })?;
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
        let (write_set, outcome) = WriteSet::evaluate(tx, |bucket, key| {
            let partition = self.partition(bucket)?;
            self.read(&partition, bucket, key)
        })?;

        let changes = write_set.changes();
        if changes.is_empty() {
            return Ok(outcome);
        }

        let mut batch = self.keyspace.batch();
        for change in &changes {
            let partition = self.partition(&change.bucket)?;
            match &change.value {
                Some(value) => batch.insert(&partition, change.key.as_slice(), value.as_slice()),
                None => batch.remove(&partition, change.key.as_slice()),
            }
        }
        batch.commit().map_err(|err| {
            log::error!("Failed to commit batch of {} change(s): {}", changes.len(), err);
            to_nosql_error(err)
        })?;
        Ok(outcome)
    }
}

/// Keyset pages over a partition snapshot.
struct SnapshotReader {
    bucket: Vec<u8>,
    snapshot: Snapshot,
    page_size: usize,
}

fn owned_pair<K, V, E>(item: Result<(K, V), E>) -> NoSqlResult<(Vec<u8>, Vec<u8>)>
where
    K: Deref<Target = [u8]>,
    V: Deref<Target = [u8]>,
    E: Error + Send + Sync + 'static,
{
    match item {
        Ok((key, value)) => Ok((key.to_vec(), value.to_vec())),
        Err(err) => {
            log::error!("Failed to read partition snapshot: {}", err);
            Err(to_nosql_error(err))
        }
    }
}

impl PageReader for SnapshotReader {
    type Item = (Vec<u8>, Vec<u8>);

    fn read_page(&mut self, token: Option<ContinuationToken>) -> NoSqlResult<Page<Self::Item>> {
        match token {
            Some(token) => {
                let after: (Bound<Vec<u8>>, Bound<Vec<u8>>) = (Excluded(token.0), Unbounded);
                keyset_page(self.snapshot.range(after).map(owned_pair), self.page_size)
            }
            None => keyset_page(self.snapshot.iter().map(owned_pair), self.page_size),
        }
    }

    fn decode(&self, item: Self::Item) -> NoSqlResult<Option<Entry>> {
        let (key, value) = item;
        Ok(Some(Entry {
            bucket: self.bucket.clone(),
            key,
            value,
        }))
    }
}
