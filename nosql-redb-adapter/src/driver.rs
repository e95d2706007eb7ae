use async_trait::async_trait;
use nosql::driver::{BackendKind, Driver};
use nosql::entry::{display_bytes, validate_bucket, validate_key, Entry};
use nosql::errors::{NoSqlError, NoSqlResult};
use nosql::options::Options;
use nosql::pagination::{keyset_page, list_all_blocking, ContinuationToken, Page, PageReader};
use nosql::transaction::{CasOutcome, Transaction, TxOutcome, WriteSet};
use parking_lot::RwLock;
use redb::{
    AccessGuard, Database, ReadOnlyTable, ReadTransaction, ReadableDatabase, ReadableTable,
    StorageError, Table, TableDefinition, TableError, TableHandle, WriteTransaction,
};
use std::ops::Bound::{self, Excluded, Unbounded};
use std::sync::Arc;

use crate::config::RedbConfig;
use crate::error::to_nosql_error;
use crate::naming::{decode_table, encode_bucket};

type Bytes = &'static [u8];

const REDB_VERSION: &str = "3.1";

fn table_def(name: &str) -> TableDefinition<'_, Bytes, Bytes> {
    TableDefinition::new(name)
}

/// Driver over a single redb database file, one table per bucket.
///
/// Writes of any kind run in one redb write transaction. redb admits a single
/// writer at a time, which makes compare-and-swap and update serializable
/// without a driver-side lock. Closing drops the database handle and releases
/// the file.
#[derive(Clone)]
pub struct RedbDriver {
    inner: Arc<RedbDriverInner>,
}

impl RedbDriver {
    /// Opens (or creates) the database file at `path`.
    pub fn open(path: &str, options: &Options) -> NoSqlResult<RedbDriver> {
        RedbDriver::with_config(RedbConfig::from_options(path, options))
    }

    pub fn with_config(config: RedbConfig) -> NoSqlResult<RedbDriver> {
        if config.db_path().is_empty() {
            return Err(NoSqlError::configuration("redb driver needs a file path"));
        }

        let mut builder = Database::builder();
        if let Some(bytes) = config.cache_size() {
            builder.set_cache_size(bytes);
        }
        let db = builder.create(config.db_path()).map_err(|err| {
            log::error!("Failed to open redb database at {}: {}", config.db_path(), err);
            to_nosql_error(err)
        })?;

        // reachability check: a read transaction over the table catalog
        let tables = {
            let txn = db.begin_read().map_err(to_nosql_error)?;
            let count = txn.list_tables().map_err(to_nosql_error)?.count();
            count
        };
        log::debug!("Opened redb database at {} with {} table(s)", config.db_path(), tables);

        Ok(RedbDriver {
            inner: Arc::new(RedbDriverInner {
                db: RwLock::new(Some(db)),
                config,
            }),
        })
    }

    pub fn config(&self) -> RedbConfig {
        self.inner.config.clone()
    }

    /// Names of every bucket in the database.
    pub fn bucket_names(&self) -> NoSqlResult<Vec<Vec<u8>>> {
        self.inner.bucket_names()
    }
}

#[async_trait]
impl Driver for RedbDriver {
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
        BackendKind::Redb
    }

    fn backend_version(&self) -> String {
        format!("redb/{}", REDB_VERSION)
    }
}

struct RedbDriverInner {
    db: RwLock<Option<Database>>,
    config: RedbConfig,
}

fn table_exists(txn: &WriteTransaction, name: &str) -> NoSqlResult<bool> {
    let mut tables = txn.list_tables().map_err(to_nosql_error)?;
    Ok(tables.any(|handle| handle.name() == name))
}

/// Opens the table of an existing bucket inside a write transaction.
/// `open_table` would silently create a missing one.
fn open_existing<'txn>(txn: &'txn WriteTransaction, bucket: &[u8]) -> NoSqlResult<Table<'txn, Bytes, Bytes>> {
    let name = encode_bucket(bucket)?;
    if !table_exists(txn, &name)? {
        return Err(NoSqlError::bucket_not_found(bucket));
    }
    txn.open_table(table_def(&name))
        .map_err(|err| to_nosql_error(err).bucket_context("open", bucket))
}

fn open_read(txn: &ReadTransaction, bucket: &[u8]) -> NoSqlResult<ReadOnlyTable<Bytes, Bytes>> {
    let name = encode_bucket(bucket)?;
    match txn.open_table(table_def(&name)) {
        Ok(table) => Ok(table),
        Err(TableError::TableDoesNotExist(_)) => Err(NoSqlError::bucket_not_found(bucket)),
        Err(err) => {
            log::error!("Failed to open table {}: {}", name, err);
            Err(to_nosql_error(err).bucket_context("open", bucket))
        }
    }
}

fn read_value<T: ReadableTable<Bytes, Bytes>>(
    table: &T,
    bucket: &[u8],
    key: &[u8],
) -> NoSqlResult<Option<Vec<u8>>> {
    let value = table
        .get(key)
        .map_err(|err| {
            log::error!("Failed to read {}/{}: {}", display_bytes(bucket), display_bytes(key), err);
            to_nosql_error(err).context("get", bucket, key)
        })?
        .map(|guard| guard.value().to_vec());
    Ok(value)
}

impl RedbDriverInner {
    fn with_db<T>(&self, f: impl FnOnce(&Database) -> NoSqlResult<T>) -> NoSqlResult<T> {
        let guard = self.db.read();
        match guard.as_ref() {
            Some(db) => f(db),
            None => {
                log::error!("Redb driver is closed");
                Err(NoSqlError::closed())
            }
        }
    }

    fn read<T>(&self, f: impl FnOnce(&ReadTransaction) -> NoSqlResult<T>) -> NoSqlResult<T> {
        self.with_db(|db| {
            let txn = db.begin_read().map_err(|err| {
                log::error!("Failed to begin read transaction: {}", err);
                to_nosql_error(err)
            })?;
            f(&txn)
        })
    }

    /// Runs `f` in a write transaction, committing on success and aborting
    /// on error.
    fn write<T>(&self, f: impl FnOnce(&WriteTransaction) -> NoSqlResult<T>) -> NoSqlResult<T> {
        self.with_db(|db| {
            let txn = db.begin_write().map_err(|err| {
                log::error!("Failed to begin write transaction: {}", err);
                to_nosql_error(err)
            })?;
            match f(&txn) {
                Ok(value) => {
                    txn.commit().map_err(|err| {
                        log::error!("Failed to commit write transaction: {}", err);
                        to_nosql_error(err)
                    })?;
                    Ok(value)
                }
                Err(err) => {
                    if let Err(abort) = txn.abort() {
                        log::warn!("Failed to abort write transaction: {}", abort);
                    }
                    Err(err)
                }
            }
        })
    }

    fn bucket_names(&self) -> NoSqlResult<Vec<Vec<u8>>> {
        self.read(|txn| {
            let mut names = Vec::new();
            for handle in txn.list_tables().map_err(to_nosql_error)? {
                match decode_table(handle.name()) {
                    Ok(bucket) => names.push(bucket),
                    Err(err) => log::warn!("Skipping table {}: {}", handle.name(), err),
                }
            }
            Ok(names)
        })
    }

    fn close(&self) -> NoSqlResult<()> {
        if self.db.write().take().is_some() {
            log::debug!("Closed redb database at {}", self.config.db_path());
        }
        Ok(())
    }

    fn create_table(&self, bucket: &[u8]) -> NoSqlResult<()> {
        validate_bucket(bucket)?;
        let name = encode_bucket(bucket)?;
        self.write(|txn| {
            if table_exists(txn, &name)? {
                return Err(NoSqlError::bucket_exists(bucket));
            }
            txn.open_table(table_def(&name)).map_err(|err| {
                log::error!("Failed to create table {}: {}", name, err);
                to_nosql_error(err).bucket_context("create", bucket)
            })?;
            Ok(())
        })?;
        log::debug!("Created bucket {} as table {}", display_bytes(bucket), name);
        Ok(())
    }

    fn delete_table(&self, bucket: &[u8]) -> NoSqlResult<()> {
        validate_bucket(bucket)?;
        let name = encode_bucket(bucket)?;
        self.write(|txn| {
            let deleted = txn.delete_table(table_def(&name)).map_err(|err| {
                log::error!("Failed to delete table {}: {}", name, err);
                to_nosql_error(err).bucket_context("delete", bucket)
            })?;
            if deleted {
                Ok(())
            } else {
                Err(NoSqlError::bucket_not_found(bucket))
            }
        })?;
        log::debug!("Deleted bucket {}", display_bytes(bucket));
        Ok(())
    }

    fn get(&self, bucket: &[u8], key: &[u8]) -> NoSqlResult<Vec<u8>> {
        validate_key(bucket, key)?;
        self.read(|txn| {
            let table = open_read(txn, bucket)?;
            read_value(&table, bucket, key)?.ok_or_else(|| NoSqlError::not_found(bucket, key))
        })
    }

    fn set(&self, bucket: &[u8], key: &[u8], value: &[u8]) -> NoSqlResult<()> {
        validate_key(bucket, key)?;
        self.write(|txn| {
            let mut table = open_existing(txn, bucket)?;
            table.insert(key, value).map_err(|err| {
                log::error!("Failed to write {}/{}: {}", display_bytes(bucket), display_bytes(key), err);
                to_nosql_error(err).context("set", bucket, key)
            })?;
            Ok(())
        })
    }

    fn del(&self, bucket: &[u8], key: &[u8]) -> NoSqlResult<()> {
        validate_key(bucket, key)?;
        self.write(|txn| {
            let mut table = open_existing(txn, bucket)?;
            table.remove(key).map_err(|err| {
                log::error!("Failed to delete {}/{}: {}", display_bytes(bucket), display_bytes(key), err);
                to_nosql_error(err).context("del", bucket, key)
            })?;
            Ok(())
        })
    }

    fn list(&self, bucket: &[u8]) -> NoSqlResult<Vec<Entry>> {
        validate_bucket(bucket)?;
        self.read(|txn| {
            let table = open_read(txn, bucket)?;
            let mut reader = TableReader {
                bucket: bucket.to_vec(),
                table: &table,
                page_size: self.config.page_size(),
            };
            list_all_blocking(&mut reader)
        })
        .map_err(|err| err.bucket_context("list", bucket))
    }

    fn compare_and_swap(
        &self,
        bucket: &[u8],
        key: &[u8],
        old: Option<&[u8]>,
        new: &[u8],
    ) -> NoSqlResult<CasOutcome> {
        validate_key(bucket, key)?;
        self.write(|txn| {
            let mut table = open_existing(txn, bucket)?;
            let current = read_value(&table, bucket, key)?;
            let outcome = CasOutcome::evaluate(current.as_deref(), old);
            if outcome.swapped {
                table.insert(key, new).map_err(|err| {
                    log::error!("Failed to swap {}/{}: {}", display_bytes(bucket), display_bytes(key), err);
                    to_nosql_error(err).context("compare_and_swap", bucket, key)
                })?;
            }
            Ok(outcome)
        })
    }

    fn update(&self, tx: &Transaction) -> NoSqlResult<TxOutcome> {
        tx.validate()?;
        if tx.is_empty() {
            // still report a closed driver
            return self.with_db(|_| Ok(TxOutcome::default()));
        }

        self.write(|txn| {
            let (write_set, outcome) = WriteSet::evaluate(tx, |bucket, key| {
                let table = open_existing(txn, bucket)?;
                read_value(&table, bucket, key)
            })?;

            for change in write_set.changes() {
                let mut table = open_existing(txn, &change.bucket)?;
                let result = match &change.value {
                    Some(value) => table.insert(change.key.as_slice(), value.as_slice()).map(|_| ()),
                    None => table.remove(change.key.as_slice()).map(|_| ()),
                };
                result.map_err(|err| {
                    log::error!(
                        "Failed to stage {}/{}: {}",
                        display_bytes(&change.bucket),
                        display_bytes(&change.key),
                        err
                    );
                    to_nosql_error(err).context("update", &change.bucket, &change.key)
                })?;
            }
            Ok(outcome)
        })
    }
}

/// Keyset pages over a table inside one read transaction.
struct TableReader<'a> {
    bucket: Vec<u8>,
    table: &'a ReadOnlyTable<Bytes, Bytes>,
    page_size: usize,
}

fn owned_pair(
    item: Result<(AccessGuard<'_, Bytes>, AccessGuard<'_, Bytes>), StorageError>,
) -> NoSqlResult<(Vec<u8>, Vec<u8>)> {
    match item {
        Ok((key, value)) => Ok((key.value().to_vec(), value.value().to_vec())),
        Err(err) => {
            log::error!("Failed to read table range: {}", err);
            Err(to_nosql_error(err))
        }
    }
}

impl PageReader for TableReader<'_> {
    type Item = (Vec<u8>, Vec<u8>);

    fn read_page(&mut self, token: Option<ContinuationToken>) -> NoSqlResult<Page<Self::Item>> {
        match token {
            Some(token) => {
                let after: (Bound<&[u8]>, Bound<&[u8]>) = (Excluded(token.as_bytes()), Unbounded);
                let range = self.table.range::<&[u8]>(after).map_err(to_nosql_error)?;
                keyset_page(range.map(owned_pair), self.page_size)
            }
            None => {
                let range = self.table.iter().map_err(to_nosql_error)?;
                keyset_page(range.map(owned_pair), self.page_size)
            }
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
