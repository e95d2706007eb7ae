use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::config::StagingConfig;
use super::item::{ItemLock, ItemStore, PendingWrite, Precondition, StoredItem};
use super::record::{check_user_key, is_record_key, record_key, TxRecord, TxState};
use crate::driver::{BackendKind, Driver};
use crate::entry::{display_bytes, validate_bucket, validate_key, Entry};
use crate::errors::{ErrorKind, NoSqlError, NoSqlResult};
use crate::pagination::{list_all, ContinuationToken, Page, PageSource};
use crate::transaction::{CasOutcome, Transaction, TxOutcome, WriteSet};

/// Bound on optimistic retries when a conditional write loses a race.
const MAX_ATTEMPTS: usize = 16;

/// What [`StagingEngine::recover`] did with the records it found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub rolled_forward: usize,
    pub rolled_back: usize,
    /// Pending records younger than the lock timeout, left alone.
    pub in_flight: usize,
}

/// Multi-key atomic updates over a store that only offers single-item
/// conditional writes.
///
/// An update writes a pending transaction record, locks every touched key,
/// stages the final writes on the locks and then flips the record to
/// committed. That flip is the commit point: readers that meet a lock consult
/// the record and see the staged value only once it is committed. Writers
/// that meet a foreign lock roll it forward or back according to the record,
/// abort it once it has outlived the lock timeout, or fail with `Unavailable`.
///
/// # Examples
///
/// ```rust
/// use nosql::driver::Driver;
/// use nosql::staging::{MemoryItemStore, StagingConfig, StagingEngine};
/// use nosql::transaction::Transaction;
///
/// # futures::executor::block_on(async {
/// let engine = StagingEngine::new(MemoryItemStore::new(), StagingConfig::new());
/// engine.create_table(b"users").await.unwrap();
/// let tx = Transaction::new().set("users", "alice", "v1").set("users", "bob", "v1");
/// engine.update(tx).await.unwrap();
/// assert_eq!(engine.list(b"users").await.unwrap().len(), 2);
/// # });
/// ```
pub struct StagingEngine<S: ItemStore> {
    inner: Arc<StagingInner<S>>,
}

impl<S: ItemStore> Clone for StagingEngine<S> {
    fn clone(&self) -> Self {
        StagingEngine {
            inner: self.inner.clone(),
        }
    }
}

impl<S: ItemStore> StagingEngine<S> {
    pub fn new(store: S, config: StagingConfig) -> Self {
        StagingEngine {
            inner: Arc::new(StagingInner { store, config }),
        }
    }

    pub fn item_store(&self) -> &S {
        &self.inner.store
    }

    pub fn config(&self) -> &StagingConfig {
        &self.inner.config
    }

    /// Finishes or reclaims abandoned transactions whose record lives in
    /// `bucket`: committed ones are rolled forward, aborted ones and pending
    /// ones older than the lock timeout are rolled back.
    pub async fn recover(&self, bucket: &[u8]) -> NoSqlResult<RecoveryReport> {
        validate_bucket(bucket)?;
        self.inner
            .recover(bucket)
            .await
            .map_err(|err| err.bucket_context("recover", bucket))
    }
}

struct StagingInner<S> {
    store: S,
    config: StagingConfig,
}

/// Bookkeeping of an update in flight.
struct StagedTx {
    id: String,
    record_bucket: Vec<u8>,
    record: TxRecord,
    pending_bytes: Vec<u8>,
    /// Keys locked so far with their committed values.
    locked: Vec<(Vec<u8>, Vec<u8>, Option<Vec<u8>>)>,
}

impl StagedTx {
    fn lock(&self, pending: PendingWrite) -> ItemLock {
        ItemLock {
            tx_id: self.id.clone(),
            record_bucket: self.record_bucket.clone(),
            pending,
        }
    }
}

fn record_item(record: &TxRecord) -> NoSqlResult<StoredItem> {
    Ok(StoredItem {
        key: record.key(),
        value: Some(record.encode()?),
        lock: None,
    })
}

fn conflict(message: &str) -> NoSqlError {
    NoSqlError::new(message, ErrorKind::Conflict)
}

impl<S: ItemStore> StagingInner<S> {
    async fn load_record(
        &self,
        record_bucket: &[u8],
        tx_id: &str,
    ) -> NoSqlResult<Option<(TxRecord, Vec<u8>)>> {
        match self.store.load(record_bucket, &record_key(tx_id)).await {
            Ok(Some(StoredItem {
                value: Some(bytes), ..
            })) => Ok(Some((TxRecord::decode(&bytes)?, bytes))),
            Ok(_) => Ok(None),
            // the record bucket is gone, and the record with it
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn record_state(&self, lock: &ItemLock) -> NoSqlResult<Option<TxState>> {
        Ok(self
            .load_record(&lock.record_bucket, &lock.tx_id)
            .await?
            .map(|(record, _)| record.state))
    }

    /// Value a reader sees for a physical item.
    async fn visible_value(&self, item: StoredItem) -> NoSqlResult<Option<Vec<u8>>> {
        match &item.lock {
            None => Ok(item.value),
            Some(lock) => match self.record_state(lock).await? {
                Some(TxState::Committed) => Ok(lock.pending.resolve(item.value.as_deref())),
                _ => Ok(item.value),
            },
        }
    }

    /// Applies the staged write of a committed transaction and drops its lock.
    async fn roll_forward(&self, bucket: &[u8], item: &StoredItem, lock: &ItemLock) -> NoSqlResult<bool> {
        let precondition = Precondition::LockedBy(lock.tx_id.clone());
        match lock.pending.resolve(item.value.as_deref()) {
            Some(value) => {
                self.store
                    .store(bucket, StoredItem::plain(&item.key, &value), precondition)
                    .await
            }
            None => self.store.remove(bucket, &item.key, precondition).await,
        }
    }

    /// Restores the committed value and drops the lock of `tx_id`.
    async fn roll_back(
        &self,
        bucket: &[u8],
        key: &[u8],
        committed: Option<&[u8]>,
        tx_id: &str,
    ) -> NoSqlResult<bool> {
        let precondition = Precondition::LockedBy(tx_id.to_string());
        match committed {
            Some(value) => {
                self.store
                    .store(bucket, StoredItem::plain(key, value), precondition)
                    .await
            }
            None => self.store.remove(bucket, key, precondition).await,
        }
    }

    /// Clears a foreign lock so the caller can retry its write.
    async fn resolve_lock(&self, bucket: &[u8], item: StoredItem) -> NoSqlResult<()> {
        let lock = match &item.lock {
            Some(lock) => lock.clone(),
            None => return Ok(()),
        };

        match self.load_record(&lock.record_bucket, &lock.tx_id).await? {
            Some((record, _)) if record.state == TxState::Committed => {
                log::warn!(
                    "Rolling forward {}/{} for committed transaction {}",
                    display_bytes(bucket),
                    display_bytes(&item.key),
                    lock.tx_id
                );
                self.roll_forward(bucket, &item, &lock).await?;
            }
            Some((record, bytes)) if record.state == TxState::Pending => {
                if !record.is_expired(self.config.lock_timeout()) {
                    return Err(NoSqlError::new(
                        &format!(
                            "{}/{} is locked by transaction {}",
                            display_bytes(bucket),
                            display_bytes(&item.key),
                            lock.tx_id
                        ),
                        ErrorKind::Unavailable,
                    ));
                }
                log::warn!(
                    "Aborting transaction {} that outlived the lock timeout",
                    lock.tx_id
                );
                let aborted = record.transition(TxState::Aborted)?;
                let flipped = self
                    .store
                    .store(
                        &lock.record_bucket,
                        record_item(&aborted)?,
                        Precondition::ValueEquals(bytes),
                    )
                    .await?;
                if flipped {
                    self.roll_back(bucket, &item.key, item.value.as_deref(), &lock.tx_id)
                        .await?;
                }
            }
            _ => {
                log::warn!(
                    "Rolling back {}/{} for aborted transaction {}",
                    display_bytes(bucket),
                    display_bytes(&item.key),
                    lock.tx_id
                );
                self.roll_back(bucket, &item.key, item.value.as_deref(), &lock.tx_id)
                    .await?;
            }
        }
        Ok(())
    }

    async fn resolve_if_locked(&self, bucket: &[u8], key: &[u8]) -> NoSqlResult<()> {
        match self.store.load(bucket, key).await? {
            Some(item) if item.is_locked() => self.resolve_lock(bucket, item).await,
            _ => Ok(()),
        }
    }

    async fn get(&self, bucket: &[u8], key: &[u8]) -> NoSqlResult<Vec<u8>> {
        let item = self
            .store
            .load(bucket, key)
            .await?
            .ok_or_else(|| NoSqlError::not_found(bucket, key))?;
        self.visible_value(item)
            .await?
            .ok_or_else(|| NoSqlError::not_found(bucket, key))
    }

    async fn set(&self, bucket: &[u8], key: &[u8], value: &[u8]) -> NoSqlResult<()> {
        for _ in 0..MAX_ATTEMPTS {
            let item = StoredItem::plain(key, value);
            if self.store.store(bucket, item, Precondition::Unlocked).await? {
                return Ok(());
            }
            self.resolve_if_locked(bucket, key).await?;
        }
        Err(conflict("gave up after repeated lock contention"))
    }

    async fn del(&self, bucket: &[u8], key: &[u8]) -> NoSqlResult<()> {
        for _ in 0..MAX_ATTEMPTS {
            if self.store.remove(bucket, key, Precondition::Unlocked).await? {
                return Ok(());
            }
            self.resolve_if_locked(bucket, key).await?;
        }
        Err(conflict("gave up after repeated lock contention"))
    }

    async fn compare_and_swap(
        &self,
        bucket: &[u8],
        key: &[u8],
        old: Option<&[u8]>,
        new: &[u8],
    ) -> NoSqlResult<CasOutcome> {
        let expected = old.map(|v| v.to_vec());
        for _ in 0..MAX_ATTEMPTS {
            let item = StoredItem::plain(key, new);
            let precondition = Precondition::UnlockedWithValue(expected.clone());
            if self.store.store(bucket, item, precondition).await? {
                return Ok(CasOutcome::swapped(expected));
            }

            // the value read here is advisory: another writer may change it
            // between the failed write and this read
            match self.store.load(bucket, key).await? {
                Some(item) if item.is_locked() => {
                    let visible = self.visible_value(item.clone()).await?;
                    if visible != expected {
                        return Ok(CasOutcome::mismatch(visible));
                    }
                    self.resolve_lock(bucket, item).await?;
                }
                Some(item) if item.value != expected => {
                    return Ok(CasOutcome::mismatch(item.value));
                }
                None if expected.is_some() => return Ok(CasOutcome::mismatch(None)),
                _ => {}
            }
        }
        Err(conflict("gave up after repeated lock contention"))
    }

    async fn lock_key(&self, bucket: &[u8], key: &[u8], staged: &StagedTx) -> NoSqlResult<Option<Vec<u8>>> {
        for _ in 0..MAX_ATTEMPTS {
            match self.store.load(bucket, key).await? {
                Some(item) if item.is_locked() => self.resolve_lock(bucket, item).await?,
                current => {
                    let committed = current.and_then(|item| item.value);
                    let locked = StoredItem {
                        key: key.to_vec(),
                        value: committed.clone(),
                        lock: Some(staged.lock(PendingWrite::Keep)),
                    };
                    let precondition = Precondition::UnlockedWithValue(committed.clone());
                    if self.store.store(bucket, locked, precondition).await? {
                        return Ok(committed);
                    }
                }
            }
        }
        Err(conflict(&format!(
            "could not lock {}/{}",
            display_bytes(bucket),
            display_bytes(key)
        )))
    }

    /// Locks every touched key, evaluates the operations and stages the
    /// resulting writes on the locks.
    async fn prepare(&self, tx: &Transaction, staged: &mut StagedTx) -> NoSqlResult<(WriteSet, TxOutcome)> {
        let mut write_set = WriteSet::new();
        for (bucket, key) in tx.touched_keys() {
            let committed = self.lock_key(bucket, key, staged).await?;
            staged
                .locked
                .push((bucket.to_vec(), key.to_vec(), committed.clone()));
            write_set.load(bucket, key, committed);
        }

        let outcome = write_set.execute(tx)?;

        for change in write_set.changes() {
            let item = StoredItem {
                key: change.key.clone(),
                value: write_set.original(&change.bucket, &change.key).map(|v| v.to_vec()),
                lock: Some(staged.lock(PendingWrite::from_change(change.value.clone()))),
            };
            let staged_write = self
                .store
                .store(&change.bucket, item, Precondition::LockedBy(staged.id.clone()))
                .await?;
            if !staged_write {
                return Err(conflict(&format!(
                    "lock on {}/{} was taken over by another writer",
                    display_bytes(&change.bucket),
                    display_bytes(&change.key)
                )));
            }
        }
        Ok((write_set, outcome))
    }

    async fn is_committed(&self, staged: &StagedTx) -> bool {
        match self.load_record(&staged.record_bucket, &staged.id).await {
            Ok(Some((record, _))) => record.state == TxState::Committed,
            Ok(None) => false,
            Err(err) => {
                log::warn!("Could not read back transaction {}: {}", staged.id, err);
                false
            }
        }
    }

    /// Flips the record to aborted and releases every lock taken so far. If
    /// the flip cannot be made, the transaction is left for recovery.
    async fn abort(&self, staged: &StagedTx) {
        let aborted = match staged.record.transition(TxState::Aborted) {
            Ok(aborted) => aborted,
            Err(_) => return,
        };
        let flip = match record_item(&aborted) {
            Ok(item) => {
                self.store
                    .store(
                        &staged.record_bucket,
                        item,
                        Precondition::ValueEquals(staged.pending_bytes.clone()),
                    )
                    .await
            }
            Err(err) => Err(err),
        };

        let decided = match flip {
            Ok(true) => true,
            // someone else aborted it after the lock timeout
            Ok(false) => match self.load_record(&staged.record_bucket, &staged.id).await {
                Ok(Some((record, _))) => record.state == TxState::Aborted,
                Ok(None) => true,
                Err(_) => false,
            },
            Err(err) => {
                log::warn!(
                    "Could not abort transaction {}, leaving it for recovery: {}",
                    staged.id,
                    err
                );
                false
            }
        };
        if !decided {
            return;
        }

        let mut released = true;
        for (bucket, key, committed) in &staged.locked {
            if let Err(err) = self
                .roll_back(bucket, key, committed.as_deref(), &staged.id)
                .await
            {
                log::warn!(
                    "Could not release {}/{} for aborted transaction {}: {}",
                    display_bytes(bucket),
                    display_bytes(key),
                    staged.id,
                    err
                );
                released = false;
            }
        }
        if released {
            self.reclaim(&staged.record_bucket, &aborted).await;
        }
    }

    /// Deletes a decided record.
    async fn reclaim(&self, record_bucket: &[u8], record: &TxRecord) {
        if record.transition(TxState::Reclaimed).is_err() {
            return;
        }
        let encoded = match record.encode() {
            Ok(encoded) => encoded,
            Err(_) => return,
        };
        if let Err(err) = self
            .store
            .remove(record_bucket, &record.key(), Precondition::ValueEquals(encoded))
            .await
        {
            log::warn!("Could not reclaim transaction record {}: {}", record.id, err);
        }
    }

    async fn update(&self, tx: &Transaction) -> NoSqlResult<TxOutcome> {
        let record_bucket = match tx.buckets().first() {
            Some(bucket) => bucket.to_vec(),
            None => return Ok(TxOutcome::default()),
        };
        let id = Uuid::new_v4().to_string();
        let keys = tx
            .touched_keys()
            .into_iter()
            .map(|(bucket, key)| (bucket.to_vec(), key.to_vec()))
            .collect();
        let record = TxRecord::new(&id, keys);
        let pending_bytes = record.encode()?;

        let written = self
            .store
            .store(&record_bucket, record_item(&record)?, Precondition::Absent)
            .await?;
        if !written {
            return Err(conflict(&format!("transaction id {} already in use", id)));
        }

        let mut staged = StagedTx {
            id,
            record_bucket,
            record,
            pending_bytes,
            locked: Vec::new(),
        };

        let (write_set, outcome) = match self.prepare(tx, &mut staged).await {
            Ok(prepared) => prepared,
            Err(err) => {
                self.abort(&staged).await;
                return Err(err);
            }
        };

        // commit point
        let committed = staged.record.transition(TxState::Committed)?;
        let flip = self
            .store
            .store(
                &staged.record_bucket,
                record_item(&committed)?,
                Precondition::ValueEquals(staged.pending_bytes.clone()),
            )
            .await;
        if !matches!(flip, Ok(true)) {
            // the flip may have landed even though the store reported a
            // fault, so only the record itself tells whether to abort
            if self.is_committed(&staged).await {
                log::warn!(
                    "Commit of transaction {} reported {:?} but its record is committed",
                    staged.id,
                    flip
                );
            } else {
                self.abort(&staged).await;
                return Err(match flip {
                    Err(err) => err,
                    _ => conflict(&format!(
                        "transaction {} was aborted before it could commit",
                        staged.id
                    )),
                });
            }
        }

        let mut applied = true;
        for (bucket, key, _) in &staged.locked {
            let precondition = Precondition::LockedBy(staged.id.clone());
            let result = match write_set.current(bucket, key) {
                Some(value) => {
                    self.store
                        .store(bucket, StoredItem::plain(key, value), precondition)
                        .await
                }
                None => self.store.remove(bucket, key, precondition).await,
            };
            if let Err(err) = result {
                log::warn!(
                    "Committed transaction {} could not apply {}/{}, readers roll it forward: {}",
                    staged.id,
                    display_bytes(bucket),
                    display_bytes(key),
                    err
                );
                applied = false;
            }
        }
        if applied {
            self.reclaim(&staged.record_bucket, &committed).await;
        }
        Ok(outcome)
    }

    async fn recover(&self, bucket: &[u8]) -> NoSqlResult<RecoveryReport> {
        let mut records = Vec::new();
        let mut token: Option<ContinuationToken> = None;
        loop {
            let page = self.store.scan(bucket, token, self.config.page_size()).await?;
            for item in page.items {
                if !is_record_key(&item.key) {
                    continue;
                }
                if let Some(bytes) = item.value {
                    records.push((TxRecord::decode(&bytes)?, bytes));
                }
            }
            match page.next {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        let mut report = RecoveryReport::default();
        for (record, bytes) in records {
            match record.state {
                TxState::Committed => {
                    self.finish(bucket, &record, true).await?;
                    report.rolled_forward += 1;
                }
                TxState::Aborted => {
                    self.finish(bucket, &record, false).await?;
                    report.rolled_back += 1;
                }
                TxState::Pending if record.is_expired(self.config.lock_timeout()) => {
                    let aborted = record.transition(TxState::Aborted)?;
                    let flipped = self
                        .store
                        .store(bucket, record_item(&aborted)?, Precondition::ValueEquals(bytes))
                        .await?;
                    if flipped {
                        self.finish(bucket, &aborted, false).await?;
                        report.rolled_back += 1;
                    } else {
                        report.in_flight += 1;
                    }
                }
                _ => report.in_flight += 1,
            }
        }

        if report != RecoveryReport::default() {
            log::debug!(
                "Recovered bucket {}: {} rolled forward, {} rolled back, {} in flight",
                display_bytes(bucket),
                report.rolled_forward,
                report.rolled_back,
                report.in_flight
            );
        }
        Ok(report)
    }

    /// Rolls every key of a decided transaction forward or back, then
    /// reclaims its record.
    async fn finish(&self, record_bucket: &[u8], record: &TxRecord, forward: bool) -> NoSqlResult<()> {
        for (bucket, key) in &record.keys {
            let item = match self.store.load(bucket, key).await {
                Ok(Some(item)) => item,
                Ok(None) => continue,
                Err(err) if err.is_not_found() => continue,
                Err(err) => return Err(err),
            };
            let lock = match &item.lock {
                Some(lock) if lock.tx_id == record.id => lock.clone(),
                _ => continue,
            };
            if forward {
                self.roll_forward(bucket, &item, &lock).await?;
            } else {
                self.roll_back(bucket, key, item.value.as_deref(), &record.id)
                    .await?;
            }
        }
        self.reclaim(record_bucket, record).await;
        Ok(())
    }
}

/// Lists a bucket, hiding transaction records and resolving locked items.
struct StagedPages<'a, S> {
    inner: &'a StagingInner<S>,
    bucket: &'a [u8],
    states: HashMap<String, Option<TxState>>,
}

#[async_trait]
impl<'a, S: ItemStore> PageSource for StagedPages<'a, S> {
    type Item = (Vec<u8>, Option<Vec<u8>>);

    async fn fetch(&mut self, token: Option<ContinuationToken>) -> NoSqlResult<Page<Self::Item>> {
        let page = self
            .inner
            .store
            .scan(self.bucket, token, self.inner.config.page_size())
            .await?;

        let mut items = Vec::with_capacity(page.items.len());
        for item in page.items {
            if is_record_key(&item.key) {
                continue;
            }
            let value = match &item.lock {
                None => item.value,
                Some(lock) => {
                    let state = match self.states.get(&lock.tx_id) {
                        Some(state) => *state,
                        None => {
                            let state = self.inner.record_state(lock).await?;
                            self.states.insert(lock.tx_id.clone(), state);
                            state
                        }
                    };
                    match state {
                        Some(TxState::Committed) => lock.pending.resolve(item.value.as_deref()),
                        _ => item.value,
                    }
                }
            };
            items.push((item.key, value));
        }
        Ok(Page {
            items,
            next: page.next,
        })
    }

    fn decode(&self, item: Self::Item) -> NoSqlResult<Option<Entry>> {
        let (key, value) = item;
        Ok(value.map(|value| Entry {
            bucket: self.bucket.to_vec(),
            key,
            value,
        }))
    }
}

fn check_key(bucket: &[u8], key: &[u8]) -> NoSqlResult<()> {
    validate_key(bucket, key)?;
    check_user_key(bucket, key)
}

/// Adds bucket/key context and logs faults other than expected outcomes.
fn fail(err: NoSqlError, action: &str, bucket: &[u8], key: &[u8]) -> NoSqlError {
    if !err.is_not_found() {
        log::error!(
            "Failed to {} {}/{}: {}",
            action,
            display_bytes(bucket),
            display_bytes(key),
            err
        );
    }
    err.context(action, bucket, key)
}

#[async_trait]
impl<S: ItemStore + 'static> Driver for StagingEngine<S> {
    async fn close(&self) -> NoSqlResult<()> {
        self.inner.store.close().await?;
        log::debug!("Closed staging engine over {}", self.inner.store.backend_version());
        Ok(())
    }

    async fn create_table(&self, bucket: &[u8]) -> NoSqlResult<()> {
        validate_bucket(bucket)?;
        self.inner.store.create_bucket(bucket).await?;
        log::debug!("Created bucket {}", display_bytes(bucket));
        Ok(())
    }

    async fn delete_table(&self, bucket: &[u8]) -> NoSqlResult<()> {
        validate_bucket(bucket)?;
        self.inner.store.delete_bucket(bucket).await?;
        log::debug!("Deleted bucket {}", display_bytes(bucket));
        Ok(())
    }

    async fn get(&self, bucket: &[u8], key: &[u8]) -> NoSqlResult<Vec<u8>> {
        check_key(bucket, key)?;
        self.inner
            .get(bucket, key)
            .await
            .map_err(|err| fail(err, "get", bucket, key))
    }

    async fn set(&self, bucket: &[u8], key: &[u8], value: &[u8]) -> NoSqlResult<()> {
        check_key(bucket, key)?;
        self.inner
            .set(bucket, key, value)
            .await
            .map_err(|err| fail(err, "set", bucket, key))
    }

    async fn del(&self, bucket: &[u8], key: &[u8]) -> NoSqlResult<()> {
        check_key(bucket, key)?;
        self.inner
            .del(bucket, key)
            .await
            .map_err(|err| fail(err, "delete", bucket, key))
    }

    async fn list(&self, bucket: &[u8]) -> NoSqlResult<Vec<Entry>> {
        validate_bucket(bucket)?;
        let mut pages = StagedPages {
            inner: self.inner.as_ref(),
            bucket,
            states: HashMap::new(),
        };
        list_all(&mut pages).await.map_err(|err| {
            if !err.is_not_found() {
                log::error!("Failed to list {}: {}", display_bytes(bucket), err);
            }
            err.bucket_context("list", bucket)
        })
    }

    async fn update(&self, tx: Transaction) -> NoSqlResult<TxOutcome> {
        if !self.inner.config.emulated_transactions() {
            return Err(NoSqlError::not_implemented(&format!(
                "{} has no multi-key transactions and emulation is disabled",
                self.inner.store.kind()
            )));
        }
        tx.validate()?;
        for operation in tx.operations() {
            check_user_key(operation.bucket(), operation.key())?;
        }
        self.inner.update(&tx).await.map_err(|err| {
            if !err.is_not_found() {
                log::error!("Staged update of {} operations failed: {}", tx.len(), err);
            }
            err
        })
    }

    async fn compare_and_swap(
        &self,
        bucket: &[u8],
        key: &[u8],
        old: Option<&[u8]>,
        new: &[u8],
    ) -> NoSqlResult<CasOutcome> {
        check_key(bucket, key)?;
        self.inner
            .compare_and_swap(bucket, key, old, new)
            .await
            .map_err(|err| fail(err, "compare-and-swap", bucket, key))
    }

    fn kind(&self) -> BackendKind {
        self.inner.store.kind()
    }

    fn backend_version(&self) -> String {
        format!("{} (staged transactions)", self.inner.store.backend_version())
    }
}
