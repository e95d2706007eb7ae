use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::driver::BackendKind;
use crate::errors::NoSqlResult;
use crate::pagination::{ContinuationToken, Page};

/// The write a lock holder intends to apply once its transaction commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PendingWrite {
    Put(Vec<u8>),
    Delete,
    /// Locked for isolation only; the committed value stays as is.
    Keep,
}

impl PendingWrite {
    pub fn from_change(value: Option<Vec<u8>>) -> Self {
        match value {
            Some(value) => PendingWrite::Put(value),
            None => PendingWrite::Delete,
        }
    }

    /// Value visible once the owning transaction is committed.
    pub fn resolve(&self, committed: Option<&[u8]>) -> Option<Vec<u8>> {
        match self {
            PendingWrite::Put(value) => Some(value.clone()),
            PendingWrite::Delete => None,
            PendingWrite::Keep => committed.map(|v| v.to_vec()),
        }
    }

    pub fn op_name(&self) -> &'static str {
        match self {
            PendingWrite::Put(_) => "put",
            PendingWrite::Delete => "delete",
            PendingWrite::Keep => "keep",
        }
    }
}

/// Marks an item as owned by an in-flight staged transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemLock {
    pub tx_id: String,
    /// Bucket holding the transaction record.
    pub record_bucket: Vec<u8>,
    pub pending: PendingWrite,
}

/// Physical item kept by an [`ItemStore`]: the committed value plus an
/// optional lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredItem {
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
    pub lock: Option<ItemLock>,
}

impl StoredItem {
    pub fn plain(key: &[u8], value: &[u8]) -> Self {
        StoredItem {
            key: key.to_vec(),
            value: Some(value.to_vec()),
            lock: None,
        }
    }

    pub fn locked_by(&self, tx_id: &str) -> bool {
        self.lock.as_ref().map(|lock| lock.tx_id == tx_id).unwrap_or(false)
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }
}

/// Condition a single-item write must satisfy to be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    None,
    /// No item under the key.
    Absent,
    /// No lock on the item (an absent item qualifies).
    Unlocked,
    /// No lock and the committed value equals the given one (`None` = absent).
    UnlockedWithValue(Option<Vec<u8>>),
    /// Locked by the given transaction.
    LockedBy(String),
    /// The item exists and its value equals the given bytes.
    ValueEquals(Vec<u8>),
}

impl Precondition {
    /// Evaluates the condition against the item currently stored.
    pub fn holds(&self, current: Option<&StoredItem>) -> bool {
        match self {
            Precondition::None => true,
            Precondition::Absent => current.is_none(),
            Precondition::Unlocked => current.map(|item| !item.is_locked()).unwrap_or(true),
            Precondition::UnlockedWithValue(expected) => match current {
                None => expected.is_none(),
                Some(item) => !item.is_locked() && &item.value == expected,
            },
            Precondition::LockedBy(tx_id) => {
                current.map(|item| item.locked_by(tx_id)).unwrap_or(false)
            }
            Precondition::ValueEquals(expected) => current
                .and_then(|item| item.value.as_ref())
                .map(|value| value == expected)
                .unwrap_or(false),
        }
    }
}

/// Single-item store with conditional writes, the only primitive the staging
/// protocol needs from a backend.
///
/// `store` and `remove` return `Ok(false)` when the precondition does not hold
/// and `Err` only for real faults. Every method fails with `NotFound` when the
/// bucket is missing.
#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn create_bucket(&self, bucket: &[u8]) -> NoSqlResult<()>;

    async fn delete_bucket(&self, bucket: &[u8]) -> NoSqlResult<()>;

    async fn load(&self, bucket: &[u8], key: &[u8]) -> NoSqlResult<Option<StoredItem>>;

    async fn store(
        &self,
        bucket: &[u8],
        item: StoredItem,
        precondition: Precondition,
    ) -> NoSqlResult<bool>;

    async fn remove(&self, bucket: &[u8], key: &[u8], precondition: Precondition) -> NoSqlResult<bool>;

    /// Up to `limit` items after `token`, with a token if more may follow.
    async fn scan(
        &self,
        bucket: &[u8],
        token: Option<ContinuationToken>,
        limit: usize,
    ) -> NoSqlResult<Page<StoredItem>>;

    async fn close(&self) -> NoSqlResult<()>;

    fn kind(&self) -> BackendKind;

    fn backend_version(&self) -> String;
}
