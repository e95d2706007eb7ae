use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::item::{ItemStore, Precondition, StoredItem};
use crate::driver::BackendKind;
use crate::entry::display_bytes;
use crate::errors::{ErrorKind, NoSqlError, NoSqlResult};
use crate::pagination::{ContinuationToken, Page};

type Items = Arc<Mutex<BTreeMap<Vec<u8>, StoredItem>>>;

#[derive(Debug, Clone, Copy)]
struct FaultPlan {
    remaining: usize,
    persistent: bool,
}

/// In-process [`ItemStore`] with write-fault injection.
///
/// Each bucket is an ordered map guarded by its own mutex, so a conditional
/// write is evaluated and applied atomically like a single-item conditional
/// write on a remote service.
#[derive(Clone, Default)]
pub struct MemoryItemStore {
    inner: Arc<MemoryItemStoreInner>,
}

#[derive(Default)]
struct MemoryItemStoreInner {
    buckets: DashMap<Vec<u8>, Items>,
    fault: Mutex<Option<FaultPlan>>,
    closed: AtomicBool,
}

impl MemoryItemStore {
    pub fn new() -> Self {
        MemoryItemStore::default()
    }

    /// Lets `successes` more writes through, then fails the next one once.
    pub fn fail_write_after(&self, successes: usize) {
        *self.inner.fault.lock() = Some(FaultPlan {
            remaining: successes,
            persistent: false,
        });
    }

    /// Lets `successes` more writes through, then fails every write until
    /// [`MemoryItemStore::heal`] is called. Simulates a writer that crashed
    /// part way through a protocol.
    pub fn crash_after_writes(&self, successes: usize) {
        *self.inner.fault.lock() = Some(FaultPlan {
            remaining: successes,
            persistent: true,
        });
    }

    pub fn heal(&self) {
        *self.inner.fault.lock() = None;
    }

    /// Raw physical item, bypassing the staging protocol.
    pub fn raw(&self, bucket: &[u8], key: &[u8]) -> Option<StoredItem> {
        self.inner
            .buckets
            .get(bucket)
            .and_then(|items| items.lock().get(key).cloned())
    }

    /// Raw physical items of a bucket in key order.
    pub fn raw_items(&self, bucket: &[u8]) -> Vec<StoredItem> {
        self.inner
            .buckets
            .get(bucket)
            .map(|items| items.lock().values().cloned().collect())
            .unwrap_or_default()
    }

    fn items(&self, bucket: &[u8]) -> NoSqlResult<Items> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(NoSqlError::closed());
        }
        self.inner
            .buckets
            .get(bucket)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| NoSqlError::bucket_not_found(bucket))
    }

    fn check_fault(&self, bucket: &[u8], key: &[u8]) -> NoSqlResult<()> {
        let mut fault = self.inner.fault.lock();
        if let Some(plan) = fault.as_mut() {
            if plan.remaining > 0 {
                plan.remaining -= 1;
                return Ok(());
            }
            if !plan.persistent {
                *fault = None;
            }
            log::error!("Injected write fault on {}/{}", display_bytes(bucket), display_bytes(key));
            return Err(NoSqlError::new(
                &format!(
                    "injected write fault on {}/{}",
                    display_bytes(bucket),
                    display_bytes(key)
                ),
                ErrorKind::Unavailable,
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ItemStore for MemoryItemStore {
    async fn create_bucket(&self, bucket: &[u8]) -> NoSqlResult<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(NoSqlError::closed());
        }
        match self.inner.buckets.entry(bucket.to_vec()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(NoSqlError::bucket_exists(bucket)),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(Arc::new(Mutex::new(BTreeMap::new())));
                Ok(())
            }
        }
    }

    async fn delete_bucket(&self, bucket: &[u8]) -> NoSqlResult<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(NoSqlError::closed());
        }
        self.inner
            .buckets
            .remove(bucket)
            .map(|_| ())
            .ok_or_else(|| NoSqlError::bucket_not_found(bucket))
    }

    async fn load(&self, bucket: &[u8], key: &[u8]) -> NoSqlResult<Option<StoredItem>> {
        let items = self.items(bucket)?;
        let found = items.lock().get(key).cloned();
        Ok(found)
    }

    async fn store(
        &self,
        bucket: &[u8],
        item: StoredItem,
        precondition: Precondition,
    ) -> NoSqlResult<bool> {
        let items = self.items(bucket)?;
        self.check_fault(bucket, &item.key)?;
        let mut items = items.lock();
        if !precondition.holds(items.get(&item.key)) {
            return Ok(false);
        }
        items.insert(item.key.clone(), item);
        Ok(true)
    }

    async fn remove(&self, bucket: &[u8], key: &[u8], precondition: Precondition) -> NoSqlResult<bool> {
        let items = self.items(bucket)?;
        self.check_fault(bucket, key)?;
        let mut items = items.lock();
        if !precondition.holds(items.get(key)) {
            return Ok(false);
        }
        items.remove(key);
        Ok(true)
    }

    async fn scan(
        &self,
        bucket: &[u8],
        token: Option<ContinuationToken>,
        limit: usize,
    ) -> NoSqlResult<Page<StoredItem>> {
        let items = self.items(bucket)?;
        let items = items.lock();
        let limit = limit.max(1);
        let range = match &token {
            Some(token) => items.range::<[u8], _>((Excluded(token.as_bytes()), Unbounded)),
            None => items.range::<[u8], _>((Unbounded, Unbounded)),
        };
        let mut page: Vec<StoredItem> = range.take(limit + 1).map(|(_, item)| item.clone()).collect();
        let next = if page.len() > limit {
            page.truncate(limit);
            page.last().map(|item| ContinuationToken(item.key.clone()))
        } else {
            None
        };
        Ok(Page { items: page, next })
    }

    async fn close(&self) -> NoSqlResult<()> {
        self.inner.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn backend_version(&self) -> String {
        format!("memory item store {}", env!("CARGO_PKG_VERSION"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn conditional_writes() {
        let store = MemoryItemStore::new();
        store.create_bucket(b"b").await.unwrap();
        assert!(store
            .store(b"b", StoredItem::plain(b"k", b"v1"), Precondition::Absent)
            .await
            .unwrap());
        assert!(!store
            .store(b"b", StoredItem::plain(b"k", b"v2"), Precondition::Absent)
            .await
            .unwrap());
        assert!(store
            .store(
                b"b",
                StoredItem::plain(b"k", b"v2"),
                Precondition::UnlockedWithValue(Some(b"v1".to_vec()))
            )
            .await
            .unwrap());
        assert!(!store
            .remove(b"b", b"k", Precondition::ValueEquals(b"v1".to_vec()))
            .await
            .unwrap());
        assert!(store.remove(b"b", b"k", Precondition::None).await.unwrap());
        assert_eq!(store.load(b"b", b"k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn missing_bucket_is_not_found() {
        let store = MemoryItemStore::new();
        assert!(store.load(b"b", b"k").await.unwrap_err().is_not_found());
        assert!(store.delete_bucket(b"b").await.unwrap_err().is_not_found());
        store.create_bucket(b"b").await.unwrap();
        assert!(store.create_bucket(b"b").await.unwrap_err().is_already_exists());
    }

    #[tokio::test]
    async fn one_shot_fault() {
        let store = MemoryItemStore::new();
        store.create_bucket(b"b").await.unwrap();
        store.fail_write_after(1);
        assert!(store.store(b"b", StoredItem::plain(b"a", b"1"), Precondition::None).await.is_ok());
        let err = store
            .store(b"b", StoredItem::plain(b"b", b"2"), Precondition::None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::Unavailable);
        assert!(store.store(b"b", StoredItem::plain(b"b", b"2"), Precondition::None).await.is_ok());
    }

    #[tokio::test]
    async fn persistent_fault_until_healed() {
        let store = MemoryItemStore::new();
        store.create_bucket(b"b").await.unwrap();
        store.crash_after_writes(0);
        assert!(store.remove(b"b", b"a", Precondition::None).await.is_err());
        assert!(store.remove(b"b", b"a", Precondition::None).await.is_err());
        store.heal();
        assert!(store.remove(b"b", b"a", Precondition::None).await.unwrap());
    }

    #[tokio::test]
    async fn scan_pages() {
        let store = MemoryItemStore::new();
        store.create_bucket(b"b").await.unwrap();
        for i in 0..5u8 {
            store
                .store(b"b", StoredItem::plain(&[i], &[i]), Precondition::None)
                .await
                .unwrap();
        }
        let first = store.scan(b"b", None, 2).await.unwrap();
        assert_eq!(first.items.len(), 2);
        let second = store.scan(b"b", first.next, 2).await.unwrap();
        assert_eq!(second.items[0].key, vec![2]);
        let third = store.scan(b"b", second.next, 2).await.unwrap();
        assert_eq!(third.items.len(), 1);
        assert!(third.next.is_none());
    }
}
