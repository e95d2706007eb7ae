use crossbeam_skiplist::SkipMap;
use std::collections::Bound::{Excluded, Unbounded};
use std::sync::Arc;

use crate::entry::Entry;
use crate::errors::NoSqlResult;
use crate::pagination::{keyset_page, ContinuationToken, Page, PageReader};

/// One in-memory bucket: an ordered concurrent skip list of byte keys.
#[derive(Clone, Default)]
pub(crate) struct MemoryBucket {
    inner: Arc<SkipMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryBucket {
    pub(crate) fn new() -> Self {
        MemoryBucket::default()
    }

    pub(crate) fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.inner.get(key).map(|entry| entry.value().clone())
    }

    pub(crate) fn put(&self, key: &[u8], value: &[u8]) {
        self.inner.insert(key.to_vec(), value.to_vec());
    }

    pub(crate) fn remove(&self, key: &[u8]) {
        self.inner.remove(key);
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.len()
    }

    pub(crate) fn clear(&self) {
        self.inner.clear();
    }

    /// Keyset page reader over this bucket.
    pub(crate) fn reader(&self, bucket: &[u8], page_size: usize) -> BucketReader<'_> {
        BucketReader {
            bucket: bucket.to_vec(),
            map: &self.inner,
            page_size,
        }
    }
}

pub(crate) struct BucketReader<'a> {
    bucket: Vec<u8>,
    map: &'a SkipMap<Vec<u8>, Vec<u8>>,
    page_size: usize,
}

impl PageReader for BucketReader<'_> {
    type Item = (Vec<u8>, Vec<u8>);

    fn read_page(&mut self, token: Option<ContinuationToken>) -> NoSqlResult<Page<Self::Item>> {
        let entries = match &token {
            Some(token) => self.map.range::<[u8], _>((Excluded(token.as_bytes()), Unbounded)),
            None => self.map.range::<[u8], _>((Unbounded, Unbounded)),
        };
        keyset_page(
            entries.map(|entry| Ok((entry.key().clone(), entry.value().clone()))),
            self.page_size,
        )
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pagination::list_all_blocking;

    #[test]
    fn put_get_remove() {
        let bucket = MemoryBucket::new();
        bucket.put(b"k", b"v");
        assert_eq!(bucket.get(b"k"), Some(b"v".to_vec()));
        bucket.remove(b"k");
        assert_eq!(bucket.get(b"k"), None);
        bucket.remove(b"k");
        assert_eq!(bucket.len(), 0);
    }

    #[test]
    fn reader_pages_in_key_order() {
        let bucket = MemoryBucket::new();
        for i in 0..11u8 {
            bucket.put(&[b'k', i], &[i]);
        }
        let mut reader = bucket.reader(b"b", 3);
        let first = reader.read_page(None).unwrap();
        assert_eq!(first.items.len(), 3);
        assert_eq!(first.next, Some(ContinuationToken(vec![b'k', 2])));

        let entries = list_all_blocking(&mut bucket.reader(b"b", 3)).unwrap();
        assert_eq!(entries.len(), 11);
        assert!(entries.windows(2).all(|w| w[0].key < w[1].key));
    }
}
