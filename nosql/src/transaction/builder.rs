use indexmap::IndexSet;

use super::Operation;
use crate::errors::NoSqlResult;

/// An ordered list of operations applied as one atomic unit by
/// [`Driver::update`](crate::driver::Driver::update).
///
/// Operations apply in the order they were added and the last write to a key
/// wins. A transaction is built, executed once and discarded.
///
/// # Examples
///
/// ```rust
/// use nosql::transaction::Transaction;
///
/// let tx = Transaction::new()
///     .set("users", "alice", "v1")
///     .delete("users", "bob")
///     .get("users", "alice");
/// assert_eq!(tx.len(), 3);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transaction {
    operations: Vec<Operation>,
}

impl Transaction {
    pub fn new() -> Self {
        Transaction::default()
    }

    pub fn get(mut self, bucket: impl Into<Vec<u8>>, key: impl Into<Vec<u8>>) -> Self {
        self.operations.push(Operation::Get {
            bucket: bucket.into(),
            key: key.into(),
        });
        self
    }

    pub fn set(
        mut self,
        bucket: impl Into<Vec<u8>>,
        key: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        self.operations.push(Operation::Set {
            bucket: bucket.into(),
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn delete(mut self, bucket: impl Into<Vec<u8>>, key: impl Into<Vec<u8>>) -> Self {
        self.operations.push(Operation::Delete {
            bucket: bucket.into(),
            key: key.into(),
        });
        self
    }

    pub fn compare_and_swap(
        mut self,
        bucket: impl Into<Vec<u8>>,
        key: impl Into<Vec<u8>>,
        old: Option<Vec<u8>>,
        new: impl Into<Vec<u8>>,
    ) -> Self {
        self.operations.push(Operation::CompareAndSwap {
            bucket: bucket.into(),
            key: key.into(),
            old,
            new: new.into(),
        });
        self
    }

    pub fn push(&mut self, operation: Operation) {
        self.operations.push(operation);
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Every (bucket, key) the transaction touches, once each, in order of
    /// first appearance.
    pub fn touched_keys(&self) -> Vec<(&[u8], &[u8])> {
        let keys: IndexSet<(&[u8], &[u8])> = self
            .operations
            .iter()
            .map(|op| (op.bucket(), op.key()))
            .collect();
        keys.into_iter().collect()
    }

    /// Distinct buckets in order of first appearance.
    pub fn buckets(&self) -> Vec<&[u8]> {
        let buckets: IndexSet<&[u8]> = self.operations.iter().map(|op| op.bucket()).collect();
        buckets.into_iter().collect()
    }

    pub fn validate(&self) -> NoSqlResult<()> {
        for operation in &self.operations {
            operation.validate()?;
        }
        Ok(())
    }
}

impl From<Vec<Operation>> for Transaction {
    fn from(operations: Vec<Operation>) -> Self {
        Transaction { operations }
    }
}

impl IntoIterator for Transaction {
    type Item = Operation;
    type IntoIter = std::vec::IntoIter<Operation>;

    fn into_iter(self) -> Self::IntoIter {
        self.operations.into_iter()
    }
}
