use indexmap::IndexMap;

use super::{CasOutcome, OpResult, Operation, Transaction, TxOutcome};
use crate::entry::display_bytes;
use crate::errors::{ErrorKind, NoSqlError, NoSqlResult};

type SlotKey = (Vec<u8>, Vec<u8>);

#[derive(Debug, Clone)]
struct Slot {
    original: Option<Vec<u8>>,
    current: Option<Vec<u8>>,
}

/// A net change produced by evaluating a transaction: `value = None` deletes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub bucket: Vec<u8>,
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
}

/// Staged copy of every key a transaction touches.
///
/// Drivers load the committed value of each touched key, let the write set
/// evaluate the operations in order, then publish [`WriteSet::changes`] with
/// their own atomic primitive. Nothing here touches a backend, so evaluation
/// failures leave stored state untouched.
#[derive(Debug, Clone, Default)]
pub struct WriteSet {
    slots: IndexMap<SlotKey, Slot>,
}

impl WriteSet {
    pub fn new() -> Self {
        WriteSet::default()
    }

    /// Loads every touched key through `loader` and evaluates `tx`.
    ///
    /// The loader returns the committed value (or `None`) and is expected to
    /// fail with `NotFound` when the bucket itself is missing.
    pub fn evaluate<F>(tx: &Transaction, mut loader: F) -> NoSqlResult<(WriteSet, TxOutcome)>
    where
        F: FnMut(&[u8], &[u8]) -> NoSqlResult<Option<Vec<u8>>>,
    {
        let mut write_set = WriteSet::new();
        for (bucket, key) in tx.touched_keys() {
            let value = loader(bucket, key)?;
            write_set.load(bucket, key, value);
        }
        let outcome = write_set.execute(tx)?;
        Ok((write_set, outcome))
    }

    pub fn is_loaded(&self, bucket: &[u8], key: &[u8]) -> bool {
        self.slots.contains_key(&(bucket.to_vec(), key.to_vec()))
    }

    /// Records the committed value of a key. Loading twice keeps the first value.
    pub fn load(&mut self, bucket: &[u8], key: &[u8], value: Option<Vec<u8>>) {
        self.slots
            .entry((bucket.to_vec(), key.to_vec()))
            .or_insert_with(|| Slot {
                original: value.clone(),
                current: value,
            });
    }

    /// Applies every operation of `tx` in order.
    pub fn execute(&mut self, tx: &Transaction) -> NoSqlResult<TxOutcome> {
        let mut results = Vec::with_capacity(tx.len());
        for operation in tx.operations() {
            results.push(self.apply(operation)?);
        }
        Ok(TxOutcome { results })
    }

    /// Applies one operation against the staged values.
    pub fn apply(&mut self, operation: &Operation) -> NoSqlResult<OpResult> {
        let slot_key = (operation.bucket().to_vec(), operation.key().to_vec());
        let slot = self.slots.get_mut(&slot_key).ok_or_else(|| {
            NoSqlError::new(
                &format!(
                    "{}/{} was not loaded before evaluation",
                    display_bytes(operation.bucket()),
                    display_bytes(operation.key())
                ),
                ErrorKind::Internal,
            )
        })?;

        match operation {
            Operation::Get { bucket, key } => match &slot.current {
                Some(value) => Ok(OpResult::Read(value.clone())),
                None => Err(NoSqlError::not_found(bucket, key)),
            },
            Operation::Set { value, .. } => {
                slot.current = Some(value.clone());
                Ok(OpResult::Written)
            }
            Operation::Delete { .. } => {
                slot.current = None;
                Ok(OpResult::Deleted)
            }
            Operation::CompareAndSwap { old, new, .. } => {
                let outcome = CasOutcome::evaluate(slot.current.as_deref(), old.as_deref());
                if outcome.swapped {
                    slot.current = Some(new.clone());
                }
                Ok(OpResult::Swap(outcome))
            }
        }
    }

    /// Keys whose final value differs from the committed one, in order of
    /// first appearance.
    pub fn changes(&self) -> Vec<Change> {
        self.slots
            .iter()
            .filter(|(_, slot)| slot.original != slot.current)
            .map(|((bucket, key), slot)| Change {
                bucket: bucket.clone(),
                key: key.clone(),
                value: slot.current.clone(),
            })
            .collect()
    }

    /// Committed value loaded for a key.
    pub fn original(&self, bucket: &[u8], key: &[u8]) -> Option<&[u8]> {
        self.slots
            .get(&(bucket.to_vec(), key.to_vec()))
            .and_then(|slot| slot.original.as_deref())
    }

    /// Staged value of a key after evaluation.
    pub fn current(&self, bucket: &[u8], key: &[u8]) -> Option<&[u8]> {
        self.slots
            .get(&(bucket.to_vec(), key.to_vec()))
            .and_then(|slot| slot.current.as_deref())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn store() -> HashMap<(Vec<u8>, Vec<u8>), Vec<u8>> {
        let mut map = HashMap::new();
        map.insert((b"b".to_vec(), b"x".to_vec()), b"1".to_vec());
        map.insert((b"b".to_vec(), b"y".to_vec()), b"2".to_vec());
        map
    }

    fn loader(
        map: &HashMap<(Vec<u8>, Vec<u8>), Vec<u8>>,
    ) -> impl FnMut(&[u8], &[u8]) -> NoSqlResult<Option<Vec<u8>>> + '_ {
        move |bucket, key| {
            if bucket != b"b" {
                return Err(NoSqlError::bucket_not_found(bucket));
            }
            Ok(map.get(&(bucket.to_vec(), key.to_vec())).cloned())
        }
    }

    #[test]
    fn last_write_wins() {
        let map = store();
        let tx = Transaction::new()
            .set("b", "x", "a")
            .set("b", "x", "b")
            .delete("b", "y")
            .set("b", "y", "c")
            .get("b", "x");
        let (write_set, outcome) = WriteSet::evaluate(&tx, loader(&map)).unwrap();
        assert_eq!(outcome.results[4], OpResult::Read(b"b".to_vec()));
        let changes = write_set.changes();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].value, Some(b"b".to_vec()));
        assert_eq!(changes[1].value, Some(b"c".to_vec()));
    }

    #[test]
    fn get_of_absent_key_aborts() {
        let map = store();
        let tx = Transaction::new().set("b", "x", "9").get("b", "missing");
        let err = WriteSet::evaluate(&tx, loader(&map)).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn missing_bucket_aborts_before_evaluation() {
        let map = store();
        let tx = Transaction::new().set("b", "x", "9").set("nope", "k", "v");
        let err = WriteSet::evaluate(&tx, loader(&map)).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn failed_cas_does_not_abort() {
        let map = store();
        let tx = Transaction::new()
            .compare_and_swap("b", "x", Some(b"wrong".to_vec()), "z")
            .compare_and_swap("b", "new", None, "n")
            .set("b", "y", "3");
        let (write_set, outcome) = WriteSet::evaluate(&tx, loader(&map)).unwrap();
        let first = outcome.results[0].cas().unwrap();
        assert!(!first.swapped);
        assert_eq!(first.current, Some(b"1".to_vec()));
        assert!(outcome.results[1].cas().unwrap().swapped);
        let changes = write_set.changes();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].key, b"new".to_vec());
    }

    #[test]
    fn unchanged_keys_produce_no_changes() {
        let map = store();
        let tx = Transaction::new().set("b", "x", "1").get("b", "y");
        let (write_set, _) = WriteSet::evaluate(&tx, loader(&map)).unwrap();
        assert!(write_set.changes().is_empty());
        assert_eq!(write_set.original(b"b", b"x"), Some(&b"1"[..]));
    }

    #[test]
    fn unloaded_key_is_internal_error() {
        let mut write_set = WriteSet::new();
        let err = write_set
            .apply(&Operation::Delete {
                bucket: b"b".to_vec(),
                key: b"x".to_vec(),
            })
            .unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::Internal);
    }
}
