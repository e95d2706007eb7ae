use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::entry::{display_bytes, validate_key};
use crate::errors::NoSqlResult;

/// One step of a [`Transaction`](super::Transaction).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Read the value; an absent key aborts the whole update with `NotFound`.
    Get { bucket: Vec<u8>, key: Vec<u8> },
    /// Create or overwrite.
    Set {
        bucket: Vec<u8>,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    /// Remove; absent keys are fine.
    Delete { bucket: Vec<u8>, key: Vec<u8> },
    /// Replace with `new` only if the current value equals `old`
    /// (`None` meaning the key must be absent). A failed precondition does
    /// not abort the update.
    CompareAndSwap {
        bucket: Vec<u8>,
        key: Vec<u8>,
        old: Option<Vec<u8>>,
        new: Vec<u8>,
    },
}

impl Operation {
    pub fn bucket(&self) -> &[u8] {
        match self {
            Operation::Get { bucket, .. }
            | Operation::Set { bucket, .. }
            | Operation::Delete { bucket, .. }
            | Operation::CompareAndSwap { bucket, .. } => bucket,
        }
    }

    pub fn key(&self) -> &[u8] {
        match self {
            Operation::Get { key, .. }
            | Operation::Set { key, .. }
            | Operation::Delete { key, .. }
            | Operation::CompareAndSwap { key, .. } => key,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::Get { .. } => "get",
            Operation::Set { .. } => "set",
            Operation::Delete { .. } => "delete",
            Operation::CompareAndSwap { .. } => "compare-and-swap",
        }
    }

    pub fn is_write(&self) -> bool {
        !matches!(self, Operation::Get { .. })
    }

    pub fn validate(&self) -> NoSqlResult<()> {
        validate_key(self.bucket(), self.key())
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}/{}",
            self.name(),
            display_bytes(self.bucket()),
            display_bytes(self.key())
        )
    }
}

/// Result of a compare-and-swap.
///
/// On success `current` holds the value observed before the swap (so it equals
/// the expected value, or `None` for the must-not-exist sentinel). On a failed
/// precondition `current` holds the value actually found, or `None` if the key
/// was absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CasOutcome {
    pub current: Option<Vec<u8>>,
    pub swapped: bool,
}

impl CasOutcome {
    pub fn swapped(previous: Option<Vec<u8>>) -> Self {
        CasOutcome {
            current: previous,
            swapped: true,
        }
    }

    pub fn mismatch(current: Option<Vec<u8>>) -> Self {
        CasOutcome {
            current,
            swapped: false,
        }
    }

    /// Decides a compare-and-swap against the value currently stored.
    pub fn evaluate(current: Option<&[u8]>, expected: Option<&[u8]>) -> Self {
        let owned = current.map(|v| v.to_vec());
        if current == expected {
            CasOutcome::swapped(owned)
        } else {
            CasOutcome::mismatch(owned)
        }
    }
}

/// Per-operation result of an update, aligned with the operations by index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpResult {
    Read(Vec<u8>),
    Written,
    Deleted,
    Swap(CasOutcome),
}

impl OpResult {
    pub fn value(&self) -> Option<&[u8]> {
        match self {
            OpResult::Read(value) => Some(value),
            _ => None,
        }
    }

    pub fn cas(&self) -> Option<&CasOutcome> {
        match self {
            OpResult::Swap(outcome) => Some(outcome),
            _ => None,
        }
    }
}

/// Results of a committed update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutcome {
    pub results: Vec<OpResult>,
}

impl TxOutcome {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&OpResult> {
        self.results.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cas_evaluation() {
        let ok = CasOutcome::evaluate(Some(b"v1"), Some(b"v1"));
        assert!(ok.swapped);
        assert_eq!(ok.current, Some(b"v1".to_vec()));

        let absent = CasOutcome::evaluate(None, None);
        assert!(absent.swapped);
        assert_eq!(absent.current, None);

        let lost = CasOutcome::evaluate(Some(b"v2"), Some(b"v1"));
        assert!(!lost.swapped);
        assert_eq!(lost.current, Some(b"v2".to_vec()));

        let exists = CasOutcome::evaluate(Some(b"v2"), None);
        assert!(!exists.swapped);
    }

    #[test]
    fn operation_accessors() {
        let op = Operation::CompareAndSwap {
            bucket: b"users".to_vec(),
            key: b"alice".to_vec(),
            old: None,
            new: b"v1".to_vec(),
        };
        assert_eq!(op.bucket(), b"users");
        assert_eq!(op.key(), b"alice");
        assert!(op.is_write());
        assert_eq!(op.to_string(), "compare-and-swap users/alice");
        assert!(!Operation::Get {
            bucket: b"users".to_vec(),
            key: b"alice".to_vec()
        }
        .is_write());
    }
}
