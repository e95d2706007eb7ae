use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::time::Duration;

use crate::entry::display_bytes;
use crate::errors::{ErrorKind, NoSqlError, NoSqlResult};

/// Prefix of the keys holding transaction records. User keys may not start with it.
pub const RECORD_KEY_PREFIX: &[u8] = b"__nosql.tx/";

/// Lifecycle of a staged transaction.
///
/// `Pending -> Committed -> Reclaimed` or `Pending -> Aborted -> Reclaimed`.
/// Flipping `Pending -> Committed` is the commit point. A reclaimed record is
/// deleted, so `Reclaimed` is never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxState {
    Pending,
    Committed,
    Aborted,
    Reclaimed,
}

impl TxState {
    pub fn can_transition_to(&self, next: TxState) -> bool {
        matches!(
            (self, next),
            (TxState::Pending, TxState::Committed)
                | (TxState::Pending, TxState::Aborted)
                | (TxState::Committed, TxState::Reclaimed)
                | (TxState::Aborted, TxState::Reclaimed)
        )
    }
}

impl Display for TxState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TxState::Pending => write!(f, "pending"),
            TxState::Committed => write!(f, "committed"),
            TxState::Aborted => write!(f, "aborted"),
            TxState::Reclaimed => write!(f, "reclaimed"),
        }
    }
}

/// The single item whose state flip commits a staged transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRecord {
    pub id: String,
    pub state: TxState,
    /// Every (bucket, key) locked by the transaction.
    pub keys: Vec<(Vec<u8>, Vec<u8>)>,
    /// Creation time in milliseconds since the epoch.
    pub created_at: i64,
}

impl TxRecord {
    pub fn new(id: &str, keys: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        TxRecord {
            id: id.to_string(),
            state: TxState::Pending,
            keys,
            created_at: Utc::now().timestamp_millis(),
        }
    }

    pub fn key(&self) -> Vec<u8> {
        record_key(&self.id)
    }

    /// Returns a copy in the next state, rejecting transitions outside the
    /// lifecycle.
    pub fn transition(&self, next: TxState) -> NoSqlResult<TxRecord> {
        if !self.state.can_transition_to(next) {
            log::error!("Invalid transaction state change {} -> {} for {}", self.state, next, self.id);
            return Err(NoSqlError::new(
                &format!(
                    "transaction {} cannot move from {} to {}",
                    self.id, self.state, next
                ),
                ErrorKind::Internal,
            ));
        }
        let mut record = self.clone();
        record.state = next;
        Ok(record)
    }

    /// True once a pending record has outlived the lock timeout.
    pub fn is_expired(&self, lock_timeout: Duration) -> bool {
        let age = Utc::now().timestamp_millis().saturating_sub(self.created_at);
        age >= 0 && (age as u128) >= lock_timeout.as_millis()
    }

    pub fn encode(&self) -> NoSqlResult<Vec<u8>> {
        Ok(bincode::serde::encode_to_vec(self, bincode::config::standard())?)
    }

    pub fn decode(bytes: &[u8]) -> NoSqlResult<TxRecord> {
        let (record, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
        Ok(record)
    }
}

pub fn record_key(tx_id: &str) -> Vec<u8> {
    let mut key = RECORD_KEY_PREFIX.to_vec();
    key.extend_from_slice(tx_id.as_bytes());
    key
}

pub fn is_record_key(key: &[u8]) -> bool {
    key.starts_with(RECORD_KEY_PREFIX)
}

/// Rejects user keys that collide with the record namespace.
pub fn check_user_key(bucket: &[u8], key: &[u8]) -> NoSqlResult<()> {
    if is_record_key(key) {
        log::error!("Key {} in bucket {} uses the reserved prefix", display_bytes(key), display_bytes(bucket));
        return Err(NoSqlError::invalid(&format!(
            "key {} in bucket {} uses a reserved prefix",
            display_bytes(key),
            display_bytes(bucket)
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_transitions() {
        let record = TxRecord::new("t1", vec![(b"b".to_vec(), b"k".to_vec())]);
        assert_eq!(record.state, TxState::Pending);

        let committed = record.transition(TxState::Committed).unwrap();
        assert_eq!(committed.state, TxState::Committed);
        assert!(committed.transition(TxState::Reclaimed).is_ok());
        assert!(committed.transition(TxState::Aborted).is_err());

        let aborted = record.transition(TxState::Aborted).unwrap();
        assert!(aborted.transition(TxState::Committed).is_err());
        assert!(aborted.transition(TxState::Reclaimed).is_ok());
        assert!(record.transition(TxState::Reclaimed).is_err());
    }

    #[test]
    fn encoding_round_trip_keeps_state() {
        let record = TxRecord::new("t1", vec![(b"b".to_vec(), b"k".to_vec())]);
        let committed = record.transition(TxState::Committed).unwrap();
        let bytes = committed.encode().unwrap();
        assert_ne!(bytes, record.encode().unwrap());
        assert_eq!(TxRecord::decode(&bytes).unwrap(), committed);
        assert_eq!(TxRecord::decode(&[0xff]).unwrap_err().kind(), &ErrorKind::Encoding);
    }

    #[test]
    fn expiry() {
        let mut record = TxRecord::new("t1", vec![]);
        assert!(!record.is_expired(Duration::from_secs(60)));
        assert!(record.is_expired(Duration::ZERO));
        record.created_at -= 120_000;
        assert!(record.is_expired(Duration::from_secs(60)));
    }

    #[test]
    fn reserved_keys() {
        let key = record_key("abc");
        assert!(is_record_key(&key));
        assert!(check_user_key(b"b", &key).is_err());
        assert!(check_user_key(b"b", b"alice").is_ok());
    }
}
