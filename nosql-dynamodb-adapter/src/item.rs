//! Attribute layout of stored items and the condition expressions that guard
//! their writes.
//!
//! | attribute  | type | content                                   |
//! |------------|------|-------------------------------------------|
//! | `nkey`     | S    | key (partition key)                       |
//! | `nvalue`   | B    | committed value, absent for locked gaps   |
//! | `ntx`      | S    | id of the transaction holding the lock    |
//! | `nrec`     | B    | bucket holding that transaction's record  |
//! | `nop`      | S    | pending operation: put, delete or keep    |
//! | `npending` | B    | value a pending put will write            |

use aws_sdk_dynamodb::primitives::Blob;
use aws_sdk_dynamodb::types::AttributeValue;
use nosql::entry::display_bytes;
use nosql::errors::{NoSqlError, NoSqlResult};
use nosql::staging::{ItemLock, PendingWrite, Precondition, StoredItem};
use std::collections::HashMap;

use crate::error::ItemCodecError;

pub(crate) const KEY: &str = "nkey";
pub(crate) const VALUE: &str = "nvalue";
pub(crate) const TX: &str = "ntx";
pub(crate) const RECORD_BUCKET: &str = "nrec";
pub(crate) const OP: &str = "nop";
pub(crate) const PENDING: &str = "npending";

pub(crate) type Item = HashMap<String, AttributeValue>;

/// Partition keys are strings, so keys must be valid UTF-8.
pub(crate) fn key_string(bucket: &[u8], key: &[u8]) -> NoSqlResult<String> {
    String::from_utf8(key.to_vec()).map_err(|_| {
        NoSqlError::invalid(&format!(
            "DynamoDB keys must be UTF-8: {}/{}",
            display_bytes(bucket),
            display_bytes(key)
        ))
    })
}

pub(crate) fn table_name(bucket: &[u8]) -> NoSqlResult<String> {
    String::from_utf8(bucket.to_vec()).map_err(|_| {
        NoSqlError::invalid(&format!(
            "DynamoDB table names must be UTF-8: {}",
            display_bytes(bucket)
        ))
    })
}

pub(crate) fn key_attribute(key: String) -> Item {
    HashMap::from([(KEY.to_string(), AttributeValue::S(key))])
}

fn blob(bytes: &[u8]) -> AttributeValue {
    AttributeValue::B(Blob::new(bytes.to_vec()))
}

pub(crate) fn encode_item(bucket: &[u8], item: &StoredItem) -> NoSqlResult<Item> {
    let mut attributes = key_attribute(key_string(bucket, &item.key)?);
    if let Some(value) = &item.value {
        attributes.insert(VALUE.to_string(), blob(value));
    }
    if let Some(lock) = &item.lock {
        attributes.insert(TX.to_string(), AttributeValue::S(lock.tx_id.clone()));
        attributes.insert(RECORD_BUCKET.to_string(), blob(&lock.record_bucket));
        attributes.insert(OP.to_string(), AttributeValue::S(lock.pending.op_name().to_string()));
        if let PendingWrite::Put(value) = &lock.pending {
            attributes.insert(PENDING.to_string(), blob(value));
        }
    }
    Ok(attributes)
}

fn string_attr<'a>(item: &'a Item, name: &'static str) -> Result<Option<&'a str>, ItemCodecError> {
    match item.get(name) {
        None => Ok(None),
        Some(AttributeValue::S(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(ItemCodecError::WrongType(name, "S")),
    }
}

fn blob_attr(item: &Item, name: &'static str) -> Result<Option<Vec<u8>>, ItemCodecError> {
    match item.get(name) {
        None => Ok(None),
        Some(AttributeValue::B(b)) => Ok(Some(b.as_ref().to_vec())),
        Some(_) => Err(ItemCodecError::WrongType(name, "B")),
    }
}

pub(crate) fn decode_item(item: &Item) -> Result<StoredItem, ItemCodecError> {
    let key = string_attr(item, KEY)?.ok_or(ItemCodecError::Missing(KEY))?;
    let value = blob_attr(item, VALUE)?;

    let lock = match string_attr(item, TX)? {
        None => None,
        Some(tx_id) => {
            let record_bucket = blob_attr(item, RECORD_BUCKET)?.ok_or(ItemCodecError::Missing(RECORD_BUCKET))?;
            let pending = match string_attr(item, OP)?.ok_or(ItemCodecError::Missing(OP))? {
                "put" => PendingWrite::Put(blob_attr(item, PENDING)?.ok_or(ItemCodecError::Missing(PENDING))?),
                "delete" => PendingWrite::Delete,
                "keep" => PendingWrite::Keep,
                other => return Err(ItemCodecError::UnknownOperation(other.to_string())),
            };
            Some(ItemLock {
                tx_id: tx_id.to_string(),
                record_bucket,
                pending,
            })
        }
    };

    Ok(StoredItem {
        key: key.as_bytes().to_vec(),
        value,
        lock,
    })
}

/// Condition expression plus the placeholders it references.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct Condition {
    pub expression: Option<String>,
    pub values: Option<HashMap<String, AttributeValue>>,
}

impl Condition {
    fn new(expression: &str) -> Self {
        Condition {
            expression: Some(expression.to_string()),
            values: None,
        }
    }

    fn with_value(expression: &str, placeholder: &str, value: AttributeValue) -> Self {
        Condition {
            expression: Some(expression.to_string()),
            values: Some(HashMap::from([(placeholder.to_string(), value)])),
        }
    }
}

pub(crate) fn condition(precondition: &Precondition) -> Condition {
    match precondition {
        Precondition::None => Condition::default(),
        Precondition::Absent => Condition::new("attribute_not_exists(nkey)"),
        Precondition::Unlocked => Condition::new("attribute_not_exists(ntx)"),
        Precondition::UnlockedWithValue(None) => {
            Condition::new("attribute_not_exists(ntx) AND attribute_not_exists(nvalue)")
        }
        Precondition::UnlockedWithValue(Some(value)) => Condition::with_value(
            "attribute_not_exists(ntx) AND nvalue = :expected",
            ":expected",
            blob(value),
        ),
        Precondition::LockedBy(tx_id) => {
            Condition::with_value("ntx = :tx", ":tx", AttributeValue::S(tx_id.clone()))
        }
        Precondition::ValueEquals(value) => {
            Condition::with_value("nvalue = :expected", ":expected", blob(value))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locked(pending: PendingWrite) -> StoredItem {
        StoredItem {
            key: b"alice".to_vec(),
            value: Some(b"v1".to_vec()),
            lock: Some(ItemLock {
                tx_id: "tx-1".to_string(),
                record_bucket: b"users".to_vec(),
                pending,
            }),
        }
    }

    #[test]
    fn plain_item_layout() {
        let item = encode_item(b"users", &StoredItem::plain(b"alice", b"v1")).unwrap();
        assert_eq!(item.len(), 2);
        assert_eq!(item.get(KEY), Some(&AttributeValue::S("alice".to_string())));
        assert_eq!(decode_item(&item).unwrap(), StoredItem::plain(b"alice", b"v1"));
    }

    #[test]
    fn locks_survive_encoding() {
        for pending in [PendingWrite::Put(b"v2".to_vec()), PendingWrite::Delete, PendingWrite::Keep] {
            let stored = locked(pending);
            let item = encode_item(b"users", &stored).unwrap();
            assert_eq!(decode_item(&item).unwrap(), stored);
        }

        let gap = StoredItem {
            value: None,
            ..locked(PendingWrite::Put(b"new".to_vec()))
        };
        let item = encode_item(b"users", &gap).unwrap();
        assert!(!item.contains_key(VALUE));
        assert_eq!(decode_item(&item).unwrap(), gap);
    }

    #[test]
    fn malformed_items_are_rejected() {
        let mut item = encode_item(b"users", &locked(PendingWrite::Keep)).unwrap();
        item.insert(OP.to_string(), AttributeValue::S("merge".to_string()));
        assert_eq!(
            decode_item(&item),
            Err(ItemCodecError::UnknownOperation("merge".to_string()))
        );

        item.insert(VALUE.to_string(), AttributeValue::S("text".to_string()));
        assert_eq!(decode_item(&item), Err(ItemCodecError::WrongType(VALUE, "B")));

        let no_key: Item = HashMap::new();
        assert_eq!(decode_item(&no_key), Err(ItemCodecError::Missing(KEY)));
    }

    #[test]
    fn non_utf8_keys_are_invalid() {
        let err = encode_item(b"users", &StoredItem::plain(&[0xff], b"v")).unwrap_err();
        assert_eq!(err.kind(), &nosql::errors::ErrorKind::Invalid);
        assert!(table_name(&[0xfe]).is_err());
    }

    #[test]
    fn conditions_per_precondition() {
        assert_eq!(condition(&Precondition::None), Condition::default());
        assert_eq!(
            condition(&Precondition::Absent).expression.as_deref(),
            Some("attribute_not_exists(nkey)")
        );

        let locked_by = condition(&Precondition::LockedBy("tx-1".to_string()));
        assert_eq!(locked_by.expression.as_deref(), Some("ntx = :tx"));
        assert_eq!(
            locked_by.values.unwrap().get(":tx"),
            Some(&AttributeValue::S("tx-1".to_string()))
        );

        let unlocked = condition(&Precondition::UnlockedWithValue(Some(b"v".to_vec())));
        assert!(unlocked.expression.unwrap().starts_with("attribute_not_exists(ntx) AND"));
        assert!(unlocked.values.unwrap().contains_key(":expected"));
    }
}
