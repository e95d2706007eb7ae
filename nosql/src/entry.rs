use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt::{Display, Formatter};

use crate::errors::{NoSqlError, NoSqlResult};

/// A single key-value pair together with the bucket it was read from.
///
/// Keys and values are uninterpreted byte strings. The order in which
/// [`Driver::list`](crate::driver::Driver::list) yields entries is backend
/// defined and callers must not rely on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entry {
    pub bucket: Vec<u8>,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Entry {
    pub fn new(bucket: impl Into<Vec<u8>>, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Entry {
            bucket: bucket.into(),
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn into_pair(self) -> (Vec<u8>, Vec<u8>) {
        (self.key, self.value)
    }
}

impl Display for Entry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} ({} bytes)",
            display_bytes(&self.bucket),
            display_bytes(&self.key),
            self.value.len()
        )
    }
}

/// Renders a byte-string name for messages and logs.
pub fn display_bytes(bytes: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(bytes)
}

/// Bucket names must be non-empty.
pub fn validate_bucket(bucket: &[u8]) -> NoSqlResult<()> {
    if bucket.is_empty() {
        log::error!("Bucket name cannot be empty");
        return Err(NoSqlError::invalid("bucket name cannot be empty"));
    }
    Ok(())
}

/// Keys must be non-empty.
pub fn validate_key(bucket: &[u8], key: &[u8]) -> NoSqlResult<()> {
    validate_bucket(bucket)?;
    if key.is_empty() {
        log::error!("Empty key in bucket {}", display_bytes(bucket));
        return Err(NoSqlError::invalid(&format!(
            "key in bucket {} cannot be empty",
            display_bytes(bucket)
        )));
    }
    Ok(())
}
