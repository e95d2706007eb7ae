use async_trait::async_trait;
use std::fmt::{Display, Formatter};
use std::ops::Deref;
use std::str::FromStr;
use std::sync::Arc;

use crate::entry::Entry;
use crate::errors::{NoSqlError, NoSqlResult};
use crate::transaction::{CasOutcome, Transaction, TxOutcome};

/// The storage engines a [`Database`] can be opened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Memory,
    Fjall,
    Redb,
    DynamoDb,
    Postgres,
    MySql,
}

impl BackendKind {
    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::Fjall => "fjall",
            BackendKind::Redb => "redb",
            BackendKind::DynamoDb => "dynamodb",
            BackendKind::Postgres => "postgres",
            BackendKind::MySql => "mysql",
        }
    }

    /// Embedded engines take a filesystem path as locator.
    pub fn is_embedded(&self) -> bool {
        matches!(self, BackendKind::Fjall | BackendKind::Redb)
    }
}

impl Display for BackendKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for BackendKind {
    type Err = NoSqlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "mem" => Ok(BackendKind::Memory),
            "fjall" => Ok(BackendKind::Fjall),
            "redb" => Ok(BackendKind::Redb),
            "dynamodb" | "dynamo" => Ok(BackendKind::DynamoDb),
            "postgres" | "postgresql" => Ok(BackendKind::Postgres),
            "mysql" | "mariadb" => Ok(BackendKind::MySql),
            other => Err(NoSqlError::configuration(&format!(
                "unknown backend '{}'",
                other
            ))),
        }
    }
}

/// The key-value contract every backend implements.
///
/// Implementations must be safe to call concurrently from many tasks on one
/// instance. Expected outcomes are reported through the error kind
/// (`NotFound`, `AlreadyExists`) or, for compare-and-swap, through
/// [`CasOutcome::swapped`]; neither is logged as a failure.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Releases backend resources. Idempotent; later calls fail with `Closed`
    /// on drivers that track it.
    async fn close(&self) -> NoSqlResult<()>;

    /// Creates a bucket, failing with `AlreadyExists` if it exists.
    async fn create_table(&self, bucket: &[u8]) -> NoSqlResult<()>;

    /// Deletes a bucket and all of its entries, failing with `NotFound` if absent.
    async fn delete_table(&self, bucket: &[u8]) -> NoSqlResult<()>;

    /// Reads a value with the strongest consistency the backend offers.
    async fn get(&self, bucket: &[u8], key: &[u8]) -> NoSqlResult<Vec<u8>>;

    /// Unconditional create-or-overwrite.
    async fn set(&self, bucket: &[u8], key: &[u8], value: &[u8]) -> NoSqlResult<()>;

    /// Removes a key. Removing an absent key succeeds.
    async fn del(&self, bucket: &[u8], key: &[u8]) -> NoSqlResult<()>;

    /// Every entry of the bucket. Pages internally and never truncates.
    async fn list(&self, bucket: &[u8]) -> NoSqlResult<Vec<Entry>>;

    /// Applies all operations as one atomic unit.
    async fn update(&self, tx: Transaction) -> NoSqlResult<TxOutcome>;

    /// Replaces the value with `new` only if it currently equals `old`
    /// (`None` meaning the key must be absent).
    async fn compare_and_swap(
        &self,
        bucket: &[u8],
        key: &[u8],
        old: Option<&[u8]>,
        new: &[u8],
    ) -> NoSqlResult<CasOutcome>;

    fn kind(&self) -> BackendKind;

    /// Engine name and version for diagnostics.
    fn backend_version(&self) -> String;
}

/// Cloneable handle over any [`Driver`].
///
/// # Examples
///
/// ```rust
/// use nosql::driver::Database;
/// use nosql::memory::MemoryDriver;
///
/// # futures::executor::block_on(async {
/// let db = Database::new(MemoryDriver::new());
/// db.create_table(b"users").await.unwrap();
/// db.set(b"users", b"alice", b"v1").await.unwrap();
/// assert_eq!(db.get(b"users", b"alice").await.unwrap(), b"v1");
/// # });
/// ```
#[derive(Clone)]
pub struct Database {
    inner: Arc<dyn Driver>,
}

impl Database {
    pub fn new<T: Driver + 'static>(inner: T) -> Self {
        Database {
            inner: Arc::new(inner),
        }
    }

    pub fn from_arc(inner: Arc<dyn Driver>) -> Self {
        Database { inner }
    }
}

impl Deref for Database {
    type Target = Arc<dyn Driver>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Database({})", self.inner.backend_version())
    }
}
