//! Opens a `nosql` [`Database`] on any backend chosen at runtime.
//!
//! The set of backends is closed: [`AnyDriver`] has one variant per
//! [`BackendKind`] and dispatches by `match`.

use async_trait::async_trait;
use nosql::driver::{BackendKind, Database, Driver};
use nosql::entry::Entry;
use nosql::errors::NoSqlResult;
use nosql::memory::MemoryDriver;
use nosql::options::Options;
use nosql::transaction::{CasOutcome, Transaction, TxOutcome};
use nosql_dynamodb_adapter::DynamoDbDriver;
use nosql_fjall_adapter::FjallDriver;
use nosql_redb_adapter::RedbDriver;
use nosql_sql_adapter::{MySqlDriver, PostgresDriver};

/// Any of the workspace's drivers.
#[derive(Clone)]
pub enum AnyDriver {
    Memory(MemoryDriver),
    Fjall(FjallDriver),
    Redb(RedbDriver),
    DynamoDb(DynamoDbDriver),
    Postgres(PostgresDriver),
    MySql(MySqlDriver),
}

macro_rules! dispatch {
    ($driver:expr, $inner:ident => $call:expr) => {
        match $driver {
            AnyDriver::Memory($inner) => $call,
            AnyDriver::Fjall($inner) => $call,
            AnyDriver::Redb($inner) => $call,
            AnyDriver::DynamoDb($inner) => $call,
            AnyDriver::Postgres($inner) => $call,
            AnyDriver::MySql($inner) => $call,
        }
    };
}

impl AnyDriver {
    /// Opens the driver for `kind`. The locator is a filesystem path for the
    /// embedded engines, an AWS region for DynamoDB and a connection URL for
    /// the SQL engines; the memory driver ignores it.
    pub async fn open(kind: BackendKind, locator: &str, options: &Options) -> NoSqlResult<AnyDriver> {
        let driver = match kind {
            BackendKind::Memory => AnyDriver::Memory(MemoryDriver::open(options)?),
            BackendKind::Fjall => AnyDriver::Fjall(FjallDriver::open(locator, options)?),
            BackendKind::Redb => AnyDriver::Redb(RedbDriver::open(locator, options)?),
            BackendKind::DynamoDb => AnyDriver::DynamoDb(DynamoDbDriver::open(locator, options).await?),
            BackendKind::Postgres => AnyDriver::Postgres(PostgresDriver::open(locator, options).await?),
            BackendKind::MySql => AnyDriver::MySql(MySqlDriver::open(locator, options).await?),
        };
        log::debug!("Opened {} backend: {}", kind, driver.backend_version());
        Ok(driver)
    }
}

/// Opens a [`Database`] on the backend named by `kind`.
///
/// ```rust
/// use nosql::{BackendKind, Options};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let db = nosql_backends::open(BackendKind::Memory, "", Options::default()).await.unwrap();
/// db.create_table(b"users").await.unwrap();
/// assert_eq!(db.kind(), BackendKind::Memory);
/// # });
/// ```
pub async fn open(kind: BackendKind, locator: &str, options: Options) -> NoSqlResult<Database> {
    let driver = AnyDriver::open(kind, locator, &options).await.map_err(|err| {
        log::error!("Failed to open {} backend: {}", kind, err);
        err
    })?;
    Ok(Database::new(driver))
}

#[async_trait]
impl Driver for AnyDriver {
    async fn close(&self) -> NoSqlResult<()> {
        dispatch!(self, driver => driver.close().await)
    }

    async fn create_table(&self, bucket: &[u8]) -> NoSqlResult<()> {
        dispatch!(self, driver => driver.create_table(bucket).await)
    }

    async fn delete_table(&self, bucket: &[u8]) -> NoSqlResult<()> {
        dispatch!(self, driver => driver.delete_table(bucket).await)
    }

    async fn get(&self, bucket: &[u8], key: &[u8]) -> NoSqlResult<Vec<u8>> {
        dispatch!(self, driver => driver.get(bucket, key).await)
    }

    async fn set(&self, bucket: &[u8], key: &[u8], value: &[u8]) -> NoSqlResult<()> {
        dispatch!(self, driver => driver.set(bucket, key, value).await)
    }

    async fn del(&self, bucket: &[u8], key: &[u8]) -> NoSqlResult<()> {
        dispatch!(self, driver => driver.del(bucket, key).await)
    }

    async fn list(&self, bucket: &[u8]) -> NoSqlResult<Vec<Entry>> {
        dispatch!(self, driver => driver.list(bucket).await)
    }

    async fn update(&self, tx: Transaction) -> NoSqlResult<TxOutcome> {
        dispatch!(self, driver => driver.update(tx).await)
    }

    async fn compare_and_swap(
        &self,
        bucket: &[u8],
        key: &[u8],
        old: Option<&[u8]>,
        new: &[u8],
    ) -> NoSqlResult<CasOutcome> {
        dispatch!(self, driver => driver.compare_and_swap(bucket, key, old, new).await)
    }

    fn kind(&self) -> BackendKind {
        dispatch!(self, driver => driver.kind())
    }

    fn backend_version(&self) -> String {
        dispatch!(self, driver => driver.backend_version())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nosql::errors::ErrorKind;
    use tempfile::TempDir;

    #[ctor::ctor]
    fn init() {
        colog::init();
    }

    #[tokio::test]
    async fn opens_embedded_backends_by_name() {
        let dir = TempDir::new().unwrap();
        let cases = [
            ("memory", String::new()),
            ("fjall", dir.path().join("fjall").to_string_lossy().into_owned()),
            ("redb", dir.path().join("kv.redb").to_string_lossy().into_owned()),
        ];
        for (name, locator) in cases {
            let kind: BackendKind = name.parse().unwrap();
            let db = open(kind, &locator, Options::default()).await.unwrap();
            assert_eq!(db.kind(), kind);

            db.create_table(b"users").await.unwrap();
            db.set(b"users", b"alice", b"v1").await.unwrap();
            assert_eq!(db.get(b"users", b"alice").await.unwrap(), b"v1");
            db.close().await.unwrap();
        }
    }

    #[tokio::test]
    async fn bad_locators_fail_with_configuration() {
        let err = open(BackendKind::Redb, "", Options::default()).await.unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::Configuration);

        let err = open(BackendKind::Postgres, "", Options::default()).await.unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::Configuration);

        let err = open(BackendKind::DynamoDb, " ", Options::default()).await.unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::Configuration);
    }

    #[test]
    fn unknown_backend_names_are_rejected() {
        let err = "cassandra".parse::<BackendKind>().unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::Configuration);
    }
}
