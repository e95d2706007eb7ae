use nosql::driver::{BackendKind, Database, Driver};
use nosql::errors::{ErrorKind, NoSqlError, NoSqlResult};
use nosql::options::Options;
use nosql::staging::{MemoryItemStore, StagingConfig, StagingEngine};
use nosql_backends::AnyDriver;
use futures::FutureExt;
use nosql_dynamodb_adapter::DynamoDbDriver;
use std::env;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::{sleep, Instant};

pub const DYNAMODB_REGION_VAR: &str = "NOSQL_TEST_DYNAMODB_REGION";
pub const POSTGRES_URL_VAR: &str = "NOSQL_TEST_POSTGRES_URL";
pub const MYSQL_URL_VAR: &str = "NOSQL_TEST_MYSQL_URL";

/// Page size that makes a few dozen entries span several pages.
pub const SMALL_PAGE: usize = 7;

/// How long live DynamoDB tables get to settle after create or delete.
const TABLE_SETTLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Runs a test against a fresh context and cleans up afterwards.
///
/// `before` returning `Ok(None)` skips the test. Transient failures
/// (`Unavailable`, `Conflict`) are retried with a fresh context, anything
/// else fails the test at once.
pub async fn run_test<B, BF, T, TF>(before: B, test: T)
where
    B: Fn() -> BF,
    BF: Future<Output = NoSqlResult<Option<TestContext>>>,
    T: Fn(TestContext) -> TF,
    TF: Future<Output = NoSqlResult<()>>,
{
    const MAX_RETRIES: u32 = 3;

    for attempt in 1..=MAX_RETRIES {
        let ctx = match before().await {
            Ok(Some(ctx)) => ctx,
            Ok(None) => return,
            Err(err) => panic!("Before run failed: {}", err),
        };

        let start_time = Instant::now();
        let result = AssertUnwindSafe(test(ctx.clone())).catch_unwind().await;
        let elapsed = start_time.elapsed();
        cleanup(ctx).await;

        match result {
            Ok(Ok(())) => return,
            Ok(Err(err)) if err.is_transient() && attempt < MAX_RETRIES => {
                eprintln!(
                    "\n========== Test Attempt {}/{} Failed (took {:?}) ==========",
                    attempt, MAX_RETRIES, elapsed
                );
                eprintln!("Error: {}", err);
                eprintln!("Retrying in {}ms...\n", 100 * attempt);
                sleep(Duration::from_millis(100 * attempt as u64)).await;
            }
            Ok(Err(err)) => panic!("Test failed after {:?}: {}", elapsed, err),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

/// A database under test plus whatever must outlive it.
#[derive(Clone)]
pub struct TestContext {
    db: Database,
    dynamo: Option<DynamoDbDriver>,
    staging: Option<StagingEngine<MemoryItemStore>>,
    dir: Option<Arc<TempDir>>,
    locator: Option<String>,
    buckets: Arc<parking_lot::Mutex<Vec<Vec<u8>>>>,
}

impl TestContext {
    fn new(db: Database) -> Self {
        TestContext {
            db,
            dynamo: None,
            staging: None,
            dir: None,
            locator: None,
            buckets: Arc::new(parking_lot::Mutex::new(Vec::new())),
        }
    }

    pub fn db(&self) -> Database {
        self.db.clone()
    }

    pub fn kind(&self) -> BackendKind {
        self.db.kind()
    }

    /// Engine behind a staging context, for recovery and fault injection.
    pub fn staging(&self) -> Option<&StagingEngine<MemoryItemStore>> {
        self.staging.as_ref()
    }

    pub fn path(&self) -> Option<&std::path::Path> {
        self.dir.as_deref().map(|dir| dir.path())
    }

    /// Closes the database and opens it again at the same location.
    pub async fn reopen(&mut self) -> NoSqlResult<()> {
        let Some(locator) = self.locator.clone() else {
            return Err(NoSqlError::invalid("only embedded contexts can be reopened"));
        };
        let kind = self.kind();
        self.db.close().await?;
        self.db = Database::new(AnyDriver::open(kind, &locator, &test_options()).await?);
        Ok(())
    }

    /// Creates a fresh bucket, waiting for DynamoDB tables to become active.
    /// The bucket is deleted again by [`cleanup`].
    pub async fn create_bucket(&self, prefix: &str) -> NoSqlResult<Vec<u8>> {
        let bucket = random_bucket(prefix);
        self.db.create_table(&bucket).await?;
        self.buckets.lock().push(bucket.clone());
        self.await_active(&bucket).await?;
        Ok(bucket)
    }

    /// Deletes a bucket and waits until the backend no longer reports it.
    pub async fn delete_bucket(&self, bucket: &[u8]) -> NoSqlResult<()> {
        self.db.delete_table(bucket).await?;
        self.buckets.lock().retain(|b| b != bucket);
        self.await_absent(bucket).await
    }

    pub async fn await_active(&self, bucket: &[u8]) -> NoSqlResult<()> {
        let Some(dynamo) = &self.dynamo else {
            return Ok(());
        };
        let deadline = Instant::now() + TABLE_SETTLE_TIMEOUT;
        while !dynamo.table_status(bucket).await?.is_active() {
            if Instant::now() > deadline {
                return Err(NoSqlError::new("table did not become active", ErrorKind::Unavailable));
            }
            sleep(Duration::from_millis(500)).await;
        }
        Ok(())
    }

    pub async fn await_absent(&self, bucket: &[u8]) -> NoSqlResult<()> {
        let Some(dynamo) = &self.dynamo else {
            return Ok(());
        };
        let deadline = Instant::now() + TABLE_SETTLE_TIMEOUT;
        while dynamo.table_status(bucket).await? != nosql_dynamodb_adapter::TableLifecycle::Absent {
            if Instant::now() > deadline {
                return Err(NoSqlError::new("table was not deleted", ErrorKind::Unavailable));
            }
            sleep(Duration::from_millis(500)).await;
        }
        Ok(())
    }
}

/// Bucket name valid on every backend, SQL identifiers included.
pub fn random_bucket(prefix: &str) -> Vec<u8> {
    format!("{}_{}", prefix, uuid::Uuid::new_v4().simple()).into_bytes()
}

pub fn test_options() -> Options {
    Options::builder()
        .page_size(SMALL_PAGE)
        .lock_timeout(Duration::from_millis(200))
        .build()
}

pub fn create_memory_context() -> NoSqlResult<TestContext> {
    let driver = nosql::memory::MemoryDriver::open(&test_options())?;
    Ok(TestContext::new(Database::new(driver)))
}

pub fn create_staging_context() -> NoSqlResult<TestContext> {
    let config = StagingConfig::from_options(&test_options());
    let engine = StagingEngine::new(MemoryItemStore::new(), config);
    let mut ctx = TestContext::new(Database::new(engine.clone()));
    ctx.staging = Some(engine);
    Ok(ctx)
}

/// Opens an embedded backend in a fresh temporary directory, retrying a few
/// times when the directory cannot be set up.
pub async fn create_embedded_context(kind: BackendKind) -> NoSqlResult<TestContext> {
    const MAX_ATTEMPTS: u32 = 3;
    let mut last_error: Option<NoSqlError> = None;

    for attempt in 1..=MAX_ATTEMPTS {
        let dir = TempDir::new().map_err(|err| {
            NoSqlError::new_with_cause("failed to create temp dir", ErrorKind::Internal, err)
        })?;
        let locator = match kind {
            BackendKind::Redb => dir.path().join("test.redb"),
            _ => dir.path().join("keyspace"),
        };

        let locator = locator.to_string_lossy().into_owned();
        match AnyDriver::open(kind, &locator, &test_options()).await {
            Ok(driver) => {
                let mut ctx = TestContext::new(Database::new(driver));
                ctx.dir = Some(Arc::new(dir));
                ctx.locator = Some(locator);
                return Ok(ctx);
            }
            Err(err) => {
                eprintln!(
                    "Warning: Failed to open {} (attempt {}/{}): {}",
                    kind, attempt, MAX_ATTEMPTS, err
                );
                last_error = Some(err);
                sleep(Duration::from_millis(50 * attempt as u64)).await;
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        NoSqlError::new("failed to create test context", ErrorKind::Internal)
    }))
}

/// Opens a live service backend when its environment variable is set.
/// `Ok(None)` means the suite should be skipped.
pub async fn create_live_context(kind: BackendKind) -> NoSqlResult<Option<TestContext>> {
    let var = match kind {
        BackendKind::DynamoDb => DYNAMODB_REGION_VAR,
        BackendKind::Postgres => POSTGRES_URL_VAR,
        BackendKind::MySql => MYSQL_URL_VAR,
        other => {
            return Err(NoSqlError::invalid(&format!("{} is not a live service", other)));
        }
    };
    let Ok(locator) = env::var(var) else {
        eprintln!("Skipping {} suite: {} is not set", kind, var);
        return Ok(None);
    };

    let driver = AnyDriver::open(kind, &locator, &test_options()).await?;
    let dynamo = match &driver {
        AnyDriver::DynamoDb(dynamo) => Some(dynamo.clone()),
        _ => None,
    };
    let mut ctx = TestContext::new(Database::new(driver));
    ctx.dynamo = dynamo;
    Ok(Some(ctx))
}

/// Drops every bucket the test created, then closes the database.
pub async fn cleanup(ctx: TestContext) {
    let buckets: Vec<Vec<u8>> = ctx.buckets.lock().drain(..).collect();
    for bucket in buckets {
        match ctx.db.delete_table(&bucket).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => eprintln!("Warning: Failed to delete test bucket: {}", err),
        }
    }
    if let Err(err) = ctx.db.close().await {
        eprintln!("Warning: Failed to close database: {}", err);
    }
}
