use async_trait::async_trait;
use aws_sdk_dynamodb::Client;
use nosql::driver::{BackendKind, Driver};
use nosql::entry::{validate_bucket, Entry};
use nosql::errors::NoSqlResult;
use nosql::options::Options;
use nosql::staging::{RecoveryReport, StagingEngine};
use nosql::transaction::{CasOutcome, Transaction, TxOutcome};

use crate::config::DynamoDbConfig;
use crate::store::{DynamoItemStore, TableLifecycle};

/// Driver over Amazon DynamoDB, one table per bucket.
///
/// Single-key operations map onto one conditional `PutItem`, `DeleteItem` or
/// `GetItem`. Multi-key updates go through the staging protocol of
/// [`nosql::staging`], since DynamoDB items carry their own lock attributes
/// instead of relying on `TransactWriteItems`.
///
/// `create_table` returns as soon as the service accepts the request; the
/// table is usable once [`table_status`](DynamoDbDriver::table_status)
/// reports it active. Until then operations on it may fail with `NotFound`.
///
/// When a compare-and-swap loses, the `current` value in the outcome comes
/// from a consistent read issued after the failed conditional write. Another
/// writer may have changed the item in between, so treat it as advisory.
#[derive(Clone)]
pub struct DynamoDbDriver {
    engine: StagingEngine<DynamoItemStore>,
}

impl DynamoDbDriver {
    /// Connects to DynamoDB in `region` and checks the credentials with a
    /// `ListTables` call.
    pub async fn open(region: &str, options: &Options) -> NoSqlResult<DynamoDbDriver> {
        DynamoDbDriver::with_config(DynamoDbConfig::from_options(region, options)?).await
    }

    pub async fn with_config(config: DynamoDbConfig) -> NoSqlResult<DynamoDbDriver> {
        let sdk_config = config.load_sdk_config().await;
        let client = Client::new(&sdk_config);
        let staging = config.staging().clone();
        let region = config.region().to_string();

        let store = DynamoItemStore::new(client, config);
        store.ping().await.map_err(|err| {
            log::error!("Failed to reach DynamoDB in {}: {}", region, err);
            err
        })?;
        log::debug!("Opened DynamoDB driver in {}", region);

        Ok(DynamoDbDriver {
            engine: StagingEngine::new(store, staging),
        })
    }

    pub fn client(&self) -> &Client {
        self.engine.item_store().client()
    }

    /// Current lifecycle state of the bucket's table.
    pub async fn table_status(&self, bucket: &[u8]) -> NoSqlResult<TableLifecycle> {
        validate_bucket(bucket)?;
        self.engine.item_store().table_status(bucket).await
    }

    /// Finishes or reclaims staged transactions abandoned by crashed writers
    /// whose records live in `bucket`.
    pub async fn recover(&self, bucket: &[u8]) -> NoSqlResult<RecoveryReport> {
        let report = self.engine.recover(bucket).await?;
        if report.rolled_forward + report.rolled_back > 0 {
            log::warn!(
                "Recovered {} committed and {} abandoned transaction(s)",
                report.rolled_forward,
                report.rolled_back
            );
        }
        Ok(report)
    }
}

#[async_trait]
impl Driver for DynamoDbDriver {
    async fn close(&self) -> NoSqlResult<()> {
        self.engine.close().await
    }

    async fn create_table(&self, bucket: &[u8]) -> NoSqlResult<()> {
        self.engine.create_table(bucket).await
    }

    async fn delete_table(&self, bucket: &[u8]) -> NoSqlResult<()> {
        self.engine.delete_table(bucket).await
    }

    async fn get(&self, bucket: &[u8], key: &[u8]) -> NoSqlResult<Vec<u8>> {
        self.engine.get(bucket, key).await
    }

    async fn set(&self, bucket: &[u8], key: &[u8], value: &[u8]) -> NoSqlResult<()> {
        self.engine.set(bucket, key, value).await
    }

    async fn del(&self, bucket: &[u8], key: &[u8]) -> NoSqlResult<()> {
        self.engine.del(bucket, key).await
    }

    async fn list(&self, bucket: &[u8]) -> NoSqlResult<Vec<Entry>> {
        self.engine.list(bucket).await
    }

    async fn update(&self, tx: Transaction) -> NoSqlResult<TxOutcome> {
        self.engine.update(tx).await
    }

    async fn compare_and_swap(
        &self,
        bucket: &[u8],
        key: &[u8],
        old: Option<&[u8]>,
        new: &[u8],
    ) -> NoSqlResult<CasOutcome> {
        self.engine.compare_and_swap(bucket, key, old, new).await
    }

    fn kind(&self) -> BackendKind {
        BackendKind::DynamoDb
    }

    fn backend_version(&self) -> String {
        self.engine.backend_version()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nosql::errors::ErrorKind;

    #[ctor::ctor]
    fn init() {
        colog::init();
    }

    #[tokio::test]
    async fn open_rejects_bad_configuration() {
        let err = DynamoDbDriver::open("", &Options::default()).await.err().unwrap();
        assert_eq!(err.kind(), &ErrorKind::Configuration);

        let options = Options::builder().write_capacity(5).build();
        let err = DynamoDbDriver::open("eu-west-1", &options).await.err().unwrap();
        assert_eq!(err.kind(), &ErrorKind::Configuration);
    }
}
