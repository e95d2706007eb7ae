use async_trait::async_trait;
use aws_sdk_dynamodb::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_dynamodb::types::{
    AttributeDefinition, AttributeValue, BillingMode, KeySchemaElement, KeyType,
    ProvisionedThroughput, ScalarAttributeType, TableStatus,
};
use aws_sdk_dynamodb::Client;
use nosql::driver::BackendKind;
use nosql::errors::{ErrorKind, NoSqlError, NoSqlResult};
use nosql::pagination::{ContinuationToken, Page};
use nosql::staging::{ItemStore, Precondition, StoredItem};
use std::error::Error;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::{Billing, DynamoDbConfig};
use crate::error::{is_condition_failure, to_nosql_error};
use crate::item::{condition, decode_item, encode_item, key_attribute, key_string, table_name, KEY};

/// Lifecycle state of a DynamoDB table as reported by `DescribeTable`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableLifecycle {
    Absent,
    Creating,
    Active,
    Updating,
    Deleting,
    /// Any other status the service reports, by name.
    Other(String),
}

impl TableLifecycle {
    /// Items can be read and written.
    pub fn is_active(&self) -> bool {
        matches!(self, TableLifecycle::Active | TableLifecycle::Updating)
    }
}

/// [`ItemStore`] over DynamoDB tables, one table per bucket.
#[derive(Clone)]
pub struct DynamoItemStore {
    inner: Arc<DynamoItemStoreInner>,
}

struct DynamoItemStoreInner {
    client: Client,
    config: DynamoDbConfig,
    closed: AtomicBool,
}

/// Maps `ResourceNotFoundException` to the bucket's `NotFound`, everything
/// else through [`to_nosql_error`].
fn bucket_fault<E, R>(bucket: &[u8], error: SdkError<E, R>) -> NoSqlError
where
    E: ProvideErrorMetadata + Error + Send + Sync + 'static,
    R: Debug + Send + Sync + 'static,
{
    match error.code() {
        Some("ResourceNotFoundException") => NoSqlError::bucket_not_found(bucket),
        _ => to_nosql_error(error),
    }
}

fn build_error(error: aws_sdk_dynamodb::error::BuildError) -> NoSqlError {
    NoSqlError::new_with_cause("invalid DynamoDB request", ErrorKind::Invalid, error)
}

impl DynamoItemStore {
    pub fn new(client: Client, config: DynamoDbConfig) -> Self {
        DynamoItemStore {
            inner: Arc::new(DynamoItemStoreInner {
                client,
                config,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn client(&self) -> &Client {
        &self.inner.client
    }

    fn ensure_open(&self) -> NoSqlResult<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(NoSqlError::closed());
        }
        Ok(())
    }

    /// Cheapest authenticated call: `ListTables` with a limit of one.
    pub(crate) async fn ping(&self) -> NoSqlResult<()> {
        self.inner
            .client
            .list_tables()
            .limit(1)
            .send()
            .await
            .map_err(to_nosql_error)?;
        Ok(())
    }

    pub async fn table_status(&self, bucket: &[u8]) -> NoSqlResult<TableLifecycle> {
        self.ensure_open()?;
        let table = table_name(bucket)?;
        let output = match self.inner.client.describe_table().table_name(&table).send().await {
            Ok(output) => output,
            Err(err) if err.code() == Some("ResourceNotFoundException") => {
                return Ok(TableLifecycle::Absent)
            }
            Err(err) => return Err(to_nosql_error(err)),
        };

        let status = output.table().and_then(|t| t.table_status());
        Ok(match status {
            None => TableLifecycle::Other("UNKNOWN".to_string()),
            Some(TableStatus::Active) => TableLifecycle::Active,
            Some(TableStatus::Creating) => TableLifecycle::Creating,
            Some(TableStatus::Updating) => TableLifecycle::Updating,
            Some(TableStatus::Deleting) => TableLifecycle::Deleting,
            Some(other) => TableLifecycle::Other(other.as_str().to_string()),
        })
    }
}

#[async_trait]
impl ItemStore for DynamoItemStore {
    async fn create_bucket(&self, bucket: &[u8]) -> NoSqlResult<()> {
        self.ensure_open()?;
        let table = table_name(bucket)?;

        let attribute = AttributeDefinition::builder()
            .attribute_name(KEY)
            .attribute_type(ScalarAttributeType::S)
            .build()
            .map_err(build_error)?;
        let key_schema = KeySchemaElement::builder()
            .attribute_name(KEY)
            .key_type(KeyType::Hash)
            .build()
            .map_err(build_error)?;

        let mut request = self
            .inner
            .client
            .create_table()
            .table_name(&table)
            .attribute_definitions(attribute)
            .key_schema(key_schema);

        request = match self.inner.config.billing() {
            Billing::OnDemand => request.billing_mode(BillingMode::PayPerRequest),
            Billing::Provisioned { read, write } => request
                .billing_mode(BillingMode::Provisioned)
                .provisioned_throughput(
                    ProvisionedThroughput::builder()
                        .read_capacity_units(read)
                        .write_capacity_units(write)
                        .build()
                        .map_err(build_error)?,
                ),
        };

        match request.send().await {
            Ok(_) => Ok(()),
            Err(err) if err.code() == Some("ResourceInUseException") => {
                Err(NoSqlError::bucket_exists(bucket))
            }
            Err(err) => Err(to_nosql_error(err)),
        }
    }

    async fn delete_bucket(&self, bucket: &[u8]) -> NoSqlResult<()> {
        self.ensure_open()?;
        let table = table_name(bucket)?;
        self.inner
            .client
            .delete_table()
            .table_name(table)
            .send()
            .await
            .map_err(|err| bucket_fault(bucket, err))?;
        Ok(())
    }

    async fn load(&self, bucket: &[u8], key: &[u8]) -> NoSqlResult<Option<StoredItem>> {
        self.ensure_open()?;
        let table = table_name(bucket)?;
        let output = self
            .inner
            .client
            .get_item()
            .table_name(table)
            .set_key(Some(key_attribute(key_string(bucket, key)?)))
            .consistent_read(self.inner.config.consistent_read())
            .send()
            .await
            .map_err(|err| bucket_fault(bucket, err))?;

        match output.item() {
            Some(item) => Ok(Some(decode_item(item)?)),
            None => Ok(None),
        }
    }

    async fn store(
        &self,
        bucket: &[u8],
        item: StoredItem,
        precondition: Precondition,
    ) -> NoSqlResult<bool> {
        self.ensure_open()?;
        let table = table_name(bucket)?;
        let attributes = encode_item(bucket, &item)?;
        let condition = condition(&precondition);

        let result = self
            .inner
            .client
            .put_item()
            .table_name(table)
            .set_item(Some(attributes))
            .set_condition_expression(condition.expression)
            .set_expression_attribute_values(condition.values)
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(err) if is_condition_failure(&err) => Ok(false),
            Err(err) => Err(bucket_fault(bucket, err)),
        }
    }

    async fn remove(&self, bucket: &[u8], key: &[u8], precondition: Precondition) -> NoSqlResult<bool> {
        self.ensure_open()?;
        let table = table_name(bucket)?;
        let condition = condition(&precondition);

        let result = self
            .inner
            .client
            .delete_item()
            .table_name(table)
            .set_key(Some(key_attribute(key_string(bucket, key)?)))
            .set_condition_expression(condition.expression)
            .set_expression_attribute_values(condition.values)
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(err) if is_condition_failure(&err) => Ok(false),
            Err(err) => Err(bucket_fault(bucket, err)),
        }
    }

    async fn scan(
        &self,
        bucket: &[u8],
        token: Option<ContinuationToken>,
        limit: usize,
    ) -> NoSqlResult<Page<StoredItem>> {
        self.ensure_open()?;
        let table = table_name(bucket)?;
        let start = match &token {
            Some(token) => Some(key_attribute(key_string(bucket, token.as_bytes())?)),
            None => None,
        };

        let output = self
            .inner
            .client
            .scan()
            .table_name(table)
            .limit(i32::try_from(limit.max(1)).unwrap_or(i32::MAX))
            .consistent_read(self.inner.config.consistent_read())
            .set_exclusive_start_key(start)
            .send()
            .await
            .map_err(|err| bucket_fault(bucket, err))?;

        let items = output
            .items()
            .iter()
            .map(|item| decode_item(item).map_err(NoSqlError::from))
            .collect::<NoSqlResult<Vec<_>>>()?;

        let next = match output.last_evaluated_key().and_then(|key| key.get(KEY)) {
            Some(AttributeValue::S(last)) => Some(ContinuationToken(last.as_bytes().to_vec())),
            Some(_) => {
                return Err(NoSqlError::new(
                    "LastEvaluatedKey has a non-string nkey",
                    ErrorKind::Encoding,
                ))
            }
            None => None,
        };
        Ok(Page { items, next })
    }

    async fn close(&self) -> NoSqlResult<()> {
        self.inner.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn kind(&self) -> BackendKind {
        BackendKind::DynamoDb
    }

    fn backend_version(&self) -> String {
        format!("DynamoDB {} (aws-sdk-dynamodb)", self.inner.config.region())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_activity() {
        assert!(TableLifecycle::Active.is_active());
        assert!(TableLifecycle::Updating.is_active());
        assert!(!TableLifecycle::Creating.is_active());
        assert!(!TableLifecycle::Absent.is_active());
        assert!(!TableLifecycle::Other("ARCHIVED".to_string()).is_active());
    }
}
