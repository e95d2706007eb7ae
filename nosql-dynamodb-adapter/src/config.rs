use aws_config::environment::EnvironmentVariableCredentialsProvider;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_dynamodb::config::Credentials;
use nosql::errors::{NoSqlError, NoSqlResult};
use nosql::options::{Consistency, CredentialsSource, Options};
use nosql::staging::StagingConfig;

/// Capacity mode for tables created by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Billing {
    /// `PAY_PER_REQUEST`
    OnDemand,
    Provisioned { read: i64, write: i64 },
}

/// Settings for [`DynamoDbDriver`](crate::DynamoDbDriver), derived from
/// [`Options`].
#[derive(Debug, Clone)]
pub struct DynamoDbConfig {
    region: String,
    credentials: CredentialsSource,
    consistency: Consistency,
    endpoint_url: Option<String>,
    billing: Billing,
    staging: StagingConfig,
}

impl DynamoDbConfig {
    pub fn from_options(region: &str, options: &Options) -> NoSqlResult<DynamoDbConfig> {
        if region.trim().is_empty() {
            return Err(NoSqlError::configuration("dynamodb driver needs an AWS region"));
        }

        let billing = match (options.read_capacity(), options.write_capacity()) {
            (None, None) => Billing::OnDemand,
            (Some(read), Some(write)) if read > 0 && write > 0 => Billing::Provisioned { read, write },
            (Some(_), Some(_)) => {
                return Err(NoSqlError::configuration(
                    "read_capacity and write_capacity must be positive",
                ))
            }
            _ => {
                return Err(NoSqlError::configuration(
                    "read_capacity and write_capacity must be set together",
                ))
            }
        };

        Ok(DynamoDbConfig {
            region: region.trim().to_string(),
            credentials: options.credentials().clone(),
            consistency: options.consistency(),
            endpoint_url: options.endpoint_url().map(str::to_string),
            billing,
            staging: StagingConfig::from_options(options),
        })
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn credentials(&self) -> &CredentialsSource {
        &self.credentials
    }

    pub fn consistency(&self) -> Consistency {
        self.consistency
    }

    /// `ConsistentRead` flag for reads and scans.
    pub fn consistent_read(&self) -> bool {
        self.consistency == Consistency::Strong
    }

    pub fn endpoint_url(&self) -> Option<&str> {
        self.endpoint_url.as_deref()
    }

    pub fn billing(&self) -> Billing {
        self.billing
    }

    pub fn staging(&self) -> &StagingConfig {
        &self.staging
    }

    /// Loads the AWS SDK configuration for the selected credentials mechanism.
    pub(crate) async fn load_sdk_config(&self) -> SdkConfig {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(self.region.clone()));

        loader = match &self.credentials {
            CredentialsSource::Default => loader,
            CredentialsSource::Environment => {
                loader.credentials_provider(EnvironmentVariableCredentialsProvider::new())
            }
            CredentialsSource::Profile(name) => loader.profile_name(name),
            CredentialsSource::Static {
                access_key_id,
                secret_access_key,
            } => loader.credentials_provider(Credentials::new(
                access_key_id.clone(),
                secret_access_key.unsecure().to_string(),
                None,
                None,
                "nosql-static",
            )),
        };

        if let Some(url) = &self.endpoint_url {
            loader = loader.endpoint_url(url);
        }
        loader.load().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nosql::errors::ErrorKind;
    use std::time::Duration;

    #[test]
    fn defaults_to_on_demand_and_strong_reads() {
        let config = DynamoDbConfig::from_options("eu-west-1", &Options::default()).unwrap();
        assert_eq!(config.region(), "eu-west-1");
        assert_eq!(config.billing(), Billing::OnDemand);
        assert!(config.consistent_read());
        assert!(config.staging().emulated_transactions());
    }

    #[test]
    fn provisioned_capacity_needs_both_units() {
        let options = Options::builder().read_capacity(25).write_capacity(10).build();
        let config = DynamoDbConfig::from_options("us-east-1", &options).unwrap();
        assert_eq!(config.billing(), Billing::Provisioned { read: 25, write: 10 });

        let options = Options::builder().read_capacity(25).build();
        let err = DynamoDbConfig::from_options("us-east-1", &options).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::Configuration);

        let options = Options::builder().read_capacity(0).write_capacity(5).build();
        assert!(DynamoDbConfig::from_options("us-east-1", &options).is_err());
    }

    #[test]
    fn carries_staging_and_endpoint_settings() {
        let options = Options::builder()
            .consistency(Consistency::Eventual)
            .endpoint_url("http://localhost:8000")
            .lock_timeout(Duration::from_millis(500))
            .emulated_transactions(false)
            .page_size(5)
            .build();
        let config = DynamoDbConfig::from_options("local", &options).unwrap();
        assert!(!config.consistent_read());
        assert_eq!(config.endpoint_url(), Some("http://localhost:8000"));
        assert_eq!(config.staging().lock_timeout(), Duration::from_millis(500));
        assert!(!config.staging().emulated_transactions());
        assert_eq!(config.staging().page_size(), 5);
    }

    #[test]
    fn empty_region_is_rejected() {
        let err = DynamoDbConfig::from_options("  ", &Options::default()).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::Configuration);
    }
}
