use secure_string::SecureString;
use std::fmt::{Debug, Formatter};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::{NoSqlError, NoSqlResult};
use crate::pagination::DEFAULT_PAGE_SIZE;

/// How the DynamoDB driver obtains credentials. Loading itself is left to the
/// AWS SDK; this only selects the mechanism.
#[derive(Clone, Default)]
pub enum CredentialsSource {
    /// The SDK's default provider chain.
    #[default]
    Default,
    /// `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` only.
    Environment,
    /// A named profile from the shared config files.
    Profile(String),
    /// Keys supplied through options.
    Static {
        access_key_id: String,
        secret_access_key: Arc<SecureString>,
    },
}

impl Debug for CredentialsSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialsSource::Default => write!(f, "Default"),
            CredentialsSource::Environment => write!(f, "Environment"),
            CredentialsSource::Profile(name) => write!(f, "Profile({})", name),
            CredentialsSource::Static { access_key_id, .. } => {
                write!(f, "Static({}, ***)", access_key_id)
            }
        }
    }
}

impl PartialEq for CredentialsSource {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (CredentialsSource::Default, CredentialsSource::Default) => true,
            (CredentialsSource::Environment, CredentialsSource::Environment) => true,
            (CredentialsSource::Profile(a), CredentialsSource::Profile(b)) => a == b,
            (
                CredentialsSource::Static {
                    access_key_id: a,
                    secret_access_key: sa,
                },
                CredentialsSource::Static {
                    access_key_id: b,
                    secret_access_key: sb,
                },
            ) => a == b && sa.unsecure() == sb.unsecure(),
            _ => false,
        }
    }
}

/// Read consistency for backends that offer a choice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Consistency {
    #[default]
    Strong,
    Eventual,
}

impl FromStr for Consistency {
    type Err = NoSqlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strong" => Ok(Consistency::Strong),
            "eventual" => Ok(Consistency::Eventual),
            other => Err(NoSqlError::configuration(&format!(
                "invalid consistency '{}', expected strong or eventual",
                other
            ))),
        }
    }
}

/// Driver options. The only public configuration surface; every driver
/// derives its own config object from it when it opens.
///
/// # Examples
///
/// ```rust
/// use nosql::options::{Consistency, Options};
///
/// let options = Options::builder().page_size(50).consistency(Consistency::Eventual).build();
/// assert_eq!(options.page_size(), 50);
///
/// let parsed = Options::from_pairs([("page_size", "50"), ("consistency", "eventual")]).unwrap();
/// assert_eq!(parsed, options);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    credentials: CredentialsSource,
    consistency: Consistency,
    page_size: usize,
    database: Option<String>,
    endpoint_url: Option<String>,
    max_connections: u32,
    lock_timeout: Duration,
    emulated_transactions: bool,
    read_capacity: Option<i64>,
    write_capacity: Option<i64>,
    cache_size: Option<u64>,
    fsync_ms: Option<u16>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            credentials: CredentialsSource::Default,
            consistency: Consistency::Strong,
            page_size: DEFAULT_PAGE_SIZE,
            database: None,
            endpoint_url: None,
            max_connections: 10,
            lock_timeout: Duration::from_secs(30),
            emulated_transactions: true,
            read_capacity: None,
            write_capacity: None,
            cache_size: None,
            fsync_ms: None,
        }
    }
}

impl Options {
    pub fn builder() -> OptionsBuilder {
        OptionsBuilder::default()
    }

    /// Parses string key/value pairs. Unknown keys and malformed values fail
    /// with `Configuration`.
    pub fn from_pairs<I, K, V>(pairs: I) -> NoSqlResult<Options>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut builder = Options::builder();
        let mut credentials: Option<String> = None;
        let mut access_key_id: Option<String> = None;
        let mut secret_access_key: Option<String> = None;

        for (key, value) in pairs {
            let key = key.as_ref().trim();
            let value = value.as_ref().trim();
            builder = match key {
                "credentials" => {
                    credentials = Some(value.to_string());
                    builder
                }
                "access_key_id" => {
                    access_key_id = Some(value.to_string());
                    builder
                }
                "secret_access_key" => {
                    secret_access_key = Some(value.to_string());
                    builder
                }
                "consistency" => builder.consistency(value.parse()?),
                "page_size" => {
                    let size: usize = parse_number(key, value)?;
                    if size == 0 {
                        return Err(NoSqlError::configuration("page_size must be positive"));
                    }
                    builder.page_size(size)
                }
                "database" => builder.database(value),
                "endpoint_url" => builder.endpoint_url(value),
                "max_connections" => builder.max_connections(parse_number(key, value)?),
                "lock_timeout_ms" => {
                    builder.lock_timeout(Duration::from_millis(parse_number(key, value)?))
                }
                "emulated_transactions" => builder.emulated_transactions(parse_bool(key, value)?),
                "read_capacity" => builder.read_capacity(parse_number(key, value)?),
                "write_capacity" => builder.write_capacity(parse_number(key, value)?),
                "cache_size" => builder.cache_size(parse_number(key, value)?),
                "fsync_ms" => builder.fsync_ms(parse_number(key, value)?),
                other => {
                    log::error!("Unknown driver option '{}'", other);
                    return Err(NoSqlError::configuration(&format!(
                        "unknown option '{}'",
                        other
                    )));
                }
            };
        }

        let source = match credentials.as_deref() {
            None if access_key_id.is_some() || secret_access_key.is_some() => {
                static_credentials(access_key_id, secret_access_key)?
            }
            None | Some("default") => CredentialsSource::Default,
            Some("environment") => CredentialsSource::Environment,
            Some("static") => static_credentials(access_key_id, secret_access_key)?,
            Some(other) => match other.strip_prefix("profile:") {
                Some(name) if !name.is_empty() => CredentialsSource::Profile(name.to_string()),
                _ => {
                    return Err(NoSqlError::configuration(&format!(
                        "invalid credentials source '{}'",
                        other
                    )))
                }
            },
        };
        Ok(builder.credentials(source).build())
    }

    pub fn credentials(&self) -> &CredentialsSource {
        &self.credentials
    }

    pub fn consistency(&self) -> Consistency {
        self.consistency
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    pub fn endpoint_url(&self) -> Option<&str> {
        self.endpoint_url.as_deref()
    }

    pub fn max_connections(&self) -> u32 {
        self.max_connections
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    pub fn emulated_transactions(&self) -> bool {
        self.emulated_transactions
    }

    pub fn read_capacity(&self) -> Option<i64> {
        self.read_capacity
    }

    pub fn write_capacity(&self) -> Option<i64> {
        self.write_capacity
    }

    pub fn cache_size(&self) -> Option<u64> {
        self.cache_size
    }

    pub fn fsync_ms(&self) -> Option<u16> {
        self.fsync_ms
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> NoSqlResult<T> {
    value.parse::<T>().map_err(|_| {
        log::error!("Option '{}' expects a number, got '{}'", key, value);
        NoSqlError::configuration(&format!("option '{}' expects a number, got '{}'", key, value))
    })
}

fn parse_bool(key: &str, value: &str) -> NoSqlResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(NoSqlError::configuration(&format!(
            "option '{}' expects a boolean, got '{}'",
            key, value
        ))),
    }
}

fn static_credentials(
    access_key_id: Option<String>,
    secret_access_key: Option<String>,
) -> NoSqlResult<CredentialsSource> {
    match (access_key_id, secret_access_key) {
        (Some(access_key_id), Some(secret)) => Ok(CredentialsSource::Static {
            access_key_id,
            secret_access_key: Arc::new(SecureString::from(secret)),
        }),
        _ => Err(NoSqlError::configuration(
            "static credentials need both access_key_id and secret_access_key",
        )),
    }
}

/// Builder for [`Options`].
#[derive(Debug, Clone, Default)]
pub struct OptionsBuilder {
    options: Options,
}

impl OptionsBuilder {
    pub fn credentials(mut self, credentials: CredentialsSource) -> Self {
        self.options.credentials = credentials;
        self
    }

    pub fn static_credentials(self, access_key_id: &str, secret_access_key: &str) -> Self {
        self.credentials(CredentialsSource::Static {
            access_key_id: access_key_id.to_string(),
            secret_access_key: Arc::new(SecureString::from(secret_access_key.to_string())),
        })
    }

    pub fn consistency(mut self, consistency: Consistency) -> Self {
        self.options.consistency = consistency;
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.options.page_size = page_size.max(1);
        self
    }

    pub fn database(mut self, database: &str) -> Self {
        self.options.database = Some(database.to_string());
        self
    }

    pub fn endpoint_url(mut self, endpoint_url: &str) -> Self {
        self.options.endpoint_url = Some(endpoint_url.to_string());
        self
    }

    pub fn max_connections(mut self, max_connections: u32) -> Self {
        self.options.max_connections = max_connections.max(1);
        self
    }

    pub fn lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.options.lock_timeout = lock_timeout;
        self
    }

    pub fn emulated_transactions(mut self, enabled: bool) -> Self {
        self.options.emulated_transactions = enabled;
        self
    }

    pub fn read_capacity(mut self, units: i64) -> Self {
        self.options.read_capacity = Some(units);
        self
    }

    pub fn write_capacity(mut self, units: i64) -> Self {
        self.options.write_capacity = Some(units);
        self
    }

    pub fn cache_size(mut self, bytes: u64) -> Self {
        self.options.cache_size = Some(bytes);
        self
    }

    pub fn fsync_ms(mut self, millis: u16) -> Self {
        self.options.fsync_ms = Some(millis);
        self
    }

    pub fn build(self) -> Options {
        self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    #[test]
    fn defaults() {
        let options = Options::default();
        assert_eq!(options.credentials(), &CredentialsSource::Default);
        assert_eq!(options.consistency(), Consistency::Strong);
        assert_eq!(options.page_size(), DEFAULT_PAGE_SIZE);
        assert!(options.emulated_transactions());
        assert_eq!(options.lock_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn parses_all_known_keys() {
        let options = Options::from_pairs([
            ("credentials", "profile:dev"),
            ("consistency", "EVENTUAL"),
            ("page_size", "7"),
            ("database", "app"),
            ("endpoint_url", "http://localhost:8000"),
            ("max_connections", "4"),
            ("lock_timeout_ms", "1500"),
            ("emulated_transactions", "false"),
            ("read_capacity", "5"),
            ("write_capacity", "6"),
            ("cache_size", "1048576"),
            ("fsync_ms", "100"),
        ])
        .unwrap();
        assert_eq!(options.credentials(), &CredentialsSource::Profile("dev".into()));
        assert_eq!(options.consistency(), Consistency::Eventual);
        assert_eq!(options.page_size(), 7);
        assert_eq!(options.database(), Some("app"));
        assert_eq!(options.endpoint_url(), Some("http://localhost:8000"));
        assert_eq!(options.max_connections(), 4);
        assert_eq!(options.lock_timeout(), Duration::from_millis(1500));
        assert!(!options.emulated_transactions());
        assert_eq!(options.read_capacity(), Some(5));
        assert_eq!(options.write_capacity(), Some(6));
        assert_eq!(options.cache_size(), Some(1048576));
        assert_eq!(options.fsync_ms(), Some(100));
    }

    #[test]
    fn unknown_key_is_configuration_error() {
        let err = Options::from_pairs([("colour", "blue")]).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::Configuration);
    }

    #[test]
    fn malformed_values_are_configuration_errors() {
        for (key, value) in [
            ("page_size", "many"),
            ("page_size", "0"),
            ("consistency", "sometimes"),
            ("emulated_transactions", "perhaps"),
            ("credentials", "profile:"),
            ("credentials", "magic"),
        ] {
            let err = Options::from_pairs([(key, value)]).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::Configuration, "{}={}", key, value);
        }
    }

    #[test]
    fn static_credentials_need_both_keys() {
        let err = Options::from_pairs([("credentials", "static"), ("access_key_id", "AKIA")]).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::Configuration);

        let options = Options::from_pairs([("access_key_id", "AKIA"), ("secret_access_key", "s3cr3t")]).unwrap();
        match options.credentials() {
            CredentialsSource::Static {
                access_key_id,
                secret_access_key,
            } => {
                assert_eq!(access_key_id, "AKIA");
                assert_eq!(secret_access_key.unsecure(), "s3cr3t");
            }
            other => panic!("unexpected credentials {:?}", other),
        }
    }

    #[test]
    fn debug_hides_secret() {
        let options = Options::builder().static_credentials("AKIA", "s3cr3t").build();
        let debug = format!("{:?}", options);
        assert!(debug.contains("AKIA"));
        assert!(!debug.contains("s3cr3t"));
    }
}
