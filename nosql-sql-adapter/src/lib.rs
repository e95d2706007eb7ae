//! PostgreSQL and MySQL drivers for `nosql`.
//!
//! Each bucket is a two-column table `(nkey, nvalue)` keyed by the binary key.
//! The engines are selected with the `postgres` and `mysql` features.

mod config;
mod dialect;
#[macro_use]
mod driver;
mod error;
#[cfg(feature = "mysql")]
mod mysql;
#[cfg(feature = "postgres")]
mod postgres;

pub use config::SqlConfig;
pub use dialect::Dialect;
pub use error::IdentifierError;
#[cfg(feature = "mysql")]
pub use mysql::MySqlDriver;
#[cfg(feature = "postgres")]
pub use postgres::PostgresDriver;

#[cfg(test)]
mod tests {
    use super::*;
    use nosql::errors::ErrorKind;
    use nosql::options::Options;

    #[ctor::ctor]
    fn init() {
        colog::init();
    }

    #[cfg(feature = "postgres")]
    #[tokio::test]
    async fn postgres_needs_a_url() {
        let err = PostgresDriver::open("  ", &Options::default()).await.err().unwrap();
        assert_eq!(err.kind(), &ErrorKind::Configuration);
    }

    #[cfg(feature = "mysql")]
    #[tokio::test]
    async fn mysql_needs_a_url() {
        let err = MySqlDriver::open("", &Options::default()).await.err().unwrap();
        assert_eq!(err.kind(), &ErrorKind::Configuration);
    }
}
