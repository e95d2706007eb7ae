//! Driver body shared by the PostgreSQL and MySQL drivers.
//!
//! The engines differ only in SQL text, error codes and a few session
//! details, all answered by [`Dialect`](crate::Dialect). [`sql_driver!`]
//! stamps out the driver for one `sqlx` database type.

use nosql::entry::display_bytes;
use nosql::errors::NoSqlError;

/// Attempts of an update whose transaction lost a serialization race.
pub(crate) const MAX_UPDATE_ATTEMPTS: usize = 5;

/// Logs faults other than expected outcomes and adds bucket/key context.
pub(crate) fn fail(err: NoSqlError, action: &str, bucket: &[u8], key: &[u8]) -> NoSqlError {
    if !err.is_not_found() {
        log::error!(
            "Failed to {} {}/{}: {}",
            action,
            display_bytes(bucket),
            display_bytes(key),
            err
        );
    }
    err.context(action, bucket, key)
}

macro_rules! sql_driver {
    (
        $(#[$meta:meta])*
        $driver:ident, $inner:ident,
        database = $db:ty,
        connect = $connect:ty,
        dialect = $dialect:expr,
        kind = $kind:expr $(,)?
    ) => {
        use async_trait::async_trait;
        use nosql::driver::{BackendKind, Driver};
        use nosql::entry::{display_bytes, validate_bucket, validate_key, Entry};
        use nosql::errors::{ErrorKind, NoSqlError, NoSqlResult};
        use nosql::options::Options;
        use nosql::pagination::{keyset_page, list_all, ContinuationToken, Page, PageSource};
        use nosql::transaction::{CasOutcome, Transaction, TxOutcome, WriteSet};
        use sqlx::pool::{PoolConnection, PoolOptions};
        use sqlx::{Connection, Pool, Row};
        use std::str::FromStr;
        use std::sync::Arc;

        use $crate::config::SqlConfig;
        use $crate::dialect::{Dialect, SqlFailure};
        use $crate::driver::{fail, MAX_UPDATE_ATTEMPTS};
        use $crate::error::{bucket_error, failure, to_nosql_error};

        const DIALECT: Dialect = $dialect;

        type DbRow = <$db as sqlx::Database>::Row;
        type DbConnection = <$db as sqlx::Database>::Connection;

        $(#[$meta])*
        #[derive(Clone)]
        pub struct $driver {
            inner: Arc<$inner>,
        }

        struct $inner {
            pool: Pool<$db>,
            config: SqlConfig,
            server_version: String,
        }

        fn sql_error(err: sqlx::Error) -> NoSqlError {
            to_nosql_error(DIALECT, err)
        }

        fn read_pair(row: &DbRow) -> NoSqlResult<(Vec<u8>, Vec<u8>)> {
            let key: Vec<u8> = row.try_get(0).map_err(sql_error)?;
            let value: Vec<u8> = row.try_get(1).map_err(sql_error)?;
            Ok((key, value))
        }

        fn read_value(row: Option<DbRow>) -> NoSqlResult<Option<Vec<u8>>> {
            match row {
                Some(row) => Ok(Some(row.try_get(0).map_err(sql_error)?)),
                None => Ok(None),
            }
        }

        /// Begins a transaction on `conn` at the given isolation level.
        async fn begin_isolated<'c>(
            conn: &'c mut PoolConnection<$db>,
            isolation: &str,
        ) -> NoSqlResult<sqlx::Transaction<'c, $db>> {
            if DIALECT.isolation_precedes_begin() {
                sqlx::Executor::execute(&mut **conn, sqlx::raw_sql(isolation))
                    .await
                    .map_err(sql_error)?;
            }
            let mut tx = Connection::begin(&mut **conn).await.map_err(sql_error)?;
            if !DIALECT.isolation_precedes_begin() {
                sqlx::Executor::execute(&mut *tx, sqlx::raw_sql(isolation))
                    .await
                    .map_err(sql_error)?;
            }
            Ok(tx)
        }

        impl $driver {
            /// Connects to the database at `url` and checks it answers `SELECT 1`.
            pub async fn open(url: &str, options: &Options) -> NoSqlResult<$driver> {
                $driver::with_config(SqlConfig::from_options(url, options)?).await
            }

            pub async fn with_config(config: SqlConfig) -> NoSqlResult<$driver> {
                let mut connect = <$connect>::from_str(config.url()).map_err(sql_error)?;
                if let Some(database) = config.database() {
                    connect = connect.database(database);
                }

                let pool = PoolOptions::<$db>::new()
                    .max_connections(config.max_connections())
                    .connect_with(connect)
                    .await
                    .map_err(|err| {
                        log::error!("Failed to connect to {}: {}", config.redacted_url(), err);
                        sql_error(err)
                    })?;

                sqlx::query("SELECT 1").execute(&pool).await.map_err(|err| {
                    log::error!(
                        "{} at {} is not answering: {}",
                        DIALECT.name(),
                        config.redacted_url(),
                        err
                    );
                    sql_error(err)
                })?;

                let server_version = match sqlx::query_scalar::<_, String>(DIALECT.version_query())
                    .fetch_one(&pool)
                    .await
                {
                    Ok(version) => version,
                    Err(err) => {
                        log::warn!("Failed to read {} server version: {}", DIALECT.name(), err);
                        "unknown".to_string()
                    }
                };
                log::debug!(
                    "Opened {} {} at {} with up to {} connection(s)",
                    DIALECT.name(),
                    server_version,
                    config.redacted_url(),
                    config.max_connections()
                );

                Ok($driver {
                    inner: Arc::new($inner {
                        pool,
                        config,
                        server_version,
                    }),
                })
            }

            pub fn pool(&self) -> &Pool<$db> {
                &self.inner.pool
            }

            pub fn config(&self) -> &SqlConfig {
                &self.inner.config
            }
        }

        #[async_trait]
        impl Driver for $driver {
            async fn close(&self) -> NoSqlResult<()> {
                if !self.inner.pool.is_closed() {
                    self.inner.pool.close().await;
                    log::debug!(
                        "Closed {} pool for {}",
                        DIALECT.name(),
                        self.inner.config.redacted_url()
                    );
                }
                Ok(())
            }

            async fn create_table(&self, bucket: &[u8]) -> NoSqlResult<()> {
                validate_bucket(bucket)?;
                let table = DIALECT.table_name(bucket)?;
                let result = sqlx::query(&DIALECT.create_table(&table))
                    .execute(&self.inner.pool)
                    .await;
                match result {
                    Ok(_) => {
                        log::debug!("Created bucket {}", display_bytes(bucket));
                        Ok(())
                    }
                    // a concurrent CREATE TABLE can also collide on the catalog's unique index
                    Err(err)
                        if matches!(
                            failure(DIALECT, &err),
                            SqlFailure::TableExists | SqlFailure::DuplicateKey
                        ) =>
                    {
                        Err(NoSqlError::bucket_exists(bucket))
                    }
                    Err(err) => {
                        log::error!("Failed to create bucket {}: {}", display_bytes(bucket), err);
                        Err(sql_error(err).bucket_context("create", bucket))
                    }
                }
            }

            async fn delete_table(&self, bucket: &[u8]) -> NoSqlResult<()> {
                validate_bucket(bucket)?;
                let table = DIALECT.table_name(bucket)?;
                sqlx::query(&DIALECT.drop_table(&table))
                    .execute(&self.inner.pool)
                    .await
                    .map_err(|err| {
                        let err = bucket_error(DIALECT, bucket, err);
                        if !err.is_not_found() {
                            log::error!("Failed to delete bucket {}: {}", display_bytes(bucket), err);
                        }
                        err
                    })?;
                log::debug!("Deleted bucket {}", display_bytes(bucket));
                Ok(())
            }

            async fn get(&self, bucket: &[u8], key: &[u8]) -> NoSqlResult<Vec<u8>> {
                validate_key(bucket, key)?;
                let table = DIALECT.table_name(bucket)?;
                let row = sqlx::query(&DIALECT.select_value(&table, false))
                    .bind(key)
                    .fetch_optional(&self.inner.pool)
                    .await
                    .map_err(|err| fail(bucket_error(DIALECT, bucket, err), "get", bucket, key))?;
                read_value(row)?.ok_or_else(|| NoSqlError::not_found(bucket, key))
            }

            async fn set(&self, bucket: &[u8], key: &[u8], value: &[u8]) -> NoSqlResult<()> {
                validate_key(bucket, key)?;
                let table = DIALECT.table_name(bucket)?;
                sqlx::query(&DIALECT.upsert(&table))
                    .bind(key)
                    .bind(value)
                    .execute(&self.inner.pool)
                    .await
                    .map_err(|err| fail(bucket_error(DIALECT, bucket, err), "set", bucket, key))?;
                Ok(())
            }

            async fn del(&self, bucket: &[u8], key: &[u8]) -> NoSqlResult<()> {
                validate_key(bucket, key)?;
                let table = DIALECT.table_name(bucket)?;
                sqlx::query(&DIALECT.delete(&table))
                    .bind(key)
                    .execute(&self.inner.pool)
                    .await
                    .map_err(|err| fail(bucket_error(DIALECT, bucket, err), "delete", bucket, key))?;
                Ok(())
            }

            async fn list(&self, bucket: &[u8]) -> NoSqlResult<Vec<Entry>> {
                validate_bucket(bucket)?;
                let table = DIALECT.table_name(bucket)?;
                let result = async {
                    let mut conn = self.inner.pool.acquire().await.map_err(sql_error)?;
                    let mut tx = begin_isolated(&mut conn, DIALECT.repeatable_read()).await?;
                    let entries = {
                        let mut pages = KeysetPages {
                            conn: &mut *tx,
                            bucket,
                            table: &table,
                            page_size: self.inner.config.page_size(),
                        };
                        list_all(&mut pages).await?
                    };
                    tx.commit().await.map_err(sql_error)?;
                    Ok::<_, NoSqlError>(entries)
                }
                .await;

                result.map_err(|err| {
                    if !err.is_not_found() {
                        log::error!("Failed to list {}: {}", display_bytes(bucket), err);
                    }
                    err.bucket_context("list", bucket)
                })
            }

            async fn update(&self, tx: Transaction) -> NoSqlResult<TxOutcome> {
                tx.validate()?;
                if tx.is_empty() {
                    return Ok(TxOutcome::default());
                }
                self.inner.update(&tx).await.map_err(|err| {
                    if !err.is_not_found() {
                        log::error!("Update of {} operation(s) failed: {}", tx.len(), err);
                    }
                    err
                })
            }

            async fn compare_and_swap(
                &self,
                bucket: &[u8],
                key: &[u8],
                old: Option<&[u8]>,
                new: &[u8],
            ) -> NoSqlResult<CasOutcome> {
                validate_key(bucket, key)?;
                let table = DIALECT.table_name(bucket)?;
                self.inner
                    .compare_and_swap(bucket, &table, key, old, new)
                    .await
                    .map_err(|err| fail(err, "compare-and-swap", bucket, key))
            }

            fn kind(&self) -> BackendKind {
                $kind
            }

            fn backend_version(&self) -> String {
                format!("{} {}", DIALECT.name(), self.inner.server_version)
            }
        }

        impl $inner {
            async fn compare_and_swap(
                &self,
                bucket: &[u8],
                table: &str,
                key: &[u8],
                old: Option<&[u8]>,
                new: &[u8],
            ) -> NoSqlResult<CasOutcome> {
                let mut tx = self.pool.begin().await.map_err(sql_error)?;

                let Some(old) = old else {
                    // a concurrent inserter waits on the winner's key until it commits
                    let inserted = sqlx::query(&DIALECT.insert(table))
                        .bind(key)
                        .bind(new)
                        .execute(&mut *tx)
                        .await;
                    return match inserted {
                        Ok(_) => {
                            tx.commit().await.map_err(sql_error)?;
                            Ok(CasOutcome::swapped(None))
                        }
                        Err(err) if failure(DIALECT, &err) == SqlFailure::DuplicateKey => {
                            tx.rollback().await.map_err(sql_error)?;
                            let row = sqlx::query(&DIALECT.select_value(table, false))
                                .bind(key)
                                .fetch_optional(&self.pool)
                                .await
                                .map_err(|err| bucket_error(DIALECT, bucket, err))?;
                            Ok(CasOutcome::mismatch(read_value(row)?))
                        }
                        Err(err) => Err(bucket_error(DIALECT, bucket, err)),
                    };
                };

                let row = sqlx::query(&DIALECT.select_value(table, true))
                    .bind(key)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(|err| bucket_error(DIALECT, bucket, err))?;
                let current = read_value(row)?;

                let outcome = CasOutcome::evaluate(current.as_deref(), Some(old));
                if outcome.swapped {
                    sqlx::query(&DIALECT.update_value(table))
                        .bind(new)
                        .bind(key)
                        .execute(&mut *tx)
                        .await
                        .map_err(sql_error)?;
                }
                tx.commit().await.map_err(sql_error)?;
                Ok(outcome)
            }

            /// Runs the update, starting over when the database aborts it
            /// for a serialization failure or deadlock.
            async fn update(&self, tx: &Transaction) -> NoSqlResult<TxOutcome> {
                let mut attempt = 1;
                loop {
                    match self.try_update(tx).await {
                        Err(err) if err.kind() == &ErrorKind::Conflict && attempt < MAX_UPDATE_ATTEMPTS => {
                            log::debug!("Retrying update after attempt {}: {}", attempt, err);
                            attempt += 1;
                        }
                        result => return result,
                    }
                }
            }

            /// Locks every touched key, evaluates the operations and writes
            /// the net changes, all in one transaction. The isolation level
            /// makes two updates that both read a key as absent conflict
            /// instead of both succeeding. Dropping the transaction on an
            /// error rolls it back.
            async fn try_update(&self, tx: &Transaction) -> NoSqlResult<TxOutcome> {
                let mut conn = self.pool.acquire().await.map_err(sql_error)?;
                let mut sql_tx = begin_isolated(&mut conn, DIALECT.update_isolation()).await?;

                // a fixed lock order keeps concurrent updates from deadlocking
                let mut keys = tx.touched_keys();
                keys.sort();

                let mut write_set = WriteSet::new();
                for (bucket, key) in keys {
                    let table = DIALECT.table_name(bucket)?;
                    let row = sqlx::query(&DIALECT.select_value(&table, true))
                        .bind(key)
                        .fetch_optional(&mut *sql_tx)
                        .await
                        .map_err(|err| bucket_error(DIALECT, bucket, err).context("lock", bucket, key))?;
                    write_set.load(bucket, key, read_value(row)?);
                }

                let outcome = write_set.execute(tx)?;

                for change in write_set.changes() {
                    let table = DIALECT.table_name(&change.bucket)?;
                    let result = match &change.value {
                        Some(value) => {
                            sqlx::query(&DIALECT.upsert(&table))
                                .bind(change.key.as_slice())
                                .bind(value.as_slice())
                                .execute(&mut *sql_tx)
                                .await
                        }
                        None => {
                            sqlx::query(&DIALECT.delete(&table))
                                .bind(change.key.as_slice())
                                .execute(&mut *sql_tx)
                                .await
                        }
                    };
                    result.map_err(|err| {
                        bucket_error(DIALECT, &change.bucket, err).context("write", &change.bucket, &change.key)
                    })?;
                }

                sql_tx.commit().await.map_err(sql_error)?;
                Ok(outcome)
            }
        }

        /// Keyset pages over one `REPEATABLE READ` transaction.
        struct KeysetPages<'a> {
            conn: &'a mut DbConnection,
            bucket: &'a [u8],
            table: &'a str,
            page_size: usize,
        }

        #[async_trait]
        impl<'a> PageSource for KeysetPages<'a> {
            type Item = (Vec<u8>, Vec<u8>);

            async fn fetch(&mut self, token: Option<ContinuationToken>) -> NoSqlResult<Page<Self::Item>> {
                // one extra row tells whether another page follows
                let limit = i64::try_from(self.page_size.max(1) + 1).unwrap_or(i64::MAX);
                let rows = match &token {
                    None => {
                        let sql = DIALECT.first_page(self.table);
                        sqlx::query(&sql).bind(limit).fetch_all(&mut *self.conn).await
                    }
                    Some(after) => {
                        let sql = DIALECT.next_page(self.table);
                        sqlx::query(&sql)
                            .bind(after.as_bytes())
                            .bind(limit)
                            .fetch_all(&mut *self.conn)
                            .await
                    }
                }
                .map_err(|err| bucket_error(DIALECT, self.bucket, err))?;

                keyset_page(rows.iter().map(read_pair), self.page_size)
            }

            fn decode(&self, item: Self::Item) -> NoSqlResult<Option<Entry>> {
                let (key, value) = item;
                Ok(Some(Entry::new(self.bucket, key, value)))
            }
        }
    };
}
