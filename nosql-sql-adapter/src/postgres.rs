sql_driver! {
    /// Driver over a PostgreSQL database, one table per bucket.
    ///
    /// All calls share a `sqlx` connection pool. Compare-and-swap row-locks
    /// the key it reads with `SELECT ... FOR UPDATE`; update runs at
    /// `SERIALIZABLE` and retries when PostgreSQL aborts it for a
    /// serialization failure.
    PostgresDriver, PostgresInner,
    database = sqlx::Postgres,
    connect = sqlx::postgres::PgConnectOptions,
    dialect = Dialect::Postgres,
    kind = BackendKind::Postgres,
}
