sql_driver! {
    /// Driver over a MySQL or MariaDB database, one InnoDB table per bucket.
    ///
    /// Compare-and-swap and update row-lock what they read with
    /// `SELECT ... FOR UPDATE` inside one transaction; InnoDB also locks the gap
    /// of an absent key. Keys are limited to 767 bytes by the `VARBINARY`
    /// primary key.
    MySqlDriver, MySqlInner,
    database = sqlx::MySql,
    connect = sqlx::mysql::MySqlConnectOptions,
    dialect = Dialect::MySql,
    kind = BackendKind::MySql,
}
