//! SQL text and error codes that differ between PostgreSQL and MySQL.

use crate::error::IdentifierError;

/// What a failed statement means to the drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SqlFailure {
    DuplicateKey,
    MissingTable,
    TableExists,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    MySql,
}

impl Dialect {
    fn max_identifier_len(&self) -> usize {
        match self {
            Dialect::Postgres => 63,
            Dialect::MySql => 64,
        }
    }

    fn quote(&self, identifier: &str) -> String {
        match self {
            Dialect::Postgres => format!("\"{}\"", identifier),
            Dialect::MySql => format!("`{}`", identifier),
        }
    }

    /// Quoted table name for a bucket. Bucket names must be plain ASCII
    /// identifiers: letters, digits and `_`, not starting with a digit.
    pub fn table_name(&self, bucket: &[u8]) -> Result<String, IdentifierError> {
        if bucket.is_empty() {
            return Err(IdentifierError::Empty);
        }
        let max = self.max_identifier_len();
        if bucket.len() > max {
            return Err(IdentifierError::TooLong(bucket.len(), max));
        }
        let valid_start = bucket[0].is_ascii_alphabetic() || bucket[0] == b'_';
        let valid_rest = bucket.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'_');
        if !valid_start || !valid_rest {
            return Err(IdentifierError::Invalid(
                String::from_utf8_lossy(bucket).into_owned(),
            ));
        }
        // ASCII checked above
        Ok(self.quote(&String::from_utf8_lossy(bucket)))
    }

    fn param(&self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${}", index),
            Dialect::MySql => "?".to_string(),
        }
    }

    pub(crate) fn create_table(&self, table: &str) -> String {
        match self {
            Dialect::Postgres => format!(
                "CREATE TABLE {} (nkey BYTEA PRIMARY KEY, nvalue BYTEA NOT NULL)",
                table
            ),
            Dialect::MySql => format!(
                "CREATE TABLE {} (nkey VARBINARY(767) NOT NULL PRIMARY KEY, nvalue LONGBLOB NOT NULL)",
                table
            ),
        }
    }

    pub(crate) fn drop_table(&self, table: &str) -> String {
        format!("DROP TABLE {}", table)
    }

    /// Reads one value; `for_update` takes a row lock until the transaction ends.
    pub(crate) fn select_value(&self, table: &str, for_update: bool) -> String {
        let lock = if for_update { " FOR UPDATE" } else { "" };
        format!("SELECT nvalue FROM {} WHERE nkey = {}{}", table, self.param(1), lock)
    }

    pub(crate) fn insert(&self, table: &str) -> String {
        format!(
            "INSERT INTO {} (nkey, nvalue) VALUES ({}, {})",
            table,
            self.param(1),
            self.param(2)
        )
    }

    pub(crate) fn upsert(&self, table: &str) -> String {
        match self {
            Dialect::Postgres => format!(
                "INSERT INTO {} (nkey, nvalue) VALUES ($1, $2) ON CONFLICT (nkey) DO UPDATE SET nvalue = EXCLUDED.nvalue",
                table
            ),
            Dialect::MySql => format!(
                "INSERT INTO {} (nkey, nvalue) VALUES (?, ?) ON DUPLICATE KEY UPDATE nvalue = VALUES(nvalue)",
                table
            ),
        }
    }

    /// Binds the new value first, then the key.
    pub(crate) fn update_value(&self, table: &str) -> String {
        format!(
            "UPDATE {} SET nvalue = {} WHERE nkey = {}",
            table,
            self.param(1),
            self.param(2)
        )
    }

    pub(crate) fn delete(&self, table: &str) -> String {
        format!("DELETE FROM {} WHERE nkey = {}", table, self.param(1))
    }

    /// First keyset page; binds the limit.
    pub(crate) fn first_page(&self, table: &str) -> String {
        format!(
            "SELECT nkey, nvalue FROM {} ORDER BY nkey LIMIT {}",
            table,
            self.param(1)
        )
    }

    /// Keyset page after a key; binds the last key seen, then the limit.
    pub(crate) fn next_page(&self, table: &str) -> String {
        format!(
            "SELECT nkey, nvalue FROM {} WHERE nkey > {} ORDER BY nkey LIMIT {}",
            table,
            self.param(1),
            self.param(2)
        )
    }

    pub(crate) fn repeatable_read(&self) -> &'static str {
        "SET TRANSACTION ISOLATION LEVEL REPEATABLE READ"
    }

    /// Isolation of multi-key updates. PostgreSQL's `FOR UPDATE` locks
    /// nothing for an absent row, so it needs `SERIALIZABLE` to make two
    /// updates that both saw a key absent conflict. InnoDB gap-locks the
    /// absent key at `REPEATABLE READ` and reports the clash as a deadlock.
    pub(crate) fn update_isolation(&self) -> &'static str {
        match self {
            Dialect::Postgres => "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE",
            Dialect::MySql => self.repeatable_read(),
        }
    }

    /// MySQL's `SET TRANSACTION` applies to the next transaction, so it runs
    /// before `BEGIN`; PostgreSQL's must be the first statement inside it.
    pub(crate) fn isolation_precedes_begin(&self) -> bool {
        matches!(self, Dialect::MySql)
    }

    pub(crate) fn version_query(&self) -> &'static str {
        match self {
            Dialect::Postgres => "SHOW server_version",
            Dialect::MySql => "SELECT VERSION()",
        }
    }

    /// Classifies a native error code: the SQLSTATE on PostgreSQL, the
    /// server error number on MySQL.
    pub(crate) fn classify(&self, code: &str) -> SqlFailure {
        match (self, code) {
            (Dialect::Postgres, "23505") | (Dialect::MySql, "1062") => SqlFailure::DuplicateKey,
            (Dialect::Postgres, "42P01") | (Dialect::MySql, "1146") | (Dialect::MySql, "1051") => {
                SqlFailure::MissingTable
            }
            (Dialect::Postgres, "42P07") | (Dialect::MySql, "1050") => SqlFailure::TableExists,
            _ => SqlFailure::Other,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Postgres => "PostgreSQL",
            Dialect::MySql => "MySQL",
        }
    }
}
