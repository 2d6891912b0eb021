//! SQL gateway: the pool, table naming and statement deadlines.
//!
//! Every statement issued by the repositories runs through [`Database::run`],
//! which applies the configured statement timeout and maps driver errors into
//! [`AppError`]. Connections are checked out per statement (or per
//! transaction) and returned to the pool when the future completes or is
//! dropped, so cancellation never leaks a connection or commits a partial
//! transaction.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::{
    config::DatabaseConfig,
    error::{AppError, Result},
};

/// Format used for every timestamp column.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    prefix: Arc<str>,
    timeout: Duration,
}

impl Database {
    pub fn new(pool: SqlitePool, prefix: &str, timeout: Duration) -> Self {
        Self {
            pool,
            prefix: Arc::from(prefix),
            timeout,
        }
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.statement_timeout_secs))
            .connect(&config.url)
            .await?;

        Ok(Self::new(
            pool,
            &config.table_prefix,
            Duration::from_secs(config.statement_timeout_secs),
        ))
    }

    /// Applies the bundled schema.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Prefixed name of a trusted table constant.
    pub fn table(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// Runs one statement future under the statement timeout.
    pub async fn run<T, F>(&self, statement: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(self.timeout, statement).await {
            Ok(result) => result.map_err(AppError::from),
            Err(_) => {
                tracing::error!("Statement exceeded {:?}", self.timeout);
                Err(AppError::DatabaseUnavailable(format!(
                    "Statement timed out after {:?}",
                    self.timeout
                )))
            }
        }
    }

    /// Uncommitted transactions roll back when dropped.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        self.run(self.pool.begin()).await
    }
}

pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.format(DATETIME_FORMAT).to_string()
}

pub fn format_date(date: &NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn to_utc(dt: NaiveDateTime) -> DateTime<Utc> {
    DateTime::from_naive_utc_and_offset(dt, Utc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_datetime_format_has_no_fraction() {
        let dt = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap()
            + chrono::Duration::milliseconds(250);
        assert_eq!(format_datetime(&dt), "2024-03-09 07:05:01");
    }

    #[tokio::test]
    async fn test_table_prefix() {
        let pool = SqlitePool::connect_lazy("sqlite::memory:").unwrap();
        let db = Database::new(pool, "ph_", Duration::from_secs(1));
        assert_eq!(db.table("Members"), "ph_Members");
    }
}
