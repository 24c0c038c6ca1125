//! SQLite sink - the local row store. Schema is created on construction so
//! a fresh deployment needs no migration step.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;

use crate::domain::model::Reading;

use super::{Sink, SinkError};

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS readings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    captured_at TEXT NOT NULL,
    target_id TEXT NOT NULL,
    display_name TEXT,
    wind_speed REAL,
    active_power REAL,
    note TEXT NOT NULL
)";

pub struct SqliteSink {
    pool: SqlitePool,
}

impl SqliteSink {
    /// Open (creating if missing) the database at `path` and ensure the
    /// readings table exists.
    pub async fn connect(path: &Path) -> Result<Self, SinkError> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
            .map_err(SinkError::Database)?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await?;

        sqlx::query(SCHEMA).execute(&pool).await?;

        Ok(Self { pool })
    }

    /// In-memory database, for tests.
    pub async fn in_memory() -> Result<Self, SinkError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        sqlx::query(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    /// Number of stored readings (used by tests and the status log).
    pub async fn count(&self) -> Result<i64, SinkError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM readings")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }
}

#[async_trait]
impl Sink for SqliteSink {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn write(&self, reading: &Reading) -> Result<(), SinkError> {
        sqlx::query(
            "INSERT INTO readings \
             (captured_at, target_id, display_name, wind_speed, active_power, note) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(reading.captured_at.to_rfc3339())
        .bind(&reading.target_id)
        .bind(reading.display_name.as_deref())
        .bind(reading.wind_speed.as_f64())
        .bind(reading.active_power.as_f64())
        .bind(&reading.note)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
