//! CSV sink - one file per local day, header written when the file is
//! created, rows appended as readings arrive.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Local;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::domain::model::Reading;

use super::{Sink, SinkError};

const HEADER: &str = "Timestamp,Turbine Name,Active Power,Wind Speed,Note\n";

pub struct CsvSink {
    dir: PathBuf,
}

impl CsvSink {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the file readings go to right now.
    fn current_file(&self) -> PathBuf {
        let date = Local::now().format("%Y-%m-%d");
        self.dir.join(format!("{date}.csv"))
    }

    async fn needs_header(path: &Path) -> bool {
        match fs::metadata(path).await {
            Ok(meta) => meta.len() == 0,
            Err(_) => true,
        }
    }
}

/// Quote a field if it contains the delimiter, quotes or newlines.
fn escape_field(field: &str) -> String {
    if field.contains(['"', ',', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn format_row(reading: &Reading) -> String {
    let timestamp = reading
        .captured_at
        .with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S");
    format!(
        "{},{},{},{},{}\n",
        timestamp,
        escape_field(reading.name()),
        reading.active_power,
        reading.wind_speed,
        escape_field(&reading.note),
    )
}

#[async_trait]
impl Sink for CsvSink {
    fn name(&self) -> &'static str {
        "csv"
    }

    async fn write(&self, reading: &Reading) -> Result<(), SinkError> {
        fs::create_dir_all(&self.dir).await?;

        let path = self.current_file();
        let needs_header = Self::needs_header(&path).await;

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        if needs_header {
            file.write_all(HEADER.as_bytes()).await?;
        }
        file.write_all(format_row(reading).as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }
}
