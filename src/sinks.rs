//! # Persistence Sinks
//!
//! Every reading is fanned out to the full set of configured backends.
//! Sinks are independent: one backend failing (quota, network, schema)
//! is logged and recorded, and never prevents the remaining sinks from
//! being attempted. Delivery is at-least-once with no cross-sink
//! rollback. Adding a backend means adding one module implementing
//! [`Sink`], nothing in the pipeline changes.

pub mod csv_sink;
pub mod influx_sink;
pub mod sqlite_sink;
pub mod supabase_sink;

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::model::Reading;

pub use csv_sink::CsvSink;
pub use influx_sink::InfluxSink;
pub use sqlite_sink::SqliteSink;
pub use supabase_sink::SupabaseSink;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend rejected write (status {status}): {body}")]
    Rejected { status: u16, body: String },
}

/// One persistence backend. Implementations must return failures as
/// values - a panicking sink would break the isolation guarantee.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Short backend name for logs and [`SinkResult`].
    fn name(&self) -> &'static str;

    /// Persist one reading.
    async fn write(&self, reading: &Reading) -> Result<(), SinkError>;
}

/// Per-backend outcome of persisting one reading. Ephemeral - consumed by
/// logging, never stored.
#[derive(Debug)]
pub struct SinkResult {
    pub sink: &'static str,
    pub outcome: Result<(), SinkError>,
}

impl SinkResult {
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Fan one reading out to every sink. All sinks are attempted
/// concurrently; failures are isolated per backend.
pub async fn persist_all(reading: &Reading, sinks: &[Arc<dyn Sink>]) -> Vec<SinkResult> {
    let writes = sinks.iter().map(|sink| async move {
        let outcome = sink.write(reading).await;
        match &outcome {
            Ok(()) => debug!(sink = sink.name(), target = reading.name(), "reading persisted"),
            Err(e) => warn!(
                sink = sink.name(),
                target = reading.name(),
                error = %e,
                "sink write failed"
            ),
        }
        SinkResult {
            sink: sink.name(),
            outcome,
        }
    });

    join_all(writes).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{MetricValue, Target};

    struct OkSink;
    struct FailingSink;

    #[async_trait]
    impl Sink for OkSink {
        fn name(&self) -> &'static str {
            "ok"
        }
        async fn write(&self, _reading: &Reading) -> Result<(), SinkError> {
            Ok(())
        }
    }

    #[async_trait]
    impl Sink for FailingSink {
        fn name(&self) -> &'static str {
            "failing"
        }
        async fn write(&self, _reading: &Reading) -> Result<(), SinkError> {
            Err(SinkError::Rejected {
                status: 503,
                body: "over quota".to_string(),
            })
        }
    }

    fn reading() -> Reading {
        Reading::new(
            &Target::new("WA101"),
            None,
            MetricValue::Available(3.4),
            MetricValue::Available(220.0),
            "OK",
        )
    }

    #[tokio::test]
    async fn failing_sink_does_not_block_others() {
        let sinks: Vec<Arc<dyn Sink>> =
            vec![Arc::new(FailingSink), Arc::new(OkSink), Arc::new(FailingSink)];
        let results = persist_all(&reading(), &sinks).await;

        assert_eq!(results.len(), 3);
        assert!(!results[0].succeeded());
        assert!(results[1].succeeded());
        assert!(!results[2].succeeded());
    }

    #[tokio::test]
    async fn empty_sink_list_is_a_noop() {
        let results = persist_all(&reading(), &[]).await;
        assert!(results.is_empty());
    }
}
