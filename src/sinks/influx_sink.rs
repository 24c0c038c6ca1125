//! InfluxDB v2 sink - readings become points in the `turbine_status`
//! measurement, tagged by turbine, written over the line protocol.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::domain::model::{MetricKind, Reading};

use super::{Sink, SinkError};

const MEASUREMENT: &str = "turbine_status";
const WRITE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct InfluxSettings {
    /// Base URL, e.g. `https://us-east-1-1.aws.cloud2.influxdata.com`.
    pub url: String,
    pub token: String,
    pub org: String,
    pub bucket: String,
}

pub struct InfluxSink {
    http: Client,
    settings: InfluxSettings,
}

impl InfluxSink {
    pub fn new(settings: InfluxSettings) -> Result<Self, SinkError> {
        let http = Client::builder().timeout(WRITE_TIMEOUT).build()?;
        Ok(Self { http, settings })
    }
}

/// Tag values must escape commas, equals and spaces per the line protocol.
fn escape_tag(value: &str) -> String {
    value
        .replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}

/// Line-protocol encoding of one reading. `None` when no metric carries a
/// number - Influx rejects points without fields, so such readings are
/// skipped rather than bounced.
fn encode_line(reading: &Reading) -> Option<String> {
    let mut fields = Vec::new();
    for measurement in reading.measurements() {
        let Some(value) = measurement.value.as_f64() else {
            continue;
        };
        let field = match measurement.kind {
            MetricKind::ActivePower => "power_output",
            MetricKind::WindSpeed => "wind_speed",
        };
        fields.push(format!("{field}={value}"));
    }
    if fields.is_empty() {
        return None;
    }

    let ns = reading.captured_at.timestamp_nanos_opt()?;
    Some(format!(
        "{MEASUREMENT},turbine_id={} {} {ns}",
        escape_tag(reading.name()),
        fields.join(","),
    ))
}

#[async_trait]
impl Sink for InfluxSink {
    fn name(&self) -> &'static str {
        "influxdb"
    }

    async fn write(&self, reading: &Reading) -> Result<(), SinkError> {
        let Some(line) = encode_line(reading) else {
            tracing::debug!(
                target = reading.name(),
                "no available metrics, skipping influx point"
            );
            return Ok(());
        };

        let url = format!("{}/api/v2/write", self.settings.url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .query(&[
                ("org", self.settings.org.as_str()),
                ("bucket", self.settings.bucket.as_str()),
                ("precision", "ns"),
            ])
            .header("Authorization", format!("Token {}", self.settings.token))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(line)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Rejected { status, body });
        }

        Ok(())
    }
}
