//! Supabase sink - hosted row store, plain REST insert. Unavailable
//! metrics are stored as SQL nulls so downstream queries can tell "no
//! data" from zero.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

use crate::domain::model::Reading;

use super::{Sink, SinkError};

const WRITE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct SupabaseSettings {
    /// Project base URL, e.g. `https://xyz.supabase.co`.
    pub url: String,
    pub api_key: String,
    pub table: String,
}

pub struct SupabaseSink {
    http: Client,
    settings: SupabaseSettings,
}

impl SupabaseSink {
    pub fn new(settings: SupabaseSettings) -> Result<Self, SinkError> {
        let http = Client::builder().timeout(WRITE_TIMEOUT).build()?;
        Ok(Self { http, settings })
    }
}

fn encode_row(reading: &Reading) -> serde_json::Value {
    json!({
        "timestamp": reading.captured_at.to_rfc3339(),
        "turbine_name": reading.name(),
        "active_power": reading.active_power.as_f64(),
        "wind_speed": reading.wind_speed.as_f64(),
    })
}

#[async_trait]
impl Sink for SupabaseSink {
    fn name(&self) -> &'static str {
        "supabase"
    }

    async fn write(&self, reading: &Reading) -> Result<(), SinkError> {
        let url = format!(
            "{}/rest/v1/{}",
            self.settings.url.trim_end_matches('/'),
            self.settings.table
        );

        let response = self
            .http
            .post(&url)
            .header("apikey", &self.settings.api_key)
            .header("Authorization", format!("Bearer {}", self.settings.api_key))
            .header("Prefer", "return=minimal")
            .json(&encode_row(reading))
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
