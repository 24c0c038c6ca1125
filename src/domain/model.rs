//! # Domain Model
//!
//! Immutable value types for the extraction pipeline. A `Target` identifies
//! one turbine to scrape, a `Reading` is the unit handed to the sinks.
//! Value objects are defined by their attributes rather than identity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier for one unit of scraping work, used to correlate log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Creates a new unique task ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One monitored turbine asset.
///
/// The id is the opaque suffix spliced into the portal URL template; the
/// human-readable display name only becomes known after the dashboard has
/// been scraped, so it lives on the [`Reading`], not here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub id: String,
}

impl Target {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// The metrics tracked per turbine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricKind {
    WindSpeed,
    ActivePower,
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WindSpeed => write!(f, "wind_speed"),
            Self::ActivePower => write!(f, "active_power"),
        }
    }
}

/// A parsed metric value. `Unavailable` is a first-class outcome, not an
/// error: the dashboard frequently renders before its numbers do.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Available(f64),
    Unavailable,
}

impl MetricValue {
    #[must_use]
    pub const fn is_available(self) -> bool {
        matches!(self, Self::Available(_))
    }

    /// The numeric value, if any.
    #[must_use]
    pub const fn as_f64(self) -> Option<f64> {
        match self {
            Self::Available(v) => Some(v),
            Self::Unavailable => None,
        }
    }
}

impl std::fmt::Display for MetricValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Available(v) => write!(f, "{v}"),
            Self::Unavailable => write!(f, "N/A"),
        }
    }
}

/// One metric's parsed value, tagged with what it measures.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub kind: MetricKind,
    pub value: MetricValue,
}

/// One timestamped set of measurements for one target - the unit persisted
/// to every configured sink. Immutable after creation; sinks receive it by
/// shared reference and never mutate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Capture time (wall clock at extraction), never a source-reported time.
    pub captured_at: DateTime<Utc>,
    /// Opaque target id from the target list.
    pub target_id: String,
    /// Display name scraped off the dashboard, when one was found.
    pub display_name: Option<String>,
    pub wind_speed: MetricValue,
    pub active_power: MetricValue,
    /// "OK" when both metrics parsed, otherwise a truncated excerpt of the
    /// source text that failed to parse.
    pub note: String,
}

impl Reading {
    /// Builds a reading stamped with the current wall-clock time.
    #[must_use]
    pub fn new(
        target: &Target,
        display_name: Option<String>,
        wind_speed: MetricValue,
        active_power: MetricValue,
        note: impl Into<String>,
    ) -> Self {
        Self {
            captured_at: Utc::now(),
            target_id: target.id.clone(),
            display_name,
            wind_speed,
            active_power,
            note: note.into(),
        }
    }

    /// Degraded reading for a target whose extraction retries were exhausted.
    #[must_use]
    pub fn unavailable(target: &Target, note: impl Into<String>) -> Self {
        Self::new(
            target,
            None,
            MetricValue::Unavailable,
            MetricValue::Unavailable,
            note,
        )
    }

    /// Name used when persisting: the scraped display name, falling back to
    /// the opaque target id.
    #[must_use]
    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.target_id)
    }

    /// True when at least one metric carries a number.
    #[must_use]
    pub fn has_data(&self) -> bool {
        self.wind_speed.is_available() || self.active_power.is_available()
    }

    /// The reading's measurements in a uniform shape, one per tracked
    /// metric, for sinks that iterate rather than name fields.
    #[must_use]
    pub const fn measurements(&self) -> [Measurement; 2] {
        [
            Measurement {
                kind: MetricKind::WindSpeed,
                value: self.wind_speed,
            },
            Measurement {
                kind: MetricKind::ActivePower,
                value: self.active_power,
            },
        ]
    }
}
