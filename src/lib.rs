//! EnOS Harvester - resilient collector for wind-turbine dashboards
//!
//! Continuously extracts live readings (wind speed, active power) for a
//! fleet of turbines exposed only through a deeply-framed web dashboard,
//! and fans every reading out to the configured persistence sinks.

// Module declarations
pub mod browser;
pub mod domain;
pub mod infrastructure;
pub mod pipeline;
pub mod sinks;

// Re-export the pieces callers wire together
pub use domain::model::{MetricValue, Reading, Target};
pub use pipeline::{CycleLoop, FrameSearcher, SessionManager, TargetScheduler};
pub use sinks::{Sink, SinkResult};
