//! Domain layer - value types shared by the extraction pipeline and the sinks.

pub mod model;

pub use model::{Measurement, MetricKind, MetricValue, Reading, Target, TaskId};
