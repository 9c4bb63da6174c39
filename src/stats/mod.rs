//! Pipeline statistics

pub mod metrics;

pub use metrics::{HealthSnapshot, PipelineStats, StatsSnapshot};
