mod collector;

pub use collector::{MetricsSnapshot, PipelineMetrics};
