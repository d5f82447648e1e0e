// src/engine/mod.rs
pub mod metrics;
pub mod queue;
pub mod stats;

pub use metrics::{Metric, QCdr, ACC, ACD, ASR, STATS_NA, TCC, TCD};
pub use queue::{StatsQueue, StatsQueueConfig, DEFAULT_QUEUE_ID};
pub use stats::StatsEngine;
