//! Operational concerns: counters and log summaries.

pub mod telemetry;
