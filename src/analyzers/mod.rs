//! Hourly traffic aggregation.
//!
//! Reduces per-segment report series into 24-slot tables of average
//! car, bike and pedestrian counts, and assembles the segments document
//! consumed by the dashboard.

pub mod analyzer;
pub mod hourly;
pub mod types;
pub mod utility;
