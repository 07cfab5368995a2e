/// Fleet aggregation and per-tick dispatch.
pub mod aggregator;
/// Wall-clock pacing for periodic loops.
pub mod clock;
pub mod dispatch;
/// Frequency event detection.
pub mod frequency;
/// Daily schedules with a forward-only cursor.
pub mod schedule;
pub mod service;
pub mod tariff;
pub mod types;
