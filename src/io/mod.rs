//! File-based inputs.

/// CSV loader for daily `time,value` schedules.
pub mod schedule;
