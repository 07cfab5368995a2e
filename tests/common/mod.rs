//! Shared test fixtures for integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use vpp_dispatch::devices::{EnergyResource, ResourceProperties};
use vpp_dispatch::sim::aggregator::ResourceAggregator;
use vpp_dispatch::sim::dispatch::{AllocationPolicy, DispatchAllocator};
use vpp_dispatch::sim::schedule::{Schedule, ScheduleRow};
use vpp_dispatch::transport::RecordingSink;

/// Symmetric resource, half charged, with no idle losses.
pub fn resource(id: &str, rated_power: f64, ramp: f64, rated_energy: f64) -> EnergyResource {
    EnergyResource::new(id, ResourceProperties::symmetric(rated_power, ramp, rated_energy))
}

/// Home battery (4 kW, 200 W/s, 13.5 kWh).
pub fn battery(id: &str) -> EnergyResource {
    resource(id, 4000.0, 200.0, 13500.0)
}

/// Water heater (4.5 kW, instant ramp, 3 kWh).
pub fn water_heater(id: &str) -> EnergyResource {
    resource(id, 4500.0, 4500.0, 3000.0)
}

/// Aggregator with an in-memory sink so tests can read what was sent.
pub fn recording_aggregator(policy: AllocationPolicy) -> (ResourceAggregator, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::new());
    let aggregator = ResourceAggregator::new(DispatchAllocator::new(policy), sink.clone());
    (aggregator, sink)
}

/// Aggregator holding two sites, each with a battery and a buffer water heater.
pub fn two_site_fleet() -> (ResourceAggregator, Arc<RecordingSink>) {
    let (mut aggregator, sink) = recording_aggregator(AllocationPolicy::WholeDevice);
    aggregator.add(battery("/site1/ess/battery"));
    aggregator.add(water_heater("/site1/buffer/water-heater"));
    aggregator.add(battery("/site2/ess/battery"));
    aggregator.add(water_heater("/site2/buffer/water-heater"));
    sink.take_setpoints();
    (aggregator, sink)
}

pub fn time(h: u32, m: u32, s: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, s).expect("valid time of day")
}

/// Timestamp on a summer weekday, with wall clock and UTC in step.
pub fn summer(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(2024, 7, 15)
        .expect("valid date")
        .and_time(time(h, m, s))
        .and_utc()
}

/// Timestamp on a winter weekday, with wall clock and UTC in step.
pub fn winter(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(2024, 1, 15)
        .expect("valid date")
        .and_time(time(h, m, s))
        .and_utc()
}

pub fn schedule(rows: &[(NaiveTime, f64)]) -> Schedule<f64> {
    Schedule::new(rows.iter().map(|&(t, v)| ScheduleRow::new(t, v)).collect())
}
