//! Grid-service scheduler.
//!
//! Decides the aggregate dispatch from whichever grid service is active:
//! regulation and imbalance signals, time-of-use tiers, peak-demand
//! forecasts or frequency events.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDateTime, NaiveTime, TimeZone, Timelike};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::devices::Direction;
use crate::sim::frequency::{DetectorSettings, FrequencyEventDetector, Polarity};
use crate::sim::schedule::Schedule;
use crate::sim::tariff::{PriceTier, price_tier};
use crate::sim::types::{Dispatch, ServiceDecision};

/// Identifier tag for resources used as mid-peak buffers.
pub const BUFFER_TAG: &str = "buffer";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown grid service: {0}")]
pub struct UnknownService(pub String);

/// The grid service driving the aggregate target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum Service {
    #[default]
    Off,
    /// Regulation, fast signal.
    RegulationA,
    /// Regulation, dynamic signal.
    RegulationD,
    EnergyImbalance,
    TimeOfUse,
    PeakDemand,
    FrequencyResponse,
}

impl Service {
    pub const ALL: [Service; 7] = [
        Service::Off,
        Service::RegulationA,
        Service::RegulationD,
        Service::EnergyImbalance,
        Service::TimeOfUse,
        Service::PeakDemand,
        Service::FrequencyResponse,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::RegulationA => "PJMA",
            Self::RegulationD => "PJMD",
            Self::EnergyImbalance => "EIM",
            Self::TimeOfUse => "TOU",
            Self::PeakDemand => "PDM",
            Self::FrequencyResponse => "FER",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Off => "no grid service",
            Self::RegulationA => "regulation A signal",
            Self::RegulationD => "regulation D signal",
            Self::EnergyImbalance => "energy imbalance market",
            Self::TimeOfUse => "time of use tariff",
            Self::PeakDemand => "peak demand mitigation",
            Self::FrequencyResponse => "frequency event response",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Service {
    type Err = UnknownService;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|service| service.code().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownService(s.to_string()))
    }
}

impl TryFrom<String> for Service {
    type Error = UnknownService;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Daily schedules consumed by the schedule-driven services.
///
/// Regulation and imbalance values are normalized power in `[-1, 1]`
/// (positive imports). Peak-demand values are forecast temperatures in °F,
/// frequency values are grid frequency in Hz.
#[derive(Debug, Clone, Default)]
pub struct ServiceSchedules {
    pub reg_a: Schedule<f64>,
    pub reg_d: Schedule<f64>,
    pub eim: Schedule<f64>,
    pub pdm: Schedule<f64>,
    pub fer: Schedule<f64>,
}

impl ServiceSchedules {
    fn rewind(&mut self) {
        self.reg_a.rewind();
        self.reg_d.rewind();
        self.eim.rewind();
        self.pdm.rewind();
        self.fer.rewind();
    }
}

/// Read-only view of the scheduler state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerSummary {
    pub service: Service,
    pub last_timestamp: Option<NaiveTime>,
    /// Schedule value behind the last decision; for time of use, `-1` for
    /// export and `1` for import.
    pub last_value: Option<f64>,
}

impl fmt::Display for SchedulerSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "service: {} ({})", self.service, self.service.description())?;
        match self.last_timestamp {
            Some(t) => write!(f, "\nlast timestamp: {}", t.format("%H:%M:%S"))?,
            None => f.write_str("\nlast timestamp: -")?,
        }
        match self.last_value {
            Some(v) => write!(f, "\nlast value: {v}"),
            None => f.write_str("\nlast value: -"),
        }
    }
}

/// Peak-demand trigger: hot evenings and cold late afternoons.
pub fn peak_demand_expected(fahrenheit: f64, time: NaiveTime) -> bool {
    let hour = time.hour();
    (fahrenheit > 85.0 && (18..21).contains(&hour)) || (fahrenheit < 39.0 && (17..20).contains(&hour))
}

pub struct GridServiceScheduler {
    service: Service,
    schedules: ServiceSchedules,
    detector: FrequencyEventDetector,
    tou_minute: Option<NaiveDateTime>,
    last_timestamp: Option<NaiveTime>,
    last_value: Option<f64>,
}

impl GridServiceScheduler {
    pub fn new(schedules: ServiceSchedules, settings: DetectorSettings) -> Self {
        Self {
            service: Service::Off,
            schedules,
            detector: FrequencyEventDetector::new(settings),
            tou_minute: None,
            last_timestamp: None,
            last_value: None,
        }
    }

    pub fn service(&self) -> Service {
        self.service
    }

    /// Switches to `service`. Schedule cursors, the time-of-use minute and
    /// the frequency detector start over.
    pub fn select(&mut self, service: Service) {
        info!(from = %self.service, to = %service, "grid service selected");
        self.service = service;
        self.schedules.rewind();
        self.detector.reset();
        self.tou_minute = None;
    }

    pub fn summary(&self) -> SchedulerSummary {
        SchedulerSummary {
            service: self.service,
            last_timestamp: self.last_timestamp,
            last_value: self.last_value,
        }
    }

    fn record(&mut self, time: NaiveTime, value: f64) {
        self.last_timestamp = Some(time);
        self.last_value = Some(value);
    }

    /// Runs the active service at `now`.
    ///
    /// Schedules and tariffs follow the wall-clock time in `now`'s zone.
    /// Frequency response windows are measured on the absolute timestamp, so
    /// a clock change does not stretch or cut them.
    ///
    /// Returns a decision only when the aggregate dispatch should change.
    pub fn tick<Tz: TimeZone>(&mut self, now: &DateTime<Tz>) -> Option<ServiceDecision> {
        let local = now.naive_local();
        let decision = match self.service {
            Service::Off => None,
            Service::RegulationA | Service::RegulationD | Service::EnergyImbalance => self.signal(local.time()),
            Service::TimeOfUse => self.time_of_use(local),
            Service::PeakDemand => self.peak_demand(local.time()),
            Service::FrequencyResponse => self.frequency_response(local.time(), now.timestamp() as f64),
        };
        if let Some(decision) = &decision {
            debug!(service = %self.service, dispatch = %decision.dispatch, "service decision");
        }
        decision
    }

    fn signal(&mut self, now: NaiveTime) -> Option<ServiceDecision> {
        let schedule = match self.service {
            Service::RegulationA => &mut self.schedules.reg_a,
            Service::RegulationD => &mut self.schedules.reg_d,
            _ => &mut self.schedules.eim,
        };
        let row = *schedule.next_due(now)?;
        self.record(row.time, row.value);
        Some(ServiceDecision::dispatch(Dispatch::from_signal(row.value)))
    }

    fn time_of_use(&mut self, now: NaiveDateTime) -> Option<ServiceDecision> {
        let minute = now.with_second(0)?.with_nanosecond(0)?;
        if self.tou_minute == Some(minute) {
            return None;
        }
        self.tou_minute = Some(minute);

        let tier = price_tier(now.month(), now.hour());
        let decision = match tier {
            PriceTier::OnPeak => ServiceDecision::with_targets(Vec::new(), Dispatch::full(Direction::Export)),
            PriceTier::MidPeak => {
                ServiceDecision::with_targets(vec![BUFFER_TAG.to_string()], Dispatch::full(Direction::Import))
            }
            PriceTier::OffPeak => ServiceDecision::with_targets(Vec::new(), Dispatch::full(Direction::Import)),
        };
        let value = if tier == PriceTier::OnPeak { -1.0 } else { 1.0 };
        self.record(minute.time(), value);
        Some(decision)
    }

    fn peak_demand(&mut self, now: NaiveTime) -> Option<ServiceDecision> {
        let row = *self.schedules.pdm.next_due(now)?;
        self.record(row.time, row.value);
        if peak_demand_expected(row.value, row.time) {
            info!(forecast_f = row.value, "peak demand expected, exporting");
            Some(ServiceDecision::dispatch(Dispatch::full(Direction::Export)))
        } else {
            None
        }
    }

    fn frequency_response(&mut self, now: NaiveTime, at: f64) -> Option<ServiceDecision> {
        let expired = self.detector.take_expired(at).map(|polarity| {
            info!(%polarity, "frequency response window ended");
            ServiceDecision::dispatch(Dispatch::Idle)
        });

        let detected = self.schedules.fer.next_due(now).copied().and_then(|row| {
            self.last_timestamp = Some(row.time);
            self.last_value = Some(row.value);
            self.detector.observe(at, row.value)
        });
        let Some(event) = detected else {
            return expired;
        };

        info!(
            polarity = %event.polarity,
            delta_hz = event.delta_hz,
            duration_secs = event.duration_secs,
            "frequency event detected"
        );
        let direction = match event.polarity {
            Polarity::UnderFrequency => Direction::Export,
            Polarity::OverFrequency => Direction::Import,
        };
        Some(ServiceDecision::dispatch(Dispatch::full(direction)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::schedule::ScheduleRow;
    use chrono::{FixedOffset, NaiveDate, Utc};

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(2024, 7, 15)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
            .and_utc()
    }

    fn rows(values: &[(u32, u32, u32, f64)]) -> Schedule<f64> {
        Schedule::new(
            values
                .iter()
                .map(|&(h, m, s, v)| ScheduleRow::new(NaiveTime::from_hms_opt(h, m, s).unwrap(), v))
                .collect(),
        )
    }

    #[test]
    fn parses_service_codes() {
        assert_eq!("pjma".parse::<Service>(), Ok(Service::RegulationA));
        assert_eq!("FER".parse::<Service>(), Ok(Service::FrequencyResponse));
        assert_eq!("nope".parse::<Service>(), Err(UnknownService("nope".into())));
        assert_eq!(Service::PeakDemand.to_string(), "PDM");
    }

    #[test]
    fn off_never_decides() {
        let mut scheduler = GridServiceScheduler::new(ServiceSchedules::default(), DetectorSettings::default());
        assert!(scheduler.tick(&at(12, 0, 0)).is_none());
    }

    #[test]
    fn regulation_signal_maps_sign() {
        let schedules = ServiceSchedules {
            reg_a: rows(&[(8, 0, 0, -0.5), (8, 0, 2, 0.25), (8, 0, 4, 0.0)]),
            ..ServiceSchedules::default()
        };
        let mut scheduler = GridServiceScheduler::new(schedules, DetectorSettings::default());
        scheduler.select(Service::RegulationA);

        let d = scheduler.tick(&at(8, 0, 0)).map(|d| d.dispatch);
        assert_eq!(d, Some(Dispatch::Export(0.5)));
        assert!(scheduler.tick(&at(8, 0, 0)).is_none());
        assert!(scheduler.tick(&at(8, 0, 1)).is_none());
        assert_eq!(scheduler.tick(&at(8, 0, 2)).map(|d| d.dispatch), Some(Dispatch::Import(0.25)));
        assert_eq!(scheduler.tick(&at(8, 0, 4)).map(|d| d.dispatch), Some(Dispatch::Idle));

        let summary = scheduler.summary();
        assert_eq!(summary.last_value, Some(0.0));
        assert_eq!(summary.last_timestamp, NaiveTime::from_hms_opt(8, 0, 4));
    }

    #[test]
    fn time_of_use_runs_once_per_minute() {
        let mut scheduler = GridServiceScheduler::new(ServiceSchedules::default(), DetectorSettings::default());
        scheduler.select(Service::TimeOfUse);

        let on_peak = scheduler.tick(&at(16, 0, 5));
        assert_eq!(
            on_peak,
            Some(ServiceDecision::with_targets(vec![], Dispatch::Export(1.0)))
        );
        assert!(scheduler.tick(&at(16, 0, 40)).is_none());

        let mid_peak = scheduler.tick(&at(11, 30, 0));
        assert_eq!(
            mid_peak,
            Some(ServiceDecision::with_targets(vec!["buffer".into()], Dispatch::Import(1.0)))
        );
        let off_peak = scheduler.tick(&at(23, 0, 0)).map(|d| d.dispatch);
        assert_eq!(off_peak, Some(Dispatch::Import(1.0)));
    }

    #[test]
    fn peak_demand_only_in_window() {
        let schedules = ServiceSchedules {
            pdm: rows(&[(12, 0, 0, 95.0), (17, 30, 0, 30.0), (19, 0, 0, 90.0)]),
            ..ServiceSchedules::default()
        };
        let mut scheduler = GridServiceScheduler::new(schedules, DetectorSettings::default());
        scheduler.select(Service::PeakDemand);

        assert!(scheduler.tick(&at(12, 0, 0)).is_none());
        assert_eq!(scheduler.tick(&at(17, 30, 0)).map(|d| d.dispatch), Some(Dispatch::Export(1.0)));
        assert_eq!(scheduler.tick(&at(19, 0, 0)).map(|d| d.dispatch), Some(Dispatch::Export(1.0)));
        assert_eq!(scheduler.summary().last_value, Some(90.0));
    }

    #[test]
    fn peak_demand_window_edges() {
        let t = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap();
        assert!(peak_demand_expected(86.0, t(18, 0)));
        assert!(!peak_demand_expected(86.0, t(21, 0)));
        assert!(!peak_demand_expected(85.0, t(19, 0)));
        assert!(peak_demand_expected(38.0, t(17, 0)));
        assert!(!peak_demand_expected(38.0, t(20, 0)));
    }

    #[test]
    fn frequency_window_ignores_clock_change() {
        let daylight = FixedOffset::west_opt(4 * 3600).unwrap();
        let standard = FixedOffset::west_opt(5 * 3600).unwrap();
        let local = |offset: FixedOffset, h: u32, m: u32, s: u32| {
            NaiveDate::from_ymd_opt(2024, 11, 3)
                .unwrap()
                .and_hms_opt(h, m, s)
                .unwrap()
                .and_local_timezone(offset)
                .unwrap()
        };
        let samples = [60.0, 59.99, 59.98, 59.97, 59.955, 59.94];
        let schedules = ServiceSchedules {
            fer: rows(&[
                (1, 58, 0, samples[0]),
                (1, 58, 1, samples[1]),
                (1, 58, 2, samples[2]),
                (1, 58, 3, samples[3]),
                (1, 58, 4, samples[4]),
                (1, 58, 5, samples[5]),
            ]),
            ..ServiceSchedules::default()
        };
        let mut scheduler = GridServiceScheduler::new(schedules, DetectorSettings::default());
        scheduler.select(Service::FrequencyResponse);

        let decisions: Vec<_> = (0..6)
            .filter_map(|s| scheduler.tick(&local(daylight, 1, 58, s)))
            .collect();
        assert_eq!(decisions, vec![ServiceDecision::dispatch(Dispatch::Export(1.0))]);

        // clocks fall back: 180 s after detection reads an hour earlier
        assert!(scheduler.tick(&local(standard, 1, 1, 4)).is_none());
        assert_eq!(
            scheduler.tick(&local(standard, 1, 1, 5)),
            Some(ServiceDecision::dispatch(Dispatch::Idle))
        );
    }
}
