//! Detection of sustained grid frequency deviations.
//!
//! Samples are fed one at a time. A deviation starts when a sample falls
//! outside the dead band, lies beyond the moving average and keeps moving
//! away from nominal. It becomes an event once it has lasted long enough,
//! moved far enough and moved fast enough. An event holds for a fixed
//! response window regardless of how quickly frequency recovers.

use std::collections::VecDeque;
use std::fmt;

use serde::Deserialize;

/// Detector thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectorSettings {
    /// Samples in the moving average.
    pub window_len: usize,
    /// Under-frequency threshold in Hz.
    pub floor_hz: f64,
    /// Over-frequency threshold in Hz.
    pub ceiling_hz: f64,
    /// Recovery from the extreme that ends a deviation, in Hz.
    pub recovery_hz: f64,
    pub min_slew_hz_per_sec: f64,
    pub min_delta_hz: f64,
    pub min_duration_secs: f64,
    /// How long a detected event stays active.
    pub response_secs: f64,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            window_len: 5,
            floor_hz: 59.975,
            ceiling_hz: 60.025,
            recovery_hz: 0.003,
            min_slew_hz_per_sec: 0.0031,
            min_delta_hz: 0.031,
            min_duration_secs: 1.0,
            response_secs: 180.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    UnderFrequency,
    OverFrequency,
}

impl fmt::Display for Polarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnderFrequency => f.write_str("under-frequency"),
            Self::OverFrequency => f.write_str("over-frequency"),
        }
    }
}

/// A newly detected event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyEvent {
    pub polarity: Polarity,
    pub detected_at: f64,
    pub delta_hz: f64,
    pub duration_secs: f64,
}

#[derive(Debug, Clone, Copy)]
struct Deviation {
    polarity: Polarity,
    start_hz: f64,
    start_time: f64,
    extreme: f64,
    delta_hz: f64,
    duration_secs: f64,
}

impl Deviation {
    fn track(&mut self, hz: f64) {
        self.extreme = match self.polarity {
            Polarity::UnderFrequency => self.extreme.min(hz),
            Polarity::OverFrequency => self.extreme.max(hz),
        };
    }

    fn recovered(&self, hz: f64, recovery_hz: f64) -> bool {
        match self.polarity {
            Polarity::UnderFrequency => hz - self.extreme > recovery_hz,
            Polarity::OverFrequency => self.extreme - hz > recovery_hz,
        }
    }

    fn beyond_average(&self, hz: f64, average: f64) -> bool {
        match self.polarity {
            Polarity::UnderFrequency => hz < average,
            Polarity::OverFrequency => hz > average,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Response {
    polarity: Polarity,
    until: f64,
}

#[derive(Debug, Clone)]
pub struct FrequencyEventDetector {
    settings: DetectorSettings,
    window: VecDeque<f64>,
    previous: Option<f64>,
    deviation: Option<Deviation>,
    response: Option<Response>,
}

impl FrequencyEventDetector {
    pub fn new(settings: DetectorSettings) -> Self {
        Self {
            window: VecDeque::with_capacity(settings.window_len.max(1)),
            settings,
            previous: None,
            deviation: None,
            response: None,
        }
    }

    pub fn settings(&self) -> &DetectorSettings {
        &self.settings
    }

    /// Drops all state, including any running response window.
    pub fn reset(&mut self) {
        self.window.clear();
        self.previous = None;
        self.deviation = None;
        self.response = None;
    }

    fn moving_average(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        self.window.iter().sum::<f64>() / self.window.len() as f64
    }

    /// Feeds one sample taken at `at_secs`.
    ///
    /// Returns an event only at the moment it is first detected.
    ///
    /// # Examples
    ///
    /// ```
    /// use vpp_dispatch::sim::frequency::{DetectorSettings, FrequencyEventDetector, Polarity};
    ///
    /// let mut detector = FrequencyEventDetector::new(DetectorSettings::default());
    /// let series = [60.0, 59.99, 59.98, 59.97, 59.955, 59.94];
    /// let events: Vec<_> = series
    ///     .iter()
    ///     .enumerate()
    ///     .filter_map(|(t, hz)| detector.observe(t as f64, *hz))
    ///     .collect();
    ///
    /// assert_eq!(events.len(), 1);
    /// assert_eq!(events[0].polarity, Polarity::UnderFrequency);
    /// ```
    pub fn observe(&mut self, at_secs: f64, hz: f64) -> Option<FrequencyEvent> {
        if !hz.is_finite() {
            return None;
        }
        let delta = hz - self.previous.unwrap_or(hz);
        self.previous = Some(hz);
        self.window.push_back(hz);
        while self.window.len() > self.settings.window_len.max(1) {
            self.window.pop_front();
        }
        let average = self.moving_average();

        if let Some(deviation) = self.deviation.as_mut() {
            deviation.track(hz);
            if deviation.recovered(hz, self.settings.recovery_hz) {
                self.deviation = None;
            }
        }

        if self.deviation.is_none() {
            let flagged = if hz < self.settings.floor_hz && hz < average && delta < 0.0 {
                Some(Polarity::UnderFrequency)
            } else if hz > self.settings.ceiling_hz && hz > average && delta > 0.0 {
                Some(Polarity::OverFrequency)
            } else {
                None
            };
            self.deviation = flagged.map(|polarity| Deviation {
                polarity,
                start_hz: hz - delta,
                start_time: at_secs,
                extreme: hz,
                delta_hz: 0.0,
                duration_secs: 0.0,
            });
        }

        let deviation = self.deviation.as_mut()?;
        if deviation.beyond_average(hz, average) {
            deviation.delta_hz = (deviation.extreme - deviation.start_hz).abs();
            deviation.duration_secs = (at_secs - deviation.start_time).abs();
        }
        let candidate = *deviation;

        if self.active_event(at_secs).is_some() {
            return None;
        }
        let settings = &self.settings;
        let detected = candidate.duration_secs >= settings.min_duration_secs
            && candidate.delta_hz / candidate.duration_secs >= settings.min_slew_hz_per_sec
            && candidate.delta_hz >= settings.min_delta_hz;
        if !detected {
            return None;
        }

        self.response = Some(Response {
            polarity: candidate.polarity,
            until: at_secs + settings.response_secs,
        });
        Some(FrequencyEvent {
            polarity: candidate.polarity,
            detected_at: at_secs,
            delta_hz: candidate.delta_hz,
            duration_secs: candidate.duration_secs,
        })
    }

    /// Polarity of the event whose response window covers `at_secs`.
    pub fn active_event(&self, at_secs: f64) -> Option<Polarity> {
        self.response
            .filter(|r| at_secs < r.until)
            .map(|r| r.polarity)
    }

    /// Ends a response window that has run out by `at_secs`.
    ///
    /// Returns the polarity of the expired event, once.
    pub fn take_expired(&mut self, at_secs: f64) -> Option<Polarity> {
        let response = self.response?;
        if at_secs < response.until {
            return None;
        }
        self.response = None;
        Some(response.polarity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(detector: &mut FrequencyEventDetector, start: f64, series: &[f64]) -> Vec<FrequencyEvent> {
        series
            .iter()
            .enumerate()
            .filter_map(|(i, hz)| detector.observe(start + i as f64, *hz))
            .collect()
    }

    #[test]
    fn falling_series_is_detected_and_held() {
        let mut detector = FrequencyEventDetector::new(DetectorSettings::default());
        let events = feed(&mut detector, 0.0, &[60.0, 59.99, 59.98, 59.97, 59.955, 59.94]);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].detected_at, 5.0);
        assert!((events[0].delta_hz - 0.04).abs() < 1e-9);

        assert!(detector.observe(6.0, 60.0).is_none());
        assert_eq!(detector.active_event(100.0), Some(Polarity::UnderFrequency));
        assert_eq!(detector.take_expired(184.0), None);
        assert_eq!(detector.take_expired(186.0), Some(Polarity::UnderFrequency));
        assert_eq!(detector.take_expired(187.0), None);
        assert_eq!(detector.active_event(186.0), None);
    }

    #[test]
    fn rising_series_is_over_frequency() {
        let mut detector = FrequencyEventDetector::new(DetectorSettings::default());
        let events = feed(&mut detector, 0.0, &[60.0, 60.01, 60.02, 60.03, 60.045, 60.06]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].polarity, Polarity::OverFrequency);
    }

    #[test]
    fn shallow_dip_is_ignored() {
        let mut detector = FrequencyEventDetector::new(DetectorSettings::default());
        let events = feed(&mut detector, 0.0, &[60.0, 59.98, 59.974, 59.972, 59.971, 59.970]);
        assert!(events.is_empty());
    }

    #[test]
    fn opposite_polarity_is_suppressed_during_response() {
        let mut detector = FrequencyEventDetector::new(DetectorSettings::default());
        feed(&mut detector, 0.0, &[60.0, 59.99, 59.98, 59.97, 59.955, 59.94]);
        let events = feed(&mut detector, 10.0, &[60.0, 60.01, 60.02, 60.03, 60.045, 60.06]);
        assert!(events.is_empty());
        assert_eq!(detector.active_event(20.0), Some(Polarity::UnderFrequency));
    }

    #[test]
    fn recovery_clears_pending_deviation() {
        let mut detector = FrequencyEventDetector::new(DetectorSettings::default());
        feed(&mut detector, 0.0, &[60.0, 59.99, 59.98, 59.97]);
        assert!(detector.observe(4.0, 59.98).is_none());
        assert!(detector.observe(5.0, 59.965).is_none());
        assert_eq!(detector.active_event(5.0), None);
    }
}
