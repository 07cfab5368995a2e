//! Decisions passed from the grid-service scheduler to the aggregator.

use std::fmt;

use crate::devices::Direction;

/// Aggregate dispatch request.
///
/// Fractions are of the available power in that direction, resolved by the
/// aggregator after any new target filter has been applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Dispatch {
    /// Clear both export and import targets.
    Idle,
    Export(f64),
    Import(f64),
}

impl Dispatch {
    /// Builds a request from a signed normalized signal: positive imports,
    /// negative exports, zero idles.
    ///
    /// # Examples
    ///
    /// ```
    /// use vpp_dispatch::sim::types::Dispatch;
    ///
    /// assert_eq!(Dispatch::from_signal(-0.25), Dispatch::Export(0.25));
    /// assert_eq!(Dispatch::from_signal(0.0), Dispatch::Idle);
    /// ```
    pub fn from_signal(value: f64) -> Self {
        if value > 0.0 {
            Self::Import(value.min(1.0))
        } else if value < 0.0 {
            Self::Export((-value).min(1.0))
        } else {
            Self::Idle
        }
    }

    /// Full available power in `direction`.
    pub fn full(direction: Direction) -> Self {
        match direction {
            Direction::Export => Self::Export(1.0),
            Direction::Import => Self::Import(1.0),
        }
    }
}

impl fmt::Display for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Export(fraction) => write!(f, "export {:.0}%", fraction * 100.0),
            Self::Import(fraction) => write!(f, "import {:.0}%", fraction * 100.0),
        }
    }
}

/// One scheduler decision: an optional new target filter plus a dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceDecision {
    /// `Some` replaces the aggregator's filter (an empty list selects all).
    pub targets: Option<Vec<String>>,
    pub dispatch: Dispatch,
}

impl ServiceDecision {
    pub fn dispatch(dispatch: Dispatch) -> Self {
        Self {
            targets: None,
            dispatch,
        }
    }

    pub fn with_targets(targets: Vec<String>, dispatch: Dispatch) -> Self {
        Self {
            targets: Some(targets),
            dispatch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_maps_sign_to_direction() {
        assert_eq!(Dispatch::from_signal(0.5), Dispatch::Import(0.5));
        assert_eq!(Dispatch::from_signal(-1.5), Dispatch::Export(1.0));
        assert_eq!(Dispatch::full(Direction::Import), Dispatch::Import(1.0));
    }

    #[test]
    fn display_shows_percentage() {
        assert_eq!(Dispatch::Export(0.25).to_string(), "export 25%");
        assert_eq!(Dispatch::Idle.to_string(), "idle");
    }
}
