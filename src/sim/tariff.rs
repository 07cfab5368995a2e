//! Seasonal time-of-use price tiers.

use std::fmt;

/// Price tier for one hour of the day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceTier {
    OffPeak,
    MidPeak,
    OnPeak,
}

impl fmt::Display for PriceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OffPeak => f.write_str("off-peak"),
            Self::MidPeak => f.write_str("mid-peak"),
            Self::OnPeak => f.write_str("on-peak"),
        }
    }
}

/// Summer runs May through October.
pub fn is_summer(month: u32) -> bool {
    (5..=10).contains(&month)
}

/// Tier for `month` (1-12) and `hour` (0-23).
///
/// Nights (22:00-06:00) are off-peak all year. Summer afternoons 15:00-20:00
/// are on-peak; winter has two on-peak blocks, 06:00-10:00 and 17:00-20:00.
/// Everything else is mid-peak.
///
/// # Examples
///
/// ```
/// use vpp_dispatch::sim::tariff::{price_tier, PriceTier};
///
/// assert_eq!(price_tier(7, 16), PriceTier::OnPeak);
/// assert_eq!(price_tier(1, 16), PriceTier::MidPeak);
/// assert_eq!(price_tier(1, 23), PriceTier::OffPeak);
/// ```
pub fn price_tier(month: u32, hour: u32) -> PriceTier {
    if hour >= 22 || hour < 6 {
        return PriceTier::OffPeak;
    }
    let on_peak = if is_summer(month) {
        (15..20).contains(&hour)
    } else {
        (6..10).contains(&hour) || (17..20).contains(&hour)
    };
    if on_peak {
        PriceTier::OnPeak
    } else {
        PriceTier::MidPeak
    }
}
