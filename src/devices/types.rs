//! Common types shared by resource twins, the dispatcher, and the transport boundary.

use std::fmt;

use serde::Deserialize;

/// Power flow direction relative to the grid.
///
/// - `Export`: the resource delivers power to the grid (discharge)
/// - `Import`: the resource draws power from the grid (charge)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Export,
    Import,
}

impl Direction {
    /// Returns the other direction.
    pub fn opposite(self) -> Self {
        match self {
            Self::Export => Self::Import,
            Self::Import => Self::Export,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Export => f.write_str("export"),
            Self::Import => f.write_str("import"),
        }
    }
}

/// Full property set reported by a device at discovery or on update.
///
/// Power in W, energy in Wh, ramp in W/s, idle losses in Wh per hour.
/// Updates overwrite every field of the twin, so all fields are required
/// in spirit; missing TOML keys default to zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResourceProperties {
    pub rated_export_power: f64,
    pub rated_export_energy: f64,
    pub export_ramp: f64,
    pub export_power: f64,
    pub export_energy: f64,
    pub rated_import_power: f64,
    pub rated_import_energy: f64,
    pub import_ramp: f64,
    pub import_power: f64,
    pub import_energy: f64,
    pub idle_losses: f64,
}

impl ResourceProperties {
    /// Symmetric device: same rating, ramp and energy capacity in both directions,
    /// half charged, idle.
    ///
    /// # Examples
    ///
    /// ```
    /// use vpp_dispatch::devices::ResourceProperties;
    ///
    /// let p = ResourceProperties::symmetric(4000.0, 100.0, 12000.0);
    /// assert_eq!(p.export_energy, 6000.0);
    /// assert_eq!(p.import_energy, 6000.0);
    /// ```
    pub fn symmetric(rated_power: f64, ramp: f64, rated_energy: f64) -> Self {
        Self {
            rated_export_power: rated_power,
            rated_export_energy: rated_energy,
            export_ramp: ramp,
            export_power: 0.0,
            export_energy: rated_energy / 2.0,
            rated_import_power: rated_power,
            rated_import_energy: rated_energy,
            import_ramp: ramp,
            import_power: 0.0,
            import_energy: rated_energy / 2.0,
            idle_losses: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opposite_flips_direction() {
        assert_eq!(Direction::Export.opposite(), Direction::Import);
        assert_eq!(Direction::Import.opposite(), Direction::Export);
    }

    #[test]
    fn properties_parse_with_defaults() {
        let p: ResourceProperties = toml::from_str("rated_export_power = 500.0").unwrap();
        assert_eq!(p.rated_export_power, 500.0);
        assert_eq!(p.import_ramp, 0.0);
    }
}
