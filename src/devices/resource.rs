use std::time::Duration;

use crate::devices::types::{Direction, ResourceProperties};
use crate::transport::ControlSink;

const SECONDS_PER_HOUR: f64 = 3600.0;

/// Replaces negative and non-finite readings with zero.
fn non_negative(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

/// Moves up to `wh` from `source` into `target`, limited by what `source`
/// holds and what `target` can take.
fn transfer(source: &mut Flow, target: &mut Flow, wh: f64) {
    let moved = non_negative(wh).min(source.energy).min(target.headroom());
    source.energy -= moved;
    target.energy += moved;
}

/// Power and energy state for one direction of flow.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Flow {
    rated_power: f64,
    rated_energy: f64,
    ramp: f64,
    power: f64,
    /// Headroom in this direction: energy that can still be exported, or
    /// still be absorbed when importing.
    energy: f64,
    setpoint: f64,
}

impl Flow {
    fn overwrite(&mut self, rated_power: f64, rated_energy: f64, ramp: f64, power: f64, energy: f64) {
        self.rated_power = non_negative(rated_power);
        self.rated_energy = non_negative(rated_energy);
        self.ramp = non_negative(ramp);
        self.power = power;
        self.energy = energy;
        self.normalize();
    }

    fn normalize(&mut self) {
        self.setpoint = non_negative(self.setpoint).min(self.rated_power);
        self.power = non_negative(self.power).min(self.setpoint);
        self.energy = non_negative(self.energy).min(self.rated_energy);
    }

    fn stop(&mut self) {
        self.setpoint = 0.0;
        self.power = 0.0;
    }

    fn headroom(&self) -> f64 {
        (self.rated_energy - self.energy).max(0.0)
    }

    /// Moves power toward the setpoint without overshooting and returns the
    /// energy delivered over the step, in Wh.
    fn ramp_and_integrate(&mut self, secs: f64) -> f64 {
        let start = self.power;
        let step = self.ramp * secs;
        let next = if start < self.setpoint {
            (start + step).min(self.setpoint)
        } else {
            (start - step).max(self.setpoint)
        };
        self.power = next;

        let hours = secs / SECONDS_PER_HOUR;
        let ramp_delta = next - start;
        if next < self.rated_power {
            // trapezoid under the linear ramp
            start * hours + ramp_delta * hours / 2.0
        } else {
            next * hours
        }
    }
}

/// Digital twin of one grid-connected device.
///
/// The twin tracks what the device was told to do (setpoints) and simulates
/// what it is doing (power ramping toward the setpoint, energy moving between
/// the export and import headroom pools). Export and import are mutually
/// exclusive: a nonzero setpoint in one direction always clears the other.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use vpp_dispatch::devices::{Direction, EnergyResource, ResourceProperties};
/// use vpp_dispatch::transport::NullSink;
///
/// let mut der = EnergyResource::new("/der/1", ResourceProperties::symmetric(1000.0, 100.0, 1000.0));
/// der.set_setpoint(Direction::Export, 1000.0, &NullSink);
/// der.advance(Duration::from_secs(5));
/// assert_eq!(der.power(Direction::Export), 500.0);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct EnergyResource {
    id: String,
    export: Flow,
    import: Flow,
    /// Self-discharge in Wh per hour while idle.
    idle_losses: f64,
}

impl EnergyResource {
    /// Creates a twin from the properties reported at discovery.
    ///
    /// Reported power is taken as the device's current setpoint. A device that
    /// reports power in both directions is treated as exporting.
    pub fn new(id: impl Into<String>, properties: ResourceProperties) -> Self {
        let mut export = Flow {
            setpoint: properties.export_power,
            ..Flow::default()
        };
        let mut import = Flow {
            setpoint: properties.import_power,
            ..Flow::default()
        };
        export.overwrite(
            properties.rated_export_power,
            properties.rated_export_energy,
            properties.export_ramp,
            properties.export_power,
            properties.export_energy,
        );
        import.overwrite(
            properties.rated_import_power,
            properties.rated_import_energy,
            properties.import_ramp,
            properties.import_power,
            properties.import_energy,
        );
        if export.setpoint > 0.0 {
            import.stop();
        }

        Self {
            id: id.into(),
            export,
            import,
            idle_losses: non_negative(properties.idle_losses),
        }
    }

    /// Overwrites rated and dynamic values with a fresh device report.
    ///
    /// Setpoints are kept but re-clamped to the new ratings; reported power
    /// above the current setpoint is clamped down to it.
    pub fn update(&mut self, properties: ResourceProperties) {
        self.export.overwrite(
            properties.rated_export_power,
            properties.rated_export_energy,
            properties.export_ramp,
            properties.export_power,
            properties.export_energy,
        );
        self.import.overwrite(
            properties.rated_import_power,
            properties.rated_import_energy,
            properties.import_ramp,
            properties.import_power,
            properties.import_energy,
        );
        self.idle_losses = non_negative(properties.idle_losses);
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn flow(&self, direction: Direction) -> &Flow {
        match direction {
            Direction::Export => &self.export,
            Direction::Import => &self.import,
        }
    }

    fn flows_mut(&mut self, direction: Direction) -> (&mut Flow, &mut Flow) {
        match direction {
            Direction::Export => (&mut self.export, &mut self.import),
            Direction::Import => (&mut self.import, &mut self.export),
        }
    }

    pub fn rated_power(&self, direction: Direction) -> f64 {
        self.flow(direction).rated_power
    }

    pub fn rated_energy(&self, direction: Direction) -> f64 {
        self.flow(direction).rated_energy
    }

    /// Ramp rate in W/s.
    pub fn ramp(&self, direction: Direction) -> f64 {
        self.flow(direction).ramp
    }

    /// Actual (ramped) power in W.
    pub fn power(&self, direction: Direction) -> f64 {
        self.flow(direction).power
    }

    /// Remaining headroom in Wh.
    pub fn energy(&self, direction: Direction) -> f64 {
        self.flow(direction).energy
    }

    /// Commanded power in W.
    pub fn setpoint(&self, direction: Direction) -> f64 {
        self.flow(direction).setpoint
    }

    pub fn idle_losses(&self) -> f64 {
        self.idle_losses
    }

    /// True if the twin is commanded or still delivering power in `direction`.
    pub fn is_active(&self, direction: Direction) -> bool {
        let flow = self.flow(direction);
        flow.setpoint > 0.0 || flow.power > 0.0
    }

    /// Snapshot of the twin's current state in report form.
    pub fn properties(&self) -> ResourceProperties {
        ResourceProperties {
            rated_export_power: self.export.rated_power,
            rated_export_energy: self.export.rated_energy,
            export_ramp: self.export.ramp,
            export_power: self.export.power,
            export_energy: self.export.energy,
            rated_import_power: self.import.rated_power,
            rated_import_energy: self.import.rated_energy,
            import_ramp: self.import.ramp,
            import_power: self.import.power,
            import_energy: self.import.energy,
            idle_losses: self.idle_losses,
        }
    }

    /// Commands the device in `direction` and notifies it through `sink`.
    ///
    /// The request is clamped to `[0, rated_power]` (non-finite requests become
    /// zero). The opposite direction's setpoint and power are always cleared,
    /// and actual power drops at once if it exceeds the new setpoint.
    ///
    /// Returns the clamped setpoint that was sent.
    pub fn set_setpoint(&mut self, direction: Direction, watts: f64, sink: &dyn ControlSink) -> f64 {
        let (flow, other) = self.flows_mut(direction);
        let watts = non_negative(watts).min(flow.rated_power);
        flow.setpoint = watts;
        flow.power = flow.power.min(watts);
        other.stop();
        sink.send_setpoint(&self.id, direction, watts);
        watts
    }

    pub fn set_export_setpoint(&mut self, watts: f64, sink: &dyn ControlSink) -> f64 {
        self.set_setpoint(Direction::Export, watts, sink)
    }

    pub fn set_import_setpoint(&mut self, watts: f64, sink: &dyn ControlSink) -> f64 {
        self.set_setpoint(Direction::Import, watts, sink)
    }

    /// Advances the simulated device by `elapsed` wall-clock time.
    ///
    /// The active direction ramps toward its setpoint and moves the delivered
    /// energy out of its own headroom into the opposite pool, never more than
    /// the source holds or the target can take. When the source
    /// pool empties the device stops on its own. With both setpoints at zero
    /// the device idles: power drops to zero and idle losses drain the export
    /// pool into the import pool.
    pub fn advance(&mut self, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        let active = if self.export.setpoint > 0.0 {
            Some(Direction::Export)
        } else if self.import.setpoint > 0.0 {
            Some(Direction::Import)
        } else {
            None
        };

        match active {
            Some(direction) => {
                let (source, target) = self.flows_mut(direction);
                let wh = source.ramp_and_integrate(secs);
                transfer(source, target, wh);
                if source.energy <= 0.0 {
                    source.stop();
                }
            }
            None => {
                let wh = self.idle_losses * secs / SECONDS_PER_HOUR;
                self.export.power = 0.0;
                self.import.power = 0.0;
                transfer(&mut self.export, &mut self.import, wh);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{NullSink, RecordingSink};

    fn scenario_a() -> EnergyResource {
        EnergyResource::new(
            "/der/a",
            ResourceProperties {
                rated_export_power: 1000.0,
                rated_export_energy: 1000.0,
                export_ramp: 100.0,
                export_energy: 500.0,
                rated_import_power: 1000.0,
                rated_import_energy: 1000.0,
                import_ramp: 100.0,
                import_energy: 500.0,
                ..ResourceProperties::default()
            },
        )
    }

    fn assert_bounds(der: &EnergyResource) {
        for d in [Direction::Export, Direction::Import] {
            assert!(der.power(d) >= 0.0);
            assert!(der.power(d) <= der.setpoint(d));
            assert!(der.setpoint(d) <= der.rated_power(d));
            assert!(der.energy(d) >= 0.0);
            assert!(der.energy(d) <= der.rated_energy(d));
        }
    }

    #[test]
    fn test_ramp_and_trapezoid_energy() {
        let mut der = scenario_a();
        der.set_export_setpoint(1000.0, &NullSink);
        der.advance(Duration::from_millis(5000));

        let expected_wh = 500.0 * (5.0 / 3600.0) / 2.0;
        assert!((der.power(Direction::Export) - 500.0).abs() < 1e-9);
        assert!((der.energy(Direction::Export) - (500.0 - expected_wh)).abs() < 1e-9);
        assert!((der.energy(Direction::Import) - (500.0 + expected_wh)).abs() < 1e-9);
        assert!((expected_wh - 0.347).abs() < 1e-3);
        assert_bounds(&der);
    }

    #[test]
    fn test_full_rated_power_uses_rectangle() {
        let mut der = scenario_a();
        der.set_export_setpoint(1000.0, &NullSink);
        der.advance(Duration::from_secs(10));
        let before = der.energy(Direction::Export);

        der.advance(Duration::from_secs(36));
        assert_eq!(der.power(Direction::Export), 1000.0);
        assert!((before - der.energy(Direction::Export) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_ramp_never_overshoots() {
        let mut der = scenario_a();
        der.set_export_setpoint(250.0, &NullSink);
        der.advance(Duration::from_secs(60));
        assert_eq!(der.power(Direction::Export), 250.0);
        assert_bounds(&der);
    }

    #[test]
    fn test_setpoint_clamped_to_rating() {
        let sink = RecordingSink::new();
        let mut der = scenario_a();
        let sent = der.set_export_setpoint(5000.0, &sink);
        assert_eq!(sent, 1000.0);
        assert_eq!(der.setpoint(Direction::Export), 1000.0);

        let sent = der.set_import_setpoint(-3.0, &sink);
        assert_eq!(sent, 0.0);

        let commands = sink.take_setpoints();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].watts, 1000.0);
        assert_eq!(commands[1].direction, Direction::Import);
    }

    #[test]
    fn test_setpoint_clears_opposite_direction() {
        let mut der = scenario_a();
        der.set_import_setpoint(800.0, &NullSink);
        der.advance(Duration::from_secs(3));
        assert!(der.power(Direction::Import) > 0.0);

        der.set_export_setpoint(400.0, &NullSink);
        assert_eq!(der.setpoint(Direction::Import), 0.0);
        assert_eq!(der.power(Direction::Import), 0.0);
        assert!(!der.is_active(Direction::Import));
        assert!(der.is_active(Direction::Export));
    }

    #[test]
    fn test_lowering_setpoint_drops_power() {
        let mut der = scenario_a();
        der.set_export_setpoint(1000.0, &NullSink);
        der.advance(Duration::from_secs(8));
        der.set_export_setpoint(300.0, &NullSink);
        assert_eq!(der.power(Direction::Export), 300.0);
        der.advance(Duration::from_secs(1));
        assert_bounds(&der);
    }

    #[test]
    fn test_zero_elapsed_is_noop() {
        let mut der = scenario_a();
        der.set_export_setpoint(1000.0, &NullSink);
        der.advance(Duration::from_secs(2));
        der.advance(Duration::ZERO);
        let once = der.clone();
        der.advance(Duration::ZERO);
        assert_eq!(der, once);
    }

    #[test]
    fn test_idle_losses_move_energy_to_import() {
        let mut der = EnergyResource::new(
            "/der/idle",
            ResourceProperties {
                idle_losses: 36.0,
                ..ResourceProperties::symmetric(1000.0, 100.0, 1000.0)
            },
        );
        der.advance(Duration::from_secs(100));
        assert!((der.energy(Direction::Export) - 499.0).abs() < 1e-9);
        assert!((der.energy(Direction::Import) - 501.0).abs() < 1e-9);
        assert_eq!(der.power(Direction::Export), 0.0);
    }

    #[test]
    fn test_exhausted_source_stops_device() {
        let mut der = EnergyResource::new(
            "/der/low",
            ResourceProperties {
                export_energy: 0.1,
                ..ResourceProperties::symmetric(1000.0, 1000.0, 1000.0)
            },
        );
        let sink = RecordingSink::new();
        der.set_export_setpoint(1000.0, &sink);
        sink.take_setpoints();

        der.advance(Duration::from_secs(10));
        assert_eq!(der.energy(Direction::Export), 0.0);
        assert_eq!(der.setpoint(Direction::Export), 0.0);
        assert_eq!(der.power(Direction::Export), 0.0);
        assert!(sink.take_setpoints().is_empty());
        assert_bounds(&der);
    }

    fn pool_sum(der: &EnergyResource) -> f64 {
        der.energy(Direction::Export) + der.energy(Direction::Import)
    }

    #[test]
    fn test_exhausting_advance_conserves_energy() {
        let mut der = EnergyResource::new(
            "/der/low",
            ResourceProperties {
                export_energy: 0.1,
                ..ResourceProperties::symmetric(1000.0, 100.0, 1000.0)
            },
        );
        let before = pool_sum(&der);
        der.set_export_setpoint(1000.0, &NullSink);
        der.advance(Duration::from_secs(10));

        assert_eq!(der.energy(Direction::Export), 0.0);
        assert!((der.energy(Direction::Import) - 500.1).abs() < 1e-9);
        assert!((pool_sum(&der) - before).abs() < 1e-9);
    }

    #[test]
    fn test_idle_on_empty_export_pool_moves_nothing() {
        let mut der = EnergyResource::new(
            "/der/empty",
            ResourceProperties {
                export_energy: 0.0,
                idle_losses: 36.0,
                ..ResourceProperties::symmetric(1000.0, 100.0, 1000.0)
            },
        );
        der.advance(Duration::from_secs(100));
        assert_eq!(der.energy(Direction::Export), 0.0);
        assert_eq!(der.energy(Direction::Import), 500.0);
    }

    #[test]
    fn test_full_target_pool_caps_transfer() {
        let mut der = EnergyResource::new(
            "/der/full",
            ResourceProperties {
                import_energy: 999.9,
                ..ResourceProperties::symmetric(1000.0, 1000.0, 1000.0)
            },
        );
        let before = pool_sum(&der);
        der.set_export_setpoint(1000.0, &NullSink);
        der.advance(Duration::from_secs(10));

        assert_eq!(der.energy(Direction::Import), 1000.0);
        assert!((pool_sum(&der) - before).abs() < 1e-9);
        assert_bounds(&der);
    }

    #[test]
    fn test_new_takes_reported_power_as_setpoint() {
        let der = EnergyResource::new(
            "/der/busy",
            ResourceProperties {
                export_power: 400.0,
                import_power: 200.0,
                ..ResourceProperties::symmetric(1000.0, 100.0, 1000.0)
            },
        );
        assert_eq!(der.setpoint(Direction::Export), 400.0);
        assert_eq!(der.power(Direction::Export), 400.0);
        assert_eq!(der.setpoint(Direction::Import), 0.0);
        assert_eq!(der.power(Direction::Import), 0.0);
    }

    #[test]
    fn test_update_reclamps_to_new_rating() {
        let mut der = scenario_a();
        der.set_export_setpoint(1000.0, &NullSink);
        der.update(ResourceProperties {
            export_power: 900.0,
            ..ResourceProperties::symmetric(600.0, 50.0, 400.0)
        });
        assert_eq!(der.rated_power(Direction::Export), 600.0);
        assert_eq!(der.setpoint(Direction::Export), 600.0);
        assert_eq!(der.power(Direction::Export), 600.0);
        assert_eq!(der.energy(Direction::Export), 200.0);
        assert_bounds(&der);
    }
}
