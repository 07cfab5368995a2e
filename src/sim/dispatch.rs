//! Greedy allocation of an aggregate power target across resources.

use std::cmp::Ordering;

use serde::Deserialize;

use crate::devices::{Direction, EnergyResource};
use crate::transport::ControlSink;

/// How the last resource reached by the budget is loaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationPolicy {
    /// Every selected resource runs at full rated power. The total may exceed
    /// the budget by less than one device rating.
    #[default]
    WholeDevice,
    /// The last selected resource only receives what is left of the budget.
    Partial,
}

/// Dispatch order: fastest ramp first, then most energy available.
pub fn dispatch_order(a: &EnergyResource, b: &EnergyResource, direction: Direction) -> Ordering {
    b.ramp(direction)
        .total_cmp(&a.ramp(direction))
        .then_with(|| b.energy(direction).total_cmp(&a.energy(direction)))
}

/// Turns an aggregate power budget into per-resource setpoints.
///
/// Resources past the point where the budget runs out are explicitly stopped
/// if they are still active in the dispatched direction.
#[derive(Debug, Default, Clone, Copy)]
pub struct DispatchAllocator {
    policy: AllocationPolicy,
}

impl DispatchAllocator {
    pub fn new(policy: AllocationPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> AllocationPolicy {
        self.policy
    }

    /// Assigns setpoints for `budget` watts in `direction`.
    ///
    /// `resources` is reordered in dispatch order. A resource with an empty
    /// headroom pool in `direction` is never selected. A setpoint is only sent
    /// when it differs from the one the resource already holds.
    ///
    /// Returns the part of the budget left unassigned.
    ///
    /// # Examples
    ///
    /// ```
    /// use vpp_dispatch::devices::{Direction, EnergyResource, ResourceProperties};
    /// use vpp_dispatch::sim::dispatch::DispatchAllocator;
    /// use vpp_dispatch::transport::NullSink;
    ///
    /// let mut slow = EnergyResource::new("/der/slow", ResourceProperties::symmetric(300.0, 50.0, 1000.0));
    /// let mut fast = EnergyResource::new("/der/fast", ResourceProperties::symmetric(300.0, 100.0, 1000.0));
    /// let mut pool = vec![&mut slow, &mut fast];
    ///
    /// let residual = DispatchAllocator::default().allocate(&mut pool, 300.0, Direction::Export, &NullSink);
    /// assert_eq!(residual, 0.0);
    /// assert_eq!(fast.setpoint(Direction::Export), 300.0);
    /// assert_eq!(slow.setpoint(Direction::Export), 0.0);
    /// ```
    pub fn allocate(
        &self,
        resources: &mut [&mut EnergyResource],
        budget: f64,
        direction: Direction,
        sink: &dyn ControlSink,
    ) -> f64 {
        resources.sort_by(|a, b| dispatch_order(a, b, direction));

        let mut remaining = if budget.is_finite() { budget.max(0.0) } else { 0.0 };
        for resource in resources.iter_mut() {
            let rated = resource.rated_power(direction);
            let eligible = rated > 0.0 && resource.energy(direction) > 0.0;

            if remaining > 0.0 && eligible {
                let watts = match self.policy {
                    AllocationPolicy::WholeDevice => rated,
                    AllocationPolicy::Partial => rated.min(remaining),
                };
                if resource.setpoint(direction) != watts {
                    resource.set_setpoint(direction, watts, sink);
                }
                remaining = (remaining - rated).max(0.0);
            } else if resource.is_active(direction) {
                resource.set_setpoint(direction, 0.0, sink);
            }
        }
        remaining
    }

    /// Stops every resource still active in `direction`.
    pub fn release(&self, resources: &mut [&mut EnergyResource], direction: Direction, sink: &dyn ControlSink) {
        self.allocate(resources, 0.0, direction, sink);
    }
}
