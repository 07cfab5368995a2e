//! Fleet-level view of all discovered resources.
//!
//! The aggregator owns every [`EnergyResource`] by value, keeps the subset
//! selected by the current target filter, and on each tick advances the
//! physics, refreshes the totals and re-runs dispatch for the active target.

use std::sync::Arc;
use std::time::Duration;

use indexmap::{IndexMap, IndexSet};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::devices::{Direction, EnergyResource, ResourceProperties};
use crate::sim::dispatch::DispatchAllocator;
use crate::sim::types::{Dispatch, ServiceDecision};
use crate::transport::{ControlSink, StatusUpdate, TransportEvent};

/// Errors reported by aggregator operations. None of them change state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregatorError {
    #[error("unknown resource: {0}")]
    UnknownResource(String),
}

/// Sums over the filtered subset.
///
/// Power totals are available capacity: rated power of every filtered
/// resource whose source pool in that direction is not empty.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AggregateTotals {
    pub export_power: f64,
    pub export_energy: f64,
    pub import_power: f64,
    pub import_energy: f64,
}

impl AggregateTotals {
    pub fn available_power(&self, direction: Direction) -> f64 {
        match direction {
            Direction::Export => self.export_power,
            Direction::Import => self.import_power,
        }
    }

    fn collect<'a>(resources: impl Iterator<Item = &'a EnergyResource>) -> Self {
        resources.fold(Self::default(), |mut acc, r| {
            if r.energy(Direction::Export) > 0.0 {
                acc.export_power += r.rated_power(Direction::Export);
            }
            if r.energy(Direction::Import) > 0.0 {
                acc.import_power += r.rated_power(Direction::Import);
            }
            acc.export_energy += r.energy(Direction::Export);
            acc.import_energy += r.energy(Direction::Import);
            acc
        })
    }
}

/// True if `id` contains every filter substring. An empty filter matches all.
pub fn matches_targets(id: &str, targets: &[String]) -> bool {
    targets.iter().all(|t| id.contains(t.as_str()))
}

fn select_mut<'a>(
    resources: &'a mut IndexMap<String, EnergyResource>,
    filtered: &IndexSet<String>,
) -> Vec<&'a mut EnergyResource> {
    resources
        .iter_mut()
        .filter(|(id, _)| filtered.contains(id.as_str()))
        .map(|(_, r)| r)
        .collect()
}

pub struct ResourceAggregator {
    resources: IndexMap<String, EnergyResource>,
    targets: Vec<String>,
    filtered: IndexSet<String>,
    totals: AggregateTotals,
    export_watts: f64,
    import_watts: f64,
    /// Tenths of a cent per kWh.
    price: u32,
    time: i64,
    allocator: DispatchAllocator,
    sink: Arc<dyn ControlSink>,
}

impl ResourceAggregator {
    pub fn new(allocator: DispatchAllocator, sink: Arc<dyn ControlSink>) -> Self {
        Self {
            resources: IndexMap::new(),
            targets: Vec::new(),
            filtered: IndexSet::new(),
            totals: AggregateTotals::default(),
            export_watts: 0.0,
            import_watts: 0.0,
            price: 0,
            time: 0,
            allocator,
            sink,
        }
    }

    /// Inserts a resource, replacing any existing one with the same id.
    pub fn add(&mut self, resource: EnergyResource) {
        let id = resource.id().to_string();
        if self.resources.insert(id.clone(), resource).is_some() {
            warn!(target: "resource_events", %id, "resource rediscovered, state replaced");
        }
        self.refilter();
    }

    /// Overwrites a resource's properties with a fresh report.
    pub fn update(&mut self, id: &str, properties: ResourceProperties) -> Result<(), AggregatorError> {
        let resource = self
            .resources
            .get_mut(id)
            .ok_or_else(|| AggregatorError::UnknownResource(id.to_string()))?;
        resource.update(properties);
        self.refilter();
        Ok(())
    }

    /// Removes a resource. Removing an unknown id does nothing.
    pub fn remove(&mut self, id: &str) -> Option<EnergyResource> {
        let removed = self.resources.shift_remove(id);
        if removed.is_some() {
            self.refilter();
        }
        removed
    }

    /// Applies a discovery-layer notification.
    pub fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Discovered { id, properties } => {
                info!(target: "resource_events", %id, "resource discovered");
                self.add(EnergyResource::new(id, properties));
            }
            TransportEvent::PropertiesChanged { id, properties } => {
                if let Err(err) = self.update(&id, properties) {
                    warn!(target: "resource_events", error = %err, "property update ignored");
                }
            }
            TransportEvent::Lost { id } => {
                if self.remove(&id).is_some() {
                    info!(target: "resource_events", %id, "resource lost");
                }
            }
        }
    }

    /// Replaces the target filter. A resource is selected only if its id
    /// contains every substring; an empty list selects all resources.
    pub fn set_targets(&mut self, targets: Vec<String>) {
        debug!(?targets, "target filter set");
        self.targets = targets;
        self.refilter();
    }

    /// Recomputes the filtered subset. Resources that drop out of the subset
    /// are stopped so they do not keep running without supervision.
    fn refilter(&mut self) {
        let filtered: IndexSet<String> = self
            .resources
            .keys()
            .filter(|id| matches_targets(id, &self.targets))
            .cloned()
            .collect();

        for (id, resource) in self.resources.iter_mut() {
            if filtered.contains(id.as_str()) {
                continue;
            }
            for direction in [Direction::Export, Direction::Import] {
                if resource.is_active(direction) {
                    resource.set_setpoint(direction, 0.0, self.sink.as_ref());
                }
            }
        }

        self.filtered = filtered;
        self.refresh_totals();
    }

    fn refresh_totals(&mut self) {
        self.totals = AggregateTotals::collect(self.filtered_resources());
        self.export_watts = self.export_watts.min(self.totals.export_power);
        self.import_watts = self.import_watts.min(self.totals.import_power);
    }

    /// Sets the aggregate export target, clamped to available export power.
    /// A nonzero target clears the import target.
    pub fn set_export_watts(&mut self, watts: f64) -> f64 {
        self.export_watts = clamp_target(watts, self.totals.export_power);
        if self.export_watts > 0.0 {
            self.import_watts = 0.0;
        }
        self.export_watts
    }

    /// Sets the aggregate import target, clamped to available import power.
    /// A nonzero target clears the export target.
    pub fn set_import_watts(&mut self, watts: f64) -> f64 {
        self.import_watts = clamp_target(watts, self.totals.import_power);
        if self.import_watts > 0.0 {
            self.export_watts = 0.0;
        }
        self.import_watts
    }

    /// Applies a scheduler decision: first the filter, then the dispatch
    /// resolved against the refreshed totals.
    pub fn apply(&mut self, decision: &ServiceDecision) {
        if let Some(targets) = &decision.targets {
            self.set_targets(targets.clone());
        }
        match decision.dispatch {
            Dispatch::Idle => {
                self.export_watts = 0.0;
                self.import_watts = 0.0;
            }
            Dispatch::Export(fraction) => {
                self.import_watts = 0.0;
                self.set_export_watts(self.totals.export_power * fraction);
            }
            Dispatch::Import(fraction) => {
                self.export_watts = 0.0;
                self.set_import_watts(self.totals.import_power * fraction);
            }
        }
        debug!(
            dispatch = %decision.dispatch,
            export_watts = self.export_watts,
            import_watts = self.import_watts,
            "service decision applied"
        );
    }

    /// Advances every resource, refreshes totals, then dispatches the active
    /// target over the filtered subset and releases the other direction.
    pub fn tick(&mut self, elapsed: Duration) {
        for resource in self.resources.values_mut() {
            resource.advance(elapsed);
        }
        self.refresh_totals();

        let sink = self.sink.as_ref();
        let mut selected = select_mut(&mut self.resources, &self.filtered);
        if self.export_watts > 0.0 {
            self.allocator.release(&mut selected, Direction::Import, sink);
            self.allocator
                .allocate(&mut selected, self.export_watts, Direction::Export, sink);
        } else if self.import_watts > 0.0 {
            self.allocator.release(&mut selected, Direction::Export, sink);
            self.allocator
                .allocate(&mut selected, self.import_watts, Direction::Import, sink);
        } else {
            self.allocator.release(&mut selected, Direction::Export, sink);
            self.allocator.release(&mut selected, Direction::Import, sink);
        }
    }

    pub fn set_price(&mut self, price: u32) {
        self.price = price;
    }

    pub fn set_time(&mut self, time: i64) {
        self.time = time;
    }

    pub fn status(&self) -> StatusUpdate {
        StatusUpdate {
            time: self.time,
            price: self.price,
        }
    }

    pub fn get(&self, id: &str) -> Option<&EnergyResource> {
        self.resources.get(id)
    }

    /// All resources in discovery order.
    pub fn resources(&self) -> impl Iterator<Item = &EnergyResource> {
        self.resources.values()
    }

    /// Resources selected by the current filter, in discovery order.
    pub fn filtered_resources(&self) -> impl Iterator<Item = &EnergyResource> {
        self.resources
            .iter()
            .filter(|(id, _)| self.filtered.contains(id.as_str()))
            .map(|(_, r)| r)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    pub fn totals(&self) -> AggregateTotals {
        self.totals
    }

    pub fn export_watts(&self) -> f64 {
        self.export_watts
    }

    pub fn import_watts(&self) -> f64 {
        self.import_watts
    }
}

fn clamp_target(watts: f64, available: f64) -> f64 {
    if watts.is_finite() {
        watts.clamp(0.0, available.max(0.0))
    } else {
        0.0
    }
}
