//! Periodic control tasks and the handles used to reach them.
//!
//! The aggregator lives inside a single actor task. Everything else
//! (transport notifications, the grid-service task, the console, the status
//! broadcaster) talks to it through an [`AggregatorHandle`]. Each loop paces
//! itself with a [`Clock`] so processing time comes out of its sleep.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Utc};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::VppConfig;
use crate::devices::{EnergyResource, ResourceProperties};
use crate::sim::aggregator::{AggregateTotals, ResourceAggregator};
use crate::sim::clock::Clock;
use crate::sim::service::{GridServiceScheduler, SchedulerSummary, Service};
use crate::sim::types::ServiceDecision;
use crate::telemetry::log_data_rows;
use crate::transport::{ControlSink, StatusUpdate, TransportEvent};

/// The control task behind a handle has stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("controller has stopped")]
pub struct Stopped;

/// Point-in-time copy of the aggregator state.
#[derive(Debug, Clone)]
pub struct AggregateSnapshot {
    /// Every resource, in discovery order.
    pub resources: Vec<EnergyResource>,
    /// Ids selected by the target filter.
    pub filtered: Vec<String>,
    pub targets: Vec<String>,
    pub totals: AggregateTotals,
    pub export_watts: f64,
    pub import_watts: f64,
    pub status: StatusUpdate,
}

impl AggregateSnapshot {
    fn capture(aggregator: &ResourceAggregator) -> Self {
        Self {
            resources: aggregator.resources().cloned().collect(),
            filtered: aggregator
                .filtered_resources()
                .map(|r| r.id().to_string())
                .collect(),
            targets: aggregator.targets().to_vec(),
            totals: aggregator.totals(),
            export_watts: aggregator.export_watts(),
            import_watts: aggregator.import_watts(),
            status: aggregator.status(),
        }
    }

    /// Resources selected by the target filter.
    pub fn filtered_resources(&self) -> impl Iterator<Item = &EnergyResource> {
        self.resources
            .iter()
            .filter(|r| self.filtered.iter().any(|id| id == r.id()))
    }
}

#[derive(Debug)]
pub enum AggregatorCommand {
    Transport(TransportEvent),
    SetTargets(Vec<String>),
    SetExportWatts(f64),
    SetImportWatts(f64),
    SetPrice(u32),
    Apply(ServiceDecision),
    Snapshot(oneshot::Sender<AggregateSnapshot>),
    Status(oneshot::Sender<StatusUpdate>),
}

/// Cloneable sender side of the aggregator actor.
#[derive(Debug, Clone)]
pub struct AggregatorHandle {
    tx: mpsc::UnboundedSender<AggregatorCommand>,
}

impl AggregatorHandle {
    fn send(&self, command: AggregatorCommand) -> Result<(), Stopped> {
        self.tx.send(command).map_err(|_| Stopped)
    }

    pub fn resource_discovered(&self, id: impl Into<String>, properties: ResourceProperties) -> Result<(), Stopped> {
        self.send(AggregatorCommand::Transport(TransportEvent::Discovered {
            id: id.into(),
            properties,
        }))
    }

    pub fn resource_property_changed(
        &self,
        id: impl Into<String>,
        properties: ResourceProperties,
    ) -> Result<(), Stopped> {
        self.send(AggregatorCommand::Transport(TransportEvent::PropertiesChanged {
            id: id.into(),
            properties,
        }))
    }

    pub fn resource_lost(&self, id: impl Into<String>) -> Result<(), Stopped> {
        self.send(AggregatorCommand::Transport(TransportEvent::Lost { id: id.into() }))
    }

    pub fn set_targets(&self, targets: Vec<String>) -> Result<(), Stopped> {
        self.send(AggregatorCommand::SetTargets(targets))
    }

    pub fn set_export_watts(&self, watts: f64) -> Result<(), Stopped> {
        self.send(AggregatorCommand::SetExportWatts(watts))
    }

    pub fn set_import_watts(&self, watts: f64) -> Result<(), Stopped> {
        self.send(AggregatorCommand::SetImportWatts(watts))
    }

    pub fn set_price(&self, price: u32) -> Result<(), Stopped> {
        self.send(AggregatorCommand::SetPrice(price))
    }

    pub fn apply(&self, decision: ServiceDecision) -> Result<(), Stopped> {
        self.send(AggregatorCommand::Apply(decision))
    }

    pub async fn snapshot(&self) -> Result<AggregateSnapshot, Stopped> {
        let (tx, rx) = oneshot::channel();
        self.send(AggregatorCommand::Snapshot(tx))?;
        rx.await.map_err(|_| Stopped)
    }

    pub async fn status(&self) -> Result<StatusUpdate, Stopped> {
        let (tx, rx) = oneshot::channel();
        self.send(AggregatorCommand::Status(tx))?;
        rx.await.map_err(|_| Stopped)
    }
}

#[derive(Debug)]
pub enum ServiceCommand {
    Select(Service),
    Summary(oneshot::Sender<SchedulerSummary>),
}

/// Cloneable sender side of the grid-service task.
#[derive(Debug, Clone)]
pub struct ServiceHandle {
    tx: mpsc::UnboundedSender<ServiceCommand>,
}

impl ServiceHandle {
    pub fn select(&self, service: Service) -> Result<(), Stopped> {
        self.tx.send(ServiceCommand::Select(service)).map_err(|_| Stopped)
    }

    pub async fn summary(&self) -> Result<SchedulerSummary, Stopped> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(ServiceCommand::Summary(tx)).map_err(|_| Stopped)?;
        rx.await.map_err(|_| Stopped)
    }
}

/// Loop timing and startup state for [`Controller::spawn`].
#[derive(Debug, Clone, Copy)]
pub struct ControllerSettings {
    pub resource_period: Duration,
    pub service_period: Duration,
    pub status_period: Duration,
    /// Time between resource data dumps.
    pub data_increment: Duration,
    pub initial_service: Service,
}

impl ControllerSettings {
    /// Settings from `config`. With `operator` off the grid service starts
    /// as [`Service::Off`] whatever the configuration says.
    pub fn from_config(config: &VppConfig, operator: bool) -> Self {
        Self {
            resource_period: config.threads.resource_period(),
            service_period: config.threads.service_period(),
            status_period: config.threads.status_period(),
            data_increment: config.logger.increment(),
            initial_service: if operator {
                config.operator.service
            } else {
                Service::Off
            },
        }
    }
}

/// The three running control loops.
pub struct Controller {
    aggregator: AggregatorHandle,
    services: ServiceHandle,
    stop: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Controller {
    /// Spawns the resource, grid-service and status tasks on the current
    /// tokio runtime.
    pub fn spawn(
        aggregator: ResourceAggregator,
        mut scheduler: GridServiceScheduler,
        sink: Arc<dyn ControlSink>,
        settings: ControllerSettings,
    ) -> Self {
        let stop = CancellationToken::new();
        let (agg_tx, agg_rx) = mpsc::unbounded_channel();
        let (svc_tx, svc_rx) = mpsc::unbounded_channel();
        let aggregator_handle = AggregatorHandle { tx: agg_tx };
        let service_handle = ServiceHandle { tx: svc_tx };

        if settings.initial_service != scheduler.service() {
            scheduler.select(settings.initial_service);
        }

        let tasks = vec![
            tokio::spawn(run_aggregator(
                aggregator,
                agg_rx,
                settings.resource_period,
                settings.data_increment,
                stop.clone(),
            )),
            tokio::spawn(run_services(
                scheduler,
                svc_rx,
                aggregator_handle.clone(),
                settings.service_period,
                stop.clone(),
            )),
            tokio::spawn(run_status(
                aggregator_handle.clone(),
                sink,
                settings.status_period,
                stop.clone(),
            )),
        ];
        info!(
            resource_ms = settings.resource_period.as_millis() as u64,
            service_ms = settings.service_period.as_millis() as u64,
            status_ms = settings.status_period.as_millis() as u64,
            service = %settings.initial_service,
            "controller started"
        );

        Self {
            aggregator: aggregator_handle,
            services: service_handle,
            stop,
            tasks,
        }
    }

    pub fn aggregator(&self) -> &AggregatorHandle {
        &self.aggregator
    }

    pub fn services(&self) -> &ServiceHandle {
        &self.services
    }

    /// Token cancelled when the controller shuts down.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Raises the stop flag and waits for every loop to finish its current tick.
    ///
    /// Returns the number of loops that ended abnormally, each logged as a warning.
    pub async fn shutdown(self) -> usize {
        self.stop.cancel();
        let mut failed = 0;
        for task in self.tasks {
            if let Err(err) = task.await {
                warn!(%err, "control loop ended abnormally");
                failed += 1;
            }
        }
        info!(failed, "controller stopped");
        failed
    }
}

fn handle_command(aggregator: &mut ResourceAggregator, command: AggregatorCommand) {
    match command {
        AggregatorCommand::Transport(event) => aggregator.handle_event(event),
        AggregatorCommand::SetTargets(targets) => aggregator.set_targets(targets),
        AggregatorCommand::SetExportWatts(watts) => {
            let watts = aggregator.set_export_watts(watts);
            info!(watts, "export target set");
        }
        AggregatorCommand::SetImportWatts(watts) => {
            let watts = aggregator.set_import_watts(watts);
            info!(watts, "import target set");
        }
        AggregatorCommand::SetPrice(price) => aggregator.set_price(price),
        AggregatorCommand::Apply(decision) => aggregator.apply(&decision),
        AggregatorCommand::Snapshot(reply) => {
            let _ = reply.send(AggregateSnapshot::capture(aggregator));
        }
        AggregatorCommand::Status(reply) => {
            let _ = reply.send(aggregator.status());
        }
    }
}

async fn run_aggregator(
    mut aggregator: ResourceAggregator,
    mut rx: mpsc::UnboundedReceiver<AggregatorCommand>,
    period: Duration,
    data_increment: Duration,
    stop: CancellationToken,
) {
    let mut clock = Clock::new(period);
    let mut next_dump = Instant::now();
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            command = rx.recv() => match command {
                Some(command) => handle_command(&mut aggregator, command),
                None => break,
            },
            _ = sleep_until(clock.deadline()) => {
                let started = Instant::now();
                let elapsed = clock.tick(started);
                aggregator.set_time(Utc::now().timestamp());
                aggregator.tick(elapsed);
                if started >= next_dump {
                    log_data_rows(aggregator.resources());
                    next_dump = started + data_increment;
                }
            }
        }
    }
    debug!("resource loop stopped");
}

async fn run_services(
    mut scheduler: GridServiceScheduler,
    mut rx: mpsc::UnboundedReceiver<ServiceCommand>,
    aggregator: AggregatorHandle,
    period: Duration,
    stop: CancellationToken,
) {
    let mut clock = Clock::new(period);
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            command = rx.recv() => match command {
                Some(ServiceCommand::Select(service)) => scheduler.select(service),
                Some(ServiceCommand::Summary(reply)) => {
                    let _ = reply.send(scheduler.summary());
                }
                None => break,
            },
            _ = sleep_until(clock.deadline()) => {
                clock.tick(Instant::now());
                if let Some(decision) = scheduler.tick(&Local::now()) {
                    if aggregator.apply(decision).is_err() {
                        break;
                    }
                }
            }
        }
    }
    debug!("service loop stopped");
}

async fn run_status(
    aggregator: AggregatorHandle,
    sink: Arc<dyn ControlSink>,
    period: Duration,
    stop: CancellationToken,
) {
    let mut clock = Clock::new(period);
    let mut last: Option<StatusUpdate> = None;
    while !stop.is_cancelled() {
        let started = Instant::now();
        clock.tick(started);
        let Ok(status) = aggregator.status().await else {
            break;
        };
        if last != Some(status) {
            debug!(time = status.time, price = status.price, "status broadcast");
            sink.broadcast_status(&status);
            last = Some(status);
        }

        tokio::select! {
            _ = stop.cancelled() => break,
            _ = sleep(clock.sleep_after(started.elapsed())) => {}
        }
    }
    debug!("status loop stopped");
}
