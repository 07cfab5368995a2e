//! Boundary between the control core and the device transport layer.
//!
//! The core never talks to a message bus directly. Outbound control goes
//! through a [`ControlSink`]; inbound discovery and property notifications
//! arrive as [`TransportEvent`]s on the aggregator's command channel.

use std::sync::Mutex;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::devices::{Direction, ResourceProperties};

/// A setpoint issued to one remote device.
#[derive(Debug, Clone, PartialEq)]
pub struct SetpointCommand {
    pub id: String,
    pub direction: Direction,
    pub watts: f64,
}

/// Aggregate price and clock broadcast to connected devices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusUpdate {
    /// UTC seconds since the epoch.
    pub time: i64,
    /// Tenths of a cent per kWh.
    pub price: u32,
}

/// Notifications delivered by the discovery layer.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Discovered {
        id: String,
        properties: ResourceProperties,
    },
    PropertiesChanged {
        id: String,
        properties: ResourceProperties,
    },
    Lost {
        id: String,
    },
}

/// Outbound side effects of the core.
///
/// Both calls are fire-and-forget: implementations must not block and the
/// core never waits on a reply.
pub trait ControlSink: Send + Sync {
    /// Delivers a setpoint to the remote device behind `id`.
    fn send_setpoint(&self, id: &str, direction: Direction, watts: f64);

    /// Announces a changed price/time status. Ignored by default.
    fn broadcast_status(&self, _status: &StatusUpdate) {}
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ControlSink for NullSink {
    fn send_setpoint(&self, _id: &str, _direction: Direction, _watts: f64) {}
}

/// Sink that keeps every command in memory, for inspection.
#[derive(Debug, Default)]
pub struct RecordingSink {
    setpoints: Mutex<Vec<SetpointCommand>>,
    statuses: Mutex<Vec<StatusUpdate>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns all recorded setpoints.
    pub fn take_setpoints(&self) -> Vec<SetpointCommand> {
        self.setpoints
            .lock()
            .map(|mut s| std::mem::take(&mut *s))
            .unwrap_or_default()
    }

    /// Removes and returns all recorded status broadcasts.
    pub fn take_statuses(&self) -> Vec<StatusUpdate> {
        self.statuses
            .lock()
            .map(|mut s| std::mem::take(&mut *s))
            .unwrap_or_default()
    }
}

impl ControlSink for RecordingSink {
    fn send_setpoint(&self, id: &str, direction: Direction, watts: f64) {
        if let Ok(mut setpoints) = self.setpoints.lock() {
            setpoints.push(SetpointCommand {
                id: id.to_string(),
                direction,
                watts,
            });
        }
    }

    fn broadcast_status(&self, status: &StatusUpdate) {
        if let Ok(mut statuses) = self.statuses.lock() {
            statuses.push(*status);
        }
    }
}

/// Message carried from a [`ChannelSink`] to the transport task.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Setpoint(SetpointCommand),
    Status(StatusUpdate),
}

/// Sink that forwards commands to a transport task over an unbounded channel.
///
/// A closed channel means the transport has shut down; commands are dropped.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: UnboundedSender<OutboundMessage>,
}

impl ChannelSink {
    pub fn new(tx: UnboundedSender<OutboundMessage>) -> Self {
        Self { tx }
    }
}

impl ControlSink for ChannelSink {
    fn send_setpoint(&self, id: &str, direction: Direction, watts: f64) {
        let _ = self.tx.send(OutboundMessage::Setpoint(SetpointCommand {
            id: id.to_string(),
            direction,
            watts,
        }));
    }

    fn broadcast_status(&self, status: &StatusUpdate) {
        let _ = self.tx.send(OutboundMessage::Status(*status));
    }
}

/// In-process stand-in for a device bus: logs every outbound message.
///
/// Runs until `stop` is cancelled or every sender is dropped.
pub async fn run_loopback(mut rx: UnboundedReceiver<OutboundMessage>, stop: CancellationToken) {
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            message = rx.recv() => match message {
                Some(OutboundMessage::Setpoint(cmd)) => {
                    info!(id = %cmd.id, direction = %cmd.direction, watts = cmd.watts, "setpoint");
                }
                Some(OutboundMessage::Status(status)) => {
                    debug!(time = status.time, price = status.price, "status");
                }
                None => break,
            },
        }
    }
}
