//! Tracing setup and the periodic per-resource data rows.

use std::fmt;
use std::path::Path;

use tokio::signal;
use tracing::{Level, Metadata, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::{EnvFilter, Targets, filter_fn};
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{Layer, layer::SubscriberExt, util::SubscriberInitExt};

use crate::devices::{Direction, EnergyResource};

/// Tracing target for resource data rows.
pub const DATA_TARGET: &str = "resource_data";
/// File name prefix of the daily data log.
pub const DATA_FILE_PREFIX: &str = "DATA";

pub const DATA_HEADER: &str = "id\texport_ramp\trated_export_power\trated_export_energy\texport_power\texport_energy\t\
                               import_ramp\trated_import_power\trated_import_energy\timport_power\timport_energy";

/// One tab-separated data row describing a resource.
#[derive(Clone, Debug, PartialEq)]
pub struct DataRow {
    pub id: String,
    pub export_ramp: f64,
    pub rated_export_power: f64,
    pub rated_export_energy: f64,
    pub export_power: f64,
    pub export_energy: f64,
    pub import_ramp: f64,
    pub rated_import_power: f64,
    pub rated_import_energy: f64,
    pub import_power: f64,
    pub import_energy: f64,
}

impl From<&EnergyResource> for DataRow {
    fn from(r: &EnergyResource) -> Self {
        Self {
            id: r.id().to_string(),
            export_ramp: r.ramp(Direction::Export),
            rated_export_power: r.rated_power(Direction::Export),
            rated_export_energy: r.rated_energy(Direction::Export),
            export_power: r.power(Direction::Export),
            export_energy: r.energy(Direction::Export),
            import_ramp: r.ramp(Direction::Import),
            rated_import_power: r.rated_power(Direction::Import),
            rated_import_energy: r.rated_energy(Direction::Import),
            import_power: r.power(Direction::Import),
            import_energy: r.energy(Direction::Import),
        }
    }
}

impl fmt::Display for DataRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{:.3}\t{:.3}\t{:.3}\t{:.3}\t{:.3}\t{:.3}\t{:.3}\t{:.3}\t{:.3}\t{:.3}",
            self.id,
            self.export_ramp,
            self.rated_export_power,
            self.rated_export_energy,
            self.export_power,
            self.export_energy,
            self.import_ramp,
            self.rated_import_power,
            self.rated_import_energy,
            self.import_power,
            self.import_energy
        )
    }
}

/// Emits the header and one row per resource under [`DATA_TARGET`].
pub fn log_data_rows<'a>(resources: impl IntoIterator<Item = &'a EnergyResource>) {
    info!(target: DATA_TARGET, "{DATA_HEADER}");
    for resource in resources {
        info!(target: DATA_TARGET, "{}", DataRow::from(resource));
    }
}

/// Installs the global subscriber.
///
/// Human-readable logs go to stderr, filtered by `RUST_LOG` (default `info`).
/// Data rows never reach stderr; with `data_dir` set they are appended to a
/// daily-rolling `DATA` file through a non-blocking writer whose guard must
/// be held until shutdown.
///
/// # Errors
///
/// Returns `TryInitError` if a global subscriber is already installed.
pub fn init_tracing(data_dir: Option<&Path>) -> Result<Option<WorkerGuard>, TryInitError> {
    let console_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(console_filter)
        .with_filter(filter_fn(|meta: &Metadata<'_>| meta.target() != DATA_TARGET));

    let (data, guard) = match data_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, DATA_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false)
                .with_level(false)
                .with_filter(Targets::new().with_target(DATA_TARGET, Level::INFO));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(data)
        .try_init()?;
    Ok(guard)
}

/// Resolves on Ctrl+C or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(%err, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(%err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! { _ = ctrl_c => {}, _ = terminate => {}, }
    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::ResourceProperties;

    #[test]
    fn data_row_matches_header_columns() {
        let der = EnergyResource::new("/der/1", ResourceProperties::symmetric(4000.0, 100.0, 12000.0));
        let row = DataRow::from(&der).to_string();
        let fields: Vec<&str> = row.split('\t').collect();
        assert_eq!(fields.len(), DATA_HEADER.split('\t').count());
        assert_eq!(fields[0], "/der/1");
        assert_eq!(fields[2], "4000.000");
        assert_eq!(fields[10], "6000.000");
    }
}
