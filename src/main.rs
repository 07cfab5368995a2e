//! VPP dispatch entry point: CLI wiring, config loading and task startup.

use std::process;
use std::sync::Arc;

use anyhow::{Context, bail};
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::{info, warn};

use vpp_dispatch::cli;
use vpp_dispatch::config::VppConfig;
use vpp_dispatch::console;
use vpp_dispatch::runtime::{Controller, ControllerSettings};
use vpp_dispatch::sim::aggregator::ResourceAggregator;
use vpp_dispatch::sim::dispatch::DispatchAllocator;
use vpp_dispatch::sim::service::GridServiceScheduler;
use vpp_dispatch::telemetry;
use vpp_dispatch::transport::{self, ChannelSink, ControlSink};

fn load_config(opts: &cli::CliOptions) -> anyhow::Result<VppConfig> {
    let config = match (&opts.config, &opts.preset) {
        (Some(path), _) => VppConfig::from_toml_file(path)?,
        (None, Some(name)) => VppConfig::from_preset(name)?,
        (None, None) => VppConfig::default_preset(),
    };

    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("{e}");
        }
        bail!("{} configuration error(s)", errors.len());
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = match cli::parse_args() {
        Ok(opts) => opts,
        Err(e) => {
            eprintln!("error: {e}");
            cli::print_usage();
            process::exit(2);
        }
    };

    let config = load_config(&opts)?;
    let data_guard =
        telemetry::init_tracing(config.logger.path.as_deref()).context("installing tracing subscriber")?;
    let schedules = config.schedules.load().context("loading schedules")?;

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let sink: Arc<dyn ControlSink> = Arc::new(ChannelSink::new(outbound_tx));
    let aggregator = ResourceAggregator::new(DispatchAllocator::new(config.dispatch.allocation), sink.clone());
    let scheduler = GridServiceScheduler::new(schedules, config.frequency);
    let settings = ControllerSettings::from_config(&config, opts.operator);

    let controller = Controller::spawn(aggregator, scheduler, sink, settings);
    let loopback = tokio::spawn(transport::run_loopback(outbound_rx, controller.stop_token()));

    for resource in &config.resources {
        controller
            .aggregator()
            .resource_discovered(resource.id.clone(), resource.properties)
            .context("announcing configured resources")?;
    }
    info!(resources = config.resources.len(), "fleet announced, type h for help");

    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = std::io::stdout();
    let interrupted = tokio::select! {
        result = console::run(stdin, &mut stdout, controller.aggregator(), controller.services()) => {
            if let Err(err) = result {
                warn!(%err, "console closed");
            }
            false
        }
        _ = telemetry::shutdown_signal() => true,
    };

    controller.shutdown().await;
    if let Err(err) = loopback.await {
        warn!(%err, "transport task ended abnormally");
    }
    if interrupted {
        // a pending stdin read cannot be cancelled and would hold the runtime open
        drop(data_guard);
        process::exit(0);
    }
    Ok(())
}
