//! Operator console: one-letter verbs read line by line.

use std::fmt::Write as _;
use std::io::Write;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::devices::{Direction, EnergyResource};
use crate::runtime::{AggregateSnapshot, AggregatorHandle, ServiceHandle, Stopped};
use crate::sim::service::{SchedulerSummary, Service, UnknownService};

pub const HELP: &str = "\
commands:
  q                 quit
  h                 show this help
  a                 list all resources
  f                 list resources selected by the target filter
  s                 scheduler and aggregate summary
  t [substr ...]    set target filter (no arguments selects all)
  i <watts>         aggregate import target
  e <watts>         aggregate export target
  p <price>         price in tenths of a cent per kWh
  o <service>       grid service: OFF, PJMA, PJMD, EIM, TOU, PDM, FER";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Quit,
    Help,
    ListAll,
    ListFiltered,
    Summary,
    Targets(Vec<String>),
    Import(f64),
    Export(f64),
    Price(u32),
    Service(Service),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command \"{0}\", type h for help")]
    UnknownVerb(String),
    #[error("{verb}: missing {expected}")]
    MissingArgument { verb: char, expected: &'static str },
    #[error("{verb}: too many arguments")]
    TooManyArguments { verb: char },
    #[error("{verb}: invalid value \"{value}\"")]
    InvalidValue { verb: char, value: String },
    #[error(transparent)]
    UnknownService(#[from] UnknownService),
}

fn single_arg<'a>(verb: char, args: &[&'a str], expected: &'static str) -> Result<&'a str, CommandError> {
    match args {
        [] => Err(CommandError::MissingArgument { verb, expected }),
        [value] => Ok(value),
        _ => Err(CommandError::TooManyArguments { verb }),
    }
}

fn watts_arg(verb: char, args: &[&str]) -> Result<f64, CommandError> {
    let raw = single_arg(verb, args, "power in watts")?;
    raw.parse::<f64>()
        .ok()
        .filter(|w| w.is_finite() && *w >= 0.0)
        .ok_or_else(|| CommandError::InvalidValue {
            verb,
            value: raw.to_string(),
        })
}

fn no_args(verb: char, args: &[&str]) -> Result<(), CommandError> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(CommandError::TooManyArguments { verb })
    }
}

/// Parses one console line.
///
/// # Examples
///
/// ```
/// use vpp_dispatch::console::{parse, ConsoleCommand};
///
/// assert_eq!(parse("e 1500"), Ok(ConsoleCommand::Export(1500.0)));
/// assert!(parse("e lots").is_err());
/// ```
pub fn parse(line: &str) -> Result<ConsoleCommand, CommandError> {
    let mut words = line.split_whitespace();
    let verb = words.next().ok_or(CommandError::Empty)?;
    let args: Vec<&str> = words.collect();

    let mut chars = verb.chars();
    let (Some(v), None) = (chars.next(), chars.next()) else {
        return Err(CommandError::UnknownVerb(verb.to_string()));
    };

    let command = match v {
        'q' => no_args(v, &args).map(|_| ConsoleCommand::Quit)?,
        'h' => no_args(v, &args).map(|_| ConsoleCommand::Help)?,
        'a' => no_args(v, &args).map(|_| ConsoleCommand::ListAll)?,
        'f' => no_args(v, &args).map(|_| ConsoleCommand::ListFiltered)?,
        's' => no_args(v, &args).map(|_| ConsoleCommand::Summary)?,
        't' => ConsoleCommand::Targets(args.iter().map(|s| s.to_string()).collect()),
        'i' => ConsoleCommand::Import(watts_arg(v, &args)?),
        'e' => ConsoleCommand::Export(watts_arg(v, &args)?),
        'p' => {
            let raw = single_arg(v, &args, "price")?;
            let price = raw.parse::<u32>().map_err(|_| CommandError::InvalidValue {
                verb: v,
                value: raw.to_string(),
            })?;
            ConsoleCommand::Price(price)
        }
        'o' => ConsoleCommand::Service(single_arg(v, &args, "service name")?.parse()?),
        _ => return Err(CommandError::UnknownVerb(verb.to_string())),
    };
    Ok(command)
}

/// Multi-line block describing one resource.
pub fn format_resource(r: &EnergyResource) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", r.id());
    for (label, d) in [("export", Direction::Export), ("import", Direction::Import)] {
        let _ = writeln!(
            out,
            "  {label}: energy {:.1}/{:.1} Wh, power {:.1} W, setpoint {:.1}/{:.1} W",
            r.energy(d),
            r.rated_energy(d),
            r.power(d),
            r.setpoint(d),
            r.rated_power(d),
        );
    }
    out
}

pub fn format_listing<'a>(resources: impl IntoIterator<Item = &'a EnergyResource>) -> String {
    let mut out = String::new();
    let mut count = 0;
    for r in resources {
        out.push_str(&format_resource(r));
        count += 1;
    }
    let _ = write!(out, "{count} resource(s)");
    out
}

pub fn format_summary(summary: &SchedulerSummary, snapshot: &AggregateSnapshot) -> String {
    let t = &snapshot.totals;
    let targets = if snapshot.targets.is_empty() {
        "all".to_string()
    } else {
        snapshot.targets.join(" ")
    };
    format!(
        "{summary}\n\
         targets: {targets} ({} of {} resources)\n\
         export: target {:.1} W, available {:.1} W, energy {:.1} Wh\n\
         import: target {:.1} W, available {:.1} W, energy {:.1} Wh\n\
         price: {}",
        snapshot.filtered.len(),
        snapshot.resources.len(),
        snapshot.export_watts,
        t.export_power,
        t.export_energy,
        snapshot.import_watts,
        t.import_power,
        t.import_energy,
        snapshot.status.price,
    )
}

/// Carries out a command and returns the text to show, if any.
///
/// # Errors
///
/// Returns `Stopped` if the controller is no longer running.
pub async fn execute(
    command: ConsoleCommand,
    aggregator: &AggregatorHandle,
    services: &ServiceHandle,
) -> Result<Option<String>, Stopped> {
    let output = match command {
        ConsoleCommand::Quit => None,
        ConsoleCommand::Help => Some(HELP.to_string()),
        ConsoleCommand::ListAll => Some(format_listing(&aggregator.snapshot().await?.resources)),
        ConsoleCommand::ListFiltered => {
            let snapshot = aggregator.snapshot().await?;
            Some(format_listing(snapshot.filtered_resources()))
        }
        ConsoleCommand::Summary => {
            let summary = services.summary().await?;
            let snapshot = aggregator.snapshot().await?;
            Some(format_summary(&summary, &snapshot))
        }
        ConsoleCommand::Targets(targets) => {
            aggregator.set_targets(targets)?;
            None
        }
        ConsoleCommand::Import(watts) => {
            aggregator.set_import_watts(watts)?;
            None
        }
        ConsoleCommand::Export(watts) => {
            aggregator.set_export_watts(watts)?;
            None
        }
        ConsoleCommand::Price(price) => {
            aggregator.set_price(price)?;
            None
        }
        ConsoleCommand::Service(service) => {
            services.select(service)?;
            None
        }
    };
    Ok(output)
}

/// Reads commands from `input` until `q`, end of input, or controller stop.
///
/// Invalid lines are reported on `out` and otherwise ignored.
///
/// # Errors
///
/// Returns an I/O error if reading `input` or writing `out` fails.
pub async fn run<R, W>(
    input: R,
    out: &mut W,
    aggregator: &AggregatorHandle,
    services: &ServiceHandle,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        let command = match parse(&line) {
            Ok(command) => command,
            Err(CommandError::Empty) => continue,
            Err(err) => {
                writeln!(out, "{err}")?;
                continue;
            }
        };
        if command == ConsoleCommand::Quit {
            break;
        }
        match execute(command, aggregator, services).await {
            Ok(Some(text)) => writeln!(out, "{text}")?,
            Ok(None) => {}
            Err(Stopped) => {
                writeln!(out, "{}", Stopped)?;
                break;
            }
        }
        out.flush()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::ResourceProperties;

    #[test]
    fn parses_every_verb() {
        assert_eq!(parse("q"), Ok(ConsoleCommand::Quit));
        assert_eq!(parse(" h "), Ok(ConsoleCommand::Help));
        assert_eq!(parse("a"), Ok(ConsoleCommand::ListAll));
        assert_eq!(parse("f"), Ok(ConsoleCommand::ListFiltered));
        assert_eq!(parse("s"), Ok(ConsoleCommand::Summary));
        assert_eq!(
            parse("t buffer site1"),
            Ok(ConsoleCommand::Targets(vec!["buffer".into(), "site1".into()]))
        );
        assert_eq!(parse("t"), Ok(ConsoleCommand::Targets(vec![])));
        assert_eq!(parse("i 250.5"), Ok(ConsoleCommand::Import(250.5)));
        assert_eq!(parse("p 123"), Ok(ConsoleCommand::Price(123)));
        assert_eq!(parse("o tou"), Ok(ConsoleCommand::Service(Service::TimeOfUse)));
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(parse(""), Err(CommandError::Empty));
        assert_eq!(parse("x"), Err(CommandError::UnknownVerb("x".into())));
        assert_eq!(parse("quit"), Err(CommandError::UnknownVerb("quit".into())));
        assert_eq!(
            parse("e"),
            Err(CommandError::MissingArgument {
                verb: 'e',
                expected: "power in watts"
            })
        );
        assert_eq!(
            parse("i -5"),
            Err(CommandError::InvalidValue {
                verb: 'i',
                value: "-5".into()
            })
        );
        assert_eq!(parse("p 1 2"), Err(CommandError::TooManyArguments { verb: 'p' }));
        assert_eq!(parse("p -1").map_err(|e| e.to_string()), Err("p: invalid value \"-1\"".into()));
        assert!(matches!(parse("o BOGUS"), Err(CommandError::UnknownService(_))));
    }

    #[test]
    fn resource_block_shows_both_directions() {
        let der = EnergyResource::new("/der/1", ResourceProperties::symmetric(4000.0, 100.0, 12000.0));
        let block = format_resource(&der);
        assert!(block.starts_with("/der/1\n"));
        assert!(block.contains("export: energy 6000.0/12000.0 Wh"));
        assert!(block.contains("import: energy 6000.0/12000.0 Wh, power 0.0 W, setpoint 0.0/4000.0 W"));
    }

    #[test]
    fn listing_counts_resources() {
        let a = EnergyResource::new("/a", ResourceProperties::default());
        let b = EnergyResource::new("/b", ResourceProperties::default());
        assert!(format_listing([&a, &b]).ends_with("2 resource(s)"));
    }
}
