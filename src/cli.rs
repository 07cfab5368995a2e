use std::env;
use std::path::PathBuf;

pub struct CliOptions {
    pub config: Option<PathBuf>,
    pub preset: Option<String>,
    /// Run the configured grid service at startup.
    pub operator: bool,
}

pub fn parse_args() -> Result<CliOptions, String> {
    let args: Vec<String> = env::args().skip(1).collect();
    parse_args_from(args)
}

fn parse_args_from(args: Vec<String>) -> Result<CliOptions, String> {
    if args.len() == 1 && (args[0] == "--help" || args[0] == "-h") {
        print_usage();
        std::process::exit(0);
    }
    parse_options(&args)
}

fn parse_options(args: &[String]) -> Result<CliOptions, String> {
    let mut i = 0usize;
    let mut config = None;
    let mut preset = None;
    let mut operator = None;

    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                let path = args.next_or_err(i, "missing value for --config (expected a TOML file path)")?;
                if config.replace(PathBuf::from(path)).is_some() {
                    return Err("--config provided more than once".to_string());
                }
            }
            "--preset" => {
                i += 1;
                let name = args.next_or_err(i, "missing value for --preset (expected a preset name)")?;
                if preset.replace(name.to_string()).is_some() {
                    return Err("--preset provided more than once".to_string());
                }
            }
            "--operator" => {
                i += 1;
                let value = args.next_or_err(i, "missing value for --operator (expected y or n)")?;
                let enabled = match value {
                    "y" | "Y" | "yes" => true,
                    "n" | "N" | "no" => false,
                    other => return Err(format!("invalid value for --operator: {other} (expected y or n)")),
                };
                if operator.replace(enabled).is_some() {
                    return Err("--operator provided more than once".to_string());
                }
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => return Err(format!("unknown argument: {other}")),
        }
        i += 1;
    }

    if config.is_some() && preset.is_some() {
        return Err("arguments `--config` and `--preset` are mutually exclusive; choose one source".to_string());
    }

    if config.is_none() && preset.is_none() {
        preset = Some("default".to_string());
    }

    Ok(CliOptions {
        config,
        preset,
        operator: operator.unwrap_or(true),
    })
}

trait SliceArgExt {
    fn next_or_err(&self, index: usize, err: &str) -> Result<&str, String>;
}

impl SliceArgExt for [String] {
    fn next_or_err(&self, index: usize, err: &str) -> Result<&str, String> {
        self.get(index)
            .map(String::as_str)
            .ok_or_else(|| err.to_string())
    }
}

pub fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  vpp-dispatch [--config <path> | --preset <name>] [--operator <y|n>]");
    eprintln!();
    eprintln!("Presets: default, demo. Set RUST_LOG to change log verbosity.");
}
