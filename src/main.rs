//! Powerman entry point: CLI dispatch, logging setup, node selection and the
//! cluster fan-out.

mod app;
mod cluster;
mod config;
mod error;
mod hardware;
mod system;

use std::io::BufRead;
use std::path::Path;

use anyhow::Result;
use clap::Parser;
use tracing::{debug, error, info};

use app::cli::{Args, HELP_TEXT};
use app::logging::{init_tracing, open_log_file, FATAL_TARGET};
use cluster::Cluster;
use config::cluster::load_cluster;
use config::types::{RequestSettings, Settings};
use error::{PowerError, PowerResult};
use hardware::command::Command;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse arguments with custom error handling
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            if err.kind() == clap::error::ErrorKind::DisplayHelp {
                print!("{}", HELP_TEXT);
                std::process::exit(0);
            }
            if err.kind() == clap::error::ErrorKind::DisplayVersion {
                println!("pm {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }

            eprintln!("{}", err);
            eprintln!();
            print!("{}", HELP_TEXT);
            eprintln!("\nFor more information, try '--help'.");
            std::process::exit(2);
        }
    };

    // Priority: 1. flags, 2. environment, 3. built-in defaults
    let settings = Settings::resolve(&args, |key| std::env::var(key).ok());

    if args.show_config {
        println!("{}", serde_json::to_string_pretty(&settings)?);
        return Ok(());
    }

    let log_file = match settings.logging.log_file.as_deref().map(open_log_file).transpose() {
        Ok(file) => file,
        Err(e) => fail(&settings, e),
    };
    init_tracing(level_filter(&settings.logging.level), log_file);
    info!(
        "Powerman {} invoked {} ({})",
        env!("CARGO_PKG_VERSION"),
        chrono::Local::now().format("%a %b %e %H:%M:%S %Y"),
        std::env::args().collect::<Vec<_>>().join(" ")
    );

    match run(&args, &settings).await {
        Ok(lines) => {
            for line in lines {
                println!("{}", line);
            }
            Ok(())
        }
        Err(e) => fail(&settings, e),
    }
}

async fn run(args: &Args, settings: &Settings) -> PowerResult<Vec<String>> {
    settings.validate()?;
    if unsafe { libc::geteuid() } != 0 {
        return Err(PowerError::NotRoot);
    }

    let command = resolve_command(&settings.request)?;
    let nodes = load_cluster(&settings.powerman.config_file).await?;
    let mut cluster = Cluster::from_config(&nodes)?;

    let names = if args.all {
        cluster.names()
    } else {
        cluster.select(&requested_names(args, settings)?)?
    };
    debug!("{} on {} node(s)", command, names.len());

    let lines = cluster.run(command, &names, &settings.exec_context()).await?;
    if lines.is_empty() {
        return Err(PowerError::NoMatchingNodes);
    }
    Ok(lines)
}

/// `-t` turns a plain query into a temperature query; `tempf` keeps Fahrenheit.
fn resolve_command(request: &RequestSettings) -> PowerResult<Command> {
    let command = Command::from_request(&request.command, request.reverse)?;
    if !request.temperature {
        return Ok(command);
    }
    match command {
        Command::TemperatureF => Ok(Command::TemperatureF),
        c if c.is_mutating() => Err(PowerError::TemperatureRequiresQuery),
        _ => Ok(Command::Temperature),
    }
}

/// Node names from `-w`, stdin (`-w -`) or the `$W_COL` file, in that order.
fn requested_names(args: &Args, settings: &Settings) -> PowerResult<Vec<String>> {
    if args.nodes.len() == 1 && args.nodes[0] == "-" {
        return read_names(std::io::stdin().lock()).map_err(|source| PowerError::Io {
            path: "stdin".to_string(),
            source,
        });
    }
    if !args.nodes.is_empty() {
        return Ok(args.nodes.clone());
    }
    match &settings.powerman.work_collective {
        Some(path) => read_names_file(path),
        None => Err(PowerError::NoMatchingNodes),
    }
}

fn read_names_file(path: &Path) -> PowerResult<Vec<String>> {
    let file = std::fs::File::open(path).map_err(|source| PowerError::Io {
        path: path.display().to_string(),
        source,
    })?;
    read_names(std::io::BufReader::new(file)).map_err(|source| PowerError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn read_names(reader: impl BufRead) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let name = line.trim();
        if !name.is_empty() {
            names.push(name.to_string());
        }
    }
    Ok(names)
}

// Rust tracing has no CRITICAL; it maps to ERROR
fn level_filter(level: &str) -> &'static str {
    match level.to_lowercase().as_str() {
        "critical" | "error" => "error",
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "warn" => "warn",
        _ => {
            eprintln!(
                "Invalid log level '{}'. Using WARN. Valid levels: TRACE, DEBUG, INFO, WARN, ERROR, CRITICAL",
                level
            );
            "warn"
        }
    }
}

fn fail(settings: &Settings, err: PowerError) -> ! {
    let code = err.exit_code();
    let message = match std::error::Error::source(&err) {
        Some(source) => format!("{}: {}", err, source),
        None => err.to_string(),
    };
    error!(target: FATAL_TARGET, "[{}] {}", code, message);
    if !settings.logging.quiet {
        eprintln!("Powerman: [{}] {}", code, message);
    }
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(command: &str, temperature: bool) -> RequestSettings {
        RequestSettings {
            command: command.to_string(),
            reverse: false,
            temperature,
            temp_bounds: None,
        }
    }

    #[test]
    fn temperature_flag_turns_queries_into_temperature() {
        assert_eq!(resolve_command(&request("query", true)).unwrap(), Command::Temperature);
        assert_eq!(resolve_command(&request("tempf", true)).unwrap(), Command::TemperatureF);
        assert_eq!(resolve_command(&request("query", false)).unwrap(), Command::Query);
    }

    #[test]
    fn temperature_flag_rejects_power_changes() {
        let err = resolve_command(&request("off", true)).unwrap_err();
        assert_eq!(err.exit_code(), 13);
        assert_eq!(resolve_command(&request("blink", false)).unwrap_err().exit_code(), 3);
    }

    #[test]
    fn names_are_read_one_per_line() {
        let names = read_names("n1\n\n  n2  \nn3".as_bytes()).unwrap();
        assert_eq!(names, vec!["n1", "n2", "n3"]);
    }

    #[test]
    fn unknown_levels_fall_back_to_warn() {
        assert_eq!(level_filter("CRITICAL"), "error");
        assert_eq!(level_filter("Debug"), "debug");
        assert_eq!(level_filter("chatty"), "warn");
    }
}
