//! Command-line interface for archivectl.
use std::str::FromStr;

use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

/// Wrapper around `LevelFilter` so clap can parse log levels from either
/// string names ("info", "debug", etc.) or numeric shorthands (0-5).
#[derive(Clone, Copy, Debug)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// String representation suitable for `RUST_LOG`.
    pub fn as_str(&self) -> &'static str {
        match self.0 {
            LevelFilter::OFF => "off",
            LevelFilter::ERROR => "error",
            LevelFilter::WARN => "warn",
            LevelFilter::INFO => "info",
            LevelFilter::DEBUG => "debug",
            LevelFilter::TRACE => "trace",
        }
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("log level cannot be empty".into());
        }

        if let Ok(number) = trimmed.parse::<u8>() {
            let level = match number {
                0 => LevelFilter::OFF,
                1 => LevelFilter::ERROR,
                2 => LevelFilter::WARN,
                3 => LevelFilter::INFO,
                4 => LevelFilter::DEBUG,
                5 => LevelFilter::TRACE,
                _ => {
                    return Err(format!(
                        "unsupported log level number '{number}' (expected 0-5)"
                    ));
                }
            };

            return Ok(LogLevelArg(level));
        }

        let level = match trimmed.to_ascii_lowercase().as_str() {
            "off" => Some(LevelFilter::OFF),
            "error" | "err" => Some(LevelFilter::ERROR),
            "warn" | "warning" => Some(LevelFilter::WARN),
            "info" | "information" => Some(LevelFilter::INFO),
            "debug" => Some(LevelFilter::DEBUG),
            "trace" => Some(LevelFilter::TRACE),
            _ => None,
        }
        .ok_or_else(|| format!("invalid log level '{trimmed}'"))?;

        Ok(LogLevelArg(level))
    }
}

/// Command-line interface for archivectl.
#[derive(Parser)]
#[command(name = "archivectl", version, author)]
#[command(about = "Starts, stops and reports the archive's network services", long_about = None)]
pub struct Cli {
    /// Override the logging verbosity for this invocation only.
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevelArg>,

    /// The command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for archivectl.
#[derive(Subcommand)]
pub enum Commands {
    /// Start the configured services and run until interrupted.
    Serve {
        /// Path to the configuration file (defaults to `archive.yaml`).
        #[arg(short, long, default_value = "archive.yaml")]
        config: String,

        /// Address the listeners bind to.
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Append server log entries to this file.
        #[arg(long, value_name = "PATH")]
        log_file: Option<String>,
    },

    /// Show which services the configuration would start.
    Check {
        /// Path to the configuration file (defaults to `archive.yaml`).
        #[arg(short, long, default_value = "archive.yaml")]
        config: String,

        /// Emit machine-readable JSON output instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Show the tail of a server log file.
    Logs {
        /// Server log file written by `serve --log-file`.
        #[arg(short, long)]
        file: String,

        /// Number of lines to show (default: 50).
        #[arg(short, long, default_value = "50")]
        lines: usize,
    },
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_defaults_config_path() {
        let cli = Cli::try_parse_from(["archivectl", "serve"]).unwrap();
        match cli.command {
            Commands::Serve {
                config,
                host,
                log_file,
            } => {
                assert_eq!(config, "archive.yaml");
                assert_eq!(host, "0.0.0.0");
                assert!(log_file.is_none());
            }
            _ => panic!("expected serve command"),
        }
    }

    #[test]
    fn check_accepts_json() {
        let cli =
            Cli::try_parse_from(["archivectl", "check", "-c", "other.yaml", "--json"])
                .unwrap();
        match cli.command {
            Commands::Check { config, json } => {
                assert_eq!(config, "other.yaml");
                assert!(json);
            }
            _ => panic!("expected check command"),
        }
    }

    #[test]
    fn logs_requires_file() {
        assert!(Cli::try_parse_from(["archivectl", "logs"]).is_err());
    }

    #[test]
    fn log_level_accepts_names_and_numbers() {
        assert_eq!("debug".parse::<LogLevelArg>().unwrap().as_str(), "debug");
        assert_eq!("2".parse::<LogLevelArg>().unwrap().as_str(), "warn");
        assert!("9".parse::<LogLevelArg>().is_err());
        assert!("loud".parse::<LogLevelArg>().is_err());
    }
}
