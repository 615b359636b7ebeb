//! Effective settings, resolved from flags over environment over defaults.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::app::cli::Args;
use crate::error::{PowerError, PowerResult};
use crate::hardware::types::{ExecContext, TempBounds};

pub const DEFAULT_POWERMAN_DIR: &str = "/usr/lib/powerman/";
pub const DEFAULT_CONFIG_FILE: &str = "/etc/powerman.conf";
pub const DEFAULT_LOG_FILE: &str = "/tmp/powerman.log";
pub const DEFAULT_FANOUT: usize = 256;

#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    pub powerman: PowermanSettings,
    pub request: RequestSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize)]
pub struct PowermanSettings {
    pub helper_dir: PathBuf,
    pub config_file: PathBuf,
    pub fanout: usize,
    /// Default node list file ($W_COL).
    pub work_collective: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestSettings {
    pub command: String,
    pub reverse: bool,
    pub temperature: bool,
    pub temp_bounds: Option<TempBounds>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoggingSettings {
    pub level: String,
    pub log_file: Option<PathBuf>,
    pub trace_bytes: bool,
    pub quiet: bool,
}

impl Settings {
    /// Resolve settings. `env` looks up an environment variable.
    pub fn resolve(args: &Args, env: impl Fn(&str) -> Option<String>) -> Self {
        // Environment overrides only count when they point at something real.
        let env_dir = env("POWERMANDIR").map(PathBuf::from).filter(|p| p.is_dir());
        let env_conf = env("POWERMANCONF").map(PathBuf::from).filter(|p| p.is_file());
        let work_collective = env("W_COL").map(PathBuf::from).filter(|p| p.is_file());

        let level = args
            .log_level
            .clone()
            .or_else(|| env("LOG_LEVEL"))
            .unwrap_or_else(|| {
                if args.trace_bytes {
                    "trace".to_string()
                } else if args.log {
                    "debug".to_string()
                } else {
                    "warn".to_string()
                }
            });

        Self {
            powerman: PowermanSettings {
                helper_dir: args
                    .libdir
                    .clone()
                    .or(env_dir)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_POWERMAN_DIR)),
                config_file: args
                    .conf
                    .clone()
                    .or(env_conf)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE)),
                fanout: args.fanout.unwrap_or(DEFAULT_FANOUT).max(1),
                work_collective,
            },
            request: RequestSettings {
                command: args.command.clone(),
                reverse: args.reverse,
                temperature: args.temperature,
                temp_bounds: match (args.low, args.high) {
                    (Some(low), Some(high)) => Some(TempBounds { low, high }),
                    _ => None,
                },
            },
            logging: LoggingSettings {
                level,
                log_file: args.log.then(|| Path::new(DEFAULT_LOG_FILE).to_path_buf()),
                trace_bytes: args.trace_bytes,
                quiet: args.quiet,
            },
        }
    }

    /// Reject requests that cannot be carried out, before any I/O.
    pub fn validate(&self) -> PowerResult<()> {
        match self.request.temp_bounds {
            Some(TempBounds { low, high }) if low > high => {
                Err(PowerError::InvertedTemperatureBounds { low, high })
            }
            _ => Ok(()),
        }
    }

    pub fn exec_context(&self) -> ExecContext {
        ExecContext {
            temp_bounds: self.request.temp_bounds,
            helper_dir: self.powerman.helper_dir.clone(),
            fanout: self.powerman.fanout,
        }
    }
}
