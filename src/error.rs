//! Error taxonomy shared by the drivers, the fan-out and the CLI.
//! Every fatal variant maps to a stable process exit code.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PowerError {
    #[error("You must be root to run this")]
    NotRoot,

    #[error("No matching nodes")]
    NoMatchingNodes,

    #[error("Unrecognized command: {0}")]
    UnknownCommand(String),

    #[error("{driver} cannot perform '{command}'")]
    UnsupportedCommand { driver: &'static str, command: String },

    #[error("Config file format error at line {line}: {reason}")]
    MalformedConfig { line: usize, reason: String },

    #[error("Couldn't find configuration file: {path}")]
    ConfigNotFound {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Couldn't open log file: {path}")]
    LogFileUnavailable {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Not a recognized node name: {0}")]
    UnknownNode(String),

    #[error("temperature check only works in query mode")]
    TemperatureRequiresQuery,

    #[error("low temperature bound {low} is above high bound {high}")]
    InvertedTemperatureBounds { low: i32, high: i32 },

    #[error("Unrecognized device type '{kind}' at line {line}")]
    UnknownDeviceType { line: usize, kind: String },

    #[error("Failed to open tty {path}")]
    DeviceOpenFailed {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to lock tty {path} after {attempts} attempts")]
    LockTimeout { path: String, attempts: u32 },

    #[error("Failed to find helper program {0}")]
    HelperNotFound(String),

    #[error("Helper program {program} failed: {message}")]
    HelperFailed { program: String, message: String },

    #[error("Timed out after {attempts} attempts to access box {box_id}{}", port_suffix(.port))]
    PortTimeout {
        box_id: String,
        port: Option<String>,
        attempts: u32,
    },

    #[error("Failed to {stage} termios attrs for tty {path}")]
    TerminalConfigFailed {
        path: String,
        stage: TermiosStage,
        #[source]
        source: io::Error,
    },

    #[error("Failed to restore termios attrs for tty {path}")]
    TerminalRestoreFailed {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error on {path}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Which half of the termios round trip failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermiosStage {
    Get,
    Set,
}

impl std::fmt::Display for TermiosStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TermiosStage::Get => write!(f, "get"),
            TermiosStage::Set => write!(f, "set"),
        }
    }
}

fn port_suffix(port: &Option<String>) -> String {
    match port {
        Some(p) => format!(" port {}", p),
        None => String::new(),
    }
}

impl PowerError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            PowerError::NotRoot | PowerError::NoMatchingNodes => 1,
            PowerError::UnknownCommand(_) | PowerError::UnsupportedCommand { .. } => 3,
            PowerError::MalformedConfig { .. } => 6,
            PowerError::ConfigNotFound { .. } => 7,
            PowerError::LogFileUnavailable { .. } => 8,
            PowerError::UnknownNode(_) => 9,
            PowerError::TemperatureRequiresQuery
            | PowerError::InvertedTemperatureBounds { .. } => 13,
            PowerError::UnknownDeviceType { .. } => 17,
            PowerError::DeviceOpenFailed { .. } | PowerError::Io { .. } => 18,
            PowerError::LockTimeout { .. } => 19,
            PowerError::HelperNotFound(_) | PowerError::HelperFailed { .. } => 20,
            PowerError::PortTimeout { .. } => 21,
            PowerError::TerminalConfigFailed { stage: TermiosStage::Get, .. } => 22,
            PowerError::TerminalConfigFailed { stage: TermiosStage::Set, .. } => 23,
            PowerError::TerminalRestoreFailed { .. } => 24,
        }
    }
}

pub type PowerResult<T> = Result<T, PowerError>;
