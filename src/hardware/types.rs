//! Hardware data types: device kinds, per-node request state and readings.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::command::Command;

/// The closed set of supported power controller types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Icebox,
    Wti,
    Digi,
    Etherwake,
    Rmc,
}

impl DeviceKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "icebox" => Some(DeviceKind::Icebox),
            "wti" => Some(DeviceKind::Wti),
            "digi" => Some(DeviceKind::Digi),
            "etherwake" => Some(DeviceKind::Etherwake),
            "rmc" => Some(DeviceKind::Rmc),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DeviceKind::Icebox => "icebox",
            DeviceKind::Wti => "wti",
            DeviceKind::Digi => "digi",
            DeviceKind::Etherwake => "etherwake",
            DeviceKind::Rmc => "rmc",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-invocation request state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestState {
    #[default]
    Idle,
    Pending(Command),
}

impl RequestState {
    pub fn command(&self) -> Option<Command> {
        match self {
            RequestState::Idle => None,
            RequestState::Pending(command) => Some(*command),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, RequestState::Pending(_))
    }
}

/// Last response payload recorded for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reading {
    /// Outlet power state from `ns`.
    State { on: bool },
    /// `cpu1,cpu2` from `ts`/`tsf`.
    Temperature { cpu1: i32, cpu2: i32 },
    /// A mutating command was acknowledged. `confirmed` is false for
    /// fire-and-forget deliveries.
    Ack { confirmed: bool },
}

/// Inclusive temperature range; readings outside it are alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TempBounds {
    pub low: i32,
    pub high: i32,
}

impl TempBounds {
    pub fn is_outside(&self, value: i32) -> bool {
        value < self.low || value > self.high
    }
}

/// Per-node state tracked by every driver.
#[derive(Debug, Clone)]
pub struct NodeSlot {
    pub name: String,
    pub request: RequestState,
    pub result: Option<Reading>,
    pub reported: bool,
}

impl NodeSlot {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            request: RequestState::Idle,
            result: None,
            reported: false,
        }
    }

    pub fn mark(&mut self, command: Command) {
        self.request = RequestState::Pending(command);
        self.result = None;
        self.reported = false;
    }

    /// Record a completed request and return the node to idle.
    pub fn complete(&mut self, reading: Reading, reported: bool) {
        self.request = RequestState::Idle;
        self.result = Some(reading);
        self.reported = reported;
    }

    /// Text handed back to the fan-out: `name` or `name:cpu1,cpu2`.
    pub fn report(&self) -> Option<String> {
        if !self.reported {
            return None;
        }
        match self.result? {
            Reading::Temperature { cpu1, cpu2 } => Some(format!("{}:{},{}", self.name, cpu1, cpu2)),
            _ => Some(self.name.clone()),
        }
    }
}

/// Invocation-wide knobs every driver may need.
#[derive(Debug, Clone)]
pub struct ExecContext {
    pub temp_bounds: Option<TempBounds>,
    pub helper_dir: PathBuf,
    pub fanout: usize,
}

impl Default for ExecContext {
    fn default() -> Self {
        Self {
            temp_bounds: None,
            helper_dir: PathBuf::from("/usr/lib/powerman/"),
            fanout: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_formats_temperatures() {
        let mut slot = NodeSlot::new("n7");
        slot.mark(Command::Temperature);
        slot.complete(Reading::Temperature { cpu1: 41, cpu2: 44 }, true);
        assert_eq!(slot.report().as_deref(), Some("n7:41,44"));
        assert!(!slot.request.is_pending());
    }

    #[test]
    fn unreported_nodes_yield_nothing() {
        let mut slot = NodeSlot::new("n1");
        slot.mark(Command::Query);
        slot.complete(Reading::State { on: false }, false);
        assert_eq!(slot.report(), None);
    }

    #[test]
    fn bounds_are_inclusive() {
        let bounds = TempBounds { low: 10, high: 80 };
        assert!(!bounds.is_outside(10));
        assert!(!bounds.is_outside(80));
        assert!(bounds.is_outside(81));
        assert!(bounds.is_outside(9));
    }
}
