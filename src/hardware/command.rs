//! Command translator: cluster-level command names to protocol verbs and flags.
//! Pure mapping, no I/O.

use std::fmt;

use serde::Serialize;

use crate::error::{PowerError, PowerResult};

/// A cluster command, already resolved against the reverse-sense flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Query,
    ReverseQuery,
    On,
    Off,
    Reset,
    Temperature,
    TemperatureF,
    HardwareReset,
}

/// Icebox verb codes as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    NodeStatus,
    PowerLow,
    PowerHigh,
    ResetPort,
    TempCelsius,
    TempFahrenheit,
    Reboot,
}

/// What a command needs back from the box before it counts as done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// A bare `OK`.
    Ok,
    /// One `N<port>:<value>` token per requested port.
    PortReply,
    /// Nothing; the request is written and not read back.
    FireAndForget,
}

impl Verb {
    pub fn code(self) -> &'static str {
        match self {
            Verb::NodeStatus => "ns",
            Verb::PowerLow => "pl",
            Verb::PowerHigh => "ph",
            Verb::ResetPort => "rp",
            Verb::TempCelsius => "ts",
            Verb::TempFahrenheit => "tsf",
            Verb::Reboot => "rb",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl Command {
    /// Resolve a command name from the command line. `reverse` only changes
    /// the meaning of `query`.
    pub fn from_request(name: &str, reverse: bool) -> PowerResult<Self> {
        let command = match name.to_ascii_lowercase().as_str() {
            "query" if reverse => Command::ReverseQuery,
            "query" => Command::Query,
            "rquery" => Command::ReverseQuery,
            "on" => Command::On,
            "off" => Command::Off,
            "reset" => Command::Reset,
            "temp" => Command::Temperature,
            "tempf" => Command::TemperatureF,
            "hwreset" | "reboot" => Command::HardwareReset,
            _ => return Err(PowerError::UnknownCommand(name.to_string())),
        };
        Ok(command)
    }

    pub fn name(self) -> &'static str {
        match self {
            Command::Query => "query",
            Command::ReverseQuery => "rquery",
            Command::On => "on",
            Command::Off => "off",
            Command::Reset => "reset",
            Command::Temperature => "temp",
            Command::TemperatureF => "tempf",
            Command::HardwareReset => "hwreset",
        }
    }

    pub fn verb(self) -> Verb {
        match self {
            Command::Query | Command::ReverseQuery => Verb::NodeStatus,
            Command::Off => Verb::PowerLow,
            Command::On => Verb::PowerHigh,
            Command::Reset => Verb::ResetPort,
            Command::Temperature => Verb::TempCelsius,
            Command::TemperatureF => Verb::TempFahrenheit,
            Command::HardwareReset => Verb::Reboot,
        }
    }

    /// Changes outlet state (relays move, settle delays apply).
    pub fn is_mutating(self) -> bool {
        matches!(
            self,
            Command::On | Command::Off | Command::Reset | Command::HardwareReset
        )
    }

    pub fn is_reverse_sense(self) -> bool {
        self == Command::ReverseQuery
    }

    pub fn is_temperature(self) -> bool {
        matches!(self, Command::Temperature | Command::TemperatureF)
    }

    /// Only addressable as a whole box, never per port.
    pub fn is_box_only(self) -> bool {
        self == Command::HardwareReset
    }

    pub fn completion(self) -> Completion {
        match self {
            Command::HardwareReset => Completion::FireAndForget,
            Command::On | Command::Off | Command::Reset => Completion::Ok,
            _ => Completion::PortReply,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_names_to_verbs() {
        let cases = [
            ("query", Verb::NodeStatus),
            ("off", Verb::PowerLow),
            ("on", Verb::PowerHigh),
            ("reset", Verb::ResetPort),
            ("temp", Verb::TempCelsius),
            ("tempf", Verb::TempFahrenheit),
            ("hwreset", Verb::Reboot),
        ];
        for (name, verb) in cases {
            assert_eq!(Command::from_request(name, false).unwrap().verb(), verb, "{}", name);
        }
        assert_eq!(Verb::TempFahrenheit.code(), "tsf");
    }

    #[test]
    fn reverse_only_affects_query() {
        assert_eq!(Command::from_request("query", true).unwrap(), Command::ReverseQuery);
        assert_eq!(Command::from_request("on", true).unwrap(), Command::On);
        assert!(Command::ReverseQuery.is_reverse_sense());
        assert_eq!(Command::ReverseQuery.verb(), Verb::NodeStatus);
    }

    #[test]
    fn flags_follow_the_verb() {
        assert!(Command::On.is_mutating());
        assert!(!Command::Temperature.is_mutating());
        assert!(Command::HardwareReset.is_box_only());
        assert!(!Command::Reset.is_box_only());
        assert_eq!(Command::Off.completion(), Completion::Ok);
        assert_eq!(Command::Query.completion(), Completion::PortReply);
        assert_eq!(Command::HardwareReset.completion(), Completion::FireAndForget);
    }

    #[test]
    fn unknown_command_is_rejected() {
        match Command::from_request("blink", false) {
            Err(PowerError::UnknownCommand(name)) => assert_eq!(name, "blink"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
