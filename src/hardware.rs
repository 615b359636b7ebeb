//! PowerController trait definition and the closed set of driver backends.

use async_trait::async_trait;

pub mod command;
pub mod digi;
pub mod etherwake;
pub mod icebox;
pub mod rmc;
pub mod types;
pub mod wti;

#[cfg(test)]
pub mod mock;

pub use digi::DigiDriver;
pub use etherwake::EtherwakeDriver;
pub use icebox::IceboxDriver;
pub use rmc::RmcDriver;
pub use wti::WtiDriver;

use crate::error::PowerResult;
use command::Command;
use icebox::transport::{Connector, TtyConnector};
use icebox::Timing;
use types::{DeviceKind, ExecContext};

#[async_trait]
pub trait PowerController: Send {
    fn kind(&self) -> DeviceKind;

    /// Register a node from its config block parameters.
    fn add_node(&mut self, name: &str, params: &[String], config_line: usize) -> PowerResult<()>;

    /// Queue `command` for `name`. Fails for unknown nodes and for commands
    /// this backend cannot carry out.
    fn mark_pending(&mut self, name: &str, command: Command) -> PowerResult<()>;

    fn has_pending(&self) -> bool;

    /// Carry out every queued request.
    async fn execute(&mut self, ctx: &ExecContext) -> PowerResult<()>;

    /// The node's output text, if it belongs in the output.
    fn fetch_result(&self, name: &str) -> Option<String>;
}

/// One driver instance per device type in use.
pub enum Driver<C: Connector + Clone = TtyConnector> {
    Icebox(IceboxDriver<C>),
    Wti(WtiDriver<C>),
    Digi(DigiDriver),
    Etherwake(EtherwakeDriver),
    Rmc(RmcDriver),
}

impl<C: Connector + Clone> Driver<C> {
    /// Serial backends share `connector`.
    pub fn new(kind: DeviceKind, connector: &C, timing: &Timing) -> Self {
        match kind {
            DeviceKind::Icebox => Driver::Icebox(IceboxDriver::with_connector(connector.clone(), timing.clone())),
            DeviceKind::Wti => Driver::Wti(WtiDriver::with_connector(connector.clone())),
            DeviceKind::Digi => Driver::Digi(DigiDriver::default()),
            DeviceKind::Etherwake => Driver::Etherwake(EtherwakeDriver::default()),
            DeviceKind::Rmc => Driver::Rmc(RmcDriver::default()),
        }
    }

    pub fn controller(&self) -> &dyn PowerController {
        match self {
            Driver::Icebox(d) => d,
            Driver::Wti(d) => d,
            Driver::Digi(d) => d,
            Driver::Etherwake(d) => d,
            Driver::Rmc(d) => d,
        }
    }

    pub fn controller_mut(&mut self) -> &mut dyn PowerController {
        match self {
            Driver::Icebox(d) => d,
            Driver::Wti(d) => d,
            Driver::Digi(d) => d,
            Driver::Etherwake(d) => d,
            Driver::Rmc(d) => d,
        }
    }
}
