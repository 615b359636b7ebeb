//! WTI network power switch backend. Control only: one line per outlet
//! change, `<password><port><code>\r\n`, no reply is read back.

use async_trait::async_trait;
use indexmap::IndexMap;
use tracing::debug;

use super::command::Command;
use super::icebox::transport::{Connector, SerialIo, TtyConnector};
use super::types::{DeviceKind, ExecContext, NodeSlot, Reading};
use super::PowerController;
use crate::error::{PowerError, PowerResult};

struct Outlet {
    line: String,
    port: String,
    password: String,
    slot: NodeSlot,
}

pub struct WtiDriver<C: Connector = TtyConnector> {
    outlets: IndexMap<String, Outlet>,
    connector: C,
}

impl<C: Connector> WtiDriver<C> {
    pub fn with_connector(connector: C) -> Self {
        Self {
            outlets: IndexMap::new(),
            connector,
        }
    }
}

fn switch_code(command: Command) -> Option<char> {
    match command {
        Command::On => Some('1'),
        Command::Off => Some('0'),
        Command::Reset => Some('T'),
        _ => None,
    }
}

#[async_trait]
impl<C: Connector> PowerController for WtiDriver<C> {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Wti
    }

    /// Params are `<line> <port> [password]`.
    fn add_node(&mut self, name: &str, params: &[String], config_line: usize) -> PowerResult<()> {
        let (line, port, password) = match params {
            [line, port] => (line, port, String::new()),
            [line, port, password] => (line, port, password.clone()),
            _ => {
                return Err(PowerError::MalformedConfig {
                    line: config_line,
                    reason: format!("wti node {} needs <line> <port> [password]", name),
                })
            }
        };
        if self.outlets.contains_key(name) {
            return Err(PowerError::MalformedConfig {
                line: config_line,
                reason: format!("wti node {} defined twice", name),
            });
        }
        self.outlets.insert(
            name.to_string(),
            Outlet {
                line: line.clone(),
                port: port.clone(),
                password,
                slot: NodeSlot::new(name),
            },
        );
        Ok(())
    }

    fn mark_pending(&mut self, name: &str, command: Command) -> PowerResult<()> {
        if switch_code(command).is_none() {
            return Err(PowerError::UnsupportedCommand {
                driver: "wti",
                command: command.name().to_string(),
            });
        }
        let outlet = self
            .outlets
            .get_mut(name)
            .ok_or_else(|| PowerError::UnknownNode(name.to_string()))?;
        outlet.slot.mark(command);
        Ok(())
    }

    fn has_pending(&self) -> bool {
        self.outlets.values().any(|o| o.slot.request.is_pending())
    }

    async fn execute(&mut self, _ctx: &ExecContext) -> PowerResult<()> {
        let mut by_line: IndexMap<String, Vec<String>> = IndexMap::new();
        for (name, outlet) in &self.outlets {
            if outlet.slot.request.is_pending() {
                by_line.entry(outlet.line.clone()).or_default().push(name.clone());
            }
        }

        for (device, names) in by_line {
            let mut io = self.connector.acquire(&device).await?;
            for name in names {
                let Some(outlet) = self.outlets.get_mut(&name) else {
                    continue;
                };
                let Some(code) = outlet.slot.request.command().and_then(switch_code) else {
                    continue;
                };

                debug!("wti: {} port {} -> {}", name, outlet.port, code);
                let line = format!("{}{}{}\r\n", outlet.password, outlet.port, code);
                io.write_all(line.as_bytes())
                    .await
                    .map_err(|source| PowerError::Io {
                        path: device.clone(),
                        source,
                    })?;
                outlet.slot.complete(Reading::Ack { confirmed: false }, true);
            }
            self.connector.release(io)?;
        }
        Ok(())
    }

    fn fetch_result(&self, name: &str) -> Option<String> {
        self.outlets.get(name)?.slot.report()
    }
}
