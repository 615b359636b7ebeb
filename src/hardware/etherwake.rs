//! Wake-on-LAN backend. Control only, through the `ether-wake` helper.
//! A magic packet toggles the host, so callers only mark nodes whose
//! current state needs to change.

use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use tracing::info;

use super::command::Command;
use super::types::{DeviceKind, ExecContext, NodeSlot, Reading};
use super::PowerController;
use crate::error::{PowerError, PowerResult};
use crate::system::executor::{ensure_helper, run_helper};

pub const HELPER: &str = "ether-wake";

/// Gap between the two packets of a reset.
const RESET_PAUSE: Duration = Duration::from_secs(5);

struct WakeTarget {
    mac: String,
    slot: NodeSlot,
}

#[derive(Default)]
pub struct EtherwakeDriver {
    targets: IndexMap<String, WakeTarget>,
}

#[async_trait]
impl PowerController for EtherwakeDriver {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Etherwake
    }

    /// Params are `<mac>`.
    fn add_node(&mut self, name: &str, params: &[String], config_line: usize) -> PowerResult<()> {
        let Some(mac) = params.first() else {
            return Err(PowerError::MalformedConfig {
                line: config_line,
                reason: format!("etherwake node {} needs <mac>", name),
            });
        };
        if self.targets.contains_key(name) {
            return Err(PowerError::MalformedConfig {
                line: config_line,
                reason: format!("etherwake node {} defined twice", name),
            });
        }
        self.targets.insert(
            name.to_string(),
            WakeTarget {
                mac: mac.clone(),
                slot: NodeSlot::new(name),
            },
        );
        Ok(())
    }

    fn mark_pending(&mut self, name: &str, command: Command) -> PowerResult<()> {
        if !matches!(command, Command::On | Command::Off | Command::Reset) {
            return Err(PowerError::UnsupportedCommand {
                driver: "etherwake",
                command: command.name().to_string(),
            });
        }
        let target = self
            .targets
            .get_mut(name)
            .ok_or_else(|| PowerError::UnknownNode(name.to_string()))?;
        target.slot.mark(command);
        Ok(())
    }

    fn has_pending(&self) -> bool {
        self.targets.values().any(|t| t.slot.request.is_pending())
    }

    async fn execute(&mut self, ctx: &ExecContext) -> PowerResult<()> {
        let helper = ctx.helper_dir.join(HELPER);
        ensure_helper(&helper)?;

        for target in self.targets.values_mut() {
            let Some(command) = target.slot.request.command() else {
                continue;
            };

            info!("etherwake: {} {} ({})", command, target.slot.name, target.mac);
            run_helper(&helper, std::slice::from_ref(&target.mac)).await?;
            if command == Command::Reset {
                tokio::time::sleep(RESET_PAUSE).await;
                run_helper(&helper, std::slice::from_ref(&target.mac)).await?;
            }
            target.slot.complete(Reading::Ack { confirmed: false }, true);
        }
        Ok(())
    }

    fn fetch_result(&self, name: &str) -> Option<String> {
        self.targets.get(name)?.slot.report()
    }
}
