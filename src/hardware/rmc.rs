//! Remote management controller backend. Every marked node goes to one
//! invocation of the `rmc` helper: `rmc -f <fanout> n1,n2,... <command>`.

use async_trait::async_trait;
use indexmap::IndexMap;
use tracing::info;

use super::command::Command;
use super::types::{DeviceKind, ExecContext, NodeSlot, Reading};
use super::PowerController;
use crate::error::{PowerError, PowerResult};
use crate::system::executor::run_helper;

pub const HELPER: &str = "rmc";

#[derive(Default)]
pub struct RmcDriver {
    nodes: IndexMap<String, NodeSlot>,
}

impl RmcDriver {
    /// Helper arguments for the currently marked nodes.
    fn helper_args(&self, fanout: usize) -> Option<Vec<String>> {
        let mut command = None;
        let mut names = Vec::new();
        for slot in self.nodes.values() {
            if let Some(c) = slot.request.command() {
                command.get_or_insert(c);
                names.push(slot.name.clone());
            }
        }
        let command = command?;
        Some(vec![
            "-f".to_string(),
            fanout.to_string(),
            names.join(","),
            command.name().to_string(),
        ])
    }
}

#[async_trait]
impl PowerController for RmcDriver {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Rmc
    }

    fn add_node(&mut self, name: &str, _params: &[String], config_line: usize) -> PowerResult<()> {
        if self.nodes.contains_key(name) {
            return Err(PowerError::MalformedConfig {
                line: config_line,
                reason: format!("rmc node {} defined twice", name),
            });
        }
        self.nodes.insert(name.to_string(), NodeSlot::new(name));
        Ok(())
    }

    fn mark_pending(&mut self, name: &str, command: Command) -> PowerResult<()> {
        if !matches!(command, Command::On | Command::Off | Command::Reset) {
            return Err(PowerError::UnsupportedCommand {
                driver: "rmc",
                command: command.name().to_string(),
            });
        }
        let slot = self
            .nodes
            .get_mut(name)
            .ok_or_else(|| PowerError::UnknownNode(name.to_string()))?;
        slot.mark(command);
        Ok(())
    }

    fn has_pending(&self) -> bool {
        self.nodes.values().any(|s| s.request.is_pending())
    }

    async fn execute(&mut self, ctx: &ExecContext) -> PowerResult<()> {
        let Some(args) = self.helper_args(ctx.fanout) else {
            return Ok(());
        };

        info!("rmc: {}", args.join(" "));
        run_helper(&ctx.helper_dir.join(HELPER), &args).await?;

        for slot in self.nodes.values_mut().filter(|s| s.request.is_pending()) {
            slot.complete(Reading::Ack { confirmed: false }, true);
        }
        Ok(())
    }

    fn fetch_result(&self, name: &str) -> Option<String> {
        self.nodes.get(name)?.report()
    }
}
