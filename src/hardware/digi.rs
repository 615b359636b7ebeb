//! Digi terminal server backend. Query only: a node is on when the DSR
//! modem line of its tty is asserted.

use std::os::unix::io::AsRawFd;

use async_trait::async_trait;
use indexmap::IndexMap;
use tracing::debug;

use super::command::Command;
use super::icebox::transport::open_device;
use super::types::{DeviceKind, ExecContext, NodeSlot, Reading};
use super::PowerController;
use crate::error::{PowerError, PowerResult};

struct Sense {
    device: String,
    slot: NodeSlot,
}

#[derive(Default)]
pub struct DigiDriver {
    nodes: IndexMap<String, Sense>,
}

/// Read the modem status bits and test DSR.
fn dsr_asserted(device: &str) -> PowerResult<bool> {
    let file = open_device(device)?;
    let mut bits: libc::c_int = 0;
    if unsafe { libc::ioctl(file.as_raw_fd(), libc::TIOCMGET, &mut bits as *mut libc::c_int) } != 0 {
        return Err(PowerError::Io {
            path: device.to_string(),
            source: std::io::Error::last_os_error(),
        });
    }
    Ok(bits & libc::TIOCM_DSR != 0)
}

#[async_trait]
impl PowerController for DigiDriver {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Digi
    }

    /// Params are `<line>`.
    fn add_node(&mut self, name: &str, params: &[String], config_line: usize) -> PowerResult<()> {
        let Some(device) = params.first() else {
            return Err(PowerError::MalformedConfig {
                line: config_line,
                reason: format!("digi node {} needs <line>", name),
            });
        };
        if self.nodes.contains_key(name) {
            return Err(PowerError::MalformedConfig {
                line: config_line,
                reason: format!("digi node {} defined twice", name),
            });
        }
        self.nodes.insert(
            name.to_string(),
            Sense {
                device: device.clone(),
                slot: NodeSlot::new(name),
            },
        );
        Ok(())
    }

    fn mark_pending(&mut self, name: &str, command: Command) -> PowerResult<()> {
        if !matches!(command, Command::Query | Command::ReverseQuery) {
            return Err(PowerError::UnsupportedCommand {
                driver: "digi",
                command: command.name().to_string(),
            });
        }
        let sense = self
            .nodes
            .get_mut(name)
            .ok_or_else(|| PowerError::UnknownNode(name.to_string()))?;
        sense.slot.mark(command);
        Ok(())
    }

    fn has_pending(&self) -> bool {
        self.nodes.values().any(|n| n.slot.request.is_pending())
    }

    async fn execute(&mut self, _ctx: &ExecContext) -> PowerResult<()> {
        for sense in self.nodes.values_mut() {
            let Some(command) = sense.slot.request.command() else {
                continue;
            };
            let on = dsr_asserted(&sense.device)?;
            debug!("digi: {} DSR {}", sense.slot.name, if on { "up" } else { "down" });
            sense
                .slot
                .complete(Reading::State { on }, on != command.is_reverse_sense());
        }
        Ok(())
    }

    fn fetch_result(&self, name: &str) -> Option<String> {
        self.nodes.get(name)?.slot.report()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_queries_are_supported() {
        let mut driver = DigiDriver::default();
        driver.add_node("n1", &["/dev/ttyD0".to_string()], 1).unwrap();
        assert!(driver.mark_pending("n1", Command::ReverseQuery).is_ok());
        assert!(matches!(
            driver.mark_pending("n1", Command::Off),
            Err(PowerError::UnsupportedCommand { driver: "digi", .. })
        ));
    }

    #[tokio::test]
    async fn non_tty_cannot_report_modem_lines() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut driver = DigiDriver::default();
        driver
            .add_node("n1", &[file.path().to_string_lossy().to_string()], 1)
            .unwrap();
        driver.mark_pending("n1", Command::Query).unwrap();

        let err = driver.execute(&ExecContext::default()).await.unwrap_err();
        assert_eq!(err.exit_code(), 18);
    }

    #[test]
    fn needs_a_line() {
        let mut driver = DigiDriver::default();
        assert!(matches!(
            driver.add_node("n1", &[], 2),
            Err(PowerError::MalformedConfig { line: 2, .. })
        ));
    }
}
