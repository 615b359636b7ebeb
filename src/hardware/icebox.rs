//! Icebox driver: Linux NetworX icebox power controllers daisy-chained on
//! serial lines. Each box carries up to ten nodes.

use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use tracing::{debug, info};

pub mod aggregator;
pub mod protocol;
pub mod scheduler;
pub mod topology;
pub mod transport;

use self::topology::{PortAddr, Topology};
use self::transport::{Connector, TtyConnector};
use super::command::Command;
use super::types::{DeviceKind, ExecContext};
use super::PowerController;
use crate::error::{PowerError, PowerResult};

/// Protocol timing. Defaults match what the hardware tolerates.
#[derive(Debug, Clone)]
pub struct Timing {
    /// Per-attempt read deadline.
    pub read_timeout: Duration,
    /// Attempts per request before the port counts as timed out.
    pub attempts: u32,
    /// Wait after a whole-box power change.
    pub box_settle: Duration,
    /// Wait after a box reboot.
    pub reboot_settle: Duration,
    /// Wait after a whole-box query.
    pub query_settle: Duration,
    /// Wait after a single-port power change.
    pub port_settle: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(1),
            attempts: 10,
            box_settle: Duration::from_secs(4),
            reboot_settle: Duration::from_secs(10),
            query_settle: Duration::from_millis(50),
            port_settle: Duration::from_millis(300),
        }
    }
}

pub struct IceboxDriver<C: Connector = TtyConnector> {
    topology: Topology,
    nodes: IndexMap<String, PortAddr>,
    connector: C,
    timing: Timing,
}

impl<C: Connector> IceboxDriver<C> {
    pub fn with_connector(connector: C, timing: Timing) -> Self {
        Self {
            topology: Topology::default(),
            nodes: IndexMap::new(),
            connector,
            timing,
        }
    }
}

#[async_trait]
impl<C: Connector> PowerController for IceboxDriver<C> {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Icebox
    }

    /// Params are `<line> <box> <port>`.
    fn add_node(&mut self, name: &str, params: &[String], config_line: usize) -> PowerResult<()> {
        let [line, box_id, port] = params else {
            return Err(PowerError::MalformedConfig {
                line: config_line,
                reason: format!(
                    "icebox node {} needs <line> <box> <port>, got {} parameter(s)",
                    name,
                    params.len()
                ),
            });
        };
        if self.nodes.contains_key(name) {
            return Err(PowerError::MalformedConfig {
                line: config_line,
                reason: format!("icebox node {} defined twice", name),
            });
        }

        let addr = PortAddr {
            line: line.clone(),
            box_id: box_id.clone(),
            port: port.clone(),
        };
        self.topology.attach(name, &addr, config_line)?;
        debug!("icebox: {} -> {} box {} port {}", name, addr.line, addr.box_id, addr.port);
        self.nodes.insert(name.to_string(), addr);
        Ok(())
    }

    fn mark_pending(&mut self, name: &str, command: Command) -> PowerResult<()> {
        let slot = self
            .nodes
            .get(name)
            .and_then(|addr| self.topology.slot_mut(addr))
            .ok_or_else(|| PowerError::UnknownNode(name.to_string()))?;
        slot.mark(command);
        Ok(())
    }

    fn has_pending(&self) -> bool {
        self.topology.lines.values().any(|line| line.has_pending())
    }

    async fn execute(&mut self, ctx: &ExecContext) -> PowerResult<()> {
        for line in self.topology.lines.values_mut() {
            scheduler::run_line(&self.connector, line, &self.timing, ctx.temp_bounds).await?;
        }
        info!("icebox: all lines done");
        Ok(())
    }

    fn fetch_result(&self, name: &str) -> Option<String> {
        self.nodes.get(name).and_then(|addr| self.topology.slot(addr))?.report()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::Instant;

    use super::*;
    use crate::hardware::mock::{reply, MockConnector};
    use crate::hardware::types::{Reading, TempBounds};

    fn params(line: &str, box_id: &str, port: &str) -> Vec<String> {
        vec![line.to_string(), box_id.to_string(), port.to_string()]
    }

    fn driver(connector: &MockConnector) -> IceboxDriver<MockConnector> {
        let mut driver = IceboxDriver::with_connector(connector.clone(), Timing::default());
        for port in 0..10 {
            driver
                .add_node(&format!("a{}", port), &params("/dev/ttyS0", "1", &port.to_string()), port + 1)
                .unwrap();
        }
        driver.add_node("b0", &params("/dev/ttyS1", "1", "0"), 11).unwrap();
        driver.add_node("b1", &params("/dev/ttyS1", "1", "1"), 12).unwrap();
        driver
    }

    #[test]
    fn requires_exactly_three_params() {
        let mut driver = IceboxDriver::with_connector(MockConnector::new(), Timing::default());
        let err = driver
            .add_node("n1", &["/dev/ttyS0".to_string(), "1".to_string()], 4)
            .unwrap_err();
        assert!(matches!(err, PowerError::MalformedConfig { line: 4, .. }));
    }

    #[test]
    fn marking_unknown_node_fails() {
        let connector = MockConnector::new();
        let mut driver = driver(&connector);
        assert!(matches!(
            driver.mark_pending("zz", Command::On),
            Err(PowerError::UnknownNode(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn full_and_partial_boxes_on_separate_lines() {
        let connector = MockConnector::new();
        let full = connector.line("/dev/ttyS0", vec![reply("OK")]);
        let partial = connector.line("/dev/ttyS1", vec![reply("OK")]);
        let mut driver = driver(&connector);

        for port in 0..10 {
            driver.mark_pending(&format!("a{}", port), Command::Off).unwrap();
        }
        driver.mark_pending("b1", Command::Off).unwrap();
        assert!(driver.has_pending());

        driver.execute(&ExecContext::default()).await.unwrap();

        assert_eq!(full.sent(), vec!["c1pl"]);
        assert_eq!(partial.sent(), vec!["c1pl1"]);
        assert!(!driver.has_pending());
        assert_eq!(driver.fetch_result("a3").as_deref(), Some("a3"));
        assert_eq!(driver.fetch_result("b1").as_deref(), Some("b1"));
        assert_eq!(driver.fetch_result("b0"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn query_yields_only_powered_nodes() {
        let connector = MockConnector::new();
        connector.line("/dev/ttyS0", vec![]);
        let wire = connector.line("/dev/ttyS1", vec![reply("N0:1"), reply("N1:0")]);
        let mut driver = driver(&connector);

        driver.mark_pending("b0", Command::Query).unwrap();
        driver.mark_pending("b1", Command::Query).unwrap();
        driver.execute(&ExecContext::default()).await.unwrap();

        assert_eq!(wire.sent(), vec!["c1ns0", "c1ns1"]);
        assert_eq!(driver.fetch_result("b0").as_deref(), Some("b0"));
        assert_eq!(driver.fetch_result("b1"), None);
        let slot = driver.topology.slot(&driver.nodes["b1"]).unwrap();
        assert_eq!(slot.result, Some(Reading::State { on: false }));
    }

    #[tokio::test(start_paused = true)]
    async fn temperature_bounds_come_from_context() {
        let connector = MockConnector::new();
        connector.line("/dev/ttyS1", vec![reply("N0:50,51")]);
        let mut driver = driver(&connector);

        driver.mark_pending("b0", Command::Temperature).unwrap();
        let ctx = ExecContext {
            temp_bounds: Some(TempBounds { low: 0, high: 50 }),
            ..ExecContext::default()
        };
        driver.execute(&ctx).await.unwrap();
        assert_eq!(driver.fetch_result("b0").as_deref(), Some("b0:50,51"));
    }

    #[tokio::test(start_paused = true)]
    async fn a_dead_line_stops_the_run() {
        let connector = MockConnector::new();
        let wire = connector.line("/dev/ttyS0", vec![]);
        let mut driver = driver(&connector);

        driver.mark_pending("a0", Command::On).unwrap();
        let started = Instant::now();
        let err = driver.execute(&ExecContext::default()).await.unwrap_err();

        assert!(matches!(err, PowerError::PortTimeout { ref port, .. } if port.as_deref() == Some("0")));
        assert_eq!(wire.sent().len(), 10);
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert_eq!(wire.released(), 1);
    }
}
