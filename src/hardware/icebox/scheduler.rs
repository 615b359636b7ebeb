//! Line scheduling. A line is acquired once, its boxes are driven strictly
//! one after another, and the line is released on every exit path.

use tracing::debug;

use super::aggregator::run_box;
use super::topology::Line;
use super::transport::Connector;
use super::Timing;
use crate::error::PowerResult;
use crate::hardware::types::TempBounds;

/// Drive every pending box on `line`. Lines with nothing pending are not
/// opened at all.
pub async fn run_line<C: Connector>(
    connector: &C,
    line: &mut Line,
    timing: &Timing,
    bounds: Option<TempBounds>,
) -> PowerResult<()> {
    if !line.has_pending() {
        return Ok(());
    }

    let mut io = connector.acquire(&line.device).await?;
    for ice in line.boxes.values_mut() {
        run_box(&mut io, ice, timing, bounds).await?;
    }

    debug!("{}: all boxes done", line.device);
    connector.release(io)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PowerError;
    use crate::hardware::command::Command;
    use crate::hardware::icebox::topology::{PortAddr, Topology, BOX_CAPACITY};
    use crate::hardware::mock::{reply, MockConnector};

    fn topology() -> Topology {
        let mut topo = Topology::default();
        for (i, (box_id, port)) in [("1", "0"), ("1", "1"), ("2", "0")].into_iter().enumerate() {
            let addr = PortAddr {
                line: "/dev/ttyS0".into(),
                box_id: box_id.into(),
                port: port.into(),
            };
            topo.attach(&format!("n{}", i), &addr, i + 1).unwrap();
        }
        topo
    }

    fn mark_all(topo: &mut Topology, command: Command) {
        for line in topo.lines.values_mut() {
            for ice in line.boxes.values_mut() {
                for port in ice.ports.values_mut() {
                    port.node.mark(command);
                }
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn boxes_run_in_order_under_one_acquisition() {
        let connector = MockConnector::new();
        let wire = connector.line("/dev/ttyS0", vec![reply("OK"), reply("OK"), reply("OK")]);
        let mut topo = topology();
        mark_all(&mut topo, Command::On);

        let line = topo.lines.get_mut("/dev/ttyS0").unwrap();
        run_line(&connector, line, &Timing::default(), None).await.unwrap();

        assert_eq!(wire.sent(), vec!["c1ph0", "c1ph1", "c2ph0"]);
        assert_eq!(wire.acquired(), 1);
        assert_eq!(wire.released(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_still_releases_the_line() {
        let connector = MockConnector::new();
        let wire = connector.line("/dev/ttyS0", vec![reply("OK")]);
        let mut topo = topology();
        mark_all(&mut topo, Command::Off);

        let line = topo.lines.get_mut("/dev/ttyS0").unwrap();
        let err = run_line(&connector, line, &Timing::default(), None).await.unwrap_err();

        assert_eq!(err.exit_code(), 21);
        // box 2 is never reached
        assert!(wire.sent().iter().all(|s| s.starts_with("c1")));
        assert_eq!(wire.released(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_full_box_times_out_and_releases() {
        let connector = MockConnector::new();
        let wire = connector.line("/dev/ttyS0", vec![]);
        let mut topo = Topology::default();
        for port in 0..BOX_CAPACITY {
            let addr = PortAddr {
                line: "/dev/ttyS0".into(),
                box_id: "1".into(),
                port: port.to_string(),
            };
            topo.attach(&format!("n{}", port), &addr, port + 1).unwrap();
        }
        mark_all(&mut topo, Command::On);

        let line = topo.lines.get_mut("/dev/ttyS0").unwrap();
        let err = run_line(&connector, line, &Timing::default(), None).await.unwrap_err();

        assert!(matches!(
            err,
            PowerError::PortTimeout { ref box_id, port: None, attempts: 10 } if box_id == "1"
        ));
        assert_eq!(wire.sent(), vec!["c1ph"; 10]);
        assert_eq!(wire.released(), 1);
        // nothing recorded, every node still pending
        assert!(line.boxes["1"].ports.values().all(|p| p.node.request.is_pending()));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_line_is_never_opened() {
        let connector = MockConnector::new();
        let wire = connector.line("/dev/ttyS0", vec![]);
        let mut topo = topology();

        let line = topo.lines.get_mut("/dev/ttyS0").unwrap();
        run_line(&connector, line, &Timing::default(), None).await.unwrap();
        assert_eq!(wire.acquired(), 0);
    }
}
