//! Per-box request planning: one whole-box request when every port is
//! wanted, otherwise one request per pending port.

use std::collections::HashMap;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::protocol::{self, Delivery, ReplyError, Request, Verdict};
use super::topology::{IceBox, BOX_CAPACITY};
use super::transport::SerialIo;
use super::Timing;
use crate::error::PowerResult;
use crate::hardware::command::{Command, Completion};
use crate::hardware::types::{Reading, TempBounds};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    WholeBox,
    PerPort,
}

impl Plan {
    pub fn for_box(requested: usize, command: Command) -> Self {
        if requested == BOX_CAPACITY || command.is_box_only() {
            Plan::WholeBox
        } else {
            Plan::PerPort
        }
    }
}

/// Turn one port's reply value into a reading, and decide whether the node
/// belongs in the output.
pub fn interpret(
    command: Command,
    value: &str,
    bounds: Option<TempBounds>,
) -> Result<(Reading, bool), ReplyError> {
    if command.is_temperature() {
        let (cpu1, cpu2) = protocol::parse_temperature(value)?;
        let reported = bounds.map_or(true, |b| b.is_outside(cpu1) || b.is_outside(cpu2));
        Ok((Reading::Temperature { cpu1, cpu2 }, reported))
    } else {
        let on = protocol::parse_state(value)?;
        Ok((Reading::State { on }, on != command.is_reverse_sense()))
    }
}

/// Complete every pending request on `ice`. On error the pending ports keep
/// their request state and nothing is recorded.
pub async fn run_box<P>(
    io: &mut P,
    ice: &mut IceBox,
    timing: &Timing,
    bounds: Option<TempBounds>,
) -> PowerResult<()>
where
    P: SerialIo + ?Sized,
{
    let Some(command) = ice.pending_command() else {
        return Ok(());
    };
    debug_assert!(
        ice.pending().all(|p| p.node.request.command() == Some(command)),
        "box {} has ports pending different commands",
        ice.id
    );
    let requested = ice.requested();
    let plan = Plan::for_box(requested, command);
    debug!(
        "box {}: {} on {} port(s), {:?}",
        ice.id, command, requested, plan
    );

    match plan {
        Plan::WholeBox => whole_box(io, ice, command, timing, bounds).await,
        Plan::PerPort => per_port(io, ice, command, timing, bounds).await,
    }
}

async fn whole_box<P>(
    io: &mut P,
    ice: &mut IceBox,
    command: Command,
    timing: &Timing,
    bounds: Option<TempBounds>,
) -> PowerResult<()>
where
    P: SerialIo + ?Sized,
{
    let request = Request::whole_box(&ice.id, command.verb());

    match command.completion() {
        Completion::FireAndForget => {
            let delivery = protocol::send_unconfirmed(io, &request).await?;
            info!("box {} sent {} without confirmation", ice.id, command);
            record_acks(ice, delivery);
            sleep(timing.reboot_settle).await;
        }
        Completion::Ok => {
            protocol::send(io, &request, timing, |reply| Verdict::when(protocol::is_ok(reply))).await?;
            record_acks(ice, Delivery::Confirmed);
            sleep(timing.box_settle).await;
        }
        Completion::PortReply => {
            let requested = ice.requested();
            let ports = &ice.ports;
            let mut answered: HashMap<String, (Reading, bool)> = HashMap::new();

            protocol::send(io, &request, timing, |reply| {
                for token in protocol::tokens(reply) {
                    let token = match token {
                        Ok(token) => token,
                        Err(e) => {
                            debug!("box {}: {}", request.box_id, e);
                            continue;
                        }
                    };
                    let wanted = ports
                        .get(token.port)
                        .map_or(false, |p| p.node.request.is_pending());
                    if !wanted || answered.contains_key(token.port) {
                        continue;
                    }
                    match interpret(command, token.value, bounds) {
                        Ok(outcome) => {
                            answered.insert(token.port.to_string(), outcome);
                        }
                        Err(e) => debug!("box {} port {}: {}", request.box_id, token.port, e),
                    }
                }
                Verdict::when(answered.len() == requested)
            })
            .await?;

            for (port, (reading, reported)) in answered {
                if let Some(p) = ice.ports.get_mut(&port) {
                    p.node.complete(reading, reported);
                }
            }
            sleep(timing.query_settle).await;
        }
    }
    Ok(())
}

/// One request per pending port. Box-only commands never get here, so a
/// port either answers with its value or acknowledges with `OK`.
async fn per_port<P>(
    io: &mut P,
    ice: &mut IceBox,
    command: Command,
    timing: &Timing,
    bounds: Option<TempBounds>,
) -> PowerResult<()>
where
    P: SerialIo + ?Sized,
{
    debug_assert!(!command.is_box_only());
    let box_id = ice.id.clone();
    let answers = command.completion() == Completion::PortReply;

    for port in ice.ports.values_mut().filter(|p| p.node.request.is_pending()) {
        let request = Request::port(&box_id, command.verb(), &port.id);

        if !answers {
            protocol::send(io, &request, timing, |reply| Verdict::when(protocol::is_ok(reply))).await?;
            port.node.complete(ack(Delivery::Confirmed), true);
            sleep(timing.port_settle).await;
            continue;
        }

        let mut outcome = None;
        protocol::send(io, &request, timing, |reply| {
            for token in protocol::tokens(reply).flatten() {
                if token.port != port.id {
                    continue;
                }
                match interpret(command, token.value, bounds) {
                    Ok(found) => {
                        outcome = Some(found);
                        return Verdict::Done;
                    }
                    Err(e) => debug!("box {} port {}: {}", box_id, port.id, e),
                }
            }
            Verdict::Retry
        })
        .await?;

        if let Some((reading, reported)) = outcome {
            port.node.complete(reading, reported);
        }
    }
    Ok(())
}

fn ack(delivery: Delivery) -> Reading {
    Reading::Ack {
        confirmed: delivery == Delivery::Confirmed,
    }
}

fn record_acks(ice: &mut IceBox, delivery: Delivery) {
    if delivery == Delivery::FireAndForgetAck {
        warn!("box {}: delivery of request is unconfirmed", ice.id);
    }
    for port in ice.ports.values_mut().filter(|p| p.node.request.is_pending()) {
        port.node.complete(ack(delivery), true);
    }
}
