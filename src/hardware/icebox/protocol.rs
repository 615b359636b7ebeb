//! Icebox wire protocol: request formatting, bounded reads, reply parsing and
//! the per-request retry budget.
//!
//! Requests are `c<box><verb>[port]\r\n`. Replies are either `OK` or a line of
//! `N<port>:<value>` tokens, terminated by `\r\n`. Older firmware drops the
//! `\r` and then emits a stray continuation, which is drained and discarded.

use std::time::Duration;

use thiserror::Error;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, trace, warn};

use super::transport::SerialIo;
use super::Timing;
use crate::error::{PowerError, PowerResult};
use crate::hardware::command::Verb;

const BUF_SIZE: usize = 1024;

/// One addressable request: a whole box, or one port of it.
#[derive(Debug, Clone, Copy)]
pub struct Request<'a> {
    pub box_id: &'a str,
    pub verb: Verb,
    pub port: Option<&'a str>,
}

impl<'a> Request<'a> {
    pub fn whole_box(box_id: &'a str, verb: Verb) -> Self {
        Self { box_id, verb, port: None }
    }

    pub fn port(box_id: &'a str, verb: Verb, port: &'a str) -> Self {
        Self { box_id, verb, port: Some(port) }
    }

    pub fn target(&self) -> String {
        format!("c{}{}{}", self.box_id, self.verb.code(), self.port.unwrap_or(""))
    }
}

/// What the reply handler wants after looking at one reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Done,
    Retry,
}

impl Verdict {
    pub fn when(done: bool) -> Self {
        if done {
            Verdict::Done
        } else {
            Verdict::Retry
        }
    }
}

/// How strongly a request's completion was confirmed by the box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Confirmed,
    /// Written to the line, never read back.
    FireAndForgetAck,
}

/// A reply fragment that does not fit the protocol. Recoverable: the token
/// is dropped and the request retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplyError {
    #[error("malformed reply token '{0}'")]
    MalformedToken(String),

    #[error("malformed state value '{0}'")]
    MalformedState(String),

    #[error("malformed temperature value '{0}'")]
    MalformedTemperature(String),
}

/// One `N<port>:<value>` token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortToken<'a> {
    pub port: &'a str,
    pub value: &'a str,
}

/// Split a query reply into port tokens.
pub fn tokens(reply: &str) -> impl Iterator<Item = Result<PortToken<'_>, ReplyError>> {
    reply.split_whitespace().map(|raw| {
        let (key, value) = raw
            .split_once(':')
            .ok_or_else(|| ReplyError::MalformedToken(raw.to_string()))?;
        match key.strip_prefix('N') {
            Some(port) if !port.is_empty() && !value.contains(':') => Ok(PortToken { port, value }),
            _ => Err(ReplyError::MalformedToken(raw.to_string())),
        }
    })
}

pub fn is_ok(reply: &str) -> bool {
    reply.trim().eq_ignore_ascii_case("ok")
}

/// `"1"` is on, `"0"` is off.
pub fn parse_state(value: &str) -> Result<bool, ReplyError> {
    match value {
        "1" => Ok(true),
        "0" => Ok(false),
        _ => Err(ReplyError::MalformedState(value.to_string())),
    }
}

/// `cpu1,cpu2`, both integers.
pub fn parse_temperature(value: &str) -> Result<(i32, i32), ReplyError> {
    let malformed = || ReplyError::MalformedTemperature(value.to_string());
    let (cpu1, cpu2) = value.split_once(',').ok_or_else(malformed)?;
    let cpu1 = cpu1.trim().parse().map_err(|_| malformed())?;
    let cpu2 = cpu2.trim().parse().map_err(|_| malformed())?;
    Ok((cpu1, cpu2))
}

/// Send `request` until `on_reply` is satisfied or the attempt budget runs
/// out. Returns the number of attempts used.
pub async fn send<P, F>(io: &mut P, request: &Request<'_>, timing: &Timing, mut on_reply: F) -> PowerResult<u32>
where
    P: SerialIo + ?Sized,
    F: FnMut(&str) -> Verdict,
{
    let target = request.target();

    for attempt in 1..=timing.attempts {
        let reply = exchange(io, &target, timing.read_timeout).await;
        if reply.is_empty() {
            debug!("No reply to {} (attempt {}/{})", target, attempt, timing.attempts);
            continue;
        }
        if on_reply(&reply) == Verdict::Done {
            return Ok(attempt);
        }
    }

    Err(PowerError::PortTimeout {
        box_id: request.box_id.to_string(),
        port: request.port.map(str::to_string),
        attempts: timing.attempts,
    })
}

/// Write `request` once and return without reading a reply.
pub async fn send_unconfirmed<P>(io: &mut P, request: &Request<'_>) -> PowerResult<Delivery>
where
    P: SerialIo + ?Sized,
{
    let target = request.target();
    debug!("say:  {} (no reply expected)", target);
    io.write_all(format!("{}\r\n", target).as_bytes())
        .await
        .map_err(|source| PowerError::Io {
            path: format!("box {}", request.box_id),
            source,
        })?;
    Ok(Delivery::FireAndForgetAck)
}

/// One attempt: write the target, then read until a newline or until
/// `read_timeout` has passed. A timeout yields whatever arrived, possibly
/// nothing.
pub async fn exchange<P>(io: &mut P, target: &str, read_timeout: Duration) -> String
where
    P: SerialIo + ?Sized,
{
    debug!("say:  {}", target);
    if let Err(e) = io.write_all(format!("{}\r\n", target).as_bytes()).await {
        warn!("Write of {} failed: {}", target, e);
        return String::new();
    }

    let deadline = Instant::now() + read_timeout;
    let mut response = Vec::new();
    let mut buf = [0u8; BUF_SIZE];
    let mut reads = 0;

    while !response.contains(&b'\n') {
        reads += 1;
        match timeout_at(deadline, io.read_some(&mut buf)).await {
            Ok(Ok(0)) => {
                warn!("Line closed while waiting for reply to {}", target);
                break;
            }
            Ok(Ok(n)) => {
                trace_bytes(&buf[..n]);
                response.extend_from_slice(&buf[..n]);
            }
            Ok(Err(e)) => {
                warn!("Read failed while waiting for reply to {}: {}", target, e);
                break;
            }
            Err(_) => {
                debug!("Timed out in blocking read");
                break;
            }
        }
    }
    if reads > 1 {
        debug!("   after {} reads", reads);
    }

    let reply = match response.iter().position(|&b| b == b'\n') {
        Some(end) => {
            let line = &response[..end];
            match line.strip_suffix(b"\r") {
                Some(line) => String::from_utf8_lossy(line).into_owned(),
                None => {
                    warn!("Reply to {} did not end in \\r\\n, box needs its firmware updated", target);
                    drain(io, read_timeout).await;
                    String::from_utf8_lossy(line).into_owned()
                }
            }
        }
        None => String::from_utf8_lossy(&response).trim_end().to_string(),
    };

    debug!("hear:  {}", reply);
    reply
}

/// Swallow one stray continuation line.
async fn drain<P>(io: &mut P, read_timeout: Duration)
where
    P: SerialIo + ?Sized,
{
    let mut buf = [0u8; BUF_SIZE];
    if let Ok(Ok(n)) = timeout(read_timeout, io.read_some(&mut buf)).await {
        trace_bytes(&buf[..n]);
    }
}

/// Raw received bytes as decimal octets.
fn trace_bytes(bytes: &[u8]) {
    if tracing::enabled!(tracing::Level::TRACE) {
        let octets: Vec<String> = bytes.iter().map(|b| b.to_string()).collect();
        trace!("{}", octets.join(" "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{reply, MockWire};

    #[test]
    fn formats_targets() {
        assert_eq!(Request::whole_box("3", Verb::PowerHigh).target(), "c3ph");
        assert_eq!(Request::port("3", Verb::NodeStatus, "7").target(), "c3ns7");
        assert_eq!(Request::port("12", Verb::TempFahrenheit, "0").target(), "c12tsf0");
    }

    #[test]
    fn splits_port_tokens() {
        let parsed: Vec<_> = tokens("N1:1 N2:0 garbage N3:40,41 :5").collect();
        assert_eq!(parsed[0], Ok(PortToken { port: "1", value: "1" }));
        assert_eq!(parsed[1], Ok(PortToken { port: "2", value: "0" }));
        assert!(parsed[2].is_err());
        assert_eq!(parsed[3], Ok(PortToken { port: "3", value: "40,41" }));
        assert!(parsed[4].is_err());
    }

    #[test]
    fn parses_values() {
        assert_eq!(parse_state("1"), Ok(true));
        assert_eq!(parse_state("0"), Ok(false));
        assert!(parse_state("2").is_err());
        assert_eq!(parse_temperature("15,90"), Ok((15, 90)));
        assert!(parse_temperature("15").is_err());
        assert!(parse_temperature("15,x").is_err());
        assert!(is_ok("ok"));
        assert!(is_ok("OK"));
        assert!(!is_ok("N1:1"));
    }

    #[tokio::test(start_paused = true)]
    async fn strips_crlf() {
        let wire = MockWire::new(vec![reply("OK")]);
        let mut io = wire.port();
        assert_eq!(exchange(&mut io, "c1ph", Duration::from_secs(1)).await, "OK");
        assert_eq!(wire.sent(), vec!["c1ph".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn bare_newline_drains_one_extra_read() {
        let wire = MockWire::new(vec![Some("OK\n".to_string())]);
        let mut io = wire.port();
        let started = Instant::now();

        assert_eq!(exchange(&mut io, "c1ph", Duration::from_secs(1)).await, "OK");
        assert_eq!(wire.reads(), 2);
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn silence_times_out_with_empty_reply() {
        let wire = MockWire::new(vec![None]);
        let mut io = wire.port();
        let started = Instant::now();

        assert_eq!(exchange(&mut io, "c1ns", Duration::from_secs(1)).await, "");
        assert_eq!(started.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn send_retries_until_satisfied() {
        let wire = MockWire::new(vec![None, reply("N9:1"), reply("OK")]);
        let mut io = wire.port();
        let request = Request::whole_box("2", Verb::PowerLow);

        let attempts = send(&mut io, &request, &Timing::default(), |r| Verdict::when(is_ok(r)))
            .await
            .unwrap();
        assert_eq!(attempts, 3);
        assert_eq!(wire.sent().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn send_gives_up_after_budget() {
        let wire = MockWire::new(vec![]);
        let mut io = wire.port();
        let request = Request::port("2", Verb::PowerHigh, "5");

        let err = send(&mut io, &request, &Timing::default(), |r| Verdict::when(is_ok(r)))
            .await
            .unwrap_err();
        assert!(matches!(err, PowerError::PortTimeout { ref port, attempts: 10, .. } if port.as_deref() == Some("5")));
        assert_eq!(wire.sent().len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn unconfirmed_send_never_reads() {
        let wire = MockWire::new(vec![]);
        let mut io = wire.port();

        let delivery = send_unconfirmed(&mut io, &Request::whole_box("4", Verb::Reboot)).await.unwrap();
        assert_eq!(delivery, Delivery::FireAndForgetAck);
        assert_eq!(wire.sent(), vec!["c4rb".to_string()]);
        assert_eq!(wire.reads(), 0);
    }
}
