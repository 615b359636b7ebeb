//! Scripted serial lines for driver tests.
//!
//! Each write pops the next scripted reply; `None` means the box stays
//! silent and the read pends until the caller's deadline.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::icebox::transport::{Connector, SerialIo};
use crate::error::{PowerError, PowerResult};

/// A well-formed `\r\n`-terminated reply.
pub fn reply(text: &str) -> Option<String> {
    Some(format!("{}\r\n", text))
}

#[derive(Default)]
struct WireState {
    script: VecDeque<Option<String>>,
    pending: Vec<u8>,
    sent: Vec<String>,
    reads: usize,
    acquired: usize,
    released: usize,
}

#[derive(Clone, Default)]
pub struct MockWire {
    state: Arc<Mutex<WireState>>,
}

impl MockWire {
    pub fn new(script: Vec<Option<String>>) -> Self {
        let wire = Self::default();
        wire.state.lock().unwrap().script = script.into();
        wire
    }

    pub fn port(&self) -> MockPort {
        self.state.lock().unwrap().acquired += 1;
        MockPort { wire: self.clone() }
    }

    /// Lines written so far, without their `\r\n`.
    pub fn sent(&self) -> Vec<String> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn reads(&self) -> usize {
        self.state.lock().unwrap().reads
    }

    pub fn acquired(&self) -> usize {
        self.state.lock().unwrap().acquired
    }

    pub fn released(&self) -> usize {
        self.state.lock().unwrap().released
    }
}

pub struct MockPort {
    wire: MockWire,
}

#[async_trait]
impl SerialIo for MockPort {
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let mut state = self.wire.state.lock().unwrap();
        let line = String::from_utf8_lossy(data).trim_end_matches(['\r', '\n']).to_string();
        state.sent.push(line);
        if let Some(Some(text)) = state.script.pop_front() {
            state.pending.extend_from_slice(text.as_bytes());
        }
        Ok(())
    }

    async fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        {
            let mut state = self.wire.state.lock().unwrap();
            state.reads += 1;
            if !state.pending.is_empty() {
                let n = buf.len().min(state.pending.len());
                buf[..n].copy_from_slice(&state.pending[..n]);
                state.pending.drain(..n);
                return Ok(n);
            }
        }
        std::future::pending().await
    }
}

impl Drop for MockPort {
    fn drop(&mut self) {
        self.wire.state.lock().unwrap().released += 1;
    }
}

/// Serves scripted wires by device path.
#[derive(Clone, Default)]
pub struct MockConnector {
    lines: Arc<Mutex<HashMap<String, MockWire>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(&self, device: &str, script: Vec<Option<String>>) -> MockWire {
        let wire = MockWire::new(script);
        self.lines.lock().unwrap().insert(device.to_string(), wire.clone());
        wire
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Port = MockPort;

    async fn acquire(&self, device: &str) -> PowerResult<MockPort> {
        let wire = self.lines.lock().unwrap().get(device).cloned();
        wire.map(|w| w.port()).ok_or_else(|| PowerError::DeviceOpenFailed {
            path: device.to_string(),
            source: io::Error::from(io::ErrorKind::NotFound),
        })
    }
}
