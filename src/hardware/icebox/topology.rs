//! Line -> box -> port topology, built once from the cluster config.

use indexmap::IndexMap;

use crate::error::{PowerError, PowerResult};
use crate::hardware::command::Command;
use crate::hardware::types::NodeSlot;

/// Ports per icebox.
pub const BOX_CAPACITY: usize = 10;

/// Where a node lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PortAddr {
    pub line: String,
    pub box_id: String,
    pub port: String,
}

#[derive(Debug, Clone)]
pub struct Port {
    pub id: String,
    pub node: NodeSlot,
}

#[derive(Debug, Clone)]
pub struct IceBox {
    pub id: String,
    pub ports: IndexMap<String, Port>,
}

impl IceBox {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ports: IndexMap::new(),
        }
    }

    pub fn pending(&self) -> impl Iterator<Item = &Port> {
        self.ports.values().filter(|p| p.node.request.is_pending())
    }

    pub fn requested(&self) -> usize {
        self.pending().count()
    }

    /// Command shared by every pending port, if any are pending.
    pub fn pending_command(&self) -> Option<Command> {
        self.pending().find_map(|p| p.node.request.command())
    }
}

/// One serial line and the daisy-chained boxes behind it.
#[derive(Debug, Clone)]
pub struct Line {
    pub device: String,
    pub boxes: IndexMap<String, IceBox>,
}

impl Line {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            boxes: IndexMap::new(),
        }
    }

    pub fn has_pending(&self) -> bool {
        self.boxes.values().any(|b| b.pending().next().is_some())
    }
}

/// All lines of one icebox driver, in config order.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub lines: IndexMap<String, Line>,
}

impl Topology {
    /// Attach a node at `addr`. `config_line` is only used for error messages.
    pub fn attach(&mut self, name: &str, addr: &PortAddr, config_line: usize) -> PowerResult<()> {
        let line = self
            .lines
            .entry(addr.line.clone())
            .or_insert_with(|| Line::new(addr.line.clone()));
        let ice = line
            .boxes
            .entry(addr.box_id.clone())
            .or_insert_with(|| IceBox::new(addr.box_id.clone()));

        if let Some(existing) = ice.ports.get(&addr.port) {
            return Err(PowerError::MalformedConfig {
                line: config_line,
                reason: format!(
                    "{} and {} both claim port {} of box {} on {}",
                    existing.node.name, name, addr.port, addr.box_id, addr.line
                ),
            });
        }
        if ice.ports.len() >= BOX_CAPACITY {
            return Err(PowerError::MalformedConfig {
                line: config_line,
                reason: format!(
                    "box {} on {} already has {} ports, cannot add {}",
                    addr.box_id, addr.line, BOX_CAPACITY, name
                ),
            });
        }

        ice.ports.insert(
            addr.port.clone(),
            Port {
                id: addr.port.clone(),
                node: NodeSlot::new(name),
            },
        );
        Ok(())
    }

    pub fn slot(&self, addr: &PortAddr) -> Option<&NodeSlot> {
        self.lines
            .get(&addr.line)?
            .boxes
            .get(&addr.box_id)?
            .ports
            .get(&addr.port)
            .map(|p| &p.node)
    }

    pub fn slot_mut(&mut self, addr: &PortAddr) -> Option<&mut NodeSlot> {
        self.lines
            .get_mut(&addr.line)?
            .boxes
            .get_mut(&addr.box_id)?
            .ports
            .get_mut(&addr.port)
            .map(|p| &mut p.node)
    }
}
