//! Cluster file parsing.
//!
//! One node per line: `name { qtype params... } [{ ctype params... }]`.
//! The first block names the device that answers queries, the optional
//! second the device that switches power. Lines starting with `#` and lines
//! without a `{` are skipped.

use std::collections::HashSet;
use std::path::Path;

use tracing::{debug, info};

use crate::error::{PowerError, PowerResult};
use crate::hardware::types::DeviceKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSpec {
    pub kind: DeviceKind,
    pub params: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub name: String,
    /// 1-based line in the cluster file.
    pub line: usize,
    pub query: DeviceSpec,
    pub control: DeviceSpec,
}

pub async fn load_cluster(path: &Path) -> PowerResult<Vec<NodeConfig>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| PowerError::ConfigNotFound {
            path: path.display().to_string(),
            source,
        })?;
    let nodes = parse_cluster(&text)?;
    info!("Loaded {} node(s) from {}", nodes.len(), path.display());
    Ok(nodes)
}

pub fn parse_cluster(text: &str) -> PowerResult<Vec<NodeConfig>> {
    let mut nodes = Vec::new();
    let mut seen = HashSet::new();

    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        if raw.trim_start().starts_with('#') {
            continue;
        }
        let blocks: Vec<&str> = raw.split('{').collect();
        if blocks.len() < 2 {
            continue;
        }
        if blocks.len() > 3 {
            return Err(malformed(line, "more than two device blocks"));
        }

        let name = blocks[0].trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(malformed(line, "expected a single node name before '{'"));
        }
        if !seen.insert(name.to_string()) {
            return Err(malformed(line, &format!("node {} defined twice", name)));
        }

        let query = parse_block(blocks[1], line)?;
        let control = match blocks.get(2) {
            Some(block) => parse_block(block, line)?,
            None => query.clone(),
        };
        debug!("config line {}: {} query={} control={}", line, name, query.kind, control.kind);

        nodes.push(NodeConfig {
            name: name.to_string(),
            line,
            query,
            control,
        });
    }
    Ok(nodes)
}

fn parse_block(block: &str, line: usize) -> PowerResult<DeviceSpec> {
    let body = block
        .trim()
        .strip_suffix('}')
        .ok_or_else(|| malformed(line, "device block is missing its closing '}'"))?;
    let mut tokens = body.split_whitespace();
    let kind_name = tokens
        .next()
        .ok_or_else(|| malformed(line, "empty device block"))?;
    let kind = DeviceKind::from_name(kind_name).ok_or_else(|| PowerError::UnknownDeviceType {
        line,
        kind: kind_name.to_string(),
    })?;
    Ok(DeviceSpec {
        kind,
        params: tokens.map(str::to_string).collect(),
    })
}

fn malformed(line: usize, reason: &str) -> PowerError {
    PowerError::MalformedConfig {
        line,
        reason: reason.to_string(),
    }
}
