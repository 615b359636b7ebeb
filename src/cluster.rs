//! Cluster fan-out: routes each node to its query or control backend, runs
//! the backends concurrently and gathers their output in config order.

use std::collections::HashSet;

use futures_util::future::join_all;
use indexmap::IndexMap;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::config::cluster::NodeConfig;
use crate::error::{PowerError, PowerResult};
use crate::hardware::command::Command;
use crate::hardware::icebox::transport::{Connector, TtyConnector};
use crate::hardware::icebox::Timing;
use crate::hardware::types::{DeviceKind, ExecContext};
use crate::hardware::Driver;

#[derive(Debug, Clone, Copy)]
struct Routing {
    query: DeviceKind,
    control: DeviceKind,
}

impl Routing {
    fn for_command(&self, command: Command) -> DeviceKind {
        if command.is_mutating() {
            self.control
        } else {
            self.query
        }
    }
}

pub struct Cluster<C: Connector + Clone = TtyConnector> {
    nodes: IndexMap<String, Routing>,
    drivers: IndexMap<DeviceKind, Driver<C>>,
}

impl Cluster {
    pub fn from_config(nodes: &[NodeConfig]) -> PowerResult<Self> {
        Self::with_connector(nodes, TtyConnector::default(), Timing::default())
    }
}

impl<C: Connector + Clone> Cluster<C> {
    pub fn with_connector(nodes: &[NodeConfig], connector: C, timing: Timing) -> PowerResult<Self> {
        let mut cluster = Self {
            nodes: IndexMap::new(),
            drivers: IndexMap::new(),
        };

        for node in nodes {
            let query = node.query.kind;
            let control = node.control.kind;
            if query == control && node.query.params != node.control.params {
                return Err(PowerError::MalformedConfig {
                    line: node.line,
                    reason: format!("{} has two different {} blocks", node.name, query),
                });
            }

            cluster
                .driver_entry(query, &connector, &timing)
                .controller_mut()
                .add_node(&node.name, &node.query.params, node.line)?;
            if control != query {
                cluster
                    .driver_entry(control, &connector, &timing)
                    .controller_mut()
                    .add_node(&node.name, &node.control.params, node.line)?;
            }
            cluster.nodes.insert(node.name.clone(), Routing { query, control });
        }

        debug!(
            "cluster: {} node(s) over {} backend(s)",
            cluster.nodes.len(),
            cluster.drivers.len()
        );
        Ok(cluster)
    }

    fn driver_entry(&mut self, kind: DeviceKind, connector: &C, timing: &Timing) -> &mut Driver<C> {
        self.drivers
            .entry(kind)
            .or_insert_with(|| Driver::new(kind, connector, timing))
    }

    /// Every node, in config order.
    pub fn names(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }

    /// Check a requested node list against the config.
    pub fn select(&self, requested: &[String]) -> PowerResult<Vec<String>> {
        let mut seen = HashSet::new();
        let mut selected = Vec::new();
        for name in requested {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            if !self.nodes.contains_key(name) {
                return Err(PowerError::UnknownNode(name.to_string()));
            }
            if seen.insert(name.to_string()) {
                selected.push(name.to_string());
            }
        }
        if selected.is_empty() {
            return Err(PowerError::NoMatchingNodes);
        }
        Ok(selected)
    }

    /// Carry out `command` on `names` and return the output lines.
    pub async fn run(&mut self, command: Command, names: &[String], ctx: &ExecContext) -> PowerResult<Vec<String>> {
        let targets = if command.is_mutating() {
            self.filter_toggles(command, names, ctx).await?
        } else {
            names.to_vec()
        };

        if targets.is_empty() {
            info!("No node needs {}", command);
            return Ok(Vec::new());
        }
        self.dispatch(command, &targets, ctx).await?;
        Ok(self.collect(command, &targets))
    }

    /// Wake-on-LAN toggles power, so only send it to nodes whose current
    /// state differs from the one asked for.
    async fn filter_toggles(
        &mut self,
        command: Command,
        names: &[String],
        ctx: &ExecContext,
    ) -> PowerResult<Vec<String>> {
        let toggles: Vec<String> = names.iter().filter(|n| self.is_toggle(n)).cloned().collect();
        if toggles.is_empty() {
            return Ok(names.to_vec());
        }

        // on wants nodes that are off; off and reset want nodes that are on
        let probe = if command == Command::On {
            Command::ReverseQuery
        } else {
            Command::Query
        };
        self.dispatch(probe, &toggles, ctx).await?;
        let eligible: HashSet<String> = self.collect(probe, &toggles).into_iter().collect();

        let targets: Vec<String> = names
            .iter()
            .filter(|n| !self.is_toggle(n) || eligible.contains(*n))
            .cloned()
            .collect();
        debug!("etherwake: {} of {} node(s) need {}", eligible.len(), toggles.len(), command);
        Ok(targets)
    }

    fn is_toggle(&self, name: &str) -> bool {
        self.nodes
            .get(name)
            .map_or(false, |r| r.control == DeviceKind::Etherwake)
    }

    async fn dispatch(&mut self, command: Command, names: &[String], ctx: &ExecContext) -> PowerResult<()> {
        for name in names {
            let kind = self
                .nodes
                .get(name)
                .map(|r| r.for_command(command))
                .ok_or_else(|| PowerError::UnknownNode(name.clone()))?;
            let driver = self
                .drivers
                .get_mut(&kind)
                .ok_or_else(|| PowerError::UnknownNode(name.clone()))?;
            driver.controller_mut().mark_pending(name, command)?;
        }

        let permits = Semaphore::new(ctx.fanout.max(1));
        let runs = self
            .drivers
            .values_mut()
            .map(|d| d.controller_mut())
            .filter(|c| c.has_pending())
            .map(|controller| {
                let permits = &permits;
                async move {
                    let _permit = permits.acquire().await.ok();
                    debug!("{}: executing {}", controller.kind(), command);
                    controller.execute(ctx).await
                }
            });

        for outcome in join_all(runs).await {
            outcome?;
        }
        Ok(())
    }

    /// Output lines for `names`, in config order.
    fn collect(&self, command: Command, names: &[String]) -> Vec<String> {
        let wanted: HashSet<&str> = names.iter().map(String::as_str).collect();
        self.nodes
            .iter()
            .filter(|(name, _)| wanted.contains(name.as_str()))
            .filter_map(|(name, routing)| {
                self.drivers
                    .get(&routing.for_command(command))?
                    .controller()
                    .fetch_result(name)
            })
            .collect()
    }
}
