//! Configuration: effective settings and the cluster file.

pub mod cluster;
pub mod types;
