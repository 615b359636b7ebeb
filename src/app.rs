//! Command-line surface: argument parsing and log setup.

pub mod cli;
pub mod logging;
