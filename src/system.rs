//! Host process plumbing.

pub mod executor;
