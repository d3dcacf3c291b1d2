//! slicd library crate: the greeting service and daemon plumbing, exposed
//! for tests. The binary is in main.rs.

pub mod config;
pub mod greeting;
pub mod runtime;
pub mod telemetry;
