//! stage0 - bootstrap agent for build-fleet hosts.
//!
//! Waits for the network, resolves which buildlet this host should run,
//! downloads it, and hands the process over to it.

pub mod archive;
pub mod commands;
pub mod config;
pub mod error;
pub mod fatal;
pub mod fetch;
pub mod host;
pub mod launch;
pub mod network;
pub mod prep;
pub mod resolver;
pub mod subprocess;
pub mod telemetry;

#[cfg(test)]
mod test_http;
