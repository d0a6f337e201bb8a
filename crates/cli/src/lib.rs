//! Command-line entry point and network boundary of chatmux.

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod server;
