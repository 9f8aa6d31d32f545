//! # Lineage Application Library
//!
//! The HTTP API, CLI and configuration layer of the Lineage binary,
//! exposed as a library so integration tests can build the router directly.

pub mod api;
pub mod cli;
pub mod config;
