//! `askweb` crate (library surface).
//!
//! The entrypoint for end users is the `askweb` binary. The router and configuration live here
//! so integration tests can drive them with fake backends.

pub mod config;
pub mod http;

pub use askweb_core as core;
