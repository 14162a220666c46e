//! Dispense API
//!
//! Thin HTTP surface over the pool: consumers ask for proxies, report
//! outcomes and read statistics.

pub mod handlers;
pub mod routes;
pub mod server;

pub use server::ApiServer;
