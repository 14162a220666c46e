//! Database connection pool and migrations

pub mod migrations;
pub mod pool;

pub use pool::Database;
