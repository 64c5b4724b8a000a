//! PostgreSQL persistence for the inbox store.

pub mod pool;

pub use pool::{PostgresPool, PostgresPoolError};
