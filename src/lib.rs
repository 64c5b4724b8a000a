// Infrastructure
pub mod config;
pub mod error;
pub mod metrics;
pub mod postgres;
pub mod redis;

// Domain
pub mod catalog;
pub mod lock;
pub mod notification;
pub mod outcome;
pub mod stream;
pub mod template;

// Application
pub mod api;
pub mod publisher;
pub mod server;

// Supporting modules
pub mod shutdown;
pub mod telemetry;
