pub mod admin;
pub mod config;
pub mod failover;
pub mod health;
pub mod maintenance;
pub mod metrics;
pub mod rules;
pub mod scheduler;
pub mod server;
pub mod state;

pub use config::Config;
