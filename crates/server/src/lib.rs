pub mod config;
pub mod logging;
pub mod routes;
pub mod server;

pub use config::{Config, ConfigError};
pub use server::TraceServer;
