pub mod client;
pub mod event_bridge;
pub mod handlers;
pub mod rpc;
pub mod server;

pub use server::{start, start_with_telemetry, ServerConfig, ServerHandle};
