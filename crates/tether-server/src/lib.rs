//! # tether-server
//!
//! The server half of the tether remoting bridge.
//!
//! - Axum HTTP + `WebSocket` gateway: envelope parsing, call-batch dispatch
//! - `AsyncExecutionEngine`: bounded worker pool with admission control
//! - `LivenessMonitor`: periodic probing and eviction of dead connections
//! - Ambient surfaces: `/health`, `/metrics`, graceful shutdown

#![deny(unsafe_code)]

pub mod config;
pub mod engine;
pub mod health;
pub mod http;
pub mod liveness;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use server::{AppState, BridgeServer};
