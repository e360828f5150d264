//! WebSocket gateway: connection state and per-client session loop.

pub mod connection;
pub mod session;

pub use connection::{ClientConnection, Outbound};
pub use session::run_ws_session;
