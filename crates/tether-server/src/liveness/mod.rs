//! Connection liveness: per-connection responsiveness records and the
//! monitor that probes and evicts.

pub mod monitor;
pub mod record;

pub use monitor::{LivenessConfig, LivenessMonitor, ProbeTransport};
pub use record::ConnectionLiveness;
