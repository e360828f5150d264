//! # tether-rpc
//!
//! Wire protocol and call-dispatch core of the tether remoting bridge.
//!
//! - Envelope and call-batch types matching the browser wire format exactly
//! - `HandlerMetadata` with stable numeric ids derived from method signatures
//! - `MethodRegistry`: one-time scan, O(1) id resolution, name + path lookup
//! - Per-call dispatch: resolve, access check, validation, sync execution or
//!   deferral to the async engine
//! - Error taxonomy: every per-call failure becomes a structured response

#![deny(unsafe_code)]

pub mod descriptor;
pub mod dispatch;
pub mod errors;
pub mod frame;
pub mod metadata;
pub mod protocol;
pub mod registry;
pub mod validation;
