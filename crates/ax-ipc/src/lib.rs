//! The process-boundary IPC layer.
//!
//! The host terminates a length-prefixed JSON channel from the sandbox,
//! validates every request against per-action strict schemas, consults the
//! taint budget before sensitive actions, dispatches to host services, and
//! audits every side-effectful call. Context (`session_id`, `agent_id`) is
//! derived from the connection handshake, never from payloads.

pub mod client;
pub mod server;
pub mod services;

pub use client::IpcClient;
pub use server::{IpcServer, SessionRegistration};
pub use services::{AuditSink, BrowserOp, CallContext, HostServices};
