//! IPC wire protocol between the AX host and the sandboxed agent.
//!
//! All traffic is JSON framed with a 4-byte big-endian length header over a
//! Unix domain socket. Every recognized action has a strict schema: unknown
//! fields are rejected at every nesting level, every string is bounded and
//! NUL-checked, and identifiers used as path segments are restricted to
//! `[A-Za-z0-9_-]`. One request produces exactly one response.

pub mod action;
pub mod framing;
pub mod llm;
pub mod request;
pub mod response;

pub use action::Action;
pub use framing::{encode_frame, read_frame, write_frame, MAX_FRAME_LEN};
pub use request::{parse_request, IpcRequest};
pub use response::IpcResponse;
