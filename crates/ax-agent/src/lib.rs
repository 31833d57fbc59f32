//! The sandboxed agent runner.
//!
//! Receives the user turn and prior history over stdin, assembles the
//! system prompt, drives the model to completion with interleaved tool
//! dispatch, and writes assistant output to stdout token by token. Local
//! tools run inside the sandbox, confined to the workspace; everything else
//! crosses the IPC channel to the host. The model SDK never sees
//! credentials: its base URL points at the TCP bridge.

pub mod guard;
pub mod input;
pub mod llm;
pub mod runner;
pub mod tools;

pub use guard::HallucinationGuard;
pub use input::AgentInput;
pub use runner::{AgentRunner, RunnerConfig};
