//! Core types and traits for the AX agent platform.
//!
//! This crate defines the shared data structures used across the AX host,
//! sandboxed agent, wire protocol, and persistence layers. It contains no
//! business logic and no I/O beyond what `safe_join` needs for path checks.

pub mod address;
pub mod audit;
pub mod config;
pub mod error;
pub mod ids;
pub mod memory;
pub mod message;
pub mod path;
pub mod scheduler;
pub mod skill;
pub mod taint;

pub use error::{AxError, AxResult};
pub use ids::SessionId;
