//! Modular system-prompt assembly.
//!
//! The prompt for each agent turn is composed from registered modules,
//! ordered by ascending priority and fitted into a per-turn token budget.
//! Required modules always render; optional modules degrade to a minimal
//! rendering or drop entirely when the budget is tight. Given identical
//! input the builder produces byte-identical output.

pub mod builder;
pub mod context;
pub mod module;
pub mod modules;

pub use builder::{BuiltPrompt, ModuleStat, PromptBuilder, OUTPUT_RESERVE};
pub use context::{IdentityFiles, PromptContext, SkillEntry};
pub use module::{estimate_tokens, PromptModule};
