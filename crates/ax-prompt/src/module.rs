//! The prompt module contract.

use crate::context::PromptContext;

/// Estimate tokens for a piece of text: ⌈bytes/4⌉.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64).div_ceil(4)
}

/// One composable section of the system prompt.
///
/// Modules are registered at builder construction and live for the process
/// lifetime; they hold no per-session state.
pub trait PromptModule: Send + Sync {
    /// Stable module name, reported in build metadata.
    fn name(&self) -> &'static str;

    /// Ordering priority, 0..100; lower renders earlier.
    fn priority(&self) -> u8;

    /// Declarative gating for this context.
    fn should_include(&self, ctx: &PromptContext) -> bool;

    /// Render the section as a list of lines.
    fn render(&self, ctx: &PromptContext) -> Vec<String>;

    /// Reduced rendering used when the full section does not fit the
    /// budget. `None` means the module has no minimal form.
    fn render_minimal(&self, _ctx: &PromptContext) -> Option<Vec<String>> {
        None
    }

    /// Whether the module may be dropped whole when nothing fits.
    fn optional(&self) -> bool {
        false
    }

    /// Estimated token cost of the full rendering.
    fn estimated_tokens(&self, ctx: &PromptContext) -> u64 {
        estimate_tokens(&self.render(ctx).join("\n"))
    }
}
