//! Prompt assembly with token budget allocation.

use crate::context::PromptContext;
use crate::module::{estimate_tokens, PromptModule};
use crate::modules::builtin_modules;
use tracing::debug;

/// Tokens reserved for model output.
pub const OUTPUT_RESERVE: u64 = 4096;

/// Per-module metadata for one build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleStat {
    pub name: &'static str,
    pub estimated_tokens: u64,
}

/// The assembled prompt plus build metadata.
#[derive(Debug, Clone)]
pub struct BuiltPrompt {
    /// The final prompt text.
    pub text: String,
    /// Included modules, in render order.
    pub modules: Vec<ModuleStat>,
    /// Total estimated tokens of `text`.
    pub estimated_tokens: u64,
    /// Wall-clock build time. Not part of the determinism contract.
    pub build_ms: u64,
}

/// Composes registered modules into a system prompt.
pub struct PromptBuilder {
    modules: Vec<Box<dyn PromptModule>>,
}

impl PromptBuilder {
    /// A builder with the built-in module set.
    pub fn new() -> Self {
        Self {
            modules: builtin_modules(),
        }
    }

    /// A builder with a custom module set (used in tests).
    pub fn with_modules(modules: Vec<Box<dyn PromptModule>>) -> Self {
        Self { modules }
    }

    /// Assemble the prompt for one turn.
    ///
    /// Required modules render first, unconditionally. Optional modules are
    /// then added in priority order while they fit the remaining budget,
    /// degrading to their minimal rendering and finally dropping.
    pub fn build(&self, ctx: &PromptContext) -> BuiltPrompt {
        let started = std::time::Instant::now();

        let budget = ctx
            .context_window
            .saturating_sub(ctx.history_tokens)
            .saturating_sub(OUTPUT_RESERVE);

        let mut included: Vec<&Box<dyn PromptModule>> = self
            .modules
            .iter()
            .filter(|m| m.should_include(ctx))
            .collect();
        included.sort_by_key(|m| (m.priority(), m.name()));

        let mut sections: Vec<(String, &'static str, u64)> = Vec::new();
        let mut spent: u64 = 0;

        // Required modules always render, even past the budget: they are the
        // security floor of the prompt.
        for module in included.iter().filter(|m| !m.optional()) {
            let text = module.render(ctx).join("\n");
            let tokens = estimate_tokens(&text);
            spent += tokens;
            sections.push((text, module.name(), tokens));
        }

        for module in included.iter().filter(|m| m.optional()) {
            let text = module.render(ctx).join("\n");
            let tokens = estimate_tokens(&text);
            if spent + tokens <= budget {
                spent += tokens;
                sections.push((text, module.name(), tokens));
                continue;
            }
            if let Some(minimal_lines) = module.render_minimal(ctx) {
                let minimal = minimal_lines.join("\n");
                let minimal_tokens = estimate_tokens(&minimal);
                if spent + minimal_tokens <= budget {
                    spent += minimal_tokens;
                    sections.push((minimal, module.name(), minimal_tokens));
                    continue;
                }
            }
            debug!(module = module.name(), "Dropped prompt module over budget");
        }

        // Render order follows priority, which the sections already honor
        // within each pass; merge the two passes back into priority order.
        sections.sort_by_key(|(_, name, _)| {
            self.modules
                .iter()
                .find(|m| m.name() == *name)
                .map(|m| (m.priority(), m.name()))
                .unwrap_or((u8::MAX, ""))
        });

        let text = sections
            .iter()
            .map(|(t, _, _)| t.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let modules = sections
            .iter()
            .map(|(_, name, tokens)| ModuleStat {
                name,
                estimated_tokens: *tokens,
            })
            .collect();

        BuiltPrompt {
            estimated_tokens: estimate_tokens(&text),
            text,
            modules,
            build_ms: started.elapsed().as_millis() as u64,
        }
    }
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SkillEntry;

    fn ctx_with_skills() -> PromptContext {
        let mut ctx = PromptContext::bare("main");
        ctx.identity.agents = Some("Operate carefully.".into());
        ctx.skills.push(SkillEntry {
            name: "summarize".into(),
            content: "Summarize documents into five bullet points.".into(),
        });
        ctx.heartbeat_minutes = Some(30);
        ctx
    }

    #[test]
    fn identical_context_builds_identical_prompt() {
        let builder = PromptBuilder::new();
        let ctx = ctx_with_skills();
        let a = builder.build(&ctx);
        let b = builder.build(&ctx);
        assert_eq!(a.text, b.text);
        assert_eq!(a.modules, b.modules);
        assert_eq!(a.estimated_tokens, b.estimated_tokens);
    }

    #[test]
    fn required_modules_present_in_order() {
        let builder = PromptBuilder::new();
        let built = builder.build(&ctx_with_skills());
        let names: Vec<&str> = built.modules.iter().map(|m| m.name).collect();
        let identity = names.iter().position(|n| *n == "identity").unwrap();
        let defense = names.iter().position(|n| *n == "injection-defense").unwrap();
        let security = names
            .iter()
            .position(|n| *n == "security-boundaries")
            .unwrap();
        assert!(identity < defense && defense < security);
    }

    #[test]
    fn tight_budget_degrades_skills_to_minimal() {
        let builder = PromptBuilder::new();
        let mut ctx = ctx_with_skills();
        ctx.skills[0].content = "word ".repeat(5000);

        // Leave just enough room that the full skills body cannot fit but
        // the minimal listing can.
        ctx.context_window = OUTPUT_RESERVE + 1200;
        ctx.history_tokens = 0;

        let built = builder.build(&ctx);
        assert!(built.text.contains("Available skills"));
        assert!(!built.text.contains("word word word word word word"));
    }

    #[test]
    fn zero_budget_drops_optional_keeps_required() {
        let builder = PromptBuilder::new();
        let mut ctx = ctx_with_skills();
        ctx.context_window = 0;
        let built = builder.build(&ctx);
        let names: Vec<&str> = built.modules.iter().map(|m| m.name).collect();
        assert!(names.contains(&"identity"));
        assert!(names.contains(&"injection-defense"));
        assert!(names.contains(&"security-boundaries"));
        assert!(!names.contains(&"runtime"));
        assert!(!names.contains(&"heartbeat"));
    }

    #[test]
    fn dropping_optional_module_changes_metadata() {
        let builder = PromptBuilder::new();
        let mut wide = ctx_with_skills();
        wide.context_window = 200_000;
        let full = builder.build(&wide);

        let mut tight = ctx_with_skills();
        tight.context_window = 0;
        let reduced = builder.build(&tight);

        assert!(full.modules.len() > reduced.modules.len());
        assert!(full.estimated_tokens > reduced.estimated_tokens);
    }

    #[test]
    fn metadata_tokens_match_sections() {
        let builder = PromptBuilder::new();
        let built = builder.build(&ctx_with_skills());
        // The whole-text estimate differs from the per-module total only by
        // joiner overhead and per-section rounding.
        let per_module: u64 = built.modules.iter().map(|m| m.estimated_tokens).sum();
        let slack = built.modules.len() as u64;
        assert!(built.estimated_tokens.abs_diff(per_module) <= slack);
    }

    #[test]
    fn bootstrap_mode_builds_minimal_prompt() {
        let builder = PromptBuilder::new();
        let mut ctx = ctx_with_skills();
        ctx.bootstrap_mode = true;
        ctx.identity.bootstrap = Some("Write your SOUL.md first.".into());
        let built = builder.build(&ctx);
        let names: Vec<&str> = built.modules.iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["identity", "security-boundaries"]);
        assert!(built.text.contains("Write your SOUL.md first."));
    }
}
