//! Scheduling-claim hallucination guard.
//!
//! Some model back-ends claim to have scheduled things without calling any
//! scheduler tool. After each assistant message, if the text asserts a
//! scheduling action but no scheduler tool ran in the turn, a corrective
//! system instruction forces an actual tool call on the next step.

use regex::Regex;

/// The instruction injected when a claim is caught.
pub const CORRECTIVE_INSTRUCTION: &str = "Your previous message claimed a scheduling action, but \
     no scheduler tool was called. Nothing was scheduled. Call scheduler_add_cron or \
     scheduler_run_at now to actually create the job, or correct your statement.";

/// Detects scheduling claims in assistant text.
pub struct HallucinationGuard {
    claims: Vec<Regex>,
}

impl HallucinationGuard {
    /// Build the guard with its conservative claim patterns.
    pub fn new() -> Self {
        let patterns = [
            r"(?i)\bscheduled a\b",
            r"(?i)\bI(?:'ve| have) scheduled\b",
            r"(?i)\bset up a reminder\b",
            r"(?i)\breminder (?:is )?set\b",
            r"(?i)\bscheduler_add_cron\b",
            r"(?i)\bscheduler_run_at\b",
        ];
        let claims = patterns
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect();
        Self { claims }
    }

    /// Check one assistant message against the tools actually called this
    /// turn. Returns the corrective instruction when a claim is unbacked.
    pub fn check(&self, assistant_text: &str, tools_called: &[String]) -> Option<&'static str> {
        let claimed = self.claims.iter().any(|re| re.is_match(assistant_text));
        if !claimed {
            return None;
        }
        let scheduled = tools_called
            .iter()
            .any(|t| t == "scheduler_add_cron" || t == "scheduler_run_at");
        if scheduled {
            None
        } else {
            Some(CORRECTIVE_INSTRUCTION)
        }
    }
}

impl Default for HallucinationGuard {
    fn default() -> Self {
        Self::new()
    }
}
