//! Skill proposal types.

use serde::{Deserialize, Serialize};

/// Host verdict on a skill the agent proposed for itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillVerdict {
    /// Safe by inspection; installed immediately and visible next turn.
    AutoApprove,
    /// Queued for human review.
    NeedsReview,
    /// Matched the hard-reject list.
    Reject,
}

impl std::fmt::Display for SkillVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkillVerdict::AutoApprove => write!(f, "auto_approve"),
            SkillVerdict::NeedsReview => write!(f, "needs_review"),
            SkillVerdict::Reject => write!(f, "reject"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_snake_case() {
        assert_eq!(
            serde_json::to_string(&SkillVerdict::AutoApprove).unwrap(),
            "\"auto_approve\""
        );
        let v: SkillVerdict = serde_json::from_str("\"needs_review\"").unwrap();
        assert_eq!(v, SkillVerdict::NeedsReview);
    }
}
