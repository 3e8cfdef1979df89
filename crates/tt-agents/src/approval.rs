use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tt_core::config::ApprovalConfig;

pub use tt_bridge::protocol::ApprovalRequest;
pub use tt_core::config::ApprovalPolicy;

// ---------------------------------------------------------------------------
// ApprovalDecision
// ---------------------------------------------------------------------------

/// A human's answer to an [`ApprovalRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approve,
    Reject,
}

impl fmt::Display for ApprovalDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApprovalDecision::Approve => f.write_str("approve"),
            ApprovalDecision::Reject => f.write_str("reject"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown approval decision: {0}")]
pub struct ParseDecisionError(String);

impl FromStr for ApprovalDecision {
    type Err = ParseDecisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "approve" | "approved" | "yes" | "y" => Ok(ApprovalDecision::Approve),
            "reject" | "rejected" | "deny" | "no" | "n" => Ok(ApprovalDecision::Reject),
            other => Err(ParseDecisionError(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// ApprovalGate
// ---------------------------------------------------------------------------

/// Decides, per tool name, whether a call may run, needs a human, or is
/// refused outright.
#[derive(Debug, Clone)]
pub struct ApprovalGate {
    policies: HashMap<String, ApprovalPolicy>,
    default_policy: ApprovalPolicy,
}

impl ApprovalGate {
    pub fn from_config(config: &ApprovalConfig) -> Self {
        let mut gate = Self {
            policies: HashMap::new(),
            default_policy: config.default_policy,
        };
        for tool in &config.require_approval {
            gate.set_policy(tool.clone(), ApprovalPolicy::RequireApproval);
        }
        for tool in &config.deny {
            gate.set_policy(tool.clone(), ApprovalPolicy::Deny);
        }
        gate
    }

    /// Every tool runs without a human in the loop.
    pub fn permissive() -> Self {
        Self {
            policies: HashMap::new(),
            default_policy: ApprovalPolicy::AutoApprove,
        }
    }

    pub fn set_policy(&mut self, tool_name: impl Into<String>, policy: ApprovalPolicy) {
        self.policies.insert(tool_name.into(), policy);
    }

    pub fn with_policy(mut self, tool_name: impl Into<String>, policy: ApprovalPolicy) -> Self {
        self.set_policy(tool_name, policy);
        self
    }

    /// Policy for `tool_name`, falling back to the default policy.
    pub fn check(&self, tool_name: &str) -> ApprovalPolicy {
        self.policies
            .get(tool_name)
            .copied()
            .unwrap_or(self.default_policy)
    }

    pub fn requires_approval(&self, tool_name: &str) -> bool {
        self.check(tool_name) == ApprovalPolicy::RequireApproval
    }
}

impl Default for ApprovalGate {
    fn default() -> Self {
        Self::from_config(&ApprovalConfig::default())
    }
}
