use serde::{Deserialize, Serialize};

use crate::policy::{ensure_disclaimer, scan_for_violations};

/// Semantic tag attached to every unsafe rule. Declaration order is the
/// order the gate evaluates rules in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnsafeIntent {
    ApprovalSeeking,
    SkipRequest,
    DecisionSeeking,
    SafetyJudgement,
    ValidationSeeking,
    RealTimeGuidance,
    EmergencyGuidance,
    PermissionBypass,
    SupervisionBypass,
}

impl UnsafeIntent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ApprovalSeeking => "approval_seeking",
            Self::SkipRequest => "skip_request",
            Self::DecisionSeeking => "decision_seeking",
            Self::SafetyJudgement => "safety_judgement",
            Self::ValidationSeeking => "validation_seeking",
            Self::RealTimeGuidance => "real_time_guidance",
            Self::EmergencyGuidance => "emergency_guidance",
            Self::PermissionBypass => "permission_bypass",
            Self::SupervisionBypass => "supervision_bypass",
        }
    }

    /// Coarse group the tag belongs to, used in logs.
    pub fn group(self) -> &'static str {
        match self {
            Self::ApprovalSeeking => "approval-seeking",
            Self::SkipRequest => "skip-request",
            Self::DecisionSeeking => "decision-seeking",
            Self::SafetyJudgement | Self::ValidationSeeking => "validation-seeking",
            Self::RealTimeGuidance | Self::EmergencyGuidance => "emergency-guidance",
            Self::PermissionBypass | Self::SupervisionBypass => "supervision-bypass",
        }
    }

    /// Refusal template shown for this tag. Tags without a dedicated
    /// template fall back to [`RefusalKind::Generic`].
    pub fn refusal(self) -> RefusalKind {
        match self {
            Self::ApprovalSeeking | Self::PermissionBypass => RefusalKind::Approval,
            Self::SkipRequest => RefusalKind::Skip,
            Self::DecisionSeeking => RefusalKind::Decision,
            Self::ValidationSeeking => RefusalKind::Validation,
            Self::RealTimeGuidance | Self::EmergencyGuidance => RefusalKind::Emergency,
            Self::SafetyJudgement | Self::SupervisionBypass => RefusalKind::Generic,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefusalKind {
    Approval,
    Skip,
    Decision,
    Validation,
    Emergency,
    Generic,
}

/// Explanation-style phrasing. Collected for diagnostics only, a cue never
/// overrides an unsafe match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafeCue {
    Definition,
    Rationale,
    Terminology,
    Summary,
    Learning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationVerdict {
    pub safe: bool,
    pub refusal_text: Option<String>,
    pub matched: Option<UnsafeIntent>,
}

impl ClassificationVerdict {
    pub fn allow() -> Self {
        Self {
            safe: true,
            refusal_text: None,
            matched: None,
        }
    }

    pub fn refuse(intent: UnsafeIntent) -> Self {
        Self {
            safe: false,
            refusal_text: Some(intent.refusal().text().to_string()),
            matched: Some(intent),
        }
    }
}

/// One call's worth of generated text together with the fragments the
/// banned-pattern scanner flagged in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationAttempt {
    pub text: String,
    pub violations: Vec<String>,
}

impl GenerationAttempt {
    pub fn scan(text: impl Into<String>) -> Self {
        let text = text.into();
        let violations = scan_for_violations(&text);
        Self { text, violations }
    }

    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceResult {
    pub response: String,
    pub safe: bool,
    pub filtered: bool,
    pub rewritten: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComplianceResult {
    /// Gate rejection. The refusal templates already carry the disclaimer.
    pub fn refused(refusal_text: impl Into<String>) -> Self {
        Self {
            response: refusal_text.into(),
            safe: false,
            filtered: true,
            rewritten: false,
            error: None,
        }
    }

    pub fn answered(text: &str, rewritten: bool) -> Self {
        Self {
            response: ensure_disclaimer(text),
            safe: true,
            filtered: false,
            rewritten,
            error: None,
        }
    }

    pub fn failed(apology: &str, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        Self {
            response: ensure_disclaimer(&format!("{apology}\n\nError: {detail}")),
            safe: true,
            filtered: false,
            rewritten: false,
            error: Some(detail),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplainRequest {
    pub question: String,
    #[serde(default)]
    pub sop_id: Option<String>,
}
