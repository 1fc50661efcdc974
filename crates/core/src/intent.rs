use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::models::{ClassificationVerdict, RefusalKind, SafeCue, UnsafeIntent};

pub const MAX_QUESTION_CHARS: usize = 1000;

struct PatternRule<T> {
    tag: T,
    matcher: Regex,
}

fn rule<T>(tag: T, pattern: &str) -> PatternRule<T> {
    PatternRule {
        tag,
        matcher: Regex::new(pattern).expect("valid gate pattern"),
    }
}

// Evaluated top to bottom against the lowercased query; first hit wins.
static UNSAFE_RULES: Lazy<Vec<PatternRule<UnsafeIntent>>> = Lazy::new(|| {
    vec![
        rule(
            UnsafeIntent::ApprovalSeeking,
            r"\b(can i|may i|is it (ok|okay|safe|fine) (to|if)|should i|am i (allowed|permitted))\b",
        ),
        rule(
            UnsafeIntent::ApprovalSeeking,
            r"\b(approve|permission|authorize|allow me to)\b",
        ),
        rule(
            UnsafeIntent::SkipRequest,
            r"\b(skip|bypass|shortcut|ignore|omit)\b.*\b(step|procedure|safety|requirement)\b",
        ),
        rule(
            UnsafeIntent::DecisionSeeking,
            r"\b(what should i do|tell me what to do|what action|decide for me)\b",
        ),
        rule(
            UnsafeIntent::SafetyJudgement,
            r"\b(is (this|it|that) (safe|correct|right|compliant))\b",
        ),
        rule(
            UnsafeIntent::ValidationSeeking,
            r"\b(validate|verify|confirm|certify) (my|this|that)\b",
        ),
        rule(
            UnsafeIntent::RealTimeGuidance,
            r"\b(right now|currently|at the moment|immediately)\b.*\b(do|start|begin|proceed)\b",
        ),
        rule(
            UnsafeIntent::EmergencyGuidance,
            r"\b(emergency|urgent|quickly|asap)\b.*\b(what (to|should)|how (to|do))\b",
        ),
        rule(
            UnsafeIntent::PermissionBypass,
            r"\b(instead of (supervisor|manager|safety officer)|without (approval|permission))\b",
        ),
        rule(
            UnsafeIntent::SupervisionBypass,
            r"\b(don't (have|need)|without) (supervisor|manager|safety officer)\b",
        ),
    ]
});

static SAFE_RULES: Lazy<Vec<PatternRule<SafeCue>>> = Lazy::new(|| {
    vec![
        rule(
            SafeCue::Definition,
            r"\b(what (is|are|does|means)|explain|describe|tell me about)\b",
        ),
        rule(
            SafeCue::Rationale,
            r"\b(why (is|are|does|do)|how come|what's the reason)\b",
        ),
        rule(SafeCue::Terminology, r"\b(define|definition|meaning of)\b"),
        rule(SafeCue::Summary, r"\b(summarize|summary|overview of)\b"),
        rule(SafeCue::Learning, r"\b(understand|learn|know more about)\b"),
    ]
});

/// Decides whether a question asks for an explanation or for approval,
/// a decision or live operational guidance.
///
/// Unsafe rules dominate: a query that also reads like an explanation
/// request is still refused. Anything that matches no unsafe rule passes;
/// leaked operational language is caught later by the answer scanner.
pub fn classify_query(query: &str) -> ClassificationVerdict {
    let lower = query.to_lowercase();

    UNSAFE_RULES
        .iter()
        .find(|rule| rule.matcher.is_match(&lower))
        .map(|rule| ClassificationVerdict::refuse(rule.tag))
        .unwrap_or_else(ClassificationVerdict::allow)
}

pub fn advisory_safe_cues(query: &str) -> Vec<SafeCue> {
    let lower = query.to_lowercase();

    SAFE_RULES
        .iter()
        .filter(|rule| rule.matcher.is_match(&lower))
        .map(|rule| rule.tag)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QuestionError {
    #[error("Question cannot be empty")]
    Empty,
    #[error("Question too long (max {MAX_QUESTION_CHARS} characters)")]
    TooLong,
}

/// Boundary check applied by callers before the gate runs.
pub fn validate_question(question: &str) -> Result<&str, QuestionError> {
    if question.trim().is_empty() {
        return Err(QuestionError::Empty);
    }
    if question.chars().count() > MAX_QUESTION_CHARS {
        return Err(QuestionError::TooLong);
    }
    Ok(question)
}

const REFUSAL_APPROVAL: &str = "I cannot approve or grant permission for any actions.

**Why:** Safety approvals must come from authorized supervisors who can assess the specific situation, verify proper training, and ensure all safety requirements are met.

**What you should do:** Speak with your direct supervisor or safety officer before proceeding with any work activity.

⚠️ **Safety Disclaimer:** This explanation is for educational purposes only and does not constitute approval, authorization, or operational guidance. Always follow your facility's procedures and consult with authorized personnel.";

const REFUSAL_SKIP: &str = "I cannot advise on skipping, bypassing, or shortcutting any safety procedures or SOP steps.

**Why:** Every step in safety procedures exists for a specific reason - to protect you and your coworkers from injury or death. Skipping steps creates hazards and violates safety regulations.

**What you should do:** If you have concerns about a procedure's efficiency or practicality, discuss them with your supervisor or safety committee. They can evaluate if the procedure needs updating through proper channels.

⚠️ **Safety Disclaimer:** This explanation is for educational purposes only and does not constitute approval, authorization, or operational guidance. Always follow your facility's procedures and consult with authorized personnel.";

const REFUSAL_DECISION: &str = "I cannot make operational decisions or tell you what actions to take in specific situations.

**Why:** Decisions about work activities must consider factors I cannot assess: your specific training, current conditions, equipment status, and site-specific hazards. Only qualified personnel on-site can make these decisions.

**What you should do:** Consult your supervisor, safety officer, or subject matter expert who can evaluate your specific situation and provide appropriate guidance.

⚠️ **Safety Disclaimer:** This explanation is for educational purposes only and does not constitute approval, authorization, or operational guidance. Always follow your facility's procedures and consult with authorized personnel.";

const REFUSAL_VALIDATION: &str = "I cannot validate, verify, or certify that any action or condition is safe.

**Why:** Safety validation requires on-site assessment by qualified personnel who can inspect actual conditions, verify equipment status, and confirm all safety requirements are met.

**What you should do:** Request a safety inspection or verification from your supervisor or safety department before proceeding with any questionable work.

⚠️ **Safety Disclaimer:** This explanation is for educational purposes only and does not constitute approval, authorization, or operational guidance. Always follow your facility's procedures and consult with authorized personnel.";

const REFUSAL_EMERGENCY: &str = "I cannot provide real-time emergency or operational guidance.

**Why:** Emergency situations require immediate response from trained personnel who can assess the actual conditions and take appropriate action. Delays from consulting an AI system could be dangerous.

**What you should do for emergencies:**
- **Immediate danger:** Evacuate and call 911
- **Equipment issues:** Follow emergency shutdown procedures and notify supervisor
- **Injuries:** Render first aid if trained, call for medical help
- **Uncertain situations:** Stop work and consult supervisor immediately

⚠️ **Safety Disclaimer:** This explanation is for educational purposes only and does not constitute approval, authorization, or operational guidance. Always follow your facility's procedures and consult with authorized personnel.";

const REFUSAL_GENERIC: &str = "I cannot provide approval, authorization, or operational decisions.

**Why:** I am an explanation tool only. Safety and operational decisions must be made by qualified, authorized personnel who can assess your specific situation.

**What you should do:** Consult your supervisor, safety officer, or the appropriate subject matter expert for guidance on any work activities.

⚠️ **Safety Disclaimer:** This explanation is for educational purposes only and does not constitute approval, authorization, or operational guidance. Always follow your facility's procedures and consult with authorized personnel.";

impl RefusalKind {
    pub fn text(self) -> &'static str {
        match self {
            Self::Approval => REFUSAL_APPROVAL,
            Self::Skip => REFUSAL_SKIP,
            Self::Decision => REFUSAL_DECISION,
            Self::Validation => REFUSAL_VALIDATION,
            Self::Emergency => REFUSAL_EMERGENCY,
            Self::Generic => REFUSAL_GENERIC,
        }
    }

    pub fn all() -> [RefusalKind; 6] {
        [
            Self::Approval,
            Self::Skip,
            Self::Decision,
            Self::Validation,
            Self::Emergency,
            Self::Generic,
        ]
    }
}
