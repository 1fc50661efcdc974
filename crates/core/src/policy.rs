use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

pub const DISCLAIMER_MARKER: &str = "Safety Disclaimer";

pub const DISCLAIMER: &str = "⚠️ Safety Disclaimer: This explanation is for educational purposes only. It does not provide operational instructions, approvals, or real-time guidance. Always follow your organization's official procedures and consult authorized supervisors or safety officers.";

/// Substituted when a rewritten answer still trips the scanner.
pub const FALLBACK_RESPONSE: &str = "I apologize, but I'm having difficulty providing a response that meets our strict safety compliance standards.

To ensure I don't inadvertently provide operational instructions, I recommend:
- Consulting your organization's official SOP documentation
- Speaking with your supervisor or safety officer
- Attending authorized training sessions

⚠️ Safety Disclaimer: This explanation is for educational purposes only. It does not provide operational instructions, approvals, or real-time guidance. Always follow your organization's official procedures and consult authorized supervisors or safety officers.";

pub const TRANSPORT_APOLOGY: &str = "I apologize, but I'm experiencing technical difficulties connecting to the AI service. Please try again in a moment or contact your supervisor for assistance.";

pub const UNEXPECTED_APOLOGY: &str =
    "An unexpected error occurred. Please contact your supervisor for assistance.";

// Imperative verb + object constructions. Order matters: violations are
// reported pattern by pattern.
static BANNED_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\b(disconnect|lock|attach|turn|switch|press|isolate|activate|deactivate)\s+(the|a|an|it)\b",
        r"\b(connect|remove|insert|pull|push|rotate|flip|engage|disengage)\s+(the|a|an|it)\b",
        r"\b(install|uninstall|mount|unmount|fasten|unfasten)\s+(the|a|an|it)\b",
        r"\b(open|close)\s+(the|a|an)\s+(door|valve|panel|switch|breaker)\b",
        r"\b(apply|place|position|adjust)\s+(the|a|an|your)\b",
        r"\byou\s+(should|must|need to)\s+(disconnect|lock|attach|turn|switch|press|isolate|remove|connect|verify|check|test|inspect)\b",
        r"\b(first|then|next|finally),?\s+(disconnect|lock|attach|turn|switch|press)\b",
    ]
    .iter()
    .map(|pattern| {
        RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .expect("valid banned pattern")
    })
    .collect()
});

/// Collects every banned-pattern hit in `text`, grouped by pattern in
/// declaration order and by position within each pattern. Duplicates are kept.
pub fn scan_for_violations(text: &str) -> Vec<String> {
    BANNED_PATTERNS
        .iter()
        .flat_map(|pattern| pattern.find_iter(text).map(|hit| hit.as_str().to_string()))
        .collect()
}

/// Appends the disclaimer unless the marker is already present, so applying
/// it twice is a no-op.
pub fn ensure_disclaimer(text: &str) -> String {
    if text.contains(DISCLAIMER_MARKER) {
        text.to_string()
    } else {
        format!("{text}\n\n{DISCLAIMER}")
    }
}
