pub mod intent;
pub mod models;
pub mod policy;
pub mod prompts;

pub use intent::{advisory_safe_cues, classify_query, validate_question, QuestionError};
pub use models::*;
pub use policy::{ensure_disclaimer, scan_for_violations, DISCLAIMER, DISCLAIMER_MARKER};
pub use prompts::{build_rewrite_message, build_user_message, COMPLIANCE_SYSTEM_INSTRUCTION};
