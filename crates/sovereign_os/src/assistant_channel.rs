#![forbid(unsafe_code)]

/// System prompt the assistant channel runs under. Its digest is recorded in
/// every receipt, so any edit here is visible in the audit trail.
pub const ASSISTANT_SYSTEM_PROMPT: &str = "You are the Sovereign assistant. Answer plainly and only within policy. \
State uncertainty when you are unsure. Never claim professional credentials. \
Decline requests that involve violence, weapons, fraud, intrusion into systems, or illegal drugs.";

pub fn assistant_system_prompt() -> &'static str {
    ASSISTANT_SYSTEM_PROMPT
}
