use super::markers::DesMarkers;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

static STEP_REF_RE: OnceLock<Regex> = OnceLock::new();

fn step_ref_re() -> &'static Regex {
    STEP_REF_RE.get_or_init(|| Regex::new(r"[0-9]{2}-[0-9]{2}").unwrap())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnforcementResult {
    pub enforcement_required: bool,
    pub step_id: Option<String>,
    pub reason: String,
}

/// Flags prompts that reference a step without carrying DES markers, so the
/// work cannot slip past monitoring.
#[derive(Debug, Clone, Copy, Default)]
pub struct DesEnforcementPolicy;

impl DesEnforcementPolicy {
    pub fn check(&self, prompt: &str) -> EnforcementResult {
        let markers = DesMarkers::parse(prompt);
        if markers.is_exempt() {
            return EnforcementResult {
                enforcement_required: false,
                step_id: None,
                reason: "prompt is marked DES-ENFORCEMENT: exempt".to_string(),
            };
        }

        let Some(step_id) = find_step_reference(prompt) else {
            return EnforcementResult {
                enforcement_required: false,
                step_id: None,
                reason: "no step reference found".to_string(),
            };
        };

        if markers.is_des_task() {
            return EnforcementResult {
                enforcement_required: false,
                reason: format!("step {step_id} is covered by DES markers"),
                step_id: Some(step_id),
            };
        }

        EnforcementResult {
            enforcement_required: true,
            reason: format!(
                "prompt references step {step_id} but carries no DES markers; \
                 step work must run under DES monitoring"
            ),
            step_id: Some(step_id),
        }
    }
}

/// First standalone `NN-NN` in `text`. A candidate touching another digit or
/// a hyphen on either side is part of something longer, such as a
/// `YYYY-MM-DD` date, and does not count.
pub fn find_step_reference(text: &str) -> Option<String> {
    let re = step_ref_re();
    let mut pos = 0;
    while let Some(m) = re.find_at(text, pos) {
        let before = text[..m.start()].chars().next_back();
        let after = text[m.end()..].chars().next();
        let attached = |c: Option<char>| c.is_some_and(|c| c.is_ascii_digit() || c == '-');
        if !attached(before) && !attached(after) {
            return Some(m.as_str().to_string());
        }
        // Candidates are ASCII, so the next char boundary is one byte on.
        pos = m.start() + 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_is_not_a_step() {
        let result = DesEnforcementPolicy.check("Deploy by 2026-02-09 deadline");
        assert!(!result.enforcement_required);
        assert!(result.step_id.is_none());
    }

    #[test]
    fn non_ascii_digits_are_not_a_step() {
        assert_eq!(find_step_reference("step \u{0660}\u{0661}-\u{0660}\u{0661}"), None);
        assert_eq!(
            find_step_reference("\u{0661}\u{0662}-34-56 then 07-08"),
            Some("07-08".to_string())
        );
    }

    #[test]
    fn bare_step_reference_is_enforced() {
        let result = DesEnforcementPolicy.check("Execute step 01-01");
        assert!(result.enforcement_required);
        assert_eq!(result.step_id.as_deref(), Some("01-01"));
        assert!(result.reason.contains("01-01"));
    }

    #[test]
    fn markers_satisfy_enforcement() {
        let prompt = "<!-- DES-VALIDATION : required -->\n\
                      <!-- DES-PROJECT-ID : auth -->\n\
                      <!-- DES-STEP-ID : 01-01 -->\n\
                      Execute step 01-01";
        assert!(!DesEnforcementPolicy.check(prompt).enforcement_required);
    }

    #[test]
    fn exempt_bypasses_step_reference() {
        let prompt = "<!-- DES-ENFORCEMENT : exempt -->\nExecute step 01-01";
        assert!(!DesEnforcementPolicy.check(prompt).enforcement_required);
    }

    #[test]
    fn step_found_after_date() {
        assert_eq!(
            find_step_reference("since 2026-02-09, redo 03-02."),
            Some("03-02".to_string())
        );
    }

    #[test]
    fn longer_shapes_are_ignored() {
        for text in ["123-45", "12-345", "01-01-01", "v1-01-02", "no ids here"] {
            assert_eq!(find_step_reference(text), None, "{text}");
        }
    }
}
