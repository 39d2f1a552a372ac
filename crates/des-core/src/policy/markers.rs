//! DES markers embedded in task prompts.
//!
//! ```text
//! <!-- DES-VALIDATION : required -->
//! <!-- DES-PROJECT-ID : auth -->
//! <!-- DES-STEP-ID : 01-01 -->
//! <!-- DES-ENFORCEMENT : exempt -->
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

static MARKER_RE: OnceLock<Regex> = OnceLock::new();

fn marker_re() -> &'static Regex {
    MARKER_RE.get_or_init(|| Regex::new(r"<!--\s*DES-([A-Z][A-Z-]*)\s*:\s*(.*?)\s*-->").unwrap())
}

// ---------------------------------------------------------------------------
// DesMarkers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesMarkers {
    pub validation: Option<String>,
    pub project_id: Option<String>,
    pub step_id: Option<String>,
    pub enforcement: Option<String>,
}

impl DesMarkers {
    /// Extract markers from prompt text. The first occurrence of each marker
    /// wins; empty values count as absent.
    pub fn parse(prompt: &str) -> Self {
        let mut markers = DesMarkers::default();
        for caps in marker_re().captures_iter(prompt) {
            let value = caps[2].trim();
            if value.is_empty() {
                continue;
            }
            let slot = match &caps[1] {
                "VALIDATION" => &mut markers.validation,
                "PROJECT-ID" => &mut markers.project_id,
                "STEP-ID" => &mut markers.step_id,
                "ENFORCEMENT" => &mut markers.enforcement,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.to_string());
            }
        }
        markers
    }

    pub fn is_exempt(&self) -> bool {
        self.enforcement
            .as_deref()
            .is_some_and(|e| e.eq_ignore_ascii_case("exempt"))
    }

    /// A validation marker is present and the prompt is not exempt.
    pub fn is_des_task(&self) -> bool {
        self.validation.is_some() && !self.is_exempt()
    }
}

// ---------------------------------------------------------------------------
// MarkerCompletenessPolicy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyResult {
    pub is_valid: bool,
    pub missing_fields: Vec<String>,
    pub reason: String,
}

/// DES tasks must say which project and step they belong to. In orchestrator
/// mode the step is chosen later, so only the project is required.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkerCompletenessPolicy;

impl MarkerCompletenessPolicy {
    pub fn check(&self, markers: &DesMarkers, orchestrator_mode: bool) -> PolicyResult {
        if !markers.is_des_task() {
            return PolicyResult {
                is_valid: true,
                missing_fields: Vec::new(),
                reason: "not a DES task".to_string(),
            };
        }

        let mut missing_fields = Vec::new();
        if markers.project_id.is_none() {
            missing_fields.push("DES-PROJECT-ID".to_string());
        }
        if markers.step_id.is_none() && !orchestrator_mode {
            missing_fields.push("DES-STEP-ID".to_string());
        }

        let reason = if missing_fields.is_empty() {
            "all required DES markers present".to_string()
        } else {
            format!("DES task is missing required markers: {}", missing_fields.join(", "))
        };
        PolicyResult {
            is_valid: missing_fields.is_empty(),
            missing_fields,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = "\
<!-- DES-VALIDATION : required -->
<!-- DES-PROJECT-ID : auth -->
<!-- DES-STEP-ID : 01-01 -->
Implement the login form.";

    #[test]
    fn parses_all_markers() {
        let m = DesMarkers::parse(FULL);
        assert_eq!(m.validation.as_deref(), Some("required"));
        assert_eq!(m.project_id.as_deref(), Some("auth"));
        assert_eq!(m.step_id.as_deref(), Some("01-01"));
        assert!(m.is_des_task());
    }

    #[test]
    fn tolerates_spacing_variants() {
        let m = DesMarkers::parse("<!--DES-STEP-ID:02-03-->");
        assert_eq!(m.step_id.as_deref(), Some("02-03"));
        assert!(!m.is_des_task());
    }

    #[test]
    fn exempt_is_not_a_des_task() {
        let m = DesMarkers::parse(
            "<!-- DES-VALIDATION : required -->\n<!-- DES-ENFORCEMENT : exempt -->",
        );
        assert!(m.is_exempt());
        assert!(!m.is_des_task());
    }

    #[test]
    fn non_des_task_is_valid() {
        let result = MarkerCompletenessPolicy.check(&DesMarkers::parse("just do it"), false);
        assert!(result.is_valid);
    }

    #[test]
    fn complete_markers_are_valid() {
        let result = MarkerCompletenessPolicy.check(&DesMarkers::parse(FULL), false);
        assert!(result.is_valid);
        assert!(result.missing_fields.is_empty());
    }

    #[test]
    fn missing_fields_named_in_reason() {
        let m = DesMarkers::parse("<!-- DES-VALIDATION : required -->");
        let result = MarkerCompletenessPolicy.check(&m, false);
        assert!(!result.is_valid);
        assert_eq!(result.missing_fields, vec!["DES-PROJECT-ID", "DES-STEP-ID"]);
        assert!(result.reason.contains("DES-PROJECT-ID"));
        assert!(result.reason.contains("DES-STEP-ID"));
    }

    #[test]
    fn orchestrator_mode_needs_no_step() {
        let m =
            DesMarkers::parse("<!-- DES-VALIDATION : required -->\n<!-- DES-PROJECT-ID : auth -->");
        assert!(MarkerCompletenessPolicy.check(&m, true).is_valid);
        assert!(!MarkerCompletenessPolicy.check(&m, false).is_valid);
    }
}
