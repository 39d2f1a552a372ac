use crate::error::{DesError, Result};
use crate::types::TaskType;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// TurnLimitConfig
// ---------------------------------------------------------------------------

/// Turn ceiling per task type. Always holds a limit for every type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TurnLimitConfig {
    limits: BTreeMap<TaskType, u32>,
}

impl Default for TurnLimitConfig {
    fn default() -> Self {
        let limits = TaskType::all()
            .iter()
            .map(|t| {
                let limit = match t {
                    TaskType::Quick => 20,
                    TaskType::Background => 30,
                    TaskType::Standard => 50,
                    TaskType::Research => 80,
                    TaskType::Complex => 100,
                };
                (*t, limit)
            })
            .collect();
        Self { limits }
    }
}

impl TurnLimitConfig {
    pub fn limit(&self, task_type: TaskType) -> u32 {
        self.limits.get(&task_type).copied().unwrap_or_else(|| self.standard())
    }

    /// Limit for a task type by name. Unrecognized names get the standard
    /// limit.
    pub fn get_limit_for_type(&self, task_type: &str) -> u32 {
        match TaskType::parse(task_type) {
            Some(t) => self.limit(t),
            None => self.standard(),
        }
    }

    fn standard(&self) -> u32 {
        self.limits.get(&TaskType::Standard).copied().unwrap_or(50)
    }
}

// ---------------------------------------------------------------------------
// ConfigLoader
// ---------------------------------------------------------------------------

/// Reads the `turn_limits` section of a configuration document. Missing
/// sections, missing task types and bad values fail with distinct messages.
pub struct ConfigLoader;

impl ConfigLoader {
    pub fn from_document(doc: &Value) -> Result<TurnLimitConfig> {
        let section = doc
            .get("turn_limits")
            .filter(|v| !v.is_null())
            .ok_or_else(|| DesError::Config("missing required section 'turn_limits'".into()))?;
        Self::from_section(section)
    }

    fn from_section(section: &Value) -> Result<TurnLimitConfig> {
        let mut limits = BTreeMap::new();
        for task_type in TaskType::all() {
            let name = task_type.as_str();
            let raw = section.get(name).ok_or_else(|| {
                DesError::Config(format!("missing required task type '{name}' in turn_limits"))
            })?;
            let limit = raw
                .as_u64()
                .filter(|n| *n > 0)
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| {
                    DesError::Config(format!(
                        "invalid turn limit for '{name}': must be a positive integer, got {}",
                        display_value(raw)
                    ))
                })?;
            limits.insert(*task_type, limit);
        }
        Ok(TurnLimitConfig { limits })
    }
}

fn display_value(v: &Value) -> String {
    match v {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{s}'"),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| "?".to_string()),
    }
}

// ---------------------------------------------------------------------------
// TurnPolicy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnCheck {
    pub task_type: String,
    pub limit: u32,
    pub turns_used: u32,
    pub remaining: u32,
    pub exceeded: bool,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct TurnPolicy {
    limits: TurnLimitConfig,
}

impl TurnPolicy {
    pub fn new(limits: TurnLimitConfig) -> Self {
        Self { limits }
    }

    /// Extensions raise the ceiling for the phase they were granted on.
    pub fn check(&self, task_type: &str, turns_used: u32, extension_turns: u32) -> TurnCheck {
        let limit = self
            .limits
            .get_limit_for_type(task_type)
            .saturating_add(extension_turns);
        let exceeded = turns_used > limit;
        let remaining = limit.saturating_sub(turns_used);
        let reason = if exceeded {
            format!("turn limit exceeded: {turns_used} of {limit} turns used ({task_type})")
        } else {
            format!("{turns_used} of {limit} turns used, {remaining} remaining ({task_type})")
        };
        TurnCheck {
            task_type: task_type.to_string(),
            limit,
            turns_used,
            remaining,
            exceeded,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(text: &str) -> Value {
        serde_yaml::from_str(text).unwrap()
    }

    const FULL: &str = concat!(
        "turn_limits:\n",
        "  quick: 10\n",
        "  background: 15\n",
        "  standard: 40\n",
        "  research: 60\n",
        "  complex: 90\n",
    );

    #[test]
    fn loads_all_limits() {
        let cfg = ConfigLoader::from_document(&doc(FULL)).unwrap();
        assert_eq!(cfg.get_limit_for_type("quick"), 10);
        assert_eq!(cfg.get_limit_for_type("Complex"), 90);
    }

    #[test]
    fn unknown_type_falls_back_to_standard() {
        let cfg = ConfigLoader::from_document(&doc(FULL)).unwrap();
        assert_eq!(cfg.get_limit_for_type("unknown"), 40);
        assert_eq!(TurnLimitConfig::default().get_limit_for_type("unknown"), 50);
    }

    #[test]
    fn missing_section() {
        let err = ConfigLoader::from_document(&doc("timeout: {}\n")).unwrap_err();
        assert!(err.to_string().contains("missing required section 'turn_limits'"));
    }

    #[test]
    fn missing_type() {
        let err = ConfigLoader::from_document(&doc("turn_limits:\n  quick: 10\n")).unwrap_err();
        assert!(err
            .to_string()
            .contains("missing required task type 'background' in turn_limits"));
    }

    #[test]
    fn zero_and_negative_rejected() {
        let zero = FULL.replace("quick: 10", "quick: 0");
        let err = ConfigLoader::from_document(&doc(&zero)).unwrap_err();
        assert!(err.to_string().contains("invalid turn limit for 'quick'"));
        assert!(err.to_string().contains("got 0"));

        let negative = FULL.replace("research: 60", "research: -5");
        let err = ConfigLoader::from_document(&doc(&negative)).unwrap_err();
        assert!(err.to_string().contains("invalid turn limit for 'research'"));
        assert!(err.to_string().contains("got -5"));
    }

    #[test]
    fn policy_counts_extensions() {
        let policy = TurnPolicy::default();
        let check = policy.check("quick", 25, 0);
        assert!(check.exceeded);
        assert_eq!(check.remaining, 0);

        let check = policy.check("quick", 25, 10);
        assert!(!check.exceeded);
        assert_eq!(check.limit, 30);
        assert_eq!(check.remaining, 5);
    }
}
