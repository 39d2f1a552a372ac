//! DES configuration, `.nwave/des-config.yaml`.
//!
//! The file is optional. When present, `turn_limits` is required and every
//! other section falls back to its defaults.

use crate::error::{DesError, Result};
use crate::paths;
use crate::policy::session_guard::{default_artifact_patterns, default_source_patterns};
use crate::policy::stale::DEFAULT_STALE_THRESHOLD_MINUTES;
use crate::policy::turn_limit::{ConfigLoader, TurnLimitConfig};
use crate::policy::{ScopeBoundaryValidator, SessionGuardPolicy};
use crate::schema::{self, SchemaLoader, TddSchema};
use crate::timeout::{self, DEFAULT_PHASE_BUDGET_MINUTES, DEFAULT_WARNING_THRESHOLDS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_budget")]
    pub phase_budget_minutes: u32,
    #[serde(default = "default_thresholds")]
    pub warning_thresholds_minutes: Vec<u32>,
}

fn default_budget() -> u32 {
    DEFAULT_PHASE_BUDGET_MINUTES
}

fn default_thresholds() -> Vec<u32> {
    DEFAULT_WARNING_THRESHOLDS.to_vec()
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            phase_budget_minutes: default_budget(),
            warning_thresholds_minutes: default_thresholds(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaleConfig {
    #[serde(default = "default_stale_threshold")]
    pub threshold_minutes: u32,
}

fn default_stale_threshold() -> u32 {
    DEFAULT_STALE_THRESHOLD_MINUTES
}

impl Default for StaleConfig {
    fn default() -> Self {
        Self {
            threshold_minutes: default_stale_threshold(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_audit_dir")]
    pub dir: PathBuf,
}

fn default_true() -> bool {
    true
}

fn default_audit_dir() -> PathBuf {
    PathBuf::from(paths::DEFAULT_AUDIT_DIR)
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_audit_dir(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionGuardConfig {
    #[serde(default = "default_source_patterns")]
    pub source_patterns: Vec<String>,
    #[serde(default = "default_artifact_patterns")]
    pub artifact_patterns: Vec<String>,
}

impl Default for SessionGuardConfig {
    fn default() -> Self {
        Self {
            source_patterns: default_source_patterns(),
            artifact_patterns: default_artifact_patterns(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeConfig {
    #[serde(default = "default_always_allowed")]
    pub always_allowed: Vec<String>,
}

fn default_always_allowed() -> Vec<String> {
    vec!["docs/feature/**".to_string(), ".nwave/**".to_string()]
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            always_allowed: default_always_allowed(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// Template overriding the built-in schema, relative to the project root.
    #[serde(default)]
    pub template: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// DesConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DesConfig {
    pub turn_limits: TurnLimitConfig,
    #[serde(default)]
    pub timeout: TimeoutConfig,
    #[serde(default)]
    pub stale: StaleConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub session_guard: SessionGuardConfig,
    #[serde(default)]
    pub scope: ScopeConfig,
    #[serde(default)]
    pub schema: SchemaConfig,
}

/// Every section but `turn_limits`, which goes through `ConfigLoader` for
/// its error messages.
#[derive(Deserialize)]
struct OptionalSections {
    #[serde(default)]
    timeout: TimeoutConfig,
    #[serde(default)]
    stale: StaleConfig,
    #[serde(default)]
    audit: AuditConfig,
    #[serde(default)]
    session_guard: SessionGuardConfig,
    #[serde(default)]
    scope: ScopeConfig,
    #[serde(default)]
    schema: SchemaConfig,
}

impl DesConfig {
    /// Load from `root`, or defaults when the project has no config file.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        Self::from_yaml(&data)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let doc: serde_yaml::Value = serde_yaml::from_str(text)?;
        let turn_limits = ConfigLoader::from_document(&doc)?;
        let rest: OptionalSections = serde_yaml::from_value(doc)?;
        let config = Self {
            turn_limits,
            timeout: rest.timeout,
            stale: rest.stale,
            audit: rest.audit,
            session_guard: rest.session_guard,
            scope: rest.scope,
            schema: rest.schema,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&paths::config_path(root), data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Result<()> {
        timeout::validate_thresholds(
            &self.timeout.warning_thresholds_minutes,
            self.timeout.phase_budget_minutes,
        )?;
        if self.stale.threshold_minutes == 0 {
            return Err(DesError::Config(
                "stale.threshold_minutes must be a positive integer".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Derived components
    // -----------------------------------------------------------------------

    /// The configured template when set, otherwise the process-wide schema.
    pub fn load_schema(&self, root: &Path) -> Result<Arc<TddSchema>> {
        match &self.schema.template {
            Some(template) => SchemaLoader::from_path(root.join(template)).load(),
            None => schema::get_tdd_schema(),
        }
    }

    pub fn session_guard(&self) -> Result<SessionGuardPolicy> {
        SessionGuardPolicy::new(
            &self.session_guard.source_patterns,
            &self.session_guard.artifact_patterns,
        )
    }

    pub fn scope_validator(&self, declared: &[String]) -> Result<ScopeBoundaryValidator> {
        ScopeBoundaryValidator::new(declared, &self.scope.always_allowed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
