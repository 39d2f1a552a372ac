//! TDD cycle schema: the canonical phase list and skip vocabulary.
//!
//! A schema is loaded from a YAML template once and cached. Three template
//! versions ship with the crate:
//!   3.0: 5 phases (canonical)
//!   2.0: 7 phases
//!   1.0: 14 phases
//!
//! The older two stay loadable so step files written under them still
//! validate.

use crate::error::{DesError, Result};
use crate::types::PhaseStatus;
use serde::Serialize;
use serde_yaml::{Mapping, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

pub const CURRENT_SCHEMA_VERSION: &str = "3.0";

/// Environment variable naming a template that replaces the built-in one for
/// the process-wide loader.
pub const SCHEMA_PATH_ENV: &str = "DES_TDD_SCHEMA";

const TEMPLATE_V3: &str = include_str!("../templates/tdd-cycle-schema-v3.yaml");
const TEMPLATE_V2: &str = include_str!("../templates/tdd-cycle-schema-v2.yaml");
const TEMPLATE_V1: &str = include_str!("../templates/tdd-cycle-schema-v1.yaml");

// ---------------------------------------------------------------------------
// TddSchema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TddSchema {
    schema_version: String,
    phases: Vec<String>,
    valid_statuses: Vec<PhaseStatus>,
    valid_skip_prefixes: Vec<String>,
    blocking_skip_prefixes: Vec<String>,
    terminal_phases: Vec<String>,
}

impl TddSchema {
    /// Parse a template document. Every key except `terminal_phases` is
    /// required; `terminal_phases` defaults to the last phase.
    pub fn from_template(text: &str) -> Result<Self> {
        let doc: Value = serde_yaml::from_str(text)
            .map_err(|e| DesError::SchemaLoad(format!("malformed template: {e}")))?;
        let map = doc
            .as_mapping()
            .ok_or_else(|| DesError::SchemaLoad("template must be a mapping".to_string()))?;

        let schema_version = scalar_key(map, "schema_version")?;
        let phases = list_key(map, "tdd_phases")?;
        let status_names = list_key(map, "valid_statuses")?;
        let valid_skip_prefixes = list_key(map, "valid_skip_prefixes")?;
        let blocking_skip_prefixes = list_key(map, "blocking_skip_prefixes")?;
        let terminal_phases = match map.get("terminal_phases") {
            Some(Value::Null) | None => phases.last().cloned().into_iter().collect(),
            Some(_) => list_key(map, "terminal_phases")?,
        };

        if phases.is_empty() {
            return Err(DesError::SchemaLoad("tdd_phases must not be empty".to_string()));
        }
        let mut seen = HashSet::new();
        for phase in &phases {
            if !seen.insert(phase.as_str()) {
                return Err(DesError::SchemaLoad(format!("duplicate phase '{phase}'")));
            }
        }
        for terminal in &terminal_phases {
            if !seen.contains(terminal.as_str()) {
                return Err(DesError::SchemaLoad(format!(
                    "terminal phase '{terminal}' is not in tdd_phases"
                )));
            }
        }
        let valid_statuses = status_names
            .iter()
            .map(|s| {
                s.parse::<PhaseStatus>()
                    .map_err(|_| DesError::SchemaLoad(format!("unknown status '{s}'")))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            schema_version,
            phases,
            valid_statuses,
            valid_skip_prefixes,
            blocking_skip_prefixes,
            terminal_phases,
        })
    }

    /// One of the templates bundled with the crate.
    pub fn builtin(version: &str) -> Result<Self> {
        let text = match version {
            "3.0" => TEMPLATE_V3,
            "2.0" => TEMPLATE_V2,
            "1.0" => TEMPLATE_V1,
            other => {
                return Err(DesError::SchemaLoad(format!(
                    "no built-in template for schema version '{other}'"
                )))
            }
        };
        Self::from_template(text)
    }

    pub fn current() -> Result<Self> {
        Self::builtin(CURRENT_SCHEMA_VERSION)
    }

    /// Pick the bundled variant whose phase count matches a legacy step file.
    pub fn for_phase_count(count: usize) -> Option<Self> {
        ["3.0", "2.0", "1.0"]
            .iter()
            .filter_map(|v| Self::builtin(v).ok())
            .find(|s| s.phases.len() == count)
    }

    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    pub fn phases(&self) -> &[String] {
        &self.phases
    }

    pub fn valid_statuses(&self) -> &[PhaseStatus] {
        &self.valid_statuses
    }

    pub fn valid_skip_prefixes(&self) -> &[String] {
        &self.valid_skip_prefixes
    }

    pub fn blocking_skip_prefixes(&self) -> &[String] {
        &self.blocking_skip_prefixes
    }

    pub fn terminal_phases(&self) -> &[String] {
        &self.terminal_phases
    }

    pub fn phase_index(&self, phase: &str) -> Option<usize> {
        self.phases.iter().position(|p| p == phase)
    }

    pub fn contains_phase(&self, phase: &str) -> bool {
        self.phase_index(phase).is_some()
    }

    pub fn is_terminal(&self, phase: &str) -> bool {
        self.terminal_phases.iter().any(|p| p == phase)
    }

    /// The outcome carries a skip prefix that permits progression.
    pub fn is_valid_skip(&self, outcome: &str) -> bool {
        let outcome = outcome.trim_start();
        self.valid_skip_prefixes
            .iter()
            .any(|p| outcome.starts_with(p.as_str()))
    }

    /// The outcome carries a skip prefix that forbids progression.
    pub fn is_blocking_skip(&self, outcome: &str) -> bool {
        let outcome = outcome.trim_start();
        self.blocking_skip_prefixes
            .iter()
            .any(|p| outcome.starts_with(p.as_str()))
    }
}

fn scalar_key(map: &Mapping, key: &str) -> Result<String> {
    match map.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(_) => Err(DesError::SchemaLoad(format!("key '{key}' must be a scalar"))),
        None => Err(DesError::SchemaLoad(format!("missing required key '{key}'"))),
    }
}

fn list_key(map: &Mapping, key: &str) -> Result<Vec<String>> {
    let seq = match map.get(key) {
        Some(Value::Sequence(seq)) => seq,
        Some(_) => return Err(DesError::SchemaLoad(format!("key '{key}' must be a list"))),
        None => return Err(DesError::SchemaLoad(format!("missing required key '{key}'"))),
    };
    seq.iter()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| DesError::SchemaLoad(format!("'{key}' entries must be strings")))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// SchemaLoader
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaSource {
    Builtin(String),
    File(PathBuf),
}

/// Loads a schema once and hands out the cached instance until
/// `clear_cache` is called.
#[derive(Debug)]
pub struct SchemaLoader {
    source: SchemaSource,
    cache: Mutex<Option<Arc<TddSchema>>>,
}

impl SchemaLoader {
    pub fn new(source: SchemaSource) -> Self {
        Self {
            source,
            cache: Mutex::new(None),
        }
    }

    pub fn builtin() -> Self {
        Self::new(SchemaSource::Builtin(CURRENT_SCHEMA_VERSION.to_string()))
    }

    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self::new(SchemaSource::File(path.into()))
    }

    pub fn source(&self) -> &SchemaSource {
        &self.source
    }

    pub fn load(&self) -> Result<Arc<TddSchema>> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(schema) = cache.as_ref() {
            return Ok(Arc::clone(schema));
        }
        let schema = Arc::new(read_source(&self.source)?);
        *cache = Some(Arc::clone(&schema));
        Ok(schema)
    }

    pub fn clear_cache(&self) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        *cache = None;
    }
}

fn read_source(source: &SchemaSource) -> Result<TddSchema> {
    match source {
        SchemaSource::Builtin(version) => TddSchema::builtin(version),
        SchemaSource::File(path) => read_template_file(path),
    }
}

fn read_template_file(path: &Path) -> Result<TddSchema> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        DesError::SchemaLoad(format!("cannot read template {}: {e}", path.display()))
    })?;
    TddSchema::from_template(&text)
}

// ---------------------------------------------------------------------------
// Process-wide accessor
// ---------------------------------------------------------------------------

static GLOBAL_LOADER: OnceLock<SchemaLoader> = OnceLock::new();

fn global_loader() -> &'static SchemaLoader {
    GLOBAL_LOADER.get_or_init(|| match std::env::var_os(SCHEMA_PATH_ENV) {
        Some(path) if !path.is_empty() => SchemaLoader::from_path(PathBuf::from(path)),
        _ => SchemaLoader::builtin(),
    })
}

/// Shared schema for call sites that do not carry a loader of their own.
pub fn get_tdd_schema() -> Result<Arc<TddSchema>> {
    global_loader().load()
}

pub fn clear_tdd_schema_cache() {
    global_loader().clear_cache();
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn current_schema_has_five_phases() {
        let schema = TddSchema::current().unwrap();
        assert_eq!(schema.schema_version(), "3.0");
        assert_eq!(
            schema.phases(),
            &["PREPARE", "RED_ACCEPTANCE", "RED_UNIT", "GREEN", "COMMIT"]
        );
        assert_eq!(schema.terminal_phases(), &["COMMIT"]);
        assert_eq!(schema.valid_statuses().len(), 4);
    }

    #[test]
    fn legacy_templates_remain_parseable() {
        assert_eq!(TddSchema::builtin("2.0").unwrap().phases().len(), 7);
        let v1 = TddSchema::builtin("1.0").unwrap();
        assert_eq!(v1.phases().len(), 14);
        assert_eq!(v1.phases().last().map(String::as_str), Some("COMMIT"));
    }

    #[test]
    fn for_phase_count_selects_variant() {
        assert_eq!(
            TddSchema::for_phase_count(14).unwrap().schema_version(),
            "1.0"
        );
        assert_eq!(TddSchema::for_phase_count(7).unwrap().schema_version(), "2.0");
        assert!(TddSchema::for_phase_count(9).is_none());
    }

    #[test]
    fn skip_prefix_classification() {
        let schema = TddSchema::current().unwrap();
        assert!(schema.is_valid_skip("NOT_APPLICABLE: no acceptance test for refactor"));
        assert!(schema.is_valid_skip("CHECKPOINT_PENDING: awaiting review"));
        assert!(!schema.is_valid_skip("DEFERRED: later"));
        assert!(schema.is_blocking_skip("DEFERRED: later"));
        assert!(!schema.is_valid_skip("SKIP"));
    }

    #[test]
    fn missing_key_is_named() {
        let text = "schema_version: '3.0'\ntdd_phases: [A]\nvalid_statuses: [EXECUTED]\nvalid_skip_prefixes: []\n";
        let err = TddSchema::from_template(text).unwrap_err();
        assert!(err.to_string().contains("blocking_skip_prefixes"), "{err}");
    }

    #[test]
    fn duplicate_phase_rejected() {
        let text = "schema_version: '9'\ntdd_phases: [A, B, A]\nvalid_statuses: [EXECUTED]\nvalid_skip_prefixes: []\nblocking_skip_prefixes: []\n";
        let err = TddSchema::from_template(text).unwrap_err();
        assert!(err.to_string().contains("duplicate phase 'A'"));
    }

    #[test]
    fn terminal_defaults_to_last_phase() {
        let text = "schema_version: 4\ntdd_phases: [A, B]\nvalid_statuses: [EXECUTED]\nvalid_skip_prefixes: []\nblocking_skip_prefixes: []\n";
        let schema = TddSchema::from_template(text).unwrap();
        assert_eq!(schema.terminal_phases(), &["B"]);
        assert_eq!(schema.schema_version(), "4");
    }

    #[test]
    fn loader_missing_file_is_schema_error() {
        let dir = TempDir::new().unwrap();
        let loader = SchemaLoader::from_path(dir.path().join("missing.yaml"));
        assert!(matches!(loader.load(), Err(DesError::SchemaLoad(_))));
    }

    #[test]
    fn loader_caches_until_cleared() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("schema.yaml");
        std::fs::write(&path, TEMPLATE_V3).unwrap();
        let loader = SchemaLoader::from_path(&path);

        let first = loader.load().unwrap();
        let second = loader.load().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        loader.clear_cache();
        let third = loader.load().unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(*first, *third);
    }

    #[test]
    fn cache_survives_template_deletion() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("schema.yaml");
        std::fs::write(&path, TEMPLATE_V3).unwrap();
        let loader = SchemaLoader::from_path(&path);
        loader.load().unwrap();
        std::fs::remove_file(&path).unwrap();
        assert!(loader.load().is_ok());
        loader.clear_cache();
        assert!(loader.load().is_err());
    }

    #[test]
    fn global_accessor_caches_and_resets() {
        let first = get_tdd_schema().unwrap();
        let second = get_tdd_schema().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        clear_tdd_schema_cache();
        let third = get_tdd_schema().unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(*first, *third);
    }
}
