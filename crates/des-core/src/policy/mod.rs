//! Enforcement policies.
//!
//! Every policy is a pure check returning a result value. None of them write
//! to disk or to the audit log; callers decide what to record.

pub mod deliver_integrity;
pub mod enforcement;
pub mod markers;
pub mod scope;
pub mod session_guard;
pub mod stale;
pub mod turn_limit;

pub use deliver_integrity::{DeliverIntegrityResult, DeliverIntegrityVerifier, IntegrityViolation};
pub use enforcement::{DesEnforcementPolicy, EnforcementResult};
pub use markers::{DesMarkers, MarkerCompletenessPolicy, PolicyResult};
pub use scope::{ScopeBoundaryValidator, ScopeCheckResult, ScopeViolation};
pub use session_guard::{GuardDecision, SessionGuardPolicy};
pub use stale::{StaleCheckResult, StaleExecution, StaleExecutionDetector};
pub use turn_limit::{ConfigLoader, TurnCheck, TurnLimitConfig, TurnPolicy};

use crate::error::Result;
use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};

/// Compile path patterns into one matcher. A pattern ending in `/` names a
/// directory and matches everything beneath it. `*` stays within one path
/// component; only `**` crosses directories.
pub(crate) fn build_globset<S: AsRef<str>>(patterns: &[S]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let pattern = pattern.as_ref().trim();
        if pattern.is_empty() {
            continue;
        }
        let pattern = pattern.trim_start_matches("./");
        if pattern.ends_with('/') {
            builder.add(path_glob(&format!("{pattern}**"))?);
        } else {
            builder.add(path_glob(pattern)?);
        }
    }
    Ok(builder.build()?)
}

fn path_glob(pattern: &str) -> Result<Glob> {
    Ok(GlobBuilder::new(pattern).literal_separator(true).build()?)
}
