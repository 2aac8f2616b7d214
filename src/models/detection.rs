//! Classification outcome produced by the interaction classifier.

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Independent signal classes; any one of them is sufficient for a match.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// Known module path of the secondary-process ecosystem.
    Import,
    /// Process-spawn call whose arguments mention a shim.
    Execution,
    /// Call into a runtime lifecycle or RPC client API.
    RuntimeApi,
}

impl Display for SignalKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Import => write!(f, "import"),
            Self::Execution => write!(f, "execution"),
            Self::RuntimeApi => write!(f, "runtime-api"),
        }
    }
}

/// Result of one `analyze` call. Created fresh per call and never cached.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    /// Whether cross-boundary debugging is expected to be needed.
    pub matched: bool,
    /// Human-readable evidence entries (`file:line: kind: detail`) in scan order.
    pub evidence_paths: Vec<String>,
    /// Import tokens that matched. Runtime-API hits appear only in evidence.
    pub matched_import_tokens: BTreeSet<String>,
    /// Files that contributed at least one signal.
    pub matched_file_paths: BTreeSet<String>,
    /// Best-effort shim binary paths extracted from execution signals.
    pub shim_binaries: BTreeSet<String>,
}

impl DetectionResult {
    /// A negative result with no evidence.
    #[must_use]
    pub fn negative() -> Self {
        Self::default()
    }

    /// A positive result with empty evidence, used by explicit overrides.
    #[must_use]
    pub fn forced() -> Self {
        Self {
            matched: true,
            ..Self::default()
        }
    }

    /// Record one piece of evidence and flip the result to matched.
    pub fn record(&mut self, file: &str, line: usize, kind: SignalKind, detail: &str) {
        self.matched = true;
        self.evidence_paths
            .push(format!("{file}:{line}: {kind}: {detail}"));
        self.matched_file_paths.insert(file.to_owned());
    }

    /// Fold another file's result into this one, preserving evidence order.
    pub fn merge(&mut self, other: Self) {
        self.matched |= other.matched;
        self.evidence_paths.extend(other.evidence_paths);
        self.matched_import_tokens.extend(other.matched_import_tokens);
        self.matched_file_paths.extend(other.matched_file_paths);
        self.shim_binaries.extend(other.shim_binaries);
    }
}
