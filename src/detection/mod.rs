//! Interaction classifier.
//!
//! Decides, from source text alone, whether the code under test is expected
//! to spawn or talk to a secondary process that should get its own nested
//! debug session. Three signal classes are OR'd:
//!
//! - import/reference tokens of the container runtime ecosystem,
//! - process-spawn calls whose arguments mention a shim,
//! - calls into runtime lifecycle / RPC client APIs.
//!
//! Files are re-read on every call so edits between runs are always seen.
//! Unreadable files are logged and skipped; an empty candidate set is a
//! negative result.

pub mod scanner;
pub mod signals;

use std::path::{Path, PathBuf};

use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::{DetectionConfig, OrchestratorSettings};
use crate::models::detection::DetectionResult;
use crate::{AppError, Result};

use self::signals::SignalSet;

/// Source classifier configured from [`OrchestratorSettings`] and
/// [`DetectionConfig`].
#[derive(Debug, Clone)]
pub struct InteractionClassifier {
    settings: OrchestratorSettings,
    detection: DetectionConfig,
    pattern: glob::Pattern,
    signals: SignalSet,
}

impl InteractionClassifier {
    /// Build a classifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file glob or a signal pattern is invalid.
    pub fn new(settings: &OrchestratorSettings, detection: &DetectionConfig) -> Result<Self> {
        let pattern = glob::Pattern::new(&detection.test_file_glob).map_err(|err| {
            AppError::Config(format!(
                "invalid test file glob `{}`: {err}",
                detection.test_file_glob
            ))
        })?;

        Ok(Self {
            settings: settings.clone(),
            detection: detection.clone(),
            pattern,
            signals: SignalSet::new(&detection.extra_import_tokens)?,
        })
    }

    /// Classify the sources below `candidate_root`.
    ///
    /// `force_enabled` is the per-request override; when it (or the global
    /// `force_enabled` setting) is `true` scanning is skipped and a positive
    /// result with empty evidence is returned. Otherwise a disabled
    /// `auto_detect` yields a negative result before any file I/O.
    pub async fn analyze(&self, candidate_root: &Path, force_enabled: Option<bool>) -> DetectionResult {
        let span = info_span!("analyze", root = %candidate_root.display());

        async move {
            if force_enabled.or(self.settings.force_enabled).unwrap_or(false) {
                info!("cross-boundary debugging forced; skipping scan");
                return DetectionResult::forced();
            }

            if !self.settings.auto_detect {
                debug!("auto-detection disabled");
                return DetectionResult::negative();
            }

            let candidates = self.candidates(candidate_root).await;
            if candidates.is_empty() {
                debug!("no candidate files");
                return DetectionResult::negative();
            }

            let result = self.scan_candidates(&candidates).await;

            info!(
                matched = result.matched,
                files = candidates.len(),
                evidence = result.evidence_paths.len(),
                "classification complete"
            );
            result
        }
        .instrument(span)
        .await
    }

    /// Read and scan each file in order. A file that cannot be read is
    /// logged and skipped; the remaining files still decide the result.
    pub async fn scan_candidates(&self, candidates: &[PathBuf]) -> DetectionResult {
        let mut result = DetectionResult::negative();
        for path in candidates {
            match read_source(path).await {
                Ok(content) => {
                    let display = path.to_string_lossy();
                    result.merge(self.signals.scan(&display, &content));
                }
                Err(err) => {
                    warn!(%err, path = %path.display(), "skipping unreadable source file");
                }
            }
        }
        result
    }

    /// Enumerate candidates off the async runtime.
    async fn candidates(&self, root: &Path) -> Vec<PathBuf> {
        let root = root.to_path_buf();
        let pattern = self.pattern.clone();
        let detection = self.detection.clone();

        match tokio::task::spawn_blocking(move || {
            scanner::enumerate_candidates(&root, &pattern, &detection)
        })
        .await
        {
            Ok(files) => files,
            Err(err) => {
                warn!(%err, "candidate enumeration task failed");
                Vec::new()
            }
        }
    }
}

/// Read a source file, tolerating non-UTF-8 bytes.
async fn read_source(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path).await.map_err(|err| {
        AppError::Detection(format!("failed to read {}: {err}", path.display()))
    })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
