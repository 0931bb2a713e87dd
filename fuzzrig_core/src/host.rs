use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

pub const DEFAULT_CORE_PATTERN_PATH: &str = "/proc/sys/kernel/core_pattern";

#[derive(Error, Debug)]
pub enum HostError {
    #[error("could not write core pattern to {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Host-wide configuration the fuzzing engine expects before it starts.
///
/// The setting is global to the machine and outlives the pipeline run.
pub trait HostPreparer {
    fn name(&self) -> &'static str;
    fn configure_core_dumps(&mut self, pattern: &str) -> Result<(), HostError>;
}

/// Writes the core-dump pattern into a kernel parameter file.
#[derive(Debug, Clone)]
pub struct CorePatternFile {
    path: PathBuf,
}

impl CorePatternFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for CorePatternFile {
    fn default() -> Self {
        Self::new(DEFAULT_CORE_PATTERN_PATH)
    }
}

impl HostPreparer for CorePatternFile {
    fn name(&self) -> &'static str {
        "CorePatternFile"
    }

    fn configure_core_dumps(&mut self, pattern: &str) -> Result<(), HostError> {
        if let Ok(current) = fs::read_to_string(&self.path) {
            if current.trim_end() == pattern {
                info!(path = ?self.path, pattern, "core pattern already set");
                return Ok(());
            }
        }
        fs::write(&self.path, format!("{pattern}\n")).map_err(|source| HostError::Write {
            path: self.path.clone(),
            source,
        })?;
        info!(path = ?self.path, pattern, "core pattern configured");
        Ok(())
    }
}

/// Leaves the host untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct SkipHostPreparation;

impl HostPreparer for SkipHostPreparation {
    fn name(&self) -> &'static str {
        "SkipHostPreparation"
    }

    fn configure_core_dumps(&mut self, pattern: &str) -> Result<(), HostError> {
        warn!(
            pattern,
            "host preparation disabled, core dump routing left unchanged"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_pattern_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("core_pattern");
        fs::write(&path, "|/usr/share/apport/apport %p\n").unwrap();

        let mut host = CorePatternFile::new(&path);
        host.configure_core_dumps("core").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "core\n");
    }

    #[test]
    fn already_configured_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("core_pattern");
        fs::write(&path, "core\n").unwrap();

        let mut host = CorePatternFile::new(&path);
        host.configure_core_dumps("core").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "core\n");
    }

    #[test]
    fn unwritable_target_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("core_pattern");
        let mut host = CorePatternFile::new(&path);
        match host.configure_core_dumps("core") {
            Err(HostError::Write { path: p, .. }) => assert_eq!(p, path),
            Ok(()) => panic!("Expected write error"),
        }
    }

    #[test]
    fn default_targets_kernel_parameter() {
        assert_eq!(
            CorePatternFile::default().path(),
            Path::new(DEFAULT_CORE_PATTERN_PATH)
        );
    }

    #[test]
    fn skip_preparation_always_succeeds() {
        let mut host = SkipHostPreparation;
        assert!(host.configure_core_dumps("core").is_ok());
    }
}
