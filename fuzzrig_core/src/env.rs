use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const TOOL_HOME_VAR: &str = "LLVM_HOME";

/// Variables every child process of one pipeline run must see.
///
/// The overlay is applied per invocation instead of being written into the
/// orchestrator's own environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolEnvironment {
    vars: Vec<(OsString, OsString)>,
}

#[derive(Debug, thiserror::Error)]
#[error("tool home {0:?} cannot be placed on PATH")]
pub struct InvalidToolHome(pub PathBuf);

impl ToolEnvironment {
    /// Empty overlay: children inherit the orchestrator's environment as is.
    pub fn inherited() -> Self {
        Self::default()
    }

    /// Exports the tool home and prepends it to the inherited search path.
    pub fn from_tool_home(
        home: &Path,
        inherited_path: Option<&OsStr>,
    ) -> Result<Self, InvalidToolHome> {
        let mut entries = vec![home.to_path_buf()];
        if let Some(path) = inherited_path {
            entries.extend(std::env::split_paths(path));
        }
        let path = std::env::join_paths(entries).map_err(|_| InvalidToolHome(home.into()))?;
        Ok(Self {
            vars: vec![
                (TOOL_HOME_VAR.into(), home.as_os_str().to_os_string()),
                ("PATH".into(), path),
            ],
        })
    }

    /// Builds the overlay from the current process's `PATH`, if a home is set.
    pub fn resolve(home: Option<&Path>) -> Result<Self, InvalidToolHome> {
        let env = match home {
            Some(home) => Self::from_tool_home(home, std::env::var_os("PATH").as_deref())?,
            None => Self::inherited(),
        };
        if env.is_empty() {
            debug!("no tool home set, children inherit the environment");
        } else {
            debug!(path = ?env.get("PATH"), "children get the tool home on PATH");
        }
        Ok(env)
    }

    pub fn vars(&self) -> &[(OsString, OsString)] {
        &self.vars
    }

    pub fn get(&self, key: &str) -> Option<&OsStr> {
        self.vars
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_os_str())
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_home_is_prepended_to_path() {
        let env = ToolEnvironment::from_tool_home(
            Path::new("/opt/llvm/bin"),
            Some(OsStr::new("/usr/local/bin:/usr/bin")),
        )
        .unwrap();
        assert_eq!(env.get("LLVM_HOME"), Some(OsStr::new("/opt/llvm/bin")));
        assert_eq!(
            env.get("PATH"),
            Some(OsStr::new("/opt/llvm/bin:/usr/local/bin:/usr/bin"))
        );
    }

    #[test]
    fn missing_inherited_path_yields_home_only() {
        let env = ToolEnvironment::from_tool_home(Path::new("/opt/llvm/bin"), None).unwrap();
        assert_eq!(env.get("PATH"), Some(OsStr::new("/opt/llvm/bin")));
    }

    #[test]
    fn no_home_means_empty_overlay() {
        let env = ToolEnvironment::resolve(None).unwrap();
        assert!(env.is_empty());
        assert!(env.vars().is_empty());
    }

    #[test]
    fn separator_in_home_is_rejected() {
        let err = ToolEnvironment::from_tool_home(Path::new("/opt/a:b"), None).unwrap_err();
        assert_eq!(err.0, PathBuf::from("/opt/a:b"));
    }
}
