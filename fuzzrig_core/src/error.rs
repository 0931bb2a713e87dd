use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::host::HostError;
use crate::tool::ToolError;

/// A single step of either pipeline.
///
/// Every error raised by a pipeline names the stage it came from so that the
/// operator can tell a broken compiler apart from a broken rasterizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Environment,
    CompileTarget,
    ResetCorpus,
    WriteSeed,
    PrepareHost,
    LaunchEngine,
    QueryToolchain,
    CompilePlugin,
    EmitIr,
    ExtractCfg,
    ExtractCallGraph,
    Discover,
    Render,
    Open,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Environment => "environment",
            Stage::CompileTarget => "compile-target",
            Stage::ResetCorpus => "reset-corpus",
            Stage::WriteSeed => "write-seed",
            Stage::PrepareHost => "prepare-host",
            Stage::LaunchEngine => "launch-engine",
            Stage::QueryToolchain => "query-toolchain",
            Stage::CompilePlugin => "compile-plugin",
            Stage::EmitIr => "emit-ir",
            Stage::ExtractCfg => "extract-cfg",
            Stage::ExtractCallGraph => "extract-callgraph",
            Stage::Discover => "discover",
            Stage::Render => "render",
            Stage::Open => "open",
        }
    }

    /// Stages whose failure means an expected build artifact is absent.
    pub fn is_build(&self) -> bool {
        matches!(
            self,
            Stage::CompileTarget | Stage::CompilePlugin | Stage::EmitIr
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that abort a pipeline run.
///
/// Render failures of individual graph files are not represented here; they
/// are collected in a [`crate::visualize::RenderReport`] instead.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A compile stage exited unsuccessfully or did not produce its artifact.
    #[error("[{stage}] build failed: {detail}")]
    Build { stage: Stage, detail: String },

    /// An external tool could not be found on the resolved search path.
    #[error("[{stage}] tool `{tool}` not found on the resolved PATH")]
    MissingTool { stage: Stage, tool: String },

    /// A non-build external tool exited unsuccessfully or could not be spawned.
    #[error("[{stage}] `{tool}` failed: {detail}")]
    ToolFailed {
        stage: Stage,
        tool: String,
        detail: String,
    },

    /// A filesystem operation performed by the orchestrator itself failed.
    #[error("[{stage}] I/O error on {path:?}: {source}")]
    Io {
        stage: Stage,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Kernel crash-dump routing could not be configured.
    #[error("[prepare-host] {0}")]
    Host(#[from] HostError),

    /// A precondition of the next stage does not hold.
    #[error("[{stage}] {detail}")]
    Precondition { stage: Stage, detail: String },
}

impl PipelineError {
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Build { stage, .. }
            | PipelineError::MissingTool { stage, .. }
            | PipelineError::ToolFailed { stage, .. }
            | PipelineError::Io { stage, .. }
            | PipelineError::Precondition { stage, .. } => *stage,
            PipelineError::Host(_) => Stage::PrepareHost,
        }
    }

    pub fn io(stage: Stage, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            stage,
            path: path.into(),
            source,
        }
    }

    /// Classifies a runner error raised while spawning a stage's tool.
    pub fn from_tool(stage: Stage, err: ToolError) -> Self {
        match err {
            ToolError::NotFound { program } => PipelineError::MissingTool {
                stage,
                tool: program,
            },
            ToolError::Spawn { program, source } if stage.is_build() => PipelineError::Build {
                stage,
                detail: format!("could not spawn `{program}`: {source}"),
            },
            ToolError::Spawn { program, source } => PipelineError::ToolFailed {
                stage,
                tool: program,
                detail: format!("could not spawn: {source}"),
            },
        }
    }

    /// Classifies an unsuccessful exit of a stage's tool.
    pub fn from_exit(stage: Stage, program: &str, description: &str) -> Self {
        if stage.is_build() {
            PipelineError::Build {
                stage,
                detail: format!("`{program}` {}", description.to_lowercase()),
            }
        } else {
            PipelineError::ToolFailed {
                stage,
                tool: program.to_string(),
                detail: description.to_string(),
            }
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
