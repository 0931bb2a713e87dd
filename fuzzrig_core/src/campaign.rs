//! Builds an instrumented target and launches a fuzzing campaign against it.
//!
//! Stage order:
//! 1. resolve the tool environment
//! 2. compile the target with the instrumenting compiler
//! 3. reset the input and output corpus directories
//! 4. write the seed
//! 5. route kernel core dumps
//! 6. run the engine in the foreground

use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::{CampaignConfig, Mode};
use crate::env::ToolEnvironment;
use crate::error::{PipelineError, PipelineResult, Stage};
use crate::host::HostPreparer;
use crate::pipeline::{run_stage, settle};
use crate::tool::{StdoutPolicy, ToolInvocation, ToolRunner, ToolStatus};
use crate::workspace::{DirLister, has_nonempty_file, reset_dir, write_seed};

/// Everything the engine launch needs from the setup stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedCampaign {
    pub env: ToolEnvironment,
    pub binary: PathBuf,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    /// `None` when seeding failed in best-effort mode.
    pub seed_path: Option<PathBuf>,
}

pub struct CampaignLauncher<R: ToolRunner, H: HostPreparer> {
    config: CampaignConfig,
    work_dir: PathBuf,
    mode: Mode,
    runner: R,
    host: H,
}

impl<R: ToolRunner, H: HostPreparer> CampaignLauncher<R, H> {
    pub fn new(
        config: CampaignConfig,
        work_dir: impl Into<PathBuf>,
        mode: Mode,
        runner: R,
        host: H,
    ) -> Self {
        Self {
            config,
            work_dir: work_dir.into(),
            mode,
            runner,
            host,
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    fn in_work_dir(&self, path: &Path) -> PathBuf {
        self.work_dir.join(path)
    }

    /// Runs every stage up to, but not including, the engine launch.
    pub fn prepare(&mut self) -> PipelineResult<PreparedCampaign> {
        info!(
            stage = %Stage::Environment,
            tool_home = ?self.config.tool_home,
            "resolving tool environment"
        );
        let env = settle(
            self.mode,
            ToolEnvironment::resolve(self.config.tool_home.as_deref()).map_err(|e| {
                PipelineError::Precondition {
                    stage: Stage::Environment,
                    detail: e.to_string(),
                }
            }),
        )?
        .unwrap_or_default();

        info!(
            stage = %Stage::CompileTarget,
            source = ?self.config.target_source,
            "building instrumented target"
        );
        let compiled = self.compile_target(&env);
        settle(self.mode, compiled)?;

        info!(stage = %Stage::ResetCorpus, "resetting corpus directories");
        let input_dir = self.in_work_dir(&self.config.input_dir);
        let output_dir = self.in_work_dir(&self.config.output_dir);
        for dir in [&input_dir, &output_dir] {
            settle(
                self.mode,
                reset_dir(dir).map_err(|e| PipelineError::io(Stage::ResetCorpus, dir, e)),
            )?;
        }

        info!(stage = %Stage::WriteSeed, seed = %self.config.seed, "seeding input corpus");
        let seed_path = settle(
            self.mode,
            write_seed(&input_dir, &self.config.seed_name, self.config.seed.as_bytes())
                .map_err(|e| PipelineError::io(Stage::WriteSeed, &input_dir, e)),
        )?;

        info!(stage = %Stage::PrepareHost, preparer = self.host.name(), "routing core dumps");
        let host_result = self
            .host
            .configure_core_dumps(&self.config.core_pattern)
            .map_err(PipelineError::from);
        settle(self.mode, host_result)?;

        Ok(PreparedCampaign {
            env,
            binary: self.config.binary.clone(),
            input_dir,
            output_dir,
            seed_path,
        })
    }

    fn compile_target(&mut self, env: &ToolEnvironment) -> PipelineResult<()> {
        let invocation = ToolInvocation::new(&self.config.compiler)
            .args(self.config.extra_cflags.iter().cloned())
            .arg(self.config.target_source.display().to_string())
            .arg("-o")
            .arg(self.config.binary.display().to_string())
            .envs(env.vars())
            .working_dir(&self.work_dir);
        run_stage(&mut self.runner, Stage::CompileTarget, &invocation)?;

        let binary = self.in_work_dir(&self.config.binary);
        if !binary.is_file() {
            return Err(PipelineError::Build {
                stage: Stage::CompileTarget,
                detail: format!("compiler exited cleanly but produced no binary at {binary:?}"),
            });
        }
        Ok(())
    }

    /// Runs the engine in the foreground and blocks until it exits.
    ///
    /// Refuses to start while the input directory holds no non-empty seed,
    /// regardless of mode.
    pub fn launch(&mut self, prepared: &PreparedCampaign) -> PipelineResult<ToolStatus> {
        let seeded = has_nonempty_file(&DirLister, &prepared.input_dir)
            .map_err(|e| PipelineError::io(Stage::LaunchEngine, &prepared.input_dir, e))?;
        if !seeded {
            return Err(PipelineError::Precondition {
                stage: Stage::LaunchEngine,
                detail: format!(
                    "input directory {:?} holds no non-empty seed, refusing to start the engine",
                    prepared.input_dir
                ),
            });
        }

        let invocation = ToolInvocation::new(&self.config.engine)
            .arg("-i")
            .arg(self.config.input_dir.display().to_string())
            .arg("-o")
            .arg(self.config.output_dir.display().to_string())
            .args(self.config.engine_args.iter().cloned())
            .arg(Path::new(".").join(&prepared.binary).display().to_string())
            .envs(prepared.env.vars())
            .working_dir(&self.work_dir)
            .stdout(StdoutPolicy::Inherit);

        info!(
            stage = %Stage::LaunchEngine,
            command = %invocation,
            "launching engine, blocking until it exits"
        );
        match run_stage(&mut self.runner, Stage::LaunchEngine, &invocation) {
            Ok(output) => {
                info!("engine exited");
                Ok(output.status)
            }
            Err(e) if self.mode == Mode::BestEffort => {
                warn!(error = %e, "engine run failed");
                Ok(ToolStatus::Failed(e.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    pub fn run(&mut self) -> PipelineResult<ToolStatus> {
        let prepared = self.prepare()?;
        self.launch(&prepared)
    }
}
