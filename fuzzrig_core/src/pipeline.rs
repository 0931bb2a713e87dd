use tracing::{debug, warn};

use crate::config::Mode;
use crate::error::{PipelineError, PipelineResult, Stage};
use crate::tool::{ToolInvocation, ToolOutput, ToolRunner, ToolStatus};

/// Runs one stage's tool and turns anything but a clean exit into an error.
pub fn run_stage<R: ToolRunner + ?Sized>(
    runner: &mut R,
    stage: Stage,
    invocation: &ToolInvocation,
) -> PipelineResult<ToolOutput> {
    debug!(%stage, command = %invocation, "running");
    let output = runner
        .run(invocation)
        .map_err(|e| PipelineError::from_tool(stage, e))?;
    match &output.status {
        ToolStatus::Success => Ok(output),
        ToolStatus::Failed(desc) => Err(PipelineError::from_exit(stage, &invocation.program, desc)),
    }
}

/// Applies the pipeline mode to a stage result.
///
/// `Strict` propagates the error. `BestEffort` logs it and yields `None` so the
/// caller moves on to the next stage.
pub fn settle<T>(mode: Mode, result: PipelineResult<T>) -> PipelineResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if mode == Mode::BestEffort => {
            warn!(stage = %e.stage(), error = %e, "stage failed, continuing");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::ToolError;
    use crate::tool::mock::RecordingRunner;

    #[test]
    fn clean_exit_passes_output_through() {
        let mut runner = RecordingRunner::new(|_| {
            Ok(ToolOutput {
                status: ToolStatus::Success,
                stdout: b"-I/usr/lib/llvm/include".to_vec(),
            })
        });
        let out = run_stage(
            &mut runner,
            Stage::QueryToolchain,
            &ToolInvocation::new("llvm-config").arg("--cxxflags"),
        )
        .unwrap();
        assert_eq!(out.stdout_lossy(), "-I/usr/lib/llvm/include");
    }

    #[test]
    fn failed_exit_becomes_stage_error() {
        let mut runner = RecordingRunner::new(|_| Ok(ToolOutput::failed("Exited with code 1")));
        let err = run_stage(&mut runner, Stage::ExtractCfg, &ToolInvocation::new("opt"))
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ToolFailed {
                stage: Stage::ExtractCfg,
                ..
            }
        ));
    }

    #[test]
    fn spawn_not_found_becomes_missing_tool() {
        let mut runner = RecordingRunner::new(|inv| {
            Err(ToolError::NotFound {
                program: inv.program.clone(),
            })
        });
        let err = run_stage(&mut runner, Stage::CompileTarget, &ToolInvocation::new("cc"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingTool { .. }));
    }

    #[test]
    fn settle_depends_on_mode() {
        let failure = || -> PipelineResult<()> {
            Err(PipelineError::Precondition {
                stage: Stage::Discover,
                detail: "nope".into(),
            })
        };
        assert!(settle(Mode::Strict, failure()).is_err());
        assert_eq!(settle(Mode::BestEffort, failure()).unwrap(), None);
        assert_eq!(settle(Mode::Strict, Ok(5)).unwrap(), Some(5));
    }
}
