//! Compiles a target through an analysis plugin and renders its control-flow
//! and call graphs as images.

use serde::Serialize;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::{Mode, VisualizeConfig};
use crate::env::ToolEnvironment;
use crate::error::{PipelineError, PipelineResult, Stage};
use crate::pipeline::{run_stage, settle};
use crate::tool::{StdoutPolicy, ToolInvocation, ToolRunner, ToolStatus};
use crate::workspace::FileLister;

/// Strips the final extension of a file name, keeping any directory prefix.
///
/// `a.b.c` becomes `a.b`; names without an extension and dot files are
/// returned unchanged.
pub fn base_name(name: &str) -> &str {
    let file_start = name.rfind(['/', '\\']).map_or(0, |i| i + 1);
    match name[file_start..].rfind('.') {
        None | Some(0) => name,
        Some(dot) => &name[..file_start + dot],
    }
}

pub fn ir_file_name(source: &str, ir_extension: &str) -> String {
    format!("{}.{}", base_name(source), ir_extension)
}

pub fn image_file_name(graph: &Path, image_extension: &str) -> PathBuf {
    graph.with_extension(image_extension)
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension() == Some(OsStr::new(ext))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedGraph {
    pub source: PathBuf,
    pub image: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderFailure {
    pub source: PathBuf,
    pub image: PathBuf,
    pub reason: String,
}

/// Outcome of the render loop. A failed file keeps its graph description.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RenderReport {
    pub rendered: Vec<RenderedGraph>,
    pub failed: Vec<RenderFailure>,
}

impl RenderReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct GraphVisualizer<R: ToolRunner, L: FileLister> {
    config: VisualizeConfig,
    work_dir: PathBuf,
    mode: Mode,
    runner: R,
    lister: L,
    env: ToolEnvironment,
    open_when_done: bool,
}

impl<R: ToolRunner, L: FileLister> GraphVisualizer<R, L> {
    pub fn new(
        config: VisualizeConfig,
        work_dir: impl Into<PathBuf>,
        mode: Mode,
        runner: R,
        lister: L,
    ) -> Self {
        Self {
            config,
            work_dir: work_dir.into(),
            mode,
            runner,
            lister,
            env: ToolEnvironment::inherited(),
            open_when_done: true,
        }
    }

    pub fn open_when_done(mut self, open: bool) -> Self {
        self.open_when_done = open;
        self
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    fn invocation(&self, program: &str) -> ToolInvocation {
        ToolInvocation::new(program)
            .envs(self.env.vars())
            .working_dir(&self.work_dir)
    }

    pub fn resolve_environment(&mut self) -> PipelineResult<()> {
        info!(
            stage = %Stage::Environment,
            tool_home = ?self.config.tool_home,
            "resolving tool environment"
        );
        let resolved = ToolEnvironment::resolve(self.config.tool_home.as_deref()).map_err(|e| {
            PipelineError::Precondition {
                stage: Stage::Environment,
                detail: e.to_string(),
            }
        });
        if let Some(env) = settle(self.mode, resolved)? {
            self.env = env;
        }
        Ok(())
    }

    fn toolchain_flags(&mut self, query: &str) -> PipelineResult<Vec<String>> {
        let invocation = self
            .invocation(&self.config.llvm_config)
            .arg(query)
            .stdout(StdoutPolicy::Capture);
        let output = run_stage(&mut self.runner, Stage::QueryToolchain, &invocation)?;
        Ok(output
            .stdout_lossy()
            .split_whitespace()
            .map(str::to_string)
            .collect())
    }

    fn expect_artifact(&self, stage: Stage, artifact: &Path) -> PipelineResult<()> {
        let path = self.work_dir.join(artifact);
        if path.is_file() {
            Ok(())
        } else {
            Err(PipelineError::Build {
                stage,
                detail: format!("expected artifact {path:?} was not produced"),
            })
        }
    }

    /// Compiles the plugin, then the target with the plugin loaded, and returns
    /// the IR file path relative to the working directory.
    pub fn build_ir(&mut self) -> PipelineResult<PathBuf> {
        let source = self.config.target_source.display().to_string();
        let ir = PathBuf::from(ir_file_name(&source, &self.config.ir_extension));

        info!(
            stage = %Stage::QueryToolchain,
            tool = %self.config.llvm_config,
            "querying toolchain flags"
        );
        let cxxflags = settle(self.mode, self.toolchain_flags("--cxxflags"))?.unwrap_or_default();
        let ldflags = settle(self.mode, self.toolchain_flags("--ldflags"))?.unwrap_or_default();

        info!(
            stage = %Stage::CompilePlugin,
            plugin = ?self.config.plugin,
            "compiling analysis plugin"
        );
        let plugin = self
            .invocation(&self.config.cc)
            .args(cxxflags)
            .args(["-Wl,-znodelete", "-fno-rtti", "-fPIC", "-shared"])
            .arg(self.config.plugin_source.display().to_string())
            .arg("-o")
            .arg(self.config.plugin.display().to_string())
            .args(ldflags);
        let compiled = run_stage(&mut self.runner, Stage::CompilePlugin, &plugin)
            .and_then(|_| self.expect_artifact(Stage::CompilePlugin, &self.config.plugin));
        settle(self.mode, compiled)?;

        info!(stage = %Stage::EmitIr, ir = ?ir, "compiling target with plugin loaded");
        let emit = self
            .invocation(&self.config.cc)
            .args(["-Xclang", "-load", "-Xclang"])
            .arg(Path::new(".").join(&self.config.plugin).display().to_string())
            .args(["-S", "-emit-llvm"])
            .arg(source)
            .arg("-o")
            .arg(ir.display().to_string());
        let emitted = run_stage(&mut self.runner, Stage::EmitIr, &emit)
            .and_then(|_| self.expect_artifact(Stage::EmitIr, &ir));
        settle(self.mode, emitted)?;

        Ok(ir)
    }

    /// Runs the control-flow and call-graph passes. Both write their graphs
    /// into the working directory; their stdout is discarded.
    pub fn extract_graphs(&mut self, ir: &Path) -> PipelineResult<()> {
        let passes = [
            (Stage::ExtractCfg, self.config.cfg_pass.clone()),
            (Stage::ExtractCallGraph, self.config.callgraph_pass.clone()),
        ];
        for (stage, pass) in passes {
            info!(%stage, pass = ?pass, "extracting graphs");
            let invocation = self
                .invocation(&self.config.opt)
                .args(pass)
                .arg(ir.display().to_string())
                .stdout(StdoutPolicy::Discard);
            settle(self.mode, run_stage(&mut self.runner, stage, &invocation))?;
        }
        Ok(())
    }

    /// Graph description files directly inside the working directory, sorted.
    pub fn discover(&self) -> PipelineResult<Vec<PathBuf>> {
        let mut graphs: Vec<PathBuf> = self
            .lister
            .list(&self.work_dir)
            .map_err(|e| PipelineError::io(Stage::Discover, &self.work_dir, e))?
            .into_iter()
            .filter(|p| has_extension(p, &self.config.graph_extension))
            .collect();
        graphs.sort();
        info!(stage = %Stage::Discover, count = graphs.len(), "discovered graph descriptions");
        Ok(graphs)
    }

    /// Renders each graph, deleting its description only once the image exists.
    /// A failure is recorded and the loop moves on to the next file.
    pub fn render_all(&mut self, graphs: &[PathBuf]) -> RenderReport {
        let mut report = RenderReport::default();
        for graph in graphs {
            let image = image_file_name(graph, &self.config.image_extension);
            match self.render_one(graph, &image) {
                Ok(()) => {
                    info!(stage = %Stage::Render, source = ?graph, image = ?image, "rendered");
                    report.rendered.push(RenderedGraph {
                        source: graph.clone(),
                        image,
                    });
                }
                Err(reason) => {
                    warn!(
                        stage = %Stage::Render,
                        source = ?graph,
                        %reason,
                        "render failed, keeping source"
                    );
                    report.failed.push(RenderFailure {
                        source: graph.clone(),
                        image,
                        reason,
                    });
                }
            }
        }
        report
    }

    /// Path as seen by a tool running inside the working directory.
    fn tool_relative<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.work_dir).unwrap_or(path)
    }

    fn render_one(&mut self, graph: &Path, image: &Path) -> Result<(), String> {
        let invocation = self
            .invocation(&self.config.rasterizer)
            .arg(format!("-T{}", self.config.image_format))
            .arg("-o")
            .arg(self.tool_relative(image).display().to_string())
            .arg(self.tool_relative(graph).display().to_string());
        let output = self.runner.run(&invocation).map_err(|e| e.to_string())?;
        if let ToolStatus::Failed(desc) = output.status {
            return Err(format!("`{}` {}", self.config.rasterizer, desc.to_lowercase()));
        }
        if !image.is_file() {
            return Err(format!("no image produced at {image:?}"));
        }
        fs::remove_file(graph).map_err(|e| format!("image rendered but source not removed: {e}"))
    }

    /// Shows the working directory in the host's file browser. Never fatal.
    pub fn open_output(&mut self) {
        if !self.open_when_done {
            return;
        }
        let invocation = self
            .invocation(&self.config.opener)
            .arg(".")
            .stdout(StdoutPolicy::Discard);
        if let Err(e) = run_stage(&mut self.runner, Stage::Open, &invocation) {
            warn!(error = %e, "could not open output directory");
        }
    }

    pub fn run(&mut self) -> PipelineResult<RenderReport> {
        self.resolve_environment()?;
        let ir = self.build_ir()?;
        self.extract_graphs(&ir)?;
        let graphs = settle(self.mode, self.discover())?.unwrap_or_default();
        let report = self.render_all(&graphs);
        self.open_output();
        Ok(report)
    }
}
