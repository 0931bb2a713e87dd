use fuzzrig_core::campaign::CampaignLauncher;
use fuzzrig_core::config::{FuzzrigConfig, Mode};
use fuzzrig_core::host::{CorePatternFile, HostPreparer, SkipHostPreparation};
use fuzzrig_core::tool::{ProcessRunner, ToolStatus};
use fuzzrig_core::visualize::{GraphVisualizer, RenderReport};
use fuzzrig_core::workspace::DirLister;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_FILE: &str = "fuzzrig.toml";

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(short, long, value_parser, global = true)]
    config_file: Option<PathBuf>,
    /// Directory the pipeline works in. Defaults to the current directory.
    #[clap(short, long, global = true)]
    work_dir: Option<PathBuf>,
    /// `strict` stops at the first failed stage, `best-effort` keeps going.
    #[clap(long, global = true)]
    mode: Option<Mode>,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the instrumented target and run the fuzzing engine against it
    Fuzz {
        /// Leave the kernel core dump pattern untouched
        #[clap(long)]
        skip_host_prep: bool,
        /// Stop after seeding and host preparation, without starting the engine
        #[clap(long)]
        prepare_only: bool,
    },
    /// Render the target's control-flow and call graphs as images
    Visualize {
        /// Do not open the working directory when done
        #[clap(long)]
        no_open: bool,
        /// Print the render report as JSON on stdout
        #[clap(long)]
        json: bool,
    },
}

/// `fuzzrig.toml` sits next to the target sources, so `--work-dir` moves it too.
fn default_config_path(work_dir: Option<&Path>) -> PathBuf {
    match work_dir {
        Some(dir) => dir.join(DEFAULT_CONFIG_FILE),
        None => PathBuf::from(DEFAULT_CONFIG_FILE),
    }
}

fn load_config(cli: &Cli) -> Result<FuzzrigConfig, anyhow::Error> {
    let mut config = match &cli.config_file {
        Some(config_path) => {
            info!("Loading configuration from specified path: {config_path:?}");
            FuzzrigConfig::load_from_file(config_path)?
        }
        None => {
            let default_config_path = default_config_path(cli.work_dir.as_deref());
            if default_config_path.exists() {
                info!("No config file specified, loading default: {default_config_path:?}");
                FuzzrigConfig::load_from_file(&default_config_path)?
            } else {
                info!("No config file specified and '{DEFAULT_CONFIG_FILE}' not found, using built-in defaults");
                FuzzrigConfig::default()
            }
        }
    };

    if let Some(work_dir) = &cli.work_dir {
        config.work_dir = work_dir.clone();
    }
    if let Some(mode) = cli.mode {
        config.mode = mode;
    }
    config.validate()?;
    Ok(config)
}

fn fuzz<H: HostPreparer>(
    config: FuzzrigConfig,
    host: H,
    prepare_only: bool,
) -> Result<(), anyhow::Error> {
    let mut launcher = CampaignLauncher::new(
        config.campaign,
        config.work_dir,
        config.mode,
        ProcessRunner::new(),
        host,
    );

    let prepared = launcher.prepare().context("preparing fuzzing campaign")?;
    if prepare_only {
        info!(
            input = ?prepared.input_dir,
            output = ?prepared.output_dir,
            "campaign prepared, engine not started"
        );
        return Ok(());
    }

    match launcher.launch(&prepared).context("running fuzzing engine")? {
        ToolStatus::Success => info!("fuzzing campaign finished"),
        ToolStatus::Failed(desc) => warn!("fuzzing engine did not exit cleanly: {desc}"),
    }
    Ok(())
}

fn print_report(report: &RenderReport) {
    for graph in &report.rendered {
        println!("{}", graph.image.display());
    }
    for failure in &report.failed {
        eprintln!("failed: {} ({})", failure.source.display(), failure.reason);
    }
}

fn visualize(config: FuzzrigConfig, no_open: bool, json: bool) -> Result<(), anyhow::Error> {
    let mode = config.mode;
    let mut visualizer = GraphVisualizer::new(
        config.visualize,
        config.work_dir,
        mode,
        ProcessRunner::new(),
        DirLister,
    )
    .open_when_done(!no_open);

    let report = visualizer.run().context("rendering graphs")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    info!(
        rendered = report.rendered.len(),
        failed = report.failed.len(),
        "graph rendering finished"
    );
    if !report.is_complete() && mode == Mode::Strict {
        anyhow::bail!("{} graph(s) failed to render", report.failed.len());
    }
    Ok(())
}

fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    info!(mode = %config.mode, work_dir = ?config.work_dir, "configuration loaded");
    debug!("Effective configuration: {config:#?}");

    match cli.command {
        Command::Fuzz {
            skip_host_prep,
            prepare_only,
        } => {
            if skip_host_prep {
                fuzz(config, SkipHostPreparation, prepare_only)
            } else {
                let host = CorePatternFile::new(config.campaign.core_pattern_path.clone());
                info!(path = ?host.path(), "routing core dumps through kernel parameter file");
                fuzz(config, host, prepare_only)
            }
        }
        Command::Visualize { no_open, json } => visualize(config, no_open, json),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_argument_subcommands_parse() {
        let cli = Cli::try_parse_from(["fuzzrig", "fuzz"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Fuzz {
                skip_host_prep: false,
                prepare_only: false
            }
        ));
        let cli = Cli::try_parse_from(["fuzzrig", "visualize"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Visualize {
                no_open: false,
                json: false
            }
        ));
    }

    #[test]
    fn global_flags_override_config() {
        let cli = Cli::try_parse_from([
            "fuzzrig",
            "visualize",
            "--mode",
            "best-effort",
            "--work-dir",
            "/tmp/target",
            "--no-open",
        ])
        .unwrap();
        let config = load_config(&cli).unwrap();
        assert_eq!(config.mode, Mode::BestEffort);
        assert_eq!(config.work_dir, PathBuf::from("/tmp/target"));
    }

    #[test]
    fn default_config_is_looked_up_in_work_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(config_path, "mode = \"best-effort\"\n").unwrap();
        let work_dir = dir.path().to_str().unwrap();

        let cli = Cli::try_parse_from(["fuzzrig", "fuzz", "--work-dir", work_dir]).unwrap();
        let config = load_config(&cli).unwrap();
        assert_eq!(config.mode, Mode::BestEffort);
        assert_eq!(config.work_dir, dir.path());
    }

    #[test]
    fn unknown_mode_is_rejected() {
        assert!(Cli::try_parse_from(["fuzzrig", "fuzz", "--mode", "lenient"]).is_err());
    }

    #[test]
    fn clap_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
