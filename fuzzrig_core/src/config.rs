use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::host::DEFAULT_CORE_PATTERN_PATH;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file at {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse TOML from config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// How a pipeline reacts to a failed stage.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// Stop at the first failed stage.
    #[default]
    Strict,
    /// Log the failure and carry on with the next stage.
    BestEffort,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Strict => "strict",
            Mode::BestEffort => "best-effort",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strict" => Ok(Mode::Strict),
            "best-effort" => Ok(Mode::BestEffort),
            other => Err(ConfigError::Invalid(format!(
                "unknown mode '{other}', expected 'strict' or 'best-effort'"
            ))),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CampaignConfig {
    /// Directory holding the toolchain binaries; prepended to `PATH`.
    #[serde(default)]
    pub tool_home: Option<PathBuf>,
    #[serde(default = "default_instrumenting_compiler")]
    pub compiler: String,
    #[serde(default = "default_target_source")]
    pub target_source: PathBuf,
    #[serde(default = "default_binary")]
    pub binary: PathBuf,
    #[serde(default)]
    pub extra_cflags: Vec<String>,
    #[serde(default = "default_input_dir")]
    pub input_dir: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_seed_name")]
    pub seed_name: String,
    #[serde(default = "default_seed")]
    pub seed: String,
    #[serde(default = "default_core_pattern")]
    pub core_pattern: String,
    #[serde(default = "default_core_pattern_path")]
    pub core_pattern_path: PathBuf,
    #[serde(default = "default_engine")]
    pub engine: String,
    #[serde(default)]
    pub engine_args: Vec<String>,
}

fn default_instrumenting_compiler() -> String {
    "../afl-clang-fast".to_string()
}
pub fn default_target_source() -> PathBuf {
    PathBuf::from("main.c")
}
fn default_binary() -> PathBuf {
    PathBuf::from("main")
}
fn default_input_dir() -> PathBuf {
    PathBuf::from("fuzz_in")
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("fuzz_out")
}
fn default_seed_name() -> String {
    "seed".to_string()
}
fn default_seed() -> String {
    "1+1".to_string()
}
fn default_core_pattern() -> String {
    "core".to_string()
}
fn default_core_pattern_path() -> PathBuf {
    PathBuf::from(DEFAULT_CORE_PATTERN_PATH)
}
fn default_engine() -> String {
    "../afl-fuzz".to_string()
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            tool_home: None,
            compiler: default_instrumenting_compiler(),
            target_source: default_target_source(),
            binary: default_binary(),
            extra_cflags: Vec::new(),
            input_dir: default_input_dir(),
            output_dir: default_output_dir(),
            seed_name: default_seed_name(),
            seed: default_seed(),
            core_pattern: default_core_pattern(),
            core_pattern_path: default_core_pattern_path(),
            engine: default_engine(),
            engine_args: Vec::new(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct VisualizeConfig {
    #[serde(default)]
    pub tool_home: Option<PathBuf>,
    #[serde(default = "default_cc")]
    pub cc: String,
    #[serde(default = "default_llvm_config")]
    pub llvm_config: String,
    #[serde(default = "default_opt")]
    pub opt: String,
    #[serde(default = "default_plugin_source")]
    pub plugin_source: PathBuf,
    #[serde(default = "default_plugin")]
    pub plugin: PathBuf,
    #[serde(default = "default_target_source")]
    pub target_source: PathBuf,
    #[serde(default = "default_ir_extension")]
    pub ir_extension: String,
    #[serde(default = "default_cfg_pass")]
    pub cfg_pass: Vec<String>,
    #[serde(default = "default_callgraph_pass")]
    pub callgraph_pass: Vec<String>,
    #[serde(default = "default_graph_extension")]
    pub graph_extension: String,
    #[serde(default = "default_rasterizer")]
    pub rasterizer: String,
    #[serde(default = "default_image_format")]
    pub image_format: String,
    #[serde(default = "default_image_extension")]
    pub image_extension: String,
    #[serde(default = "default_opener")]
    pub opener: String,
}

fn default_cc() -> String {
    "clang".to_string()
}
fn default_llvm_config() -> String {
    "llvm-config".to_string()
}
fn default_opt() -> String {
    "opt".to_string()
}
fn default_plugin_source() -> PathBuf {
    PathBuf::from("afl-llvm-pass.so.cc")
}
fn default_plugin() -> PathBuf {
    PathBuf::from("afl-llvm-pass.so")
}
fn default_ir_extension() -> String {
    "ll".to_string()
}
fn default_cfg_pass() -> Vec<String> {
    vec!["-dot-cfg".to_string()]
}
fn default_callgraph_pass() -> Vec<String> {
    vec!["-dot-callgraph".to_string()]
}
fn default_graph_extension() -> String {
    "dot".to_string()
}
fn default_rasterizer() -> String {
    "dot".to_string()
}
fn default_image_format() -> String {
    "png".to_string()
}
fn default_image_extension() -> String {
    "png".to_string()
}
fn default_opener() -> String {
    if cfg!(target_os = "macos") {
        "open".to_string()
    } else if cfg!(target_os = "windows") {
        "explorer".to_string()
    } else {
        "xdg-open".to_string()
    }
}

impl Default for VisualizeConfig {
    fn default() -> Self {
        Self {
            tool_home: None,
            cc: default_cc(),
            llvm_config: default_llvm_config(),
            opt: default_opt(),
            plugin_source: default_plugin_source(),
            plugin: default_plugin(),
            target_source: default_target_source(),
            ir_extension: default_ir_extension(),
            cfg_pass: default_cfg_pass(),
            callgraph_pass: default_callgraph_pass(),
            graph_extension: default_graph_extension(),
            rasterizer: default_rasterizer(),
            image_format: default_image_format(),
            image_extension: default_image_extension(),
            opener: default_opener(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct FuzzrigConfig {
    #[serde(default)]
    pub mode: Mode,
    /// Directory all relative paths and tool invocations resolve against.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    #[serde(default)]
    pub campaign: CampaignConfig,
    #[serde(default)]
    pub visualize: VisualizeConfig,
}

fn default_work_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for FuzzrigConfig {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            work_dir: default_work_dir(),
            campaign: CampaignConfig::default(),
            visualize: VisualizeConfig::default(),
        }
    }
}

impl FuzzrigConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: FuzzrigConfig =
            toml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.campaign;
        if c.seed.is_empty() {
            return Err(ConfigError::Invalid(
                "campaign.seed must not be empty, the engine needs a non-empty seed".into(),
            ));
        }
        if c.seed_name.is_empty() || c.seed_name.contains(['/', '\\']) {
            return Err(ConfigError::Invalid(format!(
                "campaign.seed-name '{}' must be a plain file name",
                c.seed_name
            )));
        }
        if c.input_dir == c.output_dir {
            return Err(ConfigError::Invalid(
                "campaign.input-dir and campaign.output-dir must differ".into(),
            ));
        }
        let v = &self.visualize;
        for (key, ext) in [
            ("ir-extension", &v.ir_extension),
            ("graph-extension", &v.graph_extension),
            ("image-extension", &v.image_extension),
        ] {
            if ext.is_empty() || ext.starts_with('.') {
                return Err(ConfigError::Invalid(format!(
                    "visualize.{key} '{ext}' must be a non-empty extension without a leading dot"
                )));
            }
        }
        if v.graph_extension == v.image_extension {
            return Err(ConfigError::Invalid(
                "visualize.graph-extension and visualize.image-extension must differ".into(),
            ));
        }
        Ok(())
    }
}
