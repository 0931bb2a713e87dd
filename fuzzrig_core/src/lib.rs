pub mod campaign;
pub mod config;
pub mod env;
pub mod error;
pub mod host;
pub mod pipeline;
pub mod tool;
pub mod visualize;
pub mod workspace;

pub use campaign::{CampaignLauncher, PreparedCampaign};
pub use config::{CampaignConfig, ConfigError, FuzzrigConfig, Mode, VisualizeConfig};
pub use env::ToolEnvironment;
pub use error::{PipelineError, PipelineResult, Stage};
pub use host::{CorePatternFile, HostError, HostPreparer, SkipHostPreparation};
pub use tool::{
    ProcessRunner, StdoutPolicy, ToolError, ToolInvocation, ToolOutput, ToolRunner, ToolStatus,
};
pub use visualize::{GraphVisualizer, RenderFailure, RenderReport, RenderedGraph};
pub use workspace::{DirLister, FileLister};
