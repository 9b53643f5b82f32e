//! Configuration loading.
//!
//! Settings come from an optional TOML file with `JITLAUNCH_*` environment
//! overrides (nested keys separated by `__`, e.g.
//! `JITLAUNCH_LAUNCH__DEVICE=1`). Every field has a default, so an empty
//! file is a valid configuration.
//!
//! ```toml
//! [compile]
//! std = "c++17"
//! assembler_flags = ["-O3"]
//! arch = "sm_80"
//!
//! [artifacts]
//! dir = "build"
//! persist = true
//!
//! [launch]
//! device = 0
//! grid = { x = 1, y = 1, z = 1 }
//! ```

use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::artifact::KernelSource;
use crate::backend::{DeviceBackend, KernelCompiler};
use crate::error::{JitError, Result};
use crate::launch::LaunchRequest;
use crate::options::CompileOptions;
use crate::pipeline::{JitPipeline, DEFAULT_ASSEMBLY_FILE, DEFAULT_BINARY_FILE};
use crate::resolver::{LayoutRoot, ResourceResolver, ToolkitLocator};
use crate::store::ArtifactStore;
use crate::types::{Architecture, DeviceId, Dim3, ExecutionSpace};

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "JITLAUNCH";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JitConfig {
    /// Compile options.
    #[serde(default)]
    pub compile: CompileConfig,

    /// Artifact persistence.
    #[serde(default)]
    pub artifacts: ArtifactConfig,

    /// Resource layout.
    #[serde(default)]
    pub layout: LayoutConfig,

    /// Launch defaults.
    #[serde(default)]
    pub launch: LaunchConfig,
}

/// Compile options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileConfig {
    /// Language standard for stage 1.
    #[serde(default = "default_std")]
    pub std: Option<String>,

    /// Flags forwarded to the assembler stage, e.g. `-O3`.
    #[serde(default)]
    pub assembler_flags: Vec<String>,

    /// Default execution space for unqualified functions.
    #[serde(default)]
    pub execution_space: Option<ExecutionSpace>,

    /// Compile for this architecture instead of the device's own.
    #[serde(default)]
    pub arch: Option<Architecture>,

    /// Extra include directories, searched before resolved ones.
    #[serde(default)]
    pub include_dirs: Vec<PathBuf>,
}

fn default_std() -> Option<String> {
    Some("c++17".to_string())
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            std: default_std(),
            assembler_flags: Vec::new(),
            execution_space: None,
            arch: None,
            include_dirs: Vec::new(),
        }
    }
}

/// Artifact persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactConfig {
    /// Directory for artifacts; the working directory when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Assembly file name.
    #[serde(default = "default_assembly_file")]
    pub assembly_file: String,

    /// Binary file name.
    #[serde(default = "default_binary_file")]
    pub binary_file: String,

    /// Store and reload each stage's output.
    #[serde(default = "default_persist")]
    pub persist: bool,
}

fn default_assembly_file() -> String {
    DEFAULT_ASSEMBLY_FILE.to_string()
}

fn default_binary_file() -> String {
    DEFAULT_BINARY_FILE.to_string()
}

fn default_persist() -> bool {
    true
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            dir: None,
            assembly_file: default_assembly_file(),
            binary_file: default_binary_file(),
            persist: default_persist(),
        }
    }
}

/// Resource layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayoutConfig {
    /// Root of the in-place layout; derived from the build location when unset.
    #[serde(default)]
    pub project_root: Option<PathBuf>,

    /// Root of the packaged layout; derived from the executable when unset.
    #[serde(default)]
    pub install_root: Option<PathBuf>,

    /// Environment variable naming the toolkit root.
    #[serde(default)]
    pub toolkit_env: Option<String>,

    /// Fixed toolkit root; skips environment and `PATH` discovery.
    #[serde(default)]
    pub toolkit_root: Option<PathBuf>,
}

/// Launch defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchConfig {
    /// Device id.
    #[serde(default)]
    pub device: i64,

    /// Grid geometry.
    #[serde(default = "default_dim")]
    pub grid: Dim3,

    /// Block geometry.
    #[serde(default = "default_dim")]
    pub block: Dim3,

    /// Wait for the kernel to finish.
    #[serde(default = "default_synchronize")]
    pub synchronize: bool,
}

fn default_dim() -> Dim3 {
    Dim3::new(1, 1, 1)
}

fn default_synchronize() -> bool {
    true
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            device: 0,
            grid: default_dim(),
            block: default_dim(),
            synchronize: default_synchronize(),
        }
    }
}

impl JitConfig {
    /// Loads a TOML file plus environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(environment())
            .build()?
            .try_deserialize::<Self>()?;
        config.validate()?;
        Ok(config)
    }

    /// Loads from environment overrides only.
    pub fn from_env() -> Result<Self> {
        let config = Config::builder()
            .add_source(environment())
            .build()?
            .try_deserialize::<Self>()?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` when given, the environment otherwise.
    pub fn load_or_env(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Self::from_env(),
        }
    }

    /// Checks values the type system cannot.
    pub fn validate(&self) -> Result<()> {
        if !self.launch.grid.is_positive() || !self.launch.block.is_positive() {
            return Err(JitError::Config(
                "launch grid and block must be positive in every dimension".to_string(),
            ));
        }
        if self.artifacts.assembly_file.is_empty() || self.artifacts.binary_file.is_empty() {
            return Err(JitError::Config("artifact file names must not be empty".to_string()));
        }
        if self.artifacts.assembly_file == self.artifacts.binary_file {
            return Err(JitError::Config(format!(
                "assembly and binary artifacts share the path '{}'",
                self.artifacts.assembly_file
            )));
        }
        Ok(())
    }

    /// Compile options targeting `arch`.
    #[must_use]
    pub fn compile_options(&self, arch: Architecture) -> CompileOptions {
        let mut builder = CompileOptions::builder(arch)
            .with_assembler_flags(self.compile.assembler_flags.iter().cloned())
            .with_include_dirs(&self.compile.include_dirs);
        if let Some(std) = &self.compile.std {
            builder = builder.with_std(std.clone());
        }
        if let Some(space) = self.compile.execution_space {
            builder = builder.with_default_execution_space(space);
        }
        builder.build()
    }

    /// Resource resolver for the configured layout.
    #[must_use]
    pub fn resolver(&self) -> ResourceResolver {
        let in_place = match &self.layout.project_root {
            Some(root) => LayoutRoot::fixed("in-place", root.clone()),
            None => LayoutRoot::in_place(),
        };
        let packaged = match &self.layout.install_root {
            Some(root) => LayoutRoot::fixed("packaged", root.clone()),
            None => LayoutRoot::packaged(),
        };
        let mut toolkit = match &self.layout.toolkit_env {
            Some(var) => ToolkitLocator::new().with_env_var(var.clone()),
            None => ToolkitLocator::new(),
        };
        if let Some(root) = &self.layout.toolkit_root {
            toolkit = toolkit.with_root(root.clone());
        }
        ResourceResolver::new(vec![in_place, packaged]).with_toolkit(toolkit)
    }

    /// Artifact store for the configured directory.
    #[must_use]
    pub fn store(&self) -> ArtifactStore {
        match &self.artifacts.dir {
            Some(dir) => ArtifactStore::in_dir(dir.clone()),
            None => ArtifactStore::new(),
        }
    }

    /// Launch request for `entry` with the configured geometry.
    #[must_use]
    pub fn launch_request(&self, entry: impl Into<String>) -> LaunchRequest {
        LaunchRequest::new(entry)
            .with_grid(self.launch.grid)
            .with_block(self.launch.block)
    }

    /// Pipeline for `source` with every configured setting applied.
    ///
    /// The options template targets the configured architecture, or the
    /// first device's when none is set.
    pub fn pipeline<C, B>(&self, compiler: C, backend: B, source: KernelSource) -> Result<JitPipeline<C, B>>
    where
        C: KernelCompiler,
        B: DeviceBackend,
    {
        let template_arch = match self.compile.arch {
            Some(arch) => arch,
            None => backend.architecture(DeviceId::new(0))?,
        };
        Ok(JitPipeline::builder(
            compiler,
            backend,
            source,
            self.compile_options(template_arch),
        )
        .with_arch_override(self.compile.arch)
        .with_store(self.store())
        .with_artifact_paths(&self.artifacts.assembly_file, &self.artifacts.binary_file)
        .persist_artifacts(self.artifacts.persist)
        .build())
    }
}

/// `JITLAUNCH_SECTION__KEY` overrides: one underscore after the prefix, two
/// between nested keys.
fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
}

/// Loads configuration from a TOML file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<JitConfig> {
    JitConfig::load(path)
}

/// Loads configuration from a TOML string, without environment overrides.
pub fn load_config_from_str(content: &str) -> Result<JitConfig> {
    let config = Config::builder()
        .add_source(File::from_str(content, FileFormat::Toml))
        .build()?
        .try_deserialize::<JitConfig>()?;
    config.validate()?;
    Ok(config)
}
