//! Per-call compile options.

use std::path::{Path, PathBuf};

use crate::types::{Architecture, ExecutionSpace};

/// Options for one compile call.
///
/// Built once with [`CompileOptions::builder`] and never mutated afterwards;
/// stage 2 derives its own reduced copy via [`CompileOptions::for_binary_stage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    arch: Architecture,
    std: Option<String>,
    assembler_flags: Vec<String>,
    default_execution_space: Option<ExecutionSpace>,
    include_dirs: Vec<PathBuf>,
}

impl CompileOptions {
    /// Options targeting `arch` with nothing else set.
    #[must_use]
    pub fn new(arch: Architecture) -> Self {
        Self {
            arch,
            std: None,
            assembler_flags: Vec::new(),
            default_execution_space: None,
            include_dirs: Vec::new(),
        }
    }

    /// Starts a builder targeting `arch`.
    #[must_use]
    pub fn builder(arch: Architecture) -> CompileOptionsBuilder {
        CompileOptionsBuilder {
            options: Self::new(arch),
        }
    }

    /// Target architecture.
    #[must_use]
    pub fn arch(&self) -> Architecture {
        self.arch
    }

    /// Language standard, e.g. `c++17`.
    #[must_use]
    pub fn std(&self) -> Option<&str> {
        self.std.as_deref()
    }

    /// Flags forwarded to the assembler stage.
    #[must_use]
    pub fn assembler_flags(&self) -> &[String] {
        &self.assembler_flags
    }

    /// Default execution space for unqualified functions.
    #[must_use]
    pub fn default_execution_space(&self) -> Option<ExecutionSpace> {
        self.default_execution_space
    }

    /// Include directories in search order.
    #[must_use]
    pub fn include_dirs(&self) -> &[PathBuf] {
        &self.include_dirs
    }

    /// Architecture-only copy for the assembly-to-binary stage.
    ///
    /// Include paths, language standard and execution space have no meaning
    /// once the source is assembly; assembler flags are kept.
    #[must_use]
    pub fn for_binary_stage(&self) -> Self {
        Self {
            arch: self.arch,
            std: None,
            assembler_flags: self.assembler_flags.clone(),
            default_execution_space: None,
            include_dirs: Vec::new(),
        }
    }

    /// Copy targeting another architecture, everything else unchanged.
    #[must_use]
    pub fn retargeted(&self, arch: Architecture) -> Self {
        Self {
            arch,
            ..self.clone()
        }
    }

    /// Copy with `dirs` appended after the existing include directories.
    #[must_use]
    pub fn with_extra_include_dirs(&self, dirs: &[PathBuf]) -> Self {
        let mut options = self.clone();
        options.include_dirs.extend(dirs.iter().cloned());
        options
    }

    /// Renders the source-stage options as NVRTC-style command-line flags.
    #[must_use]
    pub fn to_source_flags(&self) -> Vec<String> {
        let mut flags = vec![format!("--gpu-architecture={}", self.arch)];
        if let Some(std) = &self.std {
            flags.push(format!("--std={}", std));
        }
        if self.default_execution_space == Some(ExecutionSpace::Device) {
            flags.push("--device-as-default-execution-space".to_string());
        }
        for dir in &self.include_dirs {
            flags.push(format!("--include-path={}", dir.display()));
        }
        flags
    }

    /// Renders the binary-stage options as assembler command-line flags.
    #[must_use]
    pub fn to_assembler_flags(&self) -> Vec<String> {
        let mut flags = vec![format!("-arch={}", self.arch)];
        flags.extend(self.assembler_flags.iter().cloned());
        flags
    }
}

/// Builder for [`CompileOptions`].
#[derive(Debug, Clone)]
pub struct CompileOptionsBuilder {
    options: CompileOptions,
}

impl CompileOptionsBuilder {
    /// Sets the language standard.
    #[must_use]
    pub fn with_std(mut self, std: impl Into<String>) -> Self {
        self.options.std = Some(std.into());
        self
    }

    /// Adds one assembler-stage flag, e.g. `-O3`.
    #[must_use]
    pub fn with_assembler_flag(mut self, flag: impl Into<String>) -> Self {
        self.options.assembler_flags.push(flag.into());
        self
    }

    /// Adds several assembler-stage flags.
    #[must_use]
    pub fn with_assembler_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options
            .assembler_flags
            .extend(flags.into_iter().map(Into::into));
        self
    }

    /// Sets the default execution space.
    #[must_use]
    pub fn with_default_execution_space(mut self, space: ExecutionSpace) -> Self {
        self.options.default_execution_space = Some(space);
        self
    }

    /// Appends an include directory; order is preserved.
    #[must_use]
    pub fn with_include_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.options.include_dirs.push(dir.as_ref().to_path_buf());
        self
    }

    /// Appends several include directories.
    #[must_use]
    pub fn with_include_dirs<I, P>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        self.options
            .include_dirs
            .extend(dirs.into_iter().map(|d| d.as_ref().to_path_buf()));
        self
    }

    /// Builds the options.
    #[must_use]
    pub fn build(self) -> CompileOptions {
        self.options
    }
}
