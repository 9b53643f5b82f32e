//! PTX to cubin via the toolkit's `ptxas`.
//!
//! The assembly is written to a scratch directory, assembled there and the
//! cubin read back; the directory is removed when the call returns.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use jitlaunch_core::{CompileOptions, JitError, Result, ToolkitLocator};

use crate::error::CudaError;

/// Assembler executable name.
pub const PTXAS: &str = "ptxas";

/// Runs `ptxas` on PTX text.
#[derive(Debug, Clone)]
pub struct PtxAssembler {
    tool: PathBuf,
}

impl PtxAssembler {
    /// Uses `ptxas` from the located toolkit, or from `PATH`.
    #[must_use]
    pub fn locate(toolkit: &ToolkitLocator) -> Self {
        Self::with_tool(toolkit.tool(PTXAS))
    }

    /// Uses a specific executable.
    #[must_use]
    pub fn with_tool(tool: impl Into<PathBuf>) -> Self {
        Self { tool: tool.into() }
    }

    /// Executable that will be run.
    #[must_use]
    pub fn tool(&self) -> &Path {
        &self.tool
    }

    /// Command-line arguments for assembling `input` into `output`.
    #[must_use]
    pub fn arguments(options: &CompileOptions, input: &Path, output: &Path) -> Vec<String> {
        let mut args = options.to_assembler_flags();
        args.push(input.display().to_string());
        args.push("-o".to_string());
        args.push(output.display().to_string());
        args
    }

    /// Assembles `ptx` for `options.arch()`. Returns the cubin and the
    /// assembler's output.
    pub fn assemble(&self, ptx: &str, options: &CompileOptions) -> Result<(Vec<u8>, String)> {
        let scratch = tempfile::Builder::new()
            .prefix("jitlaunch-ptxas")
            .tempdir()
            .map_err(|e| JitError::io(std::env::temp_dir(), e))?;
        let input = scratch.path().join("kernel.ptx");
        let output = scratch.path().join("kernel.cubin");
        fs::write(&input, ptx).map_err(|e| JitError::io(&input, e))?;

        let args = Self::arguments(options, &input, &output);
        tracing::debug!(tool = %self.tool.display(), args = ?args, "Running assembler");

        let out = Command::new(&self.tool)
            .args(&args)
            .output()
            .map_err(|source| CudaError::AssemblerUnavailable {
                tool: self.tool.display().to_string(),
                source,
            })?;

        let mut log = String::from_utf8_lossy(&out.stderr).into_owned();
        log.push_str(&String::from_utf8_lossy(&out.stdout));

        if !out.status.success() {
            return Err(CudaError::Assembler {
                status: out.status.to_string(),
                log,
            }
            .into());
        }

        let cubin = fs::read(&output).map_err(|e| JitError::io(&output, e))?;
        Ok((cubin, log))
    }
}
