//! Two-stage compilation: source to assembly, assembly to binary.
//!
//! The assembly is portable across concrete architectures of a family and
//! worth keeping on its own: it can be persisted, inspected and re-assembled
//! for another target without going back to source.

use crate::artifact::{CompiledArtifact, KernelSource};
use crate::backend::{CompileRequest, KernelCompiler};
use crate::error::{JitError, Result};
use crate::options::CompileOptions;
use crate::types::{Dialect, Stage};

/// Drives a [`KernelCompiler`] through the two stages.
#[derive(Debug, Clone)]
pub struct TwoStageCompiler<C> {
    inner: C,
}

impl<C: KernelCompiler> TwoStageCompiler<C> {
    /// Wraps a compile primitive.
    pub fn new(inner: C) -> Self {
        Self { inner }
    }

    /// The wrapped primitive.
    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Stage 1: kernel source to assembly for `options.arch()`.
    ///
    /// The source's own include directories are appended after those in
    /// `options`.
    pub fn compile_to_assembly(
        &self,
        source: &KernelSource,
        options: &CompileOptions,
    ) -> Result<CompiledArtifact> {
        if source.dialect() == Dialect::Ptx {
            // Already assembly: nothing to compile.
            return Ok(CompiledArtifact::new(
                Stage::Assembly,
                options.arch(),
                source.code().as_bytes().to_vec(),
            ));
        }

        let merged;
        let options = if source.include_dirs().is_empty() {
            options
        } else {
            merged = options.with_extra_include_dirs(source.include_dirs());
            &merged
        };

        self.run(CompileRequest {
            name: source.name(),
            code: source.code(),
            dialect: source.dialect(),
            target: Stage::Assembly,
            options,
        })
    }

    /// Stage 2: assembly to device binary, using architecture-only options.
    pub fn compile_to_binary(
        &self,
        assembly: &CompiledArtifact,
        options: &CompileOptions,
    ) -> Result<CompiledArtifact> {
        if assembly.stage() != Stage::Assembly {
            return Err(JitError::Compilation {
                stage: Stage::Binary,
                diagnostics: format!("expected an assembly artifact, got {}", assembly.stage()),
            });
        }
        let text = assembly.as_text()?;
        let options = options.for_binary_stage();

        self.run(CompileRequest {
            name: "assembly.ptx",
            code: text,
            dialect: Dialect::Ptx,
            target: Stage::Binary,
            options: &options,
        })
    }

    fn run(&self, request: CompileRequest<'_>) -> Result<CompiledArtifact> {
        let target = request.target;
        let name = request.name;
        let arch = request.options.arch();
        let output = self.inner.compile(request)?;

        if !output.log.trim().is_empty() {
            tracing::debug!(program = name, stage = %target, "Compiler log:\n{}", output.log);
        }
        if output.bytes.is_empty() {
            return Err(JitError::Compilation {
                stage: target,
                diagnostics: if output.log.is_empty() {
                    "compiler produced no output".to_string()
                } else {
                    output.log
                },
            });
        }

        tracing::debug!(
            program = name,
            stage = %target,
            arch = %arch,
            size = output.bytes.len(),
            "Compiled"
        );
        Ok(CompiledArtifact::new(target, arch, output.bytes))
    }
}
