//! Compiled artifacts and kernel sources.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{JitError, Result};
use crate::resolver::{ResourceCategory, ResourceResolver};
use crate::types::{Architecture, Dialect, Stage};

/// Minimal kernel used by the `run` flow and the end-to-end tests.
pub const HELLO_KERNEL: &str = r#"
extern "C"
__global__
void
hello() {
    printf("hello from device\n");
}
"#;

/// Entry point of [`HELLO_KERNEL`].
pub const HELLO_ENTRY: &str = "hello";

/// Kernel source text with its dialect, entry point and include directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSource {
    name: String,
    code: String,
    dialect: Dialect,
    entry_point: String,
    include_dirs: Vec<PathBuf>,
}

impl KernelSource {
    /// Creates a CUDA C++ source.
    pub fn cuda(name: impl Into<String>, code: impl Into<String>, entry_point: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: code.into(),
            dialect: Dialect::Cuda,
            entry_point: entry_point.into(),
            include_dirs: Vec::new(),
        }
    }

    /// Creates a PTX source.
    pub fn ptx(name: impl Into<String>, code: impl Into<String>, entry_point: impl Into<String>) -> Self {
        Self {
            dialect: Dialect::Ptx,
            ..Self::cuda(name, code, entry_point)
        }
    }

    /// The built-in `hello` kernel.
    #[must_use]
    pub fn hello() -> Self {
        Self::cuda("hello.cu", HELLO_KERNEL, HELLO_ENTRY)
    }

    /// Reads a source file; the dialect follows the extension (`.ptx` is
    /// assembly, anything else is CUDA C++).
    pub fn from_file(path: impl AsRef<Path>, entry_point: impl Into<String>) -> Result<Self> {
        let path = path.as_ref();
        let code = fs::read_to_string(path).map_err(|e| JitError::io(path, e))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "kernel.cu".to_string());
        let source = if path.extension().is_some_and(|ext| ext == "ptx") {
            Self::ptx(name, code, entry_point)
        } else {
            Self::cuda(name, code, entry_point)
        };
        Ok(source)
    }

    /// Reads `file_name` from the resolved kernel-source directory and
    /// attaches the local, third-party and toolkit include directories in
    /// that order. Fails if any of them cannot be resolved.
    pub fn from_resources(
        resolver: &ResourceResolver,
        file_name: &str,
        entry_point: impl Into<String>,
    ) -> Result<Self> {
        let dir = resolver.resolve(ResourceCategory::KernelSource)?;
        let includes = resolver.include_dirs()?;
        let mut source = Self::from_file(dir.join(file_name), entry_point)?;
        source.include_dirs.extend(includes);
        Ok(source)
    }

    /// Adds a required include directory.
    #[must_use]
    pub fn with_include_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.include_dirs.push(dir.into());
        self
    }

    /// Program name reported to the compiler.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Source text.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Source dialect.
    #[must_use]
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Kernel entry point.
    #[must_use]
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    /// Include directories this source needs.
    #[must_use]
    pub fn include_dirs(&self) -> &[PathBuf] {
        &self.include_dirs
    }
}

/// Bytes produced by a compile stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledArtifact {
    stage: Stage,
    arch: Option<Architecture>,
    bytes: Vec<u8>,
}

impl CompiledArtifact {
    /// Creates an artifact built for `arch`.
    #[must_use]
    pub fn new(stage: Stage, arch: Architecture, bytes: Vec<u8>) -> Self {
        Self {
            stage,
            arch: Some(arch),
            bytes,
        }
    }

    /// Creates an artifact whose target architecture is unknown, e.g. bytes
    /// read back from disk.
    #[must_use]
    pub fn untargeted(stage: Stage, bytes: Vec<u8>) -> Self {
        Self {
            stage,
            arch: None,
            bytes,
        }
    }

    /// Re-tags the artifact with the architecture it was built for.
    #[must_use]
    pub fn with_arch(mut self, arch: Architecture) -> Self {
        self.arch = Some(arch);
        self
    }

    /// Stage tag.
    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Target architecture, if known.
    #[must_use]
    pub fn arch(&self) -> Option<Architecture> {
        self.arch
    }

    /// Raw bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consumes the artifact, returning its bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True when no bytes were produced.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Decodes the bytes as UTF-8 text.
    pub fn as_text(&self) -> Result<&str> {
        std::str::from_utf8(&self.bytes).map_err(|source| JitError::Decoding {
            path: PathBuf::new(),
            source,
        })
    }
}
