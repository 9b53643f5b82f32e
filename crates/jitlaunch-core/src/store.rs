//! Artifact persistence.
//!
//! Pure byte-sequence storage keyed by a caller-supplied path. The store
//! knows nothing about devices or architectures; reads are re-tagged with the
//! stage the caller asks for. Assembly is text and is validated as UTF-8 on
//! load, binaries are returned untouched.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::artifact::CompiledArtifact;
use crate::error::{JitError, Result};
use crate::types::Stage;

/// Reads and writes artifacts relative to a base directory.
#[derive(Debug, Clone, Default)]
pub struct ArtifactStore {
    /// Base for relative paths; `None` means the process working directory.
    base_dir: Option<PathBuf>,
}

impl ArtifactStore {
    /// Store resolving relative paths against the working directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store resolving relative paths against `dir`.
    #[must_use]
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(dir.into()),
        }
    }

    /// Base directory, if any.
    #[must_use]
    pub fn base_dir(&self) -> Option<&Path> {
        self.base_dir.as_deref()
    }

    /// Full path for `path` under this store.
    #[must_use]
    pub fn path_for(&self, path: impl AsRef<Path>) -> PathBuf {
        match &self.base_dir {
            Some(base) => base.join(path),
            None => path.as_ref().to_path_buf(),
        }
    }

    /// Writes the artifact's raw bytes to `path`.
    ///
    /// The file is written to a sibling temporary and renamed into place, so
    /// a concurrent reader sees either the old or the new contents.
    pub fn store(&self, artifact: &CompiledArtifact, path: impl AsRef<Path>) -> Result<PathBuf> {
        let path = self.path_for(path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| JitError::io(parent, e))?;
        }

        let mut temp_name = path.as_os_str().to_os_string();
        temp_name.push(".tmp");
        let temp_path = PathBuf::from(temp_name);

        let mut file = fs::File::create(&temp_path).map_err(|e| JitError::io(&temp_path, e))?;
        file.write_all(artifact.bytes())
            .map_err(|e| JitError::io(&temp_path, e))?;
        file.sync_all().map_err(|e| JitError::io(&temp_path, e))?;
        drop(file);

        fs::rename(&temp_path, &path).map_err(|e| JitError::io(&path, e))?;

        tracing::debug!(
            path = %path.display(),
            stage = %artifact.stage(),
            size = artifact.len(),
            "Stored artifact"
        );
        Ok(path)
    }

    /// Reads the bytes at `path` and tags them with `stage`.
    ///
    /// Assembly loads fail with [`JitError::Decoding`] on invalid UTF-8; a
    /// missing file is [`JitError::ArtifactNotFound`].
    pub fn load(&self, path: impl AsRef<Path>, stage: Stage) -> Result<CompiledArtifact> {
        let path = self.path_for(path);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(JitError::ArtifactNotFound(path));
            }
            Err(e) => return Err(JitError::io(path, e)),
        };

        if stage.is_text() {
            if let Err(source) = std::str::from_utf8(&bytes) {
                return Err(JitError::Decoding { path, source });
            }
        }

        tracing::debug!(
            path = %path.display(),
            stage = %stage,
            size = bytes.len(),
            "Loaded artifact"
        );
        Ok(CompiledArtifact::untargeted(stage, bytes))
    }
}
