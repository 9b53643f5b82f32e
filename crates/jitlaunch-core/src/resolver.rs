//! Resource directory resolution across deployment layouts.
//!
//! Kernel sources and include directories live either beside the project
//! checkout (in-place layout) or beside the installed package (packaged
//! layout). The resolver probes an ordered list of [`LayoutRoot`]s and
//! returns the first candidate that exists as a directory.
//!
//! ```text
//! in-place:   <workspace>/kernels, <workspace>/include, ...
//! packaged:   <prefix>/share/jitlaunch/kernels, ...
//! toolkit:    $CUDA_HOME/include  or  dirname(which nvcc)/../include
//! ```

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{JitError, Result};

/// Default environment variables naming the toolkit root, in priority order.
pub const TOOLKIT_ENV_VARS: &[&str] = &["CUDA_HOME", "CUDA_PATH"];

/// Compiler executable used to discover the toolkit on `PATH`.
pub const TOOLKIT_COMPILER: &str = "nvcc";

/// Fixed set of resolvable resource categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceCategory {
    /// Kernel source directory.
    KernelSource,
    /// Local include directory.
    Include,
    /// Third-party include directory.
    ThirdPartyInclude,
    /// Opaque data directory.
    Data,
    /// Toolkit include directory.
    ToolkitInclude,
}

impl ResourceCategory {
    /// All categories, path-based first.
    pub const ALL: [ResourceCategory; 5] = [
        ResourceCategory::KernelSource,
        ResourceCategory::Include,
        ResourceCategory::ThirdPartyInclude,
        ResourceCategory::Data,
        ResourceCategory::ToolkitInclude,
    ];

    /// Category name, also the directory name under a layout root.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            ResourceCategory::KernelSource => "kernels",
            ResourceCategory::Include => "include",
            ResourceCategory::ThirdPartyInclude => "third_party",
            ResourceCategory::Data => "data",
            ResourceCategory::ToolkitInclude => "toolkit",
        }
    }

    /// Whether the category is resolved against layout roots.
    #[must_use]
    pub fn is_layout_relative(self) -> bool {
        !matches!(self, ResourceCategory::ToolkitInclude)
    }
}

impl fmt::Display for ResourceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ResourceCategory {
    type Err = JitError;

    fn from_str(s: &str) -> Result<Self> {
        ResourceCategory::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| JitError::UnknownResourceCategory(s.to_string()))
    }
}

type RootFn = Box<dyn Fn() -> Option<PathBuf> + Send + Sync>;

/// One deployment layout: a named function producing a root directory.
pub struct LayoutRoot {
    name: String,
    locate: RootFn,
}

impl LayoutRoot {
    /// Creates a layout from a root-locating function.
    pub fn new<F>(name: impl Into<String>, locate: F) -> Self
    where
        F: Fn() -> Option<PathBuf> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            locate: Box::new(locate),
        }
    }

    /// Layout rooted at a fixed directory.
    pub fn fixed(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self::new(name, move || Some(root.clone()))
    }

    /// In-place layout: resources beside the workspace checkout this crate
    /// was built from.
    #[must_use]
    pub fn in_place() -> Self {
        Self::new("in-place", || {
            Path::new(env!("CARGO_MANIFEST_DIR"))
                .ancestors()
                .nth(2)
                .map(Path::to_path_buf)
        })
    }

    /// Packaged layout: `<prefix>/share/jitlaunch` for an executable
    /// installed at `<prefix>/bin`.
    #[must_use]
    pub fn packaged() -> Self {
        Self::new("packaged", || {
            let exe = std::env::current_exe().ok()?;
            let prefix = exe.parent()?.parent()?;
            Some(prefix.join("share").join("jitlaunch"))
        })
    }

    /// Layout name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Evaluates the root, if this layout can produce one.
    #[must_use]
    pub fn root(&self) -> Option<PathBuf> {
        (self.locate)()
    }
}

impl fmt::Debug for LayoutRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayoutRoot").field("name", &self.name).finish()
    }
}

/// Locates the GPU toolkit installation.
#[derive(Debug, Clone)]
pub struct ToolkitLocator {
    env_vars: Vec<String>,
    compiler: String,
    pinned_root: Option<PathBuf>,
}

impl Default for ToolkitLocator {
    fn default() -> Self {
        Self {
            env_vars: TOOLKIT_ENV_VARS.iter().map(|s| s.to_string()).collect(),
            compiler: TOOLKIT_COMPILER.to_string(),
            pinned_root: None,
        }
    }
}

impl ToolkitLocator {
    /// Locator using the default variables and compiler name.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the override variables with a single one.
    #[must_use]
    pub fn with_env_var(mut self, var: impl Into<String>) -> Self {
        self.env_vars = vec![var.into()];
        self
    }

    /// Sets the compiler executable searched on `PATH`.
    #[must_use]
    pub fn with_compiler(mut self, compiler: impl Into<String>) -> Self {
        self.compiler = compiler.into();
        self
    }

    /// Uses `root` and skips environment and `PATH` discovery.
    #[must_use]
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.pinned_root = Some(root.into());
        self
    }

    /// Override variables consulted before `PATH`.
    #[must_use]
    pub fn env_vars(&self) -> &[String] {
        &self.env_vars
    }

    /// Toolkit root from the process environment.
    pub fn root(&self) -> Result<PathBuf> {
        self.root_with(|var| std::env::var_os(var), std::env::var_os("PATH"))
    }

    /// Toolkit root from an explicit environment lookup and search path.
    ///
    /// A root qualifies when its `include` directory exists.
    pub fn root_with<E>(&self, env: E, search_path: Option<OsString>) -> Result<PathBuf>
    where
        E: Fn(&str) -> Option<OsString>,
    {
        if let Some(root) = &self.pinned_root {
            let include = root.join("include");
            if include.is_dir() {
                return Ok(root.clone());
            }
            return Err(JitError::ResourceNotFound {
                category: ResourceCategory::ToolkitInclude,
                searched: vec![include],
            });
        }

        let mut searched = Vec::new();

        for var in &self.env_vars {
            if let Some(value) = env(var).filter(|v| !v.is_empty()) {
                let root = PathBuf::from(value);
                let include = root.join("include");
                if include.is_dir() {
                    tracing::debug!(var = %var, root = %root.display(), "Toolkit root from environment");
                    return Ok(root);
                }
                searched.push(include);
            }
        }

        if let Some(path) = search_path {
            for dir in std::env::split_paths(&path) {
                let exe = dir.join(executable_name(&self.compiler));
                if !exe.is_file() {
                    continue;
                }
                // <root>/bin/nvcc -> <root>
                if let Some(root) = dir.parent() {
                    let include = root.join("include");
                    if include.is_dir() {
                        tracing::debug!(compiler = %exe.display(), "Toolkit root from PATH");
                        return Ok(root.to_path_buf());
                    }
                    searched.push(include);
                }
            }
        }

        Err(JitError::ResourceNotFound {
            category: ResourceCategory::ToolkitInclude,
            searched,
        })
    }

    /// Toolkit include directory from the process environment.
    pub fn include_dir(&self) -> Result<PathBuf> {
        absolute(self.root()?.join("include"))
    }

    /// Path of a toolkit executable such as `ptxas`, preferring the toolkit's
    /// `bin` directory and falling back to the bare name for `PATH` lookup.
    #[must_use]
    pub fn tool(&self, name: &str) -> PathBuf {
        match self.root() {
            Ok(root) => {
                let exe = root.join("bin").join(executable_name(name));
                if exe.is_file() {
                    exe
                } else {
                    PathBuf::from(name)
                }
            }
            Err(_) => PathBuf::from(name),
        }
    }
}

/// Resolves resource categories to absolute, existing directories.
#[derive(Debug)]
pub struct ResourceResolver {
    roots: Vec<LayoutRoot>,
    toolkit: ToolkitLocator,
}

impl Default for ResourceResolver {
    fn default() -> Self {
        Self::new(vec![LayoutRoot::in_place(), LayoutRoot::packaged()])
    }
}

impl ResourceResolver {
    /// Resolver probing `roots` in order.
    #[must_use]
    pub fn new(roots: Vec<LayoutRoot>) -> Self {
        Self {
            roots,
            toolkit: ToolkitLocator::default(),
        }
    }

    /// Replaces the toolkit locator.
    #[must_use]
    pub fn with_toolkit(mut self, toolkit: ToolkitLocator) -> Self {
        self.toolkit = toolkit;
        self
    }

    /// Appends a lower-priority layout.
    #[must_use]
    pub fn with_root(mut self, root: LayoutRoot) -> Self {
        self.roots.push(root);
        self
    }

    /// Layouts in probe order.
    #[must_use]
    pub fn roots(&self) -> &[LayoutRoot] {
        &self.roots
    }

    /// Toolkit locator.
    #[must_use]
    pub fn toolkit(&self) -> &ToolkitLocator {
        &self.toolkit
    }

    /// Resolves a category to an absolute, existing directory.
    pub fn resolve(&self, category: ResourceCategory) -> Result<PathBuf> {
        if !category.is_layout_relative() {
            return self.toolkit.include_dir();
        }

        let mut searched = Vec::with_capacity(self.roots.len());
        for layout in &self.roots {
            let Some(root) = layout.root() else {
                continue;
            };
            let candidate = root.join(category.name());
            if candidate.is_dir() {
                tracing::debug!(
                    category = %category,
                    layout = layout.name(),
                    path = %candidate.display(),
                    "Resolved resource directory"
                );
                return absolute(candidate);
            }
            searched.push(candidate);
        }

        Err(JitError::ResourceNotFound { category, searched })
    }

    /// Resolves a category given by name; unknown names are rejected before
    /// touching the filesystem.
    pub fn resolve_named(&self, name: &str) -> Result<PathBuf> {
        self.resolve(name.parse()?)
    }

    /// Include directories for a source compile: local, third-party and
    /// toolkit, in that order. Any missing directory is an error.
    pub fn include_dirs(&self) -> Result<Vec<PathBuf>> {
        [
            ResourceCategory::Include,
            ResourceCategory::ThirdPartyInclude,
            ResourceCategory::ToolkitInclude,
        ]
        .into_iter()
        .map(|c| self.resolve(c))
        .collect()
    }
}

fn absolute(path: PathBuf) -> Result<PathBuf> {
    path.canonicalize().map_err(|e| JitError::io(path, e))
}

fn executable_name(name: &str) -> String {
    if cfg!(windows) && !name.ends_with(".exe") {
        format!("{}.exe", name)
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn layout(dir: &TempDir, name: &str) -> LayoutRoot {
        LayoutRoot::fixed(name, dir.path())
    }

    #[test]
    fn test_category_names_round_trip() {
        for category in ResourceCategory::ALL {
            assert_eq!(category.name().parse::<ResourceCategory>().unwrap(), category);
        }
    }

    #[test]
    fn test_unknown_category_rejected() {
        let err = "shaders".parse::<ResourceCategory>().unwrap_err();
        assert!(matches!(err, JitError::UnknownResourceCategory(ref s) if s == "shaders"));
    }

    #[test]
    fn test_prefers_in_place_layout() {
        let in_place = TempDir::new().unwrap();
        let packaged = TempDir::new().unwrap();
        fs::create_dir(in_place.path().join("kernels")).unwrap();
        fs::create_dir(packaged.path().join("kernels")).unwrap();

        let resolver = ResourceResolver::new(vec![
            layout(&in_place, "in-place"),
            layout(&packaged, "packaged"),
        ]);
        let dir = resolver.resolve(ResourceCategory::KernelSource).unwrap();
        assert_eq!(dir, in_place.path().join("kernels").canonicalize().unwrap());
    }

    #[test]
    fn test_falls_back_to_packaged_layout() {
        let in_place = TempDir::new().unwrap();
        let packaged = TempDir::new().unwrap();
        fs::create_dir(packaged.path().join("include")).unwrap();

        let resolver = ResourceResolver::new(vec![
            layout(&in_place, "in-place"),
            layout(&packaged, "packaged"),
        ]);
        let dir = resolver.resolve(ResourceCategory::Include).unwrap();
        assert_eq!(dir, packaged.path().join("include").canonicalize().unwrap());
        assert!(dir.is_absolute());
    }

    #[test]
    fn test_file_is_not_a_directory() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("data"), b"not a dir").unwrap();

        let resolver = ResourceResolver::new(vec![layout(&root, "only")]);
        let err = resolver.resolve(ResourceCategory::Data).unwrap_err();
        match err {
            JitError::ResourceNotFound { category, searched } => {
                assert_eq!(category, ResourceCategory::Data);
                assert_eq!(searched, vec![root.path().join("data")]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_layout_without_root_is_skipped() {
        let root = TempDir::new().unwrap();
        fs::create_dir(root.path().join("third_party")).unwrap();

        let resolver = ResourceResolver::new(vec![LayoutRoot::new("absent", || None)])
            .with_root(layout(&root, "fallback"));
        assert!(resolver.resolve(ResourceCategory::ThirdPartyInclude).is_ok());
    }

    #[test]
    fn test_toolkit_env_override() {
        let toolkit = TempDir::new().unwrap();
        fs::create_dir(toolkit.path().join("include")).unwrap();
        let root_value = toolkit.path().as_os_str().to_os_string();

        let locator = ToolkitLocator::new().with_env_var("MY_CUDA");
        let root = locator
            .root_with(|var| (var == "MY_CUDA").then(|| root_value.clone()), None)
            .unwrap();
        assert_eq!(root, toolkit.path());
    }

    #[test]
    fn test_toolkit_from_search_path() {
        let toolkit = TempDir::new().unwrap();
        let bin = toolkit.path().join("bin");
        fs::create_dir(&bin).unwrap();
        fs::create_dir(toolkit.path().join("include")).unwrap();
        fs::write(bin.join(executable_name("nvcc")), b"#!/bin/sh\n").unwrap();

        let empty = TempDir::new().unwrap();
        let search = std::env::join_paths([empty.path(), bin.as_path()]).unwrap();

        let root = ToolkitLocator::new().root_with(|_| None, Some(search)).unwrap();
        assert_eq!(root, toolkit.path());
    }

    #[test]
    fn test_toolkit_env_without_include_falls_through() {
        let bogus = TempDir::new().unwrap();
        let value = bogus.path().as_os_str().to_os_string();

        let err = ToolkitLocator::new()
            .root_with(|var| (var == "CUDA_HOME").then(|| value.clone()), None)
            .unwrap_err();
        match err {
            JitError::ResourceNotFound { category, searched } => {
                assert_eq!(category, ResourceCategory::ToolkitInclude);
                assert_eq!(searched, vec![bogus.path().join("include")]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_pinned_toolkit_root_skips_discovery() {
        let toolkit = TempDir::new().unwrap();
        fs::create_dir(toolkit.path().join("include")).unwrap();
        let elsewhere = TempDir::new().unwrap();
        fs::create_dir(elsewhere.path().join("include")).unwrap();
        let value = elsewhere.path().as_os_str().to_os_string();

        let locator = ToolkitLocator::new().with_root(toolkit.path());
        let root = locator.root_with(|_| Some(value.clone()), None).unwrap();
        assert_eq!(root, toolkit.path());

        let missing = TempDir::new().unwrap();
        let err = ToolkitLocator::new().with_root(missing.path()).root().unwrap_err();
        assert!(matches!(err, JitError::ResourceNotFound { category: ResourceCategory::ToolkitInclude, .. }));
    }

    #[test]
    fn test_include_dirs_order() {
        let project = TempDir::new().unwrap();
        let toolkit = TempDir::new().unwrap();
        for dir in ["include", "third_party"] {
            fs::create_dir(project.path().join(dir)).unwrap();
        }
        fs::create_dir(toolkit.path().join("include")).unwrap();

        let resolver = ResourceResolver::new(vec![layout(&project, "in-place")])
            .with_toolkit(ToolkitLocator::new().with_root(toolkit.path()));
        let dirs = resolver.include_dirs().unwrap();
        assert_eq!(
            dirs,
            vec![
                project.path().join("include").canonicalize().unwrap(),
                project.path().join("third_party").canonicalize().unwrap(),
                toolkit.path().join("include").canonicalize().unwrap(),
            ]
        );
    }

    #[test]
    fn test_include_dirs_fail_fast_on_missing_third_party() {
        let project = TempDir::new().unwrap();
        let toolkit = TempDir::new().unwrap();
        fs::create_dir(project.path().join("include")).unwrap();
        fs::create_dir(toolkit.path().join("include")).unwrap();

        let resolver = ResourceResolver::new(vec![layout(&project, "in-place")])
            .with_toolkit(ToolkitLocator::new().with_root(toolkit.path()));
        let err = resolver.include_dirs().unwrap_err();
        assert!(matches!(
            err,
            JitError::ResourceNotFound { category: ResourceCategory::ThirdPartyInclude, .. }
        ));
    }
}
