//! `jitlaunch resolve`: print resource directories.

use colored::Colorize;
use jitlaunch_core::{JitConfig, JitError, ResourceCategory};

use crate::error::CliResult;

/// Execute the resolve command.
///
/// With a category name, prints its directory or fails. Without one, prints
/// every category and marks the ones that cannot be found.
pub fn execute(config: &JitConfig, category: Option<&str>) -> CliResult<()> {
    let resolver = config.resolver();

    if let Some(name) = category {
        let path = resolver.resolve_named(name)?;
        println!("{}", path.display());
        return Ok(());
    }

    for category in ResourceCategory::ALL {
        match resolver.resolve(category) {
            Ok(path) => println!("  {:<12} {}", category.to_string().bright_white(), path.display()),
            Err(JitError::ResourceNotFound { searched, .. }) => {
                println!("  {:<12} {}", category.to_string().bright_white(), "not found".yellow());
                for candidate in searched {
                    println!("  {:<12}   {} {}", "", "tried".dimmed(), candidate.display());
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CliError;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_configured_project_root() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("data")).unwrap();
        let mut config = JitConfig::default();
        config.layout.project_root = Some(root.path().to_path_buf());

        execute(&config, Some("data")).unwrap();
    }

    #[test]
    fn test_resolve_unknown_category() {
        let err = execute(&JitConfig::default(), Some("shaders")).unwrap_err();
        assert!(matches!(err, CliError::Jit(JitError::UnknownResourceCategory(ref name)) if name == "shaders"));
    }

    #[test]
    fn test_resolve_all_reports_missing_without_failing() {
        let empty = TempDir::new().unwrap();
        let mut config = JitConfig::default();
        config.layout.project_root = Some(empty.path().to_path_buf());
        config.layout.install_root = Some(empty.path().to_path_buf());
        config.layout.toolkit_env = Some("JITLAUNCH_TEST_UNSET_TOOLKIT".to_string());

        execute(&config, None).unwrap();
    }
}
