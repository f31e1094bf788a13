//! モジュールの自動発見
//!
//! ベースディレクトリ直下で Dockerfile を持つディレクトリをモジュールとみなす。

use crate::BUILD_FILE;
use crate::error::{DockyardError, Result};
use regex::Regex;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, info};

/// モジュール名として使える名前
static RE_MODULE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z0-9-]+$").unwrap());

pub fn is_module_name(name: &str) -> bool {
    RE_MODULE.is_match(name)
}

/// ベースディレクトリ直下のモジュール名を列挙（ソート済み）
#[tracing::instrument(skip(base_path), fields(base_path = %base_path.display()))]
pub fn list_modules(base_path: &Path) -> Result<BTreeSet<String>> {
    if !base_path.is_dir() {
        return Err(DockyardError::IoError {
            path: base_path.to_path_buf(),
            message: "ディレクトリではありません".to_string(),
        });
    }

    let pattern = base_path.join("*").join(BUILD_FILE);
    let pattern = pattern.to_string_lossy();
    let entries = glob::glob(&pattern).map_err(|e| DockyardError::IoError {
        path: base_path.to_path_buf(),
        message: format!("パターンが不正です: {}", e),
    })?;

    let mut modules = BTreeSet::new();
    for entry in entries {
        let build_file = match entry {
            Ok(path) => path,
            Err(e) => {
                debug!(error = %e, "Skipping unreadable path");
                continue;
            }
        };

        if !build_file.is_file() {
            continue;
        }

        let Some(name) = build_file
            .parent()
            .and_then(Path::file_name)
            .and_then(|n| n.to_str())
        else {
            continue;
        };

        if !is_module_name(name) {
            debug!(name = %name, "Skipping directory with invalid module name");
            continue;
        }

        modules.insert(name.to_string());
    }

    info!(module_count = modules.len(), "Discovered modules");
    Ok(modules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn create_module(base: &Path, name: &str) {
        let dir = base.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(BUILD_FILE), "FROM alpine\n").unwrap();
    }

    #[test]
    fn test_list_modules() {
        let temp = TempDir::new().unwrap();
        create_module(temp.path(), "web");
        create_module(temp.path(), "api");
        create_module(temp.path(), "log-agent");
        // Dockerfile が無いディレクトリは対象外
        fs::create_dir_all(temp.path().join("docs")).unwrap();
        // 名前が規約に合わないものも対象外
        create_module(temp.path(), "Bad_Name");

        let modules = list_modules(temp.path()).unwrap();
        let names: Vec<&str> = modules.iter().map(String::as_str).collect();
        assert_eq!(names, vec!["api", "log-agent", "web"]);
    }

    #[test]
    fn test_list_modules_ignores_nested() {
        let temp = TempDir::new().unwrap();
        create_module(&temp.path().join("group"), "inner");

        let modules = list_modules(temp.path()).unwrap();
        assert!(modules.is_empty());
    }

    #[test]
    fn test_list_modules_not_a_directory() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("file");
        fs::write(&file, "").unwrap();
        assert!(list_modules(&file).is_err());
    }

    #[test]
    fn test_module_name_rule() {
        assert!(is_module_name("api"));
        assert!(is_module_name("log-agent-2"));
        assert!(!is_module_name("Api"));
        assert!(!is_module_name("my_module"));
        assert!(!is_module_name(""));
    }
}
