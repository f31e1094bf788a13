//! モジュールの読み込み

use crate::config::{Module, ModuleConfig};
use crate::error::{DockyardError, Result};
use crate::{BUILD_FILE, CONFIG_FILE};
use std::path::Path;
use tracing::debug;

/// `build.yml` を読み込む。ファイルが無ければ `None`
pub fn load_config(module_path: &Path) -> Result<Option<ModuleConfig>> {
    let path = module_path.join(CONFIG_FILE);
    if !path.is_file() {
        debug!(path = %path.display(), "No build.yml, module is unconfigured");
        return Ok(None);
    }

    let content = std::fs::read_to_string(&path).map_err(|e| DockyardError::IoError {
        path: path.clone(),
        message: e.to_string(),
    })?;

    let config = ModuleConfig::from_yaml(&content, &path)?;
    debug!(
        path = %path.display(),
        variant_count = config.variants.len(),
        "Loaded build.yml"
    );
    Ok(Some(config))
}

/// `base_path/name` をモジュールとして読み込む
pub fn load_module(base_path: &Path, name: &str) -> Result<Module> {
    let path = base_path.join(name);
    if !path.is_dir() {
        return Err(DockyardError::ModuleNotFound(name.to_string()));
    }

    let build_file = path.join(BUILD_FILE);
    if !build_file.is_file() {
        return Err(DockyardError::BuildFileNotFound(build_file));
    }

    let config = load_config(&path)?;

    Ok(Module {
        name: name.to_string(),
        path,
        build_file,
        config,
    })
}

/// 指定順にモジュールを読み込む。どれか1つでも失敗すればエラー
pub fn load_modules<S: AsRef<str>>(base_path: &Path, names: &[S]) -> Result<Vec<Module>> {
    names
        .iter()
        .map(|name| load_module(base_path, name.as_ref()))
        .collect()
}

/// Dockerfile の内容を読み込む
pub fn read_build_file(module: &Module) -> Result<String> {
    std::fs::read_to_string(&module.build_file).map_err(|e| DockyardError::IoError {
        path: module.build_file.clone(),
        message: e.to_string(),
    })
}
