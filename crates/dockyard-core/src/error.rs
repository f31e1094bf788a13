use std::path::PathBuf;
use thiserror::Error;

/// 計画フェーズのエラー
///
/// いずれもビルド開始前に検出され、呼び出し全体を中断する。
#[derive(Error, Debug)]
pub enum DockyardError {
    #[error("認識できない引数: {token}")]
    UnrecognizedToken { token: String },

    #[error(
        "モジュール '{module}' (variant: {}) のタグが不完全です: {tag}\nヒント: image と tag の両方が必要です",
        .variant.as_deref().unwrap_or("none")
    )]
    UnresolvedTag {
        module: String,
        variant: Option<String>,
        tag: String,
    },

    #[error(
        "build.yml のないモジュールは1つずつしかビルドできません: {}",
        .modules.join(", ")
    )]
    AmbiguousModuleSet { modules: Vec<String> },

    #[error("モジュール '{module}' の build.yml に variant '{variant}' が定義されていません")]
    UnknownVariant { module: String, variant: String },

    #[error("variant が指定されましたが、モジュール '{module}' には variant が定義されていません")]
    NoVariants { module: String },

    #[error("設定ファイルのパースエラー: {path}\n理由: {message}")]
    ConfigParse { path: PathBuf, message: String },

    #[error("無効な設定: {path}\n理由: {message}")]
    InvalidConfig { path: PathBuf, message: String },

    #[error("Dockerfile が見つかりません: {0}")]
    BuildFileNotFound(PathBuf),

    #[error("モジュールが見つかりません: {0}")]
    ModuleNotFound(String),

    #[error("IO エラー: {path}\n理由: {message}")]
    IoError { path: PathBuf, message: String },
}

pub type Result<T> = std::result::Result<T, DockyardError>;
