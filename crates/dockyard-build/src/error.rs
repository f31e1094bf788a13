use std::path::PathBuf;
use thiserror::Error;

/// 実行フェーズのエラー
///
/// ビルド単位ごとに記録され、他のビルド単位の実行は止めない。
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Dockerfile not found: {0}")]
    BuildFileNotFound(PathBuf),

    #[error("Docker connection error: {0}")]
    DockerConnection(#[from] bollard::errors::Error),

    #[error("Build failed: {0}")]
    BuildFailed(String),

    #[error("Failed to tag {source_image} as {tag}: {message}")]
    TagFailed {
        source_image: String,
        tag: String,
        message: String,
    },

    #[error("Push failed: {message}")]
    PushFailed { message: String },

    #[error("Invalid tag: {tag}")]
    InvalidTag { tag: String },

    #[error("Authentication failed for {registry}: {message}")]
    AuthFailed { registry: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildError {
    /// ユーザー向けの分かりやすいエラーメッセージ
    pub fn user_message(&self) -> String {
        match self {
            BuildError::BuildFileNotFound(path) => {
                format!(
                    "Dockerfileが見つかりません: {}\n\
                     \n\
                     モジュールディレクトリ直下に Dockerfile を置いてください。",
                    path.display()
                )
            }
            BuildError::BuildFailed(msg) => {
                format!(
                    "ビルドに失敗しました: {}\n\
                     \n\
                     Dockerfileの内容を確認してください。",
                    msg
                )
            }
            BuildError::PushFailed { message } => {
                format!(
                    "プッシュに失敗しました: {}\n\
                     \n\
                     解決方法:\n\
                     1. docker login でレジストリにログインしているか確認してください\n\
                     2. リポジトリへの書き込み権限があるか確認してください",
                    message
                )
            }
            BuildError::AuthFailed { registry, message } => {
                format!(
                    "レジストリ {} の認証情報を取得できませんでした: {}\n\
                     \n\
                     ~/.docker/config.json と credential helper の設定を確認してください。",
                    registry, message
                )
            }
            _ => format!("{}", self),
        }
    }
}

pub type BuildResult<T> = std::result::Result<T, BuildError>;
