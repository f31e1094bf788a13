//! イメージプッシュ処理
//!
//! ビルドしたイメージをコンテナレジストリにプッシュします。

use crate::auth::RegistryAuth;
use crate::error::{BuildError, BuildResult};
use crate::event::Reporter;
use bollard::Docker;
use bollard::models::PushImageInfo;
use dockyard_core::Tag;
use futures_util::StreamExt;

/// イメージプッシュを実行するハンドラ
pub struct ImagePusher {
    docker: Docker,
    auth: RegistryAuth,
}

impl ImagePusher {
    pub fn new(docker: Docker) -> Self {
        Self {
            docker,
            auth: RegistryAuth::new(),
        }
    }

    /// タグをレジストリにプッシュし、プッシュしたイメージ名を返す
    pub async fn push(&self, tag: &Tag, reporter: &Reporter) -> BuildResult<String> {
        let full_image = tag.full();
        let version = tag.tag.as_deref().unwrap_or_default();
        validate_tag(version)?;

        let credentials = self.auth.credentials_for(tag)?;

        #[allow(deprecated)]
        let options = bollard::image::PushImageOptions::<String> {
            tag: version.to_string(),
        };

        tracing::info!(image = %full_image, "Pushing image");
        reporter.output(&format!("Pushing {}", full_image));

        let mut stream = self
            .docker
            .push_image(&tag.repository(), Some(options), credentials);

        let mut last_status = String::new();
        let mut error_message: Option<String> = None;

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(err) = info.error {
                        error_message = Some(err);
                    } else {
                        report_progress(&info, &mut last_status, reporter);
                    }
                }
                Err(e) => {
                    return Err(BuildError::PushFailed {
                        message: e.to_string(),
                    });
                }
            }
        }

        if let Some(err) = error_message {
            return Err(BuildError::PushFailed { message: err });
        }

        tracing::info!(image = %full_image, "Pushed image");
        Ok(full_image)
    }
}

/// Docker タグの制約を確認
///
/// 128文字以下、英数字・ピリオド・ハイフン・アンダースコアのみ、
/// 先頭はピリオドまたはハイフン以外。
pub fn validate_tag(tag: &str) -> BuildResult<()> {
    if tag.is_empty() {
        return Err(BuildError::InvalidTag {
            tag: "(empty)".to_string(),
        });
    }

    if tag.len() > 128 {
        return Err(BuildError::InvalidTag {
            tag: format!("Tag too long ({} characters, max 128)", tag.len()),
        });
    }

    if tag.starts_with('.') || tag.starts_with('-') {
        return Err(BuildError::InvalidTag {
            tag: tag.to_string(),
        });
    }

    if let Some(c) = tag
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && !matches!(c, '.' | '-' | '_'))
    {
        return Err(BuildError::InvalidTag {
            tag: format!("Invalid character '{}' in tag: {}", c, tag),
        });
    }

    Ok(())
}

/// 状態の変化を出力として送る
///
/// 同じ状態の繰り返しと、準備中・待機中・転送中の行は送らない。
fn report_progress(info: &PushImageInfo, last_status: &mut String, reporter: &Reporter) {
    let Some(status) = &info.status else {
        return;
    };

    if matches!(status.as_str(), "Preparing" | "Waiting" | "Pushing") {
        return;
    }

    if *status != *last_status {
        reporter.output(status);
        *last_status = status.clone();
    }
}
