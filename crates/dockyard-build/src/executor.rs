//! ビルド単位を実際に実行する外部協力者
//!
//! スケジューラは [`Executor`] だけを知っている。Docker を使う実装が
//! [`DockerExecutor`] で、テストではメモリ上の実装に差し替える。

use crate::builder::ImageBuilder;
use crate::context::ContextBuilder;
use crate::error::{BuildError, BuildResult};
use crate::event::Reporter;
use crate::plan::Job;
use crate::pusher::ImagePusher;
use async_trait::async_trait;
use bollard::Docker;

#[async_trait]
pub trait Executor: Send + Sync {
    /// 主タグでビルドし、残りのタグを付ける
    async fn build(&self, job: &Job, reporter: &Reporter) -> BuildResult<()>;

    /// すべてのタグをプッシュする
    async fn push(&self, job: &Job, reporter: &Reporter) -> BuildResult<()>;
}

pub struct DockerExecutor {
    builder: ImageBuilder,
    pusher: ImagePusher,
}

impl DockerExecutor {
    pub fn new(docker: Docker) -> Self {
        Self {
            builder: ImageBuilder::new(docker.clone()),
            pusher: ImagePusher::new(docker),
        }
    }
}

#[async_trait]
impl Executor for DockerExecutor {
    async fn build(&self, job: &Job, reporter: &Reporter) -> BuildResult<()> {
        let module_path = job.module_path.clone();
        let build_file = job.build_file.clone();

        // tar の作成はブロッキング I/O
        let context_data = tokio::task::spawn_blocking(move || {
            ContextBuilder::create_context(&module_path, &build_file)
        })
        .await
        .map_err(|e| BuildError::BuildFailed(format!("context task failed: {}", e)))??;

        let primary = job.primary_tag();
        self.builder
            .build_image(context_data, primary, &job.build_args, reporter)
            .await?;

        for extra in job.extra_tags() {
            self.builder.tag_image(primary, extra).await?;
            reporter.output(&format!("Tagged {}", extra));
        }

        Ok(())
    }

    async fn push(&self, job: &Job, reporter: &Reporter) -> BuildResult<()> {
        for tag in job.tags() {
            self.pusher.push(tag, reporter).await?;
        }
        Ok(())
    }
}
