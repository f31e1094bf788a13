use crate::error::{BuildError, BuildResult};
use crate::event::Reporter;
use bollard::Docker;
use dockyard_core::Tag;
use futures_util::stream::StreamExt;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

/// `Step 3/7 : RUN pip install ...`
static RE_STEP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Step (\d+)/(\d+) : ([A-Za-z]+)").unwrap());

/// `Successfully built 0123abcd` または `sha256:0123abcd...`
static RE_BUILT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:Successfully built |sha256:)([0-9a-f]+)").unwrap());

/// ビルド出力1行の解釈
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildLine {
    Step {
        current: u32,
        total: u32,
        instruction: String,
    },
    Built(String),
    Text(String),
}

fn classify_line(line: &str) -> BuildLine {
    if let Some(caps) = RE_STEP.captures(line)
        && let (Ok(current), Ok(total)) = (caps[1].parse(), caps[2].parse())
    {
        return BuildLine::Step {
            current,
            total,
            instruction: caps[3].to_uppercase(),
        };
    }

    if let Some(caps) = RE_BUILT.captures(line) {
        return BuildLine::Built(caps[1].to_string());
    }

    BuildLine::Text(line.to_string())
}

/// ストリームの断片を行に組み立てる
///
/// Docker は1つのメッセージに複数行を入れたり、行の途中で区切ったりする。
#[derive(Debug, Default)]
pub struct BuildOutputParser {
    pending: String,
}

impl BuildOutputParser {
    pub fn feed(&mut self, chunk: &str) -> Vec<BuildLine> {
        self.pending.push_str(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=pos).collect();
            let line = line.trim_end();
            if !line.is_empty() {
                lines.push(classify_line(line));
            }
        }
        lines
    }

    pub fn finish(&mut self) -> Option<BuildLine> {
        let rest = std::mem::take(&mut self.pending);
        let rest = rest.trim_end();
        (!rest.is_empty()).then(|| classify_line(rest))
    }
}

pub struct ImageBuilder {
    docker: Docker,
}

impl ImageBuilder {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// イメージをビルドし、分かればイメージ ID を返す
    pub async fn build_image(
        &self,
        context_data: Vec<u8>,
        tag: &Tag,
        build_args: &BTreeMap<String, String>,
        reporter: &Reporter,
    ) -> BuildResult<Option<String>> {
        let image = tag.full();
        tracing::info!(image = %image, "Building image");

        let build_args_refs: HashMap<&str, &str> = build_args
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        #[allow(deprecated)]
        let options = bollard::image::BuildImageOptions {
            dockerfile: "Dockerfile",
            t: image.as_str(),
            buildargs: build_args_refs,
            rm: true,      // 中間コンテナを削除
            forcerm: true, // ビルド失敗時も中間コンテナを削除
            ..Default::default()
        };

        if !build_args.is_empty() {
            tracing::debug!(image = %image, build_args = ?build_args, "Build args");
        }

        use bytes::Bytes;
        use http_body_util::{Either, Full};
        let body = Full::new(Bytes::from(context_data));
        let mut stream = self
            .docker
            .build_image(options, None, Some(Either::Left(body)));

        let mut parser = BuildOutputParser::default();
        let mut image_id = None;

        while let Some(msg) = stream.next().await {
            let output = msg?;

            if let Some(error) = output.error {
                return Err(BuildError::BuildFailed(error));
            }

            if let Some(error_detail) = output.error_detail {
                let error_msg = error_detail
                    .message
                    .unwrap_or_else(|| "Unknown build error".to_string());
                return Err(BuildError::BuildFailed(error_msg));
            }

            if let Some(chunk) = output.stream {
                for line in parser.feed(&chunk) {
                    Self::report_line(line, reporter, &mut image_id);
                }
            }

            if let Some(status) = output.status {
                reporter.output(&status);
            }
        }

        if let Some(line) = parser.finish() {
            Self::report_line(line, reporter, &mut image_id);
        }

        tracing::info!(image = %image, id = ?image_id, "Successfully built");
        Ok(image_id)
    }

    fn report_line(line: BuildLine, reporter: &Reporter, image_id: &mut Option<String>) {
        match line {
            BuildLine::Step {
                current,
                total,
                instruction,
            } => {
                reporter.step(current, total, &instruction);
            }
            BuildLine::Built(id) => {
                reporter.output(&format!("Built {}", id));
                *image_id = Some(id);
            }
            BuildLine::Text(text) => reporter.output(&text),
        }
    }

    /// ビルド済みのイメージに別名タグを付ける
    pub async fn tag_image(&self, source: &Tag, target: &Tag) -> BuildResult<()> {
        #[allow(deprecated)]
        let options = bollard::image::TagImageOptions::<String> {
            repo: target.repository(),
            tag: target.tag.clone().unwrap_or_default(),
        };

        self.docker
            .tag_image(&source.full(), Some(options))
            .await
            .map_err(|e| BuildError::TagFailed {
                source_image: source.full(),
                tag: target.full(),
                message: e.to_string(),
            })?;

        tracing::debug!(source = %source, target = %target, "Tagged image");
        Ok(())
    }
}
