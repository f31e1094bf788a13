use crate::error::{BuildError, BuildResult};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::path::Path;
use tar::Builder;

pub struct ContextBuilder;

impl ContextBuilder {
    /// モジュールディレクトリをビルドコンテキスト（tar.gz）にまとめる
    ///
    /// Dockerfile はモジュール内の場所にかかわらず `Dockerfile` として格納する。
    pub fn create_context(module_path: &Path, build_file: &Path) -> BuildResult<Vec<u8>> {
        if !build_file.is_file() {
            return Err(BuildError::BuildFileNotFound(build_file.to_path_buf()));
        }

        tracing::debug!(module_path = %module_path.display(), "Creating build context");

        let build_file_content = std::fs::read(build_file)?;

        let mut archive_data = Vec::new();
        {
            let encoder = GzEncoder::new(&mut archive_data, Compression::default());
            let mut tar = Builder::new(encoder);
            tar.follow_symlinks(false);

            tar.append_dir_all(".", module_path)?;

            let mut header = tar::Header::new_gnu();
            header.set_path("Dockerfile")?;
            header.set_size(build_file_content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            tar.append(&header, &build_file_content[..])?;

            tar.into_inner()?.finish()?;
        }

        tracing::debug!(bytes = archive_data.len(), "Build context created");
        Self::check_context_size(archive_data.len());

        Ok(archive_data)
    }

    fn check_context_size(size: usize) {
        const MAX_CONTEXT_SIZE: usize = 500 * 1024 * 1024; // 500MB

        if size > MAX_CONTEXT_SIZE {
            tracing::warn!(
                size_mb = size / 1024 / 1024,
                "Build context is very large; consider a .dockerignore"
            );
        }
    }
}
