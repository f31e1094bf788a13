use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

pub struct TestProject {
    pub root: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        Self { root }
    }

    /// `<root>/<name>/Dockerfile` を作る
    pub fn write_module(&self, name: &str, dockerfile: &str) {
        let dir = self.root.path().join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("Dockerfile"), dockerfile).unwrap();
    }

    /// `<root>/<name>/build.yml` を書く
    #[allow(dead_code)]
    pub fn write_build_yml(&self, name: &str, content: &str) {
        let dir = self.root.path().join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("build.yml"), content).unwrap();
    }

    pub fn path(&self) -> PathBuf {
        self.root.path().to_path_buf()
    }
}

/// `r/img` の master variant（`X=1`）を持つモジュール `m`
#[allow(dead_code)]
pub fn sample_project() -> TestProject {
    let project = TestProject::new();
    project.write_module("m", "FROM alpine:3.19\nARG REBUILD_DEPS=0\nRUN echo deps\n");
    project.write_build_yml(
        "m",
        "repository: r/img\nvariants:\n  - tag: master\n    args:\n      X: \"1\"\n",
    );
    project
}
