//! リビルドチェックポイント
//!
//! Dockerfile の `ARG REBUILD_<NAME>` をチェックポイントとして扱う。
//! `@name` で指定されたチェックポイントの引数に毎回異なる値を渡すことで、
//! その位置以降のビルドキャッシュを無効にする。

use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};

/// `ARG` 命令（大文字小文字は区別しない）
static RE_ARG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^\s*ARG\s+(.+)$").unwrap());

/// `REBUILD_<NAME>` または `REBUILD_<NAME>=default`
static RE_CHECKPOINT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(REBUILD_([A-Z0-9_]+))(=.*)?$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildCheckpoint {
    /// `@name` で指定する名前（小文字）
    pub name: String,
    /// Dockerfile で宣言された引数名
    pub declared_arg: String,
}

/// Dockerfile の論理行。`\` による継続行は連結する
fn logical_lines(content: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for line in content.lines() {
        let trimmed = line.trim_end();
        if current.is_empty() && trimmed.trim_start().starts_with('#') {
            continue;
        }
        match trimmed.strip_suffix('\\') {
            Some(head) => {
                current.push_str(head);
                current.push(' ');
            }
            None => {
                current.push_str(trimmed);
                lines.push(std::mem::take(&mut current));
            }
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }

    lines
}

/// チェックポイントをファイル内の順に抽出
///
/// マルチステージで同じ引数が複数回宣言されていても1つにまとめる。
pub fn scan(build_file: &str) -> Vec<RebuildCheckpoint> {
    let mut seen = BTreeSet::new();
    let mut checkpoints = Vec::new();

    for line in logical_lines(build_file) {
        let Some(caps) = RE_ARG.captures(&line) else {
            continue;
        };

        for declaration in caps[1].split_whitespace() {
            if let Some(caps) = RE_CHECKPOINT.captures(declaration) {
                let declared_arg = caps[1].to_string();
                if seen.insert(declared_arg.clone()) {
                    checkpoints.push(RebuildCheckpoint {
                        name: caps[2].to_lowercase(),
                        declared_arg,
                    });
                }
            }
        }
    }

    checkpoints
}

/// キャッシュ無効化用の一意な値を生成する
///
/// 値は `<起動時刻>-<pid>-<連番>`。並行するユニット間でも重複しない。
#[derive(Debug)]
pub struct NonceSource {
    started: String,
    pid: u32,
    counter: AtomicU64,
}

impl NonceSource {
    pub fn new() -> Self {
        Self {
            started: chrono::Local::now().to_rfc3339(),
            pid: std::process::id(),
            counter: AtomicU64::new(0),
        }
    }

    pub fn next(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}-{}", self.started, self.pid, n)
    }
}

impl Default for NonceSource {
    fn default() -> Self {
        Self::new()
    }
}

fn requested<'a>(
    checkpoints: &'a [RebuildCheckpoint],
    target: &str,
) -> Option<&'a RebuildCheckpoint> {
    checkpoints
        .iter()
        .find(|c| c.name.eq_ignore_ascii_case(target))
}

/// 指定されたチェックポイントに対するビルド引数の上書き
///
/// 対応するチェックポイントが無いターゲットは無視する（[`missing_targets`] で確認できる）。
pub fn apply(
    checkpoints: &[RebuildCheckpoint],
    targets: &BTreeSet<String>,
    nonces: &NonceSource,
) -> BTreeMap<String, String> {
    targets
        .iter()
        .filter_map(|target| requested(checkpoints, target))
        .map(|checkpoint| (checkpoint.declared_arg.clone(), nonces.next()))
        .collect()
}

/// 対応するチェックポイントが宣言されていないターゲット
pub fn missing_targets<'a>(
    checkpoints: &[RebuildCheckpoint],
    targets: &'a BTreeSet<String>,
) -> Vec<&'a str> {
    targets
        .iter()
        .filter(|target| requested(checkpoints, target).is_none())
        .map(String::as_str)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCKERFILE: &str = r#"
FROM python:3.11 AS deps
ARG REBUILD_DEPS=1
# ARG REBUILD_COMMENTED=1
RUN pip install -r requirements.txt

FROM deps
arg REBUILD_APP REBUILD_DEPS=2 OTHER=3
ARG \
    REBUILD_ASSETS=0
ARG VERSION=1.0
"#;

    fn targets(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_scan_in_file_order() {
        let checkpoints = scan(DOCKERFILE);
        let names: Vec<&str> = checkpoints.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["deps", "app", "assets"]);
        assert_eq!(checkpoints[0].declared_arg, "REBUILD_DEPS");
        assert_eq!(checkpoints[1].declared_arg, "REBUILD_APP");
    }

    #[test]
    fn test_scan_empty() {
        assert!(scan("FROM alpine\nRUN echo hi\n").is_empty());
    }

    #[test]
    fn test_apply_requested_targets() {
        let checkpoints = scan(DOCKERFILE);
        let nonces = NonceSource::new();
        let overrides = apply(&checkpoints, &targets(&["deps", "ASSETS"]), &nonces);

        assert_eq!(overrides.len(), 2);
        assert!(overrides.contains_key("REBUILD_DEPS"));
        assert!(overrides.contains_key("REBUILD_ASSETS"));
        assert_ne!(overrides["REBUILD_DEPS"], overrides["REBUILD_ASSETS"]);
    }

    #[test]
    fn test_missing_target_is_skipped() {
        let checkpoints = scan(DOCKERFILE);
        let nonces = NonceSource::new();
        let requested = targets(&["app", "nope"]);

        let overrides = apply(&checkpoints, &requested, &nonces);
        assert_eq!(overrides.keys().collect::<Vec<_>>(), vec!["REBUILD_APP"]);
        assert_eq!(missing_targets(&checkpoints, &requested), vec!["nope"]);
    }

    #[test]
    fn test_nonces_unique_across_threads() {
        let nonces = NonceSource::new();
        let mut all: Vec<String> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| scope.spawn(|| (0..250).map(|_| nonces.next()).collect::<Vec<_>>()))
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        });

        let total = all.len();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), total);
    }
}
