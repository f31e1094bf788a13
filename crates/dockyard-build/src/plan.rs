//! 実行計画
//!
//! 解決済みのビルド単位に、モジュールのパスとリビルドチェックポイントの
//! 上書きを加えて、実行者に渡す [`Job`] を作る。

use crate::event::UnitId;
use dockyard_core::rebuild::{self, RebuildCheckpoint};
use dockyard_core::{BuildUnit, Module, NonceSource, Tag, read_build_file};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use tracing::{debug, warn};

/// 実行者に渡す1件の作業
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: UnitId,
    pub unit: BuildUnit,
    pub module_path: PathBuf,
    pub build_file: PathBuf,
    /// チェックポイントの上書きを反映した最終的なビルド引数
    pub build_args: BTreeMap<String, String>,
}

impl Job {
    pub fn primary_tag(&self) -> &Tag {
        self.unit.primary_tag()
    }

    pub fn extra_tags(&self) -> &[Tag] {
        self.unit.extra_tags()
    }

    pub fn tags(&self) -> &[Tag] {
        &self.unit.tags
    }

    pub fn label(&self) -> String {
        self.unit.label()
    }
}

/// ビルド単位ごとに Job を作る
///
/// `@target` が指定されたビルド単位についてだけ Dockerfile を読む。
/// 対応するチェックポイントが無いターゲットは警告して無視する。
pub fn plan_jobs(
    modules: &[Module],
    units: Vec<BuildUnit>,
    nonces: &NonceSource,
) -> dockyard_core::Result<Vec<Job>> {
    let by_name: HashMap<&str, &Module> = modules.iter().map(|m| (m.name.as_str(), m)).collect();
    let mut checkpoints: HashMap<String, Vec<RebuildCheckpoint>> = HashMap::new();

    let mut jobs = Vec::with_capacity(units.len());
    for (id, unit) in units.into_iter().enumerate() {
        let module = by_name
            .get(unit.module.as_str())
            .copied()
            .ok_or_else(|| dockyard_core::DockyardError::ModuleNotFound(unit.module.clone()))?;

        let mut build_args = unit.build_args.clone();
        if !unit.rebuild_targets.is_empty() {
            if !checkpoints.contains_key(&module.name) {
                let found = rebuild::scan(&read_build_file(module)?);
                debug!(module = %module.name, count = found.len(), "Scanned rebuild checkpoints");
                checkpoints.insert(module.name.clone(), found);
            }
            let declared = &checkpoints[&module.name];

            for target in rebuild::missing_targets(declared, &unit.rebuild_targets) {
                warn!(
                    module = %module.name,
                    target = %target,
                    "No REBUILD_ checkpoint for rebuild target, building without it"
                );
            }
            build_args.extend(rebuild::apply(declared, &unit.rebuild_targets, nonces));
        }

        jobs.push(Job {
            id,
            module_path: module.path.clone(),
            build_file: module.build_file.clone(),
            build_args,
            unit,
        });
    }

    Ok(jobs)
}
