//! ビルド計画の解決
//!
//! モジュール設定・選択された variant・タグ書き換え・ビルド引数から
//! [`BuildUnit`] の列を作る。入力が同じなら結果も常に同じになる純粋関数。

use crate::config::{Module, ModuleConfig, Variant};
use crate::error::{DockyardError, Result};
use crate::tag::{Tag, TagMutator};
use crate::token::{BuildArgAssignment, VariantSelection};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::debug;

/// 解決の入力のうち、モジュールに依存しないもの
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveRequest {
    pub variants: VariantSelection,
    pub mutators: Vec<TagMutator>,
    /// コマンドラインの `KEY=VALUE`（順序どおり）
    pub build_args: Vec<BuildArgAssignment>,
    /// 最も優先度の低いビルド引数（プロキシ設定など）
    pub default_args: BTreeMap<String, String>,
    pub rebuild_targets: BTreeSet<String>,
}

/// 実行単位
///
/// `tags` は空にならず、すべて完全なタグ。先頭がビルド時に使うタグになる。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildUnit {
    pub module: String,
    pub variant: Option<String>,
    pub tags: Vec<Tag>,
    pub build_args: BTreeMap<String, String>,
    pub rebuild_targets: BTreeSet<String>,
}

impl BuildUnit {
    pub fn primary_tag(&self) -> &Tag {
        &self.tags[0]
    }

    pub fn extra_tags(&self) -> &[Tag] {
        &self.tags[1..]
    }

    /// `module` または `module:variant`
    pub fn label(&self) -> String {
        match &self.variant {
            Some(variant) => format!("{}:{}", self.module, variant),
            None => self.module.clone(),
        }
    }
}

/// 書き換えの途中状態
///
/// `committed` は `+` で確定した出力先、`branch` は現在書き換え中のタグ集合。
/// ベースが空のとき、`branch` は最初の書き換えで空のタグから始まる。
#[derive(Debug, Clone)]
struct WorkingSet {
    committed: Vec<Tag>,
    branch: Vec<Tag>,
}

impl WorkingSet {
    fn new(base: &[Tag]) -> Self {
        Self {
            committed: Vec::new(),
            branch: base.to_vec(),
        }
    }

    fn step(mut self, mutator: &TagMutator, base: &[Tag]) -> Self {
        match mutator {
            TagMutator::Append => {
                self.committed.append(&mut self.branch);
                self.branch = base.to_vec();
            }
            TagMutator::Patch(patch) if self.branch.is_empty() => {
                self.branch = vec![Tag::default().apply(patch)];
            }
            TagMutator::Patch(patch) => {
                self.branch = self.branch.iter().map(|tag| tag.apply(patch)).collect();
            }
        }
        self
    }

    fn finish(mut self) -> Vec<Tag> {
        self.committed.append(&mut self.branch);
        dedup_in_order(self.committed)
    }
}

fn dedup_in_order(tags: Vec<Tag>) -> Vec<Tag> {
    let mut seen = HashSet::new();
    tags.into_iter()
        .filter(|tag| seen.insert(tag.clone()))
        .collect()
}

/// タグ集合に書き換えを左から順に適用する
///
/// 通常の書き換えは直前の結果を置き換える。`+` はそれまでの結果を確定させ、
/// 以降の書き換えを元の `base` から始め直す。結果は確定分と最後の分の和集合。
pub fn apply_mutators(base: &[Tag], mutators: &[TagMutator]) -> Vec<Tag> {
    mutators
        .iter()
        .fold(WorkingSet::new(base), |set, mutator| set.step(mutator, base))
        .finish()
}

/// variant の基本タグ集合: 本来のタグと各エイリアス
pub fn variant_tags(config: &ModuleConfig, variant: &Variant) -> Vec<Tag> {
    let repository = variant
        .repository
        .as_ref()
        .or(config.repository.as_ref())
        .cloned()
        .unwrap_or_default();

    let primary = Tag {
        tag: Some(variant.tag.clone()),
        ..repository
    };

    let mut tags = vec![primary.clone()];
    for alias in &variant.aliases {
        // エイリアスに `+` は含まれない
        let tag = alias.chain.iter().fold(primary.clone(), |tag, mutator| match mutator {
            TagMutator::Patch(patch) => tag.apply(patch),
            TagMutator::Append => tag,
        });
        tags.push(tag);
    }
    dedup_in_order(tags)
}

/// 選択されたモジュールの variant 名（エイリアス名を含む）
pub fn variant_names(modules: &[Module]) -> BTreeSet<String> {
    modules
        .iter()
        .filter_map(|m| m.config.as_ref())
        .flat_map(|c| c.variant_names().map(str::to_string))
        .collect()
}

/// 優先度の低い順に重ねたビルド引数。値が `None` の代入はキーを消す
fn merge_build_args(
    request: &ResolveRequest,
    module_args: Option<&BTreeMap<String, String>>,
    variant_args: Option<&BTreeMap<String, String>>,
) -> BTreeMap<String, String> {
    let mut args = request.default_args.clone();
    for layer in [module_args, variant_args].into_iter().flatten() {
        args.extend(layer.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    for assignment in &request.build_args {
        match &assignment.value {
            Some(value) => {
                args.insert(assignment.key.clone(), value.clone());
            }
            None => {
                args.remove(&assignment.key);
            }
        }
    }
    args
}

/// 選択に一致する variant（宣言順）
fn selected_variants<'a>(
    module: &Module,
    config: &'a ModuleConfig,
    selection: &VariantSelection,
) -> Result<Vec<&'a Variant>> {
    if config.variants.is_empty() {
        return Err(DockyardError::NoVariants {
            module: module.name.clone(),
        });
    }

    match selection {
        VariantSelection::Default => Ok(Vec::new()),
        VariantSelection::All => Ok(config.variants.iter().collect()),
        VariantSelection::Named(names) => {
            if let Some(unknown) = names.iter().find(|n| config.variant(n).is_none()) {
                return Err(DockyardError::UnknownVariant {
                    module: module.name.clone(),
                    variant: unknown.clone(),
                });
            }
            Ok(config
                .variants
                .iter()
                .filter(|v| names.iter().any(|n| v.answers_to(n)))
                .collect())
        }
    }
}

fn unit(
    module: &Module,
    variant: Option<&Variant>,
    base: Vec<Tag>,
    build_args: BTreeMap<String, String>,
    request: &ResolveRequest,
) -> Result<BuildUnit> {
    let tags = apply_mutators(&base, &request.mutators);
    if tags.is_empty() {
        return Err(DockyardError::UnresolvedTag {
            module: module.name.clone(),
            variant: variant.map(|v| v.name.clone()),
            tag: "(none)".to_string(),
        });
    }

    if let Some(incomplete) = tags.iter().find(|t| !t.is_complete()) {
        return Err(DockyardError::UnresolvedTag {
            module: module.name.clone(),
            variant: variant.map(|v| v.name.clone()),
            tag: incomplete.full(),
        });
    }

    Ok(BuildUnit {
        module: module.name.clone(),
        variant: variant.map(|v| v.name.clone()),
        tags,
        build_args,
        rebuild_targets: request.rebuild_targets.clone(),
    })
}

/// モジュールごとに variant を展開し、ビルド単位の列を作る
///
/// 設定の無いモジュールは1つだけで呼び出す必要がある。計画のどこかで
/// 失敗すれば、ビルド単位は1つも返さない。
pub fn resolve(modules: &[Module], request: &ResolveRequest) -> Result<Vec<BuildUnit>> {
    if modules.len() > 1 && modules.iter().any(|m| m.config.is_none()) {
        return Err(DockyardError::AmbiguousModuleSet {
            modules: modules.iter().map(|m| m.name.clone()).collect(),
        });
    }

    let mut units = Vec::new();
    for module in modules {
        let Some(config) = &module.config else {
            if !request.variants.is_default() {
                return Err(DockyardError::NoVariants {
                    module: module.name.clone(),
                });
            }
            let args = merge_build_args(request, None, None);
            units.push(unit(module, None, Vec::new(), args, request)?);
            continue;
        };

        if request.variants.is_default() {
            let base = config.repository.clone().unwrap_or_default();
            let args = merge_build_args(request, Some(&config.args), None);
            units.push(unit(module, None, vec![base], args, request)?);
            continue;
        }

        for variant in selected_variants(module, config, &request.variants)? {
            let base = variant_tags(config, variant);
            let args = merge_build_args(request, Some(&config.args), Some(&variant.build_args));
            units.push(unit(module, Some(variant), base, args, request)?);
        }
    }

    debug!(unit_count = units.len(), "Resolved build units");
    Ok(units)
}
