//! モジュールごとのビルド設定
//!
//! `build.yml` はまず緩い型の構造体にデシリアライズし、その後
//! [`ModuleConfig`] へ検証する。YAML の構文エラーと内容の誤りは別のエラーになる。

use crate::error::{DockyardError, Result};
use crate::tag::{Tag, TagMutator, is_registry};
use serde::Deserialize;
use serde_yaml::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Deserialize)]
struct RawModuleConfig {
    repository: Option<String>,
    #[serde(default)]
    args: BTreeMap<String, Value>,
    #[serde(default)]
    variants: Vec<RawVariant>,
}

#[derive(Debug, Deserialize)]
struct RawVariant {
    tag: Value,
    #[serde(default)]
    aliases: Vec<Value>,
    #[serde(default)]
    args: BTreeMap<String, Value>,
    repository: Option<String>,
}

/// 検証済みの `build.yml`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleConfig {
    pub repository: Option<Tag>,
    /// モジュール共通のビルド引数。variant の args で上書きされる
    pub args: BTreeMap<String, String>,
    pub variants: Vec<Variant>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    /// モジュール内で一意。`tag` と同じ文字列
    pub name: String,
    pub repository: Option<Tag>,
    pub tag: String,
    pub aliases: Vec<Alias>,
    pub build_args: BTreeMap<String, String>,
}

/// variant の別名タグ。タグ式の列で書く
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alias {
    pub text: String,
    pub chain: Vec<TagMutator>,
}

impl Alias {
    /// エイリアスをパース
    ///
    /// 式は空白区切り。レジストリでもパスでもない単語は tag として読むので、
    /// `latest` は `:latest` と同じ意味になる。
    pub fn parse(text: &str) -> std::result::Result<Alias, String> {
        let mut chain = Vec::new();
        for part in text.split_whitespace() {
            let expression = if is_bare_word(part) {
                format!(":{}", part)
            } else {
                part.to_string()
            };

            match TagMutator::parse(&expression) {
                Ok(TagMutator::Append) => {
                    return Err(format!("エイリアス '{}' に '+' は使えません", text));
                }
                Ok(mutator) => chain.push(mutator),
                Err(_) => return Err(format!("エイリアスのタグ式が不正です: '{}'", part)),
            }
        }

        if chain.is_empty() {
            return Err("エイリアスが空です".to_string());
        }

        Ok(Alias {
            text: text.to_string(),
            chain,
        })
    }

    /// tag だけを変えるエイリアスなら、その名前で variant を選択できる
    pub fn selector(&self) -> Option<&str> {
        match self.chain.as_slice() {
            [TagMutator::Patch(patch)] => patch.tag_only(),
            _ => None,
        }
    }
}

fn is_bare_word(part: &str) -> bool {
    !part.starts_with(':')
        && !part.contains('/')
        && part != "+"
        && !is_registry(part)
}

impl Variant {
    /// tag 名か tag のみのエイリアスで選択されるか
    pub fn answers_to(&self, selector: &str) -> bool {
        self.name == selector || self.aliases.iter().any(|a| a.selector() == Some(selector))
    }
}

impl ModuleConfig {
    /// `build.yml` の内容をパースして検証する。`path` はエラー表示にのみ使う
    pub fn from_yaml(content: &str, path: &Path) -> Result<ModuleConfig> {
        // 空のドキュメントは何も設定していない扱い
        let raw: RawModuleConfig = if content.trim().is_empty() {
            RawModuleConfig::default()
        } else {
            serde_yaml::from_str(content).map_err(|e| DockyardError::ConfigParse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
        };

        Self::validate(raw, path)
    }

    fn validate(raw: RawModuleConfig, path: &Path) -> Result<ModuleConfig> {
        let invalid = |message: String| DockyardError::InvalidConfig {
            path: path.to_path_buf(),
            message,
        };

        let repository = raw
            .repository
            .as_deref()
            .map(|r| parse_repository(r, "repository").map_err(&invalid))
            .transpose()?;

        let args = scalar_map(raw.args, "args").map_err(&invalid)?;

        let mut seen = BTreeSet::new();
        let mut variants = Vec::with_capacity(raw.variants.len());
        for (index, raw_variant) in raw.variants.into_iter().enumerate() {
            let field = format!("variants[{}]", index);

            let tag = scalar(&raw_variant.tag)
                .filter(|t| !t.is_empty())
                .ok_or_else(|| invalid(format!("{}.tag は空でない文字列が必要です", field)))?;
            if TagMutator::parse(&format!(":{}", tag)).is_err() {
                return Err(invalid(format!("{}.tag '{}' はタグとして不正です", field, tag)));
            }
            if !seen.insert(tag.clone()) {
                return Err(invalid(format!("variant '{}' が重複しています", tag)));
            }

            let repository = raw_variant
                .repository
                .as_deref()
                .map(|r| parse_repository(r, &format!("{}.repository", field)).map_err(&invalid))
                .transpose()?;

            let mut aliases = Vec::with_capacity(raw_variant.aliases.len());
            for alias in &raw_variant.aliases {
                let text = scalar(alias)
                    .ok_or_else(|| invalid(format!("{}.aliases は文字列のリストが必要です", field)))?;
                let alias = Alias::parse(&text)
                    .map_err(|e| invalid(format!("{}.aliases: {}", field, e)))?;
                aliases.push(alias);
            }

            let build_args =
                scalar_map(raw_variant.args, &format!("{}.args", field)).map_err(&invalid)?;

            variants.push(Variant {
                name: tag.clone(),
                repository,
                tag,
                aliases,
                build_args,
            });
        }

        Ok(ModuleConfig {
            repository,
            args,
            variants,
        })
    }

    /// variant を選択できる名前すべて（tag と tag のみのエイリアス）
    pub fn variant_names(&self) -> impl Iterator<Item = &str> {
        self.variants.iter().flat_map(|v| {
            std::iter::once(v.name.as_str()).chain(v.aliases.iter().filter_map(Alias::selector))
        })
    }

    pub fn variant(&self, selector: &str) -> Option<&Variant> {
        self.variants
            .iter()
            .find(|v| v.name == selector)
            .or_else(|| self.variants.iter().find(|v| v.answers_to(selector)))
    }
}

fn parse_repository(text: &str, field: &str) -> std::result::Result<Tag, String> {
    Tag::parse(text).ok_or_else(|| format!("{} '{}' はリポジトリとして不正です", field, text))
}

/// YAML のスカラーをビルド引数の文字列にする。`1` や `true` もクォートなしで可
fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn scalar_map(
    raw: BTreeMap<String, Value>,
    field: &str,
) -> std::result::Result<BTreeMap<String, String>, String> {
    raw.into_iter()
        .map(|(key, value)| match value {
            Value::Null => Ok((key, String::new())),
            other => scalar(&other)
                .map(|v| (key.clone(), v))
                .ok_or_else(|| format!("{}.{} はスカラー値が必要です", field, key)),
        })
        .collect()
}

/// モジュールディレクトリと（あれば）その設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    pub name: String,
    pub path: PathBuf,
    pub build_file: PathBuf,
    /// `build.yml` が無ければ `None`
    pub config: Option<ModuleConfig>,
}

impl Module {
    /// ファイルシステムに触れずに計画を立てるための、仮のパスを持つモジュール
    pub fn with_config(name: &str, config: Option<ModuleConfig>) -> Module {
        Module {
            name: name.to_string(),
            path: PathBuf::from(name),
            build_file: PathBuf::from(name).join(crate::BUILD_FILE),
            config,
        }
    }
}
