//! コマンドライン引数の分類
//!
//! 動詞以外の引数にはフラグが付かないため、形と既知のモジュール名・variant 名
//! から種類を判定する。既知の名前は引数で受け取り、自分では探しに行かない。

use crate::error::Result;
use crate::tag::TagMutator;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

/// 定義済みの全 variant を意味するセレクタ
pub const ALL_VARIANTS: &str = "all";

static RE_REBUILD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^@([A-Za-z0-9_][A-Za-z0-9_.-]*)$").unwrap());

static RE_BUILD_ARG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z0-9_]+)=(.*)$").unwrap());

/// `KEY=VALUE`。`KEY=`（空の値）はキーを削除する
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildArgAssignment {
    pub key: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Module(String),
    Variant(String),
    AllVariants,
    Mutator(TagMutator),
    BuildArg(BuildArgAssignment),
    /// `@name`
    Rebuild(String),
}

/// 完全一致で判定できる名前
#[derive(Debug, Clone, Copy)]
pub struct KnownNames<'a> {
    pub modules: &'a BTreeSet<String>,
    pub variants: &'a BTreeSet<String>,
}

/// トークンを1つ分類
///
/// 判定順: 追加マーカー、`@rebuild`、`KEY=VALUE`、モジュール名、
/// variant 名（`all` を含む）、タグ式。
pub fn classify_token(token: &str, known: KnownNames<'_>) -> Result<Token> {
    if token == "+" {
        return Ok(Token::Mutator(TagMutator::Append));
    }

    if let Some(caps) = RE_REBUILD.captures(token) {
        return Ok(Token::Rebuild(caps[1].to_string()));
    }

    if let Some(caps) = RE_BUILD_ARG.captures(token) {
        let value = &caps[2];
        return Ok(Token::BuildArg(BuildArgAssignment {
            key: caps[1].to_string(),
            value: (!value.is_empty()).then(|| value.to_string()),
        }));
    }

    if known.modules.contains(token) {
        return Ok(Token::Module(token.to_string()));
    }

    if token == ALL_VARIANTS {
        return Ok(Token::AllVariants);
    }

    if known.variants.contains(token) {
        return Ok(Token::Variant(token.to_string()));
    }

    TagMutator::parse(token).map(Token::Mutator)
}

/// すべて分類する。認識できないトークンがあればそこで中断
pub fn classify<S: AsRef<str>>(tokens: &[S], known: KnownNames<'_>) -> Result<Vec<Token>> {
    tokens
        .iter()
        .map(|token| classify_token(token.as_ref(), known))
        .collect()
}

/// `tokens` に含まれるモジュール名（初出順）
///
/// 2回目の分類で使う variant 名を集める前に、対象モジュールを確定させるために使う。
pub fn select_modules<S: AsRef<str>>(tokens: &[S], modules: &BTreeSet<String>) -> Vec<String> {
    let mut selected: Vec<String> = Vec::new();
    for token in tokens {
        let token = token.as_ref();
        if modules.contains(token) && !selected.iter().any(|m| m == token) {
            selected.push(token.to_string());
        }
    }
    selected
}

/// ビルドする variant の選択
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum VariantSelection {
    /// variant の指定なし
    #[default]
    Default,
    All,
    Named(BTreeSet<String>),
}

impl VariantSelection {
    pub fn is_default(&self) -> bool {
        matches!(self, VariantSelection::Default)
    }

    fn add(&mut self, name: String) {
        match self {
            VariantSelection::All => {}
            VariantSelection::Named(names) => {
                names.insert(name);
            }
            VariantSelection::Default => {
                *self = VariantSelection::Named(BTreeSet::from([name]));
            }
        }
    }
}

/// 1回の呼び出しの引数を種類ごとにまとめたもの
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    pub modules: Vec<String>,
    pub variants: VariantSelection,
    /// コマンドライン順。順序に意味がある
    pub mutators: Vec<TagMutator>,
    /// コマンドライン順。同じキーは後勝ち
    pub build_args: Vec<BuildArgAssignment>,
    pub rebuild_targets: BTreeSet<String>,
}

impl Invocation {
    pub fn parse<S: AsRef<str>>(tokens: &[S], known: KnownNames<'_>) -> Result<Self> {
        Ok(Self::from_tokens(classify(tokens, known)?))
    }

    pub fn from_tokens(tokens: Vec<Token>) -> Self {
        let mut invocation = Invocation::default();

        for token in tokens {
            match token {
                Token::Module(module) => {
                    if !invocation.modules.contains(&module) {
                        invocation.modules.push(module);
                    }
                }
                Token::Variant(name) => invocation.variants.add(name),
                Token::AllVariants => invocation.variants = VariantSelection::All,
                Token::Mutator(mutator) => invocation.mutators.push(mutator),
                Token::BuildArg(assignment) => invocation.build_args.push(assignment),
                Token::Rebuild(target) => {
                    invocation.rebuild_targets.insert(target);
                }
            }
        }

        invocation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DockyardError;
    use crate::tag::{RegistryUpdate, TagPatch};

    fn names(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn classify_one(token: &str) -> Result<Token> {
        let modules = names(&["api", "log-agent"]);
        let variants = names(&["master", "1.2.0"]);
        classify_token(
            token,
            KnownNames {
                modules: &modules,
                variants: &variants,
            },
        )
    }

    #[test]
    fn test_classify_module() {
        assert_eq!(classify_one("api").unwrap(), Token::Module("api".into()));
        assert_eq!(
            classify_one("log-agent").unwrap(),
            Token::Module("log-agent".into())
        );
    }

    #[test]
    fn test_classify_variant() {
        assert_eq!(
            classify_one("master").unwrap(),
            Token::Variant("master".into())
        );
        assert_eq!(classify_one("all").unwrap(), Token::AllVariants);
        // ドットを含む variant 名はレジストリより優先
        assert_eq!(
            classify_one("1.2.0").unwrap(),
            Token::Variant("1.2.0".into())
        );
    }

    #[test]
    fn test_classify_build_arg() {
        assert_eq!(
            classify_one("VERSION=1.0").unwrap(),
            Token::BuildArg(BuildArgAssignment {
                key: "VERSION".into(),
                value: Some("1.0".into())
            })
        );
        assert_eq!(
            classify_one("URL=http://x?a=b").unwrap(),
            Token::BuildArg(BuildArgAssignment {
                key: "URL".into(),
                value: Some("http://x?a=b".into())
            })
        );
        assert_eq!(
            classify_one("VERSION=").unwrap(),
            Token::BuildArg(BuildArgAssignment {
                key: "VERSION".into(),
                value: None
            })
        );
    }

    #[test]
    fn test_classify_rebuild() {
        assert_eq!(
            classify_one("@deps").unwrap(),
            Token::Rebuild("deps".into())
        );
    }

    #[test]
    fn test_classify_mutators() {
        assert_eq!(
            classify_one("+").unwrap(),
            Token::Mutator(TagMutator::Append)
        );
        assert_eq!(
            classify_one(":testing").unwrap(),
            Token::Mutator(TagMutator::Patch(TagPatch {
                tag: Some("testing".into()),
                ..Default::default()
            }))
        );
        assert_eq!(
            classify_one("registry.x.com:1234").unwrap(),
            Token::Mutator(TagMutator::Patch(TagPatch {
                registry: RegistryUpdate::Set("registry.x.com:1234".into()),
                ..Default::default()
            }))
        );
    }

    #[test]
    fn test_classify_unrecognized() {
        for token in ["bogus", "@", "=value", "a/b/c"] {
            match classify_one(token) {
                Err(DockyardError::UnrecognizedToken { token: t }) => assert_eq!(t, token),
                other => panic!("expected UnrecognizedToken for {}, got {:?}", token, other),
            }
        }
    }

    #[test]
    fn test_classify_aborts_on_first_error() {
        let modules = names(&["api"]);
        let variants = BTreeSet::new();
        let known = KnownNames {
            modules: &modules,
            variants: &variants,
        };
        let result = classify(&["api", ":ok", "nope", ":never"], known);
        assert!(matches!(
            result,
            Err(DockyardError::UnrecognizedToken { token }) if token == "nope"
        ));
    }

    #[test]
    fn test_select_modules_preserves_order() {
        let modules = names(&["api", "web", "db"]);
        let selected = select_modules(&["web", ":x", "api", "web"], &modules);
        assert_eq!(selected, vec!["web".to_string(), "api".to_string()]);
    }

    #[test]
    fn test_invocation_grouping() {
        let modules = names(&["api"]);
        let variants = names(&["master", "stable"]);
        let known = KnownNames {
            modules: &modules,
            variants: &variants,
        };
        let invocation = Invocation::parse(
            &["api", "master", "my-user/", "+", "X=1", "@deps", "stable", "X="],
            known,
        )
        .unwrap();

        assert_eq!(invocation.modules, vec!["api".to_string()]);
        assert_eq!(
            invocation.variants,
            VariantSelection::Named(names(&["master", "stable"]))
        );
        assert_eq!(invocation.mutators.len(), 2);
        assert!(invocation.mutators[1].is_append());
        assert_eq!(invocation.build_args.len(), 2);
        assert_eq!(invocation.rebuild_targets, names(&["deps"]));
    }

    #[test]
    fn test_all_absorbs_named_variants() {
        let modules = BTreeSet::new();
        let variants = names(&["master"]);
        let known = KnownNames {
            modules: &modules,
            variants: &variants,
        };
        let invocation = Invocation::parse(&["master", "all", "master"], known).unwrap();
        assert_eq!(invocation.variants, VariantSelection::All);
    }
}
