//! イメージ参照とその書き換え
//!
//! [`Tag`] は部分的でもよく、4つのフィールドはどれも未設定になりうる。
//! コマンドラインと variant の `aliases` は [`TagMutator`] の列を表し、
//! ベースのタグに左から順に適用される。

use crate::error::{DockyardError, Result};
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

/// namespace / image / tag の各要素
static RE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]*$").unwrap());

/// ポート付きも可のレジストリホスト (例: `registry.example.com:5000`)
static RE_REGISTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_-]*(\.[A-Za-z0-9_-]+)*(:[0-9]+)?$").unwrap()
});

/// ドットかポートを含むセグメントだけをレジストリとみなす
///
/// `myuser/app` の `myuser` は namespace、`registry.example.com/app` と
/// `localhost:5000/app` の先頭はレジストリ。
pub fn is_registry(segment: &str) -> bool {
    RE_REGISTRY.is_match(segment) && (segment.contains('.') || segment.contains(':'))
}

fn name(segment: &str) -> Option<String> {
    RE_NAME.is_match(segment).then(|| segment.to_string())
}

/// `image` または `image:tag`
fn image_and_tag(segment: &str) -> Option<(String, Option<String>)> {
    match segment.split_once(':') {
        Some((image, tag)) => Some((name(image)?, Some(name(tag)?))),
        None => Some((name(segment)?, None)),
    }
}

/// 部分的なこともあるイメージ参照
///
/// 未設定の `registry`/`namespace` は Docker Hub のデフォルトで補完せず、
/// 未設定のまま保持する。
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Tag {
    pub registry: Option<String>,
    pub namespace: Option<String>,
    pub image: Option<String>,
    pub tag: Option<String>,
}

impl Tag {
    /// `build.yml` に書かれたリポジトリ文字列をパース
    ///
    /// `image`, `namespace/image`, `registry/image`, `registry/namespace/image`
    /// を受け付ける。いずれも `:tag` を付けられる。
    pub fn parse(text: &str) -> Option<Tag> {
        let sections: Vec<&str> = text.split('/').collect();
        let (registry, namespace, last) = match sections.as_slice() {
            [last] => (None, None, *last),
            [first, last] if is_registry(first) => (Some(*first), None, *last),
            [first, last] => (None, Some(*first), *last),
            [registry, namespace, last] if is_registry(registry) => {
                (Some(*registry), Some(*namespace), *last)
            }
            _ => return None,
        };

        let namespace = match namespace {
            Some(ns) => Some(name(ns)?),
            None => None,
        };
        let (image, tag) = image_and_tag(last)?;

        Some(Tag {
            registry: registry.map(str::to_string),
            namespace,
            image: Some(image),
            tag,
        })
    }

    /// ビルドとプッシュに必要な image と tag が揃っているか
    pub fn is_complete(&self) -> bool {
        self.image.is_some() && self.tag.is_some()
    }

    /// 未設定の要素を飛ばした `registry/namespace/image`
    ///
    /// レジストリの `:443` は表示しない。
    pub fn repository(&self) -> String {
        let mut parts = Vec::with_capacity(3);
        if let Some(registry) = &self.registry {
            let host = match registry.split_once(':') {
                Some((host, "443")) => host,
                _ => registry.as_str(),
            };
            parts.push(host);
        }
        if let Some(namespace) = &self.namespace {
            parts.push(namespace);
        }
        parts.push(self.image.as_deref().unwrap_or("<image>"));
        parts.join("/")
    }

    /// `repository:tag`（tag が無ければリポジトリのみ）
    pub fn full(&self) -> String {
        match &self.tag {
            Some(tag) => format!("{}:{}", self.repository(), tag),
            None => self.repository(),
        }
    }

    /// `patch` が指定するフィールドだけを上書き
    pub fn apply(&self, patch: &TagPatch) -> Tag {
        let registry = match &patch.registry {
            RegistryUpdate::Keep => self.registry.clone(),
            RegistryUpdate::Set(registry) => Some(registry.clone()),
            RegistryUpdate::Clear => None,
        };

        Tag {
            registry,
            namespace: patch.namespace.clone().or_else(|| self.namespace.clone()),
            image: patch.image.clone().or_else(|| self.image.clone()),
            tag: patch.tag.clone().or_else(|| self.tag.clone()),
        }
    }

    /// `other` の設定済みフィールドを重ねる
    pub fn merge(&self, other: &Tag) -> Tag {
        Tag {
            registry: other.registry.clone().or_else(|| self.registry.clone()),
            namespace: other.namespace.clone().or_else(|| self.namespace.clone()),
            image: other.image.clone().or_else(|| self.image.clone()),
            tag: other.tag.clone().or_else(|| self.tag.clone()),
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full())
    }
}

/// パッチがレジストリに対して行う操作
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum RegistryUpdate {
    #[default]
    Keep,
    Set(String),
    /// `namespace/image:tag` は Docker Hub のイメージを指すのでレジストリを外す
    Clear,
}

/// 1つの書き換えが設定するフィールド。未設定のものは変更しない
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TagPatch {
    pub registry: RegistryUpdate,
    pub namespace: Option<String>,
    pub image: Option<String>,
    pub tag: Option<String>,
}

impl TagPatch {
    /// `self` の後に `next` を適用するのと等価な1つのパッチ
    pub fn then(&self, next: &TagPatch) -> TagPatch {
        let registry = match &next.registry {
            RegistryUpdate::Keep => self.registry.clone(),
            other => other.clone(),
        };

        TagPatch {
            registry,
            namespace: next.namespace.clone().or_else(|| self.namespace.clone()),
            image: next.image.clone().or_else(|| self.image.clone()),
            tag: next.tag.clone().or_else(|| self.tag.clone()),
        }
    }

    /// `:latest` のように tag だけを設定するパッチか
    pub fn tag_only(&self) -> Option<&str> {
        match self {
            TagPatch {
                registry: RegistryUpdate::Keep,
                namespace: None,
                image: None,
                tag: Some(tag),
            } => Some(tag.as_str()),
            _ => None,
        }
    }
}

/// コマンドラインのタグ式
///
/// ```text
/// :tag                          tag
/// /image                        image
/// /image:tag                    image, tag
/// namespace/                    namespace
/// namespace/image               namespace, image
/// namespace/image:tag           namespace, image, tag（レジストリは解除）
/// registry.example.com:5000     registry
/// registry/namespace            registry, namespace
/// registry/namespace/image      registry, namespace, image
/// registry/namespace/image:tag  registry, namespace, image, tag
/// +                             追加マーカー
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TagMutator {
    /// 元のベースタグから新しい出力先を始める
    Append,
    Patch(TagPatch),
}

impl TagMutator {
    pub fn parse(token: &str) -> Result<TagMutator> {
        if token == "+" {
            return Ok(TagMutator::Append);
        }

        parse_patch(token)
            .map(TagMutator::Patch)
            .ok_or_else(|| DockyardError::UnrecognizedToken {
                token: token.to_string(),
            })
    }

    pub fn is_append(&self) -> bool {
        matches!(self, TagMutator::Append)
    }
}

impl FromStr for TagMutator {
    type Err = DockyardError;

    fn from_str(s: &str) -> Result<Self> {
        TagMutator::parse(s)
    }
}

fn parse_patch(token: &str) -> Option<TagPatch> {
    if let Some(tag) = token.strip_prefix(':') {
        return Some(TagPatch {
            tag: Some(name(tag)?),
            ..Default::default()
        });
    }

    if let Some(rest) = token.strip_prefix('/') {
        let (image, tag) = image_and_tag(rest)?;
        return Some(TagPatch {
            image: Some(image),
            tag,
            ..Default::default()
        });
    }

    let segments: Vec<&str> = token.split('/').collect();
    match segments.as_slice() {
        [registry] => is_registry(registry).then(|| TagPatch {
            registry: RegistryUpdate::Set(registry.to_string()),
            ..Default::default()
        }),
        // `registry.example.com/` はレジストリとも namespace とも読めるので拒否
        [namespace, ""] if is_registry(namespace) => None,
        [namespace, ""] => Some(TagPatch {
            namespace: Some(name(namespace)?),
            ..Default::default()
        }),
        [registry, namespace] if is_registry(registry) => Some(TagPatch {
            registry: RegistryUpdate::Set(registry.to_string()),
            namespace: Some(name(namespace)?),
            ..Default::default()
        }),
        [namespace, rest] => {
            let namespace = name(namespace)?;
            match image_and_tag(rest)? {
                (image, Some(tag)) => Some(TagPatch {
                    registry: RegistryUpdate::Clear,
                    namespace: Some(namespace),
                    image: Some(image),
                    tag: Some(tag),
                }),
                (image, None) => Some(TagPatch {
                    namespace: Some(namespace),
                    image: Some(image),
                    ..Default::default()
                }),
            }
        }
        [registry, namespace, rest] if is_registry(registry) => {
            let (image, tag) = image_and_tag(rest)?;
            Some(TagPatch {
                registry: RegistryUpdate::Set(registry.to_string()),
                namespace: Some(name(namespace)?),
                image: Some(image),
                tag,
            })
        }
        _ => None,
    }
}

impl fmt::Display for TagMutator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use RegistryUpdate::{Clear, Keep, Set};

        let patch = match self {
            TagMutator::Append => return f.write_str("+"),
            TagMutator::Patch(patch) => patch,
        };

        match (
            &patch.registry,
            patch.namespace.as_deref(),
            patch.image.as_deref(),
            patch.tag.as_deref(),
        ) {
            (Keep, None, None, Some(t)) => write!(f, ":{}", t),
            (Keep, None, Some(i), None) => write!(f, "/{}", i),
            (Keep, None, Some(i), Some(t)) => write!(f, "/{}:{}", i, t),
            (Keep, Some(n), None, None) => write!(f, "{}/", n),
            (Keep, Some(n), Some(i), None) => write!(f, "{}/{}", n, i),
            (Clear, Some(n), Some(i), Some(t)) => write!(f, "{}/{}:{}", n, i, t),
            (Set(r), None, None, None) => write!(f, "{}", r),
            (Set(r), Some(n), None, None) => write!(f, "{}/{}", r, n),
            (Set(r), Some(n), Some(i), None) => write!(f, "{}/{}/{}", r, n, i),
            (Set(r), Some(n), Some(i), Some(t)) => write!(f, "{}/{}/{}:{}", r, n, i, t),
            // 合成したパッチは1トークンでは表せない
            (registry, namespace, image, tag) => {
                let registry = match registry {
                    Keep => "~".to_string(),
                    Set(r) => r.clone(),
                    Clear => "-".to_string(),
                };
                write!(
                    f,
                    "[registry={} namespace={} image={} tag={}]",
                    registry,
                    namespace.unwrap_or("~"),
                    image.unwrap_or("~"),
                    tag.unwrap_or("~")
                )
            }
        }
    }
}
