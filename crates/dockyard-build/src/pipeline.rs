//! 動詞のパイプライン
//!
//! 動詞は引数のどこに書いてもよく、重複は1つにまとめて
//! `info` → `resolve` → `build` → `push` の順で実行する。

use std::collections::BTreeSet;
use std::fmt;

/// 宣言順がそのまま実行順になる
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Verb {
    /// モジュール設定を表示して終了
    Info,
    /// 解決したビルド計画を表示して終了
    Resolve,
    Build,
    Push,
}

impl Verb {
    pub const ALL: [Verb; 4] = [Verb::Info, Verb::Resolve, Verb::Build, Verb::Push];

    pub fn parse(word: &str) -> Option<Verb> {
        Self::ALL.into_iter().find(|verb| verb.as_str() == word)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Info => "info",
            Verb::Resolve => "resolve",
            Verb::Build => "build",
            Verb::Push => "push",
        }
    }

    /// Docker を使ってビルド単位ごとに実行する動詞か
    pub fn executes(&self) -> bool {
        matches!(self, Verb::Build | Verb::Push)
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pipeline {
    verbs: BTreeSet<Verb>,
}

impl Pipeline {
    /// 引数から動詞を取り出し、残りの引数を順序どおり返す
    pub fn split<S: AsRef<str>>(args: &[S]) -> (Pipeline, Vec<String>) {
        let mut verbs = BTreeSet::new();
        let mut rest = Vec::new();

        for arg in args {
            let arg = arg.as_ref();
            match Verb::parse(arg) {
                Some(verb) => {
                    verbs.insert(verb);
                }
                None => rest.push(arg.to_string()),
            }
        }

        (Pipeline { verbs }, rest)
    }

    pub fn from_verbs(verbs: impl IntoIterator<Item = Verb>) -> Pipeline {
        Pipeline {
            verbs: verbs.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.verbs.is_empty()
    }

    pub fn contains(&self, verb: Verb) -> bool {
        self.verbs.contains(&verb)
    }

    /// 実行順の動詞
    pub fn verbs(&self) -> impl Iterator<Item = Verb> + '_ {
        self.verbs.iter().copied()
    }

    /// `info` か `resolve` を含む場合は表示だけで終わる
    pub fn short_circuits(&self) -> bool {
        self.contains(Verb::Info) || self.contains(Verb::Resolve)
    }

    /// ビルド単位ごとに実行する動詞（`build`、`push` の順）
    pub fn steps(&self) -> Vec<Verb> {
        self.verbs().filter(Verb::executes).collect()
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let words: Vec<&str> = self.verbs().map(|v| v.as_str()).collect();
        f.write_str(&words.join(" "))
    }
}
