//! dockyard core
//!
//! コマンドライン引数の分類、モジュール設定の読み込み、タグの書き換え、
//! ビルド計画の解決、リビルドチェックポイントの抽出を提供します。
//! Docker には触れず、すべての判断をここで行います。

pub mod config;
pub mod discovery;
pub mod error;
pub mod loader;
pub mod rebuild;
pub mod resolve;
pub mod tag;
pub mod token;

/// モジュールごとの設定ファイル名
pub const CONFIG_FILE: &str = "build.yml";

/// モジュールごとのビルド定義ファイル名
pub const BUILD_FILE: &str = "Dockerfile";

pub use config::{Alias, Module, ModuleConfig, Variant};
pub use discovery::{is_module_name, list_modules};
pub use error::{DockyardError, Result};
pub use loader::{load_config, load_module, load_modules, read_build_file};
pub use rebuild::{NonceSource, RebuildCheckpoint};
pub use resolve::{BuildUnit, ResolveRequest, apply_mutators, resolve, variant_names};
pub use tag::{RegistryUpdate, Tag, TagMutator, TagPatch};
pub use token::{
    ALL_VARIANTS, BuildArgAssignment, Invocation, KnownNames, Token, VariantSelection, classify,
    classify_token, select_modules,
};
