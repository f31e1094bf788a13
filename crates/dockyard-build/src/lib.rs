//! dockyard のビルド実行
//!
//! 動詞のパイプライン、ワーカープールによるスケジューラ、
//! Docker を使う実行者（ビルドコンテキストの作成、ビルド、タグ付け、
//! レジストリ認証、プッシュ）と進捗表示を提供します。

pub mod auth;
pub mod builder;
pub mod context;
pub mod error;
pub mod event;
pub mod executor;
pub mod pipeline;
pub mod plan;
pub mod progress;
pub mod proxy;
pub mod pusher;
pub mod scheduler;

pub use auth::RegistryAuth;
pub use builder::ImageBuilder;
pub use context::ContextBuilder;
pub use error::{BuildError, BuildResult};
pub use event::{ProgressEvent, Reporter, UnitEvent, UnitId, UnitState};
pub use executor::{DockerExecutor, Executor};
pub use pipeline::{Pipeline, Verb};
pub use plan::{Job, plan_jobs};
pub use progress::{ProgressOptions, ProgressRenderer};
pub use proxy::proxy_build_args;
pub use pusher::{ImagePusher, validate_tag};
pub use scheduler::{CancelToken, Outcome, RunSummary, Scheduler, UnitOutcome};
