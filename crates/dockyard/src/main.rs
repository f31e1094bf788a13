mod display;
mod docker;

use anyhow::Context;
use clap::Parser;
use colored::Colorize;
use dockyard_build::{
    BuildError, CancelToken, DockerExecutor, Pipeline, ProgressOptions, ProgressRenderer,
    Scheduler, Verb, plan_jobs, proxy_build_args,
};
use dockyard_core::{
    BuildUnit, DockyardError, Invocation, KnownNames, Module, NonceSource, ResolveRequest,
    list_modules, load_modules, resolve, select_modules, variant_names,
};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = "\
動詞（順不同、複数可。info → resolve → build → push の順で実行）:
    info      モジュールの設定を表示
    resolve   解決したタグとビルド引数を表示
    build     イメージをビルドし、すべてのタグを付ける
    push      すべてのタグをプッシュ

引数の種類:
    <module>          ビルドするモジュール（ディレクトリ名）
    <variant> | all   build.yml の variant（エイリアス可）
    :tag  ns/  image  registry.host:port  ns/image:tag
                      タグの書き換え（左から順に適用）
    +                 以降の書き換えを元のタグに対する追加タグにする
    KEY=VALUE  KEY=   ビルド引数の上書き・削除
    @name             ARG REBUILD_<NAME> のキャッシュを無効化";

#[derive(Parser)]
#[command(name = "dockyard", version)]
#[command(about = "モジュールごとの Docker イメージをまとめてビルド・プッシュする", long_about = None)]
#[command(after_help = AFTER_HELP)]
struct Cli {
    /// デバッグログを出力
    #[arg(short, long)]
    debug: bool,

    /// 実行前にビルド計画を表示
    #[arg(short = 's', long)]
    show_plans: bool,

    /// 並列に実行するビルド単位の数
    #[arg(
        short,
        long,
        env = "DOCKYARD_WORKERS",
        default_value_t = 1,
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    workers: u16,

    /// モジュールを探すディレクトリ（デフォルト: カレントディレクトリ）
    #[arg(short = 'C', long, env = "DOCKYARD_BASE_PATH")]
    base_path: Option<PathBuf>,

    /// ビルド出力をログに流す
    #[arg(long)]
    build_log: bool,

    /// ビルド単位ごとのログファイルを書き出すディレクトリ
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// 進捗スピナーを表示しない
    #[arg(long)]
    no_progress: bool,

    /// 動詞・モジュール・variant・タグ・ビルド引数・@リビルド対象
    #[arg(value_name = "ARG")]
    args: Vec<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);

    match run(cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            print_error(&e);
            std::process::exit(1);
        }
    }
}

fn init_logging(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,dockyard={level},dockyard_core={level},dockyard_build={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(debug)
        .init();
}

fn print_error(error: &anyhow::Error) {
    eprintln!();
    if let Some(build_error) = error.downcast_ref::<BuildError>() {
        eprintln!("{} {}", "✗".red().bold(), build_error.user_message());
        return;
    }

    eprintln!("{} {}", "✗".red().bold(), error);
    for cause in error.chain().skip(1) {
        eprintln!("  {} {}", "原因:".yellow(), cause);
    }
    if let Some(DockyardError::UnrecognizedToken { .. }) = error.downcast_ref::<DockyardError>() {
        eprintln!();
        eprintln!("  dockyard --help で引数の書式を確認してください");
    }
}

/// 全ビルド単位が成功したかを返す
async fn run(cli: Cli) -> anyhow::Result<bool> {
    let base_path = match &cli.base_path {
        Some(path) => path.clone(),
        None => std::env::current_dir().context("カレントディレクトリを取得できません")?,
    };

    let (pipeline, rest) = Pipeline::split(&cli.args);
    if pipeline.is_empty() {
        anyhow::bail!("動詞が指定されていません（info, resolve, build, push のいずれか）");
    }
    tracing::debug!(verbs = %pipeline, args = ?rest, "Parsed command line");

    let (modules, units) = plan(&base_path, &pipeline, &rest)?;

    if pipeline.short_circuits() {
        return Ok(true);
    }

    if cli.show_plans {
        println!("{}", "ビルド計画:".bold());
        display::print_units(&units);
        println!();
    }

    execute(&cli, &pipeline, &modules, units).await
}

/// 引数を分類してビルド単位を解決する
///
/// `info` と `resolve` の表示もここで行う。どこかで失敗すれば何も実行しない。
fn plan(
    base_path: &Path,
    pipeline: &Pipeline,
    args: &[String],
) -> anyhow::Result<(Vec<Module>, Vec<BuildUnit>)> {
    let available = list_modules(base_path)?;
    let selected = select_modules(args, &available);
    if selected.is_empty() {
        let names: Vec<&str> = available.iter().map(String::as_str).collect();
        anyhow::bail!(
            "モジュールが指定されていません\n利用可能なモジュール: {}",
            if names.is_empty() {
                "(なし)".to_string()
            } else {
                names.join(" ")
            }
        );
    }

    let modules = load_modules(base_path, &selected)?;
    let variants = variant_names(&modules);
    let invocation = Invocation::parse(
        args,
        KnownNames {
            modules: &available,
            variants: &variants,
        },
    )?;
    tracing::info!(modules = ?invocation.modules, "Selected modules");

    if pipeline.contains(Verb::Info) {
        for module in &modules {
            display::print_module_info(module)?;
        }
    }

    // info だけなら解決まではしない
    if pipeline.contains(Verb::Info) && !pipeline.contains(Verb::Resolve) {
        return Ok((modules, Vec::new()));
    }

    let request = ResolveRequest {
        variants: invocation.variants,
        mutators: invocation.mutators,
        build_args: invocation.build_args,
        default_args: proxy_build_args(),
        rebuild_targets: invocation.rebuild_targets,
    };

    let units = resolve(&modules, &request)?;
    tracing::info!(units = units.len(), "Resolved build plan");

    if pipeline.contains(Verb::Resolve) {
        display::print_units(&units);
    }

    Ok((modules, units))
}

async fn execute(
    cli: &Cli,
    pipeline: &Pipeline,
    modules: &[Module],
    units: Vec<BuildUnit>,
) -> anyhow::Result<bool> {
    let jobs = plan_jobs(modules, units, &NonceSource::new())?;
    let docker = docker::init_docker_with_error_handling().await?;

    let scheduler = Scheduler::new(
        Arc::new(DockerExecutor::new(docker)),
        usize::from(cli.workers),
    );
    watch_ctrl_c(scheduler.cancel_token());

    let options = ProgressOptions {
        show_bars: !cli.no_progress && std::io::stderr().is_terminal(),
        echo_output: cli.build_log,
        log_dir: cli.log_dir.clone(),
    };
    let renderer = ProgressRenderer::new(options, &jobs);
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let rendering = tokio::spawn(renderer.run(rx));

    let summary = scheduler.run(jobs, &pipeline.steps(), Some(tx)).await;
    if let Err(e) = rendering.await {
        tracing::warn!(error = %e, "Progress renderer stopped unexpectedly");
    }

    display::print_summary(&summary);
    Ok(summary.is_success())
}

/// Ctrl-C で待機中のビルド単位の払い出しを止める。実行中のものは最後まで待つ
fn watch_ctrl_c(cancel: CancelToken) {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if cancel.is_cancelled() {
                tracing::info!("Still waiting on running units");
            } else {
                tracing::info!("Caught interrupt, cancelling remaining units");
                cancel.cancel();
            }
        }
    });
}
