//! 計画・モジュール情報・実行結果の表示

use colored::Colorize;
use dockyard_build::{Outcome, RunSummary};
use dockyard_core::rebuild;
use dockyard_core::{BuildUnit, Module, ModuleConfig, read_build_file};
use std::collections::BTreeMap;

/// 解決したビルド単位を表示する（`resolve` と `-s`）
pub fn print_units(units: &[BuildUnit]) {
    for unit in units {
        println!("{} {}", "•".blue(), unit.label().cyan().bold());
        println!("    タグ:");
        for (i, tag) in unit.tags.iter().enumerate() {
            let marker = if i == 0 { "(primary)" } else { "" };
            println!("      {} {}", tag.full(), marker.dimmed());
        }
        print_args("    ビルド引数:", &unit.build_args);
        if !unit.rebuild_targets.is_empty() {
            let targets: Vec<&str> = unit.rebuild_targets.iter().map(String::as_str).collect();
            println!("    リビルド: {}", targets.join(", "));
        }
    }
}

/// モジュールの設定とリビルドチェックポイントを表示する（`info`）
pub fn print_module_info(module: &Module) -> dockyard_core::Result<()> {
    println!("{} {}", "モジュール:".bold(), module.name.cyan().bold());
    println!("  パス: {}", module.path.display());

    match &module.config {
        Some(config) => print_config(config),
        None => println!("  {}", "build.yml なし（タグはすべて引数で指定）".yellow()),
    }

    let checkpoints = rebuild::scan(&read_build_file(module)?);
    if checkpoints.is_empty() {
        println!("  リビルドチェックポイント: なし");
    } else {
        println!("  リビルドチェックポイント:");
        for checkpoint in checkpoints {
            println!("    @{} ({})", checkpoint.name, checkpoint.declared_arg);
        }
    }
    println!();
    Ok(())
}

fn print_config(config: &ModuleConfig) {
    match &config.repository {
        Some(repository) => println!("  リポジトリ: {}", repository.full()),
        None => println!("  リポジトリ: (未設定)"),
    }
    print_args("  ビルド引数:", &config.args);

    if config.variants.is_empty() {
        println!("  variant: なし");
        return;
    }
    println!("  variant:");
    for variant in &config.variants {
        println!("    {} {}", "-".dimmed(), variant.name.green());
        if let Some(repository) = &variant.repository {
            println!("        リポジトリ: {}", repository.full());
        }
        if !variant.aliases.is_empty() {
            let aliases: Vec<&str> = variant.aliases.iter().map(|a| a.text.as_str()).collect();
            println!("        エイリアス: {}", aliases.join(", "));
        }
        print_args("        ビルド引数:", &variant.build_args);
    }
}

fn print_args(heading: &str, args: &BTreeMap<String, String>) {
    if args.is_empty() {
        return;
    }
    println!("{}", heading);
    let indent = " ".repeat(heading.len() - heading.trim_start().len() + 2);
    for (key, value) in args {
        println!("{}{}={}", indent, key, value);
    }
}

/// 実行結果の集計と失敗の一覧
pub fn print_summary(summary: &RunSummary) {
    tracing::info!(
        succeeded = summary.succeeded(),
        failed = summary.failed(),
        cancelled = summary.cancelled(),
        "All units finished"
    );

    for failure in summary.failures() {
        if let Outcome::Failed { verb, reason } = &failure.outcome {
            let tags: Vec<String> = failure.tags.iter().map(|t| t.full()).collect();
            eprintln!(
                "{} {} ({}) [{}]: {}",
                "✗".red(),
                failure.label.bold(),
                verb,
                tags.join(", "),
                reason
            );
        }
    }

    println!();
    if summary.is_success() {
        println!(
            "{}",
            format!("✓ {} 件のビルド単位が完了しました", summary.succeeded())
                .green()
                .bold()
        );
    } else {
        println!(
            "{}",
            format!(
                "✗ 成功 {} / 失敗 {} / 中断 {}",
                summary.succeeded(),
                summary.failed(),
                summary.cancelled()
            )
            .red()
            .bold()
        );
    }
}
