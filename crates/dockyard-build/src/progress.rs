//! 進捗の表示
//!
//! スケジューラから届く [`ProgressEvent`] をスピナー・ログ・ファイルに振り分ける。

use crate::event::{ProgressEvent, UnitEvent, UnitId, UnitState};
use crate::plan::Job;
use colored::Colorize;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct ProgressOptions {
    /// ビルド単位ごとのスピナーを表示する
    pub show_bars: bool,
    /// ビルド出力を info レベルでログに流す
    pub echo_output: bool,
    /// ビルド単位ごとのログファイルの出力先
    pub log_dir: Option<PathBuf>,
}

struct UnitView {
    label: String,
    bar: ProgressBar,
    log: Option<File>,
}

pub struct ProgressRenderer {
    options: ProgressOptions,
    multi: MultiProgress,
    units: HashMap<UnitId, UnitView>,
}

impl ProgressRenderer {
    pub fn new(options: ProgressOptions, jobs: &[Job]) -> Self {
        let target = if options.show_bars {
            ProgressDrawTarget::stderr()
        } else {
            ProgressDrawTarget::hidden()
        };
        let multi = MultiProgress::with_draw_target(target);
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        let started = chrono::Local::now().format("%Y-%m-%d-%H-%M-%S").to_string();

        let mut units = HashMap::new();
        for job in jobs {
            let label = job.label();
            let bar = multi.add(ProgressBar::new_spinner());
            bar.set_style(style.clone());
            bar.set_message(format!("{} 待機中", label));

            let log = options
                .log_dir
                .as_deref()
                .and_then(|dir| open_log(dir, &started, job));

            units.insert(job.id, UnitView { label, bar, log });
        }

        Self {
            options,
            multi,
            units,
        }
    }

    /// イベントが尽きるまで表示を更新する
    pub async fn run(mut self, mut rx: UnboundedReceiver<ProgressEvent>) {
        while let Some(event) = rx.recv().await {
            self.handle(event);
        }
    }

    pub fn handle(&mut self, event: ProgressEvent) {
        let echo = self.options.echo_output;
        let show_bars = self.options.show_bars;
        let Some(view) = self.units.get_mut(&event.unit) else {
            return;
        };

        match event.event {
            UnitEvent::State(state) => {
                view.write_log(&format!("== {}", describe(&state)));
                match state {
                    UnitState::Pending => {}
                    UnitState::Running(verb) => {
                        if show_bars {
                            view.bar.enable_steady_tick(Duration::from_millis(100));
                        } else {
                            info!(unit = %view.label, verb = %verb, "Started");
                        }
                        view.bar.set_message(format!("{} {}中...", view.label, verb));
                    }
                    UnitState::Success => {
                        if !show_bars {
                            info!(unit = %view.label, "Completed");
                        }
                        view.bar
                            .finish_with_message(format!("{} {}", "✓".green(), view.label));
                    }
                    UnitState::Failed { verb, reason } => {
                        if !show_bars {
                            info!(unit = %view.label, verb = %verb, reason = %reason, "Failed");
                        }
                        view.bar.finish_with_message(format!(
                            "{} {} ({}): {}",
                            "✗".red(),
                            view.label,
                            verb,
                            reason
                        ));
                    }
                    UnitState::Cancelled => {
                        if !show_bars {
                            info!(unit = %view.label, "Cancelled");
                        }
                        view.bar
                            .finish_with_message(format!("{} {} 中断", "-".yellow(), view.label));
                    }
                }
            }
            UnitEvent::Step {
                current,
                total,
                instruction,
            } => {
                view.write_log(&format!("Step {}/{} : {}", current, total, instruction));
                view.bar.set_message(format!(
                    "{} [{}/{}] {}",
                    view.label, current, total, instruction
                ));
            }
            UnitEvent::Output(line) => {
                view.write_log(&line);
                if echo {
                    let label = &view.label;
                    self.multi.suspend(|| info!(unit = %label, "{}", line));
                }
            }
        }
    }
}

impl UnitView {
    fn write_log(&mut self, line: &str) {
        if let Some(file) = &mut self.log
            && let Err(e) = writeln!(file, "{}", line)
        {
            warn!(unit = %self.label, error = %e, "Failed to write build log, disabling it");
            self.log = None;
        }
    }
}

/// `<日時>-<module>-<variant|default>.log`
pub fn log_file_name(started: &str, job: &Job) -> String {
    let variant = job.unit.variant.as_deref().unwrap_or("default");
    format!("{}-{}-{}.log", started, job.unit.module, variant)
}

fn open_log(dir: &Path, started: &str, job: &Job) -> Option<File> {
    let path = dir.join(log_file_name(started, job));
    let opened = fs::create_dir_all(dir).and_then(|_| File::create(&path));
    match opened {
        Ok(file) => Some(file),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Cannot create build log");
            None
        }
    }
}

fn describe(state: &UnitState) -> String {
    match state {
        UnitState::Pending => "pending".to_string(),
        UnitState::Running(verb) => format!("running {}", verb),
        UnitState::Success => "success".to_string(),
        UnitState::Failed { verb, reason } => format!("failed at {}: {}", verb, reason),
        UnitState::Cancelled => "cancelled".to_string(),
    }
}
