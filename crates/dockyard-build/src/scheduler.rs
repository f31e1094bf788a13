//! ワーカープールによる実行
//!
//! 解決順のキューから最大 `workers` 件を同時に実行する。各ビルド単位は
//! `build` → `push` を最後まで流してから次の単位に移る。
//! 失敗はその単位だけに閉じ、他の単位は実行を続ける。

use crate::event::{ProgressEvent, Reporter, UnitId, UnitState};
use crate::executor::Executor;
use crate::pipeline::Verb;
use crate::plan::Job;
use dockyard_core::Tag;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// 待機中の作業の払い出しを止めるためのフラグ
///
/// 実行中のビルド単位は止めない。
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failed { verb: Verb, reason: String },
    Cancelled,
}

/// 1つのビルド単位の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitOutcome {
    pub id: UnitId,
    pub label: String,
    pub tags: Vec<Tag>,
    pub outcome: Outcome,
}

/// 実行全体の結果（ビルド単位の番号順）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub outcomes: Vec<UnitOutcome>,
}

impl RunSummary {
    /// すべてのビルド単位が成功したか
    pub fn is_success(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| matches!(o.outcome, Outcome::Success))
    }

    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Success))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Failed { .. }))
    }

    pub fn cancelled(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Cancelled))
    }

    pub fn failures(&self) -> impl Iterator<Item = &UnitOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, Outcome::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.outcome)).count()
    }
}

pub struct Scheduler {
    workers: usize,
    executor: Arc<dyn Executor>,
    cancel: CancelToken,
}

impl Scheduler {
    /// `workers` が 0 の場合は 1 として扱う
    pub fn new(executor: Arc<dyn Executor>, workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            executor,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// すべての Job を実行して結果をまとめる
    ///
    /// `steps` は実行順の動詞（`build`、`push`）。進捗は `tx` に送る。
    pub async fn run(
        &self,
        jobs: Vec<Job>,
        steps: &[Verb],
        tx: Option<UnboundedSender<ProgressEvent>>,
    ) -> RunSummary {
        let reporter_for = |id: UnitId| match &tx {
            Some(tx) => Reporter::new(id, tx.clone()),
            None => Reporter::silent(id),
        };

        let expected: Vec<(UnitId, String, Vec<Tag>)> = jobs
            .iter()
            .map(|job| (job.id, job.label(), job.tags().to_vec()))
            .collect();
        for (id, _, _) in &expected {
            reporter_for(*id).state(UnitState::Pending);
        }

        let workers = self.workers.min(jobs.len());
        info!(units = jobs.len(), workers, steps = ?steps, "Starting scheduler");

        let queue = Arc::new(Mutex::new(VecDeque::from(jobs)));
        let steps: Arc<[Verb]> = steps.into();
        let mut join_set = JoinSet::new();

        for worker in 0..workers {
            let queue = queue.clone();
            let steps = steps.clone();
            let executor = self.executor.clone();
            let cancel = self.cancel.clone();
            let tx = tx.clone();

            join_set.spawn(async move {
                let mut outcomes = Vec::new();
                loop {
                    let Some(job) = queue.lock().await.pop_front() else {
                        break;
                    };
                    let reporter = match &tx {
                        Some(tx) => Reporter::new(job.id, tx.clone()),
                        None => Reporter::silent(job.id),
                    };

                    let outcome = if cancel.is_cancelled() {
                        debug!(worker, unit = %job.label(), "Skipping cancelled unit");
                        reporter.state(UnitState::Cancelled);
                        Outcome::Cancelled
                    } else {
                        run_job(executor.as_ref(), &job, &steps, &reporter).await
                    };

                    outcomes.push(UnitOutcome {
                        id: job.id,
                        label: job.label(),
                        tags: job.tags().to_vec(),
                        outcome,
                    });
                }
                outcomes
            });
        }

        let mut outcomes = Vec::with_capacity(expected.len());
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(worker_outcomes) => outcomes.extend(worker_outcomes),
                Err(e) => error!(error = %e, "Worker task panicked"),
            }
        }

        // パニックしたワーカーが持っていた単位は失敗として扱う
        let reported: HashSet<UnitId> = outcomes.iter().map(|o| o.id).collect();
        for (id, label, tags) in expected {
            if !reported.contains(&id) {
                let verb = steps.first().copied().unwrap_or(Verb::Build);
                let reason = "worker task aborted".to_string();
                reporter_for(id).state(UnitState::Failed {
                    verb,
                    reason: reason.clone(),
                });
                outcomes.push(UnitOutcome {
                    id,
                    label,
                    tags,
                    outcome: Outcome::Failed { verb, reason },
                });
            }
        }

        outcomes.sort_by_key(|o| o.id);
        RunSummary { outcomes }
    }
}

/// 1つのビルド単位の動詞を順に実行する。失敗したら残りの動詞は実行しない。
async fn run_job(executor: &dyn Executor, job: &Job, steps: &[Verb], reporter: &Reporter) -> Outcome {
    for &verb in steps {
        reporter.state(UnitState::Running(verb));
        debug!(unit = %job.label(), verb = %verb, "Running step");

        let result = match verb {
            Verb::Build => executor.build(job, reporter).await,
            Verb::Push => executor.push(job, reporter).await,
            Verb::Info | Verb::Resolve => Ok(()),
        };

        if let Err(e) = result {
            let reason = e.to_string();
            warn!(unit = %job.label(), verb = %verb, error = %reason, "Unit failed");
            reporter.state(UnitState::Failed {
                verb,
                reason: reason.clone(),
            });
            return Outcome::Failed { verb, reason };
        }
    }

    reporter.state(UnitState::Success);
    Outcome::Success
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BuildError, BuildResult};
    use crate::event::UnitEvent;
    use async_trait::async_trait;
    use dockyard_core::BuildUnit;
    use std::collections::{BTreeMap, BTreeSet};
    use std::path::PathBuf;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// 呼び出しを記録するメモリ上の実行者
    #[derive(Default)]
    struct FakeExecutor {
        fail_build: HashSet<UnitId>,
        calls: StdMutex<Vec<(UnitId, Verb)>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        cancel_after_first: Option<CancelToken>,
    }

    impl FakeExecutor {
        async fn record(&self, job: &Job, verb: Verb) {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.calls.lock().unwrap().push((job.id, verb));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }

        fn calls(&self) -> Vec<(UnitId, Verb)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Executor for FakeExecutor {
        async fn build(&self, job: &Job, _reporter: &Reporter) -> BuildResult<()> {
            self.record(job, Verb::Build).await;
            if let Some(cancel) = &self.cancel_after_first {
                cancel.cancel();
            }
            if self.fail_build.contains(&job.id) {
                return Err(BuildError::BuildFailed("boom".into()));
            }
            Ok(())
        }

        async fn push(&self, job: &Job, _reporter: &Reporter) -> BuildResult<()> {
            self.record(job, Verb::Push).await;
            Ok(())
        }
    }

    fn jobs(count: usize) -> Vec<Job> {
        (0..count)
            .map(|id| Job {
                id,
                unit: BuildUnit {
                    module: format!("m{}", id),
                    variant: None,
                    tags: vec![Tag::parse(&format!("r/m{}:latest", id)).unwrap()],
                    build_args: BTreeMap::new(),
                    rebuild_targets: BTreeSet::new(),
                },
                module_path: PathBuf::from(format!("m{}", id)),
                build_file: PathBuf::from(format!("m{}/Dockerfile", id)),
                build_args: BTreeMap::new(),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let executor = Arc::new(FakeExecutor {
            fail_build: HashSet::from([1]),
            ..Default::default()
        });
        let scheduler = Scheduler::new(executor.clone(), 1);

        let summary = scheduler.run(jobs(3), &[Verb::Build], None).await;

        assert!(!summary.is_success());
        assert_eq!(summary.succeeded(), 2);
        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.outcomes[0].outcome, Outcome::Success);
        assert_eq!(
            summary.outcomes[1].outcome,
            Outcome::Failed {
                verb: Verb::Build,
                reason: "Build failed: boom".into()
            }
        );
        assert_eq!(summary.outcomes[2].outcome, Outcome::Success);
        assert_eq!(summary.failures().next().map(|o| o.label.as_str()), Some("m1"));
    }

    #[tokio::test]
    async fn test_push_skipped_after_failed_build() {
        let executor = Arc::new(FakeExecutor {
            fail_build: HashSet::from([0]),
            ..Default::default()
        });
        let scheduler = Scheduler::new(executor.clone(), 1);

        scheduler
            .run(jobs(2), &[Verb::Build, Verb::Push], None)
            .await;

        assert_eq!(
            executor.calls(),
            vec![(0, Verb::Build), (1, Verb::Build), (1, Verb::Push)]
        );
    }

    #[tokio::test]
    async fn test_worker_bound() {
        let executor = Arc::new(FakeExecutor::default());
        let scheduler = Scheduler::new(executor.clone(), 2);

        let summary = scheduler.run(jobs(5), &[Verb::Build], None).await;

        assert!(summary.is_success());
        assert_eq!(summary.outcomes.len(), 5);
        assert_eq!(executor.max_in_flight.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_single_worker_runs_in_order() {
        let executor = Arc::new(FakeExecutor::default());
        let scheduler = Scheduler::new(executor.clone(), 0);
        assert_eq!(scheduler.workers(), 1);

        scheduler
            .run(jobs(2), &[Verb::Build, Verb::Push], None)
            .await;

        assert_eq!(
            executor.calls(),
            vec![
                (0, Verb::Build),
                (0, Verb::Push),
                (1, Verb::Build),
                (1, Verb::Push)
            ]
        );
    }

    #[tokio::test]
    async fn test_cancel_stops_queued_units() {
        let cancel = CancelToken::new();
        let executor = Arc::new(FakeExecutor {
            cancel_after_first: Some(cancel.clone()),
            ..Default::default()
        });
        let scheduler = Scheduler::new(executor.clone(), 1).with_cancel(cancel);

        let summary = scheduler.run(jobs(3), &[Verb::Build], None).await;

        assert_eq!(summary.outcomes[0].outcome, Outcome::Success);
        assert_eq!(summary.cancelled(), 2);
        assert!(!summary.is_success());
        assert_eq!(executor.calls(), vec![(0, Verb::Build)]);
    }

    #[tokio::test]
    async fn test_events_follow_state_machine() {
        let executor = Arc::new(FakeExecutor::default());
        let scheduler = Scheduler::new(executor, 1);
        let (tx, mut rx) = mpsc::unbounded_channel();

        scheduler
            .run(jobs(1), &[Verb::Build, Verb::Push], Some(tx))
            .await;

        let states: Vec<UnitState> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|e| match e.event {
                UnitEvent::State(state) => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                UnitState::Pending,
                UnitState::Running(Verb::Build),
                UnitState::Running(Verb::Push),
                UnitState::Success,
            ]
        );
    }

    #[tokio::test]
    async fn test_no_jobs() {
        let scheduler = Scheduler::new(Arc::new(FakeExecutor::default()), 4);
        let summary = scheduler.run(Vec::new(), &[Verb::Build], None).await;
        assert!(summary.is_success());
        assert!(summary.outcomes.is_empty());
    }
}
