//! 実行中の進捗イベント
//!
//! スケジューラと実行者はイベントを送るだけで、表示方法は受け手が決める。

use crate::pipeline::Verb;
use tokio::sync::mpsc::UnboundedSender;

/// ビルド単位の番号（解決順、0 始まり）
pub type UnitId = usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitState {
    Pending,
    Running(Verb),
    Success,
    Failed { verb: Verb, reason: String },
    /// 中断されたため実行されなかった
    Cancelled,
}

impl UnitState {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            UnitState::Success | UnitState::Failed { .. } | UnitState::Cancelled
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitEvent {
    State(UnitState),
    /// Dockerfile の何ステップ目を実行中か
    Step {
        current: u32,
        total: u32,
        instruction: String,
    },
    /// ビルド・プッシュの出力1行
    Output(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub unit: UnitId,
    pub event: UnitEvent,
}

/// 1つのビルド単位のイベント送信口
#[derive(Debug, Clone)]
pub struct Reporter {
    unit: UnitId,
    tx: Option<UnboundedSender<ProgressEvent>>,
}

impl Reporter {
    pub fn new(unit: UnitId, tx: UnboundedSender<ProgressEvent>) -> Self {
        Self { unit, tx: Some(tx) }
    }

    /// イベントを捨てる送信口
    pub fn silent(unit: UnitId) -> Self {
        Self { unit, tx: None }
    }

    pub fn unit(&self) -> UnitId {
        self.unit
    }

    fn send(&self, event: UnitEvent) {
        // 受け手が先に終了していても実行は続ける
        if let Some(tx) = &self.tx {
            let _ = tx.send(ProgressEvent {
                unit: self.unit,
                event,
            });
        }
    }

    pub fn state(&self, state: UnitState) {
        self.send(UnitEvent::State(state));
    }

    pub fn step(&self, current: u32, total: u32, instruction: &str) {
        self.send(UnitEvent::Step {
            current,
            total,
            instruction: instruction.to_string(),
        });
    }

    pub fn output(&self, line: &str) {
        self.send(UnitEvent::Output(line.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_reporter_tags_events_with_unit() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter = Reporter::new(3, tx);

        reporter.state(UnitState::Running(Verb::Build));
        reporter.step(1, 4, "FROM");
        reporter.output("hello");

        let events: Vec<ProgressEvent> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.unit == 3));
        assert_eq!(
            events[1].event,
            UnitEvent::Step {
                current: 1,
                total: 4,
                instruction: "FROM".into()
            }
        );
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        Reporter::new(0, tx).output("ignored");
        Reporter::silent(0).output("ignored");
    }
}
