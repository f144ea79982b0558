//! Scheduler (§4.10): a data-driven table of tiered recurring tasks
//! replacing the teacher's several independent `tokio::time::interval`
//! loops in `main.rs` with one loop that wakes every 30s and a second,
//! slower loop that retunes task frequencies every 4h.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::models::{SchedulerTask, TaskOutcome, Tier};

const MAIN_LOOP_INTERVAL_SECS: u64 = 30;
const ADAPTIVE_PASS_INTERVAL_SECS: u64 = 4 * 3_600;
const BACKOFF_MINUTES: i64 = 5;
const MIN_FREQUENCY_MINUTES: i64 = 15;
const MAX_FREQUENCY_MINUTES: i64 = 1_440;

/// What a scheduled task actually does when it runs. `ArbitrageCycle`
/// tasks are the only ones the adaptive-frequency pass retunes
/// (§4.10: "a background adaptive-frequency pass runs ... over
/// full-cycle tasks").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    ArbitrageCycle(Tier),
    MetricsUpdate,
    FrequencyOptimization,
}

/// Callback invoked for `ArbitrageCycle` tasks — the Orchestrator run
/// in production, a deterministic fake in tests.
#[async_trait]
pub trait CycleRunner: Send + Sync {
    async fn run_cycle(&self, tier: Tier) -> anyhow::Result<u32>;
}

struct TaskState {
    task: SchedulerTask,
    kind: TaskKind,
}

pub struct Scheduler {
    tasks: Mutex<HashMap<String, TaskState>>,
}

impl Scheduler {
    /// Base tasks per §4.10's defaults.
    pub fn with_defaults(
        critical_minutes: u32,
        important_minutes: u32,
        tracking_minutes: u32,
    ) -> Self {
        let scheduler = Self {
            tasks: Mutex::new(HashMap::new()),
        };
        scheduler.register("arbitrage-critical", TaskKind::ArbitrageCycle(Tier::Critical), critical_minutes, 0);
        scheduler.register("arbitrage-important", TaskKind::ArbitrageCycle(Tier::Important), important_minutes, 1);
        scheduler.register("arbitrage-tracking", TaskKind::ArbitrageCycle(Tier::Tracking), tracking_minutes, 2);
        scheduler.register("metrics-update", TaskKind::MetricsUpdate, 60, 3);
        scheduler.register("frequency-optimization", TaskKind::FrequencyOptimization, 240, 4);
        scheduler
    }

    fn register(&self, task_id: &str, kind: TaskKind, frequency_minutes: u32, priority: u8) {
        let tier = match kind {
            TaskKind::ArbitrageCycle(t) => t,
            TaskKind::MetricsUpdate | TaskKind::FrequencyOptimization => Tier::Tracking,
        };
        let task = SchedulerTask {
            task_id: task_id.to_string(),
            task_type: task_id.to_string(),
            tier,
            frequency_minutes,
            next_run: Utc::now(),
            last_run: None,
            priority,
            enabled: true,
            last_outcome: None,
        };
        self.tasks.lock().insert(task_id.to_string(), TaskState { task, kind });
    }

    pub fn tasks(&self) -> Vec<SchedulerTask> {
        let mut out: Vec<_> = self.tasks.lock().values().map(|s| s.task.clone()).collect();
        out.sort_by_key(|t| t.priority);
        out
    }

    /// Run one scheduler tick: execute every enabled task whose
    /// `next_run <= now`, in ascending priority order.
    pub async fn tick(&self, cycle_runner: &dyn CycleRunner) {
        let now = Utc::now();
        let due: Vec<String> = {
            let tasks = self.tasks.lock();
            let mut due: Vec<_> = tasks
                .values()
                .filter(|s| s.task.enabled && s.task.next_run <= now)
                .map(|s| (s.task.priority, s.task.task_id.clone()))
                .collect();
            due.sort_by_key(|(priority, _)| *priority);
            due.into_iter().map(|(_, id)| id).collect()
        };

        for task_id in due {
            self.run_task(&task_id, cycle_runner).await;
        }
    }

    async fn run_task(&self, task_id: &str, cycle_runner: &dyn CycleRunner) {
        let kind = match self.tasks.lock().get(task_id) {
            Some(s) => s.kind,
            None => return,
        };

        let start = std::time::Instant::now();
        let result = match kind {
            TaskKind::ArbitrageCycle(tier) => cycle_runner.run_cycle(tier).await,
            TaskKind::MetricsUpdate => Ok(0),
            TaskKind::FrequencyOptimization => {
                self.run_adaptive_pass();
                Ok(0)
            }
        };
        let duration = start.elapsed().as_secs_f64();

        let mut tasks = self.tasks.lock();
        let Some(state) = tasks.get_mut(task_id) else { return };
        let now = Utc::now();

        match result {
            Ok(opportunities_detected) => {
                state.task.last_outcome = Some(TaskOutcome {
                    success: true,
                    opportunities_detected,
                    duration_seconds: duration,
                    recorded_at: now,
                });
                state.task.next_run = now + chrono::Duration::minutes(state.task.frequency_minutes as i64);
                info!(task_id, opportunities_detected, duration, "scheduler task completed");
            }
            Err(e) => {
                state.task.last_outcome = Some(TaskOutcome {
                    success: false,
                    opportunities_detected: 0,
                    duration_seconds: duration,
                    recorded_at: now,
                });
                state.task.next_run = now + chrono::Duration::minutes(BACKOFF_MINUTES);
                warn!(task_id, error = %e, "scheduler task failed, backing off 5 minutes");
            }
        }
        state.task.last_run = Some(now);
    }

    /// Adaptive-frequency pass (§4.10), applied only to
    /// `ArbitrageCycle` tasks.
    fn run_adaptive_pass(&self) {
        let mut tasks = self.tasks.lock();
        for state in tasks.values_mut() {
            if !matches!(state.kind, TaskKind::ArbitrageCycle(_)) {
                continue;
            }
            let Some(outcome) = &state.task.last_outcome else { continue };
            let old = state.task.frequency_minutes as f64;

            let new_freq = if !outcome.success {
                (old * 1.5).min(old + 60.0)
            } else if outcome.opportunities_detected > 5 {
                (old * 0.8).max(old - 30.0)
            } else if outcome.opportunities_detected == 0 && outcome.duration_seconds < 10.0 {
                old * 1.2
            } else {
                old
            };

            let clamped = (new_freq.round() as i64).clamp(MIN_FREQUENCY_MINUTES, MAX_FREQUENCY_MINUTES);
            if clamped as u32 != state.task.frequency_minutes {
                info!(
                    task_id = %state.task.task_id,
                    old_minutes = state.task.frequency_minutes,
                    new_minutes = clamped,
                    "adaptive-frequency pass retuned task"
                );
                state.task.frequency_minutes = clamped as u32;
            }
        }
    }

    pub fn main_loop_interval() -> std::time::Duration {
        std::time::Duration::from_secs(MAIN_LOOP_INTERVAL_SECS)
    }

    pub fn adaptive_pass_interval() -> std::time::Duration {
        std::time::Duration::from_secs(ADAPTIVE_PASS_INTERVAL_SECS)
    }
}
