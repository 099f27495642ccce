//! Cooperative main loop.
//!
//! The main loop is the lowest-priority context. Each pass reads the tick
//! once, runs the supervised task if its period has elapsed, then runs the
//! monitor evaluation if its period has elapsed. Both schedules restart from
//! the tick at which they actually ran, so a late pass delays the next run
//! instead of bunching runs together.

use crate::backstop::WatchdogHardware;
use crate::context::SupervisionContext;
use crate::critical::InterruptControl;
use crate::monitor::HeartbeatMonitor;
use tracing::trace;
use wdgm_common::config::SupervisionConfig;
use wdgm_common::state::EvaluationOutcome;
use wdgm_common::time::Millis;

/// Work supervised by the heartbeat monitor.
///
/// A healthy implementation calls [`HeartbeatMonitor::report_alive`] exactly
/// once per run.
pub trait SupervisedTask {
    /// Name used in logs.
    fn name(&self) -> &str {
        "task"
    }

    /// One run of the task.
    fn run(&mut self, heartbeat: &HeartbeatMonitor, now: Millis);
}

impl<F> SupervisedTask for F
where
    F: FnMut(&HeartbeatMonitor, Millis),
{
    fn run(&mut self, heartbeat: &HeartbeatMonitor, now: Millis) {
        self(heartbeat, now);
    }
}

/// What one main-loop pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PassResult {
    /// Tick read at the start of the pass.
    pub now: Millis,
    /// Whether the supervised task ran.
    pub task_ran: bool,
    /// Evaluation outcome, if the evaluation ran.
    pub evaluation: Option<EvaluationOutcome>,
}

/// Two-rate cooperative scheduler.
#[derive(Debug, Clone)]
pub struct MainLoop {
    task_period_ms: u32,
    evaluation_period_ms: u32,
    last_task: Millis,
    last_evaluation: Millis,
    passes: u64,
    task_runs: u64,
    evaluations: u64,
}

impl MainLoop {
    /// Create a loop whose first runs fall one period after `now`.
    #[must_use]
    pub fn new(config: &SupervisionConfig, now: Millis) -> Self {
        Self {
            task_period_ms: config.task_period_ms(),
            evaluation_period_ms: config.evaluation_period_ms(),
            last_task: now,
            last_evaluation: now,
            passes: 0,
            task_runs: 0,
            evaluations: 0,
        }
    }

    /// Run one pass against `ctx`.
    pub fn poll<I, W, T>(&mut self, ctx: &SupervisionContext<I, W>, task: &mut T) -> PassResult
    where
        I: InterruptControl,
        W: WatchdogHardware,
        T: SupervisedTask + ?Sized,
    {
        let now = ctx.now();
        let mut result = PassResult {
            now,
            ..PassResult::default()
        };
        self.passes += 1;

        if now.has_elapsed(self.last_task, self.task_period_ms) {
            trace!(%now, task = task.name(), "Running supervised task");
            task.run(ctx.monitor(), now);
            self.last_task = now;
            self.task_runs += 1;
            result.task_ran = true;
        }

        if now.has_elapsed(self.last_evaluation, self.evaluation_period_ms) {
            result.evaluation = Some(ctx.evaluate_at(now));
            self.last_evaluation = now;
            self.evaluations += 1;
        }

        result
    }

    /// Passes since creation.
    pub fn passes(&self) -> u64 {
        self.passes
    }

    /// Task runs since creation.
    pub fn task_runs(&self) -> u64 {
        self.task_runs
    }

    /// Evaluations since creation.
    pub fn evaluations(&self) -> u64 {
        self.evaluations
    }
}
