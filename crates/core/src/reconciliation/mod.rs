//! Scheduled Reconciliation.
//!
//! Periodic tasks that bring stored state in line with the passage of time: stale slots are
//! closed, reminders go out, and appointments whose time has passed are finished. The core only
//! defines the tasks and their [`Cadence`]; driving them on a timer is the binary's job.
//!
//! Every run goes through [`TaskRunner::run_once`], which takes the task's advisory lock in the
//! shared [`KeyValueStore`] so at most one runner executes a task at a time.

mod cadence;
mod lock;
mod tasks;

pub use cadence::Cadence;
pub use lock::{InMemoryKeyValueStore, KeyValueStore, TaskLock};
pub use tasks::{
    DisableOldTimeSlots, FinishEndedAppointments, FinishYesterdayAppointments,
    RemindPlannedAppointments,
};

use crate::clock::Clock;
use crate::config::FeatureFlags;
use crate::workflow::AppointmentWorkflow;
use crate::CoreResult;
use std::sync::Arc;

/// What a task needs to do its work.
#[derive(Clone)]
pub struct TaskContext {
    pub workflow: AppointmentWorkflow,
    pub kv: Arc<dyn KeyValueStore>,
    pub clock: Arc<dyn Clock>,
}

impl TaskContext {
    pub fn new(
        workflow: AppointmentWorkflow,
        kv: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            workflow,
            kv,
            clock,
        }
    }
}

pub trait ScheduledTask: Send + Sync {
    /// Stable name; also names the task's lock.
    fn name(&self) -> &'static str;

    fn cadence(&self) -> Cadence;

    fn enabled(&self, _features: &FeatureFlags) -> bool {
        true
    }

    /// Performs one pass while `lock` is held. Returns the number of affected records.
    fn run(&self, ctx: &TaskContext, lock: &TaskLock) -> CoreResult<usize>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed { affected: usize },
    /// Switched off by a feature flag.
    Disabled,
    /// Another runner holds the lock.
    LockBusy,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskReport {
    pub task: &'static str,
    pub outcome: TaskOutcome,
}

/// Runs tasks one pass at a time under their locks.
#[derive(Clone)]
pub struct TaskRunner {
    ctx: TaskContext,
}

impl TaskRunner {
    pub fn new(ctx: TaskContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &TaskContext {
        &self.ctx
    }

    pub fn run_once(&self, task: &dyn ScheduledTask) -> CoreResult<TaskReport> {
        let name = task.name();
        let cfg = self.ctx.workflow.config();
        if !task.enabled(cfg.features()) {
            tracing::debug!(task = name, "task disabled");
            return Ok(TaskReport {
                task: name,
                outcome: TaskOutcome::Disabled,
            });
        }

        let Some(lock) = TaskLock::acquire(
            self.ctx.kv.clone(),
            self.ctx.clock.clone(),
            name,
            cfg.task_lock_ttl(),
        )?
        else {
            return Ok(TaskReport {
                task: name,
                outcome: TaskOutcome::LockBusy,
            });
        };

        tracing::debug!(task = name, deadline = %lock.deadline(), "task started");
        let result = task.run(&self.ctx, &lock);
        match lock.release() {
            Ok(true) => {}
            Ok(false) => tracing::warn!(task = name, "task lock expired before release"),
            Err(err) => tracing::warn!(task = name, error = %err, "failed to release task lock"),
        }

        let affected = result?;
        tracing::info!(task = name, affected, "task completed");
        Ok(TaskReport {
            task: name,
            outcome: TaskOutcome::Completed { affected },
        })
    }
}

/// Every reconciliation task with its production cadence.
pub fn default_tasks() -> Vec<Box<dyn ScheduledTask>> {
    vec![
        Box::new(DisableOldTimeSlots),
        Box::new(RemindPlannedAppointments),
        Box::new(FinishYesterdayAppointments),
        Box::new(FinishEndedAppointments),
    ]
}

pub fn task_by_name(name: &str) -> Option<Box<dyn ScheduledTask>> {
    default_tasks().into_iter().find(|t| t.name() == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{at, directory, workflow_with, Harness};

    fn runner(h: &Harness) -> (TaskRunner, Arc<InMemoryKeyValueStore>) {
        let kv = Arc::new(InMemoryKeyValueStore::new(h.clock.clone()));
        let ctx = TaskContext::new(h.workflow.clone(), kv.clone(), h.clock.clone());
        (TaskRunner::new(ctx), kv)
    }

    #[test]
    fn test_task_names_are_unique_and_resolvable() {
        let names: Vec<&str> = default_tasks().iter().map(|t| t.name()).collect();
        assert_eq!(names.len(), 4);
        for name in names {
            assert_eq!(task_by_name(name).unwrap().name(), name);
        }
        assert!(task_by_name("nope").is_none());
    }

    #[test]
    fn test_busy_lock_skips_run() {
        let (t, _) = directory();
        let h = workflow_with(t, at(2030, 1, 1, 12, 0));
        let (runner, kv) = runner(&h);
        let _held = TaskLock::acquire(
            kv,
            h.clock.clone(),
            DisableOldTimeSlots.name(),
            chrono::Duration::minutes(1),
        )
        .unwrap()
        .unwrap();

        let report = runner.run_once(&DisableOldTimeSlots).unwrap();
        assert_eq!(report.outcome, TaskOutcome::LockBusy);
    }

    #[test]
    fn test_disabled_task_is_reported() {
        let (t, _) = directory();
        let h = workflow_with(t, at(2030, 1, 1, 12, 0));
        let mut features = h.workflow.config().features().clone();
        features.finish_ended_appointments = false;
        let workflow = h.with_features(features);
        let kv = Arc::new(InMemoryKeyValueStore::new(h.clock.clone()));
        let runner = TaskRunner::new(TaskContext::new(workflow, kv, h.clock.clone()));

        let report = runner.run_once(&FinishEndedAppointments).unwrap();
        assert_eq!(report.outcome, TaskOutcome::Disabled);
    }

    #[test]
    fn test_lock_is_released_after_run() {
        let (t, _) = directory();
        let h = workflow_with(t, at(2030, 1, 1, 12, 0));
        let (runner, _) = runner(&h);
        for _ in 0..2 {
            let report = runner.run_once(&DisableOldTimeSlots).unwrap();
            assert!(matches!(report.outcome, TaskOutcome::Completed { .. }));
        }
    }
}
