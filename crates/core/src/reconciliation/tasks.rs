use super::{Cadence, ScheduledTask, TaskContext, TaskLock};
use crate::appointment::{Actor, AppointmentStatus};
use crate::config::FeatureFlags;
use crate::constants::{
    EVENT_REMIND_ABOUT_PLANNED_APPOINTMENT, FINISH_YESTERDAY_HOUR, REMINDER_LAST_RUN_KEY,
};
use crate::error::ErrorKind;
use crate::interval::{local_date, local_day_bounds};
use crate::repositories::{AppointmentQuery, QueryOrder};
use crate::CoreResult;
use chrono::{DateTime, Duration, Utc};
use clinic_types::AppointmentId;

/// Finishes `ids` one by one; state conflicts are logged and skipped.
fn finish_all(
    ctx: &TaskContext,
    lock: &TaskLock,
    task: &'static str,
    ids: Vec<AppointmentId>,
    ask_for_review: bool,
) -> CoreResult<usize> {
    let mut finished = 0;
    for id in ids {
        lock.ensure_held()?;
        match ctx
            .workflow
            .finish(id, ask_for_review, Actor::Task(task.to_string()))
        {
            Ok(_) => finished += 1,
            Err(err) if err.kind() == ErrorKind::Transient => return Err(err),
            Err(err) => {
                tracing::warn!(task, appointment = %id, error = %err, "could not finish appointment")
            }
        }
    }
    Ok(finished)
}

/// Marks free slots that already ended as unavailable.
#[derive(Clone, Copy, Debug, Default)]
pub struct DisableOldTimeSlots;

impl ScheduledTask for DisableOldTimeSlots {
    fn name(&self) -> &'static str {
        "disable_old_timeslots"
    }

    fn cadence(&self) -> Cadence {
        Cadence::every_minutes(12)
    }

    fn run(&self, ctx: &TaskContext, lock: &TaskLock) -> CoreResult<usize> {
        let now = ctx.clock.now();
        lock.ensure_held()?;
        ctx.workflow.store().write(|tables| {
            let stale = tables.free_past(now);
            Ok(tables.bulk_mark_busy(&stale))
        })
    }
}

/// Reminds patients of planned appointments `N` minutes before they start.
///
/// Each run covers starts in `[last_run + N, now + N)`, so consecutive runs tile the timeline
/// without overlap. `last_run` is kept in the KV store and written only after the reminders
/// went out.
#[derive(Clone, Copy, Debug, Default)]
pub struct RemindPlannedAppointments;

impl RemindPlannedAppointments {
    fn last_run(ctx: &TaskContext, now: DateTime<Utc>) -> CoreResult<DateTime<Utc>> {
        let fallback = now - Duration::minutes(1);
        let Some(raw) = ctx.kv.get(REMINDER_LAST_RUN_KEY)? else {
            return Ok(fallback);
        };
        match DateTime::parse_from_rfc3339(&raw) {
            Ok(t) => Ok(t.with_timezone(&Utc)),
            Err(err) => {
                tracing::warn!(value = %raw, error = %err, "unreadable reminder last run time");
                Ok(fallback)
            }
        }
    }
}

impl ScheduledTask for RemindPlannedAppointments {
    fn name(&self) -> &'static str {
        "remind_planned_appointments"
    }

    fn cadence(&self) -> Cadence {
        Cadence::every_minutes(1)
    }

    fn enabled(&self, features: &FeatureFlags) -> bool {
        features.remind_planned_appointments
    }

    fn run(&self, ctx: &TaskContext, lock: &TaskLock) -> CoreResult<usize> {
        let now = ctx.clock.now();
        let last = Self::last_run(ctx, now)?;
        if last >= now {
            tracing::debug!(%last, %now, "reminders already sent for this window");
            return Ok(0);
        }

        let mut sent = 0;
        for offset in ctx.workflow.config().reminder_offsets() {
            let (from, to) = (last + *offset, now + *offset);
            let due = ctx.workflow.store().read(|tables| {
                Ok(AppointmentQuery::future_planned(now)
                    .starts_at_or_after(from)
                    .starts_before(to)
                    .ids(tables))
            })?;
            for id in due {
                lock.ensure_held()?;
                match ctx.workflow.notify(EVENT_REMIND_ABOUT_PLANNED_APPOINTMENT, id) {
                    Ok(n) => sent += n,
                    Err(err) => {
                        tracing::warn!(appointment = %id, error = %err, "reminder skipped")
                    }
                }
            }
        }

        lock.ensure_held()?;
        ctx.kv.set(REMINDER_LAST_RUN_KEY, &now.to_rfc3339())?;
        Ok(sent)
    }
}

/// Finishes what started on the previous local day and was never closed.
#[derive(Clone, Copy, Debug, Default)]
pub struct FinishYesterdayAppointments;

impl ScheduledTask for FinishYesterdayAppointments {
    fn name(&self) -> &'static str {
        "finish_yesterday_appointments"
    }

    fn cadence(&self) -> Cadence {
        Cadence::daily_at_hour(FINISH_YESTERDAY_HOUR)
    }

    fn enabled(&self, features: &FeatureFlags) -> bool {
        features.finish_yesterday_appointments
    }

    fn run(&self, ctx: &TaskContext, lock: &TaskLock) -> CoreResult<usize> {
        let offset = ctx.workflow.config().utc_offset();
        let today = local_date(ctx.clock.now(), offset);
        let Some(yesterday) = today.pred_opt() else {
            return Ok(0);
        };
        let day = local_day_bounds(yesterday, offset);
        let ids = ctx.workflow.store().read(|tables| {
            Ok(AppointmentQuery::new()
                .statuses(AppointmentStatus::FINISHABLE)
                .starts_at_or_after(day.start)
                .starts_before(day.end)
                .order(QueryOrder::StartAsc)
                .ids(tables))
        })?;
        finish_all(ctx, lock, self.name(), ids, false)
    }
}

/// Finishes appointments that ended more than the finish delta ago and asks for a review.
#[derive(Clone, Copy, Debug, Default)]
pub struct FinishEndedAppointments;

impl ScheduledTask for FinishEndedAppointments {
    fn name(&self) -> &'static str {
        "finish_ended_appointments"
    }

    fn cadence(&self) -> Cadence {
        Cadence::every_minutes(6)
    }

    fn enabled(&self, features: &FeatureFlags) -> bool {
        features.finish_ended_appointments
    }

    fn run(&self, ctx: &TaskContext, lock: &TaskLock) -> CoreResult<usize> {
        let cutoff = ctx.clock.now() - ctx.workflow.config().finish_delta();
        let ids = ctx.workflow.store().read(|tables| {
            Ok(AppointmentQuery::new()
                .statuses(AppointmentStatus::FINISHABLE)
                .ends_at_or_before(cutoff)
                .order(QueryOrder::StartAsc)
                .ids(tables))
        })?;
        finish_all(ctx, lock, self.name(), ids, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::EVENT_APPOINTMENT_ASK_FOR_REVIEW;
    use crate::fixtures::{appointment, at, directory, timeslot, workflow_with, Harness};
    use crate::reconciliation::{InMemoryKeyValueStore, KeyValueStore, TaskOutcome, TaskRunner};
    use crate::store::Tables;
    use clinic_types::{DoctorId, PatientId};
    use std::sync::Arc;

    fn runner(h: &Harness) -> (TaskRunner, Arc<InMemoryKeyValueStore>) {
        let kv = Arc::new(InMemoryKeyValueStore::new(h.clock.clone()));
        let ctx = TaskContext::new(h.workflow.clone(), kv.clone(), h.clock.clone());
        (TaskRunner::new(ctx), kv)
    }

    fn affected(runner: &TaskRunner, task: &dyn ScheduledTask) -> usize {
        match runner.run_once(task).unwrap().outcome {
            TaskOutcome::Completed { affected } => affected,
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    fn planned(
        t: &mut Tables,
        patient: PatientId,
        doctor: DoctorId,
        start: DateTime<Utc>,
    ) -> AppointmentId {
        let mut a = appointment(patient, Some(doctor), start);
        a.status = AppointmentStatus::Planned;
        t.insert_appointment(a).unwrap()
    }

    #[test]
    fn test_disable_old_timeslots_closes_only_ended_free_slots() {
        let (mut t, dir) = directory();
        let ended = t
            .insert_timeslot(timeslot(dir.doctor, dir.subsidiary, at(2030, 1, 1, 9, 0), at(2030, 1, 1, 9, 30)))
            .unwrap();
        let running = t
            .insert_timeslot(timeslot(dir.doctor, dir.subsidiary, at(2030, 1, 1, 11, 45), at(2030, 1, 1, 12, 15)))
            .unwrap();
        let h = workflow_with(t, at(2030, 1, 1, 12, 0));
        let (runner, _) = runner(&h);

        assert_eq!(affected(&runner, &DisableOldTimeSlots), 1);
        h.read(|t| {
            assert!(!t.timeslot(ended).unwrap().is_available);
            assert!(t.timeslot(running).unwrap().is_available);
        });
    }

    #[test]
    fn test_reminders_fire_once_per_offset() {
        let (mut t, dir) = directory();
        let now = at(2030, 1, 1, 12, 0);
        let in_two_hours = planned(&mut t, dir.patient, dir.doctor, now + Duration::minutes(120) - Duration::seconds(30));
        let tomorrow = planned(&mut t, dir.patient, dir.doctor, now + Duration::minutes(1440) - Duration::seconds(10));
        // Outside both windows.
        planned(&mut t, dir.patient, dir.doctor, now + Duration::minutes(90));
        let h = workflow_with(t, now);
        let (runner, kv) = runner(&h);

        assert_eq!(affected(&runner, &RemindPlannedAppointments), 2);
        let reminded: Vec<AppointmentId> = h
            .notifier
            .named(EVENT_REMIND_ABOUT_PLANNED_APPOINTMENT)
            .into_iter()
            .map(|e| e.context.appointment_id)
            .collect();
        assert_eq!(reminded, vec![in_two_hours, tomorrow]);
        assert_eq!(
            kv.get(REMINDER_LAST_RUN_KEY).unwrap(),
            Some(now.to_rfc3339())
        );

        // A second run at the same instant has an empty window.
        assert_eq!(affected(&runner, &RemindPlannedAppointments), 0);
        h.clock.advance(Duration::minutes(1));
        assert_eq!(affected(&runner, &RemindPlannedAppointments), 0);
        assert_eq!(h.notifier.sent().len(), 2);
    }

    #[test]
    fn test_reminder_windows_tile_without_gaps() {
        let (mut t, dir) = directory();
        let now = at(2030, 1, 1, 12, 0);
        // Starts exactly on the boundary between two consecutive runs.
        let boundary = planned(&mut t, dir.patient, dir.doctor, now + Duration::minutes(120));
        let h = workflow_with(t, now);
        let (runner, _) = runner(&h);

        assert_eq!(affected(&runner, &RemindPlannedAppointments), 0);
        h.clock.advance(Duration::minutes(1));
        assert_eq!(affected(&runner, &RemindPlannedAppointments), 1);
        h.clock.advance(Duration::minutes(1));
        assert_eq!(affected(&runner, &RemindPlannedAppointments), 0);
        assert_eq!(
            h.notifier.sent()[0].context.appointment_id,
            boundary
        );
    }

    #[test]
    fn test_finish_yesterday_uses_local_date() {
        let (mut t, dir) = directory();
        // 04:00 local at UTC+3 on Jan 2 is 01:00 UTC.
        let yesterday_local = planned(&mut t, dir.patient, dir.doctor, at(2029, 12, 31, 22, 0));
        // 23:30 local on Dec 31, two local days back.
        let day_before = planned(&mut t, dir.patient, dir.doctor, at(2029, 12, 31, 20, 30));
        let mut moderated = appointment(dir.patient, Some(dir.doctor), at(2030, 1, 1, 9, 0));
        moderated.status = AppointmentStatus::OnModeration;
        let moderated = t.insert_appointment(moderated).unwrap();
        let h = workflow_with(t, at(2030, 1, 2, 1, 0));
        let cfg = h
            .workflow
            .config()
            .clone()
            .with_utc_offset(chrono::FixedOffset::east_opt(3 * 3600).unwrap());
        let workflow = h.with_config(cfg);
        let kv = Arc::new(InMemoryKeyValueStore::new(h.clock.clone()));
        let runner = TaskRunner::new(TaskContext::new(workflow, kv, h.clock.clone()));

        assert_eq!(affected(&runner, &FinishYesterdayAppointments), 1);
        h.read(|t| {
            assert_eq!(t.appointment(yesterday_local).unwrap().status, AppointmentStatus::Finished);
            assert_eq!(t.appointment(day_before).unwrap().status, AppointmentStatus::Planned);
            assert_eq!(t.appointment(moderated).unwrap().status, AppointmentStatus::OnModeration);
        });
        assert!(h.notifier.named(EVENT_APPOINTMENT_ASK_FOR_REVIEW).is_empty());
    }

    #[test]
    fn test_finish_ended_respects_delta_and_asks_for_review() {
        let (mut t, dir) = directory();
        let now = at(2030, 1, 1, 12, 0);
        // Ends 11:00, well past the 30 minute delta.
        let done = planned(&mut t, dir.patient, dir.doctor, at(2030, 1, 1, 10, 30));
        // Ends 11:45, inside the delta.
        let recent = planned(&mut t, dir.patient, dir.doctor, at(2030, 1, 1, 11, 15));
        let h = workflow_with(t, now);
        let (runner, _) = runner(&h);

        assert_eq!(affected(&runner, &FinishEndedAppointments), 1);
        h.read(|t| {
            assert_eq!(t.appointment(done).unwrap().status, AppointmentStatus::Finished);
            assert_eq!(t.appointment(recent).unwrap().status, AppointmentStatus::Planned);
            let actor = &t.history_of(done)[0].actor;
            assert_eq!(actor, &Actor::Task("finish_ended_appointments".into()));
        });
        assert_eq!(h.notifier.named(EVENT_APPOINTMENT_ASK_FOR_REVIEW).len(), 1);
    }

    #[test]
    fn test_expired_lock_stops_the_pass() {
        let (mut t, dir) = directory();
        let id = planned(&mut t, dir.patient, dir.doctor, at(2030, 1, 1, 9, 0));
        let h = workflow_with(t, at(2030, 1, 1, 12, 0));
        let kv: Arc<dyn KeyValueStore> = Arc::new(InMemoryKeyValueStore::new(h.clock.clone()));
        let ctx = TaskContext::new(h.workflow.clone(), kv.clone(), h.clock.clone());
        let lock = TaskLock::acquire(kv, h.clock.clone(), "finish_ended_appointments", Duration::minutes(1))
            .unwrap()
            .unwrap();
        h.clock.advance(Duration::minutes(2));

        assert!(FinishEndedAppointments.run(&ctx, &lock).is_err());
        h.read(|t| assert_eq!(t.appointment(id).unwrap().status, AppointmentStatus::Planned));
    }
}
