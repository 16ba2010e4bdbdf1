//! Attaching MIS-reported slots to adjacent appointments.
//!
//! When the MIS books several consecutive slots for one visit it reports them one by one. A
//! new slot that touches (within [`slot_merge_tolerance`]) a busy slot of an active
//! appointment of the same patient on the same local day is attached to that appointment. If the new slot bridges
//! several appointments, they are merged into the earliest created one and the others are
//! hidden.

use super::AppointmentWorkflow;
use crate::appointment::{Actor, Appointment, AppointmentStatus};
use crate::constants::slot_merge_tolerance;
use crate::interval::{local_date, validate_appointment_interval, Interval};
use crate::store::Tables;
use crate::{CoreError, CoreResult};
use chrono::{DateTime, Duration, FixedOffset, Utc};
use clinic_types::{AppointmentId, PatientId, TimeSlotId};
use std::collections::BTreeSet;

/// `other` touches `ts` from the left or from the right within `tolerance`.
fn touches(ts: &Interval, other: &Interval, tolerance: Duration) -> bool {
    let from_left = ts.start > other.start && ts.start - other.end <= tolerance;
    let from_right = ts.start < other.start && other.start - ts.end <= tolerance;
    from_left || from_right
}

/// Active appointments of `patient` whose busy slots touch `ts`.
fn adjacent_appointments(
    tables: &Tables,
    ts: TimeSlotId,
    patient: PatientId,
    offset: FixedOffset,
    tolerance: Duration,
) -> CoreResult<BTreeSet<AppointmentId>> {
    let slot = tables.timeslot(ts)?;
    let day = local_date(slot.start, offset);
    let window = slot.interval();

    let mut neighbours: Vec<_> = tables
        .timeslots()
        .filter(|s| s.id != ts && !s.is_available)
        .filter(|s| s.doctor == slot.doctor && s.subsidiary == slot.subsidiary)
        .filter(|s| local_date(s.start, offset) == day)
        .collect();
    neighbours.sort_by_key(|s| s.start);

    let mut found = BTreeSet::new();
    for s in neighbours {
        if !touches(&window, &s.interval(), tolerance) {
            continue;
        }
        for id in tables.linked_appointments(s.id) {
            let appointment = tables.appointment(id)?;
            if appointment.patient == patient && appointment.status.is_active() {
                found.insert(id);
            }
        }
    }
    Ok(found)
}

/// Merges `ids` into the earliest created appointment and returns its id.
fn merge_into_earliest(
    tables: &mut Tables,
    ids: &BTreeSet<AppointmentId>,
    ts: &Interval,
    tolerance: Duration,
    now: DateTime<Utc>,
) -> CoreResult<AppointmentId> {
    let appointments: Vec<Appointment> = ids
        .iter()
        .map(|id| tables.appointment(*id).cloned())
        .collect::<CoreResult<_>>()?;
    let survivor = appointments
        .iter()
        .min_by_key(|a| (a.created_at, a.id))
        .ok_or_else(|| CoreError::UnexpectedMerge("nothing to merge".into()))?
        .clone();

    for a in &appointments {
        if a.doctor != survivor.doctor
            || a.patient != survivor.patient
            || a.subsidiary != survivor.subsidiary
        {
            return Err(CoreError::UnexpectedMerge(format!(
                "appointments {} and {} differ in doctor, patient or subsidiary",
                survivor.id, a.id
            )));
        }
        let near = a
            .interval()
            .is_some_and(|interval| touches(ts, &interval, tolerance));
        if !near {
            return Err(CoreError::UnexpectedMerge(format!(
                "appointment {} is not adjacent to the new slot",
                a.id
            )));
        }
    }

    for a in appointments.iter().filter(|a| a.id != survivor.id) {
        tables.reassign_links(a.id, survivor.id);
        tables.set_status(a.id, AppointmentStatus::Hidden, Actor::Integration, now)?;
        tracing::info!(merged = %a.id, into = %survivor.id, "appointment merged");
    }
    Ok(survivor.id)
}

/// Recomputes `start`/`end` of `appointment` as the hull of its linked slots.
fn stretch_to_linked_slots(
    tables: &mut Tables,
    appointment: AppointmentId,
    now: DateTime<Utc>,
) -> CoreResult<Appointment> {
    let hull = tables
        .linked_slots(appointment)
        .into_iter()
        .map(|s| s.interval())
        .reduce(|a, b| a.hull(&b))
        .ok_or_else(|| CoreError::UnexpectedMerge("appointment has no linked slots".into()))?;
    validate_appointment_interval(hull.start, hull.end)?;

    let mut updated = tables.appointment(appointment)?.clone();
    updated.start = Some(hull.start);
    updated.end = Some(hull.end);
    updated.updated_at = now;
    tables.update_appointment(updated.clone())?;
    Ok(updated)
}

impl AppointmentWorkflow {
    /// Attaches the slot `ts`, which the MIS booked for `patient`, to that patient's adjacent
    /// appointment, if any.
    ///
    /// Returns the appointment the slot now belongs to, or `None` when nothing is adjacent.
    pub fn attach_nearby_slot(
        &self,
        ts: TimeSlotId,
        patient: PatientId,
    ) -> CoreResult<Option<Appointment>> {
        let now = self.clock.now();
        let offset = self.cfg.utc_offset();
        let tolerance = slot_merge_tolerance();

        let attached = self.store.write(|tables| {
            let candidates = adjacent_appointments(tables, ts, patient, offset, tolerance)?;
            if candidates.is_empty() {
                return Ok(None);
            }
            let window = tables.timeslot(ts)?.interval();
            let survivor = match candidates.first() {
                Some(only) if candidates.len() == 1 => *only,
                _ => merge_into_earliest(tables, &candidates, &window, tolerance, now)?,
            };
            tables.attach_reported_slot(ts, survivor)?;
            stretch_to_linked_slots(tables, survivor, now).map(Some)
        })?;

        if let Some(appointment) = &attached {
            tracing::info!(slot = %ts, patient = %patient, appointment = %appointment.id, "slot attached");
        }
        Ok(attached)
    }
}
