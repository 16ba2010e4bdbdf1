//! TimeSlot store: availability windows and their links to appointments.
//!
//! A slot linked to a non-archived appointment is never available. `link` is the only way
//! a slot becomes busy for an appointment, and it refuses a slot that is already busy, so
//! two linkers of the same slot cannot both succeed (the store serializes writers).

use crate::interval::{validate_timeslot_interval, Interval};
use crate::store::{SlotLink, Tables};
use crate::timeslot::TimeSlot;
use crate::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use clinic_types::{AppointmentId, DoctorId, SubsidiaryId, TimeSlotId};

impl Tables {
    /// Adds a slot after validating its interval.
    pub fn insert_timeslot(&mut self, slot: TimeSlot) -> CoreResult<TimeSlotId> {
        validate_timeslot_interval(slot.start, slot.end)?;
        self.doctor(slot.doctor)?;
        self.subsidiary(slot.subsidiary)?;
        let id = slot.id;
        self.timeslots.insert(id, slot);
        Ok(id)
    }

    pub fn timeslot(&self, id: TimeSlotId) -> CoreResult<&TimeSlot> {
        self.timeslots.get(&id).ok_or(CoreError::SlotNotFound(id))
    }

    fn timeslot_mut(&mut self, id: TimeSlotId) -> CoreResult<&mut TimeSlot> {
        self.timeslots
            .get_mut(&id)
            .ok_or(CoreError::SlotNotFound(id))
    }

    pub fn timeslots(&self) -> impl Iterator<Item = &TimeSlot> {
        self.timeslots.values()
    }

    /// Moves a slot to a new window.
    pub fn reschedule_timeslot(
        &mut self,
        id: TimeSlotId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CoreResult<()> {
        validate_timeslot_interval(start, end)?;
        let slot = self.timeslot_mut(id)?;
        slot.start = start;
        slot.end = end;
        Ok(())
    }

    /// Finds the slot the MIS knows under `timeslot_id`.
    pub fn timeslot_by_integration_id(&self, timeslot_id: i64) -> Option<&TimeSlot> {
        self.timeslots
            .values()
            .find(|s| s.integration_data.timeslot_id == Some(timeslot_id))
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Available slots of `doctor` intersecting `window`, ordered by start.
    pub fn free_for_doctor_in(&self, doctor: DoctorId, window: Interval) -> Vec<&TimeSlot> {
        let mut slots: Vec<&TimeSlot> = self
            .timeslots
            .values()
            .filter(|s| s.doctor == doctor && s.is_available && s.interval().intersects(&window))
            .collect();
        slots.sort_by_key(|s| s.start);
        slots
    }

    /// Slots of `doctor` with `start ≤ t ≤ end`, optionally ignoring one slot.
    pub fn intersects_point(
        &self,
        doctor: DoctorId,
        t: DateTime<Utc>,
        excluding: Option<TimeSlotId>,
    ) -> Vec<&TimeSlot> {
        self.timeslots
            .values()
            .filter(|s| s.doctor == doctor && Some(s.id) != excluding)
            .filter(|s| s.interval().intersects_point(t))
            .collect()
    }

    /// Available slots that already ended (`end < now`).
    pub fn free_past(&self, now: DateTime<Utc>) -> Vec<TimeSlotId> {
        self.timeslots
            .values()
            .filter(|s| s.is_available && s.end < now)
            .map(|s| s.id)
            .collect()
    }

    /// Future free slots patients may book: the doctor is visible and accepts slot picks.
    pub fn future_free_for_patients(
        &self,
        now: DateTime<Utc>,
        doctor: Option<DoctorId>,
        subsidiary: Option<SubsidiaryId>,
    ) -> Vec<&TimeSlot> {
        let mut slots: Vec<&TimeSlot> = self
            .timeslots
            .values()
            .filter(|s| s.is_available && s.start > now)
            .filter(|s| doctor.map_or(true, |d| s.doctor == d))
            .filter(|s| subsidiary.map_or(true, |sub| s.subsidiary == sub))
            .filter(|s| {
                self.doctors.get(&s.doctor).is_some_and(|d| {
                    !d.is_totally_hidden && d.is_timeslots_available_for_patient
                })
            })
            .collect();
        slots.sort_by_key(|s| (s.start, s.id));
        slots
    }

    // ------------------------------------------------------------------
    // Links
    // ------------------------------------------------------------------

    pub fn is_linked(&self, slot: TimeSlotId, appointment: AppointmentId) -> bool {
        self.slot_links.contains(&SlotLink {
            timeslot: slot,
            appointment,
        })
    }

    /// Slots linked to `appointment`, ordered by start.
    pub fn linked_slots(&self, appointment: AppointmentId) -> Vec<&TimeSlot> {
        let mut slots: Vec<&TimeSlot> = self
            .slot_links
            .iter()
            .filter(|l| l.appointment == appointment)
            .filter_map(|l| self.timeslots.get(&l.timeslot))
            .collect();
        slots.sort_by_key(|s| s.start);
        slots
    }

    pub fn linked_appointments(&self, slot: TimeSlotId) -> Vec<AppointmentId> {
        self.slot_links
            .iter()
            .filter(|l| l.timeslot == slot)
            .map(|l| l.appointment)
            .collect()
    }

    /// Marks the slot busy and records the edge.
    ///
    /// Idempotent for an existing `(slot, appointment)` edge; otherwise a busy slot yields
    /// [`CoreError::SlotBusy`].
    pub fn link(&mut self, slot: TimeSlotId, appointment: AppointmentId) -> CoreResult<()> {
        if self.is_linked(slot, appointment) {
            return Ok(());
        }
        self.appointment(appointment)?;
        let ts = self.timeslot_mut(slot)?;
        if !ts.is_available {
            return Err(CoreError::SlotBusy(slot));
        }
        ts.is_available = false;
        self.slot_links.insert(SlotLink {
            timeslot: slot,
            appointment,
        });
        Ok(())
    }

    /// Attaches a slot the MIS already reports as booked for `appointment`.
    ///
    /// Unlike [`Tables::link`] the slot may already be unavailable, but it must not belong to
    /// any other appointment.
    pub(crate) fn attach_reported_slot(
        &mut self,
        slot: TimeSlotId,
        appointment: AppointmentId,
    ) -> CoreResult<()> {
        if let Some(other) = self
            .linked_appointments(slot)
            .into_iter()
            .find(|a| *a != appointment)
        {
            return Err(CoreError::UnexpectedMerge(format!(
                "time slot {slot} already belongs to appointment {other}"
            )));
        }
        self.timeslot_mut(slot)?.is_available = false;
        self.slot_links.insert(SlotLink {
            timeslot: slot,
            appointment,
        });
        Ok(())
    }

    /// Removes the edge and frees the slot.
    pub fn unlink(&mut self, slot: TimeSlotId, appointment: AppointmentId) -> CoreResult<()> {
        let removed = self.slot_links.remove(&SlotLink {
            timeslot: slot,
            appointment,
        });
        if !removed {
            return Err(CoreError::not_found("time slot link", slot));
        }
        self.timeslot_mut(slot)?.is_available = true;
        Ok(())
    }

    /// Frees `slots`, optionally severing all their appointment edges first.
    pub fn bulk_mark_free(&mut self, slots: &[TimeSlotId], remove_links: bool) -> usize {
        if remove_links {
            self.slot_links.retain(|l| !slots.contains(&l.timeslot));
        }
        let mut changed = 0;
        for id in slots {
            if let Some(slot) = self.timeslots.get_mut(id) {
                if !slot.is_available {
                    slot.is_available = true;
                    changed += 1;
                }
            }
        }
        changed
    }

    /// Marks `slots` unavailable.
    pub fn bulk_mark_busy(&mut self, slots: &[TimeSlotId]) -> usize {
        let mut changed = 0;
        for id in slots {
            if let Some(slot) = self.timeslots.get_mut(id) {
                if slot.is_available {
                    slot.is_available = false;
                    changed += 1;
                }
            }
        }
        changed
    }

    /// Moves every edge of `from` onto `to`.
    pub(crate) fn reassign_links(&mut self, from: AppointmentId, to: AppointmentId) -> usize {
        let moved: Vec<SlotLink> = self
            .slot_links
            .iter()
            .filter(|l| l.appointment == from)
            .copied()
            .collect();
        for link in &moved {
            self.slot_links.remove(link);
            self.slot_links.insert(SlotLink {
                timeslot: link.timeslot,
                appointment: to,
            });
        }
        moved.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{at, directory, timeslot};
    use chrono::Duration;

    #[test]
    fn test_insert_rejects_zero_length_slot() {
        let (mut t, dir) = directory();
        let start = at(2030, 1, 10, 9, 0);
        let slot = timeslot(dir.doctor, dir.subsidiary, start, start);
        assert!(matches!(
            t.insert_timeslot(slot),
            Err(CoreError::InvalidInterval(_))
        ));
    }

    #[test]
    fn test_timeslot_by_integration_id() {
        let (mut t, dir) = directory();
        let start = at(2030, 1, 10, 9, 0);
        let mut slot = timeslot(dir.doctor, dir.subsidiary, start, start + Duration::minutes(30));
        slot.integration_data.timeslot_id = Some(4412);
        let id = t.insert_timeslot(slot).unwrap();
        assert_eq!(t.timeslot_by_integration_id(4412).map(|s| s.id), Some(id));
        assert!(t.timeslot_by_integration_id(4413).is_none());
    }

    #[test]
    fn test_free_for_doctor_in_skips_busy_and_other_doctors() {
        let (mut t, dir) = directory();
        let start = at(2030, 1, 10, 9, 0);
        let free = t
            .insert_timeslot(timeslot(dir.doctor, dir.subsidiary, start, start + Duration::minutes(30)))
            .unwrap();
        let mut busy = timeslot(
            dir.doctor,
            dir.subsidiary,
            start + Duration::minutes(30),
            start + Duration::minutes(60),
        );
        busy.is_available = false;
        t.insert_timeslot(busy).unwrap();
        t.insert_timeslot(timeslot(dir.other_doctor, dir.subsidiary, start, start + Duration::minutes(30)))
            .unwrap();

        let window = Interval::new(start, start + Duration::hours(2));
        let found: Vec<TimeSlotId> = t
            .free_for_doctor_in(dir.doctor, window)
            .iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(found, vec![free]);
    }

    #[test]
    fn test_intersects_point_is_closed_and_honours_exclusion() {
        let (mut t, dir) = directory();
        let start = at(2030, 1, 10, 9, 0);
        let id = t
            .insert_timeslot(timeslot(dir.doctor, dir.subsidiary, start, start + Duration::minutes(30)))
            .unwrap();
        assert_eq!(t.intersects_point(dir.doctor, start + Duration::minutes(30), None).len(), 1);
        assert!(t.intersects_point(dir.doctor, start, Some(id)).is_empty());
        assert!(t.intersects_point(dir.doctor, start + Duration::minutes(31), None).is_empty());
    }

    #[test]
    fn test_free_past_and_bulk_mark_busy() {
        let (mut t, dir) = directory();
        let now = at(2030, 1, 10, 12, 0);
        let past = t
            .insert_timeslot(timeslot(dir.doctor, dir.subsidiary, now - Duration::hours(2), now - Duration::hours(1)))
            .unwrap();
        t.insert_timeslot(timeslot(dir.doctor, dir.subsidiary, now + Duration::hours(1), now + Duration::hours(2)))
            .unwrap();

        let stale = t.free_past(now);
        assert_eq!(stale, vec![past]);
        assert_eq!(t.bulk_mark_busy(&stale), 1);
        assert!(t.free_past(now).is_empty());
    }
}
