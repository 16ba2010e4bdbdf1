//! Moderator decisions on appointment requests.

use super::{apply_transition, AppointmentWorkflow, Transition};
use crate::appointment::{Actor, Appointment, AppointmentStatus};
use crate::constants::{
    EVENT_APPOINTMENT_CANCELED_BY_ADMIN, EVENT_APPOINTMENT_REQUEST_APPROVED_BY_ADMIN,
    EVENT_APPOINTMENT_REQUEST_REJECTED_BY_ADMIN,
};
use crate::store::Tables;
use crate::{CoreError, CoreResult};
use clinic_types::{AppointmentId, TimeSlotId};

fn linked_slot_ids(tables: &Tables, appointment: AppointmentId) -> Vec<TimeSlotId> {
    tables
        .linked_slots(appointment)
        .into_iter()
        .map(|s| s.id)
        .collect()
}

impl AppointmentWorkflow {
    /// `ON_MODERATION → PLANNED`; doctor and subsidiary must be known.
    pub fn approve(&self, id: AppointmentId) -> CoreResult<Appointment> {
        let now = self.clock.now();
        let appointment = self.store.write(|tables| {
            let current = tables.appointment(id)?;
            if current.status != AppointmentStatus::OnModeration {
                return Err(CoreError::wrong_status(
                    current.status,
                    Transition::Approve.allowed_from(),
                ));
            }
            if current.doctor.is_none() || current.subsidiary.is_none() {
                return Err(CoreError::ApproveError(
                    "doctor and subsidiary must be set before approval".into(),
                ));
            }
            apply_transition(tables, id, Transition::Approve, Actor::Moderator, now)
        })?;

        tracing::info!(appointment = %id, "appointment request approved");
        self.notify_after_commit(EVENT_APPOINTMENT_REQUEST_APPROVED_BY_ADMIN, id);
        Ok(appointment)
    }

    /// `ON_MODERATION → REJECTED`; every linked slot is freed and unlinked.
    pub fn reject(&self, id: AppointmentId) -> CoreResult<Appointment> {
        let now = self.clock.now();
        let (appointment, freed) = self.store.write(|tables| {
            let appointment =
                apply_transition(tables, id, Transition::Reject, Actor::Moderator, now)?;
            let slots = linked_slot_ids(tables, id);
            tables.bulk_mark_free(&slots, true);
            Ok((appointment, slots.len()))
        })?;

        tracing::info!(appointment = %id, freed, "appointment request rejected");
        self.notify_after_commit(EVENT_APPOINTMENT_REQUEST_REJECTED_BY_ADMIN, id);
        Ok(appointment)
    }

    /// `REJECTED | PLANNED → ON_MODERATION`; slots are not touched.
    pub fn return_to_moderation(&self, id: AppointmentId) -> CoreResult<Appointment> {
        let now = self.clock.now();
        let appointment = self.store.write(|tables| {
            apply_transition(tables, id, Transition::ReturnToModeration, Actor::Moderator, now)
        })?;
        tracing::info!(appointment = %id, "appointment returned to moderation");
        Ok(appointment)
    }

    /// `ON_MODERATION → CANCELED_BY_MODERATOR`; every linked slot is freed and unlinked.
    pub fn cancel_by_moderator(&self, id: AppointmentId) -> CoreResult<Appointment> {
        let now = self.clock.now();
        let (appointment, freed) = self.store.write(|tables| {
            let appointment =
                apply_transition(tables, id, Transition::CancelByModerator, Actor::Moderator, now)?;
            let slots = linked_slot_ids(tables, id);
            tables.bulk_mark_free(&slots, true);
            Ok((appointment, slots.len()))
        })?;

        tracing::info!(appointment = %id, freed, "appointment cancelled by moderator");
        self.notify_after_commit(EVENT_APPOINTMENT_CANCELED_BY_ADMIN, id);
        Ok(appointment)
    }
}
