//! Patient cancellation and finishing.

use super::{apply_transition, AppointmentWorkflow, Transition};
use crate::appointment::{Actor, Appointment, AppointmentStatus};
use crate::collaborators::IntegrationCommand;
use crate::constants::EVENT_APPOINTMENT_ASK_FOR_REVIEW;
use crate::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use clinic_types::{AppointmentId, PatientId};

impl AppointmentWorkflow {
    /// Cancels on behalf of `actor`, who must be the patient or one of their masters.
    ///
    /// Linked slots stay busy and linked. The MIS is told after the commit.
    pub fn cancel_by_patient(
        &self,
        id: AppointmentId,
        actor: PatientId,
    ) -> CoreResult<Appointment> {
        let now = self.clock.now();
        let transition = Transition::CancelByPatient(self.cfg.features().patient_cancel_policy);
        let appointment = self.store.write(|tables| {
            let patient = tables.appointment(id)?.patient;
            if actor != patient && !tables.masters_of(patient).contains(&actor) {
                return Err(CoreError::WrongOwner);
            }
            apply_transition(tables, id, transition, Actor::Patient(actor), now)
        })?;

        tracing::info!(appointment = %id, actor = %actor, "appointment cancelled by patient");
        self.submit_integration(IntegrationCommand::CancelAppointmentByPatient {
            appointment_id: id,
            author_patient_id: actor,
        });
        Ok(appointment)
    }

    /// Moves a non-archived appointment to `FINISHED`.
    ///
    /// Finishing a `FINISHED` appointment is a no-op. With `ask_for_review` the patient is
    /// asked for a review when [`AppointmentWorkflow::review_permitted`] allows it.
    pub fn finish(
        &self,
        id: AppointmentId,
        ask_for_review: bool,
        actor: Actor,
    ) -> CoreResult<Appointment> {
        let now = self.clock.now();
        let (appointment, changed) = self.store.write(|tables| {
            let current = tables.appointment(id)?;
            if current.status == AppointmentStatus::Finished {
                return Ok((current.clone(), false));
            }
            let appointment = apply_transition(tables, id, Transition::Finish, actor, now)?;
            Ok((appointment, true))
        })?;

        if !changed {
            tracing::debug!(appointment = %id, "appointment already finished");
            return Ok(appointment);
        }
        tracing::info!(appointment = %id, "appointment finished");
        if ask_for_review && self.review_permitted(&appointment, now) {
            self.notify_after_commit(EVENT_APPOINTMENT_ASK_FOR_REVIEW, id);
        }
        Ok(appointment)
    }

    /// A review may be requested for a finished appointment that has none yet and ended
    /// within the review window.
    pub fn review_permitted(&self, appointment: &Appointment, now: DateTime<Utc>) -> bool {
        if !self.cfg.features().reviews || appointment.status != AppointmentStatus::Finished {
            return false;
        }
        let Some(end) = appointment.end else {
            return false;
        };
        (now - end).abs() <= self.cfg.review_window() && !self.reviews.has_review(appointment.id)
    }
}
