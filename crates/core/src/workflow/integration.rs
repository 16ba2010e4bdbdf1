//! Changes pushed by the MIS.
//!
//! The MIS is the source of truth for what happens at the clinic, so its payloads are applied
//! verbatim, with one exception: a patient's own cancellation is never overwritten by a
//! cancellation status coming back from the MIS.

use super::AppointmentWorkflow;
use crate::appointment::{
    Actor, Appointment, AppointmentIntegrationData, AppointmentStatus, CreatedByType,
};
use crate::constants::EVENT_APPOINTMENT_CREATED_BY_ADMIN;
use crate::interval::validate_appointment_interval;
use crate::store::Tables;
use crate::CoreResult;
use chrono::{DateTime, Utc};
use clinic_types::{AppointmentId, DoctorId, NonEmptyText, PatientId, ServiceId, SubsidiaryId};
use serde::Deserialize;

/// An appointment as the MIS reports it.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct IncomingAppointment {
    pub patient_id: PatientId,
    #[serde(default)]
    pub doctor_id: Option<DoctorId>,
    #[serde(default)]
    pub service_id: Option<ServiceId>,
    #[serde(default)]
    pub subsidiary_id: Option<SubsidiaryId>,
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    pub status: AppointmentStatus,
    #[serde(default)]
    pub integration_data: AppointmentIntegrationData,
    /// Origin declared by the MIS; administrators when absent.
    #[serde(default)]
    pub created_by_type: Option<CreatedByType>,
    #[serde(default)]
    pub reason_text: Option<NonEmptyText>,
    #[serde(default)]
    pub price: Option<i64>,
}

/// Local `CANCELED_BY_PATIENT` wins over any incoming cancellation.
fn effective_status(local: AppointmentStatus, incoming: AppointmentStatus) -> AppointmentStatus {
    if local == AppointmentStatus::CanceledByPatient && incoming.is_cancelled() {
        local
    } else {
        incoming
    }
}

fn check_references(tables: &Tables, incoming: &IncomingAppointment) -> CoreResult<()> {
    tables.patient(incoming.patient_id)?;
    if let Some(doctor) = incoming.doctor_id {
        tables.doctor(doctor)?;
    }
    if let Some(service) = incoming.service_id {
        tables.service(service)?;
    }
    if let Some(subsidiary) = incoming.subsidiary_id {
        tables.subsidiary(subsidiary)?;
    }
    if let (Some(start), Some(end)) = (incoming.start, incoming.end) {
        validate_appointment_interval(start, end)?;
    }
    Ok(())
}

/// Applies `incoming` to the stored appointment `id` inside the current transaction.
fn apply_incoming(
    tables: &mut Tables,
    id: AppointmentId,
    incoming: &IncomingAppointment,
    now: DateTime<Utc>,
) -> CoreResult<Appointment> {
    check_references(tables, incoming)?;
    let mut updated = tables.appointment(id)?.clone();
    let status = effective_status(updated.status, incoming.status);

    updated.patient = incoming.patient_id;
    updated.doctor = incoming.doctor_id;
    updated.service = incoming.service_id;
    updated.subsidiary = incoming.subsidiary_id;
    updated.start = incoming.start;
    updated.end = incoming.end;
    updated.integration_data = incoming.integration_data.clone();
    if incoming.reason_text.is_some() {
        updated.reason_text = incoming.reason_text.clone();
    }
    if incoming.price.is_some() {
        updated.price = incoming.price;
    }
    updated.updated_at = now;
    tables.update_appointment(updated.clone())?;

    if status != updated.status {
        tables.set_status(id, status, Actor::Integration, now)?;
    }
    if !status.is_archived() {
        let linked: Vec<_> = tables.linked_slots(id).into_iter().map(|s| s.id).collect();
        tables.bulk_mark_busy(&linked);
    }
    Ok(tables.appointment(id)?.clone())
}

impl AppointmentWorkflow {
    /// Applies an MIS update to appointment `id`.
    pub fn update_from_integration_data(
        &self,
        id: AppointmentId,
        incoming: IncomingAppointment,
    ) -> CoreResult<Appointment> {
        let now = self.clock.now();
        let (before, updated) = self.store.write(|tables| {
            let before = tables.appointment(id)?.status;
            Ok((before, apply_incoming(tables, id, &incoming, now)?))
        })?;

        if updated.status != incoming.status {
            tracing::info!(
                appointment = %id,
                incoming = %incoming.status,
                kept = %updated.status,
                "kept patient cancellation over MIS status"
            );
        } else if before != updated.status {
            tracing::info!(appointment = %id, from = %before, to = %updated.status, "status updated by MIS");
        }
        Ok(updated)
    }

    /// Creates an appointment reported by the MIS.
    ///
    /// An existing appointment with the same `(patient, doctor, service, subsidiary, start,
    /// end)` is updated instead. New `PLANNED` appointments are announced to the patient.
    pub fn create_from_integration_data(
        &self,
        incoming: IncomingAppointment,
    ) -> CoreResult<Appointment> {
        let now = self.clock.now();
        let (appointment, created) = self.store.write(|tables| {
            check_references(tables, &incoming)?;
            let appointment = Appointment {
                id: AppointmentId::new(),
                patient: incoming.patient_id,
                author_patient: incoming.patient_id,
                doctor: incoming.doctor_id,
                service: incoming.service_id,
                subsidiary: incoming.subsidiary_id,
                reason_text: incoming.reason_text.clone(),
                start: incoming.start,
                end: incoming.end,
                is_for_whole_day: false,
                price: incoming.price,
                status: incoming.status,
                created_by_type: incoming
                    .created_by_type
                    .unwrap_or(CreatedByType::Administrator),
                integration_data: incoming.integration_data.clone(),
                created_at: now,
                updated_at: now,
            };

            if let Some(existing) = tables.appointment_by_key(&appointment.uniqueness_key()) {
                let id = existing.id;
                return Ok((apply_incoming(tables, id, &incoming, now)?, false));
            }
            tables.insert_appointment(appointment.clone())?;
            tables.record_creation(&appointment, Actor::Integration);
            Ok((appointment, true))
        })?;

        if created {
            tracing::info!(appointment = %appointment.id, status = %appointment.status, "appointment created by MIS");
            if appointment.status == AppointmentStatus::Planned {
                self.notify_after_commit(EVENT_APPOINTMENT_CREATED_BY_ADMIN, appointment.id);
            }
        } else {
            tracing::debug!(appointment = %appointment.id, "MIS appointment already known, updated");
        }
        Ok(appointment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{appointment, at, directory, timeslot, workflow_with};
    use crate::CoreError;
    use chrono::Duration;

    fn incoming_for(a: &Appointment, status: AppointmentStatus) -> IncomingAppointment {
        IncomingAppointment {
            patient_id: a.patient,
            doctor_id: a.doctor,
            service_id: a.service,
            subsidiary_id: a.subsidiary,
            start: a.start,
            end: a.end,
            status,
            integration_data: AppointmentIntegrationData::default(),
            created_by_type: None,
            reason_text: None,
            price: Some(250_000),
        }
    }

    #[test]
    fn test_patient_cancellation_survives_mis_cancel() {
        let (mut t, dir) = directory();
        let mut a = appointment(dir.patient, Some(dir.doctor), at(2030, 1, 2, 9, 0));
        a.status = AppointmentStatus::CanceledByPatient;
        let id = t.insert_appointment(a.clone()).unwrap();
        let h = workflow_with(t, at(2030, 1, 1, 12, 0));

        let updated = h
            .workflow
            .update_from_integration_data(id, incoming_for(&a, AppointmentStatus::CanceledByModerator))
            .unwrap();
        assert_eq!(updated.status, AppointmentStatus::CanceledByPatient);
        assert_eq!(updated.price, Some(250_000));
        assert!(h.read(|t| t.history_of(id).is_empty()));
    }

    #[test]
    fn test_non_cancel_status_is_applied_verbatim() {
        let (mut t, dir) = directory();
        let mut a = appointment(dir.patient, Some(dir.doctor), at(2030, 1, 2, 9, 0));
        a.status = AppointmentStatus::CanceledByPatient;
        let id = t.insert_appointment(a.clone()).unwrap();
        let h = workflow_with(t, at(2030, 1, 1, 12, 0));

        let updated = h
            .workflow
            .update_from_integration_data(id, incoming_for(&a, AppointmentStatus::Planned))
            .unwrap();
        assert_eq!(updated.status, AppointmentStatus::Planned);
        let history = h.read(|t| t.history_of(id).into_iter().cloned().collect::<Vec<_>>());
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].actor, Actor::Integration);
    }

    #[test]
    fn test_mis_replan_after_moderator_cancel_keeps_slot_consistent() {
        let (mut t, dir) = directory();
        let start = at(2030, 1, 2, 9, 0);
        let slot = t
            .insert_timeslot(timeslot(dir.doctor, dir.subsidiary, start, start + Duration::minutes(30)))
            .unwrap();
        let mut a = appointment(dir.patient, Some(dir.doctor), start);
        a.subsidiary = Some(dir.subsidiary);
        let id = t.insert_appointment(a.clone()).unwrap();
        t.link(slot, id).unwrap();
        let h = workflow_with(t, at(2030, 1, 1, 12, 0));

        h.workflow.cancel_by_moderator(id).unwrap();
        let replanned = h
            .workflow
            .update_from_integration_data(id, incoming_for(&a, AppointmentStatus::Planned))
            .unwrap();
        assert_eq!(replanned.status, AppointmentStatus::Planned);
        h.read(|t| {
            for linked in t.linked_appointments(slot) {
                assert!(t.appointment(linked).unwrap().status.is_archived());
            }
            assert!(t.timeslot(slot).unwrap().is_available);
        });
    }

    #[test]
    fn test_replanned_appointment_holds_its_linked_slots() {
        let (mut t, dir) = directory();
        let start = at(2030, 1, 2, 9, 0);
        let slot = t
            .insert_timeslot(timeslot(dir.doctor, dir.subsidiary, start, start + Duration::minutes(30)))
            .unwrap();
        let mut a = appointment(dir.patient, Some(dir.doctor), start);
        a.subsidiary = Some(dir.subsidiary);
        a.status = AppointmentStatus::CanceledByDoctor;
        let id = t.insert_appointment(a.clone()).unwrap();
        t.link(slot, id).unwrap();
        t.bulk_mark_free(&[slot], false);
        let h = workflow_with(t, at(2030, 1, 1, 12, 0));

        h.workflow
            .update_from_integration_data(id, incoming_for(&a, AppointmentStatus::Planned))
            .unwrap();
        h.read(|t| {
            assert!(t.is_linked(slot, id));
            assert!(!t.timeslot(slot).unwrap().is_available);
        });
    }

    #[test]
    fn test_invalid_incoming_interval_is_rejected() {
        let (mut t, dir) = directory();
        let a = appointment(dir.patient, Some(dir.doctor), at(2030, 1, 2, 9, 0));
        let id = t.insert_appointment(a.clone()).unwrap();
        let h = workflow_with(t, at(2030, 1, 1, 12, 0));
        let mut incoming = incoming_for(&a, AppointmentStatus::Planned);
        incoming.end = Some(at(2030, 1, 2, 8, 0));
        assert!(matches!(
            h.workflow.update_from_integration_data(id, incoming),
            Err(CoreError::InvalidInterval(_))
        ));
    }

    #[test]
    fn test_create_from_integration_deduplicates_and_notifies() {
        let (t, dir) = directory();
        let h = workflow_with(t, at(2030, 1, 1, 12, 0));
        let template = {
            let mut a = appointment(dir.patient, Some(dir.doctor), at(2030, 1, 2, 9, 0));
            a.subsidiary = Some(dir.subsidiary);
            a
        };
        let incoming = incoming_for(&template, AppointmentStatus::Planned);

        let first = h.workflow.create_from_integration_data(incoming.clone()).unwrap();
        assert_eq!(first.created_by_type, CreatedByType::Administrator);
        let again = h.workflow.create_from_integration_data(incoming).unwrap();
        assert_eq!(again.id, first.id);
        assert_eq!(h.read(|t| t.appointments.len()), 1);
        assert_eq!(h.notifier.named(EVENT_APPOINTMENT_CREATED_BY_ADMIN).len(), 1);
    }

    #[test]
    fn test_doctor_origin_is_recorded() {
        let (t, dir) = directory();
        let h = workflow_with(t, at(2030, 1, 1, 12, 0));
        let template = appointment(dir.patient, Some(dir.doctor), at(2030, 1, 2, 9, 0));
        let mut incoming = incoming_for(&template, AppointmentStatus::OnModeration);
        incoming.created_by_type = Some(CreatedByType::Doctor);
        let created = h.workflow.create_from_integration_data(incoming).unwrap();
        assert_eq!(created.created_by_type, CreatedByType::Doctor);
        assert!(h.notifier.sent().is_empty());
    }
}
