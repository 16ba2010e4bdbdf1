//! Appointment creation by patients and administrators.

use super::AppointmentWorkflow;
use crate::appointment::{
    Actor, Appointment, AppointmentIntegrationData, AppointmentStatus, CreatedByType,
};
use crate::collaborators::IntegrationCommand;
use crate::constants::EVENT_APPOINTMENT_CREATED_BY_ADMIN;
use crate::interval::{local_date, local_day_bounds, validate_appointment_interval, Interval};
use crate::repositories::AppointmentQuery;
use crate::store::Tables;
use crate::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use clinic_types::{
    AppointmentId, DoctorId, NonEmptyText, PatientId, ServiceId, SubsidiaryId, TimeSlotId,
};
use serde::Deserialize;

/// Patient-submitted booking request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct AppointmentRequest {
    #[serde(default)]
    pub time_slot_id: Option<TimeSlotId>,
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub subsidiary_id: Option<SubsidiaryId>,
    #[serde(default)]
    pub service_id: Option<ServiceId>,
    #[serde(default)]
    pub doctor_id: Option<DoctorId>,
    #[serde(default)]
    pub reason_text: Option<NonEmptyText>,
    /// Book for a related patient instead of the author.
    #[serde(default)]
    pub target_patient_id: Option<PatientId>,
}

/// Appointment entered by clinic staff; it skips moderation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdminAppointmentRequest {
    pub patient: PatientId,
    pub doctor: DoctorId,
    pub subsidiary: SubsidiaryId,
    pub service: Option<ServiceId>,
    pub time_slot_id: Option<TimeSlotId>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub is_for_whole_day: bool,
    pub price: Option<i64>,
    pub reason_text: Option<NonEmptyText>,
}

/// Result of the doctor/slot checks: the window to book and the slot to link.
struct SlotChoice {
    doctor: Option<DoctorId>,
    subsidiary: Option<SubsidiaryId>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    slot: Option<TimeSlotId>,
}

/// Resolves the effective patient of a request made by `author`.
fn resolve_target(
    tables: &Tables,
    author: PatientId,
    target: Option<PatientId>,
    related_patients_enabled: bool,
) -> CoreResult<PatientId> {
    let Some(target) = target else {
        return Ok(author);
    };
    if !related_patients_enabled {
        return Err(CoreError::RelatedPatientsDisabled);
    }
    if tables.slaves_of(author).is_empty() || !tables.can_author_for(author, target) {
        return Err(CoreError::NoRelatedPatients);
    }
    Ok(target)
}

/// Doctor and slot checks of a patient request.
///
/// A `time_slot_id` without `doctor_id` books the slot's doctor. The busy-window check skips
/// the patient's own appointments; a repeated request is answered by the today-guard.
fn check_doctor_and_slot(
    tables: &Tables,
    patient: PatientId,
    request: &AppointmentRequest,
) -> CoreResult<SlotChoice> {
    let mut choice = SlotChoice {
        doctor: request.doctor_id,
        subsidiary: request.subsidiary_id,
        start: request.start,
        end: request.end,
        slot: None,
    };

    if let Some(slot_id) = request.time_slot_id {
        if let Some(doctor_id) = request.doctor_id {
            if !tables.doctor(doctor_id)?.is_timeslots_available_for_patient {
                return Err(CoreError::TimeslotsDisabledForDoctor);
            }
        }
        let slot = tables.timeslot(slot_id)?;
        let doctor_id = request.doctor_id.unwrap_or(slot.doctor);
        if request.doctor_id.is_none()
            && !tables.doctor(doctor_id)?.is_timeslots_available_for_patient
        {
            return Err(CoreError::TimeslotsDisabledForDoctor);
        }
        if slot.doctor != doctor_id {
            return Err(CoreError::SlotNotFound(slot_id));
        }
        if !slot.is_available {
            return Err(CoreError::SlotBusy(slot_id));
        }
        choice.doctor = Some(doctor_id);
        choice.subsidiary = request.subsidiary_id.or(Some(slot.subsidiary));
        choice.start = Some(slot.start);
        choice.end = Some(slot.end);
        choice.slot = Some(slot_id);
        return Ok(choice);
    }

    if let (Some(doctor_id), Some(start), Some(end)) = (request.doctor_id, request.start, request.end)
    {
        tables.doctor(doctor_id)?;
        let window = Interval::new(start, end);
        if tables.free_for_doctor_in(doctor_id, window).is_empty() {
            return Err(CoreError::NoDoctorFreeSlots);
        }
        let busy = AppointmentQuery::for_doctor(doctor_id)
            .exclude_statuses(AppointmentStatus::CANCELLED)
            .exclude_statuses([AppointmentStatus::Rejected])
            .exclude_patients([patient])
            .intersecting(window)
            .exists(tables);
        if busy {
            return Err(CoreError::TimeBusyByAppointment);
        }
    } else if let Some(doctor_id) = request.doctor_id {
        tables.doctor(doctor_id)?;
    }
    Ok(choice)
}

impl AppointmentWorkflow {
    /// Creates an `ON_MODERATION` request on behalf of `author`.
    ///
    /// All checks, the insert and the slot link run in one transaction; the MIS command is
    /// submitted after the commit.
    pub fn create_by_patient(
        &self,
        author: PatientId,
        request: AppointmentRequest,
    ) -> CoreResult<Appointment> {
        let now = self.clock.now();
        let offset = self.cfg.utc_offset();
        let related_patients_enabled = self.cfg.features().related_patients;

        let appointment = self.store.write(|tables| {
            if request.doctor_id.is_none()
                && request.service_id.is_none()
                && request.reason_text.is_none()
            {
                return Err(CoreError::MissingCreationData);
            }
            if let (Some(start), Some(end)) = (request.start, request.end) {
                validate_appointment_interval(start, end)?;
            }
            tables.patient(author)?;
            let patient =
                resolve_target(tables, author, request.target_patient_id, related_patients_enabled)?;
            let choice = check_doctor_and_slot(tables, patient, &request)?;

            let today = local_day_bounds(local_date(now, offset), offset);
            if AppointmentQuery::on_moderation_created_today(patient, choice.doctor, today)
                .exists(tables)
            {
                return Err(CoreError::AlreadyHasAppointmentToday);
            }

            let appointment = Appointment {
                id: AppointmentId::new(),
                patient,
                author_patient: author,
                doctor: choice.doctor,
                service: request.service_id,
                subsidiary: choice.subsidiary,
                reason_text: request.reason_text.clone(),
                start: choice.start,
                end: choice.end,
                is_for_whole_day: false,
                price: None,
                status: AppointmentStatus::OnModeration,
                created_by_type: CreatedByType::Patient,
                integration_data: AppointmentIntegrationData::default(),
                created_at: now,
                updated_at: now,
            };
            tables.insert_appointment(appointment.clone())?;
            tables.record_creation(&appointment, Actor::Patient(author));
            if let Some(slot) = choice.slot {
                tables.link(slot, appointment.id)?;
            }
            Ok(appointment)
        })?;

        tracing::info!(
            appointment = %appointment.id,
            patient = %appointment.patient,
            author = %author,
            "appointment request created"
        );
        self.submit_integration(IntegrationCommand::CreateAppointmentByPatient {
            appointment_id: appointment.id,
            author_patient_id: author,
        });
        Ok(appointment)
    }

    /// Creates a `PLANNED` appointment entered by clinic staff and notifies the patient.
    pub fn create_by_administrator(
        &self,
        request: AdminAppointmentRequest,
    ) -> CoreResult<Appointment> {
        let now = self.clock.now();
        let appointment = self.store.write(|tables| {
            tables.patient(request.patient)?;
            tables.doctor(request.doctor)?;
            tables.subsidiary(request.subsidiary)?;
            if let Some(service) = request.service {
                tables.service(service)?;
            }

            let (mut start, mut end) = (request.start, request.end);
            if let Some(slot_id) = request.time_slot_id {
                let slot = tables.timeslot(slot_id)?;
                if slot.doctor != request.doctor {
                    return Err(CoreError::SlotNotFound(slot_id));
                }
                start = Some(slot.start);
                end = Some(slot.end);
            }

            let appointment = Appointment {
                id: AppointmentId::new(),
                patient: request.patient,
                author_patient: request.patient,
                doctor: Some(request.doctor),
                service: request.service,
                subsidiary: Some(request.subsidiary),
                reason_text: request.reason_text.clone(),
                start,
                end,
                is_for_whole_day: request.is_for_whole_day,
                price: request.price,
                status: AppointmentStatus::Planned,
                created_by_type: CreatedByType::Administrator,
                integration_data: AppointmentIntegrationData::default(),
                created_at: now,
                updated_at: now,
            };
            tables.insert_appointment(appointment.clone())?;
            tables.record_creation(&appointment, Actor::Moderator);
            if let Some(slot) = request.time_slot_id {
                tables.link(slot, appointment.id)?;
            }
            Ok(appointment)
        })?;

        tracing::info!(appointment = %appointment.id, "appointment created by administrator");
        self.notify_after_commit(EVENT_APPOINTMENT_CREATED_BY_ADMIN, appointment.id);
        Ok(appointment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{appointment, at, directory, patient, timeslot, workflow_with};
    use crate::patient::RelationType;
    use chrono::Duration;

    fn request_for(doctor: DoctorId, start: DateTime<Utc>) -> AppointmentRequest {
        AppointmentRequest {
            doctor_id: Some(doctor),
            start: Some(start),
            end: Some(start + Duration::minutes(30)),
            ..AppointmentRequest::default()
        }
    }

    #[test]
    fn test_missing_creation_data() {
        let (t, dir) = directory();
        let h = workflow_with(t, at(2030, 1, 1, 8, 0));
        let err = h
            .workflow
            .create_by_patient(dir.patient, AppointmentRequest::default())
            .unwrap_err();
        assert!(matches!(err, CoreError::MissingCreationData));
    }

    #[test]
    fn test_invalid_interval_checked_before_related_patient() {
        let (t, dir) = directory();
        let h = workflow_with(t, at(2030, 1, 1, 8, 0));
        let start = at(2030, 1, 2, 9, 0);
        let request = AppointmentRequest {
            reason_text: Some(NonEmptyText::new("Cough").unwrap()),
            start: Some(start),
            end: Some(start - Duration::minutes(1)),
            target_patient_id: Some(PatientId::new()),
            ..AppointmentRequest::default()
        };
        let err = h.workflow.create_by_patient(dir.patient, request).unwrap_err();
        assert!(matches!(err, CoreError::InvalidInterval(_)));
    }

    #[test]
    fn test_related_patients_disabled() {
        let (mut t, dir) = directory();
        let child = t.insert_patient(patient("Ivanov", "Petr", false)).unwrap();
        t.add_relation(dir.patient, child, RelationType::Child, true)
            .unwrap();
        let h = workflow_with(t, at(2030, 1, 1, 8, 0));
        let mut features = h.workflow.config().features().clone();
        features.related_patients = false;
        let workflow = h.with_features(features);

        let request = AppointmentRequest {
            reason_text: Some(NonEmptyText::new("Cough").unwrap()),
            target_patient_id: Some(child),
            ..AppointmentRequest::default()
        };
        let err = workflow.create_by_patient(dir.patient, request).unwrap_err();
        assert!(matches!(err, CoreError::RelatedPatientsDisabled));
    }

    #[test]
    fn test_slot_for_doctor_without_slot_picks() {
        let (mut t, dir) = directory();
        let start = at(2030, 1, 2, 9, 0);
        let slot = t
            .insert_timeslot(timeslot(dir.other_doctor, dir.subsidiary, start, start + Duration::minutes(30)))
            .unwrap();
        let h = workflow_with(t, at(2030, 1, 1, 8, 0));
        let request = AppointmentRequest {
            doctor_id: Some(dir.other_doctor),
            time_slot_id: Some(slot),
            ..AppointmentRequest::default()
        };
        let err = h.workflow.create_by_patient(dir.patient, request).unwrap_err();
        assert!(matches!(err, CoreError::TimeslotsDisabledForDoctor));
    }

    #[test]
    fn test_missing_and_busy_slots() {
        let (mut t, dir) = directory();
        let start = at(2030, 1, 2, 9, 0);
        let mut busy = timeslot(dir.doctor, dir.subsidiary, start, start + Duration::minutes(30));
        busy.is_available = false;
        let busy = t.insert_timeslot(busy).unwrap();
        let h = workflow_with(t, at(2030, 1, 1, 8, 0));

        let missing = TimeSlotId::new();
        let err = h
            .workflow
            .create_by_patient(
                dir.patient,
                AppointmentRequest {
                    doctor_id: Some(dir.doctor),
                    time_slot_id: Some(missing),
                    ..AppointmentRequest::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::SlotNotFound(id) if id == missing));

        let err = h
            .workflow
            .create_by_patient(
                dir.patient,
                AppointmentRequest {
                    doctor_id: Some(dir.doctor),
                    time_slot_id: Some(busy),
                    ..AppointmentRequest::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::SlotBusy(id) if id == busy));
    }

    #[test]
    fn test_window_without_free_slot() {
        let (t, dir) = directory();
        let h = workflow_with(t, at(2030, 1, 1, 8, 0));
        let err = h
            .workflow
            .create_by_patient(dir.patient, request_for(dir.doctor, at(2030, 1, 2, 9, 0)))
            .unwrap_err();
        assert!(matches!(err, CoreError::NoDoctorFreeSlots));
    }

    #[test]
    fn test_window_taken_by_other_appointment() {
        let (mut t, dir) = directory();
        let start = at(2030, 1, 2, 9, 0);
        t.insert_timeslot(timeslot(dir.doctor, dir.subsidiary, start, start + Duration::hours(1)))
            .unwrap();
        let other = t.insert_patient(patient("Sidorov", "Oleg", true)).unwrap();
        t.insert_appointment(appointment(other, Some(dir.doctor), start + Duration::minutes(15)))
            .unwrap();
        let h = workflow_with(t, at(2030, 1, 1, 8, 0));

        let err = h
            .workflow
            .create_by_patient(dir.patient, request_for(dir.doctor, start))
            .unwrap_err();
        assert!(matches!(err, CoreError::TimeBusyByAppointment));
    }

    #[test]
    fn test_cancelled_appointment_does_not_block_window() {
        let (mut t, dir) = directory();
        let start = at(2030, 1, 2, 9, 0);
        t.insert_timeslot(timeslot(dir.doctor, dir.subsidiary, start, start + Duration::hours(1)))
            .unwrap();
        let other = t.insert_patient(patient("Sidorov", "Oleg", true)).unwrap();
        let mut cancelled = appointment(other, Some(dir.doctor), start);
        cancelled.status = AppointmentStatus::CanceledByModerator;
        t.insert_appointment(cancelled).unwrap();
        let h = workflow_with(t, at(2030, 1, 1, 8, 0));

        let created = h
            .workflow
            .create_by_patient(dir.patient, request_for(dir.doctor, start))
            .unwrap();
        assert_eq!(created.status, AppointmentStatus::OnModeration);
    }

    #[test]
    fn test_today_guard_uses_local_calendar_day() {
        let (mut t, dir) = directory();
        let start = at(2030, 1, 5, 9, 0);
        t.insert_timeslot(timeslot(dir.doctor, dir.subsidiary, start, start + Duration::hours(2)))
            .unwrap();
        let h = workflow_with(t, at(2030, 1, 1, 23, 59));

        h.workflow
            .create_by_patient(dir.patient, request_for(dir.doctor, start))
            .unwrap();
        h.clock.advance(Duration::minutes(2));
        let next_day = h
            .workflow
            .create_by_patient(dir.patient, request_for(dir.doctor, start + Duration::hours(1)));
        assert!(next_day.is_ok());
    }

    #[test]
    fn test_admin_creation_is_planned_and_notifies() {
        let (t, dir) = directory();
        let h = workflow_with(t, at(2030, 1, 1, 8, 0));
        let start = at(2030, 1, 3, 10, 0);
        let created = h
            .workflow
            .create_by_administrator(AdminAppointmentRequest {
                patient: dir.patient,
                doctor: dir.doctor,
                subsidiary: dir.subsidiary,
                service: Some(dir.service),
                time_slot_id: None,
                start: Some(start),
                end: Some(start + Duration::minutes(20)),
                is_for_whole_day: false,
                price: Some(150_000),
                reason_text: None,
            })
            .unwrap();

        assert_eq!(created.status, AppointmentStatus::Planned);
        assert_eq!(created.created_by_type, CreatedByType::Administrator);
        let sent = h.notifier.named(EVENT_APPOINTMENT_CREATED_BY_ADMIN);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].user, dir.patient_user);
        assert!(h.integration.submitted().is_empty());
    }
}
