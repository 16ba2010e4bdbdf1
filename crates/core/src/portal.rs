//! Patient-facing operations.
//!
//! [`PatientPortal`] is what a transport exposes to a signed-in patient: listing and fetching
//! their visible appointments, booking and cancelling, browsing free slots, and managing
//! related patients. The caller's [`PatientId`] is supplied by the transport.

use crate::appointment::{Appointment, AppointmentStatus};
use crate::constants::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::error::ErrorCollector;
use crate::interval::{local_date, local_day_bounds};
use crate::patient::{Patient, PatientProfile, RelationType};
use crate::repositories::AppointmentQuery;
use crate::store::Tables;
use crate::timeslot::TimeSlot;
use crate::workflow::{AppointmentRequest, AppointmentWorkflow};
use crate::{CoreError, CoreResult};
use chrono::NaiveDate;
use clinic_types::{AppointmentId, DoctorId, PatientId, RelationId, ServiceId, SubsidiaryId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// ============================================================================
// LISTING
// ============================================================================

/// Filters of the appointment listing; every field is optional.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AppointmentFilters {
    pub doctor_ids: Vec<DoctorId>,
    pub subsidiary_ids: Vec<SubsidiaryId>,
    pub service_ids: Vec<ServiceId>,
    pub only_active: bool,
    pub only_archived: bool,
    pub only_future: bool,
    pub only_past: bool,
    /// Numeric status codes; must be visible for patients.
    pub status_codes: Vec<u8>,
    /// Restrict to one related (slave) patient of the caller.
    pub related_patient_id: Option<PatientId>,
}

impl AppointmentFilters {
    /// Reports every conflicting or unknown filter at once.
    fn validate(&self) -> CoreResult<Vec<AppointmentStatus>> {
        let mut errors = ErrorCollector::new();
        if self.only_active && self.only_archived {
            errors.push(CoreError::BadFilter {
                parameter: "only_active".into(),
                reason: "only_active and only_archived cannot be combined".into(),
            });
        }
        if self.only_future && self.only_past {
            errors.push(CoreError::BadFilter {
                parameter: "only_future".into(),
                reason: "only_future and only_past cannot be combined".into(),
            });
        }

        let statuses: Vec<Option<AppointmentStatus>> = self
            .status_codes
            .iter()
            .map(|code| {
                AppointmentStatus::from_code(*code).filter(|s| s.is_visible_for_patient())
            })
            .collect();
        if statuses.iter().any(Option::is_none) {
            let allowed = AppointmentStatus::VISIBLE_FOR_PATIENT
                .iter()
                .map(|s| s.code().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            errors.push(CoreError::BadFilter {
                parameter: "status_codes".into(),
                reason: format!("allowed values are [{allowed}]"),
            });
        }
        errors.finish()?;
        Ok(statuses.into_iter().flatten().collect())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PageRequest {
    pub offset: usize,
    pub limit: Option<usize>,
}

impl PageRequest {
    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

/// Filters of the free-slot listing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TimeslotFilters {
    pub doctor_id: Option<DoctorId>,
    pub subsidiary_id: Option<SubsidiaryId>,
    /// First local day to list; today or later.
    pub start_date: Option<NaiveDate>,
}

// ============================================================================
// RELATED PATIENTS
// ============================================================================

/// A slave patient of the caller together with the relation to them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RelatedPatient {
    pub relation_id: RelationId,
    pub relation_type: RelationType,
    pub can_update_slave_appointments: bool,
    pub patient: Patient,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct RelatedPatientInput {
    #[serde(flatten)]
    pub profile: PatientProfile,
    pub relation_type: RelationType,
}

fn related_patient(
    tables: &Tables,
    master: PatientId,
    slave: PatientId,
) -> CoreResult<RelatedPatient> {
    let relation = tables
        .relation_between(master, slave)
        .ok_or(CoreError::NotRelated(slave))?;
    Ok(RelatedPatient {
        relation_id: relation.id,
        relation_type: relation.relation_type,
        can_update_slave_appointments: relation.can_update_slave_appointments,
        patient: tables.patient(slave)?.clone(),
    })
}

/// Rejects future birth dates and profiles matching another related patient of `master`.
fn check_related_profile(
    tables: &Tables,
    master: PatientId,
    profile: &PatientProfile,
    except: Option<PatientId>,
    today: NaiveDate,
) -> CoreResult<()> {
    if profile.birth_date.is_some_and(|b| b > today) {
        return Err(CoreError::BadDate {
            parameter: "birth_date".into(),
            reason: "birth date cannot be in the future".into(),
        });
    }
    for relation in tables.relations_of_master(master) {
        if Some(relation.slave) == except {
            continue;
        }
        if tables.patient(relation.slave)?.profile.same_person_as(profile) {
            return Err(CoreError::DuplicateRelatedPatient);
        }
    }
    Ok(())
}

// ============================================================================
// PORTAL
// ============================================================================

#[derive(Clone)]
pub struct PatientPortal {
    workflow: AppointmentWorkflow,
}

impl PatientPortal {
    pub fn new(workflow: AppointmentWorkflow) -> Self {
        Self { workflow }
    }

    pub fn workflow(&self) -> &AppointmentWorkflow {
        &self.workflow
    }

    fn ensure_related_patients_enabled(&self) -> CoreResult<()> {
        if !self.workflow.config().features().related_patients {
            return Err(CoreError::RelatedPatientsDisabled);
        }
        Ok(())
    }

    fn today(&self) -> NaiveDate {
        local_date(self.workflow.now(), self.workflow.config().utc_offset())
    }

    /// Appointments visible to `caller`, newest first.
    pub fn list_appointments(
        &self,
        caller: PatientId,
        filters: &AppointmentFilters,
        page: PageRequest,
    ) -> CoreResult<Page<Appointment>> {
        let statuses = filters.validate()?;
        let now = self.workflow.now();
        let limit = page.limit();

        let (items, total) = self.workflow.store().read(|tables| {
            let mut query = AppointmentQuery::visible_by_patient(tables, caller)?;
            if let Some(related) = filters.related_patient_id {
                if !tables.slaves_of(caller).contains(&related) {
                    return Err(CoreError::NotRelated(related));
                }
                query = query.patients([related]);
            }
            if !filters.doctor_ids.is_empty() {
                query = query.doctors(filters.doctor_ids.iter().copied());
            }
            if !filters.subsidiary_ids.is_empty() {
                query = query.subsidiaries(filters.subsidiary_ids.iter().copied());
            }
            if !filters.service_ids.is_empty() {
                query = query.services(filters.service_ids.iter().copied());
            }
            if filters.only_active {
                query = query.statuses(AppointmentStatus::ACTIVE);
            }
            if filters.only_archived {
                query = query.statuses(AppointmentStatus::ARCHIVED);
            }
            if !statuses.is_empty() {
                query = query.statuses(statuses.iter().copied());
            }
            if filters.only_future {
                query = query.starts_at_or_after(now);
            }
            if filters.only_past {
                query = query.starts_before(now);
            }
            Ok(query.page(tables, page.offset, limit))
        })?;

        Ok(Page {
            items,
            total,
            offset: page.offset,
            limit,
        })
    }

    /// One appointment visible to `caller`; anything else is reported as not found.
    pub fn appointment(&self, caller: PatientId, id: AppointmentId) -> CoreResult<Appointment> {
        self.workflow.store().read(|tables| {
            if !AppointmentQuery::visible_by_patient(tables, caller)?.includes(tables, id) {
                return Err(CoreError::not_found("appointment", id));
            }
            Ok(tables.appointment(id)?.clone())
        })
    }

    pub fn cancel_appointment(
        &self,
        caller: PatientId,
        id: AppointmentId,
    ) -> CoreResult<Appointment> {
        self.workflow.cancel_by_patient(id, caller)
    }

    pub fn create_appointment(
        &self,
        caller: PatientId,
        request: AppointmentRequest,
    ) -> CoreResult<Appointment> {
        self.workflow.create_by_patient(caller, request)
    }

    /// Future free slots patients may book, starting on `start_date` (local) when given.
    pub fn available_timeslots(&self, filters: TimeslotFilters) -> CoreResult<Vec<TimeSlot>> {
        let now = self.workflow.now();
        let offset = self.workflow.config().utc_offset();
        let from = match filters.start_date {
            Some(date) if date < self.today() => {
                return Err(CoreError::BadDate {
                    parameter: "start_date".into(),
                    reason: "start date cannot be in the past".into(),
                })
            }
            Some(date) => local_day_bounds(date, offset).start.max(now),
            None => now,
        };

        self.workflow.store().read(|tables| {
            Ok(tables
                .future_free_for_patients(now, filters.doctor_id, filters.subsidiary_id)
                .into_iter()
                .filter(|s| s.start >= from)
                .cloned()
                .collect())
        })
    }

    /// Distinct local dates that have at least one bookable slot.
    pub fn available_timeslot_dates(
        &self,
        doctor_id: Option<DoctorId>,
        subsidiary_id: Option<SubsidiaryId>,
    ) -> CoreResult<Vec<NaiveDate>> {
        let now = self.workflow.now();
        let offset = self.workflow.config().utc_offset();
        self.workflow.store().read(|tables| {
            let dates: BTreeSet<NaiveDate> = tables
                .future_free_for_patients(now, doctor_id, subsidiary_id)
                .into_iter()
                .map(|s| local_date(s.start, offset))
                .collect();
            Ok(dates.into_iter().collect())
        })
    }

    pub fn related_patients(&self, caller: PatientId) -> CoreResult<Vec<RelatedPatient>> {
        self.ensure_related_patients_enabled()?;
        self.workflow.store().read(|tables| {
            tables
                .relations_of_master(caller)
                .into_iter()
                .map(|r| related_patient(tables, caller, r.slave))
                .collect()
        })
    }

    /// Registers a new dependent patient of `caller`.
    pub fn create_related_patient(
        &self,
        caller: PatientId,
        input: RelatedPatientInput,
    ) -> CoreResult<RelatedPatient> {
        self.ensure_related_patients_enabled()?;
        let today = self.today();
        let created = self.workflow.store().write(|tables| {
            tables.patient(caller)?;
            check_related_profile(tables, caller, &input.profile, None, today)?;
            let slave = tables.insert_patient(Patient {
                id: PatientId::new(),
                profile: input.profile.clone(),
                user: None,
                is_confirmed: false,
            })?;
            tables.add_relation(caller, slave, input.relation_type, true)?;
            related_patient(tables, caller, slave)
        })?;
        tracing::info!(master = %caller, slave = %created.patient.id, "related patient created");
        Ok(created)
    }

    pub fn update_related_patient(
        &self,
        caller: PatientId,
        slave: PatientId,
        input: RelatedPatientInput,
    ) -> CoreResult<RelatedPatient> {
        self.ensure_related_patients_enabled()?;
        let today = self.today();
        self.workflow.store().write(|tables| {
            if tables.relation_between(caller, slave).is_none() {
                return Err(CoreError::NotRelated(slave));
            }
            check_related_profile(tables, caller, &input.profile, Some(slave), today)?;
            tables.patient_mut(slave)?.profile = input.profile.clone();
            tables.update_relation_type(caller, slave, input.relation_type)?;
            related_patient(tables, caller, slave)
        })
    }

    /// Removes the relation; the patient record and its appointments stay.
    pub fn delete_related_patient(&self, caller: PatientId, slave: PatientId) -> CoreResult<()> {
        self.ensure_related_patients_enabled()?;
        self.workflow.store().write(|tables| {
            if tables.relation_between(caller, slave).is_none() {
                return Err(CoreError::NotRelated(slave));
            }
            tables.remove_relation(caller, slave).map(|_| ())
        })?;
        tracing::info!(master = %caller, %slave, "related patient removed");
        Ok(())
    }
}
