//! Appointment store and query builder.
//!
//! Named views (`for_patient`, `visible_by_patient`, `active`, ...) are constructors of
//! [`AppointmentQuery`]; a query is a plain value that is built up with filter methods and
//! evaluated against [`Tables`] by one of its terminal operations.

use crate::appointment::{
    Actor, Appointment, AppointmentStatus, CreatedByType, StatusChange,
};
use crate::interval::{validate_appointment_interval, Interval};
use crate::store::Tables;
use crate::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use clinic_types::{AppointmentId, DoctorId, PatientId, ServiceId, SubsidiaryId};
use std::collections::BTreeSet;

impl Tables {
    /// Inserts a new appointment after checking the entity invariants.
    pub fn insert_appointment(&mut self, appointment: Appointment) -> CoreResult<AppointmentId> {
        self.check_appointment_invariants(&appointment)?;
        let id = appointment.id;
        self.appointments.insert(id, appointment);
        Ok(id)
    }

    /// Replaces a stored appointment after checking the entity invariants.
    ///
    /// Status changes must go through [`Tables::set_status`] so history stays complete.
    pub fn update_appointment(&mut self, appointment: Appointment) -> CoreResult<()> {
        let stored = self.appointment(appointment.id)?;
        if stored.status != appointment.status {
            return Err(CoreError::InvalidInput(
                "status changes must be recorded through set_status".into(),
            ));
        }
        self.check_appointment_invariants(&appointment)?;
        self.appointments.insert(appointment.id, appointment);
        Ok(())
    }

    fn check_appointment_invariants(&self, appointment: &Appointment) -> CoreResult<()> {
        if !appointment.has_creation_data() {
            return Err(CoreError::MissingCreationData);
        }
        if let (Some(start), Some(end)) = (appointment.start, appointment.end) {
            validate_appointment_interval(start, end)?;
        }
        self.patient(appointment.patient)?;
        self.patient(appointment.author_patient)?;
        let key = appointment.uniqueness_key();
        let duplicate = self
            .appointments
            .values()
            .any(|other| other.id != appointment.id && other.uniqueness_key() == key);
        if duplicate {
            return Err(CoreError::DuplicateAppointment);
        }
        Ok(())
    }

    pub fn appointment(&self, id: AppointmentId) -> CoreResult<&Appointment> {
        self.appointments
            .get(&id)
            .ok_or_else(|| CoreError::not_found("appointment", id))
    }

    /// Changes the status and appends the history entry.
    pub fn set_status(
        &mut self,
        id: AppointmentId,
        to: AppointmentStatus,
        actor: Actor,
        at: DateTime<Utc>,
    ) -> CoreResult<()> {
        let appointment = self
            .appointments
            .get_mut(&id)
            .ok_or_else(|| CoreError::not_found("appointment", id))?;
        let from = appointment.status;
        appointment.status = to;
        appointment.updated_at = at;
        self.history.push(StatusChange {
            appointment: id,
            from: Some(from),
            to,
            at,
            actor,
        });
        Ok(())
    }

    /// Records the creation entry of a freshly inserted appointment.
    pub(crate) fn record_creation(&mut self, appointment: &Appointment, actor: Actor) {
        self.history.push(StatusChange {
            appointment: appointment.id,
            from: None,
            to: appointment.status,
            at: appointment.created_at,
            actor,
        });
    }

    /// Finds an appointment by its duplicate-booking key.
    pub fn appointment_by_key(
        &self,
        key: &crate::appointment::AppointmentKey,
    ) -> Option<&Appointment> {
        self.appointments
            .values()
            .find(|a| &a.uniqueness_key() == key)
    }
}

// ============================================================================
// QUERY BUILDER
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum QueryOrder {
    /// Latest start first; appointments without a start come last.
    #[default]
    StartDesc,
    StartAsc,
}

#[derive(Clone, Debug, Default)]
pub struct AppointmentQuery {
    patients: Option<BTreeSet<PatientId>>,
    excluded_patients: BTreeSet<PatientId>,
    doctors: Option<BTreeSet<DoctorId>>,
    exact_doctor: Option<Option<DoctorId>>,
    subsidiaries: Option<BTreeSet<SubsidiaryId>>,
    services: Option<BTreeSet<ServiceId>>,
    statuses: Option<BTreeSet<AppointmentStatus>>,
    excluded_statuses: BTreeSet<AppointmentStatus>,
    created_by: Option<CreatedByType>,
    hide_totally_hidden_doctors: bool,
    starts_at_or_after: Option<DateTime<Utc>>,
    starts_before: Option<DateTime<Utc>>,
    ends_at_or_before: Option<DateTime<Utc>>,
    created_within: Option<Interval>,
    intersecting: Option<Interval>,
    order: QueryOrder,
}

impl AppointmentQuery {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Named views
    // ------------------------------------------------------------------

    pub fn for_doctor(doctor: DoctorId) -> Self {
        Self::new().doctors([doctor])
    }

    /// Appointments of `patient` and of every patient it is master of.
    pub fn for_patient(tables: &Tables, patient: PatientId) -> Self {
        let mut patients = tables.slaves_of(patient);
        patients.insert(patient);
        Self::new().patients(patients)
    }

    /// What `patient` is allowed to see.
    ///
    /// Excludes `HIDDEN`, `CANCELED_BY_PATIENT` and totally hidden doctors; unconfirmed
    /// patients additionally see only what patients created.
    pub fn visible_by_patient(tables: &Tables, patient: PatientId) -> CoreResult<Self> {
        let is_confirmed = tables.patient(patient)?.is_confirmed;
        let mut query = Self::for_patient(tables, patient)
            .exclude_statuses([AppointmentStatus::Hidden, AppointmentStatus::CanceledByPatient]);
        query.hide_totally_hidden_doctors = true;
        if !is_confirmed {
            query = query.created_by(CreatedByType::Patient);
        }
        Ok(query)
    }

    pub fn active(tables: &Tables, patient: PatientId) -> CoreResult<Self> {
        Ok(Self::visible_by_patient(tables, patient)?.statuses(AppointmentStatus::ACTIVE))
    }

    pub fn archived(tables: &Tables, patient: PatientId) -> CoreResult<Self> {
        Ok(Self::visible_by_patient(tables, patient)?.statuses(AppointmentStatus::ARCHIVED))
    }

    /// `ON_MODERATION` requests of `patient` to `doctor` created inside `today`.
    pub fn on_moderation_created_today(
        patient: PatientId,
        doctor: Option<DoctorId>,
        today: Interval,
    ) -> Self {
        let mut query = Self::new()
            .patients([patient])
            .statuses([AppointmentStatus::OnModeration])
            .created_within(today);
        query.exact_doctor = Some(doctor);
        query
    }

    /// Planned appointments starting at or after `now`.
    pub fn future_planned(now: DateTime<Utc>) -> Self {
        Self::new()
            .statuses([AppointmentStatus::Planned])
            .starts_at_or_after(now)
            .order(QueryOrder::StartAsc)
    }

    // ------------------------------------------------------------------
    // Filters
    // ------------------------------------------------------------------

    pub fn patients(mut self, patients: impl IntoIterator<Item = PatientId>) -> Self {
        self.patients = Some(patients.into_iter().collect());
        self
    }

    pub fn exclude_patients(mut self, patients: impl IntoIterator<Item = PatientId>) -> Self {
        self.excluded_patients.extend(patients);
        self
    }

    pub fn doctors(mut self, doctors: impl IntoIterator<Item = DoctorId>) -> Self {
        self.doctors = Some(doctors.into_iter().collect());
        self
    }

    pub fn subsidiaries(mut self, subsidiaries: impl IntoIterator<Item = SubsidiaryId>) -> Self {
        self.subsidiaries = Some(subsidiaries.into_iter().collect());
        self
    }

    pub fn services(mut self, services: impl IntoIterator<Item = ServiceId>) -> Self {
        self.services = Some(services.into_iter().collect());
        self
    }

    /// Restricts to `statuses`; repeated calls intersect.
    pub fn statuses(mut self, statuses: impl IntoIterator<Item = AppointmentStatus>) -> Self {
        let wanted: BTreeSet<AppointmentStatus> = statuses.into_iter().collect();
        self.statuses = Some(match self.statuses.take() {
            Some(current) => current.intersection(&wanted).copied().collect(),
            None => wanted,
        });
        self
    }

    pub fn exclude_statuses(
        mut self,
        statuses: impl IntoIterator<Item = AppointmentStatus>,
    ) -> Self {
        self.excluded_statuses.extend(statuses);
        self
    }

    pub fn created_by(mut self, created_by: CreatedByType) -> Self {
        self.created_by = Some(created_by);
        self
    }

    pub fn starts_at_or_after(mut self, t: DateTime<Utc>) -> Self {
        self.starts_at_or_after = Some(t);
        self
    }

    pub fn starts_before(mut self, t: DateTime<Utc>) -> Self {
        self.starts_before = Some(t);
        self
    }

    pub fn ends_at_or_before(mut self, t: DateTime<Utc>) -> Self {
        self.ends_at_or_before = Some(t);
        self
    }

    pub fn created_within(mut self, window: Interval) -> Self {
        self.created_within = Some(window);
        self
    }

    /// Appointments whose `[start, end)` intersects `window`.
    pub fn intersecting(mut self, window: Interval) -> Self {
        self.intersecting = Some(window);
        self
    }

    pub fn order(mut self, order: QueryOrder) -> Self {
        self.order = order;
        self
    }

    // ------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------

    fn matches(&self, tables: &Tables, a: &Appointment) -> bool {
        fn within<T: Ord>(set: &Option<BTreeSet<T>>, value: &T) -> bool {
            set.as_ref().map_or(true, |s| s.contains(value))
        }
        fn within_opt<T: Ord>(set: &Option<BTreeSet<T>>, value: &Option<T>) -> bool {
            match (set, value) {
                (None, _) => true,
                (Some(s), Some(v)) => s.contains(v),
                (Some(_), None) => false,
            }
        }

        if !within(&self.patients, &a.patient)
            || self.excluded_patients.contains(&a.patient)
            || !within_opt(&self.doctors, &a.doctor)
            || !within_opt(&self.subsidiaries, &a.subsidiary)
            || !within_opt(&self.services, &a.service)
            || !within(&self.statuses, &a.status)
            || self.excluded_statuses.contains(&a.status)
        {
            return false;
        }
        if self.exact_doctor.is_some_and(|d| d != a.doctor) {
            return false;
        }
        if self.created_by.is_some_and(|c| c != a.created_by_type) {
            return false;
        }
        if self.hide_totally_hidden_doctors {
            let hidden = a
                .doctor
                .and_then(|d| tables.doctors.get(&d))
                .is_some_and(|d| d.is_totally_hidden);
            if hidden {
                return false;
            }
        }
        if let Some(t) = self.starts_at_or_after {
            if !a.start.is_some_and(|s| s >= t) {
                return false;
            }
        }
        if let Some(t) = self.starts_before {
            if !a.start.is_some_and(|s| s < t) {
                return false;
            }
        }
        if let Some(t) = self.ends_at_or_before {
            if !a.end.is_some_and(|e| e <= t) {
                return false;
            }
        }
        if let Some(window) = self.created_within {
            if !(window.start <= a.created_at && a.created_at < window.end) {
                return false;
            }
        }
        if let Some(window) = self.intersecting {
            if !a.interval().is_some_and(|i| i.intersects(&window)) {
                return false;
            }
        }
        true
    }

    fn matching<'t>(&self, tables: &'t Tables) -> Vec<&'t Appointment> {
        let mut found: Vec<&Appointment> = tables
            .appointments
            .values()
            .filter(|a| self.matches(tables, a))
            .collect();
        match self.order {
            QueryOrder::StartDesc => found.sort_by(|a, b| {
                // `Option` orders `None` first, so reversing puts missing starts last.
                b.start
                    .cmp(&a.start)
                    .then_with(|| b.created_at.cmp(&a.created_at))
            }),
            QueryOrder::StartAsc => found.sort_by(|a, b| {
                match (a.start, b.start) {
                    (Some(x), Some(y)) => x.cmp(&y),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => std::cmp::Ordering::Equal,
                }
                .then_with(|| a.created_at.cmp(&b.created_at))
            }),
        }
        found
    }

    pub fn fetch(&self, tables: &Tables) -> Vec<Appointment> {
        self.matching(tables).into_iter().cloned().collect()
    }

    pub fn ids(&self, tables: &Tables) -> Vec<AppointmentId> {
        self.matching(tables).into_iter().map(|a| a.id).collect()
    }

    pub fn count(&self, tables: &Tables) -> usize {
        tables
            .appointments
            .values()
            .filter(|a| self.matches(tables, a))
            .count()
    }

    pub fn exists(&self, tables: &Tables) -> bool {
        tables
            .appointments
            .values()
            .any(|a| self.matches(tables, a))
    }

    /// Whether appointment `id` exists and matches the query.
    pub fn includes(&self, tables: &Tables, id: AppointmentId) -> bool {
        tables
            .appointments
            .get(&id)
            .is_some_and(|a| self.matches(tables, a))
    }

    /// One page of results plus the total count.
    pub fn page(&self, tables: &Tables, offset: usize, limit: usize) -> (Vec<Appointment>, usize) {
        let all = self.matching(tables);
        let total = all.len();
        let items = all.into_iter().skip(offset).take(limit).cloned().collect();
        (items, total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{appointment, at, directory, patient};
    use crate::patient::RelationType;
    use chrono::Duration;

    #[test]
    fn test_insert_rejects_missing_creation_data() {
        let (mut t, dir) = directory();
        let mut a = appointment(dir.patient, None, at(2030, 1, 1, 9, 0));
        a.reason_text = None;
        assert!(matches!(
            t.insert_appointment(a),
            Err(CoreError::MissingCreationData)
        ));
    }

    #[test]
    fn test_insert_rejects_duplicate_key() {
        let (mut t, dir) = directory();
        let start = at(2030, 1, 1, 9, 0);
        t.insert_appointment(appointment(dir.patient, Some(dir.doctor), start))
            .unwrap();
        assert!(matches!(
            t.insert_appointment(appointment(dir.patient, Some(dir.doctor), start)),
            Err(CoreError::DuplicateAppointment)
        ));
    }

    #[test]
    fn test_for_patient_widens_to_slaves() {
        let (mut t, dir) = directory();
        let child = t.insert_patient(patient("Petrov", "Ivan", true)).unwrap();
        t.add_relation(dir.patient, child, RelationType::Child, true)
            .unwrap();
        let start = at(2030, 1, 1, 9, 0);
        t.insert_appointment(appointment(dir.patient, Some(dir.doctor), start))
            .unwrap();
        t.insert_appointment(appointment(child, Some(dir.doctor), start))
            .unwrap();

        assert_eq!(AppointmentQuery::for_patient(&t, dir.patient).count(&t), 2);
        assert_eq!(AppointmentQuery::for_patient(&t, child).count(&t), 1);
    }

    #[test]
    fn test_visible_by_patient_filters() {
        let (mut t, dir) = directory();
        let start = at(2030, 1, 1, 9, 0);
        let shown = t
            .insert_appointment(appointment(dir.patient, Some(dir.doctor), start))
            .unwrap();
        let mut hidden = appointment(dir.patient, Some(dir.doctor), start + Duration::hours(1));
        hidden.status = AppointmentStatus::Hidden;
        t.insert_appointment(hidden).unwrap();
        let mut self_cancelled =
            appointment(dir.patient, Some(dir.doctor), start + Duration::hours(2));
        self_cancelled.status = AppointmentStatus::CanceledByPatient;
        t.insert_appointment(self_cancelled).unwrap();
        t.doctors.get_mut(&dir.other_doctor).unwrap().is_totally_hidden = true;
        t.insert_appointment(appointment(dir.patient, Some(dir.other_doctor), start))
            .unwrap();

        let ids = AppointmentQuery::visible_by_patient(&t, dir.patient)
            .unwrap()
            .ids(&t);
        assert_eq!(ids, vec![shown]);
    }

    #[test]
    fn test_unconfirmed_patient_sees_only_own_requests() {
        let (mut t, dir) = directory();
        t.patient_mut(dir.patient).unwrap().is_confirmed = false;
        let start = at(2030, 1, 1, 9, 0);
        let own = t
            .insert_appointment(appointment(dir.patient, Some(dir.doctor), start))
            .unwrap();
        let mut by_admin = appointment(dir.patient, Some(dir.doctor), start + Duration::hours(1));
        by_admin.created_by_type = CreatedByType::Administrator;
        t.insert_appointment(by_admin).unwrap();

        let ids = AppointmentQuery::visible_by_patient(&t, dir.patient)
            .unwrap()
            .ids(&t);
        assert_eq!(ids, vec![own]);
    }

    #[test]
    fn test_active_and_archived_split() {
        let (mut t, dir) = directory();
        let start = at(2030, 1, 1, 9, 0);
        let planned = t
            .insert_appointment(appointment(dir.patient, Some(dir.doctor), start))
            .unwrap();
        t.set_status(planned, AppointmentStatus::Planned, Actor::Moderator, start)
            .unwrap();
        let mut finished = appointment(dir.patient, Some(dir.doctor), start - Duration::days(3));
        finished.status = AppointmentStatus::Finished;
        let finished = t.insert_appointment(finished).unwrap();

        assert_eq!(AppointmentQuery::active(&t, dir.patient).unwrap().ids(&t), vec![planned]);
        assert_eq!(AppointmentQuery::archived(&t, dir.patient).unwrap().ids(&t), vec![finished]);
    }

    #[test]
    fn test_statuses_calls_intersect() {
        let (mut t, dir) = directory();
        t.insert_appointment(appointment(dir.patient, Some(dir.doctor), at(2030, 1, 1, 9, 0)))
            .unwrap();
        let query = AppointmentQuery::new()
            .statuses(AppointmentStatus::ACTIVE)
            .statuses([AppointmentStatus::Planned]);
        assert_eq!(query.count(&t), 0);
    }

    #[test]
    fn test_start_desc_puts_missing_start_last() {
        let (mut t, dir) = directory();
        let mut undated = appointment(dir.patient, None, at(2030, 1, 1, 9, 0));
        undated.start = None;
        undated.end = None;
        let undated = t.insert_appointment(undated).unwrap();
        let early = t
            .insert_appointment(appointment(dir.patient, Some(dir.doctor), at(2030, 1, 1, 9, 0)))
            .unwrap();
        let late = t
            .insert_appointment(appointment(dir.patient, Some(dir.doctor), at(2030, 1, 2, 9, 0)))
            .unwrap();

        assert_eq!(AppointmentQuery::new().ids(&t), vec![late, early, undated]);
        assert_eq!(
            AppointmentQuery::new().order(QueryOrder::StartAsc).ids(&t),
            vec![early, late, undated]
        );
    }
}
