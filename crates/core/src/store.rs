//! In-process transactional store.
//!
//! The persistence engine is a collaborator of the core, so the core ships the simplest
//! engine that honours its contracts: all tables live in one [`Tables`] value guarded by a
//! reader/writer lock.
//!
//! - [`ClinicStore::read`] runs a closure against a consistent view.
//! - [`ClinicStore::write`] runs a closure against a *draft copy* of the tables while holding
//!   the write lock, and publishes the draft only when the closure returns `Ok`. A failed
//!   closure therefore leaves no partial writes behind, and two writers never interleave:
//!   every write transaction is serializable.
//!
//! Snapshots (`load_snapshot`/`save_snapshot`) persist the tables as JSON so the CLI and the
//! server can share state between processes.

use crate::appointment::{Appointment, StatusChange};
use crate::patient::{Patient, Relation, User};
use crate::practice::{Doctor, Service, Subsidiary};
use crate::timeslot::TimeSlot;
use crate::{CoreError, CoreResult};
use clinic_types::{
    AppointmentId, DoctorId, PatientId, RelationId, ServiceId, SubsidiaryId, TimeSlotId, UserId,
};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::RwLock;
use std::time::Instant;

/// Edge of the many-to-many `TimeSlot` ↔ `Appointment` relation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotLink {
    pub timeslot: TimeSlotId,
    pub appointment: AppointmentId,
}

/// Every table of the clinic core.
#[derive(Clone, Debug, Default)]
pub struct Tables {
    pub(crate) users: BTreeMap<UserId, User>,
    pub(crate) patients: BTreeMap<PatientId, Patient>,
    pub(crate) doctors: BTreeMap<DoctorId, Doctor>,
    pub(crate) subsidiaries: BTreeMap<SubsidiaryId, Subsidiary>,
    pub(crate) services: BTreeMap<ServiceId, Service>,
    pub(crate) relations: BTreeMap<RelationId, Relation>,
    pub(crate) timeslots: BTreeMap<TimeSlotId, TimeSlot>,
    pub(crate) appointments: BTreeMap<AppointmentId, Appointment>,
    pub(crate) slot_links: BTreeSet<SlotLink>,
    pub(crate) history: Vec<StatusChange>,
}

impl Tables {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Directory entities
    // ------------------------------------------------------------------

    pub fn insert_user(&mut self, user: User) -> UserId {
        let id = user.id;
        self.users.insert(id, user);
        id
    }

    pub fn user(&self, id: UserId) -> CoreResult<&User> {
        self.users
            .get(&id)
            .ok_or_else(|| CoreError::not_found("user", id))
    }

    pub fn insert_patient(&mut self, patient: Patient) -> CoreResult<PatientId> {
        if let Some(user) = patient.user {
            self.user(user)?;
        }
        let id = patient.id;
        self.patients.insert(id, patient);
        Ok(id)
    }

    pub fn patient(&self, id: PatientId) -> CoreResult<&Patient> {
        self.patients
            .get(&id)
            .ok_or_else(|| CoreError::not_found("patient", id))
    }

    pub fn patient_mut(&mut self, id: PatientId) -> CoreResult<&mut Patient> {
        self.patients
            .get_mut(&id)
            .ok_or_else(|| CoreError::not_found("patient", id))
    }

    pub fn insert_doctor(&mut self, doctor: Doctor) -> DoctorId {
        let id = doctor.id;
        self.doctors.insert(id, doctor);
        id
    }

    pub fn doctor(&self, id: DoctorId) -> CoreResult<&Doctor> {
        self.doctors
            .get(&id)
            .ok_or_else(|| CoreError::not_found("doctor", id))
    }

    pub fn doctors(&self) -> impl Iterator<Item = &Doctor> {
        self.doctors.values()
    }

    pub fn insert_subsidiary(&mut self, subsidiary: Subsidiary) -> SubsidiaryId {
        let id = subsidiary.id;
        self.subsidiaries.insert(id, subsidiary);
        id
    }

    pub fn subsidiary(&self, id: SubsidiaryId) -> CoreResult<&Subsidiary> {
        self.subsidiaries
            .get(&id)
            .ok_or_else(|| CoreError::not_found("subsidiary", id))
    }

    pub fn subsidiaries(&self) -> impl Iterator<Item = &Subsidiary> {
        self.subsidiaries.values()
    }

    pub fn insert_service(&mut self, service: Service) -> CoreResult<ServiceId> {
        if let Some(parent) = service.parent {
            self.service(parent)?;
        }
        let id = service.id;
        self.services.insert(id, service);
        Ok(id)
    }

    pub fn service(&self, id: ServiceId) -> CoreResult<&Service> {
        self.services
            .get(&id)
            .ok_or_else(|| CoreError::not_found("service", id))
    }

    /// Status history of one appointment, oldest first.
    pub fn history_of(&self, appointment: AppointmentId) -> Vec<&StatusChange> {
        self.history
            .iter()
            .filter(|change| change.appointment == appointment)
            .collect()
    }
}

// ============================================================================
// STORE
// ============================================================================

thread_local! {
    static COMMIT_DEADLINE: Cell<Option<Instant>> = const { Cell::new(None) };
}

/// Restores the enclosing deadline when a [`with_commit_deadline`] scope ends, even on panic.
struct DeadlineScope(Option<Instant>);

impl Drop for DeadlineScope {
    fn drop(&mut self) {
        COMMIT_DEADLINE.with(|d| d.set(self.0));
    }
}

/// Runs `f` on the current thread with every [`ClinicStore::write`] refused once `deadline`
/// has passed.
///
/// A refused write publishes nothing and fails with [`CoreError::Transient`], so a caller that
/// gave up waiting never leaves a committed change behind.
pub fn with_commit_deadline<T>(deadline: Instant, f: impl FnOnce() -> T) -> T {
    let _scope = DeadlineScope(COMMIT_DEADLINE.with(|d| d.replace(Some(deadline))));
    f()
}

fn commit_deadline_passed() -> bool {
    COMMIT_DEADLINE.with(|d| d.get().is_some_and(|deadline| Instant::now() >= deadline))
}

#[derive(Debug, Default)]
pub struct ClinicStore {
    tables: RwLock<Tables>,
}

impl ClinicStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tables(tables: Tables) -> Self {
        Self {
            tables: RwLock::new(tables),
        }
    }

    /// Runs `f` against a consistent read view.
    pub fn read<T>(&self, f: impl FnOnce(&Tables) -> CoreResult<T>) -> CoreResult<T> {
        let guard = self
            .tables
            .read()
            .map_err(|_| CoreError::Transient("store lock poisoned".into()))?;
        f(&guard)
    }

    /// Runs `f` as one serializable transaction; nothing is published unless it returns `Ok`.
    pub fn write<T>(&self, f: impl FnOnce(&mut Tables) -> CoreResult<T>) -> CoreResult<T> {
        let mut guard = self
            .tables
            .write()
            .map_err(|_| CoreError::Transient("store lock poisoned".into()))?;
        let mut draft = guard.clone();
        let out = f(&mut draft)?;
        if commit_deadline_passed() {
            tracing::warn!("write transaction discarded after the commit deadline");
            return Err(CoreError::Transient("commit deadline exceeded".into()));
        }
        *guard = draft;
        Ok(out)
    }

    /// Loads a store from a JSON snapshot; a missing file yields an empty store.
    pub fn load_snapshot(path: &Path) -> CoreResult<Self> {
        if !path.exists() {
            tracing::info!("snapshot {} not found, starting empty", path.display());
            return Ok(Self::new());
        }
        let contents = fs::read_to_string(path)?;
        let snapshot: Snapshot = serde_json::from_str(&contents)?;
        Ok(Self::from_tables(snapshot.into_tables()))
    }

    /// Writes the current tables to `path` atomically (temp file + rename).
    pub fn save_snapshot(&self, path: &Path) -> CoreResult<()> {
        let json = self.read(|tables| Ok(serde_json::to_string_pretty(&Snapshot::of(tables))?))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// On-disk form of [`Tables`]; rows are stored as lists.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    users: Vec<User>,
    #[serde(default)]
    patients: Vec<Patient>,
    #[serde(default)]
    doctors: Vec<Doctor>,
    #[serde(default)]
    subsidiaries: Vec<Subsidiary>,
    #[serde(default)]
    services: Vec<Service>,
    #[serde(default)]
    relations: Vec<Relation>,
    #[serde(default)]
    timeslots: Vec<TimeSlot>,
    #[serde(default)]
    appointments: Vec<Appointment>,
    #[serde(default)]
    slot_links: Vec<SlotLink>,
    #[serde(default)]
    history: Vec<StatusChange>,
}

impl Snapshot {
    fn of(tables: &Tables) -> Self {
        Self {
            users: tables.users.values().cloned().collect(),
            patients: tables.patients.values().cloned().collect(),
            doctors: tables.doctors.values().cloned().collect(),
            subsidiaries: tables.subsidiaries.values().cloned().collect(),
            services: tables.services.values().cloned().collect(),
            relations: tables.relations.values().cloned().collect(),
            timeslots: tables.timeslots.values().cloned().collect(),
            appointments: tables.appointments.values().cloned().collect(),
            slot_links: tables.slot_links.iter().copied().collect(),
            history: tables.history.clone(),
        }
    }

    fn into_tables(self) -> Tables {
        Tables {
            users: self.users.into_iter().map(|r| (r.id, r)).collect(),
            patients: self.patients.into_iter().map(|r| (r.id, r)).collect(),
            doctors: self.doctors.into_iter().map(|r| (r.id, r)).collect(),
            subsidiaries: self.subsidiaries.into_iter().map(|r| (r.id, r)).collect(),
            services: self.services.into_iter().map(|r| (r.id, r)).collect(),
            relations: self.relations.into_iter().map(|r| (r.id, r)).collect(),
            timeslots: self.timeslots.into_iter().map(|r| (r.id, r)).collect(),
            appointments: self.appointments.into_iter().map(|r| (r.id, r)).collect(),
            slot_links: self.slot_links.into_iter().collect(),
            history: self.history,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{doctor, patient};
    use tempfile::TempDir;

    #[test]
    fn test_failed_write_publishes_nothing() {
        let store = ClinicStore::new();
        let result: CoreResult<()> = store.write(|t| {
            t.insert_doctor(doctor("Dr. House", true));
            Err(CoreError::Transient("boom".into()))
        });
        assert!(result.is_err());
        assert_eq!(store.read(|t| Ok(t.doctors().count())).unwrap(), 0);
    }

    #[test]
    fn test_write_after_commit_deadline_publishes_nothing() {
        let store = ClinicStore::new();
        let result = with_commit_deadline(Instant::now(), || {
            store.write(|t| Ok(t.insert_doctor(doctor("Dr. House", true))))
        });
        assert!(matches!(result, Err(CoreError::Transient(_))));
        assert_eq!(store.read(|t| Ok(t.doctors().count())).unwrap(), 0);

        store
            .write(|t| Ok(t.insert_doctor(doctor("Dr. House", true))))
            .unwrap();
        assert_eq!(store.read(|t| Ok(t.doctors().count())).unwrap(), 1);
    }

    #[test]
    fn test_write_before_commit_deadline_is_published() {
        let store = ClinicStore::new();
        let deadline = Instant::now() + std::time::Duration::from_secs(60);
        with_commit_deadline(deadline, || {
            store.write(|t| Ok(t.insert_doctor(doctor("Dr. House", true))))
        })
        .unwrap();
        assert_eq!(store.read(|t| Ok(t.doctors().count())).unwrap(), 1);
    }

    #[test]
    fn test_successful_write_is_visible() {
        let store = ClinicStore::new();
        let id = store.write(|t| Ok(t.insert_doctor(doctor("Dr. House", true)))).unwrap();
        let name = store
            .read(|t| Ok(t.doctor(id)?.full_name.to_string()))
            .unwrap();
        assert_eq!(name, "Dr. House");
    }

    #[test]
    fn test_snapshot_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clinic.json");

        let store = ClinicStore::new();
        let patient_id = store
            .write(|t| {
                t.insert_doctor(doctor("Dr. Watson", false));
                t.insert_patient(patient("Ivanov", "Petr", true))
            })
            .unwrap();
        store.save_snapshot(&path).unwrap();

        let loaded = ClinicStore::load_snapshot(&path).unwrap();
        let (doctors, name) = loaded
            .read(|t| Ok((t.doctors().count(), t.patient(patient_id)?.full_name())))
            .unwrap();
        assert_eq!(doctors, 1);
        assert_eq!(name, "Ivanov Petr");
    }

    #[test]
    fn test_missing_snapshot_starts_empty() {
        let dir = TempDir::new().unwrap();
        let store = ClinicStore::load_snapshot(&dir.path().join("absent.json")).unwrap();
        assert_eq!(store.read(|t| Ok(t.appointments.len())).unwrap(), 0);
    }
}
