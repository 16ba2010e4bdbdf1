//! Builders shared by the unit tests.

use crate::appointment::{
    Appointment, AppointmentIntegrationData, AppointmentStatus, CreatedByType,
};
use crate::clock::FixedClock;
use crate::collaborators::{RecordingIntegrationGateway, RecordingNotifier, StaticReviews};
use crate::config::{ClinicConfig, FeatureFlags};
use crate::patient::{Gender, Patient, PatientProfile, User};
use crate::practice::{Doctor, Service, Subsidiary};
use crate::store::{ClinicStore, Tables};
use crate::timeslot::{TimeSlot, TimeSlotIntegrationData};
use crate::workflow::AppointmentWorkflow;
use chrono::{DateTime, Duration, TimeZone, Utc};
use clinic_types::{
    AppointmentId, DoctorId, NonEmptyText, PatientId, ServiceId, SubsidiaryId, TimeSlotId, UserId,
};
use std::sync::Arc;

pub fn text(s: &str) -> NonEmptyText {
    NonEmptyText::new(s).unwrap()
}

pub fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, 0)
        .unwrap()
}

pub fn user(name: &str) -> User {
    User {
        id: UserId::new(),
        display_name: text(name),
    }
}

pub fn patient(last: &str, first: &str, is_confirmed: bool) -> Patient {
    Patient {
        id: PatientId::new(),
        profile: PatientProfile {
            last_name: text(last),
            first_name: text(first),
            middle_name: None,
            birth_date: None,
            gender: Gender::Unknown,
        },
        user: None,
        is_confirmed,
    }
}

pub fn doctor(name: &str, slots_for_patient: bool) -> Doctor {
    Doctor {
        id: DoctorId::new(),
        full_name: text(name),
        is_timeslots_available_for_patient: slots_for_patient,
        is_totally_hidden: false,
        is_fake: false,
    }
}

pub fn subsidiary(title: &str, address: &str) -> Subsidiary {
    Subsidiary {
        id: SubsidiaryId::new(),
        title: text(title),
        address: text(address),
    }
}

pub fn timeslot(
    doctor: DoctorId,
    subsidiary: SubsidiaryId,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> TimeSlot {
    TimeSlot {
        id: TimeSlotId::new(),
        doctor,
        subsidiary,
        start,
        end,
        is_available: true,
        integration_data: TimeSlotIntegrationData::default(),
    }
}

/// A 30 minute `ON_MODERATION` request created by `patient` the day before `start`.
pub fn appointment(
    patient: PatientId,
    doctor: Option<DoctorId>,
    start: DateTime<Utc>,
) -> Appointment {
    let created_at = start - Duration::days(1);
    Appointment {
        id: AppointmentId::new(),
        patient,
        author_patient: patient,
        doctor,
        service: None,
        subsidiary: None,
        reason_text: Some(text("Checkup")),
        start: Some(start),
        end: Some(start + Duration::minutes(30)),
        is_for_whole_day: false,
        price: None,
        status: AppointmentStatus::OnModeration,
        created_by_type: CreatedByType::Patient,
        integration_data: AppointmentIntegrationData::default(),
        created_at,
        updated_at: created_at,
    }
}

pub struct Dir {
    pub doctor: DoctorId,
    /// Does not accept slot picks from patients.
    pub other_doctor: DoctorId,
    pub subsidiary: SubsidiaryId,
    pub service: ServiceId,
    /// Confirmed, owns `patient_user`.
    pub patient: PatientId,
    pub patient_user: UserId,
}

pub fn directory() -> (Tables, Dir) {
    let mut t = Tables::new();
    let doctor = t.insert_doctor(doctor("Gregory House", true));
    let other_doctor = t.insert_doctor(self::doctor("John Watson", false));
    let subsidiary = t.insert_subsidiary(subsidiary("Central", "1 Baker Street"));
    let service = t
        .insert_service(Service {
            id: ServiceId::new(),
            title: text("Consultation"),
            parent: None,
        })
        .unwrap();
    let patient_user = t.insert_user(user("anna"));
    let mut p = patient("Ivanova", "Anna", true);
    p.user = Some(patient_user);
    let patient = t.insert_patient(p).unwrap();
    (
        t,
        Dir {
            doctor,
            other_doctor,
            subsidiary,
            service,
            patient,
            patient_user,
        },
    )
}

/// A workflow over `tables` with recording collaborators and a clock pinned at `now`.
pub struct Harness {
    pub workflow: AppointmentWorkflow,
    pub store: Arc<ClinicStore>,
    pub clock: Arc<FixedClock>,
    pub notifier: Arc<RecordingNotifier>,
    pub integration: Arc<RecordingIntegrationGateway>,
    pub reviews: Arc<StaticReviews>,
}

impl Harness {
    /// Same store and collaborators, different configuration.
    pub fn with_config(&self, cfg: ClinicConfig) -> AppointmentWorkflow {
        AppointmentWorkflow::new(
            self.store.clone(),
            Arc::new(cfg),
            self.clock.clone(),
            self.notifier.clone(),
            self.integration.clone(),
            self.reviews.clone(),
        )
    }

    pub fn with_features(&self, features: FeatureFlags) -> AppointmentWorkflow {
        self.with_config(self.workflow.config().clone().with_features(features))
    }

    pub fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> T {
        self.store.read(|t| Ok(f(t))).unwrap()
    }
}

pub fn workflow_with(tables: Tables, now: DateTime<Utc>) -> Harness {
    let store = Arc::new(ClinicStore::from_tables(tables));
    let clock = Arc::new(FixedClock::new(now));
    let notifier = Arc::new(RecordingNotifier::new());
    let integration = Arc::new(RecordingIntegrationGateway::new());
    let reviews = Arc::new(StaticReviews::new());
    let workflow = AppointmentWorkflow::new(
        store.clone(),
        Arc::new(ClinicConfig::default()),
        clock.clone(),
        notifier.clone(),
        integration.clone(),
        reviews.clone(),
    );
    Harness {
        workflow,
        store,
        clock,
        notifier,
        integration,
        reviews,
    }
}
