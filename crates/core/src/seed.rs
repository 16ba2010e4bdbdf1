//! Demo data for local runs.
//!
//! `seed_demo_directory` writes a small clinic (doctors, branches, services, patients) and
//! `seed_random_timeslots` scatters free slots over the next days. Random slots never overlap
//! another slot of the same doctor: every candidate window is checked with
//! [`Tables::intersects_point`] at both ends before it is inserted.

use crate::interval::{local_date, local_instant};
use crate::patient::{Gender, Patient, PatientProfile, RelationType, User};
use crate::practice::{Doctor, Service, Subsidiary};
use crate::store::Tables;
use crate::timeslot::{TimeSlot, TimeSlotIntegrationData};
use crate::{CoreError, CoreResult};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Utc};
use clinic_types::{
    DoctorId, NonEmptyText, PatientId, ServiceId, SubsidiaryId, TimeSlotId, UserId,
};
use rand::Rng;

/// How many random slots to generate and where to put them.
#[derive(Clone, Debug)]
pub struct SeedPlan {
    pub days: u32,
    pub slots_per_doctor_per_day: u32,
    pub slot_minutes: i64,
    /// Local working hours `[open, close)`.
    pub opening_hour: u32,
    pub closing_hour: u32,
    /// Attempts per slot before giving up on a crowded day.
    pub max_attempts: u32,
}

impl Default for SeedPlan {
    fn default() -> Self {
        Self {
            days: 7,
            slots_per_doctor_per_day: 6,
            slot_minutes: 30,
            opening_hour: 9,
            closing_hour: 18,
            max_attempts: 20,
        }
    }
}

impl SeedPlan {
    fn validate(&self) -> CoreResult<()> {
        if self.opening_hour >= self.closing_hour || self.closing_hour > 24 {
            return Err(CoreError::InvalidInput(format!(
                "invalid working hours {}..{}",
                self.opening_hour, self.closing_hour
            )));
        }
        let working_minutes = i64::from(self.closing_hour - self.opening_hour) * 60;
        if self.slot_minutes <= 0 || self.slot_minutes > working_minutes {
            return Err(CoreError::InvalidInput(format!(
                "slot length {} does not fit the working day",
                self.slot_minutes
            )));
        }
        Ok(())
    }
}

/// Ids of the rows written by [`seed_demo_directory`].
#[derive(Clone, Debug)]
pub struct DemoDirectory {
    pub doctors: Vec<DoctorId>,
    pub subsidiaries: Vec<SubsidiaryId>,
    pub services: Vec<ServiceId>,
    pub patients: Vec<PatientId>,
}

fn text(value: &str) -> CoreResult<NonEmptyText> {
    NonEmptyText::new(value).map_err(|e| CoreError::InvalidInput(e.to_string()))
}

fn demo_patient(
    tables: &mut Tables,
    last: &str,
    first: &str,
    birth_date: Option<NaiveDate>,
    with_user: bool,
) -> CoreResult<PatientId> {
    let user = if with_user {
        Some(tables.insert_user(User {
            id: UserId::new(),
            display_name: text(&format!("{first} {last}"))?,
        }))
    } else {
        None
    };
    tables.insert_patient(Patient {
        id: PatientId::new(),
        profile: PatientProfile {
            last_name: text(last)?,
            first_name: text(first)?,
            middle_name: None,
            birth_date,
            gender: Gender::Unknown,
        },
        user,
        is_confirmed: true,
    })
}

/// Writes a small demo clinic: three doctors, two branches, a service tree and a family.
pub fn seed_demo_directory(tables: &mut Tables) -> CoreResult<DemoDirectory> {
    let mut doctors = Vec::new();
    for (name, slots_for_patient) in [
        ("Gregory House", true),
        ("James Wilson", true),
        ("Lisa Cuddy", false),
    ] {
        doctors.push(tables.insert_doctor(Doctor {
            id: DoctorId::new(),
            full_name: text(name)?,
            is_timeslots_available_for_patient: slots_for_patient,
            is_totally_hidden: false,
            is_fake: false,
        }));
    }

    let mut subsidiaries = Vec::new();
    for (title, address) in [
        ("Central", "1 Baker Street"),
        ("Riverside", "14 Embankment Road"),
    ] {
        subsidiaries.push(tables.insert_subsidiary(Subsidiary {
            id: SubsidiaryId::new(),
            title: text(title)?,
            address: text(address)?,
        }));
    }

    let root = tables.insert_service(Service {
        id: ServiceId::new(),
        title: text("Consultations")?,
        parent: None,
    })?;
    let mut services = vec![root];
    for title in ["General practitioner", "Cardiology"] {
        services.push(tables.insert_service(Service {
            id: ServiceId::new(),
            title: text(title)?,
            parent: Some(root),
        })?);
    }

    let mother = demo_patient(tables, "Petrova", "Olga", NaiveDate::from_ymd_opt(1985, 4, 12), true)?;
    let child = demo_patient(tables, "Petrov", "Ivan", NaiveDate::from_ymd_opt(2016, 9, 3), false)?;
    let single = demo_patient(tables, "Sidorov", "Oleg", None, true)?;
    tables.add_relation(mother, child, RelationType::Child, true)?;

    tracing::info!(
        doctors = doctors.len(),
        subsidiaries = subsidiaries.len(),
        "seeded demo directory"
    );
    Ok(DemoDirectory {
        doctors,
        subsidiaries,
        services,
        patients: vec![mother, child, single],
    })
}

/// Picks a random aligned window inside the working hours of `date`.
fn random_window<R: Rng>(
    rng: &mut R,
    plan: &SeedPlan,
    date: NaiveDate,
    offset: FixedOffset,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let working_minutes = i64::from(plan.closing_hour - plan.opening_hour) * 60;
    let positions = working_minutes / plan.slot_minutes;
    let index = rng.gen_range(0..positions);
    let open = NaiveTime::from_hms_opt(plan.opening_hour, 0, 0).unwrap_or(NaiveTime::MIN);
    let start = local_instant(date, open, offset) + Duration::minutes(index * plan.slot_minutes);
    (start, start + Duration::minutes(plan.slot_minutes))
}

fn window_is_free(
    tables: &Tables,
    doctor: DoctorId,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    excluding: Option<TimeSlotId>,
) -> bool {
    // Slots touching at one instant count as colliding; seeded slots never share an edge.
    tables.intersects_point(doctor, start, excluding).is_empty()
        && tables.intersects_point(doctor, end, excluding).is_empty()
}

/// Scatters free slots for every doctor/branch pair over `plan.days` days starting tomorrow.
pub fn seed_random_timeslots<R: Rng>(
    tables: &mut Tables,
    rng: &mut R,
    plan: &SeedPlan,
    directory: &DemoDirectory,
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> CoreResult<Vec<TimeSlotId>> {
    plan.validate()?;
    if directory.subsidiaries.is_empty() {
        return Err(CoreError::InvalidInput(
            "at least one subsidiary is required to seed slots".into(),
        ));
    }
    let first_day = local_date(now, offset) + Duration::days(1);
    let mut created = Vec::new();

    for day in 0..plan.days {
        let date = first_day + Duration::days(i64::from(day));
        for doctor in &directory.doctors {
            for _ in 0..plan.slots_per_doctor_per_day {
                let subsidiary =
                    directory.subsidiaries[rng.gen_range(0..directory.subsidiaries.len())];
                let found = (0..plan.max_attempts)
                    .map(|_| random_window(rng, plan, date, offset))
                    .find(|(start, end)| window_is_free(tables, *doctor, *start, *end, None));
                let Some((start, end)) = found else {
                    tracing::debug!(%doctor, %date, "no free window left, skipping slot");
                    continue;
                };
                created.push(tables.insert_timeslot(TimeSlot {
                    id: TimeSlotId::new(),
                    doctor: *doctor,
                    subsidiary,
                    start,
                    end,
                    is_available: true,
                    integration_data: TimeSlotIntegrationData::default(),
                })?);
            }
        }
    }

    tracing::info!(slots = created.len(), "seeded random time slots");
    Ok(created)
}

/// Moves an existing slot to a random free window on the same local date.
///
/// Returns `false` when no free window was found within `plan.max_attempts`.
pub fn shuffle_timeslot<R: Rng>(
    tables: &mut Tables,
    rng: &mut R,
    plan: &SeedPlan,
    slot: TimeSlotId,
    offset: FixedOffset,
) -> CoreResult<bool> {
    plan.validate()?;
    let current = tables.timeslot(slot)?.clone();
    let date = local_date(current.start, offset);
    let found = (0..plan.max_attempts)
        .map(|_| random_window(rng, plan, date, offset))
        .find(|(start, end)| window_is_free(tables, current.doctor, *start, *end, Some(slot)));
    match found {
        Some((start, end)) => {
            tables.reschedule_timeslot(slot, start, end)?;
            Ok(true)
        }
        None => Ok(false),
    }
}
