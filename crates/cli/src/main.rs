use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use clinic_core::collaborators::{NoReviews, TracingIntegrationGateway, TracingNotifier};
use clinic_core::reconciliation::{
    default_tasks, task_by_name, InMemoryKeyValueStore, TaskContext, TaskRunner,
};
use clinic_core::repositories::AppointmentQuery;
use clinic_core::seed::{seed_demo_directory, seed_random_timeslots, shuffle_timeslot, SeedPlan};
use clinic_core::workflow::{AdminAppointmentRequest, IncomingAppointment};
use clinic_core::{
    Actor, Appointment, AppointmentStatus, AppointmentWorkflow, ClinicConfig, ClinicStore,
    SystemClock,
};
use clinic_types::{AppointmentId, DoctorId, PatientId, ServiceId, SubsidiaryId, TimeSlotId};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "clinic")]
#[command(about = "Clinic appointment coordination CLI")]
struct Cli {
    /// Store snapshot to read and write
    #[arg(long, default_value = "clinic-snapshot.json")]
    snapshot: PathBuf,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the demo clinic and random free time slots
    Seed {
        /// Number of days to fill, starting tomorrow
        #[arg(long, default_value_t = 7)]
        days: u32,
        /// RNG seed for reproducible slots
        #[arg(long)]
        rng_seed: Option<u64>,
    },
    /// Move a time slot to a random free window on the same day
    ShuffleTimeslot {
        /// Time slot UUID
        slot_id: String,
        #[arg(long)]
        rng_seed: Option<u64>,
    },
    /// List reconciliation tasks and their cadence
    Tasks,
    /// Run one pass of a reconciliation task
    RunTask {
        /// Task name, see `tasks`
        name: String,
    },
    /// List stored appointments
    ListAppointments {
        /// Only this numeric status code
        #[arg(long)]
        status: Option<u8>,
        /// Only appointments of this patient
        #[arg(long)]
        patient: Option<String>,
    },
    /// Approve an appointment request
    Approve { id: String },
    /// Reject an appointment request
    Reject { id: String },
    /// Send an appointment back to moderation
    ReturnToModeration { id: String },
    /// Cancel an appointment request as moderator
    Cancel { id: String },
    /// Finish an appointment
    Finish {
        id: String,
        /// Ask the patient for a review
        #[arg(long)]
        ask_for_review: bool,
    },
    /// Enter a planned appointment as clinic staff
    Book {
        #[arg(long)]
        patient: String,
        #[arg(long)]
        doctor: String,
        #[arg(long)]
        subsidiary: String,
        #[arg(long)]
        service: Option<String>,
        #[arg(long)]
        time_slot: Option<String>,
        /// Start instant (RFC 3339)
        #[arg(long)]
        start: Option<String>,
        /// End instant (RFC 3339)
        #[arg(long)]
        end: Option<String>,
        /// Price in minor currency units
        #[arg(long)]
        price: Option<i64>,
    },
    /// Import MIS appointments from a JSON array file
    MisImport { file: PathBuf },
    /// Attach an MIS-reported time slot to the patient's adjacent appointment
    AttachSlot {
        /// Time slot UUID, or the MIS timeslot id with `--mis`
        slot_id: String,
        /// Patient the MIS booked the slot for
        #[arg(long)]
        patient: String,
        /// Treat `slot_id` as the MIS timeslot id
        #[arg(long)]
        mis: bool,
    },
}

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

fn open_store(path: &Path) -> CliResult<ClinicStore> {
    if path.exists() {
        Ok(ClinicStore::load_snapshot(path)?)
    } else {
        Ok(ClinicStore::new())
    }
}

fn parse_instant(raw: Option<String>) -> CliResult<Option<DateTime<Utc>>> {
    let Some(value) = raw else {
        return Ok(None);
    };
    match DateTime::parse_from_rfc3339(&value) {
        Ok(t) => Ok(Some(t.with_timezone(&Utc))),
        Err(e) => Err(format!("invalid instant {value}: {e}").into()),
    }
}

fn print_appointment(a: &Appointment) {
    let when = match (a.start, a.end) {
        (Some(start), Some(end)) => format!("{} - {}", start.to_rfc3339(), end.to_rfc3339()),
        _ => "unscheduled".to_string(),
    };
    println!(
        "ID: {}, Patient: {}, Status: {} ({}), When: {}",
        a.id,
        a.patient,
        a.status.name(),
        a.status.code(),
        when
    );
}

fn main() -> CliResult<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("clinic_core=warn".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("No command given. Use --help to see available commands.");
        return Ok(());
    };

    let cfg = Arc::new(ClinicConfig::from_env_lookup(|key| std::env::var(key).ok())?);
    let store = Arc::new(open_store(&cli.snapshot)?);
    let clock = Arc::new(SystemClock);
    let workflow = AppointmentWorkflow::new(
        store.clone(),
        cfg.clone(),
        clock.clone(),
        Arc::new(TracingNotifier),
        Arc::new(TracingIntegrationGateway),
        Arc::new(NoReviews),
    );

    let mutated = match command {
        Commands::Seed { days, rng_seed } => {
            let mut rng = match rng_seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            let plan = SeedPlan {
                days,
                ..SeedPlan::default()
            };
            let now = workflow.now();
            let (directory, slots) = store.write(|tables| {
                let directory = seed_demo_directory(tables)?;
                let slots = seed_random_timeslots(
                    tables,
                    &mut rng,
                    &plan,
                    &directory,
                    now,
                    cfg.utc_offset(),
                )?;
                Ok((directory, slots))
            })?;
            println!(
                "Seeded {} doctors, {} patients and {} time slots",
                directory.doctors.len(),
                directory.patients.len(),
                slots.len()
            );
            for patient in &directory.patients {
                println!("Patient: {}", patient);
            }
            true
        }
        Commands::ShuffleTimeslot { slot_id, rng_seed } => {
            let slot: TimeSlotId = slot_id.parse()?;
            let mut rng = match rng_seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            let moved = store.write(|tables| {
                shuffle_timeslot(tables, &mut rng, &SeedPlan::default(), slot, cfg.utc_offset())
            })?;
            if moved {
                println!("Moved time slot {}", slot);
            } else {
                println!("No free window found for time slot {}", slot);
            }
            moved
        }
        Commands::Tasks => {
            for task in default_tasks() {
                let state = if task.enabled(cfg.features()) {
                    "enabled"
                } else {
                    "disabled"
                };
                println!("{} ({}, {})", task.name(), task.cadence(), state);
            }
            false
        }
        Commands::RunTask { name } => {
            let task = task_by_name(&name).ok_or_else(|| format!("unknown task: {name}"))?;
            let kv = Arc::new(InMemoryKeyValueStore::new(clock.clone()));
            let runner = TaskRunner::new(TaskContext::new(workflow.clone(), kv, clock));
            let report = runner.run_once(task.as_ref())?;
            println!("{}: {:?}", report.task, report.outcome);
            true
        }
        Commands::ListAppointments { status, patient } => {
            let mut query = AppointmentQuery::new();
            if let Some(code) = status {
                let status = AppointmentStatus::from_code(code)
                    .ok_or_else(|| format!("unknown status code: {code}"))?;
                query = query.statuses([status]);
            }
            if let Some(patient) = patient {
                query = query.patients([patient.parse::<PatientId>()?]);
            }
            let appointments = store.read(|tables| Ok(query.fetch(tables)))?;
            if appointments.is_empty() {
                println!("No appointments found.");
            }
            for appointment in &appointments {
                print_appointment(appointment);
            }
            false
        }
        Commands::Approve { id } => {
            print_appointment(&workflow.approve(id.parse::<AppointmentId>()?)?);
            true
        }
        Commands::Reject { id } => {
            print_appointment(&workflow.reject(id.parse::<AppointmentId>()?)?);
            true
        }
        Commands::ReturnToModeration { id } => {
            print_appointment(&workflow.return_to_moderation(id.parse::<AppointmentId>()?)?);
            true
        }
        Commands::Cancel { id } => {
            print_appointment(&workflow.cancel_by_moderator(id.parse::<AppointmentId>()?)?);
            true
        }
        Commands::Finish { id, ask_for_review } => {
            let id: AppointmentId = id.parse()?;
            print_appointment(&workflow.finish(id, ask_for_review, Actor::Moderator)?);
            true
        }
        Commands::Book {
            patient,
            doctor,
            subsidiary,
            service,
            time_slot,
            start,
            end,
            price,
        } => {
            let request = AdminAppointmentRequest {
                patient: patient.parse::<PatientId>()?,
                doctor: doctor.parse::<DoctorId>()?,
                subsidiary: subsidiary.parse::<SubsidiaryId>()?,
                service: service.map(|s| s.parse::<ServiceId>()).transpose()?,
                time_slot_id: time_slot.map(|s| s.parse::<TimeSlotId>()).transpose()?,
                start: parse_instant(start)?,
                end: parse_instant(end)?,
                is_for_whole_day: false,
                price,
                reason_text: None,
            };
            print_appointment(&workflow.create_by_administrator(request)?);
            true
        }
        Commands::MisImport { file } => {
            let raw = std::fs::read_to_string(&file)?;
            let incoming: Vec<IncomingAppointment> = serde_json::from_str(&raw)?;
            let mut failed = 0;
            for item in incoming {
                match workflow.create_from_integration_data(item) {
                    Ok(appointment) => print_appointment(&appointment),
                    Err(e) => {
                        failed += 1;
                        eprintln!("Error importing appointment: {}", e);
                    }
                }
            }
            if failed > 0 {
                eprintln!("{} appointments were not imported", failed);
            }
            true
        }
        Commands::AttachSlot {
            slot_id,
            patient,
            mis,
        } => {
            let slot: TimeSlotId = if mis {
                let mis_id: i64 = slot_id.parse()?;
                store
                    .read(|tables| Ok(tables.timeslot_by_integration_id(mis_id).map(|s| s.id)))?
                    .ok_or_else(|| format!("no time slot with MIS id {mis_id}"))?
            } else {
                slot_id.parse()?
            };
            let patient: PatientId = patient.parse()?;
            match workflow.attach_nearby_slot(slot, patient)? {
                Some(appointment) => print_appointment(&appointment),
                None => println!("No adjacent appointment for time slot {}", slot),
            }
            true
        }
    };

    if mutated {
        store.save_snapshot(&cli.snapshot)?;
    }
    Ok(())
}
