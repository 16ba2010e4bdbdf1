//! # Clinic Core
//!
//! Core business logic for clinic appointment coordination.
//!
//! This crate owns the appointment lifecycle and everything it depends on:
//! - The appointment status lattice and its transitions ([`workflow`])
//! - Doctor time slots and their links to appointments ([`repositories`])
//! - Master/slave patient relations and what a patient may see or change ([`portal`])
//! - Periodic reconciliation of stored state with the passage of time ([`reconciliation`])
//!
//! **No transport concerns**: HTTP servers, CLIs and process wiring belong in `api-rest`, `cli`
//! and the `clinic-run` binary. Push delivery, the MIS adapter and the review subsystem are
//! reached through the traits in [`collaborators`].

pub mod appointment;
pub mod clock;
pub mod collaborators;
pub mod config;
pub mod constants;
pub mod error;
pub mod interval;
pub mod patient;
pub mod portal;
pub mod practice;
pub mod reconciliation;
pub mod repositories;
pub mod seed;
pub mod store;
pub mod timeslot;
pub mod workflow;

#[cfg(test)]
mod fixtures;

pub use appointment::{Actor, Appointment, AppointmentStatus, CreatedByType};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{ClinicConfig, FeatureFlags, PatientCancelPolicy};
pub use error::{ApiError, ApiErrors, CoreError, CoreResult, ErrorKind};
pub use portal::PatientPortal;
pub use store::{ClinicStore, Tables};
pub use workflow::AppointmentWorkflow;
