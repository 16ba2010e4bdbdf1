//! Data-access operations over [`crate::store::Tables`].
//!
//! Each submodule adds an `impl Tables` block for one concern:
//! - `patient_graph`: master/slave relations and reachable patient sets
//! - `timeslots`: doctor availability windows and their links to appointments
//! - `appointments`: appointment rows, status history and the [`AppointmentQuery`] builder

pub mod appointments;
pub mod patient_graph;
pub mod timeslots;

pub use appointments::{AppointmentQuery, QueryOrder};
