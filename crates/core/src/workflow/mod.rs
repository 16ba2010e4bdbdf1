//! Appointment Workflow.
//!
//! Every write path of an appointment goes through [`AppointmentWorkflow`]. Each operation
//! runs its checks and writes inside one store transaction, then performs the outbound side
//! effects (push events, MIS commands) after the transaction committed. A failed operation
//! therefore never leaves a notification or command behind.
//!
//! ## State machine
//!
//! ```text
//! ∅ ──create_by_patient──▶ ON_MODERATION
//! ON_MODERATION ──approve──▶ PLANNED
//! ON_MODERATION ──reject──▶ REJECTED                    (frees and unlinks slots)
//! REJECTED | PLANNED ──return_to_moderation──▶ ON_MODERATION
//! ON_MODERATION | PLANNED ──cancel_by_patient──▶ CANCELED_BY_PATIENT   (slots kept)
//! ON_MODERATION ──cancel_by_moderator──▶ CANCELED_BY_MODERATOR        (slots freed)
//! any non-archived ──finish──▶ FINISHED
//! ```
//!
//! Anything else fails with [`CoreError::WrongStatus`].

mod create;
mod integration;
mod lifecycle;
mod merge;
mod moderation;
mod notify;

pub use create::{AdminAppointmentRequest, AppointmentRequest};
pub use integration::IncomingAppointment;

use crate::appointment::{Actor, Appointment, AppointmentStatus};
use crate::clock::Clock;
use crate::collaborators::{IntegrationGateway, Notifier, ReviewPolicy};
use crate::config::{ClinicConfig, PatientCancelPolicy};
use crate::store::{ClinicStore, Tables};
use crate::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use clinic_types::AppointmentId;
use std::sync::Arc;
use AppointmentStatus::*;

/// A moderator- or patient-initiated status change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    Approve,
    Reject,
    ReturnToModeration,
    CancelByPatient(PatientCancelPolicy),
    CancelByModerator,
    Finish,
}

impl Transition {
    pub fn target(self) -> AppointmentStatus {
        match self {
            Self::Approve => Planned,
            Self::Reject => Rejected,
            Self::ReturnToModeration => OnModeration,
            Self::CancelByPatient(_) => CanceledByPatient,
            Self::CancelByModerator => CanceledByModerator,
            Self::Finish => Finished,
        }
    }

    /// Statuses the transition may start from.
    pub fn allowed_from(self) -> &'static [AppointmentStatus] {
        match self {
            Self::Approve | Self::Reject | Self::CancelByModerator => &[OnModeration],
            Self::ReturnToModeration => &[Rejected, Planned],
            Self::CancelByPatient(PatientCancelPolicy::PlannedOnly) => &[Planned],
            Self::CancelByPatient(PatientCancelPolicy::OnModerationAndPlanned) => {
                &[OnModeration, Planned]
            }
            Self::Finish => &[
                Hidden,
                OnModeration,
                Planned,
                PatientArrived,
                OnAppointment,
                AwaitingPayment,
                CancelRequestByPatient,
            ],
        }
    }
}

/// Checks the guard and writes the new status plus its history entry.
pub(crate) fn apply_transition(
    tables: &mut Tables,
    id: AppointmentId,
    transition: Transition,
    actor: Actor,
    at: DateTime<Utc>,
) -> CoreResult<Appointment> {
    let current = tables.appointment(id)?.status;
    let allowed = transition.allowed_from();
    if !allowed.contains(&current) {
        return Err(CoreError::wrong_status(current, allowed));
    }
    tables.set_status(id, transition.target(), actor, at)?;
    Ok(tables.appointment(id)?.clone())
}

/// Entry point for every appointment state change.
#[derive(Clone)]
pub struct AppointmentWorkflow {
    store: Arc<ClinicStore>,
    cfg: Arc<ClinicConfig>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    integration: Arc<dyn IntegrationGateway>,
    reviews: Arc<dyn ReviewPolicy>,
}

impl AppointmentWorkflow {
    pub fn new(
        store: Arc<ClinicStore>,
        cfg: Arc<ClinicConfig>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        integration: Arc<dyn IntegrationGateway>,
        reviews: Arc<dyn ReviewPolicy>,
    ) -> Self {
        Self {
            store,
            cfg,
            clock,
            notifier,
            integration,
            reviews,
        }
    }

    pub fn store(&self) -> &Arc<ClinicStore> {
        &self.store
    }

    pub fn config(&self) -> &ClinicConfig {
        &self.cfg
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Hands `command` to the MIS adapter; failures are logged, never returned.
    fn submit_integration(&self, command: crate::collaborators::IntegrationCommand) {
        let appointment_id = command.appointment_id();
        if let Err(err) = self.integration.submit(command) {
            tracing::warn!(%appointment_id, error = %err, "failed to submit integration command");
        }
    }
}
