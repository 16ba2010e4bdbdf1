//! Capabilities the core calls out to: push delivery, the MIS adapter and the review service.
//!
//! The workflow only depends on the traits. Binaries wire in [`TracingNotifier`] or their own
//! transport; tests use the `Recording*` fakes and inspect what was sent.

use crate::CoreResult;
use chrono::{DateTime, Utc};
use clinic_types::{AppointmentId, PatientId, UserId};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Mutex;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Push,
}

/// Context map attached to every push event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EventContext {
    pub appointment_id: AppointmentId,
    pub appointment_str_for_patient: String,
    pub appointment_start: Option<DateTime<Utc>>,
    pub doctor_full_name: Option<String>,
    pub subsidiary_address: Option<String>,
    /// Set when the receiver is a master being told about a related patient.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient_full_name: Option<String>,
}

pub trait Notifier: Send + Sync {
    fn send_event(
        &self,
        event_name: &str,
        user: UserId,
        channel: Channel,
        context: &EventContext,
    ) -> CoreResult<()>;
}

/// Commands the core hands to the MIS adapter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum IntegrationCommand {
    CreateAppointmentByPatient {
        appointment_id: AppointmentId,
        author_patient_id: PatientId,
    },
    CancelAppointmentByPatient {
        appointment_id: AppointmentId,
        author_patient_id: PatientId,
    },
}

impl IntegrationCommand {
    pub fn appointment_id(&self) -> AppointmentId {
        match self {
            Self::CreateAppointmentByPatient { appointment_id, .. }
            | Self::CancelAppointmentByPatient { appointment_id, .. } => *appointment_id,
        }
    }
}

/// Hands a command to the MIS adapter; implementations enqueue and return immediately.
pub trait IntegrationGateway: Send + Sync {
    fn submit(&self, command: IntegrationCommand) -> CoreResult<()>;
}

pub trait ReviewPolicy: Send + Sync {
    fn has_review(&self, appointment: AppointmentId) -> bool;
}

// ============================================================================
// TRACING IMPLEMENTATIONS
// ============================================================================

/// Logs every event instead of delivering it.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn send_event(
        &self,
        event_name: &str,
        user: UserId,
        channel: Channel,
        context: &EventContext,
    ) -> CoreResult<()> {
        let context = serde_json::to_string(context)?;
        tracing::info!(event_name, %user, ?channel, %context, "push event");
        Ok(())
    }
}

/// Logs every command instead of forwarding it.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingIntegrationGateway;

impl IntegrationGateway for TracingIntegrationGateway {
    fn submit(&self, command: IntegrationCommand) -> CoreResult<()> {
        let payload = serde_json::to_string(&command)?;
        tracing::info!(%payload, "integration command");
        Ok(())
    }
}

/// Review service that has no reviews at all.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoReviews;

impl ReviewPolicy for NoReviews {
    fn has_review(&self, _appointment: AppointmentId) -> bool {
        false
    }
}

// ============================================================================
// RECORDING FAKES
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentEvent {
    pub event_name: String,
    pub user: UserId,
    pub channel: Channel,
    pub context: EventContext,
}

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentEvent> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Sent events with the given name.
    pub fn named(&self, event_name: &str) -> Vec<SentEvent> {
        self.sent()
            .into_iter()
            .filter(|e| e.event_name == event_name)
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn send_event(
        &self,
        event_name: &str,
        user: UserId,
        channel: Channel,
        context: &EventContext,
    ) -> CoreResult<()> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(SentEvent {
                event_name: event_name.to_string(),
                user,
                channel,
                context: context.clone(),
            });
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RecordingIntegrationGateway {
    submitted: Mutex<Vec<IntegrationCommand>>,
}

impl RecordingIntegrationGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submitted(&self) -> Vec<IntegrationCommand> {
        self.submitted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl IntegrationGateway for RecordingIntegrationGateway {
    fn submit(&self, command: IntegrationCommand) -> CoreResult<()> {
        self.submitted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(command);
        Ok(())
    }
}

/// Review service backed by a fixed set of reviewed appointments.
#[derive(Debug, Default)]
pub struct StaticReviews {
    reviewed: Mutex<BTreeSet<AppointmentId>>,
}

impl StaticReviews {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_reviewed(&self, appointment: AppointmentId) {
        self.reviewed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(appointment);
    }
}

impl ReviewPolicy for StaticReviews {
    fn has_review(&self, appointment: AppointmentId) -> bool {
        self.reviewed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&appointment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_serializes_with_tag() {
        let appointment_id = AppointmentId::new();
        let command = IntegrationCommand::CancelAppointmentByPatient {
            appointment_id,
            author_patient_id: PatientId::new(),
        };
        let json = serde_json::to_value(&command).unwrap();
        assert_eq!(json["command"], "cancel_appointment_by_patient");
        assert_eq!(command.appointment_id(), appointment_id);
    }

    #[test]
    fn test_context_omits_missing_patient_name() {
        let context = EventContext {
            appointment_id: AppointmentId::new(),
            appointment_str_for_patient: "01.03.2030 09:00".into(),
            appointment_start: None,
            doctor_full_name: Some("Gregory House".into()),
            subsidiary_address: None,
            patient_full_name: None,
        };
        let json = serde_json::to_value(&context).unwrap();
        assert!(json.get("patient_full_name").is_none());
        assert!(json.get("subsidiary_address").unwrap().is_null());
    }
}
