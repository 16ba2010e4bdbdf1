//! Notification fan-out.
//!
//! Receivers of an appointment event are the patient's own user plus the users of every
//! master of the patient. Receivers and context are read in one consistent view; delivery
//! happens afterwards, outside any transaction.

use super::AppointmentWorkflow;
use crate::collaborators::{Channel, EventContext};
use crate::interval::describe_when;
use crate::store::Tables;
use crate::CoreResult;
use chrono::FixedOffset;
use clinic_types::{AppointmentId, UserId};
use std::collections::BTreeMap;

/// One delivery: who gets it and with which context.
#[derive(Clone, Debug)]
pub(crate) struct Delivery {
    pub user: UserId,
    pub context: EventContext,
}

/// Users to notify about `appointment`, each with its context.
///
/// Masters receive `patient_full_name` so they can tell which related patient the event is
/// about; a user that is both the patient's and a master's gets a single delivery.
pub(crate) fn deliveries(
    tables: &Tables,
    appointment: AppointmentId,
    offset: FixedOffset,
) -> CoreResult<Vec<Delivery>> {
    let a = tables.appointment(appointment)?;
    let patient = tables.patient(a.patient)?;

    let doctor_full_name = a
        .doctor
        .and_then(|d| tables.doctor(d).ok())
        .map(|d| d.full_name.to_string());
    let subsidiary_address = a
        .subsidiary
        .and_then(|s| tables.subsidiary(s).ok())
        .map(|s| s.address.to_string());
    let when = describe_when(a.start, a.is_for_whole_day, offset);
    let appointment_str_for_patient = match &doctor_full_name {
        Some(doctor) => format!("{when}, {doctor}"),
        None => when,
    };
    let base = EventContext {
        appointment_id: a.id,
        appointment_str_for_patient,
        appointment_start: a.start,
        doctor_full_name,
        subsidiary_address,
        patient_full_name: None,
    };

    let mut receivers: BTreeMap<UserId, EventContext> = BTreeMap::new();
    for master in tables.masters_of(a.patient) {
        if let Some(user) = tables.patient(master)?.user {
            let mut context = base.clone();
            context.patient_full_name = Some(patient.full_name());
            receivers.insert(user, context);
        }
    }
    if let Some(user) = patient.user {
        receivers.insert(user, base);
    }

    Ok(receivers
        .into_iter()
        .map(|(user, context)| Delivery { user, context })
        .collect())
}

impl AppointmentWorkflow {
    /// Sends `event_name` about `appointment` to every receiver.
    ///
    /// Delivery is best effort: a failed send is logged and the remaining receivers are still
    /// tried. Returns the number of successful sends.
    pub fn notify(&self, event_name: &str, appointment: AppointmentId) -> CoreResult<usize> {
        let offset = self.cfg.utc_offset();
        let deliveries = self
            .store
            .read(|tables| deliveries(tables, appointment, offset))?;

        let mut sent = 0;
        for delivery in deliveries {
            match self
                .notifier
                .send_event(event_name, delivery.user, Channel::Push, &delivery.context)
            {
                Ok(()) => sent += 1,
                Err(err) => tracing::warn!(
                    event_name,
                    %appointment,
                    user = %delivery.user,
                    error = %err,
                    "failed to send push event"
                ),
            }
        }
        tracing::debug!(event_name, %appointment, sent, "notified receivers");
        Ok(sent)
    }

    /// Like [`AppointmentWorkflow::notify`] but only logs failures; used after commits.
    pub(crate) fn notify_after_commit(&self, event_name: &str, appointment: AppointmentId) {
        if let Err(err) = self.notify(event_name, appointment) {
            tracing::warn!(event_name, %appointment, error = %err, "notification skipped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{appointment, at, directory, patient, user};
    use crate::patient::RelationType;
    use chrono::{Offset, Utc};

    #[test]
    fn test_receivers_are_patient_and_masters() {
        let (mut t, dir) = directory();
        let master_user = t.insert_user(user("olga"));
        let mut master = patient("Petrova", "Olga", true);
        master.user = Some(master_user);
        let master = t.insert_patient(master).unwrap();
        t.add_relation(master, dir.patient, RelationType::Parent, true)
            .unwrap();
        // Non-authorizing relations do not receive events.
        let bystander_user = t.insert_user(user("oleg"));
        let mut bystander = patient("Sidorov", "Oleg", true);
        bystander.user = Some(bystander_user);
        let bystander = t.insert_patient(bystander).unwrap();
        t.add_relation(bystander, dir.patient, RelationType::Other, false)
            .unwrap();

        let id = t
            .insert_appointment(appointment(dir.patient, Some(dir.doctor), at(2030, 1, 1, 9, 0)))
            .unwrap();
        let out = deliveries(&t, id, Utc.fix()).unwrap();

        assert_eq!(out.len(), 2);
        let own = out.iter().find(|d| d.user == dir.patient_user).unwrap();
        assert_eq!(own.context.patient_full_name, None);
        assert_eq!(own.context.appointment_str_for_patient, "01.01.2030 09:00, Gregory House");
        let for_master = out.iter().find(|d| d.user == master_user).unwrap();
        assert_eq!(for_master.context.patient_full_name.as_deref(), Some("Ivanova Anna"));
    }

    #[test]
    fn test_patient_without_user_and_masters_has_no_receivers() {
        let (mut t, dir) = directory();
        let lonely = t.insert_patient(patient("Smirnov", "Ilya", true)).unwrap();
        let id = t
            .insert_appointment(appointment(lonely, Some(dir.doctor), at(2030, 1, 1, 9, 0)))
            .unwrap();
        assert!(deliveries(&t, id, Utc.fix()).unwrap().is_empty());
    }
}
