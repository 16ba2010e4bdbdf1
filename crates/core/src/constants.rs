//! Constants used throughout the clinic core.
//!
//! Interval bounds, scheduling cadences, KV keys and outbound event names live here so the
//! workflow, the reconciliation tasks and the tests agree on one value.

use chrono::Duration;

/// Longest allowed appointment or time slot.
pub const MAX_INTERVAL_HOURS: i64 = 24;

/// Shortest allowed time slot.
pub const MIN_TIMESLOT_SECONDS: i64 = 1;

/// Maximum gap between two slots of one patient for them to count as contiguous (1m 1s).
pub const SLOT_MERGE_TOLERANCE_SECONDS: i64 = 61;

/// Only appointments that ended within this many days may be reviewed.
pub const REVIEW_WINDOW_DAYS: i64 = 7;

/// Default lag after an appointment's end before it is finished automatically.
pub const DEFAULT_FINISH_DELTA_MINUTES: i64 = 30;

/// Offsets (minutes before start) at which planned-appointment reminders fire.
pub const DEFAULT_REMINDER_OFFSETS_MINUTES: [i64; 2] = [120, 1440];

/// Local hour at which yesterday's leftovers are finished.
pub const FINISH_YESTERDAY_HOUR: u32 = 4;

/// Default page size for patient-facing listings.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Upper bound on the page size a caller may request.
pub const MAX_PAGE_SIZE: usize = 100;

/// Prefix of every scheduled-task lock key in the KV store.
pub const TASK_LOCK_KEY_PREFIX: &str = "clinic:task-lock:";

/// KV key holding the reminder task's `last_run_time` (ISO-8601).
pub const REMINDER_LAST_RUN_KEY: &str = "clinic:remind_planned_appointments:last_run_time";

// Outbound push event names.
pub const EVENT_REMIND_ABOUT_PLANNED_APPOINTMENT: &str = "remind_about_planned_appointment";
pub const EVENT_APPOINTMENT_CANCELED_BY_ADMIN: &str = "appointment_canceled_by_admin";
pub const EVENT_APPOINTMENT_CREATED_BY_ADMIN: &str = "appointment_created_by_admin";
pub const EVENT_APPOINTMENT_REQUEST_REJECTED_BY_ADMIN: &str =
    "appointment_request__rejected_by_admin";
pub const EVENT_APPOINTMENT_REQUEST_APPROVED_BY_ADMIN: &str =
    "appointment_request__approved_by_admin";
pub const EVENT_APPOINTMENT_ASK_FOR_REVIEW: &str = "appointment__ask_for_review";

pub fn max_interval() -> Duration {
    Duration::hours(MAX_INTERVAL_HOURS)
}

pub fn slot_merge_tolerance() -> Duration {
    Duration::seconds(SLOT_MERGE_TOLERANCE_SECONDS)
}
