//! Core runtime configuration.
//!
//! Everything the workflow and the reconciliation tasks treat as a toggle or a tunable is
//! resolved once at process startup into a [`ClinicConfig`] and passed into the services.
//! Feature flags are read at workflow entry from this structure, never from process-wide
//! environment variables, so concurrent requests and tests always see a consistent view.

use crate::constants::{
    DEFAULT_FINISH_DELTA_MINUTES, DEFAULT_REMINDER_OFFSETS_MINUTES, REVIEW_WINDOW_DAYS,
};
use crate::{CoreError, CoreResult};
use chrono::{Duration, FixedOffset, Offset, Utc};

/// Which statuses a patient may cancel from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatientCancelPolicy {
    /// Only `PLANNED` appointments can be cancelled by the patient.
    PlannedOnly,
    /// Both `ON_MODERATION` and `PLANNED` appointments can be cancelled.
    OnModerationAndPlanned,
}

/// Runtime feature toggles.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeatureFlags {
    pub related_patients: bool,
    pub reviews: bool,
    pub remind_planned_appointments: bool,
    pub finish_yesterday_appointments: bool,
    pub finish_ended_appointments: bool,
    pub patient_cancel_policy: PatientCancelPolicy,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            related_patients: true,
            reviews: true,
            remind_planned_appointments: true,
            finish_yesterday_appointments: true,
            finish_ended_appointments: true,
            patient_cancel_policy: PatientCancelPolicy::OnModerationAndPlanned,
        }
    }
}

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct ClinicConfig {
    features: FeatureFlags,
    utc_offset: FixedOffset,
    finish_delta: Duration,
    reminder_offsets: Vec<Duration>,
    review_window: Duration,
    task_lock_ttl: Duration,
    request_timeout: std::time::Duration,
}

impl ClinicConfig {
    /// Create a new `ClinicConfig`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidInput`] when a duration is not positive or no reminder
    /// offset is configured.
    pub fn new(
        features: FeatureFlags,
        utc_offset: FixedOffset,
        finish_delta: Duration,
        reminder_offsets: Vec<Duration>,
        task_lock_ttl: Duration,
        request_timeout: std::time::Duration,
    ) -> CoreResult<Self> {
        if finish_delta < Duration::zero() {
            return Err(CoreError::InvalidInput(
                "finish delta cannot be negative".into(),
            ));
        }
        if reminder_offsets.is_empty() || reminder_offsets.iter().any(|o| *o <= Duration::zero())
        {
            return Err(CoreError::InvalidInput(
                "reminder offsets must be a non-empty list of positive durations".into(),
            ));
        }
        if task_lock_ttl <= Duration::zero() {
            return Err(CoreError::InvalidInput(
                "task lock TTL must be positive".into(),
            ));
        }
        if request_timeout.is_zero() {
            return Err(CoreError::InvalidInput(
                "request timeout must be positive".into(),
            ));
        }

        Ok(Self {
            features,
            utc_offset,
            finish_delta,
            reminder_offsets,
            review_window: Duration::days(REVIEW_WINDOW_DAYS),
            task_lock_ttl,
            request_timeout,
        })
    }

    pub fn features(&self) -> &FeatureFlags {
        &self.features
    }

    /// Replaces the feature flags, keeping everything else.
    pub fn with_features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    pub fn with_utc_offset(mut self, utc_offset: FixedOffset) -> Self {
        self.utc_offset = utc_offset;
        self
    }

    /// Offset of the clinic's local time from UTC; defines "today" and "yesterday".
    pub fn utc_offset(&self) -> FixedOffset {
        self.utc_offset
    }

    pub fn finish_delta(&self) -> Duration {
        self.finish_delta
    }

    pub fn reminder_offsets(&self) -> &[Duration] {
        &self.reminder_offsets
    }

    pub fn review_window(&self) -> Duration {
        self.review_window
    }

    pub fn task_lock_ttl(&self) -> Duration {
        self.task_lock_ttl
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        self.request_timeout
    }

    /// Resolve the configuration from environment-style key lookups.
    ///
    /// `lookup` is usually `|key| std::env::var(key).ok()`; tests pass a map instead. Unset keys
    /// fall back to the defaults of [`ClinicConfig::default`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidInput`] naming the first value that fails to parse or
    /// validate.
    pub fn from_env_lookup(lookup: impl Fn(&str) -> Option<String>) -> CoreResult<Self> {
        let defaults = FeatureFlags::default();
        let features = FeatureFlags {
            related_patients: flag_from_env_value(
                lookup(ENV_FEATURE_RELATED_PATIENTS),
                defaults.related_patients,
            )?,
            reviews: flag_from_env_value(lookup(ENV_FEATURE_REVIEWS), defaults.reviews)?,
            remind_planned_appointments: flag_from_env_value(
                lookup(ENV_FEATURE_REMIND_PLANNED),
                defaults.remind_planned_appointments,
            )?,
            finish_yesterday_appointments: flag_from_env_value(
                lookup(ENV_FEATURE_FINISH_YESTERDAY),
                defaults.finish_yesterday_appointments,
            )?,
            finish_ended_appointments: flag_from_env_value(
                lookup(ENV_FEATURE_FINISH_ENDED),
                defaults.finish_ended_appointments,
            )?,
            patient_cancel_policy: cancel_policy_from_env_value(lookup(ENV_PATIENT_CANCEL_POLICY))?,
        };

        Self::new(
            features,
            utc_offset_from_env_value(lookup(ENV_UTC_OFFSET_MINUTES))?,
            minutes_from_env_value(
                lookup(ENV_FINISH_DELTA_MINUTES),
                DEFAULT_FINISH_DELTA_MINUTES,
            )?,
            minute_list_from_env_value(
                lookup(ENV_REMINDER_OFFSETS_MINUTES),
                &DEFAULT_REMINDER_OFFSETS_MINUTES,
            )?,
            minutes_from_env_value(lookup(ENV_TASK_LOCK_TTL_MINUTES), 10)?,
            seconds_from_env_value(lookup(ENV_REQUEST_TIMEOUT_SECONDS), 10)?,
        )
    }
}

impl Default for ClinicConfig {
    fn default() -> Self {
        Self {
            features: FeatureFlags::default(),
            utc_offset: Utc.fix(),
            finish_delta: Duration::minutes(DEFAULT_FINISH_DELTA_MINUTES),
            reminder_offsets: DEFAULT_REMINDER_OFFSETS_MINUTES
                .iter()
                .map(|m| Duration::minutes(*m))
                .collect(),
            review_window: Duration::days(REVIEW_WINDOW_DAYS),
            task_lock_ttl: Duration::minutes(10),
            request_timeout: std::time::Duration::from_secs(10),
        }
    }
}

// ============================================================================
// ENV VALUE PARSING
// ============================================================================

pub const ENV_FEATURE_RELATED_PATIENTS: &str = "CLINIC_FEATURE_RELATED_PATIENTS";
pub const ENV_FEATURE_REVIEWS: &str = "CLINIC_FEATURE_REVIEWS";
pub const ENV_FEATURE_REMIND_PLANNED: &str = "CLINIC_FEATURE_REMIND_PLANNED_APPOINTMENTS";
pub const ENV_FEATURE_FINISH_YESTERDAY: &str = "CLINIC_FEATURE_FINISH_YESTERDAY_APPOINTMENTS";
pub const ENV_FEATURE_FINISH_ENDED: &str = "CLINIC_FEATURE_FINISH_ENDED_APPOINTMENTS";
pub const ENV_PATIENT_CANCEL_POLICY: &str = "CLINIC_PATIENT_CANCEL_POLICY";
pub const ENV_UTC_OFFSET_MINUTES: &str = "CLINIC_UTC_OFFSET_MINUTES";
pub const ENV_FINISH_DELTA_MINUTES: &str = "CLINIC_FINISH_DELTA_MINUTES";
pub const ENV_REMINDER_OFFSETS_MINUTES: &str = "CLINIC_REMINDER_OFFSETS_MINUTES";
pub const ENV_TASK_LOCK_TTL_MINUTES: &str = "CLINIC_TASK_LOCK_TTL_MINUTES";
pub const ENV_REQUEST_TIMEOUT_SECONDS: &str = "CLINIC_REQUEST_TIMEOUT_SECONDS";

/// Parse a boolean toggle from an optional environment value.
///
/// Accepts `1/0`, `true/false`, `yes/no`, `on/off` (case-insensitive). Missing or blank values
/// yield `default`.
pub fn flag_from_env_value(value: Option<String>, default: bool) -> CoreResult<bool> {
    let Some(value) = value.map(|v| v.trim().to_ascii_lowercase()) else {
        return Ok(default);
    };
    match value.as_str() {
        "" => Ok(default),
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(CoreError::InvalidInput(format!(
            "invalid boolean flag value: {other}"
        ))),
    }
}

/// Parse a whole number of minutes from an optional environment value.
pub fn minutes_from_env_value(value: Option<String>, default: i64) -> CoreResult<Duration> {
    let value = value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    let minutes = value
        .map(|v| {
            v.parse::<i64>()
                .map_err(|_| CoreError::InvalidInput(format!("invalid minutes value: {v}")))
        })
        .transpose()?
        .unwrap_or(default);
    Ok(Duration::minutes(minutes))
}

/// Parse a whole number of seconds into a std duration.
pub fn seconds_from_env_value(
    value: Option<String>,
    default: u64,
) -> CoreResult<std::time::Duration> {
    let seconds = match value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        Some(v) => v
            .parse::<u64>()
            .map_err(|_| CoreError::InvalidInput(format!("invalid seconds value: {v}")))?,
        None => default,
    };
    Ok(std::time::Duration::from_secs(seconds))
}

/// Parse a comma-separated list of minute offsets, e.g. `"120,1440"`.
pub fn minute_list_from_env_value(
    value: Option<String>,
    default: &[i64],
) -> CoreResult<Vec<Duration>> {
    let Some(value) = value.filter(|v| !v.trim().is_empty()) else {
        return Ok(default.iter().map(|m| Duration::minutes(*m)).collect());
    };
    value
        .split(',')
        .map(|part| {
            let part = part.trim();
            part.parse::<i64>()
                .map(Duration::minutes)
                .map_err(|_| CoreError::InvalidInput(format!("invalid minutes value: {part}")))
        })
        .collect()
}

/// Parse the clinic's UTC offset given in minutes east of UTC (e.g. `180` for UTC+3).
pub fn utc_offset_from_env_value(value: Option<String>) -> CoreResult<FixedOffset> {
    let minutes = minutes_from_env_value(value, 0)?.num_minutes();
    let seconds = i32::try_from(minutes * 60)
        .map_err(|_| CoreError::InvalidInput("UTC offset out of range".into()))?;
    FixedOffset::east_opt(seconds)
        .ok_or_else(|| CoreError::InvalidInput(format!("UTC offset out of range: {minutes}")))
}

/// Parse the patient cancel policy: `planned` or `on_moderation_and_planned`.
pub fn cancel_policy_from_env_value(value: Option<String>) -> CoreResult<PatientCancelPolicy> {
    match value
        .map(|v| v.trim().to_ascii_lowercase())
        .as_deref()
        .unwrap_or("")
    {
        "" | "on_moderation_and_planned" => Ok(PatientCancelPolicy::OnModerationAndPlanned),
        "planned" | "planned_only" => Ok(PatientCancelPolicy::PlannedOnly),
        other => Err(CoreError::InvalidInput(format!(
            "unknown patient cancel policy: {other}"
        ))),
    }
}
