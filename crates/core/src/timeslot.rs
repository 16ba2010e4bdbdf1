//! Doctor availability windows.

use crate::interval::Interval;
use crate::CoreResult;
use chrono::{DateTime, Duration, Utc};
use clinic_types::{DoctorId, SubsidiaryId, TimeSlotId};
use serde::{Deserialize, Serialize};

/// Identifies a slot in the external MIS: `{timeslot_id: int}`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlotIntegrationData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeslot_id: Option<i64>,
}

impl TimeSlotIntegrationData {
    /// Decodes the opaque storage blob.
    pub fn from_blob(blob: &[u8]) -> CoreResult<Self> {
        if blob.is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_slice(blob)?)
    }

    pub fn to_blob(&self) -> CoreResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// An availability window of one doctor at one subsidiary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub id: TimeSlotId,
    pub doctor: DoctorId,
    pub subsidiary: SubsidiaryId,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub is_available: bool,
    #[serde(default)]
    pub integration_data: TimeSlotIntegrationData,
}

impl TimeSlot {
    pub fn interval(&self) -> Interval {
        Interval::new(self.start, self.end)
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}
