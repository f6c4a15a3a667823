//! Transaction lifecycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transaction status; transitions only Active -> Completed or Active -> Failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Active,
    Completed,
    Failed,
}

/// A charging session on one connector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Charger-local id, strictly increasing per charger
    pub local_id: i32,
    /// CSMS-assigned id from the StartTransaction response
    pub csms_id: Option<i32>,
    pub connector_id: u32,
    pub id_tag: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Meter reading at start, Wh
    pub meter_start: i64,
    /// Meter reading at stop, Wh
    pub meter_stop: Option<i64>,
    /// Energy accumulated so far by the charging simulation, Wh
    pub energy_wh: i64,
    pub reason: Option<String>,
    pub status: TransactionStatus,
}

impl Transaction {
    pub fn new(local_id: i32, connector_id: u32, id_tag: impl Into<String>, meter_start: i64) -> Self {
        Self {
            local_id,
            csms_id: None,
            connector_id,
            id_tag: id_tag.into(),
            start_time: Utc::now(),
            end_time: None,
            meter_start,
            meter_stop: None,
            energy_wh: 0,
            reason: None,
            status: TransactionStatus::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == TransactionStatus::Active
    }

    pub fn complete(&mut self, meter_stop: i64, reason: impl Into<String>) {
        self.end_time = Some(Utc::now());
        self.meter_stop = Some(meter_stop);
        self.reason = Some(reason.into());
        self.status = TransactionStatus::Completed;
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.end_time = Some(Utc::now());
        self.reason = Some(reason.into());
        self.status = TransactionStatus::Failed;
    }
}
