//! Common payload types shared across OCPP 1.6J actions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Connector / charge point status as reported in StatusNotification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ChargePointStatus {
    Available,
    Preparing,
    Charging,
    #[serde(rename = "SuspendedEVSE")]
    SuspendedEvse,
    #[serde(rename = "SuspendedEV")]
    SuspendedEv,
    Finishing,
    Reserved,
    Unavailable,
    Faulted,
}

impl std::fmt::Display for ChargePointStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChargePointStatus::Available => "Available",
            ChargePointStatus::Preparing => "Preparing",
            ChargePointStatus::Charging => "Charging",
            ChargePointStatus::SuspendedEvse => "SuspendedEVSE",
            ChargePointStatus::SuspendedEv => "SuspendedEV",
            ChargePointStatus::Finishing => "Finishing",
            ChargePointStatus::Reserved => "Reserved",
            ChargePointStatus::Unavailable => "Unavailable",
            ChargePointStatus::Faulted => "Faulted",
        };
        f.write_str(s)
    }
}

/// Error codes reported in StatusNotification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ChargePointErrorCode {
    ConnectorLockFailure,
    #[serde(rename = "EVCommunicationError")]
    EvCommunicationError,
    GroundFailure,
    HighTemperature,
    InternalError,
    LocalListConflict,
    NoError,
    OtherError,
    OverCurrentFailure,
    OverVoltage,
    PowerMeterFailure,
    PowerSwitchFailure,
    ReaderFailure,
    ResetFailure,
    UnderVoltage,
    WeakSignal,
}

/// Registration outcome of a BootNotification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum RegistrationStatus {
    /// Charge point is accepted by the CSMS
    Accepted,
    /// Not yet accepted; retry after the returned interval
    Pending,
    /// Rejected; retry after the returned interval
    Rejected,
}

/// Authorization status for id tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum AuthorizationStatus {
    Accepted,
    Blocked,
    Expired,
    Invalid,
    ConcurrentTx,
}

/// Authorization data returned by the CSMS
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdTagInfo {
    pub status: AuthorizationStatus,
    #[serde(rename = "parentIdTag", skip_serializing_if = "Option::is_none")]
    pub parent_id_tag: Option<String>,
    #[serde(rename = "expiryDate", skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<DateTime<Utc>>,
}

impl IdTagInfo {
    pub fn accepted() -> Self {
        Self {
            status: AuthorizationStatus::Accepted,
            parent_id_tag: None,
            expiry_date: None,
        }
    }
}

/// Reason for stopping a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum StopReason {
    EmergencyStop,
    #[serde(rename = "EVDisconnected")]
    EvDisconnected,
    HardReset,
    Local,
    Other,
    PowerLoss,
    Reboot,
    Remote,
    SoftReset,
    UnlockCommand,
    DeAuthorized,
}

impl std::str::FromStr for StopReason {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EmergencyStop" => Ok(StopReason::EmergencyStop),
            "EVDisconnected" => Ok(StopReason::EvDisconnected),
            "HardReset" => Ok(StopReason::HardReset),
            "Local" => Ok(StopReason::Local),
            "PowerLoss" => Ok(StopReason::PowerLoss),
            "Reboot" => Ok(StopReason::Reboot),
            "Remote" => Ok(StopReason::Remote),
            "SoftReset" => Ok(StopReason::SoftReset),
            "UnlockCommand" => Ok(StopReason::UnlockCommand),
            "DeAuthorized" => Ok(StopReason::DeAuthorized),
            _ => Ok(StopReason::Other),
        }
    }
}

/// One timestamped batch of sampled meter readings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterValue {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "sampledValue")]
    pub sampled_values: Vec<SampledValue>,
}

/// A single sampled reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampledValue {
    /// Reading rendered as a string, per the 1.6J schema
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measurand: Option<Measurand>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<UnitOfMeasure>,
}

impl SampledValue {
    /// Energy register reading in watt-hours
    pub fn energy_wh(value: i64) -> Self {
        Self {
            value: value.to_string(),
            context: None,
            format: None,
            measurand: Some(Measurand::EnergyActiveImportRegister),
            phase: None,
            location: None,
            unit: Some(UnitOfMeasure::Wh),
        }
    }
}

/// Measurands the simulator emits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Measurand {
    #[serde(rename = "Energy.Active.Import.Register")]
    EnergyActiveImportRegister,
    #[serde(rename = "Power.Active.Import")]
    PowerActiveImport,
    #[serde(rename = "Current.Import")]
    CurrentImport,
    Voltage,
    Temperature,
    SoC,
}

/// Units of measure the simulator emits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitOfMeasure {
    Wh,
    #[serde(rename = "kWh")]
    KWh,
    W,
    #[serde(rename = "kW")]
    KW,
    A,
    V,
    Celsius,
    Percent,
}

/// Configuration key/value pair for GetConfiguration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub readonly: bool,
}

/// Availability change requested by the CSMS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum AvailabilityType {
    Operative,
    Inoperative,
}

/// Outcome of a ChangeAvailability request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum AvailabilityStatus {
    Accepted,
    Rejected,
    Scheduled,
}

/// Outcome of a ChangeConfiguration request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ConfigurationStatus {
    Accepted,
    Rejected,
    RebootRequired,
    NotSupported,
}

/// Outcome of a RemoteStart/RemoteStop request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum RemoteStartStopStatus {
    Accepted,
    Rejected,
}

/// Reset kind requested by the CSMS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ResetType {
    Hard,
    Soft,
}

/// Outcome of a Reset request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ResetStatus {
    Accepted,
    Rejected,
}

/// Outcome of an UnlockConnector request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum UnlockStatus {
    Unlocked,
    UnlockFailed,
    NotSupported,
}

/// Outcome of a DataTransfer request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum DataTransferStatus {
    Accepted,
    Rejected,
    UnknownMessageId,
    UnknownVendorId,
}

/// Message the CSMS asks the charge point to emit via TriggerMessage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum TriggeredMessage {
    BootNotification,
    DiagnosticsStatusNotification,
    FirmwareStatusNotification,
    Heartbeat,
    MeterValues,
    StatusNotification,
}

/// Outcome of a TriggerMessage request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum TriggerMessageStatus {
    Accepted,
    Rejected,
    NotImplemented,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&ChargePointStatus::SuspendedEvse).unwrap(),
            "\"SuspendedEVSE\""
        );
        assert_eq!(
            serde_json::to_string(&ChargePointStatus::SuspendedEv).unwrap(),
            "\"SuspendedEV\""
        );
        assert_eq!(ChargePointStatus::SuspendedEvse.to_string(), "SuspendedEVSE");
    }

    #[test]
    fn test_measurand_wire_name() {
        assert_eq!(
            serde_json::to_string(&Measurand::EnergyActiveImportRegister).unwrap(),
            "\"Energy.Active.Import.Register\""
        );
    }

    #[test]
    fn test_sampled_value_energy() {
        let sv = SampledValue::energy_wh(1500);
        assert_eq!(sv.value, "1500");
        assert_eq!(sv.unit, Some(UnitOfMeasure::Wh));

        let json = serde_json::to_string(&sv).unwrap();
        assert!(!json.contains("phase"));
        assert!(json.contains("Energy.Active.Import.Register"));
    }

    #[test]
    fn test_stop_reason_parse() {
        assert_eq!("Local".parse::<StopReason>().unwrap(), StopReason::Local);
        assert_eq!(
            "EVDisconnected".parse::<StopReason>().unwrap(),
            StopReason::EvDisconnected
        );
        assert_eq!(
            "ChargerShutdown".parse::<StopReason>().unwrap(),
            StopReason::Other
        );
    }

    #[test]
    fn test_id_tag_info_optional_fields() {
        let info = IdTagInfo::accepted();
        let json = serde_json::to_string(&info).unwrap();
        assert!(!json.contains("parentIdTag"));
        assert!(!json.contains("expiryDate"));
    }
}
