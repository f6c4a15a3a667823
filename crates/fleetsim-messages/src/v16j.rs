//! OCPP 1.6J action payloads
//!
//! Charge point initiated actions first, then the CSMS-initiated remote
//! control actions the simulator answers. Field names follow the 1.6J JSON
//! schema; constructors fill the required fields.

use crate::types::*;
use crate::validation::{non_empty, non_negative, ValidationError};
use crate::OcppAction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Charge point -> CSMS
// =============================================================================

/// BootNotification request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootNotificationRequest {
    #[serde(rename = "chargePointVendor")]
    pub charge_point_vendor: String,
    #[serde(rename = "chargePointModel")]
    pub charge_point_model: String,
    #[serde(
        rename = "chargePointSerialNumber",
        skip_serializing_if = "Option::is_none"
    )]
    pub charge_point_serial_number: Option<String>,
    #[serde(
        rename = "chargeBoxSerialNumber",
        skip_serializing_if = "Option::is_none"
    )]
    pub charge_box_serial_number: Option<String>,
    #[serde(rename = "firmwareVersion", skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iccid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imsi: Option<String>,
    #[serde(rename = "meterType", skip_serializing_if = "Option::is_none")]
    pub meter_type: Option<String>,
    #[serde(rename = "meterSerialNumber", skip_serializing_if = "Option::is_none")]
    pub meter_serial_number: Option<String>,
}

impl BootNotificationRequest {
    pub fn new(vendor: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            charge_point_vendor: vendor.into(),
            charge_point_model: model.into(),
            charge_point_serial_number: None,
            charge_box_serial_number: None,
            firmware_version: None,
            iccid: None,
            imsi: None,
            meter_type: None,
            meter_serial_number: None,
        }
    }

    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.charge_point_serial_number = Some(serial.into());
        self
    }
}

impl OcppAction for BootNotificationRequest {
    const ACTION_NAME: &'static str = "BootNotification";
    type Response = BootNotificationResponse;

    fn validate(&self) -> Result<(), ValidationError> {
        non_empty("chargePointVendor", &self.charge_point_vendor)?;
        non_empty("chargePointModel", &self.charge_point_model)
    }
}

/// BootNotification response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootNotificationResponse {
    #[serde(rename = "currentTime")]
    pub current_time: DateTime<Utc>,
    /// Heartbeat interval in seconds
    pub interval: i32,
    pub status: RegistrationStatus,
}

/// Heartbeat request (empty payload)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatRequest {}

impl OcppAction for HeartbeatRequest {
    const ACTION_NAME: &'static str = "Heartbeat";
    type Response = HeartbeatResponse;
}

/// Heartbeat response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    #[serde(rename = "currentTime")]
    pub current_time: DateTime<Utc>,
}

/// StatusNotification request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusNotificationRequest {
    /// 0 reports station-level status, 1..N a connector
    #[serde(rename = "connectorId")]
    pub connector_id: u32,
    #[serde(rename = "errorCode")]
    pub error_code: ChargePointErrorCode,
    pub status: ChargePointStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "vendorId", skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<String>,
    #[serde(rename = "vendorErrorCode", skip_serializing_if = "Option::is_none")]
    pub vendor_error_code: Option<String>,
}

impl StatusNotificationRequest {
    pub fn new(connector_id: u32, status: ChargePointStatus) -> Self {
        Self {
            connector_id,
            error_code: ChargePointErrorCode::NoError,
            status,
            info: None,
            timestamp: Some(Utc::now()),
            vendor_id: None,
            vendor_error_code: None,
        }
    }
}

impl OcppAction for StatusNotificationRequest {
    const ACTION_NAME: &'static str = "StatusNotification";
    type Response = StatusNotificationResponse;
}

/// StatusNotification response (empty payload)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusNotificationResponse {}

/// MeterValues request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterValuesRequest {
    #[serde(rename = "connectorId")]
    pub connector_id: u32,
    #[serde(rename = "transactionId", skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<i32>,
    #[serde(rename = "meterValue")]
    pub meter_values: Vec<MeterValue>,
}

impl MeterValuesRequest {
    /// Single energy register sample referencing a transaction
    pub fn energy_sample(connector_id: u32, transaction_id: i32, meter_wh: i64) -> Self {
        Self {
            connector_id,
            transaction_id: Some(transaction_id),
            meter_values: vec![MeterValue {
                timestamp: Utc::now(),
                sampled_values: vec![SampledValue::energy_wh(meter_wh)],
            }],
        }
    }
}

impl OcppAction for MeterValuesRequest {
    const ACTION_NAME: &'static str = "MeterValues";
    type Response = MeterValuesResponse;

    fn validate(&self) -> Result<(), ValidationError> {
        if self.meter_values.is_empty() {
            return Err(ValidationError::new("meterValue", "must not be empty"));
        }
        for mv in &self.meter_values {
            for sv in &mv.sampled_values {
                if let Ok(value) = sv.value.parse::<i64>() {
                    non_negative("sampledValue.value", value)?;
                }
            }
        }
        Ok(())
    }
}

/// MeterValues response (empty payload)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeterValuesResponse {}

/// StartTransaction request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartTransactionRequest {
    #[serde(rename = "connectorId")]
    pub connector_id: u32,
    #[serde(rename = "idTag")]
    pub id_tag: String,
    /// Meter reading at transaction start, in Wh
    #[serde(rename = "meterStart")]
    pub meter_start: i64,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "reservationId", skip_serializing_if = "Option::is_none")]
    pub reservation_id: Option<i32>,
}

impl StartTransactionRequest {
    pub fn new(connector_id: u32, id_tag: impl Into<String>, meter_start: i64) -> Self {
        Self {
            connector_id,
            id_tag: id_tag.into(),
            meter_start,
            timestamp: Utc::now(),
            reservation_id: None,
        }
    }
}

impl OcppAction for StartTransactionRequest {
    const ACTION_NAME: &'static str = "StartTransaction";
    type Response = StartTransactionResponse;

    fn validate(&self) -> Result<(), ValidationError> {
        non_empty("idTag", &self.id_tag)?;
        non_negative("meterStart", self.meter_start)?;
        if self.connector_id == 0 {
            return Err(ValidationError::new("connectorId", "must be >= 1"));
        }
        Ok(())
    }
}

/// StartTransaction response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartTransactionResponse {
    #[serde(rename = "idTagInfo")]
    pub id_tag_info: IdTagInfo,
    /// CSMS-assigned transaction id
    #[serde(rename = "transactionId")]
    pub transaction_id: i32,
}

/// StopTransaction request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopTransactionRequest {
    #[serde(rename = "transactionId")]
    pub transaction_id: i32,
    /// Meter reading at transaction end, in Wh
    #[serde(rename = "meterStop")]
    pub meter_stop: i64,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "idTag", skip_serializing_if = "Option::is_none")]
    pub id_tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<StopReason>,
    #[serde(rename = "transactionData", skip_serializing_if = "Option::is_none")]
    pub transaction_data: Option<Vec<MeterValue>>,
}

impl StopTransactionRequest {
    pub fn new(transaction_id: i32, meter_stop: i64, reason: StopReason) -> Self {
        Self {
            transaction_id,
            meter_stop,
            timestamp: Utc::now(),
            id_tag: None,
            reason: Some(reason),
            transaction_data: None,
        }
    }
}

impl OcppAction for StopTransactionRequest {
    const ACTION_NAME: &'static str = "StopTransaction";
    type Response = StopTransactionResponse;

    fn validate(&self) -> Result<(), ValidationError> {
        non_negative("meterStop", self.meter_stop)
    }
}

/// StopTransaction response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StopTransactionResponse {
    #[serde(rename = "idTagInfo", skip_serializing_if = "Option::is_none")]
    pub id_tag_info: Option<IdTagInfo>,
}

/// Authorize request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizeRequest {
    #[serde(rename = "idTag")]
    pub id_tag: String,
}

impl AuthorizeRequest {
    pub fn new(id_tag: impl Into<String>) -> Self {
        Self {
            id_tag: id_tag.into(),
        }
    }
}

impl OcppAction for AuthorizeRequest {
    const ACTION_NAME: &'static str = "Authorize";
    type Response = AuthorizeResponse;

    fn validate(&self) -> Result<(), ValidationError> {
        non_empty("idTag", &self.id_tag)
    }
}

/// Authorize response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizeResponse {
    #[serde(rename = "idTagInfo")]
    pub id_tag_info: IdTagInfo,
}

/// DataTransfer request (either direction)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataTransferRequest {
    #[serde(rename = "vendorId")]
    pub vendor_id: String,
    #[serde(rename = "messageId", skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl DataTransferRequest {
    pub fn new(vendor_id: impl Into<String>) -> Self {
        Self {
            vendor_id: vendor_id.into(),
            message_id: None,
            data: None,
        }
    }
}

impl OcppAction for DataTransferRequest {
    const ACTION_NAME: &'static str = "DataTransfer";
    type Response = DataTransferResponse;

    fn validate(&self) -> Result<(), ValidationError> {
        non_empty("vendorId", &self.vendor_id)
    }
}

/// DataTransfer response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataTransferResponse {
    pub status: DataTransferStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

// =============================================================================
// CSMS -> charge point
// =============================================================================

/// RemoteStartTransaction request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteStartTransactionRequest {
    #[serde(rename = "idTag")]
    pub id_tag: String,
    #[serde(rename = "connectorId", skip_serializing_if = "Option::is_none")]
    pub connector_id: Option<u32>,
    /// Charging profile passthrough; the simulator does not act on it
    #[serde(rename = "chargingProfile", skip_serializing_if = "Option::is_none")]
    pub charging_profile: Option<serde_json::Value>,
}

impl OcppAction for RemoteStartTransactionRequest {
    const ACTION_NAME: &'static str = "RemoteStartTransaction";
    type Response = RemoteStartTransactionResponse;
}

/// RemoteStartTransaction response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteStartTransactionResponse {
    pub status: RemoteStartStopStatus,
}

/// RemoteStopTransaction request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteStopTransactionRequest {
    #[serde(rename = "transactionId")]
    pub transaction_id: i32,
}

impl OcppAction for RemoteStopTransactionRequest {
    const ACTION_NAME: &'static str = "RemoteStopTransaction";
    type Response = RemoteStopTransactionResponse;
}

/// RemoteStopTransaction response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteStopTransactionResponse {
    pub status: RemoteStartStopStatus,
}

/// Reset request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResetRequest {
    #[serde(rename = "type")]
    pub reset_type: ResetType,
}

impl OcppAction for ResetRequest {
    const ACTION_NAME: &'static str = "Reset";
    type Response = ResetResponse;
}

/// Reset response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResetResponse {
    pub status: ResetStatus,
}

/// ChangeAvailability request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeAvailabilityRequest {
    /// 0 addresses the whole charge point
    #[serde(rename = "connectorId")]
    pub connector_id: u32,
    #[serde(rename = "type")]
    pub availability_type: AvailabilityType,
}

impl OcppAction for ChangeAvailabilityRequest {
    const ACTION_NAME: &'static str = "ChangeAvailability";
    type Response = ChangeAvailabilityResponse;
}

/// ChangeAvailability response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeAvailabilityResponse {
    pub status: AvailabilityStatus,
}

/// ChangeConfiguration request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeConfigurationRequest {
    pub key: String,
    pub value: String,
}

impl OcppAction for ChangeConfigurationRequest {
    const ACTION_NAME: &'static str = "ChangeConfiguration";
    type Response = ChangeConfigurationResponse;

    fn validate(&self) -> Result<(), ValidationError> {
        non_empty("key", &self.key)
    }
}

/// ChangeConfiguration response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeConfigurationResponse {
    pub status: ConfigurationStatus,
}

/// GetConfiguration request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetConfigurationRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<Vec<String>>,
}

impl OcppAction for GetConfigurationRequest {
    const ACTION_NAME: &'static str = "GetConfiguration";
    type Response = GetConfigurationResponse;
}

/// GetConfiguration response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetConfigurationResponse {
    #[serde(rename = "configurationKey", skip_serializing_if = "Option::is_none")]
    pub configuration_key: Option<Vec<KeyValue>>,
    #[serde(rename = "unknownKey", skip_serializing_if = "Option::is_none")]
    pub unknown_key: Option<Vec<String>>,
}

/// UnlockConnector request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnlockConnectorRequest {
    #[serde(rename = "connectorId")]
    pub connector_id: u32,
}

impl OcppAction for UnlockConnectorRequest {
    const ACTION_NAME: &'static str = "UnlockConnector";
    type Response = UnlockConnectorResponse;
}

/// UnlockConnector response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnlockConnectorResponse {
    pub status: UnlockStatus,
}

/// TriggerMessage request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerMessageRequest {
    #[serde(rename = "requestedMessage")]
    pub requested_message: TriggeredMessage,
    #[serde(rename = "connectorId", skip_serializing_if = "Option::is_none")]
    pub connector_id: Option<u32>,
}

impl OcppAction for TriggerMessageRequest {
    const ACTION_NAME: &'static str = "TriggerMessage";
    type Response = TriggerMessageResponse;
}

/// TriggerMessage response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerMessageResponse {
    pub status: TriggerMessageStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boot_notification_omits_empty_optionals() {
        let request = BootNotificationRequest::new("VoltSim", "VS-1000");
        let json = serde_json::to_string(&request).unwrap();

        assert!(json.contains("chargePointVendor"));
        assert!(json.contains("chargePointModel"));
        assert!(!json.contains("chargePointSerialNumber"));
        assert!(!json.contains("iccid"));

        let with_serial = request.with_serial("SN000001");
        let json = serde_json::to_string(&with_serial).unwrap();
        assert!(json.contains("SN000001"));
    }

    #[test]
    fn test_boot_notification_validation() {
        let request = BootNotificationRequest::new("", "VS-1000");
        assert!(request.validate().is_err());

        let request = BootNotificationRequest::new("VoltSim", "VS-1000");
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_start_transaction_round_trip() {
        let request = StartTransactionRequest::new(1, "USER1", 0);
        let json = serde_json::to_string(&request).unwrap();
        let decoded: StartTransactionRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, request);
        assert!(json.contains("\"connectorId\":1"));
        assert!(json.contains("\"meterStart\":0"));
    }

    #[test]
    fn test_start_transaction_validation() {
        assert!(StartTransactionRequest::new(0, "USER1", 0).validate().is_err());
        assert!(StartTransactionRequest::new(1, "", 0).validate().is_err());
        let mut req = StartTransactionRequest::new(1, "USER1", 0);
        req.meter_start = -1;
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_start_transaction_response_decode() {
        let json = r#"{"idTagInfo":{"status":"Accepted"},"transactionId":42}"#;
        let response: StartTransactionResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.transaction_id, 42);
        assert_eq!(response.id_tag_info.status, AuthorizationStatus::Accepted);
    }

    #[test]
    fn test_stop_transaction_reason_on_wire() {
        let request = StopTransactionRequest::new(42, 5000, StopReason::Local);
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"reason\":\"Local\""));
    }

    #[test]
    fn test_meter_values_sample() {
        let request = MeterValuesRequest::energy_sample(1, 42, 1500);
        assert!(request.validate().is_ok());
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"transactionId\":42"));
        assert!(json.contains("\"value\":\"1500\""));

        let empty = MeterValuesRequest {
            connector_id: 1,
            transaction_id: None,
            meter_values: vec![],
        };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_remote_start_decode() {
        let json = r#"{"connectorId":1,"idTag":"U1"}"#;
        let request: RemoteStartTransactionRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.connector_id, Some(1));
        assert_eq!(request.id_tag, "U1");
    }

    #[test]
    fn test_reset_type_wire_name() {
        let request = ResetRequest {
            reset_type: ResetType::Hard,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(json, r#"{"type":"Hard"}"#);
    }

    #[test]
    fn test_action_names() {
        assert_eq!(BootNotificationRequest::ACTION_NAME, "BootNotification");
        assert_eq!(HeartbeatRequest::ACTION_NAME, "Heartbeat");
        assert_eq!(StatusNotificationRequest::ACTION_NAME, "StatusNotification");
        assert_eq!(MeterValuesRequest::ACTION_NAME, "MeterValues");
        assert_eq!(StartTransactionRequest::ACTION_NAME, "StartTransaction");
        assert_eq!(StopTransactionRequest::ACTION_NAME, "StopTransaction");
        assert_eq!(AuthorizeRequest::ACTION_NAME, "Authorize");
        assert_eq!(DataTransferRequest::ACTION_NAME, "DataTransfer");
        assert_eq!(
            RemoteStartTransactionRequest::ACTION_NAME,
            "RemoteStartTransaction"
        );
        assert_eq!(TriggerMessageRequest::ACTION_NAME, "TriggerMessage");
    }
}
