//! Inbound call handling for CSMS-initiated actions
//!
//! The charger answers each Call synchronously with the OCPP status, then
//! performs the physical effect (starting a transaction, resetting) in a
//! spawned task so the reply is never delayed by the action itself.

use crate::{ChargerError, ChargerStatus, VirtualCharger};
use fleetsim_client::{CallHandler, CallRejection};
use fleetsim_messages::*;
use fleetsim_types::{CallErrorCode, CallFrame};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

fn decode<T: serde::de::DeserializeOwned>(call: &CallFrame) -> Result<T, CallRejection> {
    call.payload_as().map_err(|e| {
        CallRejection::new(CallErrorCode::FormationViolation, e.to_string())
    })
}

fn encode<T: serde::Serialize>(response: T) -> Result<Value, CallRejection> {
    serde_json::to_value(response)
        .map_err(|e| CallRejection::new(CallErrorCode::InternalError, e.to_string()))
}

#[async_trait::async_trait]
impl CallHandler for VirtualCharger {
    async fn handle_call(&self, call: CallFrame) -> Result<Value, CallRejection> {
        debug!(charger_id = %self.id(), action = %call.action, "handling CSMS call");
        match call.action.as_str() {
            RemoteStartTransactionRequest::ACTION_NAME => self.on_remote_start(&call).await,
            RemoteStopTransactionRequest::ACTION_NAME => self.on_remote_stop(&call).await,
            ResetRequest::ACTION_NAME => self.on_reset(&call).await,
            ChangeAvailabilityRequest::ACTION_NAME => self.on_change_availability(&call).await,
            ChangeConfigurationRequest::ACTION_NAME => self.on_change_configuration(&call).await,
            GetConfigurationRequest::ACTION_NAME => self.on_get_configuration(&call).await,
            UnlockConnectorRequest::ACTION_NAME => self.on_unlock_connector(&call).await,
            TriggerMessageRequest::ACTION_NAME => self.on_trigger_message(&call).await,
            other => Err(CallRejection::new(
                CallErrorCode::NotImplemented,
                format!("action {other} not implemented"),
            )),
        }
    }
}

impl VirtualCharger {
    /// Run an action after the reply has been written, if the charger is
    /// still alive by then
    fn spawn_op<F, Fut>(&self, op: F)
    where
        F: FnOnce(Arc<VirtualCharger>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let weak = self.weak_self.clone();
        tokio::spawn(async move {
            if let Some(this) = weak.upgrade() {
                op(this).await;
            }
        });
    }

    async fn on_remote_start(&self, call: &CallFrame) -> Result<Value, CallRejection> {
        let request: RemoteStartTransactionRequest = decode(call)?;

        let connector_id = {
            let state = self.state.read().await;
            match request.connector_id {
                Some(id) => id,
                None => state
                    .connectors
                    .iter()
                    .find(|c| c.is_available())
                    .map(|c| c.id)
                    .unwrap_or(0),
            }
        };

        let acceptable = {
            let state = self.state.read().await;
            state.status == ChargerStatus::Connected
                && connector_id >= 1
                && connector_id <= state.connectors.len() as u32
                && state.connectors[(connector_id - 1) as usize].is_available()
        };

        if !acceptable {
            return encode(RemoteStartTransactionResponse {
                status: RemoteStartStopStatus::Rejected,
            });
        }

        let id_tag = request.id_tag.clone();
        info!(charger_id = %self.id(), connector_id, id_tag = %id_tag, "remote start accepted");
        self.spawn_op(move |this| async move {
            // let the acknowledgement hit the wire before the transaction
            tokio::time::sleep(Duration::from_millis(100)).await;
            if let Err(err) = this.start_transaction(connector_id, &id_tag).await {
                error!(charger_id = %this.id(), error = %err, "remote start failed");
            }
        });

        encode(RemoteStartTransactionResponse {
            status: RemoteStartStopStatus::Accepted,
        })
    }

    async fn on_remote_stop(&self, call: &CallFrame) -> Result<Value, CallRejection> {
        let request: RemoteStopTransactionRequest = decode(call)?;

        let local_id = {
            let state = self.state.read().await;
            state
                .transactions
                .values()
                .find(|tx| tx.is_active() && tx.csms_id == Some(request.transaction_id))
                .map(|tx| tx.local_id)
        };

        match local_id {
            Some(local_id) => {
                info!(charger_id = %self.id(), transaction = local_id, "remote stop accepted");
                self.spawn_op(move |this| async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    if let Err(err) = this.stop_transaction(local_id, "Remote").await {
                        error!(charger_id = %this.id(), error = %err, "remote stop failed");
                    }
                });
                encode(RemoteStopTransactionResponse {
                    status: RemoteStartStopStatus::Accepted,
                })
            }
            None => encode(RemoteStopTransactionResponse {
                status: RemoteStartStopStatus::Rejected,
            }),
        }
    }

    async fn on_reset(&self, call: &CallFrame) -> Result<Value, CallRejection> {
        let request: ResetRequest = decode(call)?;
        info!(charger_id = %self.id(), reset = ?request.reset_type, "reset requested");

        self.spawn_op(move |this| async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            match request.reset_type {
                ResetType::Hard => this.reset_hard().await,
                ResetType::Soft => this.reset_soft().await,
            }
        });

        encode(ResetResponse {
            status: ResetStatus::Accepted,
        })
    }

    async fn on_change_availability(&self, call: &CallFrame) -> Result<Value, CallRejection> {
        let request: ChangeAvailabilityRequest = decode(call)?;

        let mut scheduled = false;
        {
            let mut state = self.state.write().await;
            let targets: Vec<u32> = if request.connector_id == 0 {
                (1..=state.connectors.len() as u32).collect()
            } else if request.connector_id <= state.connectors.len() as u32 {
                vec![request.connector_id]
            } else {
                return encode(ChangeAvailabilityResponse {
                    status: AvailabilityStatus::Rejected,
                });
            };

            for id in targets {
                let connector = match state.connector_mut(id) {
                    Ok(c) => c,
                    Err(_) => continue,
                };
                match request.availability_type {
                    AvailabilityType::Inoperative => {
                        // a connector mid-transaction changes once it frees up
                        if connector.is_in_transaction() {
                            scheduled = true;
                        } else {
                            connector.set_status(ChargePointStatus::Unavailable);
                        }
                    }
                    AvailabilityType::Operative => {
                        if connector.status == ChargePointStatus::Unavailable {
                            connector.set_status(ChargePointStatus::Available);
                        }
                    }
                }
            }
        }

        encode(ChangeAvailabilityResponse {
            status: if scheduled {
                AvailabilityStatus::Scheduled
            } else {
                AvailabilityStatus::Accepted
            },
        })
    }

    async fn on_change_configuration(&self, call: &CallFrame) -> Result<Value, CallRejection> {
        let request: ChangeConfigurationRequest = decode(call)?;

        if request.key == "HeartbeatInterval" {
            if let Ok(secs) = request.value.parse::<u64>() {
                let mut state = self.state.write().await;
                state.heartbeat_interval = Duration::from_secs(secs.max(1));
            }
        }
        self.set_configuration_key(request.key, request.value).await;

        encode(ChangeConfigurationResponse {
            status: ConfigurationStatus::Accepted,
        })
    }

    async fn on_get_configuration(&self, call: &CallFrame) -> Result<Value, CallRejection> {
        let request: GetConfigurationRequest = decode(call)?;
        let known = self.configuration_snapshot().await;

        let (keys, unknown) = match request.key {
            None => (
                known
                    .iter()
                    .map(|(k, v)| KeyValue {
                        key: k.clone(),
                        value: Some(v.clone()),
                        readonly: false,
                    })
                    .collect::<Vec<_>>(),
                Vec::new(),
            ),
            Some(requested) => {
                let mut keys = Vec::new();
                let mut unknown = Vec::new();
                for key in requested {
                    match known.get(&key) {
                        Some(value) => keys.push(KeyValue {
                            key,
                            value: Some(value.clone()),
                            readonly: false,
                        }),
                        None => unknown.push(key),
                    }
                }
                (keys, unknown)
            }
        };

        encode(GetConfigurationResponse {
            configuration_key: Some(keys),
            unknown_key: if unknown.is_empty() {
                None
            } else {
                Some(unknown)
            },
        })
    }

    async fn on_unlock_connector(&self, call: &CallFrame) -> Result<Value, CallRejection> {
        let request: UnlockConnectorRequest = decode(call)?;

        let (valid, active_tx) = {
            let state = self.state.read().await;
            let valid =
                request.connector_id >= 1 && request.connector_id <= state.connectors.len() as u32;
            let active_tx = state
                .transactions
                .values()
                .find(|tx| tx.is_active() && tx.connector_id == request.connector_id)
                .map(|tx| tx.local_id);
            (valid, active_tx)
        };

        if !valid {
            return encode(UnlockConnectorResponse {
                status: UnlockStatus::UnlockFailed,
            });
        }

        if let Some(local_id) = active_tx {
            self.spawn_op(move |this| async move {
                if let Err(err) = this.stop_transaction(local_id, "UnlockCommand").await {
                    error!(charger_id = %this.id(), error = %err, "stop on unlock failed");
                }
            });
        }

        encode(UnlockConnectorResponse {
            status: UnlockStatus::Unlocked,
        })
    }

    async fn on_trigger_message(&self, call: &CallFrame) -> Result<Value, CallRejection> {
        let request: TriggerMessageRequest = decode(call)?;

        let status = match request.requested_message {
            TriggeredMessage::Heartbeat => {
                self.spawn_op(|this| async move {
                    if let Err(err) = this.send_heartbeat().await {
                        error!(charger_id = %this.id(), error = %err, "triggered heartbeat failed");
                    }
                });
                TriggerMessageStatus::Accepted
            }
            TriggeredMessage::StatusNotification => {
                let connector_id = request.connector_id;
                self.spawn_op(move |this| async move {
                    let result = match connector_id {
                        Some(id) => {
                            let status = {
                                let state = this.state.read().await;
                                state
                                    .connectors
                                    .get((id.max(1) - 1) as usize)
                                    .map(|c| c.status)
                            };
                            match status {
                                Some(status) => this.send_status_notification(id, status).await,
                                None => Err(ChargerError::InvalidConnector(id)),
                            }
                        }
                        None => this.send_status_notifications().await,
                    };
                    if let Err(err) = result {
                        error!(charger_id = %this.id(), error = %err, "triggered status notification failed");
                    }
                });
                TriggerMessageStatus::Accepted
            }
            TriggeredMessage::BootNotification => {
                self.spawn_op(|this| async move {
                    if let Err(err) = this.send_boot_notification().await {
                        error!(charger_id = %this.id(), error = %err, "triggered boot notification failed");
                    }
                });
                TriggerMessageStatus::Accepted
            }
            TriggeredMessage::MeterValues => {
                match self.latest_active_transaction().await {
                    Some(local_id) => {
                        self.spawn_op(move |this| async move {
                            let meter = {
                                match this.transaction(local_id).await {
                                    Some(tx) => tx.meter_start + tx.energy_wh,
                                    None => return,
                                }
                            };
                            if let Err(err) = this.send_meter_values(local_id, meter).await {
                                error!(charger_id = %this.id(), error = %err, "triggered meter values failed");
                            }
                        });
                        TriggerMessageStatus::Accepted
                    }
                    None => TriggerMessageStatus::Rejected,
                }
            }
            TriggeredMessage::DiagnosticsStatusNotification
            | TriggeredMessage::FirmwareStatusNotification => TriggerMessageStatus::NotImplemented,
        };

        encode(TriggerMessageResponse { status })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChargerConfig;
    use fleetsim_events::EventBus;
    use serde_json::json;

    fn offline_charger() -> Arc<VirtualCharger> {
        let bus = Arc::new(EventBus::new());
        VirtualCharger::new(
            ChargerConfig::new("CP001", "ws://localhost:9999/ocpp", 2),
            bus,
        )
        .unwrap()
    }

    fn call(action: &str, payload: Value) -> CallFrame {
        CallFrame {
            message_id: "m1".into(),
            action: action.into(),
            payload,
        }
    }

    #[tokio::test]
    async fn test_unknown_action_is_not_implemented() {
        let charger = offline_charger();
        let err = charger
            .handle_call(call("CancelReservation", json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.code, CallErrorCode::NotImplemented);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_formation_violation() {
        let charger = offline_charger();
        let err = charger
            .handle_call(call("Reset", json!({"type": 42})))
            .await
            .unwrap_err();
        assert_eq!(err.code, CallErrorCode::FormationViolation);
    }

    #[tokio::test]
    async fn test_remote_start_rejected_while_offline() {
        let charger = offline_charger();
        let reply = charger
            .handle_call(call(
                "RemoteStartTransaction",
                json!({"connectorId": 1, "idTag": "U1"}),
            ))
            .await
            .unwrap();
        assert_eq!(reply["status"], "Rejected");
    }

    #[tokio::test]
    async fn test_remote_stop_unknown_transaction_rejected() {
        let charger = offline_charger();
        let reply = charger
            .handle_call(call("RemoteStopTransaction", json!({"transactionId": 42})))
            .await
            .unwrap();
        assert_eq!(reply["status"], "Rejected");
    }

    #[tokio::test]
    async fn test_change_and_get_configuration() {
        let charger = offline_charger();

        let reply = charger
            .handle_call(call(
                "ChangeConfiguration",
                json!({"key": "MeterValueSampleInterval", "value": "60"}),
            ))
            .await
            .unwrap();
        assert_eq!(reply["status"], "Accepted");

        let reply = charger
            .handle_call(call(
                "GetConfiguration",
                json!({"key": ["MeterValueSampleInterval", "NoSuchKey"]}),
            ))
            .await
            .unwrap();
        let keys = reply["configurationKey"].as_array().unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0]["key"], "MeterValueSampleInterval");
        assert_eq!(keys[0]["value"], "60");
        assert_eq!(reply["unknownKey"][0], "NoSuchKey");
    }

    #[tokio::test]
    async fn test_change_configuration_adopts_heartbeat_interval() {
        let charger = offline_charger();
        charger
            .handle_call(call(
                "ChangeConfiguration",
                json!({"key": "HeartbeatInterval", "value": "120"}),
            ))
            .await
            .unwrap();
        assert_eq!(
            charger.heartbeat_interval().await,
            Duration::from_secs(120)
        );
    }

    #[tokio::test]
    async fn test_change_availability() {
        let charger = offline_charger();

        let reply = charger
            .handle_call(call(
                "ChangeAvailability",
                json!({"connectorId": 0, "type": "Inoperative"}),
            ))
            .await
            .unwrap();
        assert_eq!(reply["status"], "Accepted");
        assert!(charger
            .connectors()
            .await
            .iter()
            .all(|c| c.status == ChargePointStatus::Unavailable));

        let reply = charger
            .handle_call(call(
                "ChangeAvailability",
                json!({"connectorId": 1, "type": "Operative"}),
            ))
            .await
            .unwrap();
        assert_eq!(reply["status"], "Accepted");
        assert_eq!(
            charger.connectors().await[0].status,
            ChargePointStatus::Available
        );

        let reply = charger
            .handle_call(call(
                "ChangeAvailability",
                json!({"connectorId": 9, "type": "Operative"}),
            ))
            .await
            .unwrap();
        assert_eq!(reply["status"], "Rejected");
    }

    #[tokio::test]
    async fn test_unlock_connector() {
        let charger = offline_charger();

        let reply = charger
            .handle_call(call("UnlockConnector", json!({"connectorId": 1})))
            .await
            .unwrap();
        assert_eq!(reply["status"], "Unlocked");

        let reply = charger
            .handle_call(call("UnlockConnector", json!({"connectorId": 7})))
            .await
            .unwrap();
        assert_eq!(reply["status"], "UnlockFailed");
    }

    #[tokio::test]
    async fn test_trigger_meter_values_without_transaction_rejected() {
        let charger = offline_charger();
        let reply = charger
            .handle_call(call(
                "TriggerMessage",
                json!({"requestedMessage": "MeterValues"}),
            ))
            .await
            .unwrap();
        assert_eq!(reply["status"], "Rejected");
    }
}
