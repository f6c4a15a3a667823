//! Named chaos strategies
//!
//! Each strategy is a concrete fault applied to a set of chargers.
//! Chaos-induced errors are first-class: strategies log failures and
//! return normally wherever the fault itself is the point.

use crate::EngineError;
use fleetsim_charger::VirtualCharger;
use fleetsim_events::{topics, Event, EventBus};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Apply a named strategy to the resolved targets
pub async fn inject(
    strategy: &str,
    targets: &[Arc<VirtualCharger>],
    params: &HashMap<String, Value>,
    bus: &Arc<EventBus>,
) -> Result<(), EngineError> {
    info!(strategy, targets = targets.len(), "injecting chaos");

    match strategy {
        "drop_connection" => drop_connection(targets).await,
        "delay_messages" => delay_messages(targets, params).await,
        "malformed_payload" => malformed_payload(targets).await,
        "flood" => flood(targets, params).await,
        "partial_outage" => partial_outage(targets, params).await,
        other => return Err(EngineError::UnknownStrategy(other.to_string())),
    }

    let ids: Vec<&str> = targets.iter().map(|c| c.id()).collect();
    bus.publish(Event::new(
        topics::CHAOS_INJECTED,
        json!({ "strategy": strategy, "targets": ids }),
    ))
    .await;
    Ok(())
}

fn param_u64(params: &HashMap<String, Value>, key: &str, default: u64) -> u64 {
    params.get(key).and_then(Value::as_u64).unwrap_or(default)
}

fn param_f64(params: &HashMap<String, Value>, key: &str, default: f64) -> f64 {
    params.get(key).and_then(Value::as_f64).unwrap_or(default)
}

/// Close every target's socket abruptly, no close frame
async fn drop_connection(targets: &[Arc<VirtualCharger>]) {
    for charger in targets {
        charger.client().abort().await;
    }
}

/// Add latency to the write path for a window
async fn delay_messages(targets: &[Arc<VirtualCharger>], params: &HashMap<String, Value>) {
    let delay = Duration::from_millis(param_u64(params, "delay_ms", 500));
    let window = Duration::from_secs(param_u64(params, "window_secs", 10));

    for charger in targets {
        charger.client().set_write_delay(Some(delay));

        let client = charger.client().clone();
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            client.set_write_delay(None);
        });
    }
}

/// Send a Call whose payload violates the action schema (wrong field types)
async fn malformed_payload(targets: &[Arc<VirtualCharger>]) {
    for charger in targets {
        let frame = format!(
            r#"[2,"{}","BootNotification",{{"chargePointVendor":42,"chargePointModel":true}}]"#,
            Uuid::new_v4()
        );
        if let Err(err) = charger.client().send_raw(frame).await {
            warn!(charger_id = %charger.id(), error = %err, "malformed payload not sent");
        }
    }
}

/// Heartbeats at 100x the charger's normal rate for a window. Responses
/// are deliberately not awaited; the point is write pressure.
async fn flood(targets: &[Arc<VirtualCharger>], params: &HashMap<String, Value>) {
    let window = Duration::from_secs(param_u64(params, "window_secs", 10));

    for charger in targets {
        let client = charger.client().clone();
        let interval = charger
            .heartbeat_interval()
            .await
            .div_f64(100.0)
            .max(Duration::from_millis(10));

        tokio::spawn(async move {
            let deadline = tokio::time::Instant::now() + window;
            let mut ticker = tokio::time::interval(interval);
            while tokio::time::Instant::now() < deadline {
                ticker.tick().await;
                let frame = format!(r#"[2,"{}","Heartbeat",{{}}]"#, Uuid::new_v4());
                if client.send_raw(frame).await.is_err() {
                    break;
                }
            }
        });
    }
}

/// Drop connections for a leading fraction of the targets
async fn partial_outage(targets: &[Arc<VirtualCharger>], params: &HashMap<String, Value>) {
    let fraction = param_f64(params, "fraction", 0.5).clamp(0.0, 1.0);
    let affected = ((targets.len() as f64) * fraction).ceil() as usize;

    for charger in targets.iter().take(affected) {
        charger.client().abort().await;
    }
    info!(affected, of = targets.len(), "partial outage applied");
}
