//! Timeline-driven scenario execution

use crate::{chaos, EngineError, Fleet, MessageStep, ScenarioConfig, TimelineAction, TimelineEvent};
use fleetsim_charger::VirtualCharger;
use fleetsim_events::{topics, Event, EventBus};
use futures_util::future::join_all;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Runs scenarios against the fleet it owns
pub struct SimulationEngine {
    bus: Arc<EventBus>,
    fleet: Fleet,
    running: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl SimulationEngine {
    pub fn new(bus: Arc<EventBus>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            fleet: Fleet::new(bus.clone()),
            bus,
            running: AtomicBool::new(false),
            shutdown,
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn fleet(&self) -> &Fleet {
        &self.fleet
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Cancel the running scenario; in-flight operations unwind promptly
    pub fn stop_scenario(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Counters for the admin status endpoint
    pub async fn status_summary(&self) -> Value {
        let chargers = self.fleet.all().await;
        let mut by_status: HashMap<String, usize> = HashMap::new();
        for charger in &chargers {
            *by_status
                .entry(charger.status().await.to_string())
                .or_default() += 1;
        }
        json!({
            "scenario_running": self.is_running(),
            "charger_count": chargers.len(),
            "chargers_by_status": by_status,
            "events_recorded": self.bus.history_len().await,
        })
    }

    /// Drive a scenario to completion: provision the fleet, dispatch the
    /// timeline, hold until the declared duration, then stop everything.
    pub async fn run_scenario(&self, scenario: ScenarioConfig) -> Result<(), EngineError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(EngineError::AlreadyRunning);
        }
        let result = self.run_inner(&scenario).await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    async fn run_inner(&self, scenario: &ScenarioConfig) -> Result<(), EngineError> {
        info!(
            name = %scenario.name,
            chargers = scenario.chargers.count,
            duration = scenario.duration,
            events = scenario.timeline.len(),
            "starting scenario"
        );
        let _ = self.shutdown.send(false);
        let mut shutdown = self.shutdown.subscribe();

        self.bus
            .publish(Event::new(
                topics::SIMULATION_STARTED,
                json!({ "name": scenario.name }),
            ))
            .await;

        let t0 = Instant::now();

        // with no explicit create_chargers event the whole fleet exists
        // from scenario start
        let mut timeline = scenario.timeline.clone();
        timeline.sort_by_key(|e| e.at);
        if !timeline
            .iter()
            .any(|e| e.action == TimelineAction::CreateChargers)
        {
            self.fleet
                .provision(scenario, scenario.chargers.count)
                .await?;
        }

        let mut cancelled = false;
        for event in &timeline {
            let due = t0 + Duration::from_secs(event.at);
            tokio::select! {
                _ = tokio::time::sleep_until(due) => {}
                _ = wait_cancelled(&mut shutdown) => {
                    cancelled = true;
                }
            }
            if cancelled {
                break;
            }

            // one failing event never aborts the timeline
            if let Err(err) = self.dispatch(scenario, event).await {
                error!(at = event.at, action = ?event.action, error = %err, "timeline event failed");
            }
        }

        if !cancelled {
            let end = t0 + Duration::from_secs(scenario.duration);
            tokio::select! {
                _ = tokio::time::sleep_until(end) => {}
                _ = wait_cancelled(&mut shutdown) => {}
            }
        }

        self.fleet.stop_all().await;
        self.bus
            .publish(Event::new(
                topics::SIMULATION_STOPPED,
                json!({
                    "name": scenario.name,
                    "elapsed_secs": t0.elapsed().as_secs(),
                }),
            ))
            .await;
        info!(name = %scenario.name, "scenario finished");
        Ok(())
    }

    async fn dispatch(
        &self,
        scenario: &ScenarioConfig,
        event: &TimelineEvent,
    ) -> Result<(), EngineError> {
        info!(at = event.at, action = ?event.action, "dispatching timeline event");

        match event.action {
            TimelineAction::CreateChargers => {
                let count = event
                    .params
                    .get("count")
                    .and_then(Value::as_u64)
                    .map(|n| n as u32)
                    .unwrap_or(scenario.chargers.count);
                self.fleet.provision(scenario, count).await?;
                Ok(())
            }
            TimelineAction::StartNormalFlow => {
                let targets = self.fleet.resolve(event.targets.as_ref()).await;
                let starts = targets.iter().map(|charger| async move {
                    if let Err(err) = charger.start().await {
                        error!(charger_id = %charger.id(), error = %err, "start failed");
                    }
                });
                join_all(starts).await;
                Ok(())
            }
            TimelineAction::StartFlow => {
                let targets = self.fleet.resolve(event.targets.as_ref()).await;
                let flows = targets
                    .iter()
                    .map(|charger| self.run_flow(charger, &event.flow));
                join_all(flows).await;
                Ok(())
            }
            TimelineAction::InjectChaos => {
                let strategy = event
                    .strategy
                    .as_deref()
                    .ok_or_else(|| EngineError::ConfigInvalid("missing chaos strategy".into()))?;
                let targets = self.fleet.resolve(event.targets.as_ref()).await;
                chaos::inject(strategy, &targets, &event.params, &self.bus).await
            }
        }
    }

    /// Execute an ordered step list against one charger. Step failures are
    /// recorded and the flow moves on.
    async fn run_flow(&self, charger: &Arc<VirtualCharger>, steps: &[MessageStep]) {
        for step in steps {
            self.run_step(charger, step).await;
        }
    }

    async fn run_step(&self, charger: &Arc<VirtualCharger>, step: &MessageStep) {
        match &step.repeat {
            None => self.exec_step(charger, step).await,
            Some(repeat) => {
                let interval =
                    Duration::from_secs(repeat.interval.map(|i| i.sample()).unwrap_or(1));
                if let Some(count) = &repeat.count {
                    // count = 0 executes zero iterations
                    let count = count.sample();
                    for i in 0..count {
                        self.exec_step(charger, step).await;
                        if i + 1 < count {
                            tokio::time::sleep(interval).await;
                        }
                    }
                } else if let Some(duration) = repeat.duration {
                    // duration = 0 executes at least once
                    let deadline = Instant::now() + Duration::from_secs(duration);
                    loop {
                        self.exec_step(charger, step).await;
                        if Instant::now() >= deadline {
                            break;
                        }
                        tokio::time::sleep(interval).await;
                    }
                } else {
                    self.exec_step(charger, step).await;
                }
            }
        }
    }

    async fn exec_step(&self, charger: &Arc<VirtualCharger>, step: &MessageStep) {
        if let Some(action) = &step.send {
            match self.send_action(charger, action, &step.params).await {
                Ok(response) => {
                    if let (Some(expect), Some(response)) = (&step.expect, response) {
                        self.check_expectations(charger, action, expect, &response)
                            .await;
                    }
                }
                Err(err) => {
                    warn!(charger_id = %charger.id(), %action, error = %err, "flow send failed");
                }
            }
        } else if let Some(action) = &step.wait_for {
            let deadline = Duration::from_secs(step.timeout.unwrap_or(30));
            if let Err(err) = charger.wait_for_inbound(action, deadline).await {
                warn!(charger_id = %charger.id(), %action, error = %err, "flow wait failed");
            }
        }

        if let Some(delay) = &step.delay {
            tokio::time::sleep(Duration::from_secs(delay.sample())).await;
        }
    }

    /// Map a flow action name onto the charger operation it drives and
    /// return the response the expectations run against
    async fn send_action(
        &self,
        charger: &Arc<VirtualCharger>,
        action: &str,
        params: &HashMap<String, Value>,
    ) -> Result<Option<Value>, EngineError> {
        let str_param = |keys: &[&str], default: &str| -> String {
            keys.iter()
                .find_map(|k| params.get(*k).and_then(Value::as_str))
                .unwrap_or(default)
                .to_string()
        };
        let u64_param = |keys: &[&str], default: u64| -> u64 {
            keys.iter()
                .find_map(|k| params.get(*k).and_then(Value::as_u64))
                .unwrap_or(default)
        };

        match action {
            "BootNotification" => {
                let response = charger.send_boot_notification().await?;
                Ok(Some(serde_json::to_value(response).unwrap_or(Value::Null)))
            }
            "Heartbeat" => {
                let current_time = charger.send_heartbeat().await?;
                Ok(Some(json!({ "currentTime": current_time })))
            }
            "StatusNotification" => {
                charger.send_status_notifications().await?;
                Ok(None)
            }
            "Authorize" => {
                let id_tag = str_param(&["id_tag", "idTag"], "FLEETSIM");
                let status = charger.authorize(&id_tag).await?;
                Ok(Some(json!({ "status": status })))
            }
            "StartTransaction" => {
                let connector_id = u64_param(&["connector_id", "connectorId"], 1) as u32;
                let id_tag = str_param(&["id_tag", "idTag"], "FLEETSIM");
                let local_id = charger.start_transaction(connector_id, &id_tag).await?;
                Ok(Some(json!({
                    "status": "Accepted",
                    "transaction_id": local_id,
                })))
            }
            "StopTransaction" => {
                let local_id = charger
                    .latest_active_transaction()
                    .await
                    .ok_or_else(|| EngineError::ConfigInvalid("no active transaction".into()))?;
                let reason = str_param(&["reason"], "Local");
                charger.stop_transaction(local_id, &reason).await?;
                Ok(Some(json!({ "status": "Completed" })))
            }
            "MeterValues" => {
                let local_id = charger
                    .latest_active_transaction()
                    .await
                    .ok_or_else(|| EngineError::ConfigInvalid("no active transaction".into()))?;
                let meter_wh = match params.get("value").and_then(Value::as_i64) {
                    Some(value) => value,
                    None => {
                        let tx = charger
                            .transaction(local_id)
                            .await
                            .ok_or_else(|| EngineError::ConfigInvalid("transaction vanished".into()))?;
                        tx.meter_start + tx.energy_wh
                    }
                };
                charger.send_meter_values(local_id, meter_wh).await?;
                Ok(None)
            }
            "SimulateCharging" => {
                let local_id = charger
                    .latest_active_transaction()
                    .await
                    .ok_or_else(|| EngineError::ConfigInvalid("no active transaction".into()))?;
                let duration = Duration::from_secs(u64_param(&["duration", "duration_secs"], 60));
                let power_kw = params
                    .get("power_kw")
                    .and_then(Value::as_f64)
                    .unwrap_or(7.4);

                // long-running by design: run alongside the flow
                let charger = charger.clone();
                tokio::spawn(async move {
                    if let Err(err) = charger.simulate_charging(local_id, duration, power_kw).await
                    {
                        warn!(charger_id = %charger.id(), error = %err, "charging simulation ended");
                    }
                });
                Ok(None)
            }
            "DataTransfer" => {
                let vendor_id = str_param(&["vendor_id", "vendorId"], "fleetsim");
                let message_id = params
                    .get("message_id")
                    .and_then(Value::as_str)
                    .map(String::from);
                let data = params.get("data").and_then(Value::as_str).map(String::from);
                let response = charger.data_transfer(&vendor_id, message_id, data).await?;
                Ok(Some(serde_json::to_value(response).unwrap_or(Value::Null)))
            }
            other => Err(EngineError::UnknownAction(other.to_string())),
        }
    }

    async fn check_expectations(
        &self,
        charger: &Arc<VirtualCharger>,
        action: &str,
        expect: &HashMap<String, Value>,
        response: &Value,
    ) {
        for (path, expected) in expect {
            let actual = lookup_path(response, path);
            if actual != Some(expected) {
                warn!(
                    charger_id = %charger.id(),
                    %action,
                    %path,
                    ?expected,
                    ?actual,
                    "flow expectation failed"
                );
                self.bus
                    .publish(Event::for_charger(
                        topics::FLOW_EXPECTATION_FAILED,
                        charger.id(),
                        json!({
                            "action": action,
                            "path": path,
                            "expected": expected,
                            "actual": actual,
                        }),
                    ))
                    .await;
            }
        }
    }
}

/// Resolve a dotted path like `idTagInfo.status` inside a JSON value
fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

async fn wait_cancelled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            // sender gone; never resolves
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_path() {
        let value = json!({
            "idTagInfo": { "status": "Accepted" },
            "transactionId": 42,
        });

        assert_eq!(
            lookup_path(&value, "idTagInfo.status"),
            Some(&json!("Accepted"))
        );
        assert_eq!(lookup_path(&value, "transactionId"), Some(&json!(42)));
        assert_eq!(lookup_path(&value, "idTagInfo.missing"), None);
        assert_eq!(lookup_path(&value, "nope"), None);
    }

    #[tokio::test]
    async fn test_engine_rejects_concurrent_scenarios() {
        let engine = Arc::new(SimulationEngine::new(Arc::new(
            fleetsim_events::EventBus::new(),
        )));
        let scenario = crate::ScenarioLoader::load_str(
            r#"
name: overlap
duration: 2
chargers: { count: 1 }
csms: { endpoint: "ws://localhost:9999/ocpp" }
"#,
        )
        .unwrap();

        let first = {
            let engine = engine.clone();
            let scenario = scenario.clone();
            tokio::spawn(async move { engine.run_scenario(scenario).await })
        };
        // give the first run a moment to take the slot
        tokio::time::sleep(Duration::from_millis(100)).await;

        let err = engine.run_scenario(scenario).await.unwrap_err();
        assert!(matches!(err, EngineError::AlreadyRunning));

        engine.stop_scenario();
        first.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unknown_flow_action() {
        let engine = SimulationEngine::new(Arc::new(fleetsim_events::EventBus::new()));
        let charger = fleetsim_charger::VirtualCharger::new(
            fleetsim_charger::ChargerConfig::new("CP001", "ws://localhost:9999/ocpp", 1),
            engine.bus().clone(),
        )
        .unwrap();

        let err = engine
            .send_action(&charger, "LaunchRocket", &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownAction(_)));
    }
}
