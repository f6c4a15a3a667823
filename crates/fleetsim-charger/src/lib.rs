//! # Fleetsim Charger
//!
//! A virtual OCPP 1.6 charge point. Each instance owns one WebSocket client,
//! drives the boot / heartbeat / status / transaction lifecycle, and answers
//! CSMS-initiated calls. Operator commands and the scenario engine call into
//! the same public methods.

pub mod connector;
pub mod error;
pub mod handlers;
pub mod transaction;

pub use connector::Connector;
pub use error::ChargerError;
pub use transaction::{Transaction, TransactionStatus};

use chrono::{DateTime, Utc};
use fleetsim_client::{
    backoff_delay, CallHandler, ClientConfig, ClientEvent, OcppClient,
};
use fleetsim_events::{topics, Event, EventBus};
use fleetsim_messages::{
    AuthorizationStatus, BootNotificationRequest, ChargePointStatus, DataTransferRequest,
    DataTransferResponse, HeartbeatRequest, MeterValuesRequest, RegistrationStatus,
    StartTransactionRequest, StatusNotificationRequest, StopReason, StopTransactionRequest,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Immutable specification of one virtual charger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargerConfig {
    pub identifier: String,
    pub model: String,
    pub vendor: String,
    #[serde(default)]
    pub serial_number: String,
    pub connector_count: u32,
    #[serde(default)]
    pub features: Vec<String>,
    pub csms_endpoint: String,
    #[serde(default = "default_ocpp_version")]
    pub ocpp_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic_auth_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic_auth_pass: Option<String>,
    #[serde(default)]
    pub custom_data: HashMap<String, String>,
    /// Heartbeat period used until the CSMS assigns one, seconds
    #[serde(default = "default_heartbeat_secs")]
    pub default_heartbeat_secs: u64,
    /// StatusNotification loop period, seconds
    #[serde(default = "default_status_secs")]
    pub status_interval_secs: u64,
    /// BootNotification response deadline, seconds
    #[serde(default = "default_boot_timeout_secs")]
    pub boot_timeout_secs: u64,
    /// Hold in Finishing before the connector returns to Available, ms
    #[serde(default = "default_finishing_hold_ms")]
    pub finishing_hold_ms: u64,
}

fn default_ocpp_version() -> String {
    "1.6".to_string()
}
fn default_heartbeat_secs() -> u64 {
    30
}
fn default_status_secs() -> u64 {
    10
}
fn default_boot_timeout_secs() -> u64 {
    30
}
fn default_finishing_hold_ms() -> u64 {
    2000
}

impl ChargerConfig {
    pub fn new(
        identifier: impl Into<String>,
        csms_endpoint: impl Into<String>,
        connector_count: u32,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            model: "FS-1000".to_string(),
            vendor: "Fleetsim".to_string(),
            serial_number: String::new(),
            connector_count,
            features: Vec::new(),
            csms_endpoint: csms_endpoint.into(),
            ocpp_version: default_ocpp_version(),
            basic_auth_user: None,
            basic_auth_pass: None,
            custom_data: HashMap::new(),
            default_heartbeat_secs: default_heartbeat_secs(),
            status_interval_secs: default_status_secs(),
            boot_timeout_secs: default_boot_timeout_secs(),
            finishing_hold_ms: default_finishing_hold_ms(),
        }
    }

    fn validate(&self) -> Result<(), ChargerError> {
        if self.identifier.trim().is_empty() {
            return Err(ChargerError::Config("identifier must not be empty".into()));
        }
        if self.connector_count == 0 {
            return Err(ChargerError::Config("connector_count must be >= 1".into()));
        }
        if self.csms_endpoint.trim().is_empty() {
            return Err(ChargerError::Config("csms_endpoint must not be empty".into()));
        }
        if self.finishing_hold_ms == 0 {
            return Err(ChargerError::Config("finishing_hold_ms must be > 0".into()));
        }
        Ok(())
    }
}

/// Charger lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargerStatus {
    Offline,
    Connecting,
    Connected,
    Error,
}

impl std::fmt::Display for ChargerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChargerStatus::Offline => "offline",
            ChargerStatus::Connecting => "connecting",
            ChargerStatus::Connected => "connected",
            ChargerStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Mutable charger state behind the readers-writer lock
struct ChargerState {
    status: ChargerStatus,
    connectors: Vec<Connector>,
    transactions: HashMap<i32, Transaction>,
    heartbeat_interval: Duration,
    last_boot_accepted: Option<DateTime<Utc>>,
}

impl ChargerState {
    fn connector_mut(&mut self, connector_id: u32) -> Result<&mut Connector, ChargerError> {
        let count = self.connectors.len() as u32;
        if connector_id < 1 || connector_id > count {
            return Err(ChargerError::InvalidConnector(connector_id));
        }
        Ok(&mut self.connectors[(connector_id - 1) as usize])
    }
}

/// A running virtual charger instance
pub struct VirtualCharger {
    id: String,
    config: ChargerConfig,
    client: Arc<OcppClient>,
    bus: Arc<EventBus>,
    state: RwLock<ChargerState>,
    /// OCPP configuration keys served to GetConfiguration
    configuration: RwLock<HashMap<String, String>>,
    next_tx_id: AtomicI32,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    loops_started: AtomicBool,
    supervisor_started: AtomicBool,
    weak_self: Weak<VirtualCharger>,
}

impl std::fmt::Debug for VirtualCharger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualCharger").field("id", &self.id).finish_non_exhaustive()
    }
}

impl VirtualCharger {
    /// Build a charger in the Offline state. The charger registers itself as
    /// the client's inbound call handler; the client only holds a weak
    /// reference back.
    pub fn new(config: ChargerConfig, bus: Arc<EventBus>) -> Result<Arc<Self>, ChargerError> {
        config.validate()?;
        if config.ocpp_version != "1.6" {
            warn!(
                charger_id = %config.identifier,
                version = %config.ocpp_version,
                "unsupported OCPP version, speaking 1.6"
            );
        }

        let mut client_config =
            ClientConfig::new(config.identifier.clone(), config.csms_endpoint.clone());
        if let (Some(user), Some(pass)) = (&config.basic_auth_user, &config.basic_auth_pass) {
            client_config.basic_auth = Some(fleetsim_client::BasicAuth {
                username: user.clone(),
                password: pass.clone(),
            });
        }
        let client = OcppClient::new(client_config);

        let connectors = (1..=config.connector_count).map(Connector::new).collect();
        let (shutdown, _) = watch::channel(false);

        let charger = Arc::new_cyclic(|weak: &Weak<VirtualCharger>| VirtualCharger {
            id: config.identifier.clone(),
            state: RwLock::new(ChargerState {
                status: ChargerStatus::Offline,
                connectors,
                transactions: HashMap::new(),
                heartbeat_interval: Duration::from_secs(config.default_heartbeat_secs),
                last_boot_accepted: None,
            }),
            configuration: RwLock::new(HashMap::from([
                (
                    "HeartbeatInterval".to_string(),
                    config.default_heartbeat_secs.to_string(),
                ),
                (
                    "NumberOfConnectors".to_string(),
                    config.connector_count.to_string(),
                ),
            ])),
            next_tx_id: AtomicI32::new(1),
            shutdown,
            tasks: Mutex::new(Vec::new()),
            loops_started: AtomicBool::new(false),
            supervisor_started: AtomicBool::new(false),
            weak_self: weak.clone(),
            client,
            bus,
            config,
        });

        let handler: Weak<dyn CallHandler> = charger.weak_self.clone();
        charger.client.set_handler(handler);
        Ok(charger)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &ChargerConfig {
        &self.config
    }

    pub fn client(&self) -> &Arc<OcppClient> {
        &self.client
    }

    pub async fn status(&self) -> ChargerStatus {
        self.state.read().await.status
    }

    pub async fn connectors(&self) -> Vec<Connector> {
        self.state.read().await.connectors.clone()
    }

    pub async fn transactions(&self) -> Vec<Transaction> {
        let state = self.state.read().await;
        let mut all: Vec<Transaction> = state.transactions.values().cloned().collect();
        all.sort_by_key(|tx| tx.local_id);
        all
    }

    pub async fn transaction(&self, local_id: i32) -> Option<Transaction> {
        self.state.read().await.transactions.get(&local_id).cloned()
    }

    /// Highest-numbered Active transaction, if any
    pub async fn latest_active_transaction(&self) -> Option<i32> {
        let state = self.state.read().await;
        state
            .transactions
            .values()
            .filter(|tx| tx.is_active())
            .map(|tx| tx.local_id)
            .max()
    }

    pub async fn heartbeat_interval(&self) -> Duration {
        self.state.read().await.heartbeat_interval
    }

    pub async fn last_boot_accepted(&self) -> Option<DateTime<Utc>> {
        self.state.read().await.last_boot_accepted
    }

    /// Block until an inbound Call with the given action arrives
    pub async fn wait_for_inbound(
        &self,
        action: &str,
        deadline: Duration,
    ) -> Result<(), ChargerError> {
        let mut inbound = self.client.subscribe_inbound();
        let wait = async {
            loop {
                match inbound.recv().await {
                    Ok(seen) if seen == action => return true,
                    Ok(_) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(_) => return false,
                }
            }
        };
        match tokio::time::timeout(deadline, wait).await {
            Ok(true) => Ok(()),
            _ => Err(ChargerError::WaitTimeout(action.to_string())),
        }
    }

    /// Connect to the CSMS and run the boot handshake.
    ///
    /// On an Accepted boot the charger adopts the server's heartbeat
    /// interval and launches the heartbeat and status loops. Pending and
    /// Rejected answers leave the charger Connecting and re-send
    /// BootNotification after the server-supplied interval until cancelled.
    pub async fn start(self: &Arc<Self>) -> Result<(), ChargerError> {
        info!(charger_id = %self.id, "starting virtual charger");
        self.shutdown.send_replace(false);
        self.set_status(ChargerStatus::Connecting).await;

        if let Err(err) = self.client.connect().await {
            self.set_status(ChargerStatus::Error).await;
            return Err(ChargerError::ConnectFailed(err.to_string()));
        }
        self.ensure_supervisor();

        let response = match self.send_boot_notification().await {
            Ok(response) => response,
            Err(err) => {
                self.set_status(ChargerStatus::Error).await;
                return Err(err);
            }
        };

        match response.status {
            RegistrationStatus::Accepted => {
                self.adopt_boot(&response).await;
                self.set_status(ChargerStatus::Connected).await;
                self.spawn_loops().await;
                info!(charger_id = %self.id, "virtual charger connected");
                Ok(())
            }
            status @ (RegistrationStatus::Pending | RegistrationStatus::Rejected) => {
                // the CSMS is not ready for us; keep retrying at its pace
                let retry_after = Duration::from_secs(response.interval.max(1) as u64);
                warn!(
                    charger_id = %self.id,
                    ?status,
                    retry_secs = retry_after.as_secs(),
                    "boot notification not accepted, will retry"
                );
                self.spawn_boot_retry(retry_after).await;
                Ok(())
            }
        }
    }

    /// Stop the charger: close out active transactions best-effort,
    /// disconnect, cancel every background task.
    pub async fn stop(&self) {
        info!(charger_id = %self.id, "stopping virtual charger");

        let active: Vec<i32> = {
            let state = self.state.read().await;
            state
                .transactions
                .values()
                .filter(|tx| tx.is_active())
                .map(|tx| tx.local_id)
                .collect()
        };
        for local_id in &active {
            if let Err(err) = self.stop_transaction(*local_id, "ChargerShutdown").await {
                error!(charger_id = %self.id, transaction = local_id, error = %err, "failed to stop transaction");
            }
        }

        self.shutdown.send_replace(true);
        self.client.disconnect().await;

        for handle in self.tasks.lock().await.drain(..) {
            handle.abort();
        }
        self.loops_started.store(false, Ordering::SeqCst);
        self.set_status(ChargerStatus::Offline).await;

        self.bus
            .publish(Event::for_charger(
                topics::CHARGER_STOPPED,
                &self.id,
                json!({ "active_transactions": active.len() }),
            ))
            .await;
        info!(charger_id = %self.id, "virtual charger stopped");
    }

    /// Begin a transaction on a connector.
    ///
    /// State is mutated under the write lock, but the lock is released
    /// around the StartTransaction exchange so slow CSMS responses never
    /// block unrelated reads.
    pub async fn start_transaction(
        &self,
        connector_id: u32,
        id_tag: &str,
    ) -> Result<i32, ChargerError> {
        info!(charger_id = %self.id, connector_id, id_tag, "starting transaction");

        {
            let mut state = self.state.write().await;
            if state.status != ChargerStatus::Connected {
                return Err(ChargerError::InvalidState {
                    operation: "StartTransaction".into(),
                    state: state.status.to_string(),
                });
            }
            let connector = state.connector_mut(connector_id)?;
            if !connector.is_available() {
                return Err(ChargerError::ConnectorBusy {
                    connector_id,
                    status: connector.status,
                });
            }
            connector.set_status(ChargePointStatus::Preparing);
        }

        let local_id = self.next_tx_id.fetch_add(1, Ordering::SeqCst);
        let meter_start = 0i64;
        let request = StartTransactionRequest::new(connector_id, id_tag, meter_start);
        let started_at = request.timestamp;

        match self.client.send_call(&request).await {
            Ok(response) if response.id_tag_info.status == AuthorizationStatus::Accepted => {
                {
                    let mut state = self.state.write().await;
                    let mut tx = Transaction::new(local_id, connector_id, id_tag, meter_start);
                    tx.csms_id = Some(response.transaction_id);
                    tx.start_time = started_at;
                    state.transactions.insert(local_id, tx);
                    state
                        .connector_mut(connector_id)?
                        .set_status(ChargePointStatus::Charging);
                }
                self.bus
                    .publish(Event::for_charger(
                        topics::TRANSACTION_STARTED,
                        &self.id,
                        json!({
                            "transaction_id": local_id,
                            "csms_transaction_id": response.transaction_id,
                            "connector_id": connector_id,
                            "id_tag": id_tag,
                        }),
                    ))
                    .await;
                Ok(local_id)
            }
            Ok(response) => {
                self.revert_connector(connector_id).await;
                Err(ChargerError::AuthorizationRejected(
                    response.id_tag_info.status,
                ))
            }
            Err(err) => {
                self.revert_connector(connector_id).await;
                Err(err.into())
            }
        }
    }

    /// End a transaction. On a transport or CSMS failure the transaction is
    /// still failed locally; the CSMS-side record is then out of sync by
    /// design and no retry is attempted.
    pub async fn stop_transaction(&self, local_id: i32, reason: &str) -> Result<(), ChargerError> {
        info!(charger_id = %self.id, transaction = local_id, reason, "stopping transaction");

        let (csms_id, connector_id, meter_stop) = {
            let state = self.state.read().await;
            let tx = state
                .transactions
                .get(&local_id)
                .ok_or(ChargerError::TransactionNotFound(local_id))?;
            if !tx.is_active() {
                return Err(ChargerError::TransactionNotActive(local_id));
            }
            let consumed = if tx.energy_wh > 0 { tx.energy_wh } else { 5000 };
            (
                tx.csms_id.unwrap_or(local_id),
                tx.connector_id,
                tx.meter_start + consumed,
            )
        };

        let stop_reason = reason.parse::<StopReason>().unwrap_or(StopReason::Other);
        let request = StopTransactionRequest::new(csms_id, meter_stop, stop_reason);

        match self.client.send_call(&request).await {
            Ok(_) => {
                {
                    let mut state = self.state.write().await;
                    if let Some(tx) = state.transactions.get_mut(&local_id) {
                        tx.complete(meter_stop, reason);
                    }
                    state
                        .connector_mut(connector_id)?
                        .set_status(ChargePointStatus::Finishing);
                }
                self.schedule_finishing_release(connector_id);
                self.bus
                    .publish(Event::for_charger(
                        topics::TRANSACTION_STOPPED,
                        &self.id,
                        json!({
                            "transaction_id": local_id,
                            "connector_id": connector_id,
                            "meter_stop": meter_stop,
                            "reason": reason,
                        }),
                    ))
                    .await;
                Ok(())
            }
            Err(err) => {
                {
                    let mut state = self.state.write().await;
                    if let Some(tx) = state.transactions.get_mut(&local_id) {
                        tx.fail(reason);
                    }
                    state
                        .connector_mut(connector_id)?
                        .set_status(ChargePointStatus::Available);
                }
                self.bus
                    .publish(Event::for_charger(
                        topics::TRANSACTION_STOPPED,
                        &self.id,
                        json!({
                            "transaction_id": local_id,
                            "connector_id": connector_id,
                            "reason": reason,
                            "failed": true,
                        }),
                    ))
                    .await;
                Err(err.into())
            }
        }
    }

    /// Drive periodic meter values for an active transaction. Ends when the
    /// duration elapses, the transaction leaves Active, or the charger is
    /// stopped.
    pub async fn simulate_charging(
        &self,
        local_id: i32,
        duration: Duration,
        power_kw: f64,
    ) -> Result<(), ChargerError> {
        let meter_start = {
            let state = self.state.read().await;
            let tx = state
                .transactions
                .get(&local_id)
                .ok_or(ChargerError::TransactionNotFound(local_id))?;
            if !tx.is_active() {
                return Err(ChargerError::TransactionNotActive(local_id));
            }
            tx.meter_start
        };

        let started = tokio::time::Instant::now();
        let mut ticker = tokio::time::interval(Duration::from_secs(30));
        ticker.tick().await; // consume the immediate first tick
        let mut shutdown = self.shutdown.subscribe();

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return Ok(());
                    }
                }
                _ = ticker.tick() => {
                    let elapsed = started.elapsed();
                    if elapsed >= duration {
                        return Ok(());
                    }

                    let energy_wh = (power_kw * elapsed.as_secs_f64() / 3600.0 * 1000.0) as i64;
                    {
                        let mut state = self.state.write().await;
                        match state.transactions.get_mut(&local_id) {
                            Some(tx) if tx.is_active() => tx.energy_wh = energy_wh,
                            _ => return Ok(()),
                        }
                    }
                    if let Err(err) = self.send_meter_values(local_id, meter_start + energy_wh).await {
                        error!(charger_id = %self.id, transaction = local_id, error = %err, "failed to send meter values");
                    }
                }
            }
        }
    }

    /// Send one MeterValues sample for an active transaction
    pub async fn send_meter_values(&self, local_id: i32, meter_wh: i64) -> Result<(), ChargerError> {
        let (connector_id, csms_id) = {
            let state = self.state.read().await;
            let tx = state
                .transactions
                .get(&local_id)
                .ok_or(ChargerError::TransactionNotFound(local_id))?;
            if !tx.is_active() {
                return Err(ChargerError::TransactionNotActive(local_id));
            }
            (tx.connector_id, tx.csms_id.unwrap_or(local_id))
        };

        let request = MeterValuesRequest::energy_sample(connector_id, csms_id, meter_wh);
        self.client.send_call(&request).await?;
        debug!(charger_id = %self.id, transaction = local_id, meter_wh, "sent meter values");
        Ok(())
    }

    /// Ask the CSMS to authorize an id tag
    pub async fn authorize(&self, id_tag: &str) -> Result<AuthorizationStatus, ChargerError> {
        let request = fleetsim_messages::AuthorizeRequest::new(id_tag);
        let response = self.client.send_call(&request).await?;
        Ok(response.id_tag_info.status)
    }

    /// Vendor-specific data exchange
    pub async fn data_transfer(
        &self,
        vendor_id: &str,
        message_id: Option<String>,
        data: Option<String>,
    ) -> Result<DataTransferResponse, ChargerError> {
        let mut request = DataTransferRequest::new(vendor_id);
        request.message_id = message_id;
        request.data = data;
        Ok(self.client.send_call(&request).await?)
    }

    /// Send a single heartbeat
    pub async fn send_heartbeat(&self) -> Result<DateTime<Utc>, ChargerError> {
        let response = self.client.send_call(&HeartbeatRequest {}).await?;
        Ok(response.current_time)
    }

    /// Send a StatusNotification for one connector (0 = station level)
    pub async fn send_status_notification(
        &self,
        connector_id: u32,
        status: ChargePointStatus,
    ) -> Result<(), ChargerError> {
        let request = StatusNotificationRequest::new(connector_id, status);
        self.client.send_call(&request).await?;
        Ok(())
    }

    /// Send StatusNotifications reflecting every connector's current status
    pub async fn send_status_notifications(&self) -> Result<(), ChargerError> {
        let connectors = self.connectors().await;
        for connector in connectors {
            self.send_status_notification(connector.id, connector.status)
                .await?;
        }
        Ok(())
    }

    /// Re-send BootNotification and return the CSMS answer
    pub async fn send_boot_notification(
        &self,
    ) -> Result<fleetsim_messages::BootNotificationResponse, ChargerError> {
        let mut request = BootNotificationRequest::new(&self.config.vendor, &self.config.model);
        if !self.config.serial_number.is_empty() {
            request = request.with_serial(&self.config.serial_number);
        }

        let response = self
            .client
            .send_call_with_timeout(&request, Duration::from_secs(self.config.boot_timeout_secs))
            .await?;

        self.bus
            .publish(Event::for_charger(
                topics::CHARGER_BOOT_SENT,
                &self.id,
                json!({ "model": self.config.model, "vendor": self.config.vendor }),
            ))
            .await;
        Ok(response)
    }

    // ------------------------------------------------------------------
    // internals
    // ------------------------------------------------------------------

    pub(crate) async fn set_status(&self, status: ChargerStatus) {
        let old = {
            let mut state = self.state.write().await;
            let old = state.status;
            state.status = status;
            old
        };
        if old != status {
            info!(charger_id = %self.id, from = %old, to = %status, "charger status changed");
            self.bus
                .publish(Event::for_charger(
                    topics::CHARGER_STATUS_CHANGED,
                    &self.id,
                    json!({ "old_status": old, "new_status": status }),
                ))
                .await;
        }
    }

    async fn adopt_boot(&self, response: &fleetsim_messages::BootNotificationResponse) {
        let mut state = self.state.write().await;
        if response.interval > 0 {
            state.heartbeat_interval = Duration::from_secs(response.interval as u64);
        }
        state.last_boot_accepted = Some(Utc::now());
    }

    async fn revert_connector(&self, connector_id: u32) {
        let mut state = self.state.write().await;
        if let Ok(connector) = state.connector_mut(connector_id) {
            connector.set_status(ChargePointStatus::Available);
        }
    }

    /// After the Finishing hold, release the connector back to Available
    fn schedule_finishing_release(&self, connector_id: u32) {
        let weak = self.weak_self.clone();
        let hold = Duration::from_millis(self.config.finishing_hold_ms);
        tokio::spawn(async move {
            tokio::time::sleep(hold).await;
            if let Some(this) = weak.upgrade() {
                let mut state = this.state.write().await;
                if let Ok(connector) = state.connector_mut(connector_id) {
                    if connector.status == ChargePointStatus::Finishing {
                        connector.set_status(ChargePointStatus::Available);
                    }
                }
            }
        });
    }

    async fn spawn_loops(self: &Arc<Self>) {
        if self.loops_started.swap(true, Ordering::SeqCst) {
            return;
        }

        let period = self.heartbeat_interval().await;
        let weak = Arc::downgrade(self);
        let mut shutdown = self.shutdown.subscribe();
        let heartbeat = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return;
                        }
                    }
                    _ = ticker.tick() => {
                        let Some(this) = weak.upgrade() else { return };
                        if this.client.is_connected() {
                            if let Err(err) = this.send_heartbeat().await {
                                error!(charger_id = %this.id, error = %err, "failed to send heartbeat");
                            }
                        }
                    }
                }
            }
        });

        let weak = Arc::downgrade(self);
        let mut shutdown = self.shutdown.subscribe();
        let status_period = Duration::from_secs(self.config.status_interval_secs);
        let status = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(status_period);
            ticker.tick().await; // statuses were just reported during boot
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return;
                        }
                    }
                    _ = ticker.tick() => {
                        let Some(this) = weak.upgrade() else { return };
                        if this.client.is_connected() {
                            if let Err(err) = this.send_status_notifications().await {
                                error!(charger_id = %this.id, error = %err, "failed to send status notifications");
                            }
                        }
                    }
                }
            }
        });

        let mut tasks = self.tasks.lock().await;
        tasks.push(heartbeat);
        tasks.push(status);
    }

    async fn spawn_boot_retry(self: &Arc<Self>, initial_delay: Duration) {
        let weak = Arc::downgrade(self);
        let mut shutdown = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            let mut delay = initial_delay;
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return;
                        }
                    }
                    _ = tokio::time::sleep(delay) => {
                        let Some(this) = weak.upgrade() else { return };
                        if !this.client.is_connected() {
                            continue;
                        }
                        match this.send_boot_notification().await {
                            Ok(response) => match response.status {
                                RegistrationStatus::Accepted => {
                                    this.adopt_boot(&response).await;
                                    this.set_status(ChargerStatus::Connected).await;
                                    this.spawn_loops().await;
                                    return;
                                }
                                status => {
                                    delay = Duration::from_secs(response.interval.max(1) as u64);
                                    warn!(charger_id = %this.id, ?status, "boot retry not accepted");
                                }
                            },
                            Err(err) => {
                                warn!(charger_id = %this.id, error = %err, "boot retry failed");
                            }
                        }
                    }
                }
            }
        });
        self.tasks.lock().await.push(handle);
    }

    /// Watch the client's lifecycle events and reconnect with backoff on
    /// unexpected drops. The charger decides the policy; the client only
    /// reports.
    fn ensure_supervisor(self: &Arc<Self>) {
        if self.supervisor_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(mut events) = self.client.take_events() else {
            return;
        };

        let weak = Arc::downgrade(self);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            // lives as long as the client; recv() ends when the client goes
            while let Some(event) = events.recv().await {
                let ClientEvent::Disconnected { reason } = event else {
                    continue;
                };
                // drops during a deliberate stop are not reconnected
                if *shutdown.borrow() {
                    continue;
                }
                let Some(this) = weak.upgrade() else { return };

                warn!(charger_id = %this.id, %reason, "connection lost, reconnecting");
                this.set_status(ChargerStatus::Connecting).await;
                drop(this);

                let mut attempt: u32 = 0;
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                break;
                            }
                        }
                        _ = tokio::time::sleep(backoff_delay(attempt)) => {
                            if *shutdown.borrow() {
                                break;
                            }
                            let Some(this) = weak.upgrade() else { return };
                            match this.reconnect_once().await {
                                Ok(()) => break,
                                Err(err) => {
                                    attempt = attempt.saturating_add(1);
                                    debug!(charger_id = %this.id, attempt, error = %err, "reconnect attempt failed");
                                }
                            }
                        }
                    }
                }
            }
        });
    }

    async fn reconnect_once(self: &Arc<Self>) -> Result<(), ChargerError> {
        self.client
            .connect()
            .await
            .map_err(|e| ChargerError::ConnectFailed(e.to_string()))?;
        let response = self.send_boot_notification().await?;
        match response.status {
            RegistrationStatus::Accepted => {
                self.adopt_boot(&response).await;
                self.set_status(ChargerStatus::Connected).await;
                self.spawn_loops().await;
                info!(charger_id = %self.id, "reconnected to CSMS");
                Ok(())
            }
            status => {
                let retry_after = Duration::from_secs(response.interval.max(1) as u64);
                warn!(charger_id = %self.id, ?status, "boot after reconnect not accepted");
                self.spawn_boot_retry(retry_after).await;
                Ok(())
            }
        }
    }

    /// Soft reset: fail active transactions locally, return connectors to
    /// Available, and rerun the boot handshake on the live connection.
    pub(crate) async fn reset_soft(self: &Arc<Self>) {
        info!(charger_id = %self.id, "soft reset");
        let active: Vec<i32> = {
            let state = self.state.read().await;
            state
                .transactions
                .values()
                .filter(|tx| tx.is_active())
                .map(|tx| tx.local_id)
                .collect()
        };
        for local_id in active {
            let _ = self.stop_transaction(local_id, "SoftReset").await;
        }
        {
            let mut state = self.state.write().await;
            for connector in &mut state.connectors {
                connector.set_status(ChargePointStatus::Available);
            }
        }
        if let Ok(response) = self.send_boot_notification().await {
            if response.status == RegistrationStatus::Accepted {
                self.adopt_boot(&response).await;
            }
        }
    }

    /// Hard reset: full stop then a fresh connection lifecycle
    pub(crate) async fn reset_hard(self: &Arc<Self>) {
        info!(charger_id = %self.id, "hard reset");
        self.stop().await;
        if let Err(err) = self.start().await {
            error!(charger_id = %self.id, error = %err, "restart after hard reset failed");
        }
    }

    pub(crate) async fn configuration_snapshot(&self) -> HashMap<String, String> {
        self.configuration.read().await.clone()
    }

    pub(crate) async fn set_configuration_key(&self, key: String, value: String) {
        self.configuration.write().await.insert(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ChargerConfig {
        ChargerConfig::new("CP001", "ws://localhost:9999/ocpp", 2)
    }

    #[tokio::test]
    async fn test_new_charger_starts_offline() {
        let bus = Arc::new(EventBus::new());
        let charger = VirtualCharger::new(test_config(), bus).unwrap();

        assert_eq!(charger.status().await, ChargerStatus::Offline);
        let connectors = charger.connectors().await;
        assert_eq!(connectors.len(), 2);
        assert!(connectors.iter().all(|c| c.is_available()));
        assert!(charger.transactions().await.is_empty());
    }

    #[tokio::test]
    async fn test_config_validation() {
        let bus = Arc::new(EventBus::new());

        let mut config = test_config();
        config.identifier = String::new();
        assert!(VirtualCharger::new(config, bus.clone()).is_err());

        let mut config = test_config();
        config.connector_count = 0;
        assert!(VirtualCharger::new(config, bus.clone()).is_err());

        let mut config = test_config();
        config.finishing_hold_ms = 0;
        assert!(VirtualCharger::new(config, bus).is_err());
    }

    #[tokio::test]
    async fn test_start_transaction_requires_connected() {
        let bus = Arc::new(EventBus::new());
        let charger = VirtualCharger::new(test_config(), bus).unwrap();

        let err = charger.start_transaction(1, "USER1").await.unwrap_err();
        assert!(matches!(err, ChargerError::InvalidState { .. }));
        // no frame was sent, connector untouched
        assert!(charger.connectors().await[0].is_available());
    }

    #[tokio::test]
    async fn test_stop_unknown_transaction() {
        let bus = Arc::new(EventBus::new());
        let charger = VirtualCharger::new(test_config(), bus).unwrap();

        let err = charger.stop_transaction(99, "Local").await.unwrap_err();
        assert!(matches!(err, ChargerError::TransactionNotFound(99)));
    }

    #[tokio::test]
    async fn test_local_transaction_ids_are_strictly_increasing() {
        let bus = Arc::new(EventBus::new());
        let charger = VirtualCharger::new(test_config(), bus).unwrap();

        let first = charger.next_tx_id.fetch_add(1, Ordering::SeqCst);
        let second = charger.next_tx_id.fetch_add(1, Ordering::SeqCst);
        assert!(second > first);
    }
}
