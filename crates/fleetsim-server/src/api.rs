//! Administrative HTTP interface
//!
//! Thin layer over the engine and storage: list and create chargers, run
//! and stop scenarios, read counters and the event tail.

use crate::{ServerError, Storage};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use fleetsim_charger::ChargerConfig;
use fleetsim_engine::{ScenarioLoader, SimulationEngine};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

/// Shared handler state
#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<SimulationEngine>,
    pub loader: Arc<ScenarioLoader>,
    pub storage: Arc<Storage>,
}

/// Uniform response envelope
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: chrono::Utc::now(),
        })
    }

    fn err(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: false,
            data: None,
            error: Some(message.into()),
            timestamp: chrono::Utc::now(),
        })
    }
}

/// Charger summary returned by the listing endpoints
#[derive(Debug, Clone, Serialize)]
pub struct ChargerView {
    pub identifier: String,
    pub status: String,
    pub connector_count: u32,
    pub active_transactions: usize,
    pub model: String,
    pub vendor: String,
    pub messages_sent: u64,
    pub messages_received: u64,
}

/// Body of POST /api/chargers
#[derive(Debug, Clone, Deserialize)]
pub struct CreateChargerRequest {
    pub identifier: String,
    pub csms_endpoint: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub connector_count: Option<u32>,
    #[serde(default)]
    pub basic_auth_user: Option<String>,
    #[serde(default)]
    pub basic_auth_pass: Option<String>,
}

/// Build the admin router
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/chargers", get(list_chargers).post(create_charger))
        .route("/api/chargers/:id", get(get_charger).delete(remove_charger))
        .route("/api/scenarios", get(list_scenarios))
        .route("/api/scenarios/:name", get(get_scenario))
        .route("/api/scenarios/:name/run", post(run_scenario))
        .route("/api/scenarios/:name/stop", post(stop_scenario))
        .route("/api/status", get(status))
        .route("/api/events", get(events))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    let database = state.storage.health_check().await.is_ok();
    Json(serde_json::json!({
        "status": if database { "healthy" } else { "degraded" },
        "database": database,
        "service": "fleetsim",
        "timestamp": chrono::Utc::now(),
    }))
}

async fn charger_view(charger: &Arc<fleetsim_charger::VirtualCharger>) -> ChargerView {
    let transactions = charger.transactions().await;
    let stats = charger.client().stats();
    ChargerView {
        identifier: charger.id().to_string(),
        status: charger.status().await.to_string(),
        connector_count: charger.config().connector_count,
        active_transactions: transactions.iter().filter(|t| t.is_active()).count(),
        model: charger.config().model.clone(),
        vendor: charger.config().vendor.clone(),
        messages_sent: stats.messages_sent,
        messages_received: stats.messages_received,
    }
}

async fn list_chargers(State(state): State<ApiState>) -> Json<ApiResponse<Vec<ChargerView>>> {
    let mut views = Vec::new();
    for charger in state.engine.fleet().all().await {
        views.push(charger_view(&charger).await);
    }
    ApiResponse::ok(views)
}

async fn get_charger(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<ChargerView>>, StatusCode> {
    match state.engine.fleet().get(&id).await {
        Some(charger) => Ok(ApiResponse::ok(charger_view(&charger).await)),
        None => Err(StatusCode::NOT_FOUND),
    }
}

async fn create_charger(
    State(state): State<ApiState>,
    Json(request): Json<CreateChargerRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ChargerView>>), StatusCode> {
    let mut config = ChargerConfig::new(
        request.identifier.clone(),
        request.csms_endpoint,
        request.connector_count.unwrap_or(1),
    );
    if let Some(model) = request.model {
        config.model = model;
    }
    if let Some(vendor) = request.vendor {
        config.vendor = vendor;
    }
    if let Some(serial) = request.serial_number {
        config.serial_number = serial;
    }
    config.basic_auth_user = request.basic_auth_user;
    config.basic_auth_pass = request.basic_auth_pass;

    let config_json = serde_json::to_string(&config).unwrap_or_else(|_| "{}".to_string());
    match state.engine.fleet().add_charger(config).await {
        Ok(charger) => {
            if let Err(err) = state
                .storage
                .insert_charger(None, charger.id(), "offline", &config_json)
                .await
            {
                error!(error = %err, "failed to persist charger");
            }
            Ok((StatusCode::CREATED, ApiResponse::ok(charger_view(&charger).await)))
        }
        Err(err) => Ok((StatusCode::CONFLICT, ApiResponse::err(err.to_string()))),
    }
}

async fn remove_charger(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<()>>, StatusCode> {
    match state.engine.fleet().remove(&id).await {
        Some(charger) => {
            charger.stop().await;
            Ok(ApiResponse::ok(()))
        }
        None => Err(StatusCode::NOT_FOUND),
    }
}

async fn list_scenarios(State(state): State<ApiState>) -> Json<ApiResponse<Vec<String>>> {
    match state.loader.list() {
        Ok(names) => ApiResponse::ok(names),
        Err(err) => ApiResponse::err(err.to_string()),
    }
}

async fn get_scenario(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<Json<ApiResponse<fleetsim_engine::ScenarioConfig>>, StatusCode> {
    match load_scenario(&state.loader, &name) {
        Ok(scenario) => Ok(ApiResponse::ok(scenario)),
        Err(ServerLoadError::NotFound) => Err(StatusCode::NOT_FOUND),
        Err(ServerLoadError::Other(message)) => Ok(ApiResponse::err(message)),
    }
}

/// Collapse loader errors into the two cases the handlers distinguish
enum ServerLoadError {
    NotFound,
    Other(String),
}

fn load_scenario(
    loader: &ScenarioLoader,
    name: &str,
) -> Result<fleetsim_engine::ScenarioConfig, ServerLoadError> {
    loader.load(name).map_err(|err| match err {
        fleetsim_engine::EngineError::ScenarioNotFound(_) => ServerLoadError::NotFound,
        other => ServerLoadError::Other(other.to_string()),
    })
}

async fn run_scenario(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<(StatusCode, Json<ApiResponse<serde_json::Value>>), StatusCode> {
    if state.engine.is_running() {
        return Ok((
            StatusCode::CONFLICT,
            ApiResponse::err("a scenario is already running"),
        ));
    }

    let scenario = match load_scenario(&state.loader, &name) {
        Ok(scenario) => scenario,
        Err(ServerLoadError::NotFound) => return Err(StatusCode::NOT_FOUND),
        Err(ServerLoadError::Other(message)) => {
            return Ok((StatusCode::BAD_REQUEST, ApiResponse::err(message)))
        }
    };

    let config_json =
        serde_json::to_string(&scenario).unwrap_or_else(|_| "{}".to_string());
    let simulation_id = match state
        .storage
        .insert_simulation(&scenario.name, &config_json)
        .await
    {
        Ok(id) => id,
        Err(err) => {
            error!(error = %err, "failed to persist simulation");
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    info!(scenario = %scenario.name, simulation_id, "running scenario via API");
    let engine = state.engine.clone();
    let storage = state.storage.clone();
    tokio::spawn(async move {
        let status = match engine.run_scenario(scenario).await {
            Ok(()) => "completed",
            Err(err) => {
                error!(error = %err, "scenario run failed");
                "error"
            }
        };
        if let Err(err) = storage.update_simulation_status(simulation_id, status).await {
            error!(error = %err, "failed to update simulation status");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        ApiResponse::ok(serde_json::json!({ "simulation_id": simulation_id })),
    ))
}

async fn stop_scenario(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Json<ApiResponse<()>> {
    info!(scenario = %name, "stop requested via API");
    state.engine.stop_scenario();
    ApiResponse::ok(())
}

async fn status(State(state): State<ApiState>) -> Json<ApiResponse<serde_json::Value>> {
    ApiResponse::ok(state.engine.status_summary().await)
}

async fn events(
    State(state): State<ApiState>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<ApiResponse<Vec<fleetsim_events::Event>>> {
    let limit = params
        .get("limit")
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(100);
    ApiResponse::ok(state.engine.bus().recent(limit).await)
}

/// Mirror bus events into the events table so the history survives the
/// process
pub async fn attach_persistence(state: &ApiState) {
    use fleetsim_events::topics;

    let persisted = [
        topics::CHARGER_STATUS_CHANGED,
        topics::CHARGER_STOPPED,
        topics::CHARGER_BOOT_SENT,
        topics::TRANSACTION_STARTED,
        topics::TRANSACTION_STOPPED,
        topics::SIMULATION_STARTED,
        topics::SIMULATION_STOPPED,
        topics::CHAOS_INJECTED,
        topics::FLOW_EXPECTATION_FAILED,
    ];

    for topic in persisted {
        let storage = state.storage.clone();
        state
            .engine
            .bus()
            .subscribe(topic, move |event| {
                let storage = storage.clone();
                async move {
                    let level = match event.event_type.as_str() {
                        topics::FLOW_EXPECTATION_FAILED => "warning",
                        topics::CHAOS_INJECTED => "warning",
                        _ => "info",
                    };
                    storage
                        .insert_event(
                            &event.event_type,
                            event.charger_id.as_deref(),
                            &event.data.to_string(),
                            level,
                        )
                        .await?;
                    Ok(())
                }
            })
            .await;
    }
}

/// Helper the binary uses to assemble state and serve until shutdown
pub async fn serve(state: ApiState, listen_addr: &str) -> Result<(), ServerError> {
    attach_persistence(&state).await;

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .map_err(|e| ServerError::Config(format!("cannot bind {listen_addr}: {e}")))?;
    info!(%listen_addr, "admin API listening");
    axum::serve(listener, app)
        .await
        .map_err(|e| ServerError::Config(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetsim_events::EventBus;

    async fn test_state() -> ApiState {
        let bus = Arc::new(EventBus::new());
        ApiState {
            engine: Arc::new(SimulationEngine::new(bus)),
            loader: Arc::new(ScenarioLoader::new("scenarios")),
            storage: Arc::new(Storage::connect("sqlite::memory:").await.unwrap()),
        }
    }

    #[tokio::test]
    async fn test_router_builds() {
        let _router = router(test_state().await);
    }

    #[tokio::test]
    async fn test_create_and_list_chargers() {
        let state = test_state().await;

        let request = CreateChargerRequest {
            identifier: "CP100".into(),
            csms_endpoint: "ws://localhost:9999/ocpp".into(),
            model: None,
            vendor: None,
            serial_number: None,
            connector_count: Some(2),
            basic_auth_user: None,
            basic_auth_pass: None,
        };
        let (code, body) = create_charger(State(state.clone()), Json(request.clone()))
            .await
            .unwrap();
        assert_eq!(code, StatusCode::CREATED);
        assert!(body.0.success);

        // duplicate identifier conflicts
        let (code, body) = create_charger(State(state.clone()), Json(request))
            .await
            .unwrap();
        assert_eq!(code, StatusCode::CONFLICT);
        assert!(!body.0.success);

        let listed = list_chargers(State(state.clone())).await;
        let views = listed.0.data.unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].identifier, "CP100");
        assert_eq!(views[0].status, "offline");
    }

    #[tokio::test]
    async fn test_get_unknown_charger_is_404() {
        let state = test_state().await;
        let result = get_charger(State(state), Path("CP404".into())).await;
        assert!(matches!(result, Err(StatusCode::NOT_FOUND)));
    }

    #[tokio::test]
    async fn test_stop_without_running_scenario_is_ok() {
        let state = test_state().await;
        let body = stop_scenario(State(state), Path("whatever".into())).await;
        assert!(body.0.success);
    }
}
