//! Error types for scenario loading and execution

use fleetsim_charger::ChargerError;
use thiserror::Error;

/// Errors surfaced by the scenario loader and engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// Scenario or charger config violates a structural rule; reported at
    /// load time, before any I/O
    #[error("invalid scenario: {0}")]
    ConfigInvalid(String),

    #[error("scenario not found: {0}")]
    ScenarioNotFound(String),

    #[error("a scenario is already running")]
    AlreadyRunning,

    #[error("unknown chaos strategy: {0}")]
    UnknownStrategy(String),

    #[error("unknown flow action: {0}")]
    UnknownAction(String),

    #[error("charger {0} already exists")]
    DuplicateCharger(String),

    #[error(transparent)]
    Charger(#[from] ChargerError),

    #[error("io error: {0}")]
    Io(String),

    #[error("yaml error: {0}")]
    Yaml(String),
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io(err.to_string())
    }
}

impl From<serde_yaml::Error> for EngineError {
    fn from(err: serde_yaml::Error) -> Self {
        EngineError::Yaml(err.to_string())
    }
}
