//! # Fleetsim Server
//!
//! The external collaborators around the simulation core: application
//! configuration, relational persistence of runs and events, and the
//! administrative HTTP interface.

pub mod api;
pub mod config;
pub mod storage;

pub use api::{ApiState, router, serve};
pub use config::AppConfig;
pub use storage::Storage;

use thiserror::Error;

/// Errors surfaced by the server layer
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Engine(#[from] fleetsim_engine::EngineError),
}
