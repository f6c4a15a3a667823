//! # Fleetsim Engine
//!
//! Scenario-driven fleet orchestration: parse a declarative YAML scenario,
//! provision a fleet of virtual chargers, execute the timeline (normal
//! flows, message flows, chaos injection), and enforce the scenario
//! deadline.

pub mod chaos;
pub mod engine;
pub mod error;
pub mod fleet;
pub mod loader;
pub mod scenario;

pub use engine::SimulationEngine;
pub use error::EngineError;
pub use fleet::Fleet;
pub use loader::ScenarioLoader;
pub use scenario::{
    ChaosStrategySpec, ChargerTemplate, CsmsSpec, FleetSpec, MessageStep, RandExpr, RepeatSpec,
    ScenarioConfig, TargetSelector, TimelineAction, TimelineEvent,
};
