//! Scenario file loading and validation
//!
//! The loader only produces validated `ScenarioConfig` values; it never
//! executes anything.

use crate::{EngineError, ScenarioConfig};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Loads scenario documents from a directory of YAML files
pub struct ScenarioLoader {
    dir: PathBuf,
}

impl ScenarioLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load and validate a scenario by file name
    pub fn load(&self, name: &str) -> Result<ScenarioConfig, EngineError> {
        let path = self.dir.join(name);
        debug!(path = %path.display(), "loading scenario");
        let content = std::fs::read_to_string(&path)
            .map_err(|_| EngineError::ScenarioNotFound(name.to_string()))?;
        Self::load_str(&content)
    }

    /// Parse and validate a scenario from YAML text
    pub fn load_str(content: &str) -> Result<ScenarioConfig, EngineError> {
        let scenario: ScenarioConfig = serde_yaml::from_str(content)?;
        Self::validate(&scenario)?;
        Ok(scenario)
    }

    /// File names of the available scenarios (`*.yaml`, `*.yml`)
    pub fn list(&self) -> Result<Vec<String>, EngineError> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            let is_yaml = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e == "yaml" || e == "yml")
                .unwrap_or(false);
            if is_yaml {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Structural rules checked before any I/O happens
    pub fn validate(scenario: &ScenarioConfig) -> Result<(), EngineError> {
        if scenario.name.trim().is_empty() {
            return Err(EngineError::ConfigInvalid("name is required".into()));
        }
        if scenario.chargers.count < 1 {
            return Err(EngineError::ConfigInvalid(
                "chargers.count must be at least 1".into(),
            ));
        }
        if scenario.csms.endpoint.trim().is_empty() {
            return Err(EngineError::ConfigInvalid("csms.endpoint is required".into()));
        }
        if scenario.duration < 1 {
            return Err(EngineError::ConfigInvalid(
                "duration must be at least 1 second".into(),
            ));
        }
        for (i, event) in scenario.timeline.iter().enumerate() {
            if event.at > scenario.duration {
                return Err(EngineError::ConfigInvalid(format!(
                    "timeline event {i} fires at {}s, after the scenario ends at {}s",
                    event.at, scenario.duration
                )));
            }
            if event.action == crate::TimelineAction::InjectChaos && event.strategy.is_none() {
                return Err(EngineError::ConfigInvalid(format!(
                    "timeline event {i}: inject_chaos requires a strategy"
                )));
            }
            for (j, step) in event.flow.iter().enumerate() {
                if step.send.is_some() && step.wait_for.is_some() {
                    return Err(EngineError::ConfigInvalid(format!(
                        "timeline event {i} step {j}: send and wait_for are mutually exclusive"
                    )));
                }
            }
        }
        Ok(())
    }
}
