//! Fleet management: the engine's set of virtual chargers

use crate::{EngineError, ScenarioConfig, TargetSelector};
use fleetsim_charger::{ChargerConfig, VirtualCharger};
use fleetsim_events::EventBus;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Owns every charger created for a process, keyed by identifier
pub struct Fleet {
    bus: Arc<EventBus>,
    chargers: RwLock<BTreeMap<String, Arc<VirtualCharger>>>,
}

impl Fleet {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            chargers: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register a single charger built from an explicit config
    pub async fn add_charger(
        &self,
        config: ChargerConfig,
    ) -> Result<Arc<VirtualCharger>, EngineError> {
        let mut chargers = self.chargers.write().await;
        if chargers.contains_key(&config.identifier) {
            return Err(EngineError::DuplicateCharger(config.identifier));
        }
        let charger = VirtualCharger::new(config, self.bus.clone())?;
        chargers.insert(charger.id().to_string(), charger.clone());
        Ok(charger)
    }

    /// Create `count` chargers from the scenario template, continuing the
    /// deterministic `CP001..` / `SN000001..` numbering where the fleet
    /// left off so staggered growth stays collision-free
    pub async fn provision(
        &self,
        scenario: &ScenarioConfig,
        count: u32,
    ) -> Result<Vec<String>, EngineError> {
        let offset = self.chargers.read().await.len() as u32;
        let template = &scenario.chargers.template;

        let mut ids = Vec::with_capacity(count as usize);
        for i in 1..=count {
            let n = offset + i;
            let mut config = ChargerConfig::new(
                format!("CP{n:03}"),
                scenario.csms.endpoint.clone(),
                template.connectors.max(1),
            );
            config.model = template.model.clone();
            config.vendor = template.vendor.clone();
            config.serial_number = format!("SN{n:06}");
            config.ocpp_version = template.ocpp_version.clone();
            config.features = template.features.clone();
            config.custom_data = template.custom_data.clone();
            config.basic_auth_user = scenario.csms.basic_auth_user.clone();
            config.basic_auth_pass = scenario.csms.basic_auth_pass.clone();

            let charger = self.add_charger(config).await?;
            ids.push(charger.id().to_string());
        }

        info!(count, total = offset + count, "provisioned chargers");
        Ok(ids)
    }

    pub async fn get(&self, id: &str) -> Option<Arc<VirtualCharger>> {
        self.chargers.read().await.get(id).cloned()
    }

    /// Remove a charger from the fleet; the caller stops it
    pub async fn remove(&self, id: &str) -> Option<Arc<VirtualCharger>> {
        self.chargers.write().await.remove(id)
    }

    pub async fn ids(&self) -> Vec<String> {
        self.chargers.read().await.keys().cloned().collect()
    }

    pub async fn all(&self) -> Vec<Arc<VirtualCharger>> {
        self.chargers.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.chargers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.chargers.read().await.is_empty()
    }

    /// Expand a target selector against the current fleet. Unknown
    /// identifiers are reported but never abort the event; an empty
    /// selection is a valid no-op.
    pub async fn resolve(&self, targets: Option<&TargetSelector>) -> Vec<Arc<VirtualCharger>> {
        let chargers = self.chargers.read().await;
        match targets {
            None | Some(TargetSelector::All) => chargers.values().cloned().collect(),
            Some(TargetSelector::Range { from, to }) => chargers
                .range(from.clone()..=to.clone())
                .map(|(_, c)| c.clone())
                .collect(),
            Some(TargetSelector::Ids(ids)) => {
                let mut resolved = Vec::with_capacity(ids.len());
                for id in ids {
                    match chargers.get(id) {
                        Some(charger) => resolved.push(charger.clone()),
                        None => warn!(charger_id = %id, "target not in fleet"),
                    }
                }
                resolved
            }
        }
    }

    /// Stop every charger concurrently
    pub async fn stop_all(&self) {
        let chargers = self.all().await;
        let stops = chargers.iter().map(|c| c.stop());
        futures_util::future::join_all(stops).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::ScenarioLoader;

    fn scenario(count: u32) -> ScenarioConfig {
        ScenarioLoader::load_str(&format!(
            r#"
name: fleet-test
duration: 10
chargers:
  count: {count}
  template:
    connectors: 2
csms: {{ endpoint: "ws://localhost:9999/ocpp" }}
"#
        ))
        .unwrap()
    }

    fn fleet() -> Fleet {
        Fleet::new(Arc::new(EventBus::new()))
    }

    #[tokio::test]
    async fn test_provision_deterministic_naming() {
        let fleet = fleet();
        let scenario = scenario(3);

        let ids = fleet.provision(&scenario, 3).await.unwrap();
        assert_eq!(ids, vec!["CP001", "CP002", "CP003"]);

        let charger = fleet.get("CP002").await.unwrap();
        assert_eq!(charger.config().serial_number, "SN000002");
        assert_eq!(charger.config().connector_count, 2);
    }

    #[tokio::test]
    async fn test_staggered_growth_continues_numbering() {
        let fleet = fleet();
        let scenario = scenario(4);

        fleet.provision(&scenario, 2).await.unwrap();
        let more = fleet.provision(&scenario, 2).await.unwrap();
        assert_eq!(more, vec!["CP003", "CP004"]);
        assert_eq!(fleet.len().await, 4);
    }

    #[tokio::test]
    async fn test_duplicate_charger_rejected() {
        let fleet = fleet();
        let config = ChargerConfig::new("CP001", "ws://localhost:9999/ocpp", 1);
        fleet.add_charger(config.clone()).await.unwrap();

        let err = fleet.add_charger(config).await.unwrap_err();
        assert!(matches!(err, EngineError::DuplicateCharger(_)));
    }

    #[tokio::test]
    async fn test_target_resolution() {
        let fleet = fleet();
        fleet.provision(&scenario(5), 5).await.unwrap();

        let all = fleet.resolve(Some(&TargetSelector::All)).await;
        assert_eq!(all.len(), 5);

        let range = fleet
            .resolve(Some(&TargetSelector::Range {
                from: "CP002".into(),
                to: "CP004".into(),
            }))
            .await;
        let ids: Vec<&str> = range.iter().map(|c| c.id()).collect();
        assert_eq!(ids, vec!["CP002", "CP003", "CP004"]);

        let picked = fleet
            .resolve(Some(&TargetSelector::Ids(vec![
                "CP001".into(),
                "CP999".into(), // unknown: reported, not fatal
            ])))
            .await;
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].id(), "CP001");
    }

    #[tokio::test]
    async fn test_empty_targets_resolve_to_empty_set() {
        let fleet = fleet();
        fleet.provision(&scenario(2), 2).await.unwrap();

        let none = fleet.resolve(Some(&TargetSelector::Ids(vec![]))).await;
        assert!(none.is_empty());
    }
}
