//! Scenario document model
//!
//! Mirrors the YAML scenario format: a charger template, a CSMS block and a
//! timeline of actions. Delay and repeat expressions are parsed into a
//! typed form at load time, never re-parsed during execution.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A complete declarative scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: String,
    /// Total scenario wall time in seconds
    pub duration: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub chargers: FleetSpec,
    pub csms: CsmsSpec,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub timeline: Vec<TimelineEvent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chaos_strategies: Vec<ChaosStrategySpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expectations: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitoring: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_profile: Option<serde_json::Value>,
}

/// How many chargers to create and from what template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetSpec {
    pub count: u32,
    #[serde(default)]
    pub template: ChargerTemplate,
}

/// Per-charger template applied to every provisioned charger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargerTemplate {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_vendor")]
    pub vendor: String,
    #[serde(default = "default_connectors")]
    pub connectors: u32,
    #[serde(default = "default_ocpp_version")]
    pub ocpp_version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub custom_data: HashMap<String, String>,
}

fn default_model() -> String {
    "FS-1000".to_string()
}
fn default_vendor() -> String {
    "Fleetsim".to_string()
}
fn default_connectors() -> u32 {
    1
}
fn default_ocpp_version() -> String {
    "1.6".to_string()
}

impl Default for ChargerTemplate {
    fn default() -> Self {
        Self {
            model: default_model(),
            vendor: default_vendor(),
            connectors: default_connectors(),
            ocpp_version: default_ocpp_version(),
            features: Vec::new(),
            custom_data: HashMap::new(),
        }
    }
}

/// CSMS connection block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsmsSpec {
    pub endpoint: String,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic_auth_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic_auth_pass: Option<String>,
}

fn default_protocol() -> String {
    "ocpp1.6".to_string()
}

/// One timeline action at an offset from scenario start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    /// Seconds from scenario start
    pub at: u64,
    pub action: TimelineAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<TargetSelector>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub params: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flow: Vec<MessageStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
}

/// Timeline actions the engine understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineAction {
    CreateChargers,
    StartNormalFlow,
    StartFlow,
    InjectChaos,
}

/// Which chargers an event addresses
#[derive(Debug, Clone, PartialEq)]
pub enum TargetSelector {
    /// The entire fleet
    All,
    /// Contiguous identifier range, inclusive
    Range { from: String, to: String },
    /// Explicit identifier list
    Ids(Vec<String>),
}

impl Serialize for TargetSelector {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            TargetSelector::All => serializer.serialize_str("all"),
            TargetSelector::Range { from, to } => {
                use serde::ser::SerializeMap;
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("from", from)?;
                map.serialize_entry("to", to)?;
                map.end()
            }
            TargetSelector::Ids(ids) => ids.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for TargetSelector {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            One(String),
            Many(Vec<String>),
            Range { from: String, to: String },
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::One(s) if s.eq_ignore_ascii_case("all") => TargetSelector::All,
            Raw::One(s) => TargetSelector::Ids(vec![s]),
            Raw::Many(ids) => TargetSelector::Ids(ids),
            Raw::Range { from, to } => TargetSelector::Range { from, to },
        })
    }
}

/// One step of a message flow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageStep {
    /// Action to send, mapped to a charger operation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send: Option<String>,
    /// Inbound action to wait for instead of sending
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_for: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub params: HashMap<String, serde_json::Value>,
    /// Dotted-path predicates evaluated against the response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expect: Option<HashMap<String, serde_json::Value>>,
    /// Pause after the step, seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<RandExpr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat: Option<RepeatSpec>,
    /// Response or wait deadline, seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

/// Repetition wrapper: either `count` iterations or loop for `duration`
/// seconds, spaced by `interval`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepeatSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<RandExpr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<RandExpr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

/// A number in the scenario file: a literal or `random(a,b)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RandExpr {
    Fixed(u64),
    Uniform(u64, u64),
}

impl RandExpr {
    pub fn sample(&self) -> u64 {
        match self {
            RandExpr::Fixed(n) => *n,
            RandExpr::Uniform(a, b) => {
                use rand::Rng;
                let (low, high) = if a <= b { (*a, *b) } else { (*b, *a) };
                rand::thread_rng().gen_range(low..=high)
            }
        }
    }
}

impl std::str::FromStr for RandExpr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(n) = s.parse::<u64>() {
            return Ok(RandExpr::Fixed(n));
        }
        let inner = s
            .strip_prefix("random(")
            .and_then(|rest| rest.strip_suffix(')'))
            .ok_or_else(|| format!("expected integer or random(a,b), got '{s}'"))?;
        let (a, b) = inner
            .split_once(',')
            .ok_or_else(|| format!("random() takes two arguments, got '{inner}'"))?;
        let a = a.trim().parse::<u64>().map_err(|e| e.to_string())?;
        let b = b.trim().parse::<u64>().map_err(|e| e.to_string())?;
        Ok(RandExpr::Uniform(a, b))
    }
}

impl Serialize for RandExpr {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RandExpr::Fixed(n) => serializer.serialize_u64(*n),
            RandExpr::Uniform(a, b) => serializer.serialize_str(&format!("random({a},{b})")),
        }
    }
}

impl<'de> Deserialize<'de> for RandExpr {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Num(u64),
            Expr(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Num(n) => Ok(RandExpr::Fixed(n)),
            Raw::Expr(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Named chaos strategy declaration, carried through from the document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChaosStrategySpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub implementation: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub configurable: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rand_expr_parse() {
        assert_eq!("5".parse::<RandExpr>().unwrap(), RandExpr::Fixed(5));
        assert_eq!(
            "random(1,5)".parse::<RandExpr>().unwrap(),
            RandExpr::Uniform(1, 5)
        );
        assert_eq!(
            "random( 2 , 8 )".parse::<RandExpr>().unwrap(),
            RandExpr::Uniform(2, 8)
        );
        assert!("random(1)".parse::<RandExpr>().is_err());
        assert!("sometimes(1,2)".parse::<RandExpr>().is_err());
    }

    #[test]
    fn test_rand_expr_sample_bounds() {
        assert_eq!(RandExpr::Fixed(7).sample(), 7);
        for _ in 0..100 {
            let v = RandExpr::Uniform(2, 5).sample();
            assert!((2..=5).contains(&v));
        }
        // reversed bounds are tolerated
        let v = RandExpr::Uniform(5, 2).sample();
        assert!((2..=5).contains(&v));
    }

    #[test]
    fn test_rand_expr_serde_round_trip() {
        for expr in [RandExpr::Fixed(3), RandExpr::Uniform(1, 9)] {
            let yaml = serde_yaml::to_string(&expr).unwrap();
            let back: RandExpr = serde_yaml::from_str(&yaml).unwrap();
            assert_eq!(back, expr);
        }
    }

    #[test]
    fn test_target_selector_forms() {
        let all: TargetSelector = serde_yaml::from_str("all").unwrap();
        assert_eq!(all, TargetSelector::All);

        let one: TargetSelector = serde_yaml::from_str("CP001").unwrap();
        assert_eq!(one, TargetSelector::Ids(vec!["CP001".to_string()]));

        let many: TargetSelector = serde_yaml::from_str("[CP001, CP002]").unwrap();
        assert_eq!(
            many,
            TargetSelector::Ids(vec!["CP001".to_string(), "CP002".to_string()])
        );

        let range: TargetSelector = serde_yaml::from_str("{from: CP001, to: CP005}").unwrap();
        assert_eq!(
            range,
            TargetSelector::Range {
                from: "CP001".to_string(),
                to: "CP005".to_string()
            }
        );
    }

    #[test]
    fn test_scenario_round_trip() {
        let yaml = r#"
name: boot-storm
description: everyone boots at once
version: "1.0"
duration: 60
chargers:
  count: 10
  template:
    model: FS-1000
    vendor: Fleetsim
    connectors: 2
    ocpp_version: "1.6"
csms:
  endpoint: ws://localhost:9000/ocpp
  protocol: ocpp1.6
timeline:
  - at: 0
    action: create_chargers
  - at: 2
    action: start_normal_flow
    targets: all
  - at: 10
    action: start_flow
    targets: [CP001, CP002]
    flow:
      - send: Heartbeat
        repeat:
          count: 3
          interval: 1
        delay: random(1,5)
  - at: 30
    action: inject_chaos
    strategy: drop_connection
    targets: {from: CP001, to: CP003}
"#;
        let scenario: ScenarioConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(scenario.name, "boot-storm");
        assert_eq!(scenario.timeline.len(), 4);
        assert_eq!(scenario.timeline[1].action, TimelineAction::StartNormalFlow);

        let step = &scenario.timeline[2].flow[0];
        assert_eq!(step.send.as_deref(), Some("Heartbeat"));
        assert_eq!(step.repeat.as_ref().unwrap().count, Some(RandExpr::Fixed(3)));
        assert_eq!(step.delay, Some(RandExpr::Uniform(1, 5)));

        // serialize -> parse -> identical value
        let serialized = serde_yaml::to_string(&scenario).unwrap();
        let reparsed: ScenarioConfig = serde_yaml::from_str(&serialized).unwrap();
        assert_eq!(reparsed, scenario);
    }

    #[test]
    fn test_unknown_action_rejected() {
        let yaml = r#"
name: bad
duration: 10
chargers: { count: 1 }
csms: { endpoint: ws://x/ocpp }
timeline:
  - at: 0
    action: explode_chargers
"#;
        assert!(serde_yaml::from_str::<ScenarioConfig>(yaml).is_err());
    }
}
