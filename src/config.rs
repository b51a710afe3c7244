//! TOML-based controller configuration and preset communities.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::flow::ROOT_ID;

/// Top-level controller configuration parsed from TOML.
///
/// Every table is optional. Load from TOML with
/// [`ControllerConfig::from_toml_file`] or start from a preset with
/// [`ControllerConfig::from_preset`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControllerConfig {
    /// Round timing and allocation algorithm.
    #[serde(default)]
    pub controller: ControllerSettings,
    /// Automaton description files.
    #[serde(default)]
    pub automata: AutomataConfig,
    /// Sensors of the community, in any order.
    #[serde(default, rename = "sensor")]
    pub sensors: Vec<SensorConfig>,
    /// PV installations.
    #[serde(default, rename = "pv")]
    pub pvs: Vec<ComponentConfig>,
    /// EV chargers.
    #[serde(default, rename = "charger")]
    pub chargers: Vec<ComponentConfig>,
    /// Limit updates from the grid operator, keyed by round.
    #[serde(default)]
    pub sensor_limits: Vec<SensorLimitsConfig>,
}

/// Round timing and allocation algorithm.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerSettings {
    /// `"hierarchical"` or `"equal"`.
    pub algorithm: String,
    /// Time between two rounds (must be > 0).
    pub period_ms: u64,
    /// How long a round waits for demand updates before calculating.
    pub wait_time_for_inputs_ms: u64,
    /// Rounds the demo binary runs before shutting down.
    pub rounds: usize,
    /// Seed for the supervisor tie-break. Unseeded when absent.
    pub seed: Option<u64>,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            algorithm: "hierarchical".to_string(),
            period_ms: 1000,
            wait_time_for_inputs_ms: 100,
            rounds: 3,
            seed: None,
        }
    }
}

/// Automaton description files. Empty uses the built-in automata.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AutomataConfig {
    pub paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SensorConfig {
    pub id: String,
    /// Parent sensor. Top-level sensors hang off the community root.
    #[serde(default)]
    pub parent: Option<String>,
    /// Absolute cap on the flow. Unlimited when absent.
    #[serde(default)]
    pub limit: Option<f64>,
}

/// A PV or charger with its demand profile.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComponentConfig {
    pub id: String,
    pub sensor: String,
    /// Demand per round. Rounds past the end wrap around.
    pub demand: Vec<f64>,
}

impl ComponentConfig {
    /// Demand for a round, cycling through the profile.
    pub fn demand_at(&self, round: usize) -> f64 {
        if self.demand.is_empty() {
            return 0.0;
        }
        self.demand[round % self.demand.len()]
    }
}

/// A limit update delivered before `round` starts.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SensorLimitsConfig {
    pub round: usize,
    pub limits: HashMap<String, f64>,
}

/// Configuration error with field path and constraint description.
#[derive(Debug)]
pub struct ConfigError {
    /// Dotted field path (e.g., `"controller.period_ms"`).
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "config error: {}: {}", self.field, self.message)
    }
}

impl std::error::Error for ConfigError {}

fn sensor(id: &str, parent: Option<&str>, limit: Option<f64>) -> SensorConfig {
    SensorConfig {
        id: id.to_string(),
        parent: parent.map(str::to_string),
        limit,
    }
}

fn component(id: &str, sensor: &str, demand: &[f64]) -> ComponentConfig {
    ComponentConfig {
        id: id.to_string(),
        sensor: sensor.to_string(),
        demand: demand.to_vec(),
    }
}

impl ControllerConfig {
    /// A solar field, a household and a parking lot side by side.
    pub fn demo() -> Self {
        Self {
            controller: ControllerSettings::default(),
            automata: AutomataConfig::default(),
            sensors: vec![
                sensor("solar-field", None, Some(4.0)),
                sensor("household", None, Some(20.0)),
                sensor("parking", None, Some(4.0)),
            ],
            pvs: vec![
                component("pv-1", "solar-field", &[5.0, 3.0, 1.0]),
                component("pv-2", "solar-field", &[5.0, 3.0, 1.0]),
                component("pv-roof", "household", &[1.0, 2.0, 0.5]),
            ],
            chargers: vec![
                component("wallbox", "household", &[1.0, 1.0, 3.0]),
                component("ev-1", "parking", &[5.0, 5.0, 5.0]),
                component("ev-2", "parking", &[5.0, 0.0, 5.0]),
            ],
            sensor_limits: Vec::new(),
        }
    }

    /// Two nested feeders whose limits the grid operator tightens after the
    /// first round.
    pub fn constrained() -> Self {
        Self {
            controller: ControllerSettings {
                rounds: 4,
                ..ControllerSettings::default()
            },
            automata: AutomataConfig::default(),
            sensors: vec![
                sensor("feeder", None, Some(6.0)),
                sensor("street-a", Some("feeder"), Some(3.0)),
                sensor("street-b", Some("feeder"), None),
                sensor("solar-park", None, Some(8.0)),
            ],
            pvs: vec![
                component("pv-a", "street-a", &[2.0, 4.0]),
                component("pv-park-1", "solar-park", &[6.0, 2.0]),
                component("pv-park-2", "solar-park", &[6.0, 2.0]),
            ],
            chargers: vec![
                component("ev-a1", "street-a", &[3.0]),
                component("ev-a2", "street-a", &[1.0, 3.0]),
                component("ev-b1", "street-b", &[4.0, 2.0]),
                component("ev-b2", "street-b", &[4.0]),
            ],
            sensor_limits: vec![SensorLimitsConfig {
                round: 1,
                limits: HashMap::from([
                    ("feeder".to_string(), 4.0),
                    ("street-a".to_string(), 2.0),
                    ("street-b".to_string(), 3.0),
                    ("solar-park".to_string(), 5.0),
                ]),
            }],
        }
    }

    /// Available preset names.
    pub const PRESETS: &[&str] = &["demo", "constrained"];

    /// Loads a configuration from a named preset.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the preset name is unknown.
    pub fn from_preset(name: &str) -> Result<Self, ConfigError> {
        match name {
            "demo" => Ok(Self::demo()),
            "constrained" => Ok(Self::constrained()),
            _ => Err(ConfigError {
                field: "preset".to_string(),
                message: format!(
                    "unknown preset \"{name}\", available: {}",
                    Self::PRESETS.join(", ")
                ),
            }),
        }
    }

    /// Parses a configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError {
            field: "scenario".to_string(),
            message: format!("cannot read \"{}\": {e}", path.display()),
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses a configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError {
            field: "toml".to_string(),
            message: e.to_string(),
        })
    }

    pub fn period(&self) -> Duration {
        Duration::from_millis(self.controller.period_ms)
    }

    pub fn wait_time_for_inputs(&self) -> Duration {
        Duration::from_millis(self.controller.wait_time_for_inputs_ms)
    }

    /// Demand of every component for one round.
    pub fn demands_for_round(&self, round: usize) -> HashMap<String, f64> {
        self.pvs
            .iter()
            .chain(&self.chargers)
            .map(|c| (c.id.clone(), c.demand_at(round)))
            .collect()
    }

    /// The limit update scheduled before `round`, if any.
    pub fn limits_for_round(&self, round: usize) -> Option<&HashMap<String, f64>> {
        self.sensor_limits
            .iter()
            .find(|u| u.round == round)
            .map(|u| &u.limits)
    }

    /// Validates all fields and returns a list of errors.
    ///
    /// Returns an empty vector if configuration is valid.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let c = &self.controller;

        if c.period_ms == 0 {
            errors.push(ConfigError {
                field: "controller.period_ms".into(),
                message: "must be > 0".into(),
            });
        }
        if c.algorithm != "hierarchical" && c.algorithm != "equal" {
            errors.push(ConfigError {
                field: "controller.algorithm".into(),
                message: format!(
                    "must be \"hierarchical\" or \"equal\", got \"{}\"",
                    c.algorithm
                ),
            });
        }

        let mut sensor_ids = HashSet::new();
        for s in &self.sensors {
            if s.id == ROOT_ID {
                errors.push(ConfigError {
                    field: "sensor.id".into(),
                    message: format!("\"{ROOT_ID}\" is reserved"),
                });
            }
            if !sensor_ids.insert(s.id.as_str()) {
                errors.push(ConfigError {
                    field: "sensor.id".into(),
                    message: format!("duplicate sensor \"{}\"", s.id),
                });
            }
            if s.limit.is_some_and(|l| l.is_nan() || l < 0.0) {
                errors.push(ConfigError {
                    field: format!("sensor.{}.limit", s.id),
                    message: "must be >= 0".into(),
                });
            }
        }
        for s in &self.sensors {
            let Some(parent) = &s.parent else { continue };
            if !sensor_ids.contains(parent.as_str()) {
                errors.push(ConfigError {
                    field: format!("sensor.{}.parent", s.id),
                    message: format!("unknown sensor \"{parent}\""),
                });
            }
        }
        if let Some(id) = self.first_cycle() {
            errors.push(ConfigError {
                field: format!("sensor.{id}.parent"),
                message: "parents form a cycle".into(),
            });
        }

        let mut component_ids = HashSet::new();
        for (table, list) in [("pv", &self.pvs), ("charger", &self.chargers)] {
            for comp in list {
                if !component_ids.insert(comp.id.as_str()) {
                    errors.push(ConfigError {
                        field: format!("{table}.id"),
                        message: format!("duplicate component \"{}\"", comp.id),
                    });
                }
                if !sensor_ids.contains(comp.sensor.as_str()) {
                    errors.push(ConfigError {
                        field: format!("{table}.{}.sensor", comp.id),
                        message: format!("unknown sensor \"{}\"", comp.sensor),
                    });
                }
                if comp.demand.is_empty() {
                    errors.push(ConfigError {
                        field: format!("{table}.{}.demand", comp.id),
                        message: "must not be empty".into(),
                    });
                }
                if comp.demand.iter().any(|d| d.is_nan() || *d < 0.0) {
                    errors.push(ConfigError {
                        field: format!("{table}.{}.demand", comp.id),
                        message: "must be >= 0".into(),
                    });
                }
            }
        }

        for update in &self.sensor_limits {
            for (id, limit) in &update.limits {
                if !sensor_ids.contains(id.as_str()) {
                    errors.push(ConfigError {
                        field: format!("sensor_limits.{}", update.round),
                        message: format!("unknown sensor \"{id}\""),
                    });
                }
                if limit.is_nan() || *limit < 0.0 {
                    errors.push(ConfigError {
                        field: format!("sensor_limits.{}.{id}", update.round),
                        message: "must be >= 0".into(),
                    });
                }
            }
        }

        errors
    }

    /// First sensor, in declaration order, whose parent chain loops.
    fn first_cycle(&self) -> Option<&str> {
        let parents: HashMap<&str, &str> = self
            .sensors
            .iter()
            .filter_map(|s| s.parent.as_deref().map(|p| (s.id.as_str(), p)))
            .collect();
        self.sensors.iter().map(|s| s.id.as_str()).find(|start| {
            let mut current = *start;
            for _ in 0..=parents.len() {
                match parents.get(current) {
                    Some(&parent) if parent == *start => return true,
                    Some(&parent) => current = parent,
                    None => return false,
                }
            }
            false
        })
    }
}
