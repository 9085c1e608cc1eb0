use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::capacity::LoadThresholds;
use crate::error::{Error, Result};
use crate::models::{Graph, Scenario};

/// Tunables shared by the batch and live engines.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    /// Seed for latency sampling and live tie-breaks.
    pub seed: u64,
    pub latency_samples: usize,
    /// Milliseconds of added edge latency at 100% source utilization.
    pub congestion_factor_ms: f64,
    pub thresholds: LoadThresholds,
    pub max_path_depth: usize,
    pub path_probability_floor: f64,
    pub max_paths: usize,
    pub live: LiveSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            seed: 42,
            latency_samples: 2_000,
            congestion_factor_ms: 20.0,
            thresholds: LoadThresholds::default(),
            max_path_depth: 24,
            path_probability_floor: 1e-9,
            max_paths: 10_000,
            live: LiveSettings::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct LiveSettings {
    /// Wall-clock cadence of the worker while running. One tick simulates this
    /// many milliseconds at speed 1.
    pub tick_interval_ms: u64,
    /// Hop latency covered per tick at speed 1.
    pub travel_rate_ms: f64,
    pub ema_alpha: f64,
    pub circuit_cooldown_ticks: u32,
    pub metrics_window_ticks: usize,
    pub max_particles_per_spawn: u32,
    pub default_client_rps: f64,
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 50,
            travel_rate_ms: 5.0,
            ema_alpha: 0.3,
            circuit_cooldown_ticks: 20,
            metrics_window_ticks: 40,
            max_particles_per_spawn: 4,
            default_client_rps: 100.0,
        }
    }
}

impl LiveSettings {
    pub fn simulated_seconds(&self, speed: f64) -> f64 {
        self.tick_interval_ms as f64 / 1000.0 * speed
    }
}

/// A design plus the scenarios to run against it, as stored on disk.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SimFile {
    pub graph: Graph,
    #[serde(default)]
    pub scenarios: Vec<Scenario>,
    #[serde(default)]
    pub settings: EngineSettings,
}

pub fn load_config(path: &Path) -> Result<SimFile> {
    let contents = fs::read_to_string(path).map_err(|err| {
        Error::ConfigIo(format!(
            "failed to read config '{}': {}",
            path.display(),
            err
        ))
    })?;
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .unwrap_or("");

    match ext {
        "toml" => parse_toml(&contents),
        "json" => parse_json(&contents),
        "" => Err(Error::UnsupportedConfigFormat("unknown".to_string())),
        _ => Err(Error::UnsupportedConfigFormat(ext.to_string())),
    }
}

pub fn parse_toml(contents: &str) -> Result<SimFile> {
    toml::from_str(contents)
        .map_err(|err| Error::ConfigParse(format!("failed to parse TOML: {}", err)))
}

pub fn parse_json(contents: &str) -> Result<SimFile> {
    serde_json::from_str(contents)
        .map_err(|err| Error::ConfigParse(format!("failed to parse JSON: {}", err)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ArrivalRate, ComponentType, Protocol};

    #[test]
    fn toml_file_parses_graph_and_scenarios() {
        let file = parse_toml(
            r#"
[[graph.nodes]]
id = "web"
type = "client"

[[graph.nodes]]
id = "api"
type = "app_server"
scaling = { instances = 2, perInstanceCapacityRps = 300.0 }

[[graph.nodes]]
id = "db"
type = "database_sql"

[[graph.edges]]
id = "e1"
sourceId = "web"
targetId = "api"

[[graph.edges]]
id = "e2"
sourceId = "api"
targetId = "db"
protocol = "tcp"

[[scenarios]]
name = "steady"
arrival = 400.0
thresholds = { maxErrorRate = 0.01 }

[settings]
seed = 7
"#,
        )
        .unwrap();

        assert_eq!(file.graph.nodes.len(), 3);
        assert_eq!(file.graph.nodes[1].component_type(), ComponentType::AppServer);
        assert_eq!(
            file.graph.nodes[1].config.scaling().unwrap().instances,
            2
        );
        assert_eq!(file.graph.edges[1].protocol, Protocol::Tcp);
        assert_eq!(file.scenarios[0].arrival, ArrivalRate::Aggregate(400.0));
        assert_eq!(file.scenarios[0].thresholds.max_error_rate, Some(0.01));
        assert_eq!(file.settings.seed, 7);
        assert_eq!(file.settings.latency_samples, 2_000);
    }

    #[test]
    fn json_file_uses_defaults_for_missing_sections() {
        let file = parse_json(
            r#"{"graph": {"nodes": [{"id": "c", "type": "client"}], "edges": []}}"#,
        )
        .unwrap();
        assert!(file.scenarios.is_empty());
        assert_eq!(file.settings, EngineSettings::default());
    }

    #[test]
    fn unknown_component_type_is_a_parse_error() {
        let err = parse_json(r#"{"graph": {"nodes": [{"id": "c", "type": "mainframe"}]}}"#)
            .unwrap_err();
        assert!(err.to_string().starts_with("failed to parse JSON"));
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let mut path = std::env::temp_dir();
        path.push("infra-sim-config-test.yaml");
        fs::write(&path, "graph: {}").unwrap();
        let err = load_config(&path).unwrap_err();
        assert_eq!(err.to_string(), "unsupported config format 'yaml'");
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn simulated_seconds_scale_with_speed() {
        let live = LiveSettings::default();
        assert!((live.simulated_seconds(1.0) - 0.05).abs() < 1e-12);
        assert!((live.simulated_seconds(2.0) - 0.1).abs() < 1e-12);
    }
}
