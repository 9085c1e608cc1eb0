use predicates::str::{contains, starts_with};
use std::fs;
use std::time::{SystemTime, UNIX_EPOCH};

fn write_temp_config(contents: &str, extension: &str) -> std::path::PathBuf {
    let mut path = std::env::temp_dir();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time should be available")
        .as_nanos();
    path.push(format!("infra-sim-config-{}.{}", nanos, extension));
    fs::write(&path, contents).expect("config write should succeed");
    path
}

const TOML_DESIGN: &str = r#"
[[graph.nodes]]
id = "web"
type = "client"
requestsPerSecond = 200.0

[[graph.nodes]]
id = "lb"
type = "load_balancer"

[[graph.nodes]]
id = "api-a"
type = "app_server"

[[graph.nodes]]
id = "api-b"
type = "app_server"

[[graph.nodes]]
id = "db"
type = "database_sql"

[[graph.edges]]
id = "e1"
sourceId = "web"
targetId = "lb"

[[graph.edges]]
id = "e2"
sourceId = "lb"
targetId = "api-a"

[[graph.edges]]
id = "e3"
sourceId = "lb"
targetId = "api-b"

[[graph.edges]]
id = "e4"
sourceId = "api-a"
targetId = "db"
protocol = "tcp"

[[graph.edges]]
id = "e5"
sourceId = "api-b"
targetId = "db"
protocol = "tcp"

[[scenarios]]
name = "steady"
arrival = 800.0

[settings]
seed = 3
latencySamples = 500
"#;

const JSON_DESIGN: &str = r#"{
  "graph": {
    "nodes": [
      {"id": "web", "type": "client", "requestsPerSecond": 200.0},
      {"id": "lb", "type": "load_balancer"},
      {"id": "api-a", "type": "app_server"},
      {"id": "api-b", "type": "app_server"},
      {"id": "db", "type": "database_sql"}
    ],
    "edges": [
      {"id": "e1", "sourceId": "web", "targetId": "lb"},
      {"id": "e2", "sourceId": "lb", "targetId": "api-a"},
      {"id": "e3", "sourceId": "lb", "targetId": "api-b"},
      {"id": "e4", "sourceId": "api-a", "targetId": "db", "protocol": "tcp"},
      {"id": "e5", "sourceId": "api-b", "targetId": "db", "protocol": "tcp"}
    ]
  },
  "scenarios": [{"name": "steady", "arrival": 800.0}],
  "settings": {"seed": 3, "latencySamples": 500}
}"#;

fn run_summary(path: &std::path::Path) -> Vec<u8> {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("infra-sim");
    cmd.args(["run", path.to_str().unwrap(), "--format", "summary"]);
    let output = cmd.output().expect("binary should run");
    assert!(output.status.success());
    output.stdout
}

#[test]
fn toml_and_json_configs_agree() {
    let toml_path = write_temp_config(TOML_DESIGN, "toml");
    let json_path = write_temp_config(JSON_DESIGN, "json");
    assert_eq!(run_summary(&toml_path), run_summary(&json_path));
}

#[test]
fn redundant_design_has_no_spofs_except_the_balancer() {
    let path = write_temp_config(TOML_DESIGN, "toml");
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("infra-sim");
    cmd.args(["run", path.to_str().unwrap(), "--format", "summary"]);
    cmd.assert()
        .success()
        .stdout(starts_with("steady: PASS score=100 rps=800.00"))
        .stdout(contains("spofs: lb\n"));
}

#[test]
fn json_output_is_machine_readable() {
    let path = write_temp_config(TOML_DESIGN, "toml");
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("infra-sim");
    cmd.args(["run", path.to_str().unwrap(), "--format", "json"]);
    let output = cmd.output().expect("binary should run");
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let scenario = &json["scenarios"][0];
    assert_eq!(scenario["name"], "steady");
    assert_eq!(scenario["metrics"]["rps"], 800.0);
    assert_eq!(scenario["metrics"]["errorRate"], 0.0);
    assert_eq!(scenario["nodes"].as_array().unwrap().len(), 5);
    assert_eq!(json["spofDiagnostics"][0]["nodeId"], "lb");
    assert_eq!(json["spofDiagnostics"][0]["kind"], "single_point_of_failure");
}

#[test]
fn live_json_emits_one_frame_per_line() {
    let path = write_temp_config(JSON_DESIGN, "json");
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("infra-sim");
    cmd.args([
        "live",
        path.to_str().unwrap(),
        "--ticks",
        "20",
        "--every",
        "5",
        "--format",
        "json",
    ]);
    let output = cmd.output().expect("binary should run");
    assert!(output.status.success());

    let frames: Vec<serde_json::Value> = String::from_utf8(output.stdout)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    let ticks: Vec<u64> = frames
        .iter()
        .filter(|frame| frame["type"] == "tick")
        .map(|frame| frame["tick"].as_u64().unwrap())
        .collect();
    assert_eq!(ticks, vec![5, 10, 15, 20]);
    assert!(frames.iter().all(|frame| frame["epoch"] == 1));
}

#[test]
fn live_summary_reports_final_tick() {
    let path = write_temp_config(TOML_DESIGN, "toml");
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("infra-sim");
    cmd.args(["live", path.to_str().unwrap(), "--ticks", "40", "--format", "summary"]);
    cmd.assert()
        .success()
        .stdout(starts_with("ticks=40 rps="))
        .stdout(contains("rejected=0\n"));
}
