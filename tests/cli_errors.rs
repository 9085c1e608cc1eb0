use predicates::str::contains;
use std::fs;
use std::time::{SystemTime, UNIX_EPOCH};

fn write_temp_config(contents: &str, extension: &str) -> std::path::PathBuf {
    let mut path = std::env::temp_dir();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time should be available")
        .as_nanos();
    path.push(format!("infra-sim-errors-{}.{}", nanos, extension));
    fs::write(&path, contents).expect("config write should succeed");
    path
}

const NO_SCENARIOS: &str = r#"
[[graph.nodes]]
id = "web"
type = "client"

[[graph.nodes]]
id = "api"
type = "app_server"

[[graph.edges]]
id = "e1"
sourceId = "web"
targetId = "api"
"#;

#[test]
fn missing_config_fails() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("infra-sim");
    cmd.args(["run", "does-not-exist.toml"]);
    cmd.assert()
        .failure()
        .stderr(contains("Error: failed to read config 'does-not-exist.toml'"));
}

#[test]
fn unsupported_extension_fails() {
    let path = write_temp_config("graph: {}", "yaml");
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("infra-sim");
    cmd.args(["validate", path.to_str().unwrap()]);
    cmd.assert()
        .failure()
        .stderr(contains("Error: unsupported config format 'yaml'"));
}

#[test]
fn graph_without_client_fails_validation() {
    let config = r#"
[[graph.nodes]]
id = "api"
type = "app_server"
"#;
    let path = write_temp_config(config, "toml");
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("infra-sim");
    cmd.args(["validate", path.to_str().unwrap()]);
    cmd.assert()
        .failure()
        .stderr(contains("Error: graph has no entry nodes: add at least one client"));
}

#[test]
fn dangling_edge_fails() {
    let config = r#"
[[graph.nodes]]
id = "web"
type = "client"

[[graph.edges]]
id = "e1"
sourceId = "web"
targetId = "ghost"
"#;
    let path = write_temp_config(config, "toml");
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("infra-sim");
    cmd.args(["run", path.to_str().unwrap(), "--rps", "10"]);
    cmd.assert()
        .failure()
        .stderr(contains("Error: edge 'e1' references missing node 'ghost'"));
}

#[test]
fn config_without_scenarios_needs_rps() {
    let path = write_temp_config(NO_SCENARIOS, "toml");
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("infra-sim");
    cmd.args(["run", path.to_str().unwrap()]);
    cmd.assert()
        .failure()
        .stderr(contains("Error: no scenarios to run"));
}

#[test]
fn negative_rate_fails() {
    let path = write_temp_config(NO_SCENARIOS, "toml");
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("infra-sim");
    cmd.args(["run", path.to_str().unwrap(), "--rps=-5"]);
    cmd.assert()
        .failure()
        .stderr(contains("Error: scenario 'ad-hoc' has invalid arrival rate -5"));
}

#[test]
fn unknown_scenario_entry_fails() {
    let config = format!(
        "{}\n[[scenarios]]\nname = \"split\"\narrival = {{ mobile = 10.0 }}\n",
        NO_SCENARIOS
    );
    let path = write_temp_config(&config, "toml");
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("infra-sim");
    cmd.args(["run", path.to_str().unwrap()]);
    cmd.assert().failure().stderr(contains(
        "Error: scenario 'split' references unknown entry node 'mobile'",
    ));
}

#[test]
fn invalid_live_speed_is_reported_not_fatal() {
    let path = write_temp_config(NO_SCENARIOS, "toml");
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("infra-sim");
    cmd.args(["live", path.to_str().unwrap(), "--speed", "0", "--ticks", "2"]);
    cmd.assert()
        .success()
        .stdout(contains("rejected: speed must be > 0 (got 0)"))
        .stdout(contains("rejected: live engine is not initialized"));
}

#[test]
fn unknown_subcommand_fails() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("infra-sim");
    cmd.arg("simulate");
    cmd.assert().failure().stderr(contains("Error: "));
}

#[test]
fn unknown_component_type_fails() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("infra-sim");
    cmd.args(["check-connection", "client", "mainframe"]);
    cmd.assert()
        .failure()
        .stderr(contains("unknown component type 'mainframe'"));
}
