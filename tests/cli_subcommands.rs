use predicates::str::{contains, diff};

#[test]
fn list_components_prints_connection_rules() {
    let expected = concat!(
        "client -> cdn, load_balancer, api_gateway, app_server\n",
        "cdn -> load_balancer, api_gateway, app_server, object_store\n",
        "load_balancer -> app_server\n",
        "api_gateway -> load_balancer, app_server\n",
        "app_server -> app_server, cache, database_sql, database_nosql, object_store, message_queue\n",
        "cache -> database_sql, database_nosql\n",
        "database_sql -> database_sql\n",
        "database_nosql -> database_nosql\n",
        "object_store: terminal\n",
        "message_queue -> app_server\n",
    );

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("infra-sim");
    cmd.arg("list-components");
    cmd.assert().success().stdout(diff(expected));
}

#[test]
fn check_connection_accepts_legal_pair() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("infra-sim");
    cmd.args(["check-connection", "app_server", "database_sql"]);
    cmd.assert()
        .success()
        .stdout(diff("valid: app_server -> database_sql (default protocol: tcp)\n"));
}

#[test]
fn check_connection_explains_illegal_pair() {
    let expected = concat!(
        "invalid: client cannot connect to database_sql\n",
        "suggestion: client can connect to: cdn, load_balancer, api_gateway, app_server\n",
    );

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("infra-sim");
    cmd.args(["check-connection", "client", "database_sql"]);
    cmd.assert().success().stdout(diff(expected));
}

#[test]
fn check_connection_warns_about_protocol() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("infra-sim");
    cmd.args([
        "check-connection",
        "app_server",
        "database_sql",
        "--protocol",
        "udp",
    ]);
    cmd.assert()
        .success()
        .stdout(contains("warning: databases should use tcp (got udp from app_server)\n"));
}

#[test]
fn check_connection_json_is_flat() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("infra-sim");
    cmd.args([
        "check-connection",
        "object_store",
        "app_server",
        "--format",
        "json",
    ]);
    let output = cmd.output().expect("binary should run");
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["valid"], false);
    assert_eq!(json["source"], "object_store");
    assert_eq!(json["defaultProtocol"], "http");
    assert_eq!(
        json["suggestion"],
        "object_store is terminal and accepts no outgoing connections"
    );
}
