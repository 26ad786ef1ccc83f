use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;

const CREDENTIAL_ENVS: &[&str] = &[
    "WEATHER_FEEDS_API_KEY",
    "WEATHER_FEEDS_SHARED_KEY",
    "WEATHER_FEEDS_TESTING",
];

fn run_cli(args: &[&str], state_dir: &Path) -> Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_weather-feeds"));
    cmd.args(args)
        .env("WEATHER_FEEDS_STATE_DIR", state_dir)
        .env("WEATHER_FEEDS_ROOT", state_dir)
        .env("WEATHER_FEEDS_LOG", "off");
    for key in CREDENTIAL_ENVS {
        cmd.env_remove(key);
    }
    cmd.output().expect("run weather-feeds")
}

fn stdout_json(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("stdout is json")
}

fn fixture(name: &str) -> String {
    format!("{}/tests/fixtures/{name}", env!("CARGO_MANIFEST_DIR"))
}

#[test]
fn cli_contract_parse_envelope_carries_normalized_set() {
    let dir = tempfile::tempdir().expect("tempdir");
    let file = fixture("owm_onecall.json");
    let output = run_cli(
        &["parse", "--feed", "owm", "--file", &file, "--units", "metric", "--json"],
        dir.path(),
    );

    assert!(output.status.success());
    let value = stdout_json(&output);
    assert_eq!(value["schema_version"], "v1");
    assert_eq!(value["command"], "feeds.parse");
    assert_eq!(value["ok"], true);

    let result = &value["result"];
    for field in [
        "source",
        "location_name",
        "timezone",
        "current",
        "forecasts",
        "alerts",
        "period_range",
        "recorded_at",
        "fetched_at",
    ] {
        assert!(result.get(field).is_some(), "missing field: {field}");
    }
    assert_eq!(result["source"], "Owm");
    assert_eq!(result["forecasts"].as_array().map(Vec::len), Some(3));
}

#[test]
fn cli_contract_nws_forecast_parses_to_nws_source() {
    let dir = tempfile::tempdir().expect("tempdir");
    let file = fixture("nws_forecast.xml");
    let output = run_cli(&["parse", "--feed", "nws", "--file", &file, "--json"], dir.path());

    assert!(output.status.success());
    let value = stdout_json(&output);
    assert_eq!(value["result"]["source"], "Nws");
    assert_eq!(value["result"]["current"]["kind"], "Current");
}

#[test]
fn cli_contract_unreadable_file_is_user_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let missing = dir.path().join("missing.xml");
    let output = run_cli(
        &["parse", "--feed", "wu", "--file", &missing.display().to_string(), "--json"],
        dir.path(),
    );

    assert_eq!(output.status.code(), Some(2));
    let value = stdout_json(&output);
    assert_eq!(value["ok"], false);
    assert_eq!(value["error"]["code"], "user.invalid_input");
    assert_eq!(value["error"]["details"]["kind"], "user");
    assert_eq!(value["error"]["details"]["exit_code"], 2);
}

#[test]
fn cli_contract_upstream_error_document_is_runtime_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let file = dir.path().join("error.xml");
    std::fs::write(
        &file,
        "<response><error><type>keynotfound</type><description>this key does not exist</description></error></response>",
    )
    .expect("write");

    let output = run_cli(
        &["parse", "--feed", "wu", "--file", &file.display().to_string(), "--json"],
        dir.path(),
    );

    assert_eq!(output.status.code(), Some(1));
    let value = stdout_json(&output);
    assert_eq!(value["ok"], false);
    assert_eq!(value["error"]["code"], "runtime.feed_failed");
}

#[test]
fn cli_contract_location_lifecycle_persists_between_runs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let added = run_cli(
        &[
            "location",
            "add",
            "--name",
            "Kansas City",
            "--country",
            "US",
            "--lat=39.1",
            "--lon=-94.58",
            "--json",
        ],
        dir.path(),
    );
    assert!(added.status.success());
    assert!(dir.path().join("locations.properties").exists());

    let listed = stdout_json(&run_cli(&["location", "list", "--json"], dir.path()));
    assert_eq!(listed["result"][0]["id"], "801127616");
    assert_eq!(listed["result"][0]["default"], true);

    let units = stdout_json(&run_cli(
        &["location", "units", "801127616", "metric", "--json"],
        dir.path(),
    ));
    assert_eq!(units["result"]["units"], "Metric");

    let shown = run_cli(&["show"], dir.path());
    assert!(shown.status.success());
    assert_eq!(
        String::from_utf8_lossy(&shown.stdout).trim(),
        "Kansas City, US: no forecast cached"
    );

    let removed = stdout_json(&run_cli(
        &["location", "remove", "801127616", "--json"],
        dir.path(),
    ));
    assert_eq!(removed["result"]["default_id"], Value::Null);
}

#[test]
fn cli_contract_update_without_credentials_stores_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    run_cli(
        &["location", "add", "--name", "Home", "--lat=51.5", "--lon=-0.12"],
        dir.path(),
    );

    let updated = stdout_json(&run_cli(&["update", "--json"], dir.path()));
    assert_eq!(updated["command"], "feeds.update");
    assert_eq!(updated["result"]["updated"], false);
    assert_eq!(
        updated["result"]["locations"][0]["error"],
        "update failed: configuration error: an API key is required"
    );
}

#[test]
fn cli_contract_unknown_location_exit_code_is_two() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = run_cli(&["location", "default", "404"], dir.path());
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("user.unknown_location"));
}

#[test]
fn cli_contract_help_lists_commands() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = run_cli(&["--help"], dir.path());
    assert!(output.status.success());
    let help = String::from_utf8_lossy(&output.stdout);
    for command in ["parse", "location", "update", "show", "icon-sets"] {
        assert!(help.contains(command), "help missing {command}");
    }
}
