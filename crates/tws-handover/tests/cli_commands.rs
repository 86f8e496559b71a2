#![cfg(all(unix, feature = "cli"))]

use std::path::PathBuf;
use std::process::{Command, Output};

fn unique_temp_file(tag: &str, contents: &str) -> PathBuf {
    let path = PathBuf::from(format!(
        "/tmp/tws-handover-cli-{tag}-{}-{}.json",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::write(&path, contents).expect("temp file should be writable");
    path
}

fn cli(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_tws-handover"))
        .arg("--log-level")
        .arg("error")
        .args(args)
        .output()
        .expect("tws-handover should run")
}

#[test]
fn simulate_reports_a_successful_round() {
    let output = cli(&["--format", "json", "simulate", "--payload-size", "8"]);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"status\":\"success\""));
    assert!(stdout.contains("\"primary\":\"earbud-b\""));
}

#[test]
fn simulate_rounds_bounce_the_role_back() {
    let output = cli(&["--format", "json", "simulate", "--rounds", "2", "--a2dp"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"from\":\"earbud-b\""));
    assert!(stdout.contains("\"primary\":\"earbud-a\""));
}

#[test]
fn simulate_unresponsive_returns_124() {
    let config = unique_temp_file("timeout", r#"{"protocol_message_timeout": 150}"#);

    let output = cli(&[
        "--format",
        "json",
        "simulate",
        "--unresponsive",
        "--config",
        config.to_str().expect("temp path should be utf-8"),
    ]);

    assert_eq!(output.status.code(), Some(124));
    assert!(String::from_utf8_lossy(&output.stdout).contains("\"status\":\"timeout\""));
    let _ = std::fs::remove_file(&config);
}

#[test]
fn simulate_veto_returns_2() {
    let output = cli(&["--format", "json", "simulate", "--veto-at", "1"]);

    assert_eq!(output.status.code(), Some(2));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"status\":\"vetoed\""));
    assert!(stdout.contains("\"primary\":\"earbud-a\""));
}

#[test]
fn simulate_rejects_zero_rounds() {
    let output = cli(&["simulate", "--rounds", "0"]);

    assert_eq!(output.status.code(), Some(64));
    assert!(String::from_utf8_lossy(&output.stderr).contains("--rounds"));
}

#[test]
fn decode_lists_marshal_entries() {
    let output = cli(&["--format", "json", "decode", "80 00 0002 aabb ff", "--clients", "1"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"opcode\":\"MARSHAL_DATA\""));
    assert!(stdout.contains("\"kind\":\"client\""));
    assert!(stdout.contains("\"kind\":\"end\""));
}

#[test]
fn decode_malformed_packet_returns_60() {
    let output = cli(&["--format", "json", "decode", "0001"]);

    assert_eq!(output.status.code(), Some(60));
    assert!(String::from_utf8_lossy(&output.stdout).contains("\"error\""));
}

#[test]
fn decode_invalid_hex_returns_60() {
    let output = cli(&["decode", "xyz"]);

    assert_eq!(output.status.code(), Some(60));
    assert!(String::from_utf8_lossy(&output.stderr).contains("invalid hex"));
}

#[test]
fn config_prints_defaults() {
    let output = cli(&["--format", "json", "config"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"mtu\":895"));
    assert!(stdout.contains("\"protocol_message_timeout\":2100"));
}

#[test]
fn config_rejects_unknown_fields() {
    let config = unique_temp_file("unknown", r#"{"mtuu": 100}"#);

    let output = cli(&[
        "config",
        "--file",
        config.to_str().expect("temp path should be utf-8"),
    ]);

    assert_eq!(output.status.code(), Some(60));
    let _ = std::fs::remove_file(&config);
}

#[test]
fn version_extended_shows_wire_constants() {
    let output = cli(&["version", "--extended"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("name: tws-handover"));
    assert!(stdout.contains("p0_tag=0xef"));
    assert!(stdout.contains("end_tag=0xff"));
}
