use std::io::Write;
use std::process::Command;

const HEADER: &str = "participant,currency,collateral,reserve,clearing,pending,settlement";

fn run(fixture: &str, config: Option<&str>) -> (String, String, bool) {
    let path = format!("tests/fixtures/{fixture}");
    let mut command = Command::new(env!("CARGO_BIN_EXE_ledger-core"));
    command.arg(&path).env("RUST_LOG", "warn");
    if let Some(config) = config {
        command.arg(config);
    }
    let output = command.output().expect("failed to run binary");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn valid_events() {
    let (stdout, stderr, success) = run("valid.csv", None);

    assert!(success);
    assert!(stderr.is_empty(), "unexpected warnings: {stderr}");

    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines[0], HEADER);
    assert_eq!(lines[1], "dfsp1,USD,-100.00,20.00,54.50,0.00,-25.50");
    assert_eq!(lines[2], "dfsp2,USD,0.00,0.00,25.50,0.00,25.50");
    assert_eq!(lines.len(), 3);
}

#[test]
fn errors_warn_but_do_not_block() {
    let (stdout, stderr, success) = run("with_errors.csv", None);

    assert!(success);
    assert!(stderr.contains("unrecognized event type"));
    assert!(stderr.contains("missing amount"));
    assert!(stderr.contains("fulfil rejected"));
    assert!(stderr.contains("prepare rejected"));

    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines[0], HEADER);
    assert_eq!(lines[1], "dfsp1,USD,-100.00,20.00,54.50,0.00,-25.50");
    assert_eq!(lines[2], "dfsp2,USD,0.00,0.00,25.50,0.00,25.50");
}

#[test]
fn config_file_changes_currency_scale() {
    let mut config = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
    writeln!(config, "batch_size = 2\n\n[currencies.USD]\nledger = 840\nscale = 3\n").unwrap();
    let (stdout, _, success) = run("valid.csv", config.path().to_str());

    assert!(success);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines[1], "dfsp1,USD,-100.000,20.000,54.500,0.000,-25.500");
}

#[cfg(not(feature = "tigerbeetle"))]
#[test]
fn tigerbeetle_engine_needs_the_feature() {
    let mut config = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
    writeln!(config, "engine = \"tigerbeetle\"").unwrap();
    let (stdout, stderr, success) = run("valid.csv", config.path().to_str());

    assert!(!success);
    assert!(stdout.is_empty());
    assert!(stderr.contains("tigerbeetle feature"));
}
