//! CLI tests for the `slick-agent` binary.
//!
//! Spawns the binary and checks startup failures exit with the fatal code and
//! that a command-requested exit ends the process cleanly.

use std::process::Command;

use slick_agent::exit_codes;
use slick_agent::test_support::write_config;

#[test]
fn missing_configuration_is_fatal() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = Command::new(env!("CARGO_BIN_EXE_slick-agent"))
        .arg("--conf")
        .arg(temp.path().join("missing.yml"))
        .output()
        .expect("run slick-agent");

    assert_eq!(output.status.code(), Some(exit_codes::FATAL));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error loading configuration"), "stderr: {stderr}");
}

#[test]
fn missing_conf_flag_is_rejected() {
    let output = Command::new(env!("CARGO_BIN_EXE_slick-agent"))
        .env_remove("SLICK_AGENT_CONF")
        .output()
        .expect("run slick-agent");
    assert!(!output.status.success());
}

#[cfg(unix)]
#[test]
fn exits_cleanly_when_a_phase_requests_exit() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = write_config(
        temp.path(),
        r#"
slick:
  base-url: 'http://127.0.0.1:1'
  agent-name: cli-test
sleep:
  no-test: 1ms
cleanup:
  - command: |
      echo '{"shouldExit": true}' > "$SLICK_AGENT_STATUS"
"#,
    );

    let status = Command::new(env!("CARGO_BIN_EXE_slick-agent"))
        .env("SLICK_AGENT_CONF", &config)
        .args(["--shell", "/bin/sh", "--groups", "a, b"])
        .status()
        .expect("run slick-agent");

    assert_eq!(status.code(), Some(exit_codes::OK));
}
