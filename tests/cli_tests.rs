//! CLI tests for the PoolMux binary
//!
//! Tests command-line handling that must work before (or without) a valid
//! configuration: version, help, config subcommands and unknown arguments.

use std::process::Command;
use std::str;

/// Command for the binary built alongside these tests
fn poolmux() -> Command {
    Command::new(env!("CARGO_BIN_EXE_poolmux"))
}

/// Test that --version flag works and outputs correct version format
#[test]
fn test_version_flag() {
    let output = poolmux().arg("--version").output().expect("Failed to execute command");

    assert!(output.status.success(), "Version command should succeed");
    let stdout = str::from_utf8(&output.stdout).expect("Invalid UTF-8");
    assert!(stdout.contains("poolmux"), "Version output should contain 'poolmux', got: {}", stdout);
    assert!(
        stdout.contains(env!("CARGO_PKG_VERSION")),
        "Version output should contain the crate version, got: {}",
        stdout
    );
}

/// Test that -V flag works (short version)
#[test]
fn test_version_flag_short() {
    let output = poolmux().arg("-V").output().expect("Failed to execute command");

    assert!(output.status.success(), "Version command should succeed");
    let stdout = str::from_utf8(&output.stdout).expect("Invalid UTF-8");
    assert!(stdout.starts_with("poolmux "), "got: {}", stdout);
}

/// Test that --help flag works and shows usage information
#[test]
fn test_help_flag() {
    let output = poolmux().arg("--help").output().expect("Failed to execute command");

    assert!(output.status.success(), "Help command should succeed");
    let stdout = str::from_utf8(&output.stdout).expect("Invalid UTF-8");
    for section in ["USAGE", "COMMANDS", "OPTIONS", "ENVIRONMENT VARIABLES", "MODEL PREFIXES"] {
        assert!(stdout.contains(section), "Help output should contain '{}', got: {}", section, stdout);
    }
    assert!(stdout.contains("fake-stream/"));
    assert!(stdout.contains("anti-truncation/"));
}

/// Test that -h flag works (short help)
#[test]
fn test_help_flag_short() {
    let output = poolmux().arg("-h").output().expect("Failed to execute command");

    assert!(output.status.success(), "Help command should succeed");
    let stdout = str::from_utf8(&output.stdout).expect("Invalid UTF-8");
    assert!(stdout.contains("USAGE"), "Help output should contain 'USAGE', got: {}", stdout);
}

/// Unknown options fail and print help to guide the user
#[test]
fn test_unknown_option_fails() {
    let output = poolmux().arg("--bogus").output().expect("Failed to execute command");

    assert!(!output.status.success(), "Unknown option should fail");
    let stderr = str::from_utf8(&output.stderr).expect("Invalid UTF-8");
    assert!(stderr.contains("Unknown option: --bogus"), "got: {}", stderr);
}

/// `config path` lists the search order without needing any file to exist
#[test]
fn test_config_path_command() {
    let output = poolmux().args(["config", "path"]).output().expect("Failed to execute command");

    assert!(output.status.success(), "config path should succeed");
    let stdout = str::from_utf8(&output.stdout).expect("Invalid UTF-8");
    assert!(stdout.lines().all(|line| line.ends_with("config.toml")), "got: {}", stdout);
    assert!(stdout.contains("poolmux"), "got: {}", stdout);
}

/// Unknown config subcommands are rejected
#[test]
fn test_unknown_config_command_fails() {
    let output = poolmux().args(["config", "frobnicate"]).output().expect("Failed to execute command");

    assert!(!output.status.success());
    let stderr = str::from_utf8(&output.stderr).expect("Invalid UTF-8");
    assert!(stderr.contains("Unknown config command 'frobnicate'"), "got: {}", stderr);
}
