//! The `cmdtoy` binary, driven through scripts and subcommands.

use std::fs;
use std::process::{Command, Output};

use tempfile::TempDir;

fn cmdtoy(
    config_home: &TempDir,
    args: &[&str],
) -> Output {
    Command::new(env!("CARGO_BIN_EXE_cmdtoy"))
        .args(args)
        .env("XDG_CONFIG_HOME", config_home.path())
        .output()
        .expect("Failed to spawn cmdtoy")
}

#[test]
fn test_version() {
    let home = TempDir::new().unwrap();
    let output = cmdtoy(&home, &["version"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("cmdtoy {}", env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_modules_listing() {
    let home = TempDir::new().unwrap();
    let config_dir = home.path().join("cmdtoy");
    fs::create_dir_all(&config_dir).unwrap();
    fs::write(
        config_dir.join("config.toml"),
        "[modules]\nbuiltins = [\"cmd_exit\", \"get_user_input\"]\n",
    )
    .unwrap();

    let output = cmdtoy(&home, &["modules"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.lines().count(), 5);
    assert!(stdout.contains("2024120200 api 1"));
    assert!(stdout.lines().any(|line| line.starts_with("cmd_help") && line.ends_with("(disabled)")));
    assert!(stdout.lines().any(|line| line.starts_with("cmd_exit") && !line.ends_with("(disabled)")));
}

#[test]
fn test_run_script() {
    let home = TempDir::new().unwrap();
    let script = home.path().join("session.txt");
    fs::write(&script, "make_identifier answer 42\nfind_identifier answer\nexit\n").unwrap();

    let output = cmdtoy(&home, &["run", "--script", script.to_str().unwrap()]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout,
        "Identifier 'answer' created\n\
         Identifier 'answer' is '42' in scope #0\n\
         The program is exiting.  Good day to you.\n"
    );
}

#[test]
fn test_missing_script_fails() {
    let home = TempDir::new().unwrap();
    let output = cmdtoy(&home, &["run", "--script", "/nonexistent/cmdtoy/script.txt"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to open script"));
}

#[test]
fn test_invalid_config_fails() {
    let home = TempDir::new().unwrap();
    let config = home.path().join("broken.toml");
    fs::write(&config, "[runtime\nprompt = ").unwrap();

    let output = cmdtoy(&home, &["--config", config.to_str().unwrap(), "version"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to load configuration"));
}
