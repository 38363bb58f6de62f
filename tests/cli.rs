use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::TempDir;

fn zipsweep_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_zipsweep"))
}

fn command() -> Command {
    let mut cmd = Command::new(zipsweep_binary());
    for var in [
        "AWS_ACCESS_KEY_ID",
        "AWS_SECRET_ACCESS_KEY",
        "AWS_SESSION_TOKEN",
        "AWS_REGION",
        "AWS_DEFAULT_REGION",
        "ZIPSWEEP_PASSWORD",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn help_lists_commands() {
    let output = command().arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("serve"));
    assert!(stdout.contains("search"));
    assert!(stdout.contains("buckets"));
}

#[test]
fn search_without_credentials_fails_validation() {
    let tmp = TempDir::new().unwrap();
    let ids = tmp.path().join("ids.txt");
    fs::write(&ids, "ID1\nID2\n").unwrap();

    let output = command()
        .args(["search", "--bucket", "acme", "--progress", "off", "--identifiers"])
        .arg(&ids)
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("access key is required"), "stderr: {}", stderr);
}

#[test]
fn search_with_missing_identifier_file_fails() {
    let output = command()
        .args([
            "search",
            "--bucket",
            "acme",
            "--identifiers",
            "/nonexistent/ids.txt",
        ])
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to read identifier file"));
}

#[test]
fn invalid_config_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let config = tmp.path().join("zipsweep.toml");
    fs::write(&config, "[search]\nworkers = 0\n").unwrap();

    let output = command()
        .arg("--config")
        .arg(&config)
        .arg("buckets")
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("search.workers must be >= 1"));
}

#[test]
fn buckets_requires_credentials() {
    let output = command().arg("buckets").output().unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("AWS_ACCESS_KEY_ID"));
}
