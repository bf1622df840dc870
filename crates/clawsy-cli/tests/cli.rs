use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use tempfile::TempDir;

fn clawsy() -> Command {
    let mut cmd = Command::cargo_bin("clawsy").unwrap();
    cmd.env_remove("RUST_LOG");
    cmd
}

/// A config whose device key lives inside the temp dir.
fn write_config(dir: &Path, extra: &str) -> PathBuf {
    let key = dir.join("device.key");
    let path = dir.join("config.toml");
    fs::write(
        &path,
        format!(
            "[identity]\nkey_path = \"{}\"\n{extra}",
            key.display().to_string().replace('\\', "\\\\")
        ),
    )
    .unwrap();
    path
}

fn stdout_of(cmd: &mut Command) -> String {
    let output = cmd.output().unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    String::from_utf8(output.stdout).unwrap()
}

fn device_id_line(stdout: &str) -> String {
    stdout
        .lines()
        .find_map(|l| l.trim_start().strip_prefix("Device ID:"))
        .map(|s| s.trim().to_string())
        .unwrap()
}

#[test]
fn help_lists_subcommands() {
    let out = stdout_of(clawsy().arg("--help"));
    for sub in ["run", "send", "id", "keygen", "config"] {
        assert!(out.contains(sub), "missing {sub} in help");
    }
}

#[test]
fn id_is_stable_across_runs() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), "");

    let first = device_id_line(&stdout_of(clawsy().arg("--config").arg(&config).arg("id")));
    let second = device_id_line(&stdout_of(clawsy().arg("--config").arg(&config).arg("id")));

    assert_eq!(first.len(), 64);
    assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(first, second);
    assert!(dir.path().join("device.key").exists());
}

#[test]
fn ephemeral_ids_differ_and_write_nothing() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), "");

    let run = || {
        device_id_line(&stdout_of(
            clawsy().arg("--config").arg(&config).arg("--ephemeral").arg("id"),
        ))
    };
    assert_ne!(run(), run());
    assert!(!dir.path().join("device.key").exists());
}

#[test]
fn keygen_refuses_to_overwrite_without_force() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), "");

    let first = device_id_line(&stdout_of(clawsy().arg("--config").arg(&config).arg("keygen")));

    let output = clawsy()
        .arg("--config")
        .arg(&config)
        .arg("keygen")
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("--force"));

    let replaced = device_id_line(&stdout_of(
        clawsy().arg("--config").arg(&config).args(["keygen", "--force"]),
    ));
    assert_ne!(first, replaced);
}

#[test]
fn config_shows_overrides_and_hides_token() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), "[gateway]\nhost = \"filehost\"\ntoken = \"file-secret\"\n");

    let out = stdout_of(
        clawsy()
            .arg("--config")
            .arg(&config)
            .args(["--host", "flaghost", "--ssh-user", "alice", "config"]),
    );
    assert!(out.contains("flaghost"));
    assert!(!out.contains("filehost"));
    assert!(out.contains("alice"));
    assert!(!out.contains("file-secret"));
}

#[test]
fn config_init_writes_the_file_once() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("new").join("config.toml");

    stdout_of(
        clawsy()
            .arg("--config")
            .arg(&path)
            .args(["--host", "agenthost", "config", "--init"]),
    );
    assert!(fs::read_to_string(&path).unwrap().contains("agenthost"));

    let output = clawsy()
        .arg("--config")
        .arg(&path)
        .args(["config", "--init"])
        .output()
        .unwrap();
    assert!(!output.status.success());
}

#[test]
fn broken_config_is_reported() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "[gateway\nhost = ").unwrap();

    let output = clawsy().arg("--config").arg(&path).arg("id").output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("clawsy: failed to parse config"), "{stderr}");
}

#[test]
fn send_without_a_gateway_fails() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), "");

    let output = clawsy()
        .arg("--config")
        .arg(&config)
        .args(["send", "hello"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("not delivered"));
}

#[test]
fn send_rejects_invalid_json() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), "");

    let output = clawsy()
        .arg("--config")
        .arg(&config)
        .args(["send", "--kind", "note", "--json", "{"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("--json"));
}
