//! Smoke test for the `bitmesh-node` binary.

#[cfg(unix)]
#[test]
fn binary_starts_and_stops_cleanly() {
    use std::process::{Command, Stdio};

    let bin = env!("CARGO_BIN_EXE_bitmesh-node");

    let config_content = b"[node]\nenable_storage = false\nnickname = \"smoke\"\n";
    let mut config_file = tempfile::NamedTempFile::new().unwrap();
    std::io::Write::write_all(&mut config_file, config_content).unwrap();

    // tracing_subscriber writes to stdout by default
    let stdout_file = tempfile::NamedTempFile::new().unwrap();
    let stdout_writer = stdout_file.reopen().unwrap();

    let child = Command::new(bin)
        .args(["--config", config_file.path().to_str().unwrap()])
        .env("RUST_LOG_FORMAT", "json")
        .env("RUST_LOG", "info")
        .stdout(Stdio::from(stdout_writer))
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn bitmesh-node");

    let pid = child.id();
    std::thread::sleep(std::time::Duration::from_millis(500));

    Command::new("kill")
        .args(["-INT", &pid.to_string()])
        .status()
        .expect("failed to send SIGINT");

    let guard = std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_secs(5));
        let _ = Command::new("kill").args(["-9", &pid.to_string()]).status();
    });

    let output = child.wait_with_output().expect("failed to wait on child");
    drop(guard);

    assert!(
        output.status.success(),
        "expected exit code 0, got {:?}",
        output.status.code()
    );

    let stdout_content = std::fs::read_to_string(stdout_file.path()).unwrap();
    let started = stdout_content
        .lines()
        .filter(|l| l.starts_with('{'))
        .any(|l| l.contains("node started"));
    assert!(started, "expected a JSON 'node started' line, got: {stdout_content}");
}

#[test]
fn missing_config_exits_with_error() {
    let bin = env!("CARGO_BIN_EXE_bitmesh-node");
    let output = std::process::Command::new(bin)
        .args(["--config", "/nonexistent/bitmesh.toml"])
        .output()
        .expect("failed to run bitmesh-node");
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("failed to load config"));
}
