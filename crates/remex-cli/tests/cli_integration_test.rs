//! CLI Integration Tests
//!
//! Runs the `remex` binary: `serve` in a child process, `call` against it.
//! Addresses always use `127.0.0.1` to avoid depending on how `localhost`
//! resolves.

use std::path::PathBuf;
use std::process::{Child, Command, Output};
use std::thread;
use std::time::{Duration, Instant};

// ============================================================================
// Test Helpers
// ============================================================================

fn remex_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_remex"))
}

fn create_test_script(content: &str) -> tempfile::NamedTempFile {
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), content).unwrap();
    file
}

/// A port that was free a moment ago.
fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn call(address: &str, expression: &str) -> Output {
    Command::new(remex_bin())
        .args(["call", address, expression, "--timeout-ms", "500"])
        .output()
        .unwrap()
}

/// Kills the child when dropped so a failing test leaves nothing behind.
struct ServeProcess(Child);

impl Drop for ServeProcess {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

fn spawn_serve(script: &tempfile::NamedTempFile, port: u16) -> ServeProcess {
    let child = Command::new(remex_bin())
        .arg("serve")
        .arg("-s")
        .arg(script.path())
        .arg("-b")
        .arg(format!("127.0.0.1:{}", port))
        .spawn()
        .unwrap();
    ServeProcess(child)
}

/// Retries `expression` until the server answers.
fn call_when_ready(address: &str, expression: &str) -> Output {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let output = call(address, expression);
        if output.status.success() || Instant::now() > deadline {
            return output;
        }
        thread::sleep(Duration::from_millis(100));
    }
}

// ============================================================================
// Argument handling
// ============================================================================

#[test]
fn test_help_lists_subcommands() {
    let output = Command::new(remex_bin()).arg("--help").output().unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("serve"), "help output: {}", stdout);
    assert!(stdout.contains("call"), "help output: {}", stdout);
}

#[test]
fn test_serve_without_script_fails() {
    let output = Command::new(remex_bin()).arg("serve").output().unwrap();
    assert!(!output.status.success());
}

#[test]
fn test_serve_with_missing_script_fails() {
    let output = Command::new(remex_bin())
        .args(["serve", "-s", "/no/such/file.js", "-b", "127.0.0.1:0"])
        .output()
        .unwrap();
    assert!(!output.status.success());
}

#[test]
fn test_call_invalid_address_fails() {
    let output = call("not:an:address", "1");
    assert!(!output.status.success());
}

#[test]
fn test_call_without_server_fails() {
    let port = free_port();
    let output = call(&format!("127.0.0.1:{}", port), "1");
    assert!(!output.status.success());
    assert!(output.stdout.is_empty(), "nothing on stdout for failures");
}

// ============================================================================
// serve + call
// ============================================================================

#[test]
fn test_serve_and_call() {
    let script = create_test_script(
        r#"
        function avg(xs) { return xs.reduce((a, b) => a + b, 0) / xs.length; }
        var motto = 'remote';
        "#,
    );
    let port = free_port();
    let _server = spawn_serve(&script, port);
    let address = format!("127.0.0.1:{}", port);

    let output = call_when_ready(&address, "avg([0, 1, 2, 3])");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "1.5");

    let output = call(&address, "motto");
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("remote"));

    // A remote failure exits non-zero and leaves the server running.
    let output = call(&address, "noSuchFunction()");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("internal error"));

    let output = call(&address, "2 + 2");
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "4");
}
