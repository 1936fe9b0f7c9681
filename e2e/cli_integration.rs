// e2e/cli_integration.rs — black-box tests of the `producer` and `consumer`
// binaries using std::process::Command.
//
// Covers argument handling, exit codes, and a full two-process round-trip
// over a uniquely named region.

use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicU32, Ordering};

use tempfile::TempDir;

/// Locate a binary produced by Cargo for this package.
fn bin(name: &str) -> PathBuf {
    // CARGO_BIN_EXE_<name> is set by Cargo when running integration tests.
    if let Ok(p) = std::env::var(format!("CARGO_BIN_EXE_{}", name)) {
        return PathBuf::from(p);
    }
    let mut p = std::env::current_exe().unwrap();
    p.pop();
    if p.ends_with("deps") {
        p.pop();
    }
    p.push(name);
    p
}

fn unique_channel(tag: &str) -> String {
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    format!(
        "/shmpress-cli-{}-{}-{}",
        tag,
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

// ── 1. Two-process round-trip ────────────────────────────────────────────────

#[test]
fn two_process_roundtrip() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("input.bin");
    let output = dir.path().join("output.bin");
    let content = b"compressed over shared memory\n".repeat(10_000);
    fs::write(&input, &content).unwrap();

    let channel = unique_channel("roundtrip");

    let mut producer = Command::new(bin("producer"))
        .arg(&input)
        .args(["--channel", &channel])
        .spawn()
        .expect("failed to start producer");
    let mut consumer = Command::new(bin("consumer"))
        .arg(&output)
        .args(["--channel", &channel])
        .spawn()
        .expect("failed to start consumer");

    assert!(producer.wait().unwrap().success(), "producer should exit 0");
    assert!(consumer.wait().unwrap().success(), "consumer should exit 0");
    assert_eq!(fs::read(&output).unwrap(), content);
}

// ── 2. Empty input file ──────────────────────────────────────────────────────

#[test]
fn two_process_empty_file() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("empty.bin");
    let output = dir.path().join("out.bin");
    fs::write(&input, b"").unwrap();

    let channel = unique_channel("empty");

    let mut producer = Command::new(bin("producer"))
        .arg(&input)
        .args(["--channel", &channel])
        .spawn()
        .unwrap();
    let mut consumer = Command::new(bin("consumer"))
        .arg(&output)
        .args(["--channel", &channel])
        .spawn()
        .unwrap();

    assert!(producer.wait().unwrap().success());
    assert!(consumer.wait().unwrap().success());
    assert_eq!(fs::metadata(&output).unwrap().len(), 0);
}

// ── 3. Exit codes ────────────────────────────────────────────────────────────

#[test]
fn producer_without_args_exits_1() {
    let status = Command::new(bin("producer")).status().unwrap();
    assert_eq!(status.code(), Some(1));
}

#[test]
fn consumer_without_args_exits_1() {
    let status = Command::new(bin("consumer")).status().unwrap();
    assert_eq!(status.code(), Some(1));
}

#[test]
fn producer_missing_input_exits_1() {
    let dir = TempDir::new().unwrap();
    let status = Command::new(bin("producer"))
        .arg(dir.path().join("does-not-exist.bin"))
        .args(["--channel", &unique_channel("missing")])
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(1));
}

#[test]
fn consumer_unwritable_output_exits_1() {
    let status = Command::new(bin("consumer"))
        .arg("/nonexistent-dir/out.bin")
        .args(["--channel", &unique_channel("unwritable")])
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(1));
}

// ── 4. --version / --help exit 0 ────────────────────────────────────────────

#[test]
fn version_and_help_exit_0() {
    for name in ["producer", "consumer"] {
        for flag in ["--version", "--help"] {
            let output = Command::new(bin(name)).arg(flag).output().unwrap();
            assert!(
                output.status.success(),
                "{} {} should exit 0",
                name,
                flag
            );
        }
    }
}
