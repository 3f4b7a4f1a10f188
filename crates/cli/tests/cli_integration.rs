// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use assert_cmd::Command;
use labwired_cosim::{CosimError, Entity, MappedSegment, SegmentMemory, SimClient};
use labwired_cosim_config::CosimConfig;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use std::process::{Child, Stdio};
use std::time::{Duration, Instant};
use tempfile::{tempdir, TempDir};

const BIN: &str = "labwired-cosim";

const FIFO_CONFIG: &str = r#"
schema_version: "1.0"
channels:
  - kind: fifo
    index: 3
    bitsize: 32
    align: 4
    count: 4
  - kind: port
    index: 0
    bitsize: 16
    value: [0x34, 0x12]
"#;

struct Session {
    dir: TempDir,
    shm: PathBuf,
    config: PathBuf,
}

impl Session {
    fn new(config: &str) -> Self {
        let dir = tempdir().unwrap();
        let shm = dir.path().join("bridge.shm");
        let config_path = dir.path().join("cosim.yaml");
        std::fs::write(&config_path, config).unwrap();
        Self {
            dir,
            shm,
            config: config_path,
        }
    }

    fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[allow(deprecated)]
    fn command(&self) -> Command {
        let mut cmd = Command::cargo_bin(BIN).unwrap();
        cmd.arg("--config")
            .arg(&self.config)
            .arg("--shm")
            .arg(&self.shm)
            .env("LABWIRED_COSIM_TIMEOUT_MS", "20")
            .env_remove("LABWIRED_COSIM_SHM");
        cmd
    }

    /// Settings matching the spawned CLI, for driving the other side in-process.
    fn sim_config(&self) -> CosimConfig {
        let mut config = CosimConfig::from_file(&self.config).unwrap();
        config.shm_path = self.shm.clone();
        config.signal_timeout_ms = 20;
        config
    }

    fn spawn_driver(&self) -> Child {
        let child = std::process::Command::new(env!("CARGO_BIN_EXE_labwired-cosim"))
            .arg("--config")
            .arg(&self.config)
            .arg("--shm")
            .arg(&self.shm)
            .arg("driver")
            .env("LABWIRED_COSIM_TIMEOUT_MS", "20")
            .env_remove("LABWIRED_COSIM_SHM")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        wait_for_segment(&self.shm);
        child
    }
}

fn wait_for_segment(path: &Path) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false) {
            return;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    panic!("driver never created {:?}", path);
}

fn driver_report(child: Child) -> (Option<i32>, serde_json::Value) {
    let output = child.wait_with_output().unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout
        .lines()
        .rfind(|l| l.starts_with('{'))
        .unwrap_or_else(|| panic!("no JSON report in driver output: {}", stdout));
    (output.status.code(), serde_json::from_str(line).unwrap())
}

#[test]
fn test_fifo_session_reports_end() {
    let session = Session::new(FIFO_CONFIG);
    let script = session.write(
        "script.yaml",
        r#"
steps:
  - { op: push, index: 3, bitsize: 32, data: [1, 0, 0, 0], expect_remaining: 3 }
  - { op: push, index: 3, bitsize: 32, data: [2, 0, 0, 0] }
  - { op: info, index: 3, query: read, expect_remaining: 2 }
  - { op: info, index: 3, query: write, expect_remaining: 2 }
  - { op: pop, index: 3, bitsize: 32, expect_data: [1, 0, 0, 0], expect_remaining: 1 }
  - { op: read, index: 0, bitsize: 16, expect_data: [0x34, 0x12] }
  - { op: read, index: 42, bitsize: 8, expect: error }
"#,
    );

    let driver = session.spawn_driver();
    let sim = session
        .command()
        .arg("sim")
        .arg("--script")
        .arg(&script)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"announced\":\"END\""));
    let summary: serde_json::Value =
        serde_json::from_slice(&sim.get_output().stdout).unwrap();
    assert_eq!(summary["steps"], 7);
    assert_eq!(summary["mismatches"].as_array().unwrap().len(), 0);

    let (code, report) = driver_report(driver);
    assert_eq!(code, Some(0));
    assert_eq!(report["state"], "END");
    assert_eq!(report["success"], true);
    assert_eq!(report["served"], 7);
    assert_eq!(report["schema_version"], "1.0");
    assert!(!session.shm.exists(), "driver should unlink the segment");
}

#[test]
fn test_mismatch_fails_both_sides() {
    let session = Session::new(FIFO_CONFIG);
    let script = session.write(
        "script.yaml",
        r#"
steps:
  - { op: pop, index: 3, bitsize: 32 }
"#,
    );

    let driver = session.spawn_driver();
    session
        .command()
        .arg("sim")
        .arg("--script")
        .arg(&script)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("END|ERROR"));

    let (code, report) = driver_report(driver);
    assert_eq!(code, Some(1));
    assert_eq!(report["success"], false);
    assert_eq!(report["retval"], 1);
}

#[test]
fn test_busy_wait_session() {
    let session = Session::new(
        r#"
sync: busy
channels:
  - kind: array
    index: 1
    bitsize: 8
    align: 1
    count: 4
    data: [9, 8, 7, 6]
"#,
    );
    let script = session.write(
        "script.yaml",
        r#"
retval: 0
steps:
  - { op: read, index: 1, address: 2, bitsize: 8, expect_data: [7] }
  - { op: write, index: 1, address: 0, data: [5] }
  - { op: read, index: 1, address: 0, bitsize: 8, expect_data: [5] }
  - { op: read, index: 1, address: 9, bitsize: 8, expect: error }
"#,
    );

    let driver = session.spawn_driver();
    session
        .command()
        .arg("sim")
        .arg("--script")
        .arg(&script)
        .assert()
        .success();
    let (code, report) = driver_report(driver);
    assert_eq!(code, Some(0));
    assert_eq!(report["state"], "END");
}

#[test]
fn test_rejected_manifest_aborts_waiting_sim() {
    let session = Session::new(
        r#"
channels:
  - kind: memory
    index: 2
    regions:
      - { base: 0x1000, size: "64B" }
      - { base: 0x1020, size: "64B" }
"#,
    );
    let script = session.write("script.yaml", "steps: []\n");

    let mut driver = session.spawn_driver();
    session
        .command()
        .arg("sim")
        .arg("--script")
        .arg(&script)
        .assert()
        .code(3)
        .stderr(predicate::str::contains("ABORT"));
    assert_eq!(driver.wait().unwrap().code(), Some(2));
}

#[test]
fn test_killed_driver_fails_waiting_sim() {
    let session = Session::new(FIFO_CONFIG);
    let mut driver = session.spawn_driver();
    let mut sim = SimClient::open(&session.sim_config()).unwrap();
    sim.ready().unwrap();
    let reply = sim.push(3, 32, &[1, 0, 0, 0]).unwrap();
    assert_eq!(reply.result, Ok(3));

    driver.kill().unwrap();
    driver.wait().unwrap();
    let err = sim.push(3, 32, &[2, 0, 0, 0]).unwrap_err();
    assert!(
        matches!(err, CosimError::PeerLost { entity: Entity::Driver, .. }),
        "{}",
        err
    );
}

#[test]
fn test_driver_fails_when_sim_vanishes_mid_session() {
    let session = Session::new(FIFO_CONFIG);
    let driver = session.spawn_driver();
    let mut sim = SimClient::open(&session.sim_config()).unwrap();
    sim.ready().unwrap();
    sim.push(3, 32, &[1, 0, 0, 0]).unwrap();

    // Point the driver at a pid that has already exited.
    let mut gone = std::process::Command::new("true").spawn().unwrap();
    let pid = gone.id() as i32;
    gone.wait().unwrap();
    let mut seg = MappedSegment::attach(&session.shm).unwrap();
    seg.raw().unwrap().set_pid(Entity::Sim, pid);
    seg.close(Entity::Sim).unwrap();

    let output = driver.wait_with_output().unwrap();
    assert_eq!(output.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&output.stderr).contains("without announcing"));
    drop(sim);
}

#[test]
fn test_duplicate_channel_index_is_config_error() {
    let session = Session::new(
        r#"
channels:
  - { kind: port, index: 1, bitsize: 8 }
  - { kind: port, index: 1, bitsize: 16 }
"#,
    );
    session
        .command()
        .arg("driver")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("more than once"));
    assert!(!session.shm.exists());
}

#[test]
fn test_inspect_missing_segment() {
    let session = Session::new("{}\n");
    session.command().arg("inspect").assert().code(3);
}

#[test]
fn test_inspect_reports_free_segment() {
    let session = Session::new("{}\n");
    std::fs::write(&session.shm, vec![0u8; 4096]).unwrap();
    session
        .command()
        .arg("inspect")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"state\": \"FREE\""));
    assert!(session.shm.exists(), "inspect must not unlink the segment");
}

#[test]
fn test_inspect_refuses_truncated_segment() {
    let session = Session::new("{}\n");
    std::fs::write(&session.shm, b"stale").unwrap();
    session.command().arg("inspect").assert().code(3);
}

#[test]
fn test_clean_is_idempotent() {
    let session = Session::new("{}\n");
    std::fs::write(&session.shm, b"stale").unwrap();
    session.command().arg("clean").assert().success();
    assert!(!session.shm.exists());
    session.command().arg("clean").assert().success();
}
