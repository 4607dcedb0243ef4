use std::fs;
use std::path::PathBuf;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;

/// Write a scratch file under the system temp dir, unique per test.
fn scratch_file(name: &str, contents: &[u8]) -> PathBuf {
    let path = std::env::temp_dir().join(format!("rivet-{}-{}", std::process::id(), name));
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn runs_without_arguments() {
    let mut cmd = Command::cargo_bin("rivet").unwrap();
    cmd.assert().success();
}

#[test]
fn check_reports_success() {
    let src = scratch_file("check-ok.rasm", b"mov r0, 1\nint 3\n");
    Command::cargo_bin("rivet")
        .unwrap()
        .arg("check")
        .arg(&src)
        .assert()
        .success()
        .stdout(predicate::str::contains("0 errors"));
}

#[test]
fn check_rejects_bad_source_with_diagnostics() {
    let src = scratch_file("check-bad.rasm", b"add r0\nint 3\n");
    Command::cargo_bin("rivet")
        .unwrap()
        .arg("check")
        .arg(&src)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Errors: 1"))
        .stderr(predicate::str::contains("at row 1"));
}

#[test]
fn run_executes_guest_output() {
    let src = scratch_file("run-out.rasm", b"mov ir, 64\nint 0\nint 0\nint 0\nint 3\n");
    Command::cargo_bin("rivet")
        .unwrap()
        .arg("run")
        .arg(&src)
        .assert()
        .success()
        .stdout(predicate::str::contains("@@@"));
}

#[test]
fn asm_writes_byte_exact_image() {
    let src = scratch_file("asm-halt.rasm", b"int 3\n");
    let dest = scratch_file("asm-halt.rvm", b"");
    Command::cargo_bin("rivet")
        .unwrap()
        .arg("asm")
        .arg(&src)
        .arg(&dest)
        .assert()
        .success()
        .stdout(predicate::str::contains("Saved to"));
    assert_eq!(fs::read(&dest).unwrap(), vec![0x0C, 0x03]);
}

#[test]
fn exec_runs_assembled_artifact() {
    let src = scratch_file("exec-src.rasm", b"mov ir, 35\nint 0\nint 3\n");
    let dest = scratch_file("exec-out.rvm", b"");
    Command::cargo_bin("rivet")
        .unwrap()
        .arg("asm")
        .arg(&src)
        .arg(&dest)
        .assert()
        .success();
    Command::cargo_bin("rivet")
        .unwrap()
        .arg("exec")
        .arg(&dest)
        .assert()
        .success()
        .stdout(predicate::str::contains("#"));
}

#[test]
fn exec_fault_exits_nonzero() {
    // A single unknown opcode byte
    let bin = scratch_file("fault.rvm", &[0xFF]);
    Command::cargo_bin("rivet")
        .unwrap()
        .arg("exec")
        .arg(&bin)
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid opcode"));
}

#[test]
fn unresolved_label_suppresses_output() {
    let src = scratch_file("unresolved.rasm", b"jmp nowhere\nint 3\n");
    let dest = std::env::temp_dir().join(format!("rivet-{}-unresolved.rvm", std::process::id()));
    Command::cargo_bin("rivet")
        .unwrap()
        .arg("asm")
        .arg(&src)
        .arg(&dest)
        .assert()
        .failure()
        .stderr(predicate::str::contains("never defined"));
    assert!(!dest.exists());
}
