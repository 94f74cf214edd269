//! Lock contention between two real processes. The test binary re-executes
//! itself to run `hold_lock_child`, which keeps the lock until its stdin closes.

use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Command, Stdio};

use tsvpn::{AcquireOutcome, SingleInstanceGuard};

const LOCK_PATH_ENV: &str = "TSVPN_TEST_LOCK_PATH";
const READY: &str = "lock-held";

#[test]
#[ignore = "helper process for other_process_holding_the_lock"]
fn hold_lock_child() {
    let Ok(path) = std::env::var(LOCK_PATH_ENV) else {
        return;
    };
    let mut guard = SingleInstanceGuard::new(PathBuf::from(path));
    assert!(matches!(guard.acquire(), AcquireOutcome::Acquired));
    println!("{}", READY);

    let mut rest = Vec::new();
    let _ = std::io::stdin().read_to_end(&mut rest);
    guard.release();
}

#[test]
fn other_process_holding_the_lock() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.lock");

    let mut child = Command::new(std::env::current_exe().unwrap())
        // `--test-threads=2` keeps libtest from printing "test ... " on the
        // same line as READY when the machine has a single CPU.
        .args([
            "hold_lock_child",
            "--exact",
            "--ignored",
            "--nocapture",
            "--test-threads=2",
        ])
        .env(LOCK_PATH_ENV, &path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .unwrap();

    let stdout = child.stdout.take().unwrap();
    let mut lines = BufReader::new(stdout).lines();
    assert!(
        lines.by_ref().map_while(Result::ok).any(|line| line.trim() == READY),
        "child never reported holding the lock"
    );

    let mut guard = SingleInstanceGuard::new(&path);
    assert!(matches!(guard.acquire(), AcquireOutcome::HeldByOther));

    drop(child.stdin.take());
    assert!(child.wait().unwrap().success());

    assert!(matches!(guard.acquire(), AcquireOutcome::Acquired));
    guard.release();
    assert!(!path.exists());
}
