use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use std::time::{SystemTime, UNIX_EPOCH};
use tempfile::TempDir;

const HOUR_MS: u64 = 60 * 60 * 1000;

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as u64
}

/// Writes a contacts file: two active contacts, one of them with an expired
/// credential, plus the local identity.
fn contacts_file(dir: &TempDir, local_id: Option<&str>) -> String {
    let recent = now_ms() - HOUR_MS;
    let local = match local_id {
        Some(id) => format!(r#""localId": "{}","#, id),
        None => String::new(),
    };
    let json = format!(
        r#"{{
            {local}
            "contacts": [
                {{"id": "me", "kind": "individual", "lastActivityAt": {recent}}},
                {{"id": "alice", "kind": "individual", "e164": "+15550001", "lastActivityAt": {recent}}},
                {{"id": "bob", "kind": "individual", "lastActivityAt": {recent},
                  "profileCredential": {{"credential": "old", "expiresAt": 1}}}}
            ]
        }}"#
    );
    let path = dir.path().join("contacts.json");
    fs::write(&path, json).unwrap();
    path.to_str().unwrap().to_string()
}

/// Dry run prints the selection and leaves the contacts file untouched.
#[test]
fn test_dry_run_lists_selection() {
    let dir = TempDir::new().unwrap();
    let contacts = contacts_file(&dir, Some("me"));
    let before = fs::read_to_string(&contacts).unwrap();
    let state = dir.path().join("state.json");

    cargo_bin_cmd!("freshen")
        .args(&["--contacts", &contacts, "--state", state.to_str().unwrap(), "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[DRY RUN] 2 of 3 contact(s) would be refreshed"))
        .stdout(predicate::str::contains("[DRY RUN] alice +15550001"))
        .stdout(predicate::str::contains("[DRY RUN] bob (expired credential)"))
        .stdout(predicate::str::contains("[DRY RUN] me").not());

    assert_eq!(fs::read_to_string(&contacts).unwrap(), before);
    assert!(!state.exists());
}

/// --max caps the preview.
#[test]
fn test_dry_run_respects_max() {
    let dir = TempDir::new().unwrap();
    let contacts = contacts_file(&dir, Some("me"));

    cargo_bin_cmd!("freshen")
        .args(&["--contacts", &contacts, "--max", "1", "--dry-run"])
        .current_dir(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("[DRY RUN] 1 of 3 contact(s) would be refreshed"));
}

/// Without a local identity there is nothing to preview.
#[test]
fn test_dry_run_without_local_identity_fails() {
    let dir = TempDir::new().unwrap();
    let contacts = contacts_file(&dir, None);

    cargo_bin_cmd!("freshen")
        .args(&["--contacts", &contacts, "--dry-run"])
        .current_dir(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("local identity"));
}

#[test]
fn test_status_without_state_is_ready() {
    let dir = TempDir::new().unwrap();
    let state = dir.path().join("state.json");

    cargo_bin_cmd!("freshen")
        .args(&["--status", "--state", state.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Ready"));
}

#[test]
fn test_status_after_recent_pass_is_cooling_down() {
    let dir = TempDir::new().unwrap();
    let state = dir.path().join("state.json");
    fs::write(&state, format!(r#"{{"lastAttemptAt": {}}}"#, now_ms())).unwrap();

    cargo_bin_cmd!("freshen")
        .args(&["--status", "--state", state.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Cooling down"));
}

/// A single pass with a helper that always succeeds fetches everything selected
/// and records the trigger time.
#[cfg(unix)]
#[test]
fn test_single_pass_with_succeeding_helper() {
    let dir = TempDir::new().unwrap();
    let contacts = contacts_file(&dir, Some("me"));
    let state = dir.path().join("state.json");

    cargo_bin_cmd!("freshen")
        .args(&[
            "--contacts", &contacts,
            "--state", state.to_str().unwrap(),
            "--fetch-cmd", "true",
            "--once",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("2/2 profile(s) fetched"));

    let saved = fs::read_to_string(&state).unwrap();
    assert!(saved.contains("lastAttemptAt"));
    let rewritten = fs::read_to_string(&contacts).unwrap();
    assert!(!rewritten.contains("\"old\""));
}

/// Failing fetches are counted, not fatal.
#[cfg(unix)]
#[test]
fn test_single_pass_with_failing_helper() {
    let dir = TempDir::new().unwrap();
    let contacts = contacts_file(&dir, Some("me"));

    cargo_bin_cmd!("freshen")
        .args(&["--contacts", &contacts, "--fetch-cmd", "false", "--once"])
        .current_dir(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("0/2 profile(s) fetched"));
}

#[test]
fn test_unknown_helper_fails() {
    let dir = TempDir::new().unwrap();
    let contacts = contacts_file(&dir, Some("me"));

    cargo_bin_cmd!("freshen")
        .args(&["--contacts", &contacts, "--fetch-cmd", "freshen-no-such-helper", "--once"])
        .current_dir(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

/// Running with no arguments should fail (clap requires --contacts or --status).
#[test]
fn test_no_args_shows_error() {
    cargo_bin_cmd!("freshen")
        .assert()
        .failure();
}
