use assert_cmd::cargo::cargo_bin_cmd;

fn fixture(path: &str) -> String {
    format!("{}/tests/fixtures/{path}", env!("CARGO_MANIFEST_DIR"))
}

#[test]
fn help_lists_flags() {
    let mut cmd = cargo_bin_cmd!("handoff");
    cmd.arg("--help");
    let out = cmd.assert().success();
    let stdout = String::from_utf8(out.get_output().stdout.clone()).expect("utf8");

    assert!(stdout.contains("--stubs"));
    assert!(stdout.contains("--items"));
    assert!(stdout.contains("--record"));
}

#[test]
fn sync_against_fixture_stubs_uploads_missing_item() {
    let temp = tempfile::tempdir().expect("tempdir");
    let record = temp.path().join("calls.jsonl");
    let mut cmd = cargo_bin_cmd!("handoff");
    cmd.arg("--stubs")
        .arg(fixture("stubs/sync-ok.toml"))
        .arg("--items")
        .arg(fixture("items"))
        .arg("--record")
        .arg(&record);
    let out = cmd.assert().success();
    let stdout = String::from_utf8(out.get_output().stdout.clone()).expect("utf8");

    assert!(stdout.contains("POST /api/items?name=Item1.txt -> 201"));
    assert!(!stdout.contains("name=Item2.txt"));
    assert!(stdout.contains("uploaded=1 skipped=1"));
    let recorded = std::fs::read_to_string(record).expect("record");
    assert_eq!(recorded.lines().count(), 3);
}

#[test]
fn rejected_login_exits_nonzero() {
    let mut cmd = cargo_bin_cmd!("handoff");
    cmd.arg("--stubs").arg(fixture("stubs/login-rejected.toml"));
    let out = cmd.assert().failure();
    let stderr = String::from_utf8(out.get_output().stderr.clone()).expect("utf8");
    assert!(stderr.contains("unexpected response status 401"));
}

#[test]
fn invalid_config_exits_nonzero() {
    let mut cmd = cargo_bin_cmd!("handoff");
    cmd.arg("--stubs")
        .arg(fixture("stubs/sync-ok.toml"))
        .arg("--config")
        .arg(fixture("configs/bad-base.toml"));
    cmd.assert().failure();
}

#[test]
fn missing_stub_file_exits_nonzero() {
    let mut cmd = cargo_bin_cmd!("handoff");
    cmd.arg("--stubs").arg(fixture("stubs/missing.toml"));
    cmd.assert().failure();
}
