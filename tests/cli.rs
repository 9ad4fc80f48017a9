use assert_cmd::Command;
use predicates::prelude::*;

fn gantry(dir: &tempfile::TempDir) -> Command {
    let mut cmd = Command::cargo_bin("gantry").unwrap();
    cmd.arg("-C").arg(dir.path()).env("GANTRY_LOG", "warn");
    cmd
}

#[test]
fn unknown_task_exits_non_zero() {
    let dir = tempfile::tempdir().unwrap();

    gantry(&dir)
        .arg("nope")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Task 'nope' is not defined"));
}

#[test]
fn build_is_a_cycle() {
    let dir = tempfile::tempdir().unwrap();

    gantry(&dir)
        .arg("build")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Circular dependency detected at task 'build'"));
}

#[test]
fn unknown_task_stops_the_whole_invocation() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("dist")).unwrap();
    std::fs::write(dir.path().join("dist/index.html"), "").unwrap();

    gantry(&dir).args(["clean", "nope"]).assert().failure();

    assert!(dir.path().join("dist/index.html").exists());
}

#[test]
fn list_shows_tasks() {
    let dir = tempfile::tempdir().unwrap();

    gantry(&dir)
        .arg("--list")
        .assert()
        .success()
        .stdout(predicate::str::contains("sass"))
        .stdout(predicate::str::contains("serve:dist"))
        .stdout(predicate::str::contains("Circular dependency"));
}

#[test]
fn graph_prints_mermaid() {
    let dir = tempfile::tempdir().unwrap();

    gantry(&dir)
        .args(["--graph", "lint"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("graph LR"))
        .stdout(predicate::str::contains("jasmine"));
}

#[test]
fn malformed_manifest_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("package.json"), "{ not json").unwrap();

    gantry(&dir)
        .arg("clean")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Couldn't parse manifest"));
}
