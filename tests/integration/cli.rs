//! The `bblkg` binary against a share on the local disk.

use crate::common::TestProject;
use assert_cmd::Command;
use predicates::prelude::*;

fn project_with_share() -> TestProject {
    let project = TestProject::new().unwrap();
    for version in ["1-0-0-1", "2-0-0-1"] {
        project.publish("winx64", "Foo", version, &[("Foo.dll", version), ("bin/tool.exe", "tool")]).unwrap();
    }
    project
        .write_config(&format!(
            "[servers.share]\nkind = \"fileshare\"\naddress = '{}'\n\n[sources.Foo]\nprg_server = \"share\"\nversion = \"*\"\n",
            project.share_template()
        ))
        .unwrap();
    project
}

const REQUEST: [&str; 7] = ["Foo", "--platform", "winx64", "--context", "Foo.PartFile.xml", "--part", "FooPart"];

#[test]
fn test_help_lists_commands() {
    Command::cargo_bin("bblkg")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("resolve"))
        .stdout(predicate::str::contains("fetch"))
        .stdout(predicate::str::contains("pull"))
        .stdout(predicate::str::contains("cache"));
}

#[test]
fn test_cache_info_without_config() {
    let project = TestProject::new().unwrap();
    project.run_bblkg(&["cache", "info"]).unwrap().assert_success().assert_stdout_contains("0 files");
}

#[test]
fn test_resolve_newest_version_as_json() {
    let project = project_with_share();
    let mut args = vec!["resolve"];
    args.extend(REQUEST);
    args.extend(["--format", "json"]);

    let output = project.run_bblkg(&args).unwrap();
    output.assert_success();
    let json: serde_json::Value = serde_json::from_str(&output.stdout).unwrap();
    assert_eq!(json["name"], "Foo");
    assert_eq!(json["server_kind"], "fileshare");
    assert_eq!(json["server"], "share");
    assert!(json["address"].as_str().unwrap().ends_with("2-0-0-1"));
}

#[test]
fn test_fetch_writes_provenance_then_skips() {
    let project = project_with_share();
    let dest = project.project_path().join("out").join("Foo");
    let dest_arg = dest.display().to_string();
    let mut args = vec!["fetch"];
    args.extend(REQUEST);
    args.extend(["--dest", dest_arg.as_str()]);

    project.run_bblkg(&args).unwrap().assert_success().assert_stdout_contains("Fetched");
    assert_eq!(std::fs::read_to_string(dest.join("Foo.dll")).unwrap(), "2-0-0-1");
    assert!(dest.join("bin/tool.exe").exists());
    let provenance = std::fs::read_to_string(dest.join("LkgProvenance.xml")).unwrap();
    assert!(provenance.contains("2-0-0-1"));

    project.run_bblkg(&args).unwrap().assert_success().assert_stdout_contains("Up to date");
}

#[test]
fn test_missing_config_fails() {
    let project = TestProject::new().unwrap();
    let mut args = vec!["resolve"];
    args.extend(REQUEST);
    project.run_bblkg(&args).unwrap().assert_failure().assert_stderr_contains("lkg.toml");
}

#[test]
fn test_unknown_source_fails() {
    let project = project_with_share();
    let output = project
        .run_bblkg(&["resolve", "Nope", "--platform", "winx64", "--context", "C.PartFile.xml", "--part", "P"])
        .unwrap();
    output.assert_failure().assert_stderr_contains("Nope");
}

#[test]
fn test_cache_clean_on_empty_cache() {
    let project = TestProject::new().unwrap();
    project.run_bblkg(&["cache", "clean"]).unwrap().assert_success().assert_stdout_contains("Removed 0");
}
