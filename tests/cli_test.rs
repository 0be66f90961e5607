//! Integration tests for the CLI

use std::fs;
use std::path::Path;
use std::process::Command;

const NESTED: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/discovery/nested_projects");

fn cargo_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_terragrunt-atlantis-config"))
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn parse(stdout: &[u8]) -> serde_yaml::Value {
    serde_yaml::from_slice(stdout).expect("Output should be valid YAML")
}

#[test]
fn test_cli_help() {
    let output = cargo_bin().args(["generate", "--help"]).output().expect("Failed to execute");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("--root"));
    assert!(stdout.contains("--cascade-dependencies"));
    assert!(stdout.contains("Ignore `dependency` blocks"));
}

#[test]
fn test_cli_version() {
    let output = cargo_bin().arg("--version").output().expect("Failed to execute");
    assert!(output.status.success());

    let output = cargo_bin().arg("version").output().expect("Failed to execute");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("terragrunt-atlantis-config {}", env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_cli_nonexistent_dir() {
    let output = cargo_bin()
        .args(["generate", "--root", "/nonexistent/path"])
        .output()
        .expect("Failed to execute");

    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("does not exist"));
}

#[test]
fn test_cli_stdout_output() {
    let output = cargo_bin().args(["generate", "--root", NESTED]).output().expect("Failed to execute");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let parsed = parse(&output.stdout);
    assert_eq!(parsed["version"].as_u64(), Some(3));
    assert_eq!(parsed["parallel_plan"].as_bool(), Some(true));

    let dirs: Vec<&str> = parsed["projects"]
        .as_sequence()
        .unwrap()
        .iter()
        .map(|p| p["dir"].as_str().unwrap())
        .collect();
    assert_eq!(dirs, vec!["live/prod/app", "live/prod/vpc", "live/staging/vpc"]);

    let app_watches: Vec<&str> = parsed["projects"][0]["autoplan"]["when_modified"]
        .as_sequence()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    assert!(app_watches.contains(&"../vpc/terragrunt.hcl"));
    assert!(app_watches.contains(&"../../root.hcl"));
}

#[test]
fn test_cli_flags_with_values() {
    let output = cargo_bin()
        .args([
            "generate",
            "--root",
            NESTED,
            "--parallel=false",
            "--autoplan",
            "--workflow",
            "terragrunt",
            "--apply-requirements",
            "approved,mergeable",
            "--filter",
            "live/prod/*",
            "--execution-order-groups",
        ])
        .output()
        .expect("Failed to execute");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let parsed = parse(&output.stdout);
    assert_eq!(parsed["parallel_apply"].as_bool(), Some(false));

    let projects = parsed["projects"].as_sequence().unwrap();
    assert_eq!(projects.len(), 2);
    // vpc is leveled before app
    assert_eq!(projects[0]["dir"].as_str(), Some("live/prod/vpc"));
    assert_eq!(projects[0]["execution_order_group"].as_u64(), Some(0));
    assert_eq!(projects[1]["execution_order_group"].as_u64(), Some(1));
    assert_eq!(projects[1]["workflow"].as_str(), Some("terragrunt"));
    assert_eq!(projects[1]["autoplan"]["enabled"].as_bool(), Some(true));
    assert_eq!(projects[1]["apply_requirements"][1].as_str(), Some("mergeable"));
}

#[test]
fn test_cli_writes_output_file_and_preserves_workflows() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(root, "vpc/terragrunt.hcl", "terraform {\n  source = \"git::git@github.com:org/modules.git//vpc\"\n}\n");
    write(
        root,
        "atlantis.yaml",
        "version: 3\nworkflows:\n  terragrunt:\n    plan:\n      steps:\n      - run: terragrunt plan\n",
    );
    let output_file = root.join("atlantis.yaml");

    let output = cargo_bin()
        .arg("generate")
        .arg("--root")
        .arg(root)
        .arg("--output")
        .arg(&output_file)
        .output()
        .expect("Failed to execute");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert!(output.stdout.is_empty());

    let written = parse(&fs::read(&output_file).unwrap());
    assert_eq!(written["projects"][0]["dir"].as_str(), Some("vpc"));
    assert_eq!(
        written["workflows"]["terragrunt"]["plan"]["steps"][0]["run"].as_str(),
        Some("terragrunt plan")
    );
}

#[test]
fn test_cli_broken_module_fails_without_output() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(root, "good/terragrunt.hcl", "terraform {\n  source = \"git::git@github.com:org/modules.git//a\"\n}\n");
    write(root, "bad/terragrunt.hcl", "terraform {\n  source = \n");
    let output_file = root.join("atlantis.yaml");

    let output = cargo_bin()
        .arg("generate")
        .arg("--root")
        .arg(root)
        .arg("--output")
        .arg(&output_file)
        .output()
        .expect("Failed to execute");

    assert!(!output.status.success());
    assert!(!output_file.exists());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("bad"));
}

#[test]
fn test_cli_verbose_logs_to_stderr() {
    let output = cargo_bin()
        .args(["--verbose", "generate", "--root", NESTED])
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute");

    assert!(output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("processing module"));
    parse(&output.stdout);
}
