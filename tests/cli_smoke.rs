use std::process::Command;

use tempfile::tempdir;

fn digest() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_digest"));
    // Keep the smoke tests independent of the caller's environment.
    cmd.env_remove("DIGEST_MODEL")
        .env_remove("DIGEST_CONTEXT_LIMIT")
        .env_remove("DIGEST_MAX_CONCURRENCY")
        .env("RUST_LOG", "warn");
    cmd
}

#[test]
fn cli_scan_prints_tree_and_single_call_route() {
    let dir = tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    std::fs::write(dir.path().join("src/main.rs"), "fn main() {}\n").unwrap();

    let output = digest().arg("scan").arg(dir.path()).output().unwrap();
    assert!(output.status.success(), "{output:?}");

    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("└── src"));
    assert!(stdout.contains("    └── main.rs"));
    assert!(stdout.contains("files: 1"));
    assert!(stdout.contains("strategy: single call"));
}

#[test]
fn cli_scan_reports_map_reduce_for_a_small_context() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("digest.toml");
    std::fs::write(
        &config,
        "[limits]\ncontext_limit = 4000\noverhead_reserve = 500\nreduce_budget = 2000\n",
    )
    .unwrap();
    let project = dir.path().join("project");
    std::fs::create_dir_all(&project).unwrap();
    for i in 0..4 {
        std::fs::write(project.join(format!("mod_{i}.rs")), "x".repeat(9_000)).unwrap();
    }

    let output = digest()
        .arg("--config")
        .arg(&config)
        .arg("scan")
        .arg(&project)
        .output()
        .unwrap();
    assert!(output.status.success(), "{output:?}");

    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("threshold: 3500 (context 4000 - reserve 500)"));
    assert!(stdout.contains("strategy: map-reduce"));
}

#[test]
fn cli_scan_fails_on_missing_directory() {
    let dir = tempdir().unwrap();
    let output = digest()
        .arg("scan")
        .arg(dir.path().join("missing"))
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("NotADirectory"), "{stderr}");
}
