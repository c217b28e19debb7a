//! Build identification for the greenscan binary
//!
//! Exposes GIT_HASH, BUILD_TIMESTAMP and BUILD_PROFILE to `env!`. A hash
//! ending in `-dirty` means the tree had uncommitted changes.

use std::env;
use std::process::Command;

/// Trimmed stdout of a successful git invocation
fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout)
        .ok()
        .map(|out| out.trim().to_owned())
}

fn git_hash() -> String {
    let Some(hash) = git(&["rev-parse", "--short=8", "HEAD"]) else {
        return "unknown".to_owned();
    };
    match git(&["status", "--porcelain", "--untracked-files=no"]) {
        Some(changes) if !changes.is_empty() => format!("{}-dirty", hash),
        _ => hash,
    }
}

fn main() {
    // new commits and staged changes
    for path in ["../.git/HEAD", "../.git/index"] {
        println!("cargo:rerun-if-changed={}", path);
    }
    println!("cargo:rerun-if-changed=build.rs");

    let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
    let profile = env::var("PROFILE").unwrap_or_else(|_| "unknown".to_owned());

    for (key, value) in [
        ("GIT_HASH", git_hash()),
        ("BUILD_TIMESTAMP", timestamp.to_string()),
        ("BUILD_PROFILE", profile),
    ] {
        println!("cargo:rustc-env={}={}", key, value);
    }
}
