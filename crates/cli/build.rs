//! Stamps the details `bridge version --verbose` prints.

use std::path::{Path, PathBuf};
use std::process::Command;

fn git(args: &[&str]) -> Option<String> {
    let out = Command::new("git").args(args).output().ok()?;
    out.status
        .success()
        .then(|| String::from_utf8_lossy(&out.stdout).trim().to_string())
}

/// Short commit hash, suffixed with `-dirty` when the tree has local edits.
fn revision() -> String {
    let Some(sha) = git(&["rev-parse", "--short=12", "HEAD"]).filter(|sha| !sha.is_empty()) else {
        return "unknown".to_string();
    };
    match git(&["status", "--porcelain", "--untracked-files=no"]) {
        Some(changes) if !changes.is_empty() => format!("{sha}-dirty"),
        _ => sha,
    }
}

/// The `wasmtime` requirement from the workspace manifest.
fn engine_requirement(manifest: &Path) -> Option<String> {
    let text = std::fs::read_to_string(manifest).ok()?;
    text.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("wasmtime")?.trim_start().strip_prefix('=')?;
        Some(rest.trim().trim_matches('"').to_string())
    })
}

fn main() {
    let crate_dir = PathBuf::from(std::env::var("CARGO_MANIFEST_DIR").unwrap_or_default());
    let workspace_manifest = crate_dir.join("../../Cargo.toml");

    let engine = engine_requirement(&workspace_manifest).unwrap_or_else(|| "unknown".to_string());
    let profile = std::env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());
    let target = std::env::var("TARGET").unwrap_or_else(|_| "unknown".to_string());

    println!("cargo:rustc-env=BRIDGE_REVISION={}", revision());
    println!("cargo:rustc-env=BRIDGE_WASMTIME={engine}");
    println!("cargo:rustc-env=BRIDGE_PROFILE={profile}");
    println!("cargo:rustc-env=BRIDGE_TARGET={target}");
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed={}", workspace_manifest.display());
}
