use std::process::Command;

/// Short sha of HEAD, suffixed with `-dirty` when the worktree has changes.
fn describe_head() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }

    let mut sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if sha.is_empty() {
        return None;
    }

    let clean = Command::new("git")
        .args(["diff", "--quiet"])
        .status()
        .map(|s| s.success())
        .unwrap_or(true);
    if !clean {
        sha.push_str("-dirty");
    }
    Some(sha)
}

fn main() {
    let sha = describe_head().unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rustc-env=TDA_GIT_SHA={sha}");
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");
}
