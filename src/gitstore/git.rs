//! Thin wrappers around the system `git` binary.

use crate::core::error::HoustonError;
use std::path::Path;
use std::process::Command;

pub fn run_git(repo_root: &Path, args: &[&str]) -> Result<String, HoustonError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_root)
        .output()
        .map_err(|e| HoustonError::GitError(format!("git {}: {}", args.join(" "), e)))?;

    if !output.status.success() {
        return Err(HoustonError::GitError(format!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

pub fn is_repository(root: &Path) -> bool {
    root.join(".git").exists()
}

pub fn init(root: &Path) -> Result<(), HoustonError> {
    std::fs::create_dir_all(root)?;
    run_git(root, &["init", "--quiet"])?;
    Ok(())
}

/// Clone `url` into `root`, which must not exist or be empty.
pub fn clone(url: &str, root: &Path) -> Result<(), HoustonError> {
    let parent = root
        .parent()
        .ok_or_else(|| HoustonError::PathError(format!("{} has no parent", root.display())))?;
    std::fs::create_dir_all(parent)?;
    let target = root.to_string_lossy();
    run_git(parent, &["clone", "--quiet", url, target.as_ref()])?;
    Ok(())
}

pub fn init_bare(path: &Path) -> Result<(), HoustonError> {
    std::fs::create_dir_all(path)?;
    run_git(path, &["init", "--quiet", "--bare"])?;
    Ok(())
}

pub fn add_remote(root: &Path, name: &str, url: &str) -> Result<(), HoustonError> {
    run_git(root, &["remote", "add", name, url])?;
    Ok(())
}

/// Push the current branch to `remote` and track it as upstream.
pub fn push(root: &Path, remote: &str) -> Result<(), HoustonError> {
    run_git(root, &["push", "--quiet", "--set-upstream", remote, "HEAD"])?;
    Ok(())
}

pub fn has_remote(root: &Path, name: &str) -> bool {
    run_git(root, &["remote"])
        .map(|remotes| remotes.lines().any(|r| r.trim() == name))
        .unwrap_or(false)
}

pub fn pull(root: &Path) -> Result<(), HoustonError> {
    run_git(root, &["pull", "--quiet", "--no-rebase", "--no-edit"])?;
    Ok(())
}

pub fn configure_identity(root: &Path, name: &str, email: &str) -> Result<(), HoustonError> {
    run_git(root, &["config", "user.name", name])?;
    run_git(root, &["config", "user.email", email])?;
    Ok(())
}

/// Current HEAD commit, or `None` for a repository without commits.
pub fn head(root: &Path) -> Option<String> {
    run_git(root, &["rev-parse", "--verify", "--quiet", "HEAD"])
        .ok()
        .filter(|sha| !sha.is_empty())
}

pub fn add(root: &Path, paths: &[&str]) -> Result<(), HoustonError> {
    let mut args = vec!["add", "--all", "--"];
    args.extend_from_slice(paths);
    run_git(root, &args)?;
    Ok(())
}

/// Commit the index and return the new HEAD. Empty commits are allowed so
/// every preparation produces a commit id.
pub fn commit(root: &Path, message: &str) -> Result<String, HoustonError> {
    run_git(root, &["commit", "--quiet", "--allow-empty", "-m", message])?;
    head(root).ok_or_else(|| HoustonError::GitError("commit produced no HEAD".to_string()))
}
