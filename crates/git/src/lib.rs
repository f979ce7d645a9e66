//! Child-process wrapper around the `git` CLI.
//!
//! The store owns one `GitRepo` per tracked remote: a temporary working
//! tree cloned at startup and removed on close. Authentication is the
//! ambient git configuration's problem (credential helpers, SSH agent);
//! nothing here touches credentials.

#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Instant;

use metrics::{counter, histogram};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use gitplane_core::{Error, Result};

const COMMIT_MESSAGE: &str = "gitplane update";

/// A cloned working tree plus the handful of git operations the store needs.
///
/// Callers serialize mutations externally (the store holds its content lock
/// across every mutating call), so one git command runs at a time per repo.
pub struct GitRepo {
    dir: PathBuf,
    workdir: Mutex<Option<TempDir>>,
}

impl GitRepo {
    /// Clone `url` into a fresh temporary directory, optionally tracking
    /// `branch` instead of the remote HEAD.
    pub async fn clone(url: &str, branch: &str) -> Result<Self> {
        let workdir = TempDir::with_prefix("gitplane-")?;
        let dir = workdir.path().to_path_buf();

        let mut args = vec!["clone"];
        if !branch.is_empty() {
            args.push("-b");
            args.push(branch);
        }
        args.push(url);
        let dir_str = dir.to_string_lossy().into_owned();
        args.push(&dir_str);

        run_git(None, &args).await?;
        info!(url = %url, dir = %dir.display(), "cloned repository");

        Ok(Self { dir, workdir: Mutex::new(Some(workdir)) })
    }

    /// Root of the working tree.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Pull (rebasing over remote changes) and return the new HEAD.
    pub async fn update(&self) -> Result<String> {
        self.git(&["pull", "--rebase"]).await?;
        self.head().await
    }

    /// Write a file into the tree (directories 0755, file 0644) and commit +
    /// push it. On stage failure the written file is removed; on commit or
    /// push failure the tree is reset to `origin/HEAD` so the checkout never
    /// diverges from the remote.
    pub async fn add(&self, path: &Path, data: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            self.make_parents(parent).await?;
        }
        write_file(path, data).await?;

        let path_str = path.to_string_lossy();
        if let Err(err) = self.git(&["add", &path_str]).await {
            let _ = tokio::fs::remove_file(path).await;
            return Err(err);
        }

        self.commit_and_push().await
    }

    /// Create missing parent directories one component at a time, chmodding
    /// each one this call creates to 0755 so the mode holds under any umask.
    async fn make_parents(&self, parent: &Path) -> Result<()> {
        let rel = match parent.strip_prefix(&self.dir) {
            Ok(rel) => rel,
            Err(_) => {
                tokio::fs::create_dir_all(parent).await?;
                return Ok(());
            }
        };
        let mut current = self.dir.clone();
        for component in rel.components() {
            current.push(component);
            match tokio::fs::create_dir(&current).await {
                Ok(()) => {
                    #[cfg(unix)]
                    {
                        use std::os::unix::fs::PermissionsExt;
                        tokio::fs::set_permissions(
                            &current,
                            std::fs::Permissions::from_mode(0o755),
                        )
                        .await?;
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    /// Remove a file from the tree and commit + push the removal.
    pub async fn delete(&self, path: &Path) -> Result<()> {
        let path_str = path.to_string_lossy();
        self.git(&["rm", "-f", &path_str]).await?;
        self.commit_and_push().await
    }

    /// Trimmed `rev-parse HEAD`.
    pub async fn head(&self) -> Result<String> {
        let out = self.git(&["rev-parse", "HEAD"]).await?;
        Ok(out.trim().to_string())
    }

    /// Remove the working directory. Idempotent; later operations fail with
    /// plain git errors rather than panicking.
    pub fn close(&self) -> Result<()> {
        let taken = self
            .workdir
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(workdir) = taken {
            workdir.close()?;
        }
        Ok(())
    }

    async fn commit_and_push(&self) -> Result<()> {
        if let Err(err) = self.git(&["commit", "-m", COMMIT_MESSAGE]).await {
            self.rollback().await;
            return Err(err);
        }
        if let Err(err) = self.git(&["push"]).await {
            self.rollback().await;
            return Err(err);
        }
        Ok(())
    }

    async fn rollback(&self) {
        if let Err(err) = self.git(&["reset", "--hard", "origin/HEAD"]).await {
            warn!(error = %err, "rollback reset failed");
        }
    }

    async fn git(&self, args: &[&str]) -> Result<String> {
        run_git(Some(&self.dir), args).await
    }
}

/// Run one git command, returning captured stdout. Stderr is captured too
/// and folded into the error text on non-zero exit, otherwise logged at
/// debug level.
async fn run_git(dir: Option<&Path>, args: &[&str]) -> Result<String> {
    info!("git {}", args.join(" "));
    let started = Instant::now();

    let mut cmd = Command::new("git");
    if let Some(dir) = dir {
        cmd.current_dir(dir);
    }
    let output = cmd
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| Error::Git(format!("spawning git {}: {}", args.join(" "), e)))?;

    histogram!("git_command_ms", started.elapsed().as_secs_f64() * 1000.0);

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        debug!(stderr = %stderr.trim(), "git {}", args.join(" "));
    }

    if !output.status.success() {
        counter!("git_command_errors_total", 1u64);
        return Err(Error::Git(format_failure(args, &stdout, &stderr, output.status.code())));
    }
    Ok(stdout)
}

/// Write the file with an explicit 0644 mode, umask notwithstanding.
async fn write_file(path: &Path, data: &[u8]) -> Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o644);
    let mut file = options.open(path).await?;
    file.write_all(data).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o644)).await?;
    }
    Ok(())
}

fn format_failure(args: &[&str], stdout: &str, stderr: &str, code: Option<i32>) -> String {
    let detail = match (stderr.trim().is_empty(), stdout.trim().is_empty()) {
        (true, true) => format!("exit code {}", code.unwrap_or(-1)),
        (true, false) => stdout.trim().to_string(),
        (false, true) => stderr.trim().to_string(),
        (false, false) => format!("{}\n{}", stderr.trim(), stdout.trim()),
    };
    format!("git {}: {}", args.join(" "), detail)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run(dir: &Path, args: &[&str]) {
        let out = Command::new("git")
            .current_dir(dir)
            .args(args)
            .output()
            .await
            .unwrap();
        assert!(out.status.success(), "git {:?} failed: {}", args, String::from_utf8_lossy(&out.stderr));
    }

    async fn configure_identity(dir: &Path) {
        run(dir, &["config", "user.email", "test@localhost"]).await;
        run(dir, &["config", "user.name", "test"]).await;
    }

    /// Bare remote seeded with a single commit, returned with its on-disk URL.
    async fn seeded_remote() -> (TempDir, String) {
        let root = TempDir::new().unwrap();
        let bare = root.path().join("remote.git");
        tokio::fs::create_dir_all(&bare).await.unwrap();
        run(&bare, &["init", "--bare", "--initial-branch=main"]).await;

        let seed = root.path().join("seed");
        tokio::fs::create_dir_all(&seed).await.unwrap();
        run(&seed, &["init", "--initial-branch=main"]).await;
        configure_identity(&seed).await;
        tokio::fs::write(seed.join("README.md"), b"seed\n").await.unwrap();
        run(&seed, &["add", "."]).await;
        run(&seed, &["commit", "-m", "seed"]).await;
        run(&seed, &["remote", "add", "origin", bare.to_str().unwrap()]).await;
        run(&seed, &["push", "-u", "origin", "main"]).await;

        let url = format!("file://{}", bare.display());
        (root, url)
    }

    #[tokio::test]
    async fn clone_and_head() {
        let (_root, url) = seeded_remote().await;
        let repo = GitRepo::clone(&url, "main").await.unwrap();
        let head = repo.head().await.unwrap();
        assert_eq!(head.len(), 40);
        repo.close().unwrap();
    }

    #[tokio::test]
    async fn add_commits_and_pushes() {
        let (_root, url) = seeded_remote().await;
        let repo = GitRepo::clone(&url, "main").await.unwrap();
        configure_identity(repo.dir()).await;
        let before = repo.head().await.unwrap();

        let file = repo.dir().join("objects").join("widget.yaml");
        repo.add(&file, b"kind: Widget\n").await.unwrap();

        let after = repo.head().await.unwrap();
        assert_ne!(before, after);
        // Remote advanced too: pull finds nothing new.
        assert_eq!(repo.update().await.unwrap(), after);
        repo.close().unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn add_sets_explicit_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let (_root, url) = seeded_remote().await;
        let repo = GitRepo::clone(&url, "main").await.unwrap();
        configure_identity(repo.dir()).await;

        let file = repo.dir().join("objects/example.com/widget.yaml");
        repo.add(&file, b"kind: Widget\n").await.unwrap();

        let mode = |p: &Path| std::fs::metadata(p).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode(&file), 0o644);
        assert_eq!(mode(&repo.dir().join("objects")), 0o755);
        assert_eq!(mode(&repo.dir().join("objects/example.com")), 0o755);

        repo.close().unwrap();
    }

    #[tokio::test]
    async fn delete_removes_and_pushes() {
        let (_root, url) = seeded_remote().await;
        let repo = GitRepo::clone(&url, "main").await.unwrap();
        configure_identity(repo.dir()).await;

        let file = repo.dir().join("widget.yaml");
        repo.add(&file, b"kind: Widget\n").await.unwrap();
        repo.delete(&file).await.unwrap();
        assert!(!file.exists());
        repo.close().unwrap();
    }

    #[tokio::test]
    async fn delete_of_untracked_path_fails() {
        let (_root, url) = seeded_remote().await;
        let repo = GitRepo::clone(&url, "main").await.unwrap();
        let err = repo.delete(&repo.dir().join("missing.yaml")).await.unwrap_err();
        assert!(matches!(err, Error::Git(_)));
        repo.close().unwrap();
    }

    #[tokio::test]
    async fn rejected_push_rolls_back_the_tree() {
        let (root, url) = seeded_remote().await;
        let repo = GitRepo::clone(&url, "main").await.unwrap();
        configure_identity(repo.dir()).await;

        // Advance the remote from a second clone so our next push is
        // non-fast-forward.
        let other = root.path().join("other");
        run(root.path(), &["clone", &url, other.to_str().unwrap()]).await;
        configure_identity(&other).await;
        tokio::fs::write(other.join("outside.yaml"), b"kind: Other\n").await.unwrap();
        run(&other, &["add", "."]).await;
        run(&other, &["commit", "-m", "outside edit"]).await;
        run(&other, &["push"]).await;

        let file = repo.dir().join("widget.yaml");
        let err = repo.add(&file, b"kind: Widget\n").await.unwrap_err();
        assert!(matches!(err, Error::Git(_)));
        // reset --hard origin/HEAD dropped the local commit and the file.
        assert!(!file.exists());
        repo.close().unwrap();
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (_root, url) = seeded_remote().await;
        let repo = GitRepo::clone(&url, "").await.unwrap();
        repo.close().unwrap();
        repo.close().unwrap();
    }
}
