//! Test harness: a bare git remote, a seeded clone for external edits, and
//! document builders.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::process::Command;

use gitplane_store::{Options, Store};

pub const INTERVAL: Duration = Duration::from_millis(100);

pub struct Fixture {
    _root: TempDir,
    pub url: String,
    editor: PathBuf,
}

impl Fixture {
    /// Bare remote plus an "editor" clone standing in for third parties.
    /// `files` are `(relative path, content)` pairs committed up front.
    pub async fn new(files: &[(&str, &str)]) -> Self {
        // Commit identity for every git we spawn, the store's clones included.
        std::env::set_var("GIT_AUTHOR_NAME", "test");
        std::env::set_var("GIT_AUTHOR_EMAIL", "test@localhost");
        std::env::set_var("GIT_COMMITTER_NAME", "test");
        std::env::set_var("GIT_COMMITTER_EMAIL", "test@localhost");

        let root = TempDir::new().unwrap();
        let bare = root.path().join("remote.git");
        tokio::fs::create_dir_all(&bare).await.unwrap();
        git(&bare, &["init", "--bare", "--initial-branch=main"]).await;

        let editor = root.path().join("editor");
        let url = format!("file://{}", bare.display());
        git(root.path(), &["clone", &url, editor.to_str().unwrap()]).await;
        // The clone of an empty remote may fall back to init.defaultBranch.
        git(&editor, &["symbolic-ref", "HEAD", "refs/heads/main"]).await;

        let fixture = Self { _root: root, url, editor };
        fixture.write(".gitplane", "tracked\n").await;
        for (path, content) in files {
            fixture.write(path, content).await;
        }
        fixture.publish("seed").await;
        fixture
    }

    pub fn options(&self) -> Options {
        let mut options = Options::new(&self.url);
        options.branch = "main".into();
        options.interval = INTERVAL;
        options
    }

    pub async fn open(&self) -> Store {
        Store::open(self.options()).await.unwrap()
    }

    /// Stage a file in the editor clone without committing.
    pub async fn write(&self, path: &str, content: &str) {
        let full = self.editor.join(path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await.unwrap();
        }
        tokio::fs::write(&full, content).await.unwrap();
    }

    /// Commit and push everything staged in the editor clone.
    pub async fn publish(&self, message: &str) {
        git(&self.editor, &["add", "."]).await;
        git(&self.editor, &["commit", "-m", message]).await;
        git(&self.editor, &["push", "-u", "origin", "main"]).await;
    }

    /// Write, commit, and push one file as an outside process would.
    pub async fn push_file(&self, path: &str, content: &str) {
        git(&self.editor, &["pull", "--rebase"]).await;
        self.write(path, content).await;
        self.publish("external edit").await;
    }
}

async fn git(dir: &Path, args: &[&str]) {
    let out = Command::new("git").current_dir(dir).args(args).output().await.unwrap();
    assert!(
        out.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&out.stderr)
    );
}

pub fn widget_yaml(name: &str, spec: u64) -> String {
    format!(
        "apiVersion: example.com/v1\nkind: Widget\nmetadata:\n  name: {}\n  namespace: default\nspec:\n  replicas: {}\n",
        name, spec
    )
}

pub fn widget_doc(name: &str, spec: u64) -> Value {
    json!({
        "apiVersion": "example.com/v1",
        "kind": "Widget",
        "metadata": {"name": name, "namespace": "default"},
        "spec": {"replicas": spec},
    })
}

pub fn widget_gvk() -> gitplane_core::GroupVersionKind {
    gitplane_core::GroupVersionKind::new("example.com", "v1", "Widget")
}

/// Receive with a deadline; panics if the stream stalls.
pub async fn recv_event(
    watcher: &mut gitplane_store::Watcher,
    what: &str,
) -> gitplane_core::Event {
    tokio::time::timeout(Duration::from_secs(10), watcher.recv())
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", what))
        .unwrap_or_else(|| panic!("stream closed waiting for {}", what))
}

/// Assert nothing arrives for a little while.
pub async fn expect_quiet(watcher: &mut gitplane_store::Watcher) {
    let res = tokio::time::timeout(Duration::from_millis(400), watcher.recv()).await;
    assert!(res.is_err(), "expected no event, got {:?}", res.unwrap().map(|e| e.type_name()));
}
