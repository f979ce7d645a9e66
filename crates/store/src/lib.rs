//! Revisioned object store backed by a git working tree.
//!
//! Every object is a YAML file in the checkout and every mutation is a
//! commit + push. Pulls that move HEAD become new revisions in an
//! append-only log that watchers replay from any starting point.

#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, histogram};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use gitplane_core::prelude::*;
use gitplane_git::GitRepo;

mod operations;
mod revision;
mod scan;
mod watcher;

pub use watcher::{CancelHandle, Watcher};

use revision::RevisionLog;
use scan::Scanner;

/// Store configuration. `url` is the only required field.
#[derive(Debug, Clone)]
pub struct Options {
    /// Remote git URL to clone and track.
    pub url: String,
    /// Branch to pull from and push to; empty tracks the remote HEAD.
    pub branch: String,
    /// Directory under the repo root holding object files; empty means the
    /// repo root itself.
    pub sub_directory: String,
    /// Poll period for surfacing third-party commits.
    pub interval: Duration,
}

impl Options {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            branch: String::new(),
            sub_directory: String::new(),
            interval: Duration::from_secs(15),
        }
    }
}

/// Broadcast value standing in for a condition variable: watchers park on
/// changes to this pair instead of a condvar wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Signal {
    pub revisions: usize,
    pub stopped: bool,
}

pub(crate) struct State {
    pub log: RevisionLog,
    pub current_commit: String,
    pub stopped: bool,
}

impl State {
    /// Linear scan of the tail revision for a key match.
    pub fn find(&self, gvk: &GroupVersionKind, namespace: &str, name: &str) -> Option<&Arc<Object>> {
        self.log.tail().data.iter().find_map(|(key, obj)| {
            (key.kind == gvk.kind
                && key.group == gvk.group
                && key.namespace == namespace
                && key.name == name)
                .then_some(obj)
        })
    }
}

pub(crate) struct Shared {
    pub options: Options,
    pub repo: GitRepo,
    pub scanner: Scanner,
    pub state: RwLock<State>,
    pub signal: watch::Sender<Signal>,
    refresh: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Handle to the store. Cheap to clone; all clones share the same state and
/// working tree.
#[derive(Clone)]
pub struct Store {
    pub(crate) shared: Arc<Shared>,
}

impl Store {
    /// Clone the remote, build revision 1 from the checkout, and start the
    /// background refresh loop.
    pub async fn open(options: Options) -> Result<Self> {
        let repo = GitRepo::clone(&options.url, &options.branch).await?;
        let mut scan_root = repo.dir().to_path_buf();
        if !options.sub_directory.is_empty() {
            scan_root.push(&options.sub_directory);
        }

        let log = RevisionLog::new();
        let (signal, _) = watch::channel(Signal { revisions: log.len(), stopped: false });
        let shared = Arc::new(Shared {
            options,
            repo,
            scanner: Scanner::new(scan_root),
            state: RwLock::new(State { log, current_commit: String::new(), stopped: false }),
            signal,
            refresh: std::sync::Mutex::new(None),
        });
        let store = Store { shared };

        {
            let mut state = store.shared.state.write().await;
            store.scan_and_commit(&mut state).await?;
        }

        let refresh = tokio::spawn(store.clone().refresh_loop());
        *store.shared.refresh.lock().unwrap_or_else(|p| p.into_inner()) = Some(refresh);

        Ok(store)
    }

    /// The working tree path (object files live underneath it).
    pub fn workdir(&self) -> PathBuf {
        self.shared.repo.dir().to_path_buf()
    }

    async fn refresh_loop(self) {
        let mut ticker = tokio::time::interval(self.shared.options.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // first tick completes immediately
        let mut signal = self.shared.signal.subscribe();
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.refresh_and_scan().await {
                        error!(error = %err, "failed to update repo");
                    }
                }
                changed = signal.changed() => {
                    if changed.is_err() || signal.borrow().stopped {
                        return;
                    }
                }
            }
        }
    }

    /// One refresh cycle: pull, and rescan only when HEAD moved.
    async fn refresh_and_scan(&self) -> Result<()> {
        let mut state = self.shared.state.write().await;
        if state.stopped {
            return Ok(());
        }

        let commit = self.shared.repo.update().await?;
        if state.current_commit == commit {
            return Ok(());
        }

        self.scan_and_commit(&mut state).await
    }

    /// Scan the tree, parse every object file, and append the resulting
    /// revision (if any diff) to the log. Callers hold the write lock.
    pub(crate) async fn scan_and_commit(&self, state: &mut State) -> Result<()> {
        let started = std::time::Instant::now();
        let commit = self.shared.repo.head().await?;
        let paths = self.shared.scanner.scan()?;
        let files = revision::parse_files(&paths);
        histogram!("store_scan_ms", started.elapsed().as_secs_f64() * 1000.0);

        let appended = state.log.commit(files);
        state.current_commit = commit.clone();

        if appended {
            let revisions = state.log.len();
            info!(commit = %commit, revision = revisions - 1, "commit");
            let rev = state.log.tail();
            for obj in &rev.added {
                info!(path = %obj.path.display(), "-> added");
            }
            for obj in &rev.modified {
                info!(path = %obj.path.display(), "-> modified");
            }
            for obj in &rev.deleted {
                info!(path = %obj.path.display(), "-> deleted");
            }
            counter!("store_commits_total", 1u64);
            self.shared.signal.send_modify(|s| s.revisions = revisions);
        }
        Ok(())
    }

    /// Stop the refresh loop, wake every watcher, and remove the working
    /// directory. Safe to call more than once; reads keep serving the last
    /// revision afterwards.
    pub async fn close(&self) -> Result<()> {
        {
            let mut state = self.shared.state.write().await;
            if state.stopped {
                return Ok(());
            }
            state.stopped = true;
        }
        self.shared.signal.send_modify(|s| s.stopped = true);
        if let Some(handle) = self
            .shared
            .refresh
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
        {
            handle.abort();
        }
        self.shared.repo.close()
    }
}

pub(crate) fn queue_cap() -> usize {
    std::env::var("GITPLANE_QUEUE_CAP")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|cap| *cap > 0)
        .unwrap_or(1)
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("url", &self.shared.options.url)
            .finish()
    }
}

// Drop of the last handle leaves the refresh task running until it observes
// the closed signal channel; close() is the orderly path.
impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(handle) = self
            .refresh
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
        {
            handle.abort();
        }
        if let Err(err) = self.repo.close() {
            warn!(error = %err, "failed to remove working tree");
        }
    }
}
