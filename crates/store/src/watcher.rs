//! Per-subscriber watch workers.
//!
//! Each watcher owns a cursor into the revision log. The worker drains
//! forward under the read lock, emits outside it, and parks on the store's
//! broadcast signal when caught up. A slow consumer stalls only its own
//! worker; the committer never waits on watchers.

use std::sync::Arc;

use metrics::counter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use gitplane_core::{document, Error, Event, GroupVersionKind, Object, Result, Selector, WatchOptions};

use crate::{queue_cap, Shared, Store};

/// Aborts the worker task when cancelled.
pub struct CancelHandle {
    task: Option<JoinHandle<()>>,
}

impl CancelHandle {
    pub fn cancel(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle").finish()
    }
}

/// Handle to one watch stream: a bounded event channel plus cancellation.
pub struct Watcher {
    rx: mpsc::Receiver<Event>,
    cancel: CancelHandle,
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher").finish()
    }
}

impl Watcher {
    /// Next event; `None` once the stream is closed.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Stop the stream and drop any undelivered events.
    pub fn stop(self) {
        self.cancel.cancel();
    }

    /// Split into the raw receiver and its cancel handle.
    pub fn into_parts(self) -> (mpsc::Receiver<Event>, CancelHandle) {
        (self.rx, self.cancel)
    }
}

impl Store {
    /// Open an event stream for one GVK. `resource_version` picks the
    /// starting point: empty replays everything, otherwise events resume
    /// just after the given revision. The selector filters on labels.
    pub async fn watch(&self, gvk: &GroupVersionKind, opts: WatchOptions) -> Result<Watcher> {
        let selector = Selector::parse(&opts.label_selector)?;
        let start = {
            let state = self.shared.state.read().await;
            starting_revision(&opts.resource_version, state.log.len())?
        };

        info!(gvk = %gvk, start, selector = %opts.label_selector, "watch opened");
        let (tx, rx) = mpsc::channel(queue_cap());
        let shared = self.shared.clone();
        let gvk = gvk.clone();
        let task = tokio::spawn(async move {
            run_watch(shared, gvk, selector, start, tx).await;
        });

        Ok(Watcher { rx, cancel: CancelHandle { task: Some(task) } })
    }
}

/// Map a caller-supplied resource version to the first revision index to
/// deliver. Versions at or past the tail are rejected.
fn starting_revision(resource_version: &str, log_len: usize) -> Result<usize> {
    if resource_version.is_empty() {
        return Ok(0);
    }
    let rev: usize = resource_version
        .parse()
        .map_err(|_| Error::BadRequest(format!("invalid resourceVersion {}", resource_version)))?;
    if rev >= log_len {
        return Err(Error::BadRequest(format!("invalid resourceVersion {}", resource_version)));
    }
    Ok(rev + 1)
}

async fn run_watch(
    shared: Arc<Shared>,
    gvk: GroupVersionKind,
    selector: Selector,
    mut cursor: usize,
    tx: mpsc::Sender<Event>,
) {
    let mut signal = shared.signal.subscribe();
    loop {
        // Drain: collect under the read lock, emit after releasing it.
        let (events, stopped) = {
            let state = shared.state.read().await;
            let mut events = Vec::new();
            while let Some(revision) = state.log.get(cursor) {
                collect(&gvk, &selector, &revision.added, Event::Added, &mut events);
                collect(&gvk, &selector, &revision.modified, Event::Modified, &mut events);
                collect(&gvk, &selector, &revision.deleted, Event::Deleted, &mut events);
                cursor += 1;
            }
            (events, state.stopped)
        };

        for event in events {
            debug!(kind = event.type_name(), gvk = %gvk, "watch event");
            counter!("watch_events_total", 1u64);
            if tx.send(event).await.is_err() {
                return; // subscriber went away
            }
        }

        if stopped {
            return;
        }

        // Park until a commit or close moves the signal past our cursor.
        loop {
            {
                let sig = signal.borrow_and_update();
                if sig.stopped || sig.revisions > cursor {
                    break;
                }
            }
            if signal.changed().await.is_err() {
                return;
            }
        }
    }
}

fn collect(
    gvk: &GroupVersionKind,
    selector: &Selector,
    objects: &[Arc<Object>],
    make: fn(serde_json::Value) -> Event,
    out: &mut Vec<Event>,
) {
    for obj in objects {
        if obj.key.group != gvk.group || obj.key.kind != gvk.kind {
            continue;
        }
        if !selector.matches(&document::labels(&obj.document)) {
            continue;
        }
        out.push(make(obj.document.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starting_revision_rules() {
        assert_eq!(starting_revision("", 5).unwrap(), 0);
        assert_eq!(starting_revision("1", 5).unwrap(), 2);
        assert_eq!(starting_revision("4", 5).unwrap(), 5);
        assert!(starting_revision("5", 5).is_err());
        assert!(starting_revision("99", 5).is_err());
        assert!(starting_revision("abc", 5).is_err());
    }
}
