//! Filesystem watching for the rule source root and the location file.
//!
//! A background thread blocks on the notify event queue. Each burst of
//! events is drained, classified and handed to the owner as one
//! [`WatchBatch`]; the thread never touches the hierarchy or the model.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::Duration;

use notify::event::ModifyKind;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use crate::error::WatchError;
use crate::hierarchy::is_rule_source;
use crate::model::normalize_path;

/// A classified filesystem change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A rule source or directory was created or modified.
    Changed(PathBuf),
    /// A path disappeared.
    Removed(PathBuf),
    /// The location file was rewritten by the compiler.
    LocationFileChanged,
}

/// Events of one burst, in arrival order and without repeats.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchBatch {
    pub events: Vec<WatchEvent>,
}

impl WatchBatch {
    fn push(&mut self, event: WatchEvent) {
        if !self.events.contains(&event) {
            self.events.push(event);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn touches_location_file(&self) -> bool {
        self.events.contains(&WatchEvent::LocationFileChanged)
    }
}

/// Map a raw notify event onto watch events.
pub fn classify(event: &Event, location_file: &Path) -> Vec<WatchEvent> {
    let mut out = Vec::new();
    for path in &event.paths {
        let is_location = same_file(path, location_file);

        let removed = match event.kind {
            EventKind::Remove(_) => true,
            EventKind::Create(_) => false,
            EventKind::Modify(ModifyKind::Name(_)) => !path.exists(),
            EventKind::Modify(_) | EventKind::Any => false,
            EventKind::Access(_) | EventKind::Other => continue,
        };

        if is_location {
            if !removed {
                out.push(WatchEvent::LocationFileChanged);
            }
            continue;
        }

        if removed {
            out.push(WatchEvent::Removed(path.clone()));
        } else if path.is_dir() || is_rule_source(path) {
            out.push(WatchEvent::Changed(path.clone()));
        }
    }
    out
}

/// Compare paths whose final component may no longer exist.
fn same_file(path: &Path, target: &Path) -> bool {
    normalize_file(path) == target
}

fn normalize_file(path: &Path) -> PathBuf {
    match (path.parent(), path.file_name()) {
        (Some(dir), Some(name)) => normalize_path(dir).join(name),
        _ => normalize_path(path),
    }
}

/// Watches the source root and the location file on a background thread.
pub struct ProjectWatcher {
    watcher: Option<RecommendedWatcher>,
    pump: Option<JoinHandle<()>>,
}

impl ProjectWatcher {
    /// Start watching; `sink` receives one [`WatchBatch`] per burst of events.
    ///
    /// Events arriving within `debounce` of each other form one burst.
    pub fn spawn<F>(
        source_root: &Path,
        location_file: &Path,
        debounce: Duration,
        sink: F,
    ) -> Result<Self, WatchError>
    where
        F: Fn(WatchBatch) + Send + 'static,
    {
        if !source_root.is_dir() {
            return Err(WatchError::MissingRoot {
                path: source_root.to_path_buf(),
            });
        }
        let source_root = normalize_path(source_root);
        let location_file = normalize_file(location_file);

        let (tx, rx) = mpsc::channel::<notify::Result<Event>>();
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            Config::default(),
        )?;
        watcher.watch(&source_root, RecursiveMode::Recursive)?;

        if let Some(dir) = location_file.parent() {
            if !dir.starts_with(&source_root) && dir.is_dir() {
                watcher.watch(dir, RecursiveMode::NonRecursive)?;
            }
        }

        info!(
            root = %source_root.display(),
            location = %location_file.display(),
            "Watching rule sources"
        );

        let pump = std::thread::Builder::new()
            .name("rdb-watch".to_string())
            .spawn(move || pump_events(rx, location_file, debounce, sink))?;

        Ok(Self {
            watcher: Some(watcher),
            pump: Some(pump),
        })
    }

    /// Stop watching and wait for the background thread to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Dropping the watcher closes the channel, which ends the pump loop.
        self.watcher.take();
        if let Some(pump) = self.pump.take() {
            if pump.join().is_err() {
                warn!("Watch thread panicked");
            }
        }
    }
}

impl Drop for ProjectWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ProjectWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectWatcher")
            .field("running", &self.pump.is_some())
            .finish()
    }
}

fn pump_events<F>(
    rx: Receiver<notify::Result<Event>>,
    location_file: PathBuf,
    debounce: Duration,
    sink: F,
) where
    F: Fn(WatchBatch),
{
    loop {
        let mut batch = WatchBatch::default();

        // Block until the first event of a burst.
        match rx.recv() {
            Ok(Ok(event)) => {
                for e in classify(&event, &location_file) {
                    batch.push(e);
                }
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Watcher error");
                continue;
            }
            Err(_) => break,
        }

        // Drain the rest of the burst.
        let mut closed = false;
        loop {
            match rx.recv_timeout(debounce) {
                Ok(Ok(event)) => {
                    for e in classify(&event, &location_file) {
                        batch.push(e);
                    }
                }
                Ok(Err(e)) => warn!(error = %e, "Watcher error"),
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    closed = true;
                    break;
                }
            }
        }

        if !batch.is_empty() {
            debug!(events = batch.events.len(), "Filesystem changes");
            sink(batch);
        }
        if closed {
            break;
        }
    }
    debug!("Watch thread finished");
}
