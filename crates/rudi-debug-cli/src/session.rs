//! The debugging session: owner of the current rule model.
//!
//! A session holds at most one [`RuleModel`], rebuilt wholesale whenever the
//! compiler writes a new location file. Every rebuild bumps a version
//! counter and is announced on a broadcast channel so that holders of node
//! ids know to drop them. Logging choices survive rebuilds through a
//! [`RuleModelState`] that is kept for the whole session and persisted on
//! exit.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use rudi_debug_core::{
    FileHierarchy, RuleModel, RuleModelState, SnapshotStore, WatchBatch, WatchEvent,
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::Config;

/// Sent after every rebuild attempt that replaced the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelReplaced {
    pub version: u64,
    /// Whether a model exists after the rebuild.
    pub present: bool,
}

pub struct Session {
    source_root: PathBuf,
    location_file: PathBuf,
    wrapper_file: Option<PathBuf>,
    model: Option<RuleModel>,
    version: u64,
    hierarchy: FileHierarchy,
    store: SnapshotStore,
    remembered: RuleModelState,
    replaced: broadcast::Sender<ModelReplaced>,
}

impl Session {
    /// Scan the sources, restore the last session and build the model.
    ///
    /// A malformed location file is reported and the session starts without
    /// a model; the next compile replaces it.
    pub fn open(config: &Config) -> Result<Self> {
        let location_file = config.location_file();
        let store = SnapshotStore::new(&config.snapshot_dir);
        let remembered = store
            .load_session(&config.rule_source_root)
            .unwrap_or_else(RuleModelState::new);
        let (replaced, _) = broadcast::channel(16);

        let mut session = Self {
            hierarchy: FileHierarchy::scan(&config.rule_source_root, &location_file),
            source_root: config.rule_source_root.clone(),
            location_file,
            wrapper_file: config.wrapper_file.clone(),
            model: None,
            version: 0,
            store,
            remembered,
            replaced,
        };
        if let Err(e) = session.rebuild() {
            warn!(error = %format!("{e:#}"), "Starting without a rule model");
        }
        Ok(session)
    }

    pub fn current_model(&self) -> Option<&RuleModel> {
        self.model.as_ref()
    }

    pub fn current_model_mut(&mut self) -> Option<&mut RuleModel> {
        self.model.as_mut()
    }

    /// Incremented on every model replacement.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn hierarchy(&self) -> &FileHierarchy {
        &self.hierarchy
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn location_file(&self) -> &Path {
        &self.location_file
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ModelReplaced> {
        self.replaced.subscribe()
    }

    /// Re-read the location file and replace the model.
    ///
    /// A missing location file leaves the session without a model. A
    /// malformed one is reported and the previous model stays in place.
    pub fn rebuild(&mut self) -> Result<()> {
        if let Some(old) = &self.model {
            self.remembered.retrieve(old);
        }

        let loaded = RuleModel::load(&self.location_file, &self.source_root)
            .with_context(|| format!("Failed to load {}", self.location_file.display()))?;

        match loaded {
            Some(mut model) => {
                if !self.remembered.apply(&mut model) {
                    self.remembered.retrieve(&model);
                }
                self.hierarchy
                    .link_model(&model, self.wrapper_file.as_deref());
                self.hierarchy.location_compiled(modified_time(&self.location_file));
                info!(
                    root = model.root_label(),
                    rules = model.rule_count(),
                    outcome = %model.compilation_outcome(),
                    "Rule model rebuilt"
                );
                self.model = Some(model);
            }
            None => {
                debug!(path = %self.location_file.display(), "No location file");
                self.hierarchy.unlink_model();
                self.model = None;
            }
        }

        self.version += 1;
        // No receivers is fine.
        let _ = self.replaced.send(ModelReplaced {
            version: self.version,
            present: self.model.is_some(),
        });
        Ok(())
    }

    /// Fold one burst of filesystem changes into the session.
    ///
    /// Returns whether the model was rebuilt.
    pub fn apply_batch(&mut self, batch: &WatchBatch) -> Result<bool> {
        for event in &batch.events {
            match event {
                WatchEvent::Changed(path) => self.hierarchy.file_changed(path),
                WatchEvent::Removed(path) => {
                    self.hierarchy.remove(path);
                }
                WatchEvent::LocationFileChanged => {}
            }
        }
        if batch.touches_location_file() {
            self.rebuild()?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Everything the session knows, including nodes absent from the model.
    pub fn remembered(&mut self) -> &RuleModelState {
        if let Some(model) = &self.model {
            self.remembered.retrieve(model);
        }
        &self.remembered
    }

    /// Persist the session snapshot.
    pub fn save_session(&mut self) -> Result<PathBuf> {
        let state = self.remembered().clone();
        let path = self.store.save_session(&self.source_root, &state)?;
        debug!(path = %path.display(), "Session saved");
        Ok(path)
    }

    /// Save the session state under `name`.
    pub fn save_snapshot(&mut self, name: &str) -> Result<PathBuf> {
        let state = self.remembered().clone();
        Ok(self.store.save_named(name, &state)?)
    }

    /// Restore the snapshot called `name` onto the current model.
    ///
    /// Returns `false` when there is no model or it belongs to another
    /// project.
    pub fn apply_snapshot(&mut self, name: &str) -> Result<bool> {
        let mut snapshot = self.store.load_named(name)?;
        let Some(model) = self.model.as_mut() else {
            warn!("No rule model to apply the snapshot to");
            return Ok(false);
        };
        if !snapshot.apply(model) {
            return Ok(false);
        }
        self.remembered.merge_from(&snapshot);
        Ok(true)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("location_file", &self.location_file)
            .field("version", &self.version)
            .field("has_model", &self.model.is_some())
            .finish()
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
