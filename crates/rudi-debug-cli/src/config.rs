//! CLI configuration management.
//!
//! Precedence, lowest first: built-in defaults, the project file `rdb.json`,
//! `RDB_*` environment variables (a `.env` file is honoured).
//! Timings (`RDB_CONNECT_TIMEOUT_MS`, `RDB_BATCH_WINDOW_MS`,
//! `RDB_WATCH_DEBOUNCE_MS`) are in milliseconds.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

/// Name of the per-project config file.
pub const PROJECT_FILE: &str = "rdb.json";

/// Location file name the rule compiler writes by default.
pub const DEFAULT_LOCATION_FILE: &str = "RuleLoc.yml";

/// Debugger configuration for one project.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the `.rudi` sources.
    pub rule_source_root: PathBuf,

    /// Location file written by the compiler; defaults to
    /// `<rule_source_root>/RuleLoc.yml`.
    pub location_file: Option<PathBuf>,

    /// Generated wrapper source, shown separately from user rules.
    pub wrapper_file: Option<PathBuf>,

    /// `host:port` of the dialogue runtime.
    pub runtime_address: String,

    /// Time allowed for the TCP handshake with the runtime.
    pub connect_timeout_ms: u64,

    /// Where named snapshots and the session snapshot live.
    pub snapshot_dir: PathBuf,

    /// Window in which runtime reports are grouped for display.
    pub batch_window_ms: u64,

    /// Quiet period that ends a burst of filesystem events.
    pub watch_debounce_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        let snapshot_dir = ProjectDirs::from("dev", "rudi", "rdb")
            .map(|dirs| dirs.data_dir().join("snapshots"))
            .unwrap_or_else(|| std::env::temp_dir().join("rdb-snapshots"));

        Self {
            rule_source_root: PathBuf::from("src/main/rudi"),
            location_file: None,
            wrapper_file: None,
            runtime_address: "127.0.0.1:9777".to_string(),
            connect_timeout_ms: 2000,
            snapshot_dir,
            batch_window_ms: 50,
            watch_debounce_ms: 200,
        }
    }
}

impl Config {
    /// Load the configuration of the project rooted at `project_dir`.
    ///
    /// Relative paths are resolved against `project_dir`.
    pub fn load(project_dir: &Path) -> Result<Self> {
        // Load .env file if present (silently ignore if missing)
        let _ = dotenvy::dotenv();

        let file = project_dir.join(PROJECT_FILE);
        let mut config = if file.exists() {
            let contents = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read config from {}", file.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", file.display()))?
        } else {
            Self::default()
        };

        config.apply_env()?;
        Ok(config.resolved(project_dir))
    }

    fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `RDB_*` overrides looked up through `var`.
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(root) = var("RDB_SOURCE_ROOT") {
            self.rule_source_root = PathBuf::from(root);
        }
        if let Some(file) = var("RDB_LOCATION_FILE") {
            self.location_file = Some(PathBuf::from(file));
        }
        if let Some(file) = var("RDB_WRAPPER_FILE") {
            self.wrapper_file = Some(PathBuf::from(file));
        }
        if let Some(addr) = var("RDB_RUNTIME_ADDRESS") {
            self.runtime_address = addr;
        }
        if let Some(dir) = var("RDB_SNAPSHOT_DIR") {
            self.snapshot_dir = PathBuf::from(dir);
        }
        if let Some(ms) = var("RDB_CONNECT_TIMEOUT_MS") {
            self.connect_timeout_ms = parse_millis("RDB_CONNECT_TIMEOUT_MS", &ms)?;
        }
        if let Some(ms) = var("RDB_BATCH_WINDOW_MS") {
            self.batch_window_ms = parse_millis("RDB_BATCH_WINDOW_MS", &ms)?;
        }
        if let Some(ms) = var("RDB_WATCH_DEBOUNCE_MS") {
            self.watch_debounce_ms = parse_millis("RDB_WATCH_DEBOUNCE_MS", &ms)?;
        }
        Ok(())
    }

    fn resolved(mut self, project_dir: &Path) -> Self {
        let resolve = |p: &Path| {
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                project_dir.join(p)
            }
        };
        self.rule_source_root = resolve(&self.rule_source_root);
        self.location_file = Some(match &self.location_file {
            Some(file) => resolve(file),
            None => self.rule_source_root.join(DEFAULT_LOCATION_FILE),
        });
        self.wrapper_file = self.wrapper_file.as_deref().map(resolve);
        self.snapshot_dir = resolve(&self.snapshot_dir);
        self
    }

    /// Location file path; always set after [`Config::load`].
    pub fn location_file(&self) -> PathBuf {
        self.location_file
            .clone()
            .unwrap_or_else(|| self.rule_source_root.join(DEFAULT_LOCATION_FILE))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch_window_ms)
    }

    pub fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce_ms)
    }

    /// Write the configuration as the project file of `project_dir`.
    pub fn save(&self, project_dir: &Path) -> Result<PathBuf> {
        let path = project_dir.join(PROJECT_FILE);
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, contents)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        Ok(path)
    }
}

fn parse_millis(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .with_context(|| format!("{key} is not a number: {value}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_file_paths_are_resolved() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(PROJECT_FILE),
            r#"{ "rule_source_root": "rules", "snapshot_dir": "/tmp/snaps" }"#,
        )
        .unwrap();

        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.rule_source_root, dir.path().join("rules"));
        assert_eq!(config.location_file(), dir.path().join("rules/RuleLoc.yml"));
        assert_eq!(config.snapshot_dir, PathBuf::from("/tmp/snaps"));
    }

    #[test]
    fn test_missing_project_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.rule_source_root, dir.path().join("src/main/rudi"));
        assert_eq!(config.batch_window(), Duration::from_millis(50));
    }

    #[test]
    fn test_env_overrides_timings() {
        let vars = [
            ("RDB_WATCH_DEBOUNCE_MS", "750"),
            ("RDB_BATCH_WINDOW_MS", " 20 "),
            ("RDB_RUNTIME_ADDRESS", "10.0.0.2:9000"),
        ];
        let lookup = |key: &str| {
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        };

        let mut config = Config::default();
        config.apply_overrides(lookup).unwrap();
        assert_eq!(config.watch_debounce(), Duration::from_millis(750));
        assert_eq!(config.batch_window(), Duration::from_millis(20));
        assert_eq!(config.runtime_address, "10.0.0.2:9000");
        assert_eq!(config.connect_timeout_ms, 2000);
    }

    #[test]
    fn test_bad_debounce_is_an_error() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(|key| (key == "RDB_WATCH_DEBOUNCE_MS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("RDB_WATCH_DEBOUNCE_MS"));
        assert_eq!(config.watch_debounce_ms, 200);
    }
}
