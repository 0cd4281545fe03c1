//! Store configuration.
//!
//! Defaults live in [`MemoryConfig::new`]; an optional `config.toml` in the
//! home directory overrides individual fields.

use crate::{MemoryError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Interaction log cap
pub const DEFAULT_MAX_INTERACTIONS: usize = 1000;

/// Recent interactions returned by a context query when no limit is given
pub const DEFAULT_CONTEXT_LIMIT: usize = 10;

/// Periodic save interval
pub const DEFAULT_AUTOSAVE_INTERVAL: Duration = Duration::from_secs(10 * 60);

const CONFIG_FILE_NAME: &str = "config.toml";

/// When mutations reach the backing storage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Durability {
    /// Every mutation is persisted before it returns
    #[default]
    Synchronous,
    /// Mutations only mark the state dirty; a flush, save or autosave persists
    Deferred,
}

impl std::fmt::Display for Durability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Synchronous => write!(f, "synchronous"),
            Self::Deferred => write!(f, "deferred"),
        }
    }
}

/// Configuration for the memory store
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Directory holding one record file per user
    pub data_dir: PathBuf,

    /// Directory receiving timestamped snapshots
    pub backup_dir: PathBuf,

    /// Interaction log cap (FIFO eviction beyond it)
    pub max_interactions: usize,

    pub default_context_limit: usize,

    pub durability: Durability,

    pub autosave_interval: Duration,
}

/// On-disk shape of `config.toml`. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    data_dir: Option<PathBuf>,
    backup_dir: Option<PathBuf>,
    max_interactions: Option<usize>,
    default_context_limit: Option<usize>,
    durability: Option<Durability>,
    autosave_interval_secs: Option<u64>,
}

impl MemoryConfig {
    pub fn new(home: impl AsRef<Path>) -> Self {
        let home = home.as_ref();
        Self {
            data_dir: home.join("users"),
            backup_dir: home.join("backups"),
            max_interactions: DEFAULT_MAX_INTERACTIONS,
            default_context_limit: DEFAULT_CONTEXT_LIMIT,
            durability: Durability::default(),
            autosave_interval: DEFAULT_AUTOSAVE_INTERVAL,
        }
    }

    /// Build the config for `home`, applying `home/config.toml` if present.
    ///
    /// Relative paths in the file are resolved against `home`.
    pub fn load(home: impl AsRef<Path>) -> Result<Self> {
        let home = home.as_ref();
        let path = home.join(CONFIG_FILE_NAME);
        let config = Self::new(home);

        if !path.exists() {
            return Ok(config);
        }

        let text = std::fs::read_to_string(&path)
            .map_err(|e| MemoryError::Config(format!("{}: {}", path.display(), e)))?;
        config.merge_toml(home, &text)
    }

    fn merge_toml(mut self, home: &Path, text: &str) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(text).map_err(|e| MemoryError::Config(e.to_string()))?;

        if let Some(dir) = file.data_dir {
            self.data_dir = home.join(dir);
        }
        if let Some(dir) = file.backup_dir {
            self.backup_dir = home.join(dir);
        }
        if let Some(max) = file.max_interactions {
            self.max_interactions = max;
        }
        if let Some(limit) = file.default_context_limit {
            self.default_context_limit = limit;
        }
        if let Some(durability) = file.durability {
            self.durability = durability;
        }
        if let Some(secs) = file.autosave_interval_secs {
            self.autosave_interval = Duration::from_secs(secs);
        }

        self.validate()?;
        Ok(self)
    }

    /// Reject values the store cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.max_interactions == 0 {
            return Err(MemoryError::Config(
                "max_interactions must be at least 1".to_string(),
            ));
        }
        if self.autosave_interval.is_zero() {
            return Err(MemoryError::Config(
                "autosave interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_data_dir(mut self, path: PathBuf) -> Self {
        self.data_dir = path;
        self
    }

    pub fn with_backup_dir(mut self, path: PathBuf) -> Self {
        self.backup_dir = path;
        self
    }

    pub fn with_max_interactions(mut self, max: usize) -> Self {
        self.max_interactions = max;
        self
    }

    pub fn with_default_context_limit(mut self, limit: usize) -> Self {
        self.default_context_limit = limit;
        self
    }

    pub fn with_durability(mut self, durability: Durability) -> Self {
        self.durability = durability;
        self
    }

    pub fn with_autosave_interval(mut self, interval: Duration) -> Self {
        self.autosave_interval = interval;
        self
    }
}

/// Resolve the store home directory.
///
/// `CONVO_MEMORY_HOME` wins; otherwise `~/.convo-memory`.
pub fn resolve_home() -> Result<PathBuf> {
    if let Ok(home) = std::env::var("CONVO_MEMORY_HOME") {
        return Ok(PathBuf::from(home));
    }

    let home = dirs::home_dir()
        .ok_or_else(|| MemoryError::Config("Could not find home directory".to_string()))?;
    Ok(home.join(".convo-memory"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = MemoryConfig::new("/tmp/convo");
        assert_eq!(config.data_dir, PathBuf::from("/tmp/convo/users"));
        assert_eq!(config.backup_dir, PathBuf::from("/tmp/convo/backups"));
        assert_eq!(config.max_interactions, 1000);
        assert_eq!(config.default_context_limit, 10);
        assert_eq!(config.durability, Durability::Synchronous);
        assert_eq!(config.autosave_interval, Duration::from_secs(600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = MemoryConfig::load(temp_dir.path()).unwrap();
        assert_eq!(config.data_dir, temp_dir.path().join("users"));
        assert_eq!(config.max_interactions, DEFAULT_MAX_INTERACTIONS);
    }

    #[test]
    fn test_load_applies_overrides() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join("config.toml"),
            r#"
data_dir = "records"
max_interactions = 50
durability = "deferred"
autosave_interval_secs = 30
"#,
        )
        .unwrap();

        let config = MemoryConfig::load(temp_dir.path()).unwrap();
        assert_eq!(config.data_dir, temp_dir.path().join("records"));
        assert_eq!(config.backup_dir, temp_dir.path().join("backups"));
        assert_eq!(config.max_interactions, 50);
        assert_eq!(config.durability, Durability::Deferred);
        assert_eq!(config.autosave_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_absolute_data_dir_is_kept() {
        let config = MemoryConfig::new("/home/u/.convo-memory")
            .merge_toml(Path::new("/home/u/.convo-memory"), r#"data_dir = "/var/lib/convo""#)
            .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/convo"));
    }

    #[test]
    fn test_rejects_zero_cap() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("config.toml"), "max_interactions = 0\n").unwrap();

        let err = MemoryConfig::load(temp_dir.path()).unwrap_err();
        assert!(matches!(err, MemoryError::Config(_)));
    }

    #[test]
    fn test_rejects_unknown_keys() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("config.toml"), "encryption = true\n").unwrap();

        let err = MemoryConfig::load(temp_dir.path()).unwrap_err();
        assert!(matches!(err, MemoryError::Config(_)));
    }

    #[test]
    fn test_builder() {
        let config = MemoryConfig::new("/tmp/convo")
            .with_max_interactions(5)
            .with_default_context_limit(3)
            .with_durability(Durability::Deferred)
            .with_autosave_interval(Duration::from_millis(20));

        assert_eq!(config.max_interactions, 5);
        assert_eq!(config.default_context_limit, 3);
        assert_eq!(config.durability.to_string(), "deferred");
        assert_eq!(config.autosave_interval, Duration::from_millis(20));
    }
}
