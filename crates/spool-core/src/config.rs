//! TOML configuration for a store and its executor.
//!
//! ```toml
//! [store]
//! dir = "/var/lib/app/spool"
//! mode = "queue"
//! max_size = 500
//! add_rule = "evict_oldest"
//!
//! [executor]
//! pool_size = 4
//! max_attempts = 5
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::app::RequeuePosition;
use crate::error::ConfigError;
use crate::store::{RestoreMode, StoreMode};

/// Overrides `store.dir`.
pub const STORE_DIR_ENV: &str = "SPOOL_STORE_DIR";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpoolConfig {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddRuleKind {
    #[default]
    HardLimit,
    EvictOldest,
    EvictRandom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_dir")]
    pub dir: PathBuf,

    #[serde(default = "default_extension")]
    pub extension: String,

    #[serde(default)]
    pub mode: StoreMode,

    /// 0 = unlimited.
    #[serde(default)]
    pub max_size: usize,

    #[serde(default = "default_true")]
    pub allow_sync: bool,

    #[serde(default)]
    pub restore: RestoreMode,

    #[serde(default)]
    pub add_rule: AddRuleKind,
}

fn default_dir() -> PathBuf {
    PathBuf::from("./spool")
}

fn default_extension() -> String {
    "task".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: default_dir(),
            extension: default_extension(),
            mode: StoreMode::default(),
            max_size: 0,
            allow_sync: true,
            restore: RestoreMode::default(),
            add_rule: AddRuleKind::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Queued plus running; 0 = unlimited.
    #[serde(default)]
    pub max_tasks: usize,

    #[serde(default)]
    pub requeue: RequeuePosition,

    /// Attempt limit for the stock `RetryOnFailure` validator.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_pool_size() -> usize {
    2
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            max_tasks: 0,
            requeue: RequeuePosition::default(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl SpoolConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let cfg: SpoolConfig = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let s = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&s)
    }

    /// `load`, then apply `SPOOL_STORE_DIR` if set and non-empty.
    pub fn load_with_env(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut cfg = Self::load(path)?;
        cfg.apply_env(|key| std::env::var(key).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply overrides from `lookup` (normally the process environment).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup(STORE_DIR_ENV)
            && !dir.trim().is_empty()
        {
            self.store.dir = PathBuf::from(dir);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("store.dir must not be empty".into()));
        }
        let ext = self.store.extension.trim_start_matches('.');
        if ext.is_empty() || ext.contains(['/', '\\', '.']) {
            return Err(ConfigError::Invalid(format!(
                "store.extension {:?} must be a single non-empty path segment without dots",
                self.store.extension
            )));
        }
        if self.executor.pool_size == 0 {
            return Err(ConfigError::Invalid("executor.pool_size must be at least 1".into()));
        }
        if self.executor.max_attempts == 0 {
            return Err(ConfigError::Invalid("executor.max_attempts must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn empty_document_uses_defaults() {
        let cfg = SpoolConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, SpoolConfig::default());
        assert_eq!(cfg.store.extension, "task");
        assert!(cfg.store.allow_sync);
        assert_eq!(cfg.executor.pool_size, 2);
        assert_eq!(cfg.executor.max_attempts, 3);
    }

    #[test]
    fn full_document() {
        let cfg = SpoolConfig::from_toml_str(
            r#"
            [store]
            dir = "/tmp/spool"
            extension = "job"
            mode = "queue"
            max_size = 10
            allow_sync = false
            restore = "blocking"
            add_rule = "evict_random"

            [executor]
            pool_size = 4
            max_tasks = 100
            requeue = "back"
            max_attempts = 7
            "#,
        )
        .unwrap();

        assert_eq!(cfg.store.dir, PathBuf::from("/tmp/spool"));
        assert_eq!(cfg.store.mode, StoreMode::Queue);
        assert_eq!(cfg.store.restore, RestoreMode::Blocking);
        assert_eq!(cfg.store.add_rule, AddRuleKind::EvictRandom);
        assert!(!cfg.store.allow_sync);
        assert_eq!(cfg.executor.requeue, RequeuePosition::Back);
        assert_eq!(cfg.executor.max_attempts, 7);
    }

    #[rstest]
    #[case::zero_pool("[executor]\npool_size = 0")]
    #[case::zero_attempts("[executor]\nmax_attempts = 0")]
    #[case::dotted_extension("[store]\nextension = \"a.b\"")]
    #[case::empty_extension("[store]\nextension = \"\"")]
    #[case::empty_dir("[store]\ndir = \"\"")]
    fn rejects_invalid_values(#[case] doc: &str) {
        assert!(matches!(SpoolConfig::from_toml_str(doc), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn unknown_mode_is_a_parse_error() {
        let err = SpoolConfig::from_toml_str("[store]\nmode = \"stack\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn env_overrides_store_dir() {
        let mut cfg = SpoolConfig::default();
        cfg.apply_env(|key| (key == STORE_DIR_ENV).then(|| "/srv/spool".to_string()));
        assert_eq!(cfg.store.dir, PathBuf::from("/srv/spool"));

        cfg.apply_env(|_| Some("  ".to_string()));
        assert_eq!(cfg.store.dir, PathBuf::from("/srv/spool"));
    }

    #[test]
    fn load_reads_a_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("spool.toml");
        std::fs::write(&path, "[executor]\npool_size = 3\n").unwrap();

        assert_eq!(SpoolConfig::load(&path).unwrap().executor.pool_size, 3);
        assert!(matches!(
            SpoolConfig::load(tmp.path().join("missing.toml")),
            Err(ConfigError::Read(_))
        ));
    }
}
