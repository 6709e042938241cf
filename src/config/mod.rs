//! Configuration system with YAML schema and validation.
//!
//! Mistakes are caught in three layers:
//! - Type-safe configuration structs
//! - Schema validation via serde (`deny_unknown_fields`)
//! - Field and semantic validation via `validator`

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use validator::Validate;

use crate::error::{ScenarioError, ScenarioResult};
use crate::replay::{CachingPolicy, CallMode};

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ScenarioConfig {
    /// Schema version for forward compatibility.
    #[validate(length(min = 1))]
    #[serde(default = "default_schema_version")]
    pub schema_version: String,

    /// Dispatcher settings.
    #[validate(nested)]
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Call-replay settings.
    #[validate(nested)]
    #[serde(default)]
    pub replay: ReplayConfig,
}

fn default_schema_version() -> String {
    "1.0".to_string()
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            runtime: RuntimeConfig::default(),
            replay: ReplayConfig::default(),
        }
    }
}

impl ScenarioConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - YAML parsing fails
    /// - Validation fails
    pub fn load<P: AsRef<Path>>(path: P) -> ScenarioResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string.
    ///
    /// # Errors
    ///
    /// Returns error if parsing or validation fails.
    pub fn from_yaml(yaml: &str) -> ScenarioResult<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        config.validate_semantic()?;
        Ok(config)
    }

    /// Create a builder for configuration.
    #[must_use]
    pub fn builder() -> ScenarioConfigBuilder {
        ScenarioConfigBuilder::default()
    }

    /// Validate constraints beyond the schema.
    fn validate_semantic(&self) -> ScenarioResult<()> {
        let version = &self.runtime.juju_version;
        let well_formed = version
            .split('.')
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()));
        if !well_formed {
            return Err(ScenarioError::config(format!(
                "juju_version must be dotted digits, got {version:?}"
            )));
        }
        Ok(())
    }
}

/// Configuration builder for programmatic construction.
#[derive(Debug, Default)]
pub struct ScenarioConfigBuilder {
    juju_version: Option<String>,
    charm_root: Option<PathBuf>,
    caching_policy: Option<CachingPolicy>,
    mode: Option<CallMode>,
    compression_level: Option<i32>,
}

impl ScenarioConfigBuilder {
    /// Set the agent protocol version.
    #[must_use]
    pub fn juju_version(mut self, version: impl Into<String>) -> Self {
        self.juju_version = Some(version.into());
        self
    }

    /// Set the directory reported as the unit's root.
    #[must_use]
    pub fn charm_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.charm_root = Some(root.into());
        self
    }

    /// Set the policy for new memos.
    #[must_use]
    pub const fn caching_policy(mut self, policy: CachingPolicy) -> Self {
        self.caching_policy = Some(policy);
        self
    }

    /// Set record or replay mode.
    #[must_use]
    pub const fn mode(mut self, mode: CallMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Set the zstd level for context archives.
    #[must_use]
    pub const fn compression_level(mut self, level: i32) -> Self {
        self.compression_level = Some(level);
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> ScenarioConfig {
        let mut config = ScenarioConfig::default();

        if let Some(version) = self.juju_version {
            config.runtime.juju_version = version;
        }

        if let Some(root) = self.charm_root {
            config.runtime.charm_root = root;
        }

        if let Some(policy) = self.caching_policy {
            config.replay.caching_policy = policy;
        }

        if let Some(mode) = self.mode {
            config.replay.mode = mode;
        }

        if let Some(level) = self.compression_level {
            config.replay.compression_level = level;
        }

        config
    }
}

/// Dispatcher settings.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RuntimeConfig {
    /// Agent protocol version exported to the unit.
    #[validate(length(min = 1))]
    #[serde(default = "default_juju_version")]
    pub juju_version: String,
    /// Directory reported as the unit's root.
    #[serde(default = "default_charm_root")]
    pub charm_root: PathBuf,
}

fn default_juju_version() -> String {
    "3.0.0".to_string()
}

fn default_charm_root() -> PathBuf {
    PathBuf::from(".")
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            juju_version: default_juju_version(),
            charm_root: default_charm_root(),
        }
    }
}

/// Call-replay settings.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ReplayConfig {
    /// Policy given to memos created while recording.
    #[serde(default)]
    pub caching_policy: CachingPolicy,
    /// Record or replay.
    #[serde(default)]
    pub mode: CallMode,
    /// Zstd level for context archives (1-22).
    #[validate(range(min = 1, max = 22))]
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,
}

const fn default_compression_level() -> i32 {
    3
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            caching_policy: CachingPolicy::default(),
            mode: CallMode::default(),
            compression_level: default_compression_level(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ScenarioConfig::default();
        assert_eq!(config.schema_version, "1.0");
        assert_eq!(config.runtime.juju_version, "3.0.0");
        assert_eq!(config.replay.caching_policy, CachingPolicy::Strict);
        assert_eq!(config.replay.mode, CallMode::Record);
        assert_eq!(config.replay.compression_level, 3);
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
runtime:
  juju_version: "2.9.42"
  charm_root: /srv/charm
replay:
  caching_policy: loose
  mode: replay
  compression_level: 9
"#;
        let config = ScenarioConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.runtime.juju_version, "2.9.42");
        assert_eq!(config.runtime.charm_root, PathBuf::from("/srv/charm"));
        assert_eq!(config.replay.caching_policy, CachingPolicy::Loose);
        assert_eq!(config.replay.mode, CallMode::Replay);
        assert_eq!(config.replay.compression_level, 9);
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(ScenarioConfig::from_yaml("bogus: 1\n").is_err());
    }

    #[test]
    fn test_compression_level_range() {
        let err = ScenarioConfig::from_yaml("replay:\n  compression_level: 40\n").unwrap_err();
        assert!(matches!(err, ScenarioError::Validation(_)));
    }

    #[test]
    fn test_bad_version_rejected() {
        let err = ScenarioConfig::from_yaml("runtime:\n  juju_version: three\n").unwrap_err();
        assert!(matches!(err, ScenarioError::Config { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "replay:\n  caching_policy: loose").unwrap();
        let config = ScenarioConfig::load(file.path()).unwrap();
        assert_eq!(config.replay.caching_policy, CachingPolicy::Loose);
    }

    #[test]
    fn test_builder() {
        let config = ScenarioConfig::builder()
            .juju_version("3.1.0")
            .charm_root("/tmp/charm")
            .caching_policy(CachingPolicy::Loose)
            .mode(CallMode::Replay)
            .compression_level(12)
            .build();
        assert_eq!(config.runtime.juju_version, "3.1.0");
        assert_eq!(config.replay.compression_level, 12);
        assert_eq!(config.replay.mode, CallMode::Replay);
        assert_eq!(config.replay.caching_policy, CachingPolicy::Loose);
    }
}
