use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sirix_node::HashKind;
use sirix_types::{Result, SirixError};
use sirix_versioning::VersioningPolicy;

/// Serde-friendly mirror of [`HashKind`] (which isn't itself serde-derived,
/// since `sirix-node` has no reason to depend on serde) — converted via
/// [`Config::hash_kind_setting`].
#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub enum HashKindConfig {
    None,
    Rolling,
    PostOrder,
}

impl From<HashKindConfig> for HashKind {
    fn from(kind: HashKindConfig) -> Self {
        match kind {
            HashKindConfig::None => HashKind::None,
            HashKindConfig::Rolling => HashKind::Rolling,
            HashKindConfig::PostOrder => HashKind::PostOrder,
        }
    }
}

impl From<HashKind> for HashKindConfig {
    fn from(kind: HashKind) -> Self {
        match kind {
            HashKind::None => HashKindConfig::None,
            HashKind::Rolling => HashKindConfig::Rolling,
            HashKind::PostOrder => HashKindConfig::PostOrder,
        }
    }
}

/// Which secondary index families a resource maintains alongside node
/// mutations (spec §3.6, §6.5).
#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub enum IndexKind {
    Path,
    Value,
    Name,
}

/// The recognized configuration surface (spec §6.5). Mirrors the
/// teacher's `db::config::Config` in shape — a flat, serde-serializable
/// options struct with named presets — but the options themselves are the
/// ones spec.md names, not the teacher's WAL/sync knobs (those concerns
/// don't exist at this layer: WAL sync policy belongs to the out-of-scope
/// `PageWriter`).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub hash_kind: HashKindConfig,
    pub versioning: VersioningKind,
    pub revisions_to_restore: u32,
    pub max_node_count: u64,
    #[serde(with = "duration_millis")]
    pub max_time: Duration,
    pub indexes: Vec<IndexKind>,
    pub compression: bool,
    pub use_path_summary: bool,
    pub max_read_trx: usize,
}

/// Serde-friendly mirror of [`VersioningPolicy`] (which isn't itself
/// serde-derived, since `sirix-versioning` has no reason to depend on
/// serde) — converted via [`Config::versioning_policy`].
#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub enum VersioningKind {
    Full,
    Differential,
    Incremental,
    Sliding { window: u32 },
}

impl From<VersioningKind> for VersioningPolicy {
    fn from(kind: VersioningKind) -> Self {
        match kind {
            VersioningKind::Full => VersioningPolicy::Full,
            VersioningKind::Differential => VersioningPolicy::Differential,
            VersioningKind::Incremental => VersioningPolicy::Incremental,
            VersioningKind::Sliding { window } => VersioningPolicy::Sliding { window },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hash_kind: HashKindConfig::Rolling,
            versioning: VersioningKind::Sliding { window: 3 },
            revisions_to_restore: 4,
            max_node_count: 0,
            max_time: Duration::ZERO,
            indexes: vec![IndexKind::Path, IndexKind::Value, IndexKind::Name],
            compression: false,
            use_path_summary: true,
            max_read_trx: 128,
        }
    }
}

impl Config {
    pub fn versioning_policy(&self) -> VersioningPolicy {
        self.versioning.into()
    }

    pub fn hash_kind_setting(&self) -> HashKind {
        self.hash_kind.into()
    }

    /// `None` when `max_node_count == 0` (spec §6.5: "0 disables
    /// node-count auto-commit").
    pub fn auto_commit_threshold(&self) -> Option<u64> {
        (self.max_node_count > 0).then_some(self.max_node_count)
    }

    /// `None` when `max_time` is zero (spec §6.5: "0 disables timer
    /// auto-commit").
    pub fn auto_commit_interval(&self) -> Option<Duration> {
        (!self.max_time.is_zero()).then_some(self.max_time)
    }

    pub fn index_enabled(&self, kind: IndexKind) -> bool {
        self.indexes.contains(&kind)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| SirixError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| SirixError::Config(e.to_string()))
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        (value.as_millis() as u64).serialize(ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(de)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = Config::default();
        let text = config.to_toml_string().unwrap();
        let parsed = Config::from_toml_str(&text).unwrap();
        assert_eq!(parsed.revisions_to_restore, config.revisions_to_restore);
        assert_eq!(parsed.hash_kind, config.hash_kind);
    }

    #[test]
    fn zero_thresholds_disable_auto_commit() {
        let config = Config { max_node_count: 0, max_time: Duration::ZERO, ..Config::default() };
        assert_eq!(config.auto_commit_threshold(), None);
        assert_eq!(config.auto_commit_interval(), None);
    }
}
