//! Run configuration.
//!
//! An optional JSON file supplied with `--config`. Missing keys fall back
//! to defaults and unknown top-level keys are ignored, so config files
//! written for newer versions keep loading.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Which workspace strategy the run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GitStrategyKind {
    InPlace,
    Worktree,
}

impl fmt::Display for GitStrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InPlace => "in_place",
            Self::Worktree => "worktree",
        };
        f.write_str(s)
    }
}

impl FromStr for GitStrategyKind {
    type Err = GitStrategyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_place" => Ok(Self::InPlace),
            "worktree" => Ok(Self::Worktree),
            other => Err(GitStrategyParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`GitStrategyKind`] string.
#[derive(Debug, Clone)]
pub struct GitStrategyParseError(pub String);

impl fmt::Display for GitStrategyParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid git strategy: {:?}", self.0)
    }
}

impl std::error::Error for GitStrategyParseError {}

/// Enable flag for a plugin without further knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    pub enabled: bool,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Coverage plugin settings. The threshold is a fraction in `[0, 1]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverageConfig {
    pub enabled: bool,
    pub minimum_threshold: f64,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            minimum_threshold: 0.9,
        }
    }
}

/// Top-level run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub max_workers: usize,
    pub max_agent_workers: usize,
    pub retry_cap: u32,
    pub checkpoint_minutes: i64,
    pub allowed_paths: Vec<String>,
    pub git_strategy: GitStrategyKind,
    pub max_files_changed: usize,
    pub max_lines_changed: u64,
    pub pytest: PluginConfig,
    pub coverage: CoverageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_workers: 4,
            max_agent_workers: 2,
            retry_cap: 2,
            checkpoint_minutes: 30,
            allowed_paths: vec!["src".to_string(), "tests".to_string()],
            git_strategy: GitStrategyKind::Worktree,
            max_files_changed: 40,
            max_lines_changed: 2000,
            pytest: PluginConfig::default(),
            coverage: CoverageConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from an optional JSON file. `None` yields the
    /// defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Whether the plugin with the given id participates in this run.
    /// Plugins without a dedicated config section default to enabled.
    pub fn plugin_enabled(&self, id: &str) -> bool {
        match id {
            "pytest" => self.pytest.enabled,
            "coverage" => self.coverage.enabled,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.max_workers, 4);
        assert_eq!(cfg.max_agent_workers, 2);
        assert_eq!(cfg.retry_cap, 2);
        assert_eq!(cfg.checkpoint_minutes, 30);
        assert_eq!(cfg.allowed_paths, vec!["src", "tests"]);
        assert_eq!(cfg.git_strategy, GitStrategyKind::Worktree);
        assert!(cfg.pytest.enabled);
        assert!(cfg.coverage.enabled);
        assert!((cfg.coverage.minimum_threshold - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn load_none_yields_defaults() {
        let cfg = Config::load(None).expect("load");
        assert_eq!(cfg.max_workers, 4);
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_keys() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"max_workers": 8, "coverage": {"enabled": false}}"#).unwrap();

        let cfg = Config::load(Some(&path)).expect("load");
        assert_eq!(cfg.max_workers, 8);
        assert!(!cfg.coverage.enabled);
        // Untouched keys keep defaults.
        assert_eq!(cfg.max_agent_workers, 2);
        assert!(cfg.pytest.enabled);
        assert!((cfg.coverage.minimum_threshold - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn unknown_top_level_keys_are_ignored() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"retry_cap": 5, "future_feature": {"x": 1}}"#).unwrap();

        let cfg = Config::load(Some(&path)).expect("load");
        assert_eq!(cfg.retry_cap, 5);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        let result = Config::load(Some(Path::new("/nonexistent/atqos-config.json")));
        assert!(result.is_err());
    }

    #[test]
    fn plugin_enabled_defaults_to_true_for_unknown_ids() {
        let cfg = Config::default();
        assert!(cfg.plugin_enabled("lint"));
        assert!(cfg.plugin_enabled("pytest"));
    }

    #[test]
    fn git_strategy_display_roundtrip() {
        for v in [GitStrategyKind::InPlace, GitStrategyKind::Worktree] {
            let parsed: GitStrategyKind = v.to_string().parse().expect("should parse");
            assert_eq!(v, parsed);
        }
        assert!("rsync".parse::<GitStrategyKind>().is_err());
    }
}
