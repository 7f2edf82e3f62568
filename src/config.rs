//! Rate limit preset configuration.
//!
//! Presets are named `{window, budget, criticality}` triples loaded once at
//! startup and validated before the limiter will accept them. Lookups at
//! request time are by preset name only.

use std::collections::HashMap;
use std::path::Path;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ConfigError, Result};

/// Configuration for a single rate limit preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Length of the sliding window in milliseconds.
    pub window_size_ms: u64,
    /// Maximum admissions per key per window.
    pub max_requests: u32,
    /// Fail-closed rather than fail-open when the fallback store is
    /// saturated (use for sensitive presets such as authentication).
    #[serde(default)]
    pub critical: bool,
}

/// On-disk representation of a preset table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PresetFile {
    #[serde(default)]
    presets: HashMap<String, RateLimitConfig>,
}

/// A validated table of named presets.
///
/// The table can be replaced wholesale at runtime (config reload); individual
/// lookups copy the small config struct out so no lock is held across a
/// request.
pub struct ConfigRegistry {
    presets: RwLock<HashMap<String, RateLimitConfig>>,
}

impl ConfigRegistry {
    /// Build a registry from an in-process preset table.
    ///
    /// Fails if any preset has a zero window or budget.
    pub fn from_presets<I, S>(presets: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, RateLimitConfig)>,
        S: Into<String>,
    {
        let table: HashMap<String, RateLimitConfig> = presets
            .into_iter()
            .map(|(name, config)| (name.into(), config))
            .collect();
        validate_table(&table)?;

        Ok(Self {
            presets: RwLock::new(table),
        })
    }

    /// Load a registry from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let file: PresetFile =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::from_presets(file.presets)
    }

    /// Load a registry from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit presets");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Look up a preset by name.
    pub fn get(&self, name: &str) -> Option<RateLimitConfig> {
        self.presets.read().get(name).copied()
    }

    /// Replace the whole preset table, validating the replacement first.
    ///
    /// The previous table stays in effect if validation fails.
    pub fn replace<I, S>(&self, presets: I) -> Result<()>
    where
        I: IntoIterator<Item = (S, RateLimitConfig)>,
        S: Into<String>,
    {
        let table: HashMap<String, RateLimitConfig> = presets
            .into_iter()
            .map(|(name, config)| (name.into(), config))
            .collect();
        validate_table(&table)?;

        let mut current = self.presets.write();
        *current = table;
        Ok(())
    }

    /// Number of registered presets.
    pub fn len(&self) -> usize {
        self.presets.read().len()
    }

    /// Whether the registry has no presets.
    pub fn is_empty(&self) -> bool {
        self.presets.read().is_empty()
    }
}

fn validate_table(table: &HashMap<String, RateLimitConfig>) -> Result<()> {
    for (name, config) in table {
        if config.window_size_ms == 0 {
            return Err(ConfigError::InvalidPreset {
                preset: name.clone(),
                reason: "window_size_ms must be positive".to_string(),
            });
        }
        if config.max_requests == 0 {
            return Err(ConfigError::InvalidPreset {
                preset: name.clone(),
                reason: "max_requests must be positive".to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_presets() {
        let registry = ConfigRegistry::from_presets([(
            "api",
            RateLimitConfig {
                window_size_ms: 60_000,
                max_requests: 100,
                critical: false,
            },
        )])
        .unwrap();

        let preset = registry.get("api").unwrap();
        assert_eq!(preset.window_size_ms, 60_000);
        assert_eq!(preset.max_requests, 100);
        assert!(!preset.critical);

        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
presets:
  login:
    window_size_ms: 60000
    max_requests: 5
    critical: true
  search:
    window_size_ms: 1000
    max_requests: 50
"#;
        let registry = ConfigRegistry::from_yaml(yaml).unwrap();
        assert_eq!(registry.len(), 2);

        let login = registry.get("login").unwrap();
        assert_eq!(login.max_requests, 5);
        assert!(login.critical);

        // `critical` defaults to false when omitted
        let search = registry.get("search").unwrap();
        assert!(!search.critical);
    }

    #[test]
    fn test_zero_window_rejected() {
        let result = ConfigRegistry::from_presets([(
            "bad",
            RateLimitConfig {
                window_size_ms: 0,
                max_requests: 10,
                critical: false,
            },
        )]);

        assert!(matches!(
            result,
            Err(ConfigError::InvalidPreset { preset, .. }) if preset == "bad"
        ));
    }

    #[test]
    fn test_zero_budget_rejected() {
        let yaml = r#"
presets:
  bad:
    window_size_ms: 1000
    max_requests: 0
"#;
        assert!(ConfigRegistry::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_invalid_yaml_rejected() {
        assert!(matches!(
            ConfigRegistry::from_yaml("presets: [not, a, map]"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_replace_keeps_old_table_on_error() {
        let registry = ConfigRegistry::from_presets([(
            "api",
            RateLimitConfig {
                window_size_ms: 60_000,
                max_requests: 100,
                critical: false,
            },
        )])
        .unwrap();

        let result = registry.replace([(
            "api",
            RateLimitConfig {
                window_size_ms: 0,
                max_requests: 100,
                critical: false,
            },
        )]);
        assert!(result.is_err());

        // Old preset survives the failed reload.
        assert_eq!(registry.get("api").unwrap().window_size_ms, 60_000);
    }

    #[test]
    fn test_replace_swaps_table() {
        let registry = ConfigRegistry::from_presets([(
            "api",
            RateLimitConfig {
                window_size_ms: 60_000,
                max_requests: 100,
                critical: false,
            },
        )])
        .unwrap();

        registry
            .replace([(
                "api",
                RateLimitConfig {
                    window_size_ms: 30_000,
                    max_requests: 10,
                    critical: true,
                },
            )])
            .unwrap();

        let preset = registry.get("api").unwrap();
        assert_eq!(preset.window_size_ms, 30_000);
        assert!(preset.critical);
    }
}
