//! Replay configuration.

use serde::{Deserialize, Serialize};

/// Reconstructor configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Issue mirrored fetches for `src` and stylesheet attributes
    pub fetch_resources: bool,
    /// Method used for fetches triggered by attributes
    pub default_method: String,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            fetch_resources: true,
            default_method: "GET".to_string(),
        }
    }
}

impl ReplayConfig {
    /// Enable or disable mirrored fetches
    #[must_use]
    pub fn with_fetch_resources(mut self, enabled: bool) -> Self {
        self.fetch_resources = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replay_config_default() {
        let config = ReplayConfig::default();
        assert!(config.fetch_resources);
        assert_eq!(config.default_method, "GET");
    }

    #[test]
    fn test_replay_config_partial_json() {
        let config: ReplayConfig = serde_json::from_str(r#"{"fetch_resources": false}"#).unwrap();
        assert!(!config.fetch_resources);
        assert_eq!(config.default_method, "GET");
        assert!(ReplayConfig::default().with_fetch_resources(false) == config);
    }
}
