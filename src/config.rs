use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Tunables loaded from `terra.toml`. Endpoints and credentials come from
/// the environment (see `main.rs`); this file only carries knobs that are
/// safe to commit.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TerraConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub filters: FilterConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Location cache entry lifetime in hours.
    #[serde(default = "default_ttl_hours")]
    pub location_ttl_hours: u64,
    /// Location cache capacity before LRU eviction.
    #[serde(default = "default_capacity")]
    pub location_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            location_ttl_hours: default_ttl_hours(),
            location_capacity: default_capacity(),
        }
    }
}

fn default_ttl_hours() -> u64 {
    24
}

fn default_capacity() -> usize {
    500
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilterConfig {
    /// Minimum tile-over-request overlap to keep a feature.
    #[serde(default = "default_overlap")]
    pub min_overlap: f64,
    /// Radius in miles around a user-dropped pin.
    #[serde(default = "default_pin_radius")]
    pub pin_radius_miles: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_overlap: default_overlap(),
            pin_radius_miles: default_pin_radius(),
        }
    }
}

fn default_overlap() -> f64 {
    0.1
}

fn default_pin_radius() -> f64 {
    5.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_intent_secs")]
    pub intent_secs: u64,
    #[serde(default = "default_agent_secs")]
    pub agent_secs: u64,
    #[serde(default = "default_geocoder_secs")]
    pub geocoder_backend_secs: u64,
    #[serde(default = "default_geocoder_total_secs")]
    pub geocoder_total_secs: u64,
    #[serde(default = "default_stac_secs")]
    pub stac_secs: u64,
    #[serde(default = "default_turn_secs")]
    pub turn_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            intent_secs: default_intent_secs(),
            agent_secs: default_agent_secs(),
            geocoder_backend_secs: default_geocoder_secs(),
            geocoder_total_secs: default_geocoder_total_secs(),
            stac_secs: default_stac_secs(),
            turn_secs: default_turn_secs(),
        }
    }
}

fn default_intent_secs() -> u64 {
    20
}

fn default_agent_secs() -> u64 {
    15
}

fn default_geocoder_secs() -> u64 {
    10
}

fn default_geocoder_total_secs() -> u64 {
    30
}

fn default_stac_secs() -> u64 {
    30
}

fn default_turn_secs() -> u64 {
    90
}

impl TimeoutConfig {
    pub fn intent(&self) -> Duration {
        Duration::from_secs(self.intent_secs)
    }

    pub fn agent(&self) -> Duration {
        Duration::from_secs(self.agent_secs)
    }

    pub fn geocoder_backend(&self) -> Duration {
        Duration::from_secs(self.geocoder_backend_secs)
    }

    pub fn geocoder_total(&self) -> Duration {
        Duration::from_secs(self.geocoder_total_secs)
    }

    pub fn stac(&self) -> Duration {
        Duration::from_secs(self.stac_secs)
    }

    pub fn turn(&self) -> Duration {
        Duration::from_secs(self.turn_secs)
    }
}

impl TerraConfig {
    /// Load config from a TOML file. Returns defaults if the file doesn't exist.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("config file not found at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: TerraConfig = toml::from_str(&contents)?;
        tracing::info!("loaded config from {}", path.display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = TerraConfig::default();
        assert_eq!(c.cache.location_ttl_hours, 24);
        assert_eq!(c.cache.location_capacity, 500);
        assert_eq!(c.filters.min_overlap, 0.1);
        assert_eq!(c.timeouts.turn_secs, 90);
        assert_eq!(c.timeouts.agent_secs, 15);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let c: TerraConfig = toml::from_str(
            r#"
            [filters]
            pin_radius_miles = 2.5
            "#,
        )
        .unwrap();
        assert_eq!(c.filters.pin_radius_miles, 2.5);
        assert_eq!(c.filters.min_overlap, 0.1);
        assert_eq!(c.cache.location_capacity, 500);
    }
}
