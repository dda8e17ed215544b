//! src/config.rs
//! Configuration for the rating engine.
//! Supports environment variables and default values for game parameters.

use serde::{Deserialize, Serialize};
use std::env;

/// Configuration for the rating engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Scoring configuration
    pub scoring: ScoringConfig,
}

/// Scoring-specific configuration parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Number of entrants every ordering must rank (default: 20)
    pub field_size: usize,

    /// Rating assigned to users who have never been scored (default: 1000)
    pub default_rating: i32,

    /// Database connection pool size (default: 10)
    pub max_connections: u32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            field_size: 20,
            default_rating: 1000,
            max_connections: 10,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scoring: ScoringConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables with fallback to defaults
    pub fn from_env() -> Self {
        let mut config = Config::default();

        if let Ok(field_size) = env::var("ENGINE_FIELD_SIZE") {
            config.scoring.field_size = field_size.parse()
                .unwrap_or(config.scoring.field_size);
        }

        if let Ok(default_rating) = env::var("ENGINE_DEFAULT_RATING") {
            config.scoring.default_rating = default_rating.parse()
                .unwrap_or(config.scoring.default_rating);
        }

        if let Ok(max_connections) = env::var("ENGINE_MAX_CONNECTIONS") {
            config.scoring.max_connections = max_connections.parse()
                .unwrap_or(config.scoring.max_connections);
        }

        // Validate configuration
        config.validate();

        config
    }

    /// Validate configuration values
    fn validate(&mut self) {
        // Rank correlation needs at least two entrants.
        if self.scoring.field_size < 2 {
            eprintln!("⚠️  Invalid field_size: {}, using default", self.scoring.field_size);
            self.scoring.field_size = 20;
        }

        if !(crate::scoring_core::RATING_FLOOR..=crate::scoring_core::RATING_CEILING)
            .contains(&self.scoring.default_rating)
        {
            eprintln!("⚠️  Invalid default_rating: {}, using default", self.scoring.default_rating);
            self.scoring.default_rating = 1000;
        }

        if self.scoring.max_connections == 0 {
            eprintln!("⚠️  Invalid max_connections: {}, using default", self.scoring.max_connections);
            self.scoring.max_connections = 10;
        }
    }

    /// Print current configuration for debugging
    pub fn print_config(&self) {
        println!("🔧 Rating Engine Configuration:");
        println!("   Field Size: {}", self.scoring.field_size);
        println!("   Default Rating: {}", self.scoring.default_rating);
        println!("   Max DB Connections: {}", self.scoring.max_connections);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.scoring.field_size, 20);
        assert_eq!(config.scoring.default_rating, 1000);
    }

    #[test]
    fn degenerate_field_size_falls_back() {
        let mut config = Config::default();
        config.scoring.field_size = 1;
        config.validate();
        assert_eq!(config.scoring.field_size, 20);
    }
}
