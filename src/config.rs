//! Runtime configuration
//!
//! Values come from the environment (optionally seeded from `.env` by the
//! binaries). Every knob has a default so an empty environment is valid.

use crate::error::MemoryOsError;
use crate::Result;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;

/// Relative weights used when ranking memories for a context window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankingWeights {
    pub importance: f64,
    pub recency: f64,
    pub frequency: f64,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            importance: 0.7,
            recency: 0.2,
            frequency: 0.1,
        }
    }
}

impl RankingWeights {
    /// Defaults for the `recency` strategy
    pub fn recency_biased() -> Self {
        Self {
            importance: 0.2,
            recency: 0.7,
            frequency: 0.1,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, w) in [
            ("importance", self.importance),
            ("recency", self.recency),
            ("frequency", self.frequency),
        ] {
            if !w.is_finite() || w < 0.0 {
                return Err(MemoryOsError::InvalidArgument(format!(
                    "ranking weight {} must be a non-negative number, got {}",
                    name, w
                )));
            }
        }
        Ok(())
    }
}

/// Weights handed to the built-in context strategies
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrategyWeights {
    /// Used by `full` and `headline`
    pub ranking: RankingWeights,
    /// Used by `recency`
    pub recency: RankingWeights,
}

impl Default for StrategyWeights {
    fn default() -> Self {
        Self {
            ranking: RankingWeights::default(),
            recency: RankingWeights::recency_biased(),
        }
    }
}

/// How practice results move a skill's mastery
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MasteryPolicy {
    /// Fraction of the remaining gap to 1.0 closed on success
    pub learning_rate: f64,
    /// Fraction of current mastery lost on failure
    pub decay_rate: f64,
}

impl Default for MasteryPolicy {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            decay_rate: 0.05,
        }
    }
}

impl MasteryPolicy {
    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return Err(MemoryOsError::InvalidArgument(format!(
                "mastery learning rate must be within (0, 1], got {}",
                self.learning_rate
            )));
        }
        if !(0.0..=1.0).contains(&self.decay_rate) {
            return Err(MemoryOsError::InvalidArgument(format!(
                "mastery decay rate must be within [0, 1], got {}",
                self.decay_rate
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct MemoryOsConfig {
    /// API listen port
    pub port: u16,
    /// Token budget used when a caller does not pass one
    pub max_tokens: usize,
    /// Name of the default context strategy
    pub default_strategy: String,
    /// Upper bound on candidates fetched through search
    pub search_limit: usize,
    pub ranking: RankingWeights,
    /// Ranking weights of the `recency` strategy
    pub recency_ranking: RankingWeights,
    pub mastery: MasteryPolicy,
    /// Base URL the CLI client talks to
    pub api_url: String,
}

impl Default for MemoryOsConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            max_tokens: 4000,
            default_strategy: "full".to_string(),
            search_limit: 50,
            ranking: RankingWeights::default(),
            recency_ranking: RankingWeights::recency_biased(),
            mastery: MasteryPolicy::default(),
            api_url: "http://127.0.0.1:8080".to_string(),
        }
    }
}

impl MemoryOsConfig {
    /// Load configuration from process environment
    pub fn from_env() -> Result<Self> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from an explicit variable map
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        let defaults = Self::default();

        let port_raw = vars
            .get("MEMORYOS_PORT")
            .or_else(|| vars.get("PORT"))
            .map(String::as_str);

        let config = Self {
            port: parse_or(port_raw, "MEMORYOS_PORT", defaults.port)?,
            max_tokens: parse_var(vars, "MEMORYOS_MAX_TOKENS", defaults.max_tokens)?,
            default_strategy: vars
                .get("MEMORYOS_STRATEGY")
                .cloned()
                .unwrap_or(defaults.default_strategy),
            search_limit: parse_var(vars, "MEMORYOS_SEARCH_LIMIT", defaults.search_limit)?,
            ranking: parse_weights(vars, "MEMORYOS_WEIGHT", defaults.ranking)?,
            recency_ranking: parse_weights(
                vars,
                "MEMORYOS_RECENCY_WEIGHT",
                defaults.recency_ranking,
            )?,
            mastery: MasteryPolicy {
                learning_rate: parse_var(
                    vars,
                    "MEMORYOS_MASTERY_RATE",
                    defaults.mastery.learning_rate,
                )?,
                decay_rate: parse_var(
                    vars,
                    "MEMORYOS_MASTERY_DECAY",
                    defaults.mastery.decay_rate,
                )?,
            },
            api_url: vars
                .get("MEMORYOS_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_url),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn strategy_weights(&self) -> StrategyWeights {
        StrategyWeights {
            ranking: self.ranking,
            recency: self.recency_ranking,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.ranking.validate()?;
        self.recency_ranking.validate()?;
        self.mastery.validate()?;
        crate::memory::StrategyKind::from_str(&self.default_strategy)?;
        Ok(())
    }
}

/// `{prefix}_IMPORTANCE`, `{prefix}_RECENCY` and `{prefix}_FREQUENCY`
fn parse_weights(
    vars: &HashMap<String, String>,
    prefix: &str,
    defaults: RankingWeights,
) -> Result<RankingWeights> {
    Ok(RankingWeights {
        importance: parse_var(vars, &format!("{}_IMPORTANCE", prefix), defaults.importance)?,
        recency: parse_var(vars, &format!("{}_RECENCY", prefix), defaults.recency)?,
        frequency: parse_var(vars, &format!("{}_FREQUENCY", prefix), defaults.frequency)?,
    })
}

fn parse_var<T: FromStr>(vars: &HashMap<String, String>, name: &str, default: T) -> Result<T> {
    parse_or(vars.get(name).map(String::as_str), name, default)
}

fn parse_or<T: FromStr>(raw: Option<&str>, name: &str, default: T) -> Result<T> {
    match raw {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v.trim().parse().map_err(|_| {
            MemoryOsError::InvalidArgument(format!("{} has an invalid value: {:?}", name, v))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_empty_environment_uses_defaults() {
        let config = MemoryOsConfig::from_vars(&HashMap::new()).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.max_tokens, 4000);
        assert_eq!(config.default_strategy, "full");
        assert_eq!(config.ranking, RankingWeights::default());
        assert_eq!(config.recency_ranking, RankingWeights::recency_biased());
    }

    #[test]
    fn test_recency_strategy_weights_are_configurable() {
        let config = MemoryOsConfig::from_vars(&vars(&[
            ("MEMORYOS_RECENCY_WEIGHT_IMPORTANCE", "1"),
            ("MEMORYOS_RECENCY_WEIGHT_RECENCY", "0"),
        ]))
        .unwrap();

        let weights = config.strategy_weights();
        assert_eq!(weights.ranking, RankingWeights::default());
        assert_eq!(weights.recency.importance, 1.0);
        assert_eq!(weights.recency.recency, 0.0);
        assert_eq!(weights.recency.frequency, 0.1);

        assert!(
            MemoryOsConfig::from_vars(&vars(&[("MEMORYOS_RECENCY_WEIGHT_FREQUENCY", "x")])).is_err()
        );
    }

    #[test]
    fn test_overrides_and_port_fallback() {
        let config = MemoryOsConfig::from_vars(&vars(&[
            ("PORT", "9000"),
            ("MEMORYOS_MAX_TOKENS", "512"),
            ("MEMORYOS_STRATEGY", "headline"),
            ("MEMORYOS_WEIGHT_RECENCY", "0.5"),
            ("MEMORYOS_URL", "http://memory:8080/"),
        ]))
        .unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.max_tokens, 512);
        assert_eq!(config.default_strategy, "headline");
        assert_eq!(config.ranking.recency, 0.5);
        assert_eq!(config.api_url, "http://memory:8080");

        let explicit = MemoryOsConfig::from_vars(&vars(&[
            ("PORT", "9000"),
            ("MEMORYOS_PORT", "7000"),
        ]))
        .unwrap();
        assert_eq!(explicit.port, 7000);
    }

    #[test]
    fn test_malformed_values_are_rejected() {
        assert!(MemoryOsConfig::from_vars(&vars(&[("MEMORYOS_MAX_TOKENS", "-5")])).is_err());
        assert!(MemoryOsConfig::from_vars(&vars(&[("MEMORYOS_STRATEGY", "poetry")])).is_err());
        assert!(MemoryOsConfig::from_vars(&vars(&[("MEMORYOS_MASTERY_RATE", "0")])).is_err());
        assert!(
            MemoryOsConfig::from_vars(&vars(&[("MEMORYOS_WEIGHT_IMPORTANCE", "-1")])).is_err()
        );
    }
}
