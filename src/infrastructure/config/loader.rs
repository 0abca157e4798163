//! Configuration loading with hierarchical merging.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::Config;

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid max_concurrent_agents: {0}. Must be between 1 and 100")]
    InvalidMaxAgents(usize),

    #[error("Invalid poll_interval_ms: {0}. Must be at least 100")]
    InvalidPollInterval(u64),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid daily budget: {0}. Must be positive")]
    InvalidDailyBudget(f64),

    #[error("Invalid weekly budget: {0}. Must be positive")]
    InvalidWeeklyBudget(f64),

    #[error("Alert thresholds must be ascending fractions in (0, 2], got {0:?}")]
    InvalidAlertThresholds(Vec<f64>),

    #[error("Invalid error rate threshold: {0}. Must be in (0, 1]")]
    InvalidErrorRate(f64),

    #[error("Model limit for {model} is {limit}; must be between 0 and 100")]
    InvalidModelLimit { model: String, limit: usize },
}

/// Configuration loader with hierarchical merging.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults
    /// 2. `.trafficcontrol/config.yaml` (project config)
    /// 3. `.trafficcontrol/local.yaml` (local overrides, optional)
    /// 4. `TC_*` environment variables (`__` separates nesting)
    /// 5. Well-known flat variables (`SUPABASE_URL`, `SLACK_BOT_TOKEN`,
    ///    `OPUS_SESSION_LIMIT`, ...)
    pub fn load() -> Result<Config> {
        let mut config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".trafficcontrol/config.yaml"))
            .merge(Yaml::file(".trafficcontrol/local.yaml"))
            .merge(Env::prefixed("TC_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::apply_well_known_env(&mut config);
        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file (plus env overrides).
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let mut config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("TC_").split("__"))
            .extract()
            .context(format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::apply_well_known_env(&mut config);
        Self::validate(&config)?;
        Ok(config)
    }

    /// The flat environment variables recognized regardless of the
    /// `TC_`-nested scheme.
    fn apply_well_known_env(config: &mut Config) {
        if let Ok(url) = std::env::var("SUPABASE_URL") {
            config.database.url = Some(url);
        }
        if let Ok(key) = std::env::var("SUPABASE_SERVICE_KEY") {
            config.database.service_key = Some(key);
        }
        if let Ok(token) = std::env::var("SLACK_BOT_TOKEN") {
            config.slack.bot_token = Some(token);
        }
        if let Ok(secret) = std::env::var("SLACK_SIGNING_SECRET") {
            config.slack.signing_secret = Some(secret);
        }
        if let Ok(token) = std::env::var("SLACK_APP_TOKEN") {
            config.slack.app_token = Some(token);
        }
        if let Ok(channel) = std::env::var("SLACK_CHANNEL_ID") {
            config.slack.channel_id = Some(channel);
        }
        if let Ok(channel) = std::env::var("TC_SLACK_CHANNEL") {
            config.slack.channel_id = Some(channel);
        }
        if let Some(max) = env_parse::<usize>("TC_MAX_CONCURRENT_AGENTS") {
            config.orchestrator.max_concurrent_agents = max;
        }
        if let Some(interval) = env_parse::<u64>("TC_POLL_INTERVAL_MS") {
            config.orchestrator.poll_interval_ms = interval;
        }
        if let Ok(path) = std::env::var("TC_LEARNINGS_PATH") {
            config.orchestrator.learnings_path = Some(path.into());
        }
        if let Ok(level) = std::env::var("TC_LOG_LEVEL") {
            config.log.level = level;
        }
        if let Some(limit) = env_parse::<usize>("OPUS_SESSION_LIMIT") {
            config.orchestrator.model_limits.insert("opus".to_string(), limit);
        }
        if let Some(limit) = env_parse::<usize>("SONNET_SESSION_LIMIT") {
            config.orchestrator.model_limits.insert("sonnet".to_string(), limit);
        }
    }

    /// Validate configuration after loading.
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let agents = config.orchestrator.max_concurrent_agents;
        if agents == 0 || agents > 100 {
            return Err(ConfigError::InvalidMaxAgents(agents));
        }
        if config.orchestrator.poll_interval_ms < 100 {
            return Err(ConfigError::InvalidPollInterval(config.orchestrator.poll_interval_ms));
        }
        for (model, limit) in &config.orchestrator.model_limits {
            if *limit > 100 {
                return Err(ConfigError::InvalidModelLimit {
                    model: model.clone(),
                    limit: *limit,
                });
            }
        }

        match config.log.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => return Err(ConfigError::InvalidLogLevel(other.to_string())),
        }

        if config.budget.daily_budget_usd <= 0.0 {
            return Err(ConfigError::InvalidDailyBudget(config.budget.daily_budget_usd));
        }
        if config.budget.weekly_budget_usd <= 0.0 {
            return Err(ConfigError::InvalidWeeklyBudget(config.budget.weekly_budget_usd));
        }
        let thresholds = &config.budget.alert_thresholds;
        let ascending = thresholds.windows(2).all(|w| w[0] < w[1]);
        if thresholds.iter().any(|t| *t <= 0.0 || *t > 2.0) || !ascending {
            return Err(ConfigError::InvalidAlertThresholds(thresholds.clone()));
        }

        let rate = config.breaker.error_rate_threshold;
        if rate <= 0.0 || rate > 1.0 {
            return Err(ConfigError::InvalidErrorRate(rate));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|raw| raw.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = Config::default();
        assert!(ConfigLoader::validate(&config).is_ok());
    }

    #[test]
    fn test_invalid_max_agents_rejected() {
        let config = Config {
            orchestrator: crate::domain::models::OrchestratorSettings {
                max_concurrent_agents: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidMaxAgents(0))
        ));
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let config = Config {
            log: crate::domain::models::LogConfig {
                level: "verbose".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogLevel(_))
        ));
    }

    #[test]
    fn test_descending_thresholds_rejected() {
        let config = Config {
            budget: crate::domain::models::BudgetConfig {
                alert_thresholds: vec![0.8, 0.5],
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidAlertThresholds(_))
        ));
    }

    #[test]
    fn test_well_known_env_applies() {
        temp_env::with_vars(
            [
                ("SUPABASE_URL", Some("https://db.example.com")),
                ("SLACK_BOT_TOKEN", Some("xoxb-test")),
                ("TC_MAX_CONCURRENT_AGENTS", Some("7")),
                ("OPUS_SESSION_LIMIT", Some("2")),
                ("TC_LOG_LEVEL", Some("debug")),
            ],
            || {
                let mut config = Config::default();
                ConfigLoader::apply_well_known_env(&mut config);
                assert_eq!(config.database.url.as_deref(), Some("https://db.example.com"));
                assert_eq!(config.slack.bot_token.as_deref(), Some("xoxb-test"));
                assert_eq!(config.orchestrator.max_concurrent_agents, 7);
                assert_eq!(config.orchestrator.model_limits.get("opus"), Some(&2));
                assert_eq!(config.log.level, "debug");
            },
        );
    }

    #[test]
    fn test_tc_slack_channel_overrides_channel_id() {
        temp_env::with_vars(
            [
                ("SLACK_CHANNEL_ID", Some("C01AAA")),
                ("TC_SLACK_CHANNEL", Some("C02BBB")),
            ],
            || {
                let mut config = Config::default();
                ConfigLoader::apply_well_known_env(&mut config);
                assert_eq!(config.slack.channel_id.as_deref(), Some("C02BBB"));
            },
        );
    }
}
