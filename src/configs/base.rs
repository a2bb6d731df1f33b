use serde::{Deserialize, Serialize};

use crate::{
    common::{PlayerError, PlayerResult, types::AnyResult},
    configs::*,
};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub player: PlayerConfig,
}

impl Config {
    /// Loads `config.toml`, then `config.default.toml`, then built-in defaults.
    pub fn load() -> AnyResult<Self> {
        let config_path = if std::path::Path::new("config.toml").exists() {
            "config.toml"
        } else if std::path::Path::new("config.default.toml").exists() {
            "config.default.toml"
        } else {
            println!("No config.toml found, using built-in defaults");
            return Ok(Self::default());
        };

        println!("Loading configuration from: {}", config_path);

        let config_str = std::fs::read_to_string(config_path)?;
        if config_str.trim().is_empty() {
            return Err(format!("{} is empty", config_path).into());
        }

        let config = Self::from_toml(&config_str)?;
        Ok(config)
    }

    pub fn from_toml(source: &str) -> AnyResult<Self> {
        let config: Config = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the pool or the playback layer cannot run with.
    pub fn validate(&self) -> PlayerResult<()> {
        self.pool.validate()?;

        if self.player.max_resolution_attempts == 0 {
            return Err(PlayerError::Configuration(
                "player.max_resolution_attempts must be at least 1".into(),
            ));
        }
        if self.player.max_size == Some(0) {
            return Err(PlayerError::Configuration(
                "player.max_size must be greater than 0 when set".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.pool.max_nodes, MaxNodes::Fixed(1));
        assert_eq!(config.pool.heartbeat_interval_ms, 10_000);
        assert_eq!(config.pool.heartbeat_timeout_ms, 12_000);
        assert!(config.player.skip_on_no_stream);
        assert_eq!(config.player.strategy, QueueStrategy::Fifo);
    }

    #[test]
    fn test_parses_full_document() {
        let config = Config::from_toml(
            r#"
            [server]
            enabled = false
            port = 9000

            [logging]
            level = "debug"

            [logging.file]
            path = "logs/rustaplay.log"
            max_lines = 500

            [pool]
            max_nodes = "auto"
            heartbeat_interval_ms = 2000
            heartbeat_timeout_ms = 5000
            runtime = "task"

            [player]
            strategy = "lifo"
            max_size = 50
            block_stream_from = ["youtube"]
            "#,
        )
        .unwrap();

        assert!(!config.server.enabled);
        assert_eq!(config.server.port, 9000);
        assert_eq!(
            config.logging.unwrap().file.unwrap().max_lines,
            500
        );
        assert_eq!(config.pool.max_nodes, MaxNodes::Auto);
        assert_eq!(config.pool.runtime, NodeRuntimeKind::Task);
        assert_eq!(config.player.strategy, QueueStrategy::Lifo);
        assert_eq!(config.player.max_size, Some(50));
        assert_eq!(config.player.block_stream_from, vec!["youtube".to_string()]);
    }

    #[test]
    fn test_rejects_zero_nodes() {
        let err = Config::from_toml("[pool]\nmax_nodes = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_nodes"));
    }

    #[test]
    fn test_rejects_timeout_not_above_interval() {
        let err = Config::from_toml(
            "[pool]\nheartbeat_interval_ms = 5000\nheartbeat_timeout_ms = 5000\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("heartbeat_timeout_ms"));
    }

    #[test]
    fn test_rejects_zero_resolution_attempts() {
        let mut config = Config::default();
        config.player.max_resolution_attempts = 0;
        assert!(matches!(
            config.validate(),
            Err(PlayerError::Configuration(_))
        ));
    }
}
