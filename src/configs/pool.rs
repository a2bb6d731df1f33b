use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::common::{PlayerError, PlayerResult};

/// Smallest accepted heartbeat interval or timeout.
pub const MIN_HEARTBEAT_MS: u64 = 1_000;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PoolConfig {
    #[serde(default)]
    pub max_nodes: MaxNodes,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    /// How long a freshly spawned node has to report ready.
    #[serde(default = "default_spawn_timeout_ms")]
    pub spawn_timeout_ms: u64,
    #[serde(default)]
    pub runtime: NodeRuntimeKind,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_nodes: MaxNodes::default(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            spawn_timeout_ms: default_spawn_timeout_ms(),
            runtime: NodeRuntimeKind::default(),
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> PlayerResult<()> {
        if self.max_nodes == MaxNodes::Fixed(0) {
            return Err(PlayerError::Configuration(
                "pool.max_nodes must be at least 1".into(),
            ));
        }
        if self.heartbeat_interval_ms < MIN_HEARTBEAT_MS {
            return Err(PlayerError::Configuration(format!(
                "pool.heartbeat_interval_ms must be at least {MIN_HEARTBEAT_MS}"
            )));
        }
        if self.heartbeat_timeout_ms < MIN_HEARTBEAT_MS {
            return Err(PlayerError::Configuration(format!(
                "pool.heartbeat_timeout_ms must be at least {MIN_HEARTBEAT_MS}"
            )));
        }
        if self.heartbeat_timeout_ms <= self.heartbeat_interval_ms {
            return Err(PlayerError::Configuration(
                "pool.heartbeat_timeout_ms must be greater than pool.heartbeat_interval_ms".into(),
            ));
        }
        if self.spawn_timeout_ms == 0 {
            return Err(PlayerError::Configuration(
                "pool.spawn_timeout_ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

fn default_heartbeat_interval_ms() -> u64 {
    10_000
}

fn default_heartbeat_timeout_ms() -> u64 {
    12_000
}

fn default_spawn_timeout_ms() -> u64 {
    5_000
}

/// Upper bound on live nodes. `"auto"` follows the machine's parallelism.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxNodes {
    Auto,
    Fixed(usize),
}

impl Default for MaxNodes {
    fn default() -> Self {
        MaxNodes::Fixed(1)
    }
}

impl MaxNodes {
    pub fn resolve(self) -> usize {
        match self {
            MaxNodes::Fixed(n) => n.max(1),
            MaxNodes::Auto => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

impl Serialize for MaxNodes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MaxNodes::Auto => serializer.serialize_str("auto"),
            MaxNodes::Fixed(n) => serializer.serialize_u64(*n as u64),
        }
    }
}

impl<'de> Deserialize<'de> for MaxNodes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MaxNodesVisitor;

        impl de::Visitor<'_> for MaxNodesVisitor {
            type Value = MaxNodes;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a node count or \"auto\"")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<MaxNodes, E> {
                Ok(MaxNodes::Fixed(v as usize))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<MaxNodes, E> {
                if v < 0 {
                    return Err(E::custom("max_nodes cannot be negative"));
                }
                Ok(MaxNodes::Fixed(v as usize))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<MaxNodes, E> {
                if v.eq_ignore_ascii_case("auto") {
                    Ok(MaxNodes::Auto)
                } else {
                    Err(E::invalid_value(de::Unexpected::Str(v), &self))
                }
            }
        }

        deserializer.deserialize_any(MaxNodesVisitor)
    }
}

/// Where node isolates run.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeRuntimeKind {
    /// A dedicated OS thread with its own single-threaded runtime.
    #[default]
    Thread,
    /// A task on the host runtime.
    Task,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_nodes_resolves_auto_to_at_least_one() {
        assert!(MaxNodes::Auto.resolve() >= 1);
        assert_eq!(MaxNodes::Fixed(4).resolve(), 4);
    }

    #[test]
    fn test_rejects_short_interval() {
        let config = PoolConfig {
            heartbeat_interval_ms: 999,
            ..PoolConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(PoolConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_unknown_max_nodes_word() {
        let parsed: Result<PoolConfig, _> = toml::from_str("max_nodes = \"many\"");
        assert!(parsed.is_err());
    }
}
