use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub sync: SyncConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Sizes of the live windows the sync core keeps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Newest notifications mirrored per session
    pub notification_limit: usize,
    /// Default number of chat messages in a room window
    pub chat_window: usize,
    pub feed_page_size: usize,
}

/// Anime data source response cache. Each query kind gets its own TTL;
/// the airing-time lookup is the only kind the sync core issues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub capacity: usize,
    pub airing_ttl_seconds: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub filter: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; unset or unparsable values use defaults
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self {
            server: ServerConfig {
                host: lookup("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: parse_or(&lookup, "SERVER_PORT", 3000),
            },
            sync: SyncConfig {
                notification_limit: parse_or(&lookup, "NOTIFICATION_LIMIT", 50),
                chat_window: parse_or(&lookup, "CHAT_WINDOW", 50),
                feed_page_size: parse_or(&lookup, "FEED_PAGE_SIZE", 20),
            },
            cache: CacheConfig {
                capacity: parse_or(&lookup, "CACHE_CAPACITY", 1000),
                airing_ttl_seconds: parse_or(&lookup, "AIRING_CACHE_TTL_SECONDS", 1800),
            },
            logging: LoggingConfig {
                filter: lookup("RUST_LOG")
                    .unwrap_or_else(|| "episode_social_sync=info,tower_http=info".to_string()),
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.sync.notification_limit == 0 {
            anyhow::bail!("NOTIFICATION_LIMIT must be at least 1");
        }
        if self.sync.chat_window == 0 {
            anyhow::bail!("CHAT_WINDOW must be at least 1");
        }
        if self.cache.airing_ttl_seconds < 0 {
            anyhow::bail!("AIRING_CACHE_TTL_SECONDS must not be negative");
        }
        if chrono::Duration::try_seconds(self.cache.airing_ttl_seconds).is_none() {
            anyhow::bail!(
                "AIRING_CACHE_TTL_SECONDS {} is too large",
                self.cache.airing_ttl_seconds
            );
        }
        Ok(())
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Saturates for values `validate` would reject
    pub fn airing_ttl(&self) -> chrono::Duration {
        chrono::Duration::try_seconds(self.cache.airing_ttl_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    lookup(key)
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.server_address(), "0.0.0.0:3000");
        assert_eq!(config.sync.notification_limit, 50);
        assert_eq!(config.airing_ttl(), chrono::Duration::minutes(30));
    }

    #[test]
    fn test_overrides_and_bad_values() {
        let config = Config::from_lookup(lookup(&[
            ("SERVER_PORT", "8080"),
            ("CHAT_WINDOW", "not-a-number"),
            ("NOTIFICATION_LIMIT", " 10 "),
        ]))
        .unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.sync.chat_window, 50);
        assert_eq!(config.sync.notification_limit, 10);
    }

    #[test]
    fn test_zero_limit_is_rejected() {
        assert!(Config::from_lookup(lookup(&[("NOTIFICATION_LIMIT", "0")])).is_err());
    }

    #[test]
    fn test_unrepresentable_ttl_is_rejected() {
        let huge = i64::MAX.to_string();
        let err = Config::from_lookup(lookup(&[("AIRING_CACHE_TTL_SECONDS", huge.as_str())]))
            .unwrap_err();
        assert!(err.to_string().contains("too large"));

        let edge = Config::from_lookup(lookup(&[("AIRING_CACHE_TTL_SECONDS", "86400")])).unwrap();
        assert_eq!(edge.airing_ttl(), chrono::Duration::days(1));
    }
}
