use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::db::DbConfig;
use crate::engine::EngineConfig;

/// Upper bound for the cooldown and overdue windows (ten years).
pub const MAX_WINDOW_SECS: i64 = 10 * 365 * 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    pub dev_mode: bool,
    pub database: DbConfig,
    pub engine: EngineConfig,
    pub reclaim_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let listen_addr = parse_var(&lookup, "BIKEPOOL_LISTEN_ADDR", "127.0.0.1:8080")?;

        let log_level = lookup("BIKEPOOL_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let dev_mode = lookup("BIKEPOOL_DEV")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let db_defaults = DbConfig::default();
        let database = DbConfig {
            database_url: lookup("DATABASE_URL").unwrap_or(db_defaults.database_url.clone()),
            max_connections: parse_var(&lookup, "DB_MAX_CONNECTIONS", "10")?,
            min_connections: parse_var(&lookup, "DB_MIN_CONNECTIONS", "1")?,
            ..db_defaults
        };
        if database.min_connections > database.max_connections {
            bail!(
                "DB_MIN_CONNECTIONS ({}) exceeds DB_MAX_CONNECTIONS ({})",
                database.min_connections,
                database.max_connections
            );
        }

        let cooldown_secs: i64 = parse_var(&lookup, "BIKEPOOL_COOLDOWN_SECS", "300")?;
        let overdue_secs: i64 = parse_var(&lookup, "BIKEPOOL_OVERDUE_THRESHOLD_SECS", "86400")?;
        let assign_max_attempts: u32 = parse_var(&lookup, "BIKEPOOL_ASSIGN_MAX_ATTEMPTS", "3")?;
        let reclaim_secs: u64 = parse_var(&lookup, "BIKEPOOL_RECLAIM_INTERVAL_SECS", "3600")?;

        for (name, secs) in [
            ("BIKEPOOL_COOLDOWN_SECS", cooldown_secs),
            ("BIKEPOOL_OVERDUE_THRESHOLD_SECS", overdue_secs),
        ] {
            if !(0..=MAX_WINDOW_SECS).contains(&secs) {
                bail!("{name} must be between 0 and {MAX_WINDOW_SECS}, got {secs}");
            }
        }
        if assign_max_attempts == 0 {
            bail!("BIKEPOOL_ASSIGN_MAX_ATTEMPTS must be at least 1");
        }
        if reclaim_secs == 0 {
            bail!("BIKEPOOL_RECLAIM_INTERVAL_SECS must be at least 1");
        }

        let engine = EngineConfig {
            cooldown: chrono::Duration::seconds(cooldown_secs),
            overdue_threshold: chrono::Duration::seconds(overdue_secs),
            assign_max_attempts,
        };

        Ok(Self {
            listen_addr,
            log_level,
            dev_mode,
            database,
            engine,
            reclaim_interval: Duration::from_secs(reclaim_secs),
        })
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw = lookup(name).unwrap_or_else(|| default.to_string());
    raw.trim()
        .parse()
        .with_context(|| format!("invalid value for {name}: {raw:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_with(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_with(&[]).unwrap();
        assert_eq!(config.listen_addr.to_string(), "127.0.0.1:8080");
        assert_eq!(config.log_level, "info");
        assert!(!config.dev_mode);
        assert_eq!(config.engine.cooldown, chrono::Duration::minutes(5));
        assert_eq!(config.engine.overdue_threshold, chrono::Duration::hours(24));
        assert_eq!(config.engine.assign_max_attempts, 3);
        assert_eq!(config.reclaim_interval, Duration::from_secs(3600));
        assert_eq!(config.database.max_connections, 10);
    }

    #[test]
    fn test_overrides() {
        let config = config_with(&[
            ("BIKEPOOL_DEV", "TRUE"),
            ("BIKEPOOL_COOLDOWN_SECS", "60"),
            ("BIKEPOOL_RECLAIM_INTERVAL_SECS", "30"),
            ("DATABASE_URL", "postgres://db/pool"),
        ])
        .unwrap();
        assert!(config.dev_mode);
        assert_eq!(config.engine.cooldown, chrono::Duration::seconds(60));
        assert_eq!(config.reclaim_interval, Duration::from_secs(30));
        assert_eq!(config.database.database_url, "postgres://db/pool");
    }

    #[test]
    fn test_rejects_bad_values() {
        let err = config_with(&[("BIKEPOOL_COOLDOWN_SECS", "five")]).unwrap_err();
        assert!(err.to_string().contains("BIKEPOOL_COOLDOWN_SECS"));

        assert!(config_with(&[("BIKEPOOL_ASSIGN_MAX_ATTEMPTS", "0")]).is_err());
        assert!(config_with(&[("BIKEPOOL_RECLAIM_INTERVAL_SECS", "0")]).is_err());
        assert!(config_with(&[("BIKEPOOL_OVERDUE_THRESHOLD_SECS", "-1")]).is_err());
        assert!(config_with(&[("DB_MIN_CONNECTIONS", "20")]).is_err());
        assert!(config_with(&[("BIKEPOOL_LISTEN_ADDR", "localhost")]).is_err());
    }

    #[test]
    fn test_rejects_windows_beyond_limit() {
        let err = config_with(&[("BIKEPOOL_COOLDOWN_SECS", "100000000000000")]).unwrap_err();
        assert!(err.to_string().contains("BIKEPOOL_COOLDOWN_SECS"));

        let too_long = (MAX_WINDOW_SECS + 1).to_string();
        assert!(config_with(&[("BIKEPOOL_OVERDUE_THRESHOLD_SECS", too_long.as_str())]).is_err());

        let at_limit = MAX_WINDOW_SECS.to_string();
        let config = config_with(&[("BIKEPOOL_COOLDOWN_SECS", at_limit.as_str())]).unwrap();
        assert_eq!(config.engine.cooldown.num_seconds(), MAX_WINDOW_SECS);
    }
}
