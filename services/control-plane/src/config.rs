use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::db::DbConfig;
use crate::node::SshConfig;
use crate::scheduler::SchedulerConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub dev_mode: bool,
    pub scheduler_interval: Duration,
    pub reconcile_interval: Duration,
    pub ssh: SshConfig,
    pub scheduler: SchedulerConfig,
    pub database: DbConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let number = |key: &str, default: u64| -> Result<u64> { parse_or(&lookup, key, default) };

        let log_level = lookup("ZONEFLEET_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let dev_mode = lookup("ZONEFLEET_DEV")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let scheduler_interval =
            Duration::from_secs(number("ZONEFLEET_SCHEDULER_INTERVAL_SECS", 30)?);
        let reconcile_interval =
            Duration::from_secs(number("ZONEFLEET_RECONCILE_INTERVAL_SECS", 60)?);

        let ssh = SshConfig {
            binary: lookup("ZONEFLEET_SSH_BINARY").unwrap_or_else(|| "ssh".to_string()),
            connect_timeout: Duration::from_secs(number("ZONEFLEET_SSH_CONNECT_TIMEOUT_SECS", 10)?),
        };

        let mut scheduler = SchedulerConfig::default();
        if let Some(resolvers) = lookup("ZONEFLEET_DNS_RESOLVERS") {
            scheduler.resolvers = resolvers
                .split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string)
                .collect();
        }

        let mut database = DbConfig::default();
        if let Some(url) = lookup("DATABASE_URL") {
            database.database_url = url;
        }
        database.max_connections = parse_or(&lookup, "DB_MAX_CONNECTIONS", database.max_connections)?;
        database.min_connections = parse_or(&lookup, "DB_MIN_CONNECTIONS", database.min_connections)?;

        Ok(Self {
            log_level,
            dev_mode,
            scheduler_interval,
            reconcile_interval,
            ssh,
            scheduler,
            database,
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: {value:?}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.log_level, "info");
        assert!(!config.dev_mode);
        assert_eq!(config.scheduler_interval, Duration::from_secs(30));
        assert_eq!(config.reconcile_interval, Duration::from_secs(60));
        assert_eq!(config.ssh.binary, "ssh");
        assert_eq!(config.ssh.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.scheduler.resolvers, vec!["1.1.1.1", "1.0.0.1"]);
        assert_eq!(config.database.max_connections, 10);
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("ZONEFLEET_DEV", "TRUE"),
            ("ZONEFLEET_SCHEDULER_INTERVAL_SECS", "5"),
            ("ZONEFLEET_DNS_RESOLVERS", "9.9.9.9, 149.112.112.112"),
            ("DB_MAX_CONNECTIONS", "4"),
        ])
        .unwrap();
        assert!(config.dev_mode);
        assert_eq!(config.scheduler_interval, Duration::from_secs(5));
        assert_eq!(config.scheduler.resolvers, vec!["9.9.9.9", "149.112.112.112"]);
        assert_eq!(config.database.max_connections, 4);
    }

    #[test]
    fn test_invalid_number_names_the_variable() {
        let err = config(&[("ZONEFLEET_RECONCILE_INTERVAL_SECS", "soon")]).unwrap_err();
        assert!(err.to_string().contains("ZONEFLEET_RECONCILE_INTERVAL_SECS"));
    }
}
