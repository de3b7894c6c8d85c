//! Registry configuration. Deserialized from the embedding service's config
//! file; secrets (the database URL) can be indirected through the
//! environment with the `%ENV_VAR` convention so they never land in config
//! files.

use {
    database::GatewayConfig,
    serde::{Deserialize, Deserializer},
    std::{fmt::Debug, num::NonZeroU32, str::FromStr, time::Duration},
    url::Url,
};

fn default_db_url() -> Url {
    Url::from_str("postgresql://").expect("static url parses")
}

const fn default_max_connections() -> NonZeroU32 {
    NonZeroU32::new(10).expect("non-zero literal")
}

const fn default_statement_timeout() -> Duration {
    Duration::from_secs(15)
}

const fn default_retry_backoff() -> Duration {
    Duration::from_millis(100)
}

fn default_timezone() -> chrono_tz::Tz {
    chrono_tz::Asia::Hong_Kong
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    /// Postgres connection URL, `postgresql://` (the local default) when
    /// omitted. A value starting with '%' names an environment variable to
    /// read instead, so `"%DB_URL"` takes the URL from `$DB_URL` and
    /// credentials stay out of checked-in config files.
    #[serde(default = "default_db_url", deserialize_with = "deserialize_url_from_env")]
    pub db_url: Url,

    /// Maximum number of connections in the database connection pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: NonZeroU32,

    /// Per-statement timeout applied to every connection.
    #[serde(default = "default_statement_timeout", with = "humantime_serde")]
    pub statement_timeout: Duration,

    /// Row-lock wait bound. Unset leaves lock waits unbounded.
    #[serde(default, with = "humantime_serde")]
    pub lock_timeout: Option<Duration>,

    /// Bound on idling inside an open transaction.
    #[serde(default, with = "humantime_serde")]
    pub idle_in_transaction_timeout: Option<Duration>,

    /// Extra attempts for retryable statement failures. Zero (the default)
    /// disables the retry envelope.
    #[serde(default)]
    pub retries: u32,

    /// Linear backoff unit between retry attempts.
    #[serde(default = "default_retry_backoff", with = "humantime_serde")]
    pub retry_backoff: Duration,

    /// Zone in which query date windows are interpreted.
    #[serde(default = "default_timezone")]
    pub timezone: chrono_tz::Tz,
}

impl Config {
    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            statement_timeout: self.statement_timeout,
            lock_timeout: self.lock_timeout,
            idle_in_transaction_timeout: self.idle_in_transaction_timeout,
            max_connections: self.max_connections.get(),
            retries: self.retries,
            retry_backoff: self.retry_backoff,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_url: default_db_url(),
            max_connections: default_max_connections(),
            statement_timeout: default_statement_timeout(),
            lock_timeout: None,
            idle_in_transaction_timeout: None,
            retries: 0,
            retry_backoff: default_retry_backoff(),
            timezone: default_timezone(),
        }
    }
}

impl Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("db_url", &"REDACTED")
            .field("max_connections", &self.max_connections)
            .field("statement_timeout", &self.statement_timeout)
            .field("lock_timeout", &self.lock_timeout)
            .field(
                "idle_in_transaction_timeout",
                &self.idle_in_transaction_timeout,
            )
            .field("retries", &self.retries)
            .field("retry_backoff", &self.retry_backoff)
            .field("timezone", &self.timezone)
            .finish()
    }
}

/// A config string may defer to the environment: a '%' prefix names the
/// variable that holds the real value.
fn from_env_or_literal(raw: String) -> Result<String, String> {
    match raw.strip_prefix('%') {
        Some(var_name) => std::env::var(var_name)
            .map_err(|err| format!("reading `{var_name}` from the environment: {err}")),
        None => Ok(raw),
    }
}

fn deserialize_url_from_env<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = from_env_or_literal(String::deserialize(deserializer)?)
        .map_err(serde::de::Error::custom)?;
    Url::from_str(&raw).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_complete() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.db_url.as_str(), "postgresql://");
        assert_eq!(config.statement_timeout, Duration::from_secs(15));
        assert_eq!(config.lock_timeout, None);
        assert_eq!(config.retries, 0);
        assert_eq!(config.timezone, chrono_tz::Asia::Hong_Kong);
    }

    #[test]
    fn parses_humantime_and_timezone() {
        let config: Config = toml::from_str(
            r#"
                db-url = "postgresql://user@localhost/registry"
                statement-timeout = "30s"
                lock-timeout = "2s"
                retries = 3
                retry-backoff = "250ms"
                timezone = "UTC"
            "#,
        )
        .unwrap();
        assert_eq!(config.statement_timeout, Duration::from_secs(30));
        assert_eq!(config.lock_timeout, Some(Duration::from_secs(2)));
        assert_eq!(config.retries, 3);
        assert_eq!(config.retry_backoff, Duration::from_millis(250));
        assert_eq!(config.timezone, chrono_tz::UTC);

        let gateway = config.gateway_config();
        assert_eq!(gateway.statement_timeout, Duration::from_secs(30));
        assert_eq!(gateway.max_connections, 10);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(toml::from_str::<Config>("unknown-knob = 1").is_err());
    }

    #[test]
    fn url_can_come_from_the_environment() {
        // Unique name so parallel tests cannot collide.
        unsafe { std::env::set_var("REGISTRY_TEST_DB_URL_X7", "postgresql://env-host/db") };
        let config: Config = toml::from_str(r#"db-url = "%REGISTRY_TEST_DB_URL_X7""#).unwrap();
        assert_eq!(config.db_url.host_str(), Some("env-host"));

        assert!(toml::from_str::<Config>(r#"db-url = "%REGISTRY_TEST_MISSING_VAR""#).is_err());
    }

    #[test]
    fn debug_redacts_the_url() {
        let rendered = format!("{:?}", Config::default());
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains("postgresql"));
    }
}
