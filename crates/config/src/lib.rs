/*
 * vSMTP mail transfer agent
 *
 * Copyright (C) 2003 - viridIT SAS
 * Licensed under the Elastic License 2.0
 *
 * You should have received a copy of the Elastic License 2.0 along with
 * this program. If not, see https://www.elastic.co/licensing/elastic-license.
 *
 */

//! Static configuration for the MTA, loaded from a TOML file located by a
//! small `clap` CLI.

pub mod error;

pub use error::ConfigError;
pub use vsmtp_common::telemetry::LogConfig;

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Command-line arguments shared by the `vsmtp-mta` and `vsmtp-queuectl`
/// binaries: just enough to locate the TOML configuration file.
#[derive(Debug, clap::Parser)]
#[command(author, version, about)]
pub struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "VSMTP_CONFIG", default_value = "/etc/vsmtp/config.toml")]
    pub config: std::path::PathBuf,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// Our own hostname, used in `EHLO`/`HELO` and `Received:` headers.
    pub hostname: String,
    /// Primary mail domain this server is authoritative for.
    pub domain: String,

    pub relay_bind: std::net::SocketAddr,
    pub submission_bind: std::net::SocketAddr,

    pub max_message_size: u64,
    pub max_recipients: usize,

    #[serde(with = "humantime_serde")]
    pub smtp_timeout: std::time::Duration,
    #[serde(with = "humantime_serde")]
    pub smtp_connect_timeout: std::time::Duration,
    #[serde(with = "humantime_serde")]
    pub smtp_data_timeout: std::time::Duration,

    pub max_connections_per_domain: usize,
    pub max_messages_per_connection: usize,
    pub mx_fallback_to_a: bool,

    pub tls_cert_path: Option<std::path::PathBuf>,
    pub tls_key_path: Option<std::path::PathBuf>,
    pub tls_required_on_submission: bool,
    pub auth_required_on_submission: bool,

    pub rate_limit_per_ip: u32,
    pub rate_limit_per_domain: u32,
    pub max_auth_failures: u32,
    #[serde(with = "humantime_serde")]
    pub lockout_duration: std::time::Duration,

    pub greylist_enabled: bool,
    #[serde(with = "humantime_serde")]
    pub greylist_min_delay: std::time::Duration,
    #[serde(with = "humantime_serde")]
    pub greylist_max_age: std::time::Duration,

    pub max_errors: u32,
    pub max_unknown_commands: u32,

    #[serde(with = "humantime_serde")]
    pub max_queue_age: std::time::Duration,
    /// How long a worker's claim on a message survives before another
    /// worker may pick it up, in case the claiming worker crashes.
    #[serde(with = "humantime_serde")]
    pub queue_lease_ttl: std::time::Duration,
    pub delivery_workers: usize,
    #[serde(with = "humantime_serde")]
    pub delivery_interval: std::time::Duration,
    #[serde(with = "vec_humantime")]
    pub retry_schedule: Vec<std::time::Duration>,

    /// Root directory for the file-backed store: `queue/`, `users/`,
    /// `policy/` subdirectories, `queue/bodies/*.eml` message blobs.
    pub store_dir: std::path::PathBuf,

    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hostname: "mail.example.com".to_owned(),
            domain: "example.com".to_owned(),
            relay_bind: "0.0.0.0:25".parse().expect("valid socket address"),
            submission_bind: "0.0.0.0:587".parse().expect("valid socket address"),
            max_message_size: 35_882_577,
            max_recipients: 100,
            smtp_timeout: std::time::Duration::from_secs(300),
            smtp_connect_timeout: std::time::Duration::from_secs(30),
            smtp_data_timeout: std::time::Duration::from_secs(120),
            max_connections_per_domain: 10,
            max_messages_per_connection: 10,
            mx_fallback_to_a: true,
            tls_cert_path: None,
            tls_key_path: None,
            tls_required_on_submission: true,
            auth_required_on_submission: true,
            rate_limit_per_ip: 100,
            rate_limit_per_domain: 1_000,
            max_auth_failures: 5,
            lockout_duration: std::time::Duration::from_secs(15 * 60),
            greylist_enabled: true,
            greylist_min_delay: std::time::Duration::from_secs(5 * 60),
            greylist_max_age: std::time::Duration::from_secs(4 * 60 * 60),
            max_errors: 3,
            max_unknown_commands: 5,
            max_queue_age: std::time::Duration::from_secs(5 * 24 * 60 * 60),
            queue_lease_ttl: std::time::Duration::from_secs(5 * 60),
            delivery_workers: 4,
            delivery_interval: std::time::Duration::from_secs(30),
            retry_schedule: vsmtp_common::model::queue::RETRY_SCHEDULE.to_vec(),
            store_dir: std::path::PathBuf::from("/var/lib/vsmtp"),
            log: LogConfig::default(),
        }
    }
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> ConfigResult<Self> {
        let raw =
            std::fs::read_to_string(path).map_err(|e| ConfigError::FileOpen(path.to_owned(), e))?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// `humantime_serde` only implements the scalar and `Option` cases; this
/// mirrors its approach for `Vec<Duration>`, used for `retry_schedule`.
mod vec_humantime {
    pub fn serialize<S: serde::Serializer>(
        value: &[std::time::Duration],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeSeq;
        let mut seq = serializer.serialize_seq(Some(value.len()))?;
        for duration in value {
            seq.serialize_element(&humantime::format_duration(*duration).to_string())?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<std::time::Duration>, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = <Vec<String> as serde::Deserialize>::deserialize(deserializer)?;
        raw.iter()
            .map(|s| humantime::parse_duration(s).map_err(serde::de::Error::custom))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::Config;

    #[test]
    fn default_roundtrips_through_toml() {
        let config = Config::default();
        let text = config.to_toml_string().unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.hostname, config.hostname);
        assert_eq!(parsed.retry_schedule, config.retry_schedule);
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = Config::from_file(std::path::Path::new("/nonexistent/config.toml")).unwrap_err();
        assert!(matches!(err, super::ConfigError::FileOpen(..)));
    }
}
