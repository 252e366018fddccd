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

use std::{collections::HashMap, str::FromStr};

/// Logging configuration, deserialized as part of [`crate::Config`][^note].
///
/// [^note]: the `Config` type itself lives in `vsmtp-config`, which depends
/// on this crate; kept here so both the config layer and a bare `init()`
/// call (e.g. from `vsmtp-queuectl`) can build on the same shape.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    #[serde(
        default = "LogConfig::default_level",
        serialize_with = "serialize_level",
        deserialize_with = "deserialize_level"
    )]
    pub default_level: tracing_subscriber::filter::LevelFilter,

    /// Per-target overrides, e.g. `{"vsmtp_delivery": "debug"}`.
    #[serde(default, serialize_with = "serialize_levels", deserialize_with = "deserialize_levels")]
    pub levels: HashMap<String, tracing_subscriber::filter::LevelFilter>,
}

impl LogConfig {
    const fn default_level() -> tracing_subscriber::filter::LevelFilter {
        tracing_subscriber::filter::LevelFilter::INFO
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_level: Self::default_level(),
            levels: HashMap::new(),
        }
    }
}

fn serialize_level<S: serde::Serializer>(
    value: &tracing_subscriber::filter::LevelFilter,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string())
}

fn deserialize_level<'de, D>(deserializer: D) -> Result<tracing_subscriber::filter::LevelFilter, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = <String as serde::Deserialize>::deserialize(deserializer)?;
    tracing_subscriber::filter::LevelFilter::from_str(&s).map_err(serde::de::Error::custom)
}

fn serialize_levels<S: serde::Serializer>(
    value: &HashMap<String, tracing_subscriber::filter::LevelFilter>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    use serde::ser::SerializeMap;
    let mut map = serializer.serialize_map(Some(value.len()))?;
    for (k, v) in value {
        map.serialize_entry(k, &v.to_string())?;
    }
    map.end()
}

fn deserialize_levels<'de, D>(
    deserializer: D,
) -> Result<HashMap<String, tracing_subscriber::filter::LevelFilter>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = <HashMap<String, String> as serde::Deserialize>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(target, level)| {
            tracing_subscriber::filter::LevelFilter::from_str(&level)
                .map(|level| (target, level))
                .map_err(serde::de::Error::custom)
        })
        .collect()
}

/// Initialize the global `tracing` subscriber for a service binary.
///
/// `RUST_LOG` always wins when set; otherwise the filter is built from
/// `config`, defaulting dependency targets (anything not `vsmtp_*`) to
/// `warn` and the crate's own targets to `config.default_level`.
pub fn init(config: &LogConfig, service_name: &str) {
    use tracing_subscriber::prelude::*;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let mut filter = tracing_subscriber::EnvFilter::new(format!("warn,vsmtp={}", config.default_level));
        for (target, level) in &config.levels {
            filter = filter.add_directive(
                format!("{target}={level}")
                    .parse()
                    .unwrap_or_else(|_| format!("{target}=info").parse().expect("valid directive")),
            );
        }
        filter
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .ok();

    std::panic::set_hook(Box::new(|info| {
        tracing::error!(%info, "panic occurred");
    }));

    tracing::info!(service_name, "telemetry initialized");
}
