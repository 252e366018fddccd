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

use crate::Domain;

/// Identity announced by the client in `HELO`/`EHLO`.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, serde_with::SerializeDisplay, serde_with::DeserializeFromStr,
)]
pub enum ClientName {
    Domain(Domain),
    Ip4(std::net::Ipv4Addr),
    Ip6(std::net::Ipv6Addr),
}

impl std::str::FromStr for ClientName {
    type Err = crate::DomainParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(literal) = s.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            if let Ok(ip) = literal.trim_start_matches("IPv6:").parse::<std::net::Ipv6Addr>() {
                return Ok(Self::Ip6(ip));
            }
            if let Ok(ip) = literal.parse::<std::net::Ipv4Addr>() {
                return Ok(Self::Ip4(ip));
            }
        }

        s.parse::<Domain>().map(Self::Domain)
    }
}

impl std::fmt::Display for ClientName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Domain(domain) => write!(f, "{domain}"),
            Self::Ip4(ip) => write!(f, "[{ip}]"),
            Self::Ip6(ip) => write!(f, "[IPv6:{ip}]"),
        }
    }
}
