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

use vsmtp_protocol::{Domain, ReplyCode};

/// Errors produced while resolving the MX/A records of a recipient domain.
#[derive(Debug, Clone, thiserror::Error, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lookup {
    #[error("record not found")]
    NoRecords {},

    #[error("null MX record found for '{domain}'")]
    ContainsNullMX { domain: Domain },

    #[error("timed out")]
    TimedOut,

    #[error("no connections available")]
    NoConnections,

    #[error("io error: {0}")]
    Io(String),

    #[error("dns protocol error: {0}")]
    Proto(String),

    #[error("message: {0}")]
    Message(String),

    #[error("not implemented")]
    NotImplemented,
}

/// Errors produced by the outbound SMTP client while attempting a single
/// delivery hop.
#[derive(Debug, Clone, thiserror::Error, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    #[error("failed to parse the reply of the server: {0}")]
    ReplyParsing(String),

    #[error("permanent error: {reply}")]
    Permanent { reply: ReplyCode },

    #[error("transient error: {reply}")]
    Transient { reply: ReplyCode },

    #[error("tls: {0}")]
    Tls(String),

    #[error("connection: {0}")]
    Connection(String),
}

impl From<std::io::Error> for Delivery {
    fn from(err: std::io::Error) -> Self {
        Self::Connection(err.to_string())
    }
}

impl From<trust_dns_resolver::error::ResolveError> for Lookup {
    fn from(error: trust_dns_resolver::error::ResolveError) -> Self {
        use trust_dns_resolver::error::ResolveErrorKind;

        match error.kind() {
            ResolveErrorKind::Message(e) => Self::Message((*e).to_owned()),
            ResolveErrorKind::Msg(e) => Self::Message(e.clone()),
            ResolveErrorKind::NoConnections => Self::NoConnections,
            ResolveErrorKind::NoRecordsFound { .. } => Self::NoRecords {},
            ResolveErrorKind::Io(io) => Self::Io(io.to_string()),
            ResolveErrorKind::Proto(proto) => Self::Proto(proto.to_string()),
            ResolveErrorKind::Timeout => Self::TimedOut,
            _ => Self::NotImplemented,
        }
    }
}
