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

/// Errors raised while reading from or writing to an SMTP connection.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("line exceeded the maximum command length")]
    LineTooLong,

    #[error("client closed the connection")]
    ConnectionClosed,

    #[error(transparent)]
    Command(#[from] crate::ParseCommandError),

    #[error(transparent)]
    Reply(#[from] ReplyParseError),
}

/// Errors raised while parsing a textual SMTP reply, either one the
/// session is about to send or one received from a remote server.
#[derive(Debug, thiserror::Error)]
pub enum ReplyParseError {
    #[error("malformed reply line: {line:?}")]
    Malformed { line: String },
}
