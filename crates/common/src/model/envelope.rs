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

use vsmtp_protocol::{ClientName, Mailbox, ReversePath};

/// Information about the session that produced an [`Envelope`], carried
/// through to delivery for `Received` header synthesis and audit logging.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SessionInfo {
    pub peer_addr: std::net::SocketAddr,
    pub helo_name: Option<ClientName>,
    pub authenticated_user: Option<String>,
    pub tls_active: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("an envelope must have at least one recipient")]
    NoRecipients,
}

/// The sender, recipients and message body of a single SMTP transaction,
/// captured at the end of a successful `DATA` command.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Envelope {
    pub sender: ReversePath,
    pub recipients: Vec<Mailbox>,
    /// The RFC 5322 message, including headers, de-dot-stuffed.
    pub message_data: Vec<u8>,
    pub session_info: SessionInfo,
}

impl Envelope {
    pub fn new(
        sender: ReversePath,
        recipients: Vec<Mailbox>,
        message_data: Vec<u8>,
        session_info: SessionInfo,
    ) -> Result<Self, EnvelopeError> {
        if recipients.is_empty() {
            return Err(EnvelopeError::NoRecipients);
        }

        Ok(Self {
            sender,
            recipients,
            message_data,
            session_info,
        })
    }
}
