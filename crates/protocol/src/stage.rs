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

/// State of the SMTP transaction, as driven by the command sequence.
///
/// `Authenticated` is layered on top of `Greeted`: a session reaches it
/// only through a successful `AUTH`, and a `RSET` or a new `STARTTLS`
/// sends the session back to `Initial`/`Greeted` respectively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// The client has just connected, no `HELO`/`EHLO` yet.
    Initial,
    /// `HELO`/`EHLO` has been accepted.
    Greeted,
    /// `AUTH` has succeeded.
    Authenticated,
    /// `MAIL FROM` has been accepted.
    MailFrom,
    /// At least one `RCPT TO` has been accepted.
    RcptTo,
    /// `DATA` is in progress (reading the message body).
    Data,
}

impl Stage {
    /// Whether a `MAIL FROM` command is legal from this stage.
    #[must_use]
    pub const fn accepts_mail_from(self) -> bool {
        matches!(self, Self::Greeted | Self::Authenticated)
    }

    /// Whether a `RCPT TO` command is legal from this stage.
    #[must_use]
    pub const fn accepts_rcpt_to(self) -> bool {
        matches!(self, Self::MailFrom | Self::RcptTo)
    }

    /// Whether a `DATA` command is legal from this stage.
    #[must_use]
    pub const fn accepts_data(self) -> bool {
        matches!(self, Self::RcptTo)
    }
}
