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

//! Wire-level types for the SMTP/ESMTP protocol: addresses, replies,
//! commands and the extensions advertised on `EHLO`.

mod command;
mod error;
mod extensions;
pub mod io;
mod stage;

mod types {
    pub mod address;
    pub mod client_name;
    pub mod domain;
    pub mod reply;
    pub mod reply_code;
}

pub use command::{
    AuthArgs, Command, EhloArgs, HeloArgs, MailFromArgs, ParseCommandError, RcptToArgs, Verb,
};
pub use error::{ProtocolError, ReplyParseError};
pub use extensions::Extension;
pub use io::{Reader, Writer};
pub use stage::Stage;
pub use tokio_rustls;
pub use tokio_rustls::rustls;
pub use types::{
    address::{AddressParseError, Mailbox, ReversePath},
    client_name::ClientName,
    domain::{Domain, DomainParseError},
    reply::Reply,
    reply_code::ReplyCode,
};

/// Enhanced status codes (RFC 3463) used throughout the receiver and the
/// delivery client. Kept as plain string constants rather than an enum
/// because they are always paired with a fixed numeric code at the call
/// site (see the reply table in the specification).
pub mod enhanced {
    pub const SERVICE_READY: &str = "2.0.0";
    pub const CLOSING: &str = "2.0.0";
    pub const AUTH_SUCCESS: &str = "2.7.0";
    pub const OK: &str = "2.0.0";
    pub const START_MAIL_INPUT: &str = "2.0.0";
    pub const SERVICE_NOT_AVAILABLE: &str = "4.3.0";
    pub const MAILBOX_BUSY: &str = "4.2.0";
    pub const LOCAL_ERROR: &str = "4.3.0";
    pub const INSUFFICIENT_STORAGE: &str = "4.2.2";
    pub const SYNTAX_ERROR: &str = "5.5.2";
    pub const SYNTAX_ERROR_PARAMETERS: &str = "5.5.4";
    pub const NOT_IMPLEMENTED: &str = "5.5.1";
    pub const BAD_SEQUENCE: &str = "5.5.1";
    pub const AUTH_REQUIRED: &str = "5.7.0";
    pub const AUTH_INVALID: &str = "5.7.8";
    pub const POLICY_REJECT: &str = "5.1.1";
    pub const MESSAGE_TOO_BIG: &str = "5.2.2";
    pub const TRANSACTION_FAILED: &str = "5.5.0";
}
