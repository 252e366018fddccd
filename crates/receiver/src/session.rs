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

//! The per-connection SMTP/ESMTP state machine: one [`SmtpSession`] per
//! accepted connection, dispatching parsed [`Command`]s against
//! [`vsmtp_protocol::Stage`] and the shared [`Services`].

use std::net::SocketAddr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tokio::io::{AsyncRead, AsyncWrite};
use vsmtp_common::{Envelope, SessionInfo};
use vsmtp_config::Config;
use vsmtp_policy::BlacklistQuery;
use vsmtp_protocol::{
    enhanced, ClientName, Command, Extension, Mailbox, ParseCommandError, ProtocolError, Reader, Reply, ReplyCode,
    ReversePath, Stage, Verb, Writer,
};

use crate::Services;

/// What the dispatch loop does after sending its reply.
enum ControlFlow {
    Continue,
    Quit,
    UpgradeTls,
}

/// Outcome of running the command loop to completion.
pub enum Outcome {
    /// The session is done: `QUIT`, a trip wire fired, or the peer
    /// disappeared.
    Done,
    /// `STARTTLS` was accepted; the caller must perform the handshake on
    /// the same connection and resume the loop over the new stream.
    UpgradeTls,
}

/// Per-connection mutable state, per specification §4.1. `session_id` and
/// `peer_addr`/`is_submission` are the "listener identity" a successful
/// `STARTTLS` preserves; everything else is wiped.
pub struct SmtpSession {
    pub session_id: uuid::Uuid,
    pub peer_addr: SocketAddr,
    pub is_submission: bool,
    pub tls_active: bool,
    pub esmtp: bool,
    pub helo_name: Option<ClientName>,
    pub authenticated_user: Option<String>,
    pub authenticated_rate_limit: Option<u32>,
    pub stage: Stage,
    pub mail_from: Option<ReversePath>,
    pub rcpt_to: Vec<Mailbox>,
    pub error_count: u32,
    pub unknown_command_count: u32,
}

impl SmtpSession {
    #[must_use]
    pub fn new(peer_addr: SocketAddr, is_submission: bool) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4(),
            peer_addr,
            is_submission,
            tls_active: false,
            esmtp: false,
            helo_name: None,
            authenticated_user: None,
            authenticated_rate_limit: None,
            stage: Stage::Initial,
            mail_from: None,
            rcpt_to: Vec::new(),
            error_count: 0,
            unknown_command_count: 0,
        }
    }

    /// `STARTTLS` succeeded: wipe everything but listener identity.
    fn reset_for_starttls(&mut self) {
        self.tls_active = true;
        self.esmtp = false;
        self.helo_name = None;
        self.authenticated_user = None;
        self.authenticated_rate_limit = None;
        self.stage = Stage::Initial;
        self.mail_from = None;
        self.rcpt_to.clear();
        self.error_count = 0;
        self.unknown_command_count = 0;
    }

    /// `RSET`: clear the envelope, fall back to `GREETED` if a
    /// transaction was in progress.
    fn reset_envelope(&mut self) {
        self.mail_from = None;
        self.rcpt_to.clear();
        if matches!(self.stage, Stage::MailFrom | Stage::RcptTo | Stage::Data) {
            self.stage = Stage::Greeted;
        }
    }

    fn protocol_token(&self) -> &'static str {
        match (self.tls_active, self.authenticated_user.is_some()) {
            (true, true) => "ESMTPSA",
            (true, false) => "ESMTPS",
            (false, _) if self.esmtp => "ESMTP",
            (false, _) => "SMTP",
        }
    }

    fn advertises_auth(&self, config: &Config) -> bool {
        self.tls_active || !(self.is_submission && config.tls_required_on_submission)
    }

    fn trip_wire_reply(&self, config: &Config) -> Option<Reply> {
        if self.unknown_command_count >= config.max_unknown_commands || self.error_count >= config.max_errors {
            Some(Reply::with_enhanced(
                421,
                enhanced::SERVICE_NOT_AVAILABLE,
                format!("{} Too many errors, closing connection", config.hostname),
            ))
        } else {
            None
        }
    }
}

/// Runs `session` over `stream` until `QUIT`, a trip wire, the peer
/// disconnecting, or `STARTTLS` being accepted. Sends the initial `220`
/// greeting itself.
pub async fn run(stream: tokio::net::TcpStream, session: &mut SmtpSession, config: &Config, services: &Services) {
    let (read_half, write_half) = stream.into_split();
    let mut reader = Reader::new(read_half);
    let mut writer = Writer::new(write_half);

    let greeting = Reply::with_enhanced(
        220,
        enhanced::SERVICE_READY,
        format!("{} Service ready", config.hostname),
    );
    if writer.write_reply(&greeting).await.is_err() {
        return;
    }

    let outcome = dispatch_loop(&mut reader, &mut writer, session, config, services).await;
    let Outcome::UpgradeTls = outcome else { return };

    let Some(acceptor) = &services.tls_acceptor else {
        tracing::warn!(session_id = %session.session_id, "STARTTLS accepted with no TLS acceptor configured");
        return;
    };
    let Ok(plain) = writer.into_inner().reunite(reader.into_inner()) else {
        return;
    };
    let tls_stream = match acceptor.accept(plain).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(session_id = %session.session_id, error = %e, "TLS handshake failed");
            return;
        }
    };
    let (tls_read, tls_write) = tokio::io::split(tls_stream);
    let mut reader = Reader::new(tls_read);
    let mut writer = Writer::new(tls_write);
    let _ = dispatch_loop(&mut reader, &mut writer, session, config, services).await;
}

async fn dispatch_loop<R, W>(
    reader: &mut Reader<R>,
    writer: &mut Writer<W>,
    session: &mut SmtpSession,
    config: &Config,
    services: &Services,
) -> Outcome
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let line = match tokio::time::timeout(config.smtp_timeout, reader.read_line()).await {
            Ok(Ok(line)) => line,
            Ok(Err(_)) => return Outcome::Done,
            Err(_) => {
                let reply = Reply::with_enhanced(
                    421,
                    enhanced::SERVICE_NOT_AVAILABLE,
                    format!("{} Timeout waiting for command", config.hostname),
                );
                let _ = writer.write_reply(&reply).await;
                return Outcome::Done;
            }
        };

        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(e) => {
                session.error_count += 1;
                if matches!(e, ParseCommandError::UnknownVerb { .. }) {
                    session.unknown_command_count += 1;
                }
                let reply = reply_for_parse_error(&e);
                if writer.write_reply(&reply).await.is_err() {
                    return Outcome::Done;
                }
                if let Some(trip) = session.trip_wire_reply(config) {
                    let _ = writer.write_reply(&trip).await;
                    return Outcome::Done;
                }
                continue;
            }
        };

        let verb = command.verb();
        let (reply, flow) = match verb {
            Verb::Data => match handle_data(reader, writer, session, config, services).await {
                Ok(reply) => (reply, ControlFlow::Continue),
                Err(_) => return Outcome::Done,
            },
            Verb::Auth => {
                let Command::Auth(args) = command else { unreachable!() };
                match handle_auth(args, session, config, services, reader, writer).await {
                    Ok(reply) => (reply, ControlFlow::Continue),
                    Err(_) => return Outcome::Done,
                }
            }
            _ => handle_command(command, &line, session, config, services).await,
        };

        // AUTH failures and MAIL/RCPT policy rejections have their own
        // lockout/throttling (auth lockout, greylist, rate limiting) and
        // don't also count toward the generic protocol-error trip wire.
        let is_error = reply.code().is_transient() || reply.code().is_permanent();
        let governed_elsewhere = matches!(verb, Verb::Auth | Verb::MailFrom | Verb::RcptTo);
        if matches!(flow, ControlFlow::Continue) && is_error && !governed_elsewhere {
            session.error_count += 1;
        }

        if writer.write_reply(&reply).await.is_err() {
            return Outcome::Done;
        }

        match flow {
            ControlFlow::Quit => return Outcome::Done,
            ControlFlow::UpgradeTls => return Outcome::UpgradeTls,
            ControlFlow::Continue => {
                if let Some(trip) = session.trip_wire_reply(config) {
                    let _ = writer.write_reply(&trip).await;
                    return Outcome::Done;
                }
            }
        }
    }
}

fn reply_for_parse_error(e: &ParseCommandError) -> Reply {
    match e {
        ParseCommandError::UnknownVerb { .. } => {
            Reply::with_enhanced(500, enhanced::NOT_IMPLEMENTED, "Command not recognized")
        }
        ParseCommandError::MissingArgument { .. } | ParseCommandError::Syntax { .. } => {
            Reply::with_enhanced(501, enhanced::SYNTAX_ERROR_PARAMETERS, "Syntax error in parameters")
        }
        ParseCommandError::Address(_) | ParseCommandError::ClientName(_) => {
            Reply::with_enhanced(501, enhanced::SYNTAX_ERROR_PARAMETERS, "Malformed address")
        }
    }
}

/// Commands that need neither the reader (beyond the already-parsed
/// line) nor multi-line I/O: `HELO`/`EHLO`/`STARTTLS`/`MAIL`/`RCPT`/
/// `RSET`/`NOOP`/`QUIT`/`VRFY`/`EXPN`/`HELP`.
async fn handle_command(
    command: Command,
    raw_line: &str,
    session: &mut SmtpSession,
    config: &Config,
    services: &Services,
) -> (Reply, ControlFlow) {
    match command {
        Command::Helo(args) => {
            session.helo_name = Some(args.client_name.clone());
            session.esmtp = false;
            session.stage = Stage::Greeted;
            (
                Reply::new(250, format!("{} Hello {}", config.hostname, args.client_name)),
                ControlFlow::Continue,
            )
        }
        Command::Ehlo(args) => {
            session.helo_name = Some(args.client_name.clone());
            session.esmtp = true;
            session.stage = Stage::Greeted;
            (ehlo_reply(session, config, services, &args.client_name), ControlFlow::Continue)
        }
        Command::StartTls => (starttls_reply(raw_line, session, services), start_tls_flow(raw_line, session, services)),
        Command::MailFrom(args) => (mail_from_reply(args, session, config, services).await, ControlFlow::Continue),
        Command::RcptTo(args) => (rcpt_to_reply(args, session, config, services).await, ControlFlow::Continue),
        Command::Rset => {
            session.reset_envelope();
            (Reply::new(250, "Ok"), ControlFlow::Continue)
        }
        Command::Noop => (Reply::new(250, "Ok"), ControlFlow::Continue),
        Command::Quit => (
            Reply::with_enhanced(221, enhanced::CLOSING, format!("{} Service closing transmission channel", config.hostname)),
            ControlFlow::Quit,
        ),
        Command::Vrfy(_) | Command::Expn(_) => (
            Reply::new(252, "Cannot verify user, but will accept message and attempt delivery"),
            ControlFlow::Continue,
        ),
        Command::Help(_) => (
            Reply::new(214, "See https://www.rfc-editor.org/rfc/rfc5321 for more information"),
            ControlFlow::Continue,
        ),
        Command::Data | Command::Auth(_) => unreachable!("handled separately"),
    }
}

fn ehlo_reply(session: &SmtpSession, config: &Config, services: &Services, client_name: &ClientName) -> Reply {
    let mut lines = vec![format!("{} Hello {}", config.hostname, client_name)];
    lines.push(Extension::Size(config.max_message_size).to_string());
    lines.push(Extension::BitMime8.to_string());
    lines.push(Extension::Pipelining.to_string());
    lines.push(Extension::EnhancedStatusCodes.to_string());
    lines.push(Extension::Dsn.to_string());
    if services.tls_acceptor.is_some() && !session.tls_active {
        lines.push(Extension::StartTls.to_string());
    }
    if session.advertises_auth(config) {
        lines.push(Extension::Auth(vec!["PLAIN".to_owned(), "LOGIN".to_owned()]).to_string());
    }
    Reply::multiline(ReplyCode::new(250), lines)
}

fn has_trailing_args(raw_line: &str, verb: &str) -> bool {
    let trimmed = raw_line.trim_end();
    trimmed
        .get(verb.len()..)
        .is_some_and(|rest| !rest.trim().is_empty())
}

fn starttls_reply(raw_line: &str, session: &SmtpSession, services: &Services) -> Reply {
    if has_trailing_args(raw_line, "STARTTLS") {
        Reply::with_enhanced(501, enhanced::SYNTAX_ERROR_PARAMETERS, "STARTTLS does not accept arguments")
    } else if session.tls_active {
        Reply::with_enhanced(503, enhanced::BAD_SEQUENCE, "TLS already active")
    } else if services.tls_acceptor.is_none() {
        Reply::with_enhanced(454, enhanced::SERVICE_NOT_AVAILABLE, "TLS not available")
    } else {
        Reply::with_enhanced(220, enhanced::SERVICE_READY, "Ready to start TLS")
    }
}

fn start_tls_flow(raw_line: &str, session: &SmtpSession, services: &Services) -> ControlFlow {
    if !has_trailing_args(raw_line, "STARTTLS") && !session.tls_active && services.tls_acceptor.is_some() {
        ControlFlow::UpgradeTls
    } else {
        ControlFlow::Continue
    }
}

async fn mail_from_reply(
    args: vsmtp_protocol::MailFromArgs,
    session: &mut SmtpSession,
    config: &Config,
    services: &Services,
) -> Reply {
    if !session.stage.accepts_mail_from() {
        return Reply::with_enhanced(503, enhanced::BAD_SEQUENCE, "send HELO/EHLO first");
    }
    if session.is_submission && config.auth_required_on_submission && session.authenticated_user.is_none() {
        return Reply::with_enhanced(530, enhanced::AUTH_REQUIRED, "Authentication required");
    }
    if let Some(size) = args.size {
        if size > config.max_message_size {
            return Reply::with_enhanced(552, enhanced::MESSAGE_TOO_BIG, "Message size exceeds limit");
        }
    }

    let peer_ip = session.peer_addr.ip().to_string();
    let sender_domain = args.reverse_path.as_mailbox().map(|m| m.domain().as_str().to_owned());
    let sender_email = args.reverse_path.as_mailbox().map(|m| m.full().to_owned());
    let query = BlacklistQuery {
        ip: Some(&peer_ip),
        domain: sender_domain.as_deref(),
        email: sender_email.as_deref(),
    };

    match services.policy.is_blacklisted(&query).await {
        Ok(true) => {
            return Reply::with_enhanced(550, enhanced::POLICY_REJECT, "Rejected by policy: sender blacklisted");
        }
        Err(e) => {
            tracing::warn!(session_id = %session.session_id, error = %e, "blacklist check failed");
            return Reply::with_enhanced(451, enhanced::LOCAL_ERROR, "Temporary policy error");
        }
        Ok(false) => {}
    }

    let (identifier, capacity, limit_type) = match &session.authenticated_user {
        Some(user) => (
            user.clone(),
            f64::from(session.authenticated_rate_limit.unwrap_or(config.rate_limit_per_ip)),
            "user",
        ),
        None => (peer_ip, f64::from(config.rate_limit_per_ip), "ip"),
    };

    match services.policy.check_rate(&identifier, limit_type, capacity).await {
        Ok(true) => {
            session.mail_from = Some(args.reverse_path);
            session.stage = Stage::MailFrom;
            session.rcpt_to.clear();
            Reply::new(250, "Ok")
        }
        Ok(false) => Reply::with_enhanced(450, enhanced::MAILBOX_BUSY, "Rate limit exceeded"),
        Err(e) => {
            tracing::warn!(session_id = %session.session_id, error = %e, "rate limit check failed");
            Reply::with_enhanced(451, enhanced::LOCAL_ERROR, "Temporary policy error")
        }
    }
}

async fn rcpt_to_reply(
    args: vsmtp_protocol::RcptToArgs,
    session: &mut SmtpSession,
    config: &Config,
    services: &Services,
) -> Reply {
    if !session.stage.accepts_rcpt_to() {
        return Reply::with_enhanced(503, enhanced::BAD_SEQUENCE, "send MAIL FROM first");
    }
    if session.rcpt_to.len() >= config.max_recipients {
        return Reply::with_enhanced(452, enhanced::INSUFFICIENT_STORAGE, "Too many recipients");
    }

    let domain = args.forward_path.domain().as_str().to_owned();
    let email = args.forward_path.full().to_owned();
    let query = BlacklistQuery {
        ip: None,
        domain: Some(&domain),
        email: Some(&email),
    };

    match services.policy.is_blacklisted(&query).await {
        Ok(true) => {
            return Reply::with_enhanced(550, enhanced::POLICY_REJECT, "Rejected by policy: recipient blacklisted");
        }
        Err(e) => {
            tracing::warn!(session_id = %session.session_id, error = %e, "blacklist check failed");
            return Reply::with_enhanced(451, enhanced::LOCAL_ERROR, "Temporary policy error");
        }
        Ok(false) => {}
    }

    if config.greylist_enabled && session.authenticated_user.is_none() {
        let sender = session.mail_from.as_ref().map(ToString::to_string).unwrap_or_default();
        match services.policy.check_greylist(&sender, &email, session.peer_addr.ip()).await {
            Ok(true) => {}
            Ok(false) => {
                return Reply::with_enhanced(450, enhanced::MAILBOX_BUSY, "Greylisted, please try again later");
            }
            Err(e) => {
                tracing::warn!(session_id = %session.session_id, error = %e, "greylist check failed");
                return Reply::with_enhanced(451, enhanced::LOCAL_ERROR, "Temporary policy error");
            }
        }
    }

    session.rcpt_to.push(args.forward_path);
    session.stage = Stage::RcptTo;
    Reply::new(250, "Ok")
}

/// `DATA`: writes the `354` continuation itself, reads the body, enqueues
/// it, and returns the final reply. Only I/O errors on the connection
/// propagate; a too-large body is a normal (552) reply.
async fn handle_data<R, W>(
    reader: &mut Reader<R>,
    writer: &mut Writer<W>,
    session: &mut SmtpSession,
    config: &Config,
    services: &Services,
) -> Result<Reply, ProtocolError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if !session.stage.accepts_data() {
        return Ok(Reply::with_enhanced(503, enhanced::BAD_SEQUENCE, "send RCPT TO first"));
    }

    let continuation = Reply::with_enhanced(354, enhanced::START_MAIL_INPUT, "Start mail input; end with <CRLF>.<CRLF>");
    writer.write_reply(&continuation).await?;

    let body = match tokio::time::timeout(config.smtp_timeout, reader.read_data(config.max_message_size)).await {
        Ok(Ok(body)) => body,
        Ok(Err(ProtocolError::LineTooLong)) => {
            session.reset_envelope();
            return Ok(Reply::with_enhanced(552, enhanced::MESSAGE_TOO_BIG, "Message size exceeds limit"));
        }
        Ok(Err(e)) => return Err(e),
        Err(_) => return Err(ProtocolError::ConnectionClosed),
    };

    let queue_id = uuid::Uuid::new_v4().to_string();
    let header = received_header(session, config, &queue_id);
    let mut message = header.into_bytes();
    message.extend_from_slice(&body);

    let sender = session.mail_from.clone().unwrap_or(ReversePath::Null);
    let envelope = match Envelope::new(
        sender,
        session.rcpt_to.clone(),
        message,
        SessionInfo {
            peer_addr: session.peer_addr,
            helo_name: session.helo_name.clone(),
            authenticated_user: session.authenticated_user.clone(),
            tls_active: session.tls_active,
        },
    ) {
        Ok(envelope) => envelope,
        Err(_) => {
            session.reset_envelope();
            return Ok(Reply::with_enhanced(554, enhanced::TRANSACTION_FAILED, "No valid recipients"));
        }
    };

    let reply = match services.queue.enqueue_with_id(queue_id.clone(), envelope).await {
        Ok(queued) => Reply::with_enhanced(
            250,
            enhanced::OK,
            format!("Message accepted for delivery (Queue ID: {})", queued.queue_id),
        ),
        Err(e) => {
            tracing::warn!(session_id = %session.session_id, error = %e, "failed to enqueue message");
            Reply::with_enhanced(451, enhanced::LOCAL_ERROR, "Could not queue message")
        }
    };

    session.mail_from = None;
    session.rcpt_to.clear();
    session.stage = Stage::Greeted;
    Ok(reply)
}

/// `Received: from <helo> (<peer>) by <hostname> with <protocol> id
/// <queue_id>[ for <rcpt>]; <RFC 5322 date>`.
fn received_header(session: &SmtpSession, config: &Config, queue_id: &str) -> String {
    let date = time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc2822)
        .unwrap_or_default();
    let helo = session
        .helo_name
        .as_ref()
        .map_or_else(|| "unknown".to_owned(), ToString::to_string);
    let for_clause = match session.rcpt_to.as_slice() {
        [single] => format!(" for <{single}>"),
        _ => String::new(),
    };
    format!(
        "Received: from {helo} ({peer}) by {hostname} with {protocol} id {queue_id}{for_clause}; {date}\r\n",
        peer = session.peer_addr.ip(),
        hostname = config.hostname,
        protocol = session.protocol_token(),
    )
}

fn decode_base64_utf8(line: &str) -> Option<String> {
    BASE64.decode(line.trim().as_bytes()).ok().and_then(|bytes| String::from_utf8(bytes).ok())
}

/// `AUTH PLAIN`/`AUTH LOGIN`, per §4.1. Reads any continuation lines it
/// needs directly off `reader`; only connection I/O errors propagate.
async fn handle_auth<R, W>(
    args: vsmtp_protocol::AuthArgs,
    session: &mut SmtpSession,
    config: &Config,
    services: &Services,
    reader: &mut Reader<R>,
    writer: &mut Writer<W>,
) -> Result<Reply, ProtocolError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if session.authenticated_user.is_some() {
        return Ok(Reply::with_enhanced(503, enhanced::BAD_SEQUENCE, "Already authenticated"));
    }
    if session.is_submission && config.tls_required_on_submission && !session.tls_active {
        return Ok(Reply::with_enhanced(538, "5.7.11", "Encryption required for requested authentication mechanism"));
    }

    let credentials = match args.mechanism.to_ascii_uppercase().as_str() {
        "PLAIN" => {
            let blob = match args.initial_response {
                Some(ir) => ir,
                None => {
                    writer.write_reply(&Reply::new(334, "")).await?;
                    reader.read_line().await?
                }
            };
            let Some(decoded) = BASE64.decode(blob.trim().as_bytes()).ok() else {
                return Ok(Reply::with_enhanced(535, enhanced::AUTH_INVALID, "Invalid base64"));
            };
            let mut parts = decoded.splitn(3, |&b| b == 0);
            let _authzid = parts.next();
            match (parts.next(), parts.next()) {
                (Some(authcid), Some(passwd)) => Some((
                    String::from_utf8_lossy(authcid).into_owned(),
                    String::from_utf8_lossy(passwd).into_owned(),
                )),
                _ => None,
            }
        }
        "LOGIN" => {
            writer.write_reply(&Reply::new(334, "VXNlcm5hbWU6")).await?;
            let username_line = reader.read_line().await?;
            writer.write_reply(&Reply::new(334, "UGFzc3dvcmQ6")).await?;
            let password_line = reader.read_line().await?;
            match (decode_base64_utf8(&username_line), decode_base64_utf8(&password_line)) {
                (Some(username), Some(password)) => Some((username, password)),
                _ => None,
            }
        }
        _ => {
            return Ok(Reply::with_enhanced(504, "5.5.4", "Unrecognized authentication mechanism"));
        }
    };

    let Some((username, password)) = credentials else {
        return Ok(Reply::with_enhanced(535, enhanced::AUTH_INVALID, "Invalid base64 encoding"));
    };

    match services.auth.authenticate(&username, &password, session.peer_addr.ip()).await {
        Ok(Some(user)) => {
            session.authenticated_user = Some(user.username);
            session.authenticated_rate_limit = Some(user.rate_limit);
            session.stage = Stage::Authenticated;
            Ok(Reply::with_enhanced(235, enhanced::AUTH_SUCCESS, "Authentication successful"))
        }
        Ok(None) => Ok(Reply::with_enhanced(535, enhanced::AUTH_INVALID, "Authentication credentials invalid")),
        Err(e) => {
            tracing::warn!(session_id = %session.session_id, error = %e, "authentication backend error");
            Ok(Reply::with_enhanced(454, enhanced::SERVICE_NOT_AVAILABLE, "Temporary authentication failure"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config::default()
    }

    fn session(is_submission: bool) -> SmtpSession {
        SmtpSession::new("203.0.113.10:5000".parse().unwrap(), is_submission)
    }

    #[test]
    fn advertises_auth_on_relay_always() {
        let s = session(false);
        assert!(s.advertises_auth(&config()));
    }

    #[test]
    fn advertises_auth_on_submission_only_once_tls_active() {
        let mut s = session(true);
        let cfg = config();
        assert!(!s.advertises_auth(&cfg));
        s.tls_active = true;
        assert!(s.advertises_auth(&cfg));
    }

    #[test]
    fn protocol_token_reflects_tls_and_auth_state() {
        let mut s = session(false);
        assert_eq!(s.protocol_token(), "SMTP");
        s.esmtp = true;
        assert_eq!(s.protocol_token(), "ESMTP");
        s.tls_active = true;
        assert_eq!(s.protocol_token(), "ESMTPS");
        s.authenticated_user = Some("alice".to_owned());
        assert_eq!(s.protocol_token(), "ESMTPSA");
    }

    #[test]
    fn reset_for_starttls_preserves_listener_identity() {
        let mut s = session(true);
        let session_id = s.session_id;
        let peer = s.peer_addr;
        s.helo_name = Some("client.example.com".parse().unwrap());
        s.authenticated_user = Some("alice".to_owned());
        s.stage = Stage::RcptTo;
        s.rcpt_to.push("rcpt@example.com".parse().unwrap());

        s.reset_for_starttls();

        assert_eq!(s.session_id, session_id);
        assert_eq!(s.peer_addr, peer);
        assert!(s.is_submission);
        assert!(s.tls_active);
        assert!(s.helo_name.is_none());
        assert!(s.authenticated_user.is_none());
        assert_eq!(s.stage, Stage::Initial);
        assert!(s.rcpt_to.is_empty());
    }

    #[test]
    fn reset_envelope_falls_back_to_greeted_only_mid_transaction() {
        let mut s = session(false);
        s.stage = Stage::Greeted;
        s.reset_envelope();
        assert_eq!(s.stage, Stage::Greeted);

        s.stage = Stage::RcptTo;
        s.mail_from = Some(ReversePath::Null);
        s.rcpt_to.push("rcpt@example.com".parse().unwrap());
        s.reset_envelope();
        assert_eq!(s.stage, Stage::Greeted);
        assert!(s.mail_from.is_none());
        assert!(s.rcpt_to.is_empty());
    }

    #[test]
    fn has_trailing_args_detects_extra_tokens() {
        assert!(!has_trailing_args("STARTTLS", "STARTTLS"));
        assert!(!has_trailing_args("STARTTLS\r\n", "STARTTLS"));
        assert!(has_trailing_args("STARTTLS foo", "STARTTLS"));
    }

    #[test]
    fn trip_wire_fires_after_max_unknown_commands() {
        let mut s = session(false);
        let cfg = config();
        s.unknown_command_count = cfg.max_unknown_commands;
        assert!(s.trip_wire_reply(&cfg).is_some());
    }

    /// Builds a fresh `Services` backed by temp-directory stores and a
    /// `Config` with greylisting/auth-on-submission disabled so the happy
    /// path tests don't have to drive those flows too.
    fn test_services() -> (Services, Config) {
        let tmp = std::env::temp_dir().join(format!("vsmtp-session-test-{}", uuid::Uuid::new_v4()));
        let queue_store = std::sync::Arc::new(
            vsmtp_store::QueueStore::open(tmp.join("queue"), std::time::Duration::from_secs(300)).unwrap(),
        );
        let user_store = std::sync::Arc::new(vsmtp_store::UserStore::open(tmp.join("users")).unwrap());
        let policy_store = std::sync::Arc::new(vsmtp_store::PolicyStore::open(tmp.join("policy")).unwrap());

        let mut cfg = Config::default();
        cfg.greylist_enabled = false;
        cfg.auth_required_on_submission = false;
        cfg.smtp_timeout = std::time::Duration::from_secs(5);

        let services = Services {
            auth: std::sync::Arc::new(vsmtp_auth::AuthService::new(user_store, cfg.max_auth_failures, cfg.lockout_duration)),
            policy: std::sync::Arc::new(vsmtp_policy::PolicyService::new(
                policy_store,
                cfg.greylist_min_delay,
                cfg.greylist_max_age,
            )),
            queue: std::sync::Arc::new(vsmtp_queue::QueueService::new(queue_store, cfg.max_queue_age)),
            tls_acceptor: None,
        };
        (services, cfg)
    }

    /// Reads the `220` greeting, then for each entry in `lines` writes it
    /// (CRLF-terminated) and reads back exactly one reply. A multi-line
    /// entry (containing `\r\n`) is sent as a single write, for a `DATA`
    /// body that only gets one reply after its terminating `.`.
    async fn drive(client: &mut tokio::io::DuplexStream, lines: &[&str]) -> Vec<String> {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let mut replies = Vec::new();
        let mut buf = vec![0_u8; 65536];

        let n = client.read(&mut buf).await.unwrap();
        replies.push(String::from_utf8_lossy(&buf[..n]).into_owned());

        for line in lines {
            client.write_all(line.as_bytes()).await.unwrap();
            if !line.ends_with("\r\n") {
                client.write_all(b"\r\n").await.unwrap();
            }
            let n = client.read(&mut buf).await.unwrap();
            replies.push(String::from_utf8_lossy(&buf[..n]).into_owned());
        }
        replies
    }

    #[tokio::test]
    async fn full_relay_transaction_is_queued() {
        let (services, config) = test_services();
        let (mut client, server) = tokio::io::duplex(65536);
        let (server_read, server_write) = tokio::io::split(server);

        let handle = tokio::spawn(async move {
            let mut reader = Reader::new(server_read);
            let mut writer = Writer::new(server_write);
            let mut session = SmtpSession::new("198.51.100.7:40000".parse().unwrap(), false);

            let greeting = Reply::with_enhanced(220, enhanced::SERVICE_READY, format!("{} Service ready", config.hostname));
            writer.write_reply(&greeting).await.unwrap();
            dispatch_loop(&mut reader, &mut writer, &mut session, &config, &services).await;
            (session, services)
        });

        let replies = drive(
            &mut client,
            &[
                "EHLO client.example.com",
                "MAIL FROM:<alice@example.com>",
                "RCPT TO:<bob@example.net>",
                "DATA",
                "Subject: hi\r\n\r\nbody\r\n.",
                "QUIT",
            ],
        )
        .await;

        assert!(replies[0].starts_with("220"));
        assert!(replies[1].starts_with("250"));
        assert!(replies[2].starts_with("250"));
        assert!(replies[3].starts_with("250"));
        assert!(replies[4].starts_with("354"));
        assert!(replies[5].contains("Queue ID"));
        assert!(replies[6].starts_with("221"));

        let (_, services) = handle.await.unwrap();
        let queued = services.queue.list_by_status(vsmtp_common::OverallStatus::Active).await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].envelope.recipients.len(), 1);
    }

    #[tokio::test]
    async fn submission_without_auth_is_rejected_when_required() {
        let (services, mut config) = test_services();
        config.auth_required_on_submission = true;
        let (mut client, server) = tokio::io::duplex(65536);
        let (server_read, server_write) = tokio::io::split(server);

        tokio::spawn(async move {
            let mut reader = Reader::new(server_read);
            let mut writer = Writer::new(server_write);
            let mut session = SmtpSession::new("198.51.100.8:40001".parse().unwrap(), true);
            let greeting = Reply::with_enhanced(220, enhanced::SERVICE_READY, format!("{} Service ready", config.hostname));
            writer.write_reply(&greeting).await.unwrap();
            dispatch_loop(&mut reader, &mut writer, &mut session, &config, &services).await;
        });

        let replies = drive(&mut client, &["EHLO client.example.com", "MAIL FROM:<alice@example.com>"]).await;

        assert!(replies[1].starts_with("250"));
        assert!(replies[2].starts_with("530"));
    }

    #[tokio::test]
    async fn unknown_commands_trip_the_wire() {
        let (services, mut config) = test_services();
        config.max_unknown_commands = 2;
        let (mut client, server) = tokio::io::duplex(65536);
        let (server_read, server_write) = tokio::io::split(server);

        tokio::spawn(async move {
            let mut reader = Reader::new(server_read);
            let mut writer = Writer::new(server_write);
            let mut session = SmtpSession::new("198.51.100.9:40002".parse().unwrap(), false);
            let greeting = Reply::with_enhanced(220, enhanced::SERVICE_READY, format!("{} Service ready", config.hostname));
            writer.write_reply(&greeting).await.unwrap();
            dispatch_loop(&mut reader, &mut writer, &mut session, &config, &services).await;
        });

        let replies = drive(&mut client, &["BOGUS1", "BOGUS2"]).await;

        assert!(replies[1].starts_with("500"));
        assert!(replies[2].starts_with("421"));
    }

    #[tokio::test]
    async fn rset_returns_to_greeted_mid_transaction() {
        let (services, config) = test_services();
        let (mut client, server) = tokio::io::duplex(65536);
        let (server_read, server_write) = tokio::io::split(server);

        tokio::spawn(async move {
            let mut reader = Reader::new(server_read);
            let mut writer = Writer::new(server_write);
            let mut session = SmtpSession::new("198.51.100.10:40003".parse().unwrap(), false);
            let greeting = Reply::with_enhanced(220, enhanced::SERVICE_READY, format!("{} Service ready", config.hostname));
            writer.write_reply(&greeting).await.unwrap();
            dispatch_loop(&mut reader, &mut writer, &mut session, &config, &services).await;
        });

        let replies = drive(
            &mut client,
            &[
                "EHLO client.example.com",
                "MAIL FROM:<alice@example.com>",
                "RCPT TO:<bob@example.net>",
                "RSET",
                "RCPT TO:<bob@example.net>",
            ],
        )
        .await;

        assert!(replies[4].starts_with("250"));
        // RSET cleared the envelope, so RCPT TO without a prior MAIL FROM
        // in this reset transaction is out of sequence.
        assert!(replies[5].starts_with("503"));
    }

    #[tokio::test]
    async fn repeated_auth_failures_do_not_trip_the_error_wire() {
        let (services, mut config) = test_services();
        services.auth.create_user("alice".to_owned(), "secret", 100).await.unwrap();
        config.auth_required_on_submission = true;
        assert_eq!(config.max_errors, 3);

        let (mut client, server) = tokio::io::duplex(65536);
        let (server_read, server_write) = tokio::io::split(server);

        tokio::spawn(async move {
            let mut reader = Reader::new(server_read);
            let mut writer = Writer::new(server_write);
            let mut session = SmtpSession::new("198.51.100.11:40004".parse().unwrap(), true);
            let greeting = Reply::with_enhanced(220, enhanced::SERVICE_READY, format!("{} Service ready", config.hostname));
            writer.write_reply(&greeting).await.unwrap();
            dispatch_loop(&mut reader, &mut writer, &mut session, &config, &services).await;
        });

        let bad_auth = format!("AUTH PLAIN {}", BASE64.encode(b"\0alice\0wrong"));
        let replies = drive(
            &mut client,
            &[
                bad_auth.as_str(),
                bad_auth.as_str(),
                bad_auth.as_str(),
                bad_auth.as_str(),
                bad_auth.as_str(),
                "MAIL FROM:<alice@example.com>",
            ],
        )
        .await;

        for reply in &replies[1..=5] {
            assert!(reply.starts_with("535"), "expected 535, got {reply}");
        }
        // Five AUTH failures exceed max_errors=3 but don't count toward
        // the generic trip wire, so the session is still alive to reject
        // the unauthenticated MAIL FROM with its own policy code.
        assert!(replies[6].starts_with("530"), "expected 530, got {}", replies[6]);
    }
}
