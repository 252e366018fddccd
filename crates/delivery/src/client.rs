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

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use vsmtp_protocol::{rustls, tokio_rustls, Extension, Mailbox, Reader, Reply, ReversePath, Writer};

/// Outcome of one connection attempt against a single MX host: the
/// per-recipient replies collected at `RCPT TO`, and the `(code, message)`
/// to apply to every recipient still undecided when the attempt stopped
/// early (connect/greeting/`EHLO`/`MAIL FROM` failure).
#[derive(Debug, Default)]
pub struct AttemptResult {
    pub per_recipient: HashMap<Mailbox, (u16, String)>,
    pub blanket: Option<(u16, String)>,
}

impl AttemptResult {
    fn blanket(code: u16, message: impl Into<String>) -> Self {
        Self {
            per_recipient: HashMap::new(),
            blanket: Some((code, message.into())),
        }
    }
}

fn reply_text(reply: &Reply) -> String {
    reply.lines().join("; ")
}

/// Attempt delivery of `message` to every recipient in `recipients` via
/// `host:25`, per the reception-side `attempt_delivery` algorithm: connect,
/// `EHLO`, opportunistic `STARTTLS`, `MAIL FROM`, `RCPT TO` per recipient,
/// `DATA`. Never returns an error: any failure is classified into an SMTP
/// reply code and reported through [`AttemptResult`] instead, so a worker
/// can always record *something* for every recipient.
#[allow(clippy::too_many_arguments)]
pub async fn attempt_delivery(
    host: &str,
    sender: &ReversePath,
    recipients: &[Mailbox],
    message: &[u8],
    our_hostname: &str,
    connect_timeout: Duration,
    data_timeout: Duration,
    tls_config: Arc<rustls::ClientConfig>,
) -> AttemptResult {
    let stream = match tokio::time::timeout(connect_timeout, tokio::net::TcpStream::connect((host, 25))).await
    {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return AttemptResult::blanket(450, format!("connection to {host} failed: {e}")),
        Err(_) => return AttemptResult::blanket(450, format!("connection to {host} timed out")),
    };

    let (read_half, write_half) = stream.into_split();
    let mut reader = Reader::new(read_half);
    let mut writer = Writer::new(write_half);

    let greeting = match read_reply(&mut reader, connect_timeout).await {
        Ok(reply) => reply,
        Err(outcome) => return AttemptResult::blanket(outcome.0, outcome.1),
    };
    if !greeting.code().is_success() {
        return AttemptResult::blanket(greeting.code().value(), reply_text(&greeting));
    }

    let ehlo = match send_ehlo(&mut reader, &mut writer, our_hostname, connect_timeout).await {
        Ok(reply) => reply,
        Err(outcome) => return AttemptResult::blanket(outcome.0, outcome.1),
    };
    if !ehlo.code().is_success() {
        return AttemptResult::blanket(ehlo.code().value(), reply_text(&ehlo));
    }

    let offers_starttls = ehlo
        .lines()
        .iter()
        .skip(1)
        .any(|line| matches!(line.parse::<Extension>(), Ok(Extension::StartTls)));

    if offers_starttls {
        if let Err(e) = writer.write_line("STARTTLS").await {
            return AttemptResult::blanket(450, format!("writing STARTTLS failed: {e}"));
        }
        let starttls_reply = match read_reply(&mut reader, connect_timeout).await {
            Ok(reply) => reply,
            Err(outcome) => return AttemptResult::blanket(outcome.0, outcome.1),
        };
        if !starttls_reply.code().is_success() {
            return AttemptResult::blanket(starttls_reply.code().value(), reply_text(&starttls_reply));
        }

        let plain = writer.into_inner().reunite(reader.into_inner()).expect("matching halves");
        let connector = tokio_rustls::TlsConnector::from(tls_config);
        let server_name = match rustls::ServerName::try_from(host) {
            Ok(name) => name,
            Err(_) => rustls::ServerName::try_from("invalid").expect("static name is valid"),
        };

        let tls_stream = match tokio::time::timeout(connect_timeout, connector.connect(server_name, plain)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return AttemptResult::blanket(450, format!("TLS handshake with {host} failed: {e}")),
            Err(_) => return AttemptResult::blanket(450, format!("TLS handshake with {host} timed out")),
        };
        let (tls_read, tls_write) = tokio::io::split(tls_stream);
        let mut reader = Reader::new(tls_read);
        let mut writer = Writer::new(tls_write);

        let ehlo = match send_ehlo(&mut reader, &mut writer, our_hostname, connect_timeout).await {
            Ok(reply) => reply,
            Err(outcome) => return AttemptResult::blanket(outcome.0, outcome.1),
        };
        if !ehlo.code().is_success() {
            return AttemptResult::blanket(ehlo.code().value(), reply_text(&ehlo));
        }

        run_transaction(&mut reader, &mut writer, sender, recipients, message, connect_timeout, data_timeout).await
    } else {
        run_transaction(&mut reader, &mut writer, sender, recipients, message, connect_timeout, data_timeout).await
    }
}

async fn read_reply<R: AsyncRead + Unpin>(
    reader: &mut Reader<R>,
    timeout: Duration,
) -> Result<Reply, (u16, String)> {
    match tokio::time::timeout(timeout, reader.read_reply()).await {
        Ok(Ok(reply)) => Ok(reply),
        Ok(Err(e)) => Err((450, format!("connection error: {e}"))),
        Err(_) => Err((450, "timed out waiting for a reply".to_owned())),
    }
}

async fn send_ehlo<R: AsyncRead + Unpin, W: AsyncWrite + Unpin>(
    reader: &mut Reader<R>,
    writer: &mut Writer<W>,
    our_hostname: &str,
    timeout: Duration,
) -> Result<Reply, (u16, String)> {
    writer
        .write_line(&format!("EHLO {our_hostname}"))
        .await
        .map_err(|e| (450, format!("writing EHLO failed: {e}")))?;
    read_reply(reader, timeout).await
}

/// `MAIL FROM` / `RCPT TO` / `DATA`, once the connection is in its final
/// (possibly TLS-wrapped) state.
async fn run_transaction<R: AsyncRead + Unpin, W: AsyncWrite + Unpin>(
    reader: &mut Reader<R>,
    writer: &mut Writer<W>,
    sender: &ReversePath,
    recipients: &[Mailbox],
    message: &[u8],
    connect_timeout: Duration,
    data_timeout: Duration,
) -> AttemptResult {
    let mail_from = match sender {
        ReversePath::Null => "MAIL FROM:<>".to_owned(),
        ReversePath::Mailbox(m) => format!("MAIL FROM:<{m}>"),
    };
    if let Err(e) = writer.write_line(&mail_from).await {
        return AttemptResult::blanket(450, format!("writing MAIL FROM failed: {e}"));
    }
    let reply = match read_reply(reader, connect_timeout).await {
        Ok(reply) => reply,
        Err(outcome) => return AttemptResult::blanket(outcome.0, outcome.1),
    };
    if !reply.code().is_success() {
        return AttemptResult::blanket(reply.code().value(), reply_text(&reply));
    }

    let mut per_recipient = HashMap::new();
    let mut accepted = Vec::new();
    for rcpt in recipients {
        if let Err(e) = writer.write_line(&format!("RCPT TO:<{rcpt}>")).await {
            per_recipient.insert(rcpt.clone(), (450, format!("writing RCPT TO failed: {e}")));
            continue;
        }
        match read_reply(reader, connect_timeout).await {
            Ok(reply) => {
                if reply.code().is_success() {
                    accepted.push(rcpt.clone());
                }
                per_recipient.insert(rcpt.clone(), (reply.code().value(), reply_text(&reply)));
            }
            Err(outcome) => {
                per_recipient.insert(rcpt.clone(), outcome);
            }
        }
    }

    // Every recipient was refused at RCPT TO: a real smtplib-style client
    // would raise rather than send a body nobody can receive.
    if accepted.is_empty() {
        return AttemptResult {
            per_recipient,
            blanket: None,
        };
    }

    match tokio::time::timeout(data_timeout, writer.write_line("DATA")).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            for rcpt in &accepted {
                per_recipient.insert(rcpt.clone(), (450, format!("writing DATA failed: {e}")));
            }
            return AttemptResult { per_recipient, blanket: None };
        }
        Err(_) => {
            for rcpt in &accepted {
                per_recipient.insert(rcpt.clone(), (450, "DATA command timed out".to_owned()));
            }
            return AttemptResult { per_recipient, blanket: None };
        }
    }
    let data_start = match read_reply(reader, data_timeout).await {
        Ok(reply) => reply,
        Err(outcome) => {
            for rcpt in &accepted {
                per_recipient.insert(rcpt.clone(), outcome.clone());
            }
            return AttemptResult { per_recipient, blanket: None };
        }
    };
    if data_start.code().value() != 354 {
        let outcome = (data_start.code().value(), reply_text(&data_start));
        for rcpt in &accepted {
            per_recipient.insert(rcpt.clone(), outcome.clone());
        }
        return AttemptResult { per_recipient, blanket: None };
    }

    let write_result = tokio::time::timeout(data_timeout, writer.write_data(message)).await;
    let final_reply = match write_result {
        Ok(Ok(())) => read_reply(reader, data_timeout).await,
        Ok(Err(e)) => Err((450, format!("writing message body failed: {e}"))),
        Err(_) => Err((450, "sending message body timed out".to_owned())),
    };

    let outcome = match final_reply {
        Ok(reply) => (reply.code().value(), reply_text(&reply)),
        Err(outcome) => outcome,
    };
    for rcpt in &accepted {
        per_recipient.insert(rcpt.clone(), outcome.clone());
    }

    AttemptResult { per_recipient, blanket: None }
}
