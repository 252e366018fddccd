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

use crate::{AddressParseError, ClientName, Mailbox, ReversePath};

#[derive(Debug, thiserror::Error)]
pub enum ParseCommandError {
    #[error("unknown command {verb:?}")]
    UnknownVerb { verb: String },

    #[error("missing argument for {verb}")]
    MissingArgument { verb: &'static str },

    #[error("invalid address: {0}")]
    Address(#[from] AddressParseError),

    #[error("invalid client name: {0}")]
    ClientName(#[from] crate::DomainParseError),

    #[error("malformed {verb} syntax: {detail}")]
    Syntax { verb: &'static str, detail: String },
}

/// The SMTP command verb, independent of its arguments. Mirrors the
/// fixed set of verbs the session state machine dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Verb {
    Helo,
    Ehlo,
    #[strum(serialize = "STARTTLS")]
    StartTls,
    Auth,
    #[strum(serialize = "MAIL")]
    MailFrom,
    #[strum(serialize = "RCPT")]
    RcptTo,
    Data,
    Rset,
    Noop,
    Quit,
    Vrfy,
    Expn,
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeloArgs {
    pub client_name: ClientName,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EhloArgs {
    pub client_name: ClientName,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthArgs {
    pub mechanism: String,
    pub initial_response: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailFromArgs {
    pub reverse_path: ReversePath,
    pub size: Option<u64>,
    pub body: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RcptToArgs {
    pub forward_path: Mailbox,
}

/// A fully parsed SMTP command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Helo(HeloArgs),
    Ehlo(EhloArgs),
    StartTls,
    Auth(AuthArgs),
    MailFrom(MailFromArgs),
    RcptTo(RcptToArgs),
    Data,
    Rset,
    Noop,
    Quit,
    Vrfy(String),
    Expn(String),
    Help(Option<String>),
}

impl Command {
    #[must_use]
    pub const fn verb(&self) -> Verb {
        match self {
            Self::Helo(_) => Verb::Helo,
            Self::Ehlo(_) => Verb::Ehlo,
            Self::StartTls => Verb::StartTls,
            Self::Auth(_) => Verb::Auth,
            Self::MailFrom(_) => Verb::MailFrom,
            Self::RcptTo(_) => Verb::RcptTo,
            Self::Data => Verb::Data,
            Self::Rset => Verb::Rset,
            Self::Noop => Verb::Noop,
            Self::Quit => Verb::Quit,
            Self::Vrfy(_) => Verb::Vrfy,
            Self::Expn(_) => Verb::Expn,
            Self::Help(_) => Verb::Help,
        }
    }
}

impl std::str::FromStr for Command {
    type Err = ParseCommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim_end_matches("\r\n").trim_end_matches('\n');
        let (verb, rest) = line
            .find(|c: char| c.is_whitespace())
            .map_or((line, ""), |i| (&line[..i], line[i..].trim_start()));

        match verb.to_ascii_uppercase().as_str() {
            "HELO" => {
                if rest.is_empty() {
                    return Err(ParseCommandError::MissingArgument { verb: "HELO" });
                }
                Ok(Self::Helo(HeloArgs {
                    client_name: rest.parse()?,
                }))
            }
            "EHLO" => {
                if rest.is_empty() {
                    return Err(ParseCommandError::MissingArgument { verb: "EHLO" });
                }
                Ok(Self::Ehlo(EhloArgs {
                    client_name: rest.parse()?,
                }))
            }
            "STARTTLS" => Ok(Self::StartTls),
            "AUTH" => parse_auth(rest),
            "MAIL" => parse_mail_from(rest),
            "RCPT" => parse_rcpt_to(rest),
            "DATA" => Ok(Self::Data),
            "RSET" => Ok(Self::Rset),
            "NOOP" => Ok(Self::Noop),
            "QUIT" => Ok(Self::Quit),
            "VRFY" => {
                if rest.is_empty() {
                    return Err(ParseCommandError::MissingArgument { verb: "VRFY" });
                }
                Ok(Self::Vrfy(rest.to_owned()))
            }
            "EXPN" => {
                if rest.is_empty() {
                    return Err(ParseCommandError::MissingArgument { verb: "EXPN" });
                }
                Ok(Self::Expn(rest.to_owned()))
            }
            "HELP" => Ok(Self::Help((!rest.is_empty()).then(|| rest.to_owned()))),
            other => Err(ParseCommandError::UnknownVerb { verb: other.to_owned() }),
        }
    }
}

fn parse_auth(rest: &str) -> Result<Command, ParseCommandError> {
    let mut words = rest.splitn(2, char::is_whitespace);
    let mechanism = words
        .next()
        .filter(|m| !m.is_empty())
        .ok_or(ParseCommandError::MissingArgument { verb: "AUTH" })?
        .to_ascii_uppercase();
    let initial_response = words.next().map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned);

    Ok(Command::Auth(AuthArgs {
        mechanism,
        initial_response,
    }))
}

fn parse_mail_from(rest: &str) -> Result<Command, ParseCommandError> {
    let rest = strip_ci_prefix(rest, "FROM:").ok_or_else(|| ParseCommandError::Syntax {
        verb: "MAIL",
        detail: "expected FROM:<path>".to_owned(),
    })?;

    let (path, params) = split_path_and_params(rest);
    let reverse_path = parse_reverse_path(path)?;

    let mut size = None;
    let mut body = None;
    for param in params {
        if let Some((key, value)) = param.split_once('=') {
            match key.to_ascii_uppercase().as_str() {
                "SIZE" => size = value.parse().ok(),
                "BODY" => body = Some(value.to_ascii_uppercase()),
                _ => {}
            }
        }
    }

    Ok(Command::MailFrom(MailFromArgs {
        reverse_path,
        size,
        body,
    }))
}

fn parse_rcpt_to(rest: &str) -> Result<Command, ParseCommandError> {
    let rest = strip_ci_prefix(rest, "TO:").ok_or_else(|| ParseCommandError::Syntax {
        verb: "RCPT",
        detail: "expected TO:<path>".to_owned(),
    })?;

    let (path, _params) = split_path_and_params(rest);
    let forward_path: Mailbox = path.trim_start_matches('<').trim_end_matches('>').parse()?;

    Ok(Command::RcptTo(RcptToArgs { forward_path }))
}

fn parse_reverse_path(path: &str) -> Result<ReversePath, ParseCommandError> {
    let trimmed = path.trim_start_matches('<').trim_end_matches('>');
    if trimmed.is_empty() {
        return Ok(ReversePath::Null);
    }
    Ok(ReversePath::Mailbox(trimmed.parse()?))
}

/// Splits `<path> PARAM=val PARAM2=val2` into the bracketed path and the
/// list of trailing ESMTP parameters.
fn split_path_and_params(rest: &str) -> (&str, std::str::SplitWhitespace<'_>) {
    rest.find('>').map_or((rest.trim(), "".split_whitespace()), |end| {
        let (path, tail) = rest.split_at(end + 1);
        (path.trim(), tail.trim().split_whitespace())
    })
}

fn strip_ci_prefix<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    (s.len() >= prefix.len() && s[..prefix.len()].eq_ignore_ascii_case(prefix)).then(|| &s[prefix.len()..])
}

#[cfg(test)]
mod tests {
    use super::{Command, ReversePath};

    #[test]
    fn parses_ehlo() {
        let cmd: Command = "EHLO client.example.com\r\n".parse().unwrap();
        assert_eq!(cmd.verb().to_string(), "EHLO");
    }

    #[test]
    fn parses_mail_from_with_size() {
        let cmd: Command = "MAIL FROM:<a@b.com> SIZE=1024 BODY=8BITMIME".parse().unwrap();
        let Command::MailFrom(args) = cmd else {
            panic!("expected MailFrom")
        };
        assert_eq!(args.size, Some(1024));
        assert_eq!(args.body.as_deref(), Some("8BITMIME"));
        assert!(matches!(args.reverse_path, ReversePath::Mailbox(_)));
    }

    #[test]
    fn parses_null_reverse_path() {
        let cmd: Command = "MAIL FROM:<>".parse().unwrap();
        let Command::MailFrom(args) = cmd else {
            panic!("expected MailFrom")
        };
        assert_eq!(args.reverse_path, ReversePath::Null);
    }

    #[test]
    fn parses_rcpt_to() {
        let cmd: Command = "RCPT TO:<user@example.com>".parse().unwrap();
        let Command::RcptTo(args) = cmd else {
            panic!("expected RcptTo")
        };
        assert_eq!(args.forward_path.full(), "user@example.com");
    }

    #[test]
    fn parses_auth_with_initial_response() {
        let cmd: Command = "AUTH PLAIN dGVzdAB0ZXN0AHRlc3Q=".parse().unwrap();
        let Command::Auth(args) = cmd else {
            panic!("expected Auth")
        };
        assert_eq!(args.mechanism, "PLAIN");
        assert!(args.initial_response.is_some());
    }

    #[test]
    fn rejects_unknown_verb() {
        assert!("FROBNICATE\r\n".parse::<Command>().is_err());
    }

    #[test]
    fn no_arg_commands_ignore_trailing_whitespace() {
        assert_eq!("QUIT\r\n".parse::<Command>().unwrap(), Command::Quit);
        assert_eq!("NOOP\r\n".parse::<Command>().unwrap(), Command::Noop);
    }
}
