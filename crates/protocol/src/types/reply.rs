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

use crate::{ReplyCode, ReplyParseError};

/// A full SMTP reply: one reply code shared by every physical line, each
/// line CRLF-terminated, all but the last using `code-text` and the last
/// using `code text` (RFC 5321 §4.2.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    code: ReplyCode,
    lines: Vec<String>,
}

impl Reply {
    #[must_use]
    pub fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code: ReplyCode::new(code),
            lines: vec![text.into()],
        }
    }

    #[must_use]
    pub fn with_enhanced(code: u16, enhanced: impl Into<String>, text: impl Into<String>) -> Self {
        let enhanced = enhanced.into();
        Self {
            lines: vec![format!("{enhanced} {}", text.into())],
            code: ReplyCode::with_enhanced(code, enhanced),
        }
    }

    #[must_use]
    pub fn multiline(code: ReplyCode, lines: Vec<String>) -> Self {
        assert!(!lines.is_empty(), "a reply must have at least one line");
        Self { code, lines }
    }

    #[must_use]
    pub const fn code(&self) -> &ReplyCode {
        &self.code
    }

    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Append another reply's lines to this one's, re-using `self`'s code.
    /// Used to extend a base reply with an extra trailer line (e.g. the
    /// hard-error trailer appended on `on_hard_error`).
    #[must_use]
    pub fn extended(mut self, extra: &Self) -> Self {
        self.lines.extend(extra.lines.iter().cloned());
        self
    }
}

impl std::fmt::Display for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let last = self.lines.len() - 1;
        for (i, line) in self.lines.iter().enumerate() {
            let sep = if i == last { ' ' } else { '-' };
            write!(f, "{}{sep}{line}\r\n", self.code.value())?;
        }
        Ok(())
    }
}

impl std::str::FromStr for Reply {
    type Err = ReplyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut code = None;
        let mut lines = Vec::new();

        for raw in s.split("\r\n").filter(|l| !l.is_empty()) {
            let bytes = raw.as_bytes();
            if bytes.len() < 4 || !bytes[..3].iter().all(u8::is_ascii_digit) {
                return Err(ReplyParseError::Malformed { line: raw.to_owned() });
            }
            let line_code: u16 = raw[..3].parse().map_err(|_| ReplyParseError::Malformed {
                line: raw.to_owned(),
            })?;
            let sep = bytes[3] as char;
            let rest = &raw[4..];

            code = Some(line_code);
            lines.push(rest.to_owned());

            if sep == ' ' {
                break;
            }
        }

        let code = code.ok_or_else(|| ReplyParseError::Malformed { line: s.to_owned() })?;
        Ok(Self {
            code: ReplyCode::new(code),
            lines,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::Reply;

    #[test]
    fn single_line_display() {
        assert_eq!(Reply::new(250, "Ok").to_string(), "250 Ok\r\n");
    }

    #[test]
    fn enhanced_display() {
        assert_eq!(
            Reply::with_enhanced(550, "5.1.1", "Mailbox unknown").to_string(),
            "550 5.1.1 Mailbox unknown\r\n"
        );
    }

    #[test]
    fn multiline_display_and_parse() {
        let reply = Reply::multiline(
            super::ReplyCode::new(250),
            vec!["one".to_owned(), "two".to_owned(), "three".to_owned()],
        );
        let text = reply.to_string();
        assert_eq!(text, "250-one\r\n250-two\r\n250 three\r\n");

        let parsed: Reply = text.parse().unwrap();
        assert_eq!(parsed, reply);
    }

    #[test]
    fn parse_stops_at_space_separator() {
        let parsed: Reply = "250-one\r\n250 two\r\n500 should-be-ignored\r\n".parse().unwrap();
        assert_eq!(parsed.lines(), ["one", "two"]);
    }
}
