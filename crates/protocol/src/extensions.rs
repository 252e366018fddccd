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

/// A capability advertised in an `EHLO` response, or recognized on a
/// remote server's `EHLO` response while acting as a client.
///
/// Ordering matches the fixed capability order the session advertises:
/// `SIZE`, `8BITMIME`, `PIPELINING`, `ENHANCEDSTATUSCODES`, `DSN`,
/// `STARTTLS`, `AUTH <mechanisms>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extension {
    Size(u64),
    BitMime8,
    Pipelining,
    EnhancedStatusCodes,
    Dsn,
    StartTls,
    Auth(Vec<String>),
    /// A token this implementation doesn't recognize, preserved verbatim
    /// so a remote server's full capability set can still be inspected.
    Unknown(String),
}

impl std::fmt::Display for Extension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Size(max) => write!(f, "SIZE {max}"),
            Self::BitMime8 => f.write_str("8BITMIME"),
            Self::Pipelining => f.write_str("PIPELINING"),
            Self::EnhancedStatusCodes => f.write_str("ENHANCEDSTATUSCODES"),
            Self::Dsn => f.write_str("DSN"),
            Self::StartTls => f.write_str("STARTTLS"),
            Self::Auth(mechanisms) => write!(f, "AUTH {}", mechanisms.join(" ")),
            Self::Unknown(token) => f.write_str(token),
        }
    }
}

impl std::str::FromStr for Extension {
    type Err = std::convert::Infallible;

    /// Parse one capability line (without the leading `250-`/`250 `) as
    /// seen in a remote server's `EHLO` response.
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(Self::Unknown(String::new()));
        };

        Ok(match verb.to_ascii_uppercase().as_str() {
            "SIZE" => words.next().and_then(|n| n.parse().ok()).map_or_else(
                || Self::Unknown(line.to_owned()),
                Self::Size,
            ),
            "8BITMIME" => Self::BitMime8,
            "PIPELINING" => Self::Pipelining,
            "ENHANCEDSTATUSCODES" => Self::EnhancedStatusCodes,
            "DSN" => Self::Dsn,
            "STARTTLS" => Self::StartTls,
            "AUTH" => Self::Auth(words.map(str::to_ascii_uppercase).collect()),
            _ => Self::Unknown(line.to_owned()),
        })
    }
}

impl Extension {
    #[must_use]
    pub const fn is_start_tls(&self) -> bool {
        matches!(self, Self::StartTls)
    }

    #[must_use]
    pub fn auth_mechanisms(&self) -> Option<&[String]> {
        match self {
            Self::Auth(mechanisms) => Some(mechanisms),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Extension;

    #[test]
    fn displays_size() {
        assert_eq!(Extension::Size(35_882_577).to_string(), "SIZE 35882577");
    }

    #[test]
    fn displays_auth() {
        let auth = Extension::Auth(vec!["PLAIN".to_owned(), "LOGIN".to_owned()]);
        assert_eq!(auth.to_string(), "AUTH PLAIN LOGIN");
    }

    #[test]
    fn parses_roundtrip() {
        let parsed: Extension = "SIZE 1024".parse().unwrap();
        assert_eq!(parsed, Extension::Size(1024));

        let parsed: Extension = "STARTTLS".parse().unwrap();
        assert!(parsed.is_start_tls());

        let parsed: Extension = "AUTH PLAIN LOGIN".parse().unwrap();
        assert_eq!(
            parsed.auth_mechanisms(),
            Some(&["PLAIN".to_owned(), "LOGIN".to_owned()][..])
        );
    }
}
