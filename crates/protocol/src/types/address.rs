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

use crate::Domain;

#[derive(Debug, thiserror::Error)]
pub enum AddressParseError {
    #[error("{s:?} is not a valid mailbox")]
    CannotParse { s: String },
}

/// A syntactically valid mailbox, e.g. `user@example.com`.
#[derive(Clone, Eq, serde_with::SerializeDisplay, serde_with::DeserializeFromStr)]
pub struct Mailbox {
    at_sign: usize,
    full: String,
}

impl std::str::FromStr for Mailbox {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        addr::parse_email_address(s).map_err(|_| AddressParseError::CannotParse {
            s: s.to_owned(),
        })?;

        Ok(Self {
            #[allow(clippy::expect_used)]
            at_sign: s.find('@').expect("addr::parse_email_address guarantees an '@'"),
            full: s.to_owned(),
        })
    }
}

impl PartialEq for Mailbox {
    fn eq(&self, other: &Self) -> bool {
        self.full == other.full
    }
}

impl std::hash::Hash for Mailbox {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.full.hash(state);
    }
}

impl PartialOrd for Mailbox {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Mailbox {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.full.cmp(&other.full)
    }
}

impl std::fmt::Display for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.full)
    }
}

impl std::fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Mailbox").field(&self.full).finish()
    }
}

impl Mailbox {
    #[must_use]
    pub fn full(&self) -> &str {
        &self.full
    }

    #[must_use]
    pub fn local_part(&self) -> &str {
        &self.full[..self.at_sign]
    }

    #[must_use]
    #[allow(clippy::missing_panics_doc)]
    pub fn domain(&self) -> Domain {
        Domain::new_unchecked(&self.full[self.at_sign + 1..])
    }
}

/// The `MAIL FROM` reverse-path: either a mailbox or the null sender `<>`,
/// used for bounce notifications to avoid mail loops.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ReversePath {
    Null,
    Mailbox(Mailbox),
}

impl ReversePath {
    #[must_use]
    pub fn as_mailbox(&self) -> Option<&Mailbox> {
        match self {
            Self::Null => None,
            Self::Mailbox(m) => Some(m),
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl std::fmt::Display for ReversePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Mailbox(m) => write!(f, "{m}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Mailbox;

    #[test]
    fn parses_local_and_domain() {
        let m: Mailbox = "hello@domain.com".parse().unwrap();
        assert_eq!(m.local_part(), "hello");
        assert_eq!(m.domain().as_str(), "domain.com");
    }

    #[test]
    fn rejects_missing_at() {
        assert!("not-an-email".parse::<Mailbox>().is_err());
    }

    #[test]
    fn serde_roundtrip() {
        let parsed: Mailbox = serde_json::from_str(r#""hello@domain.com""#).unwrap();
        assert_eq!(serde_json::to_string(&parsed).unwrap(), r#""hello@domain.com""#);
    }
}
