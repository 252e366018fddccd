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

/// A fully-qualified domain name, lowercased and validated at construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde_with::SerializeDisplay, serde_with::DeserializeFromStr)]
pub struct Domain(String);

#[derive(Debug, thiserror::Error)]
pub enum DomainParseError {
    #[error("{s:?} is not a valid domain name")]
    CannotParse { s: String },
}

impl std::str::FromStr for Domain {
    type Err = DomainParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let domain = addr::parse_domain_name(s).map_err(|_| DomainParseError::CannotParse {
            s: s.to_owned(),
        })?;

        Ok(Self(domain.as_str().to_ascii_lowercase()))
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Domain {
    /// Build a domain without syntax validation, for values already known
    /// to be valid (e.g. parsed out of a mailbox that validated as a whole).
    #[must_use]
    pub fn new_unchecked(s: impl Into<String>) -> Self {
        Self(s.into().to_ascii_lowercase())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::Domain;

    #[test]
    fn parses_and_lowercases() {
        let d: Domain = "Example.COM".parse().unwrap();
        assert_eq!(d.as_str(), "example.com");
    }

    #[test]
    fn rejects_garbage() {
        assert!("not a domain".parse::<Domain>().is_err());
    }
}
