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

/// A three-digit SMTP reply code, optionally carrying an RFC 3463 enhanced
/// status code (`class.subject.detail`).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyCode {
    Code { code: u16 },
    Enhanced { code: u16, enhanced: String },
}

impl ReplyCode {
    #[must_use]
    pub const fn value(&self) -> u16 {
        match self {
            Self::Code { code } | Self::Enhanced { code, .. } => *code,
        }
    }

    /// The reply class: 2 (success), 4 (transient) or 5 (permanent).
    #[must_use]
    pub const fn class(&self) -> u16 {
        self.value() / 100
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.class() == 2
    }

    #[must_use]
    pub const fn is_transient(&self) -> bool {
        self.class() == 4
    }

    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        self.class() == 5
    }

    #[must_use]
    pub fn enhanced(&self) -> Option<&str> {
        match self {
            Self::Enhanced { enhanced, .. } => Some(enhanced),
            Self::Code { .. } => None,
        }
    }

    pub fn new(code: u16) -> Self {
        Self::Code { code }
    }

    pub fn with_enhanced(code: u16, enhanced: impl Into<String>) -> Self {
        Self::Enhanced {
            code,
            enhanced: enhanced.into(),
        }
    }
}

impl std::fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Code { code } => write!(f, "{code}"),
            Self::Enhanced { code, enhanced } => write!(f, "{code} {enhanced}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ReplyCode;

    #[test]
    fn classifies() {
        assert!(ReplyCode::new(250).is_success());
        assert!(ReplyCode::new(450).is_transient());
        assert!(ReplyCode::new(550).is_permanent());
    }

    #[test]
    fn displays_enhanced() {
        assert_eq!(
            ReplyCode::with_enhanced(550, "5.1.1").to_string(),
            "550 5.1.1"
        );
    }
}
