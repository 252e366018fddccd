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

/// A SASL-authenticated account. `password_hash` is a PHC-encoded
/// Argon2id string (see `vsmtp-auth`); it is never logged or serialized
/// back out in debug output.
#[derive(Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct User {
    pub username: String,
    pub password_hash: String,
    pub enabled: bool,
    pub admin: bool,
    /// Maximum accepted messages per hour for this account.
    pub rate_limit: u32,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_login: Option<time::OffsetDateTime>,
    pub login_count: u64,
}

impl std::fmt::Debug for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("User")
            .field("username", &self.username)
            .field("password_hash", &"<redacted>")
            .field("enabled", &self.enabled)
            .field("admin", &self.admin)
            .field("rate_limit", &self.rate_limit)
            .field("last_login", &self.last_login)
            .field("login_count", &self.login_count)
            .finish()
    }
}

impl User {
    #[must_use]
    pub fn new(username: String, password_hash: String, rate_limit: u32) -> Self {
        Self {
            username,
            password_hash,
            enabled: true,
            admin: false,
            rate_limit,
            last_login: None,
            login_count: 0,
        }
    }
}
