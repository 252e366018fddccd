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

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, serde::Serialize, serde::Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    Blacklist,
    Whitelist,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, serde::Serialize, serde::Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    Reject,
    Allow,
}

/// A blacklist/whitelist entry matched against an IP literal, domain, or
/// full email address.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PolicyRule {
    pub rule_type: RuleType,
    pub target: String,
    pub action: RuleAction,
    pub reason: Option<String>,
    pub enabled: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<time::OffsetDateTime>,
}

impl PolicyRule {
    #[must_use]
    pub fn is_active(&self, now: time::OffsetDateTime) -> bool {
        self.enabled && self.expires_at.map_or(true, |expires_at| now < expires_at)
    }
}

/// A token-bucket rate-limit counter, unique per `(identifier, limit_type)`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RateBucket {
    pub identifier: String,
    pub limit_type: String,
    pub capacity: f64,
    pub tokens: f64,
    pub refill_rate: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub last_refill: time::OffsetDateTime,
    pub total_requests: u64,
    pub rejected_requests: u64,
}

impl RateBucket {
    #[must_use]
    pub fn new(identifier: String, limit_type: String, capacity: f64, refill_rate: f64, now: time::OffsetDateTime) -> Self {
        Self {
            identifier,
            limit_type,
            capacity,
            tokens: capacity,
            refill_rate,
            last_refill: now,
            total_requests: 0,
            rejected_requests: 0,
        }
    }

    /// Refills proportionally to elapsed time, then attempts to consume
    /// one token. Returns whether the request is allowed.
    pub fn try_consume(&mut self, now: time::OffsetDateTime) -> bool {
        let elapsed = (now - self.last_refill).as_seconds_f64().max(0.0);
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;

        self.total_requests += 1;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            self.rejected_requests += 1;
            false
        }
    }
}

/// A `(sender, recipient, peer_ip)` triplet observed for greylisting.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct GreylistEntry {
    pub sender: String,
    pub recipient: String,
    pub peer_ip: std::net::IpAddr,
    #[serde(with = "time::serde::rfc3339")]
    pub first_seen: time::OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen: time::OffsetDateTime,
    pub attempts: u32,
    pub passed: bool,
}

impl GreylistEntry {
    #[must_use]
    pub fn new(sender: String, recipient: String, peer_ip: std::net::IpAddr, now: time::OffsetDateTime) -> Self {
        Self {
            sender,
            recipient,
            peer_ip,
            first_seen: now,
            last_seen: now,
            attempts: 1,
            passed: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RateBucket;

    #[test]
    fn consumes_and_refills() {
        let t0 = time::OffsetDateTime::UNIX_EPOCH;
        let mut bucket = RateBucket::new("1.2.3.4".to_owned(), "per_hour".to_owned(), 2.0, 1.0, t0);

        assert!(bucket.try_consume(t0));
        assert!(bucket.try_consume(t0));
        assert!(!bucket.try_consume(t0));

        let later = t0 + time::Duration::seconds(2);
        assert!(bucket.try_consume(later));
    }
}
