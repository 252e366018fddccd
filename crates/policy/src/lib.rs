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

//! Connection-time policy decisions: blacklist/whitelist lookup,
//! token-bucket rate limiting, and greylisting. Every check is a pure
//! boolean decision over [`vsmtp_store::PolicyStore`] state; side effects
//! are limited to persisting the bucket or triplet it consulted.

use vsmtp_common::{GreylistEntry, PolicyRule, RateBucket, RuleAction, RuleType};
use vsmtp_store::{PolicyStore, StoreError};

/// What to check a connection or transaction attribute against the
/// blacklist/whitelist table. Any `None` field is skipped.
#[derive(Debug, Clone, Default)]
pub struct BlacklistQuery<'a> {
    pub ip: Option<&'a str>,
    pub domain: Option<&'a str>,
    pub email: Option<&'a str>,
}

pub struct PolicyService {
    store: std::sync::Arc<PolicyStore>,
    greylist_min_delay: time::Duration,
    greylist_max_age: time::Duration,
}

impl PolicyService {
    #[must_use]
    pub fn new(
        store: std::sync::Arc<PolicyStore>,
        greylist_min_delay: std::time::Duration,
        greylist_max_age: std::time::Duration,
    ) -> Self {
        Self {
            store,
            greylist_min_delay: time::Duration::try_from(greylist_min_delay).unwrap_or(time::Duration::MINUTE * 5),
            greylist_max_age: time::Duration::try_from(greylist_max_age).unwrap_or(time::Duration::HOUR * 4),
        }
    }

    /// True if any of `query`'s present fields matches an enabled,
    /// non-expired blacklist rule — unless an equally active whitelist
    /// rule matches the same target, which takes precedence.
    pub async fn is_blacklisted(&self, query: &BlacklistQuery<'_>) -> Result<bool, StoreError> {
        let now = time::OffsetDateTime::now_utc();
        let rules = self.store.list_rules().await?;

        let targets = [query.ip, query.domain, query.email];
        let matches = |rule: &PolicyRule| {
            rule.is_active(now)
                && targets
                    .iter()
                    .flatten()
                    .any(|target| target.eq_ignore_ascii_case(&rule.target))
        };

        let blacklisted = rules
            .iter()
            .any(|r| r.rule_type == RuleType::Blacklist && r.action == RuleAction::Reject && matches(r));
        if !blacklisted {
            return Ok(false);
        }

        let whitelisted = rules
            .iter()
            .any(|r| r.rule_type == RuleType::Whitelist && r.action == RuleAction::Allow && matches(r));
        Ok(!whitelisted)
    }

    /// Token-bucket admission check for `(identifier, limit_type)`,
    /// creating the bucket on first use. Persists the updated bucket
    /// whether or not the request was admitted.
    pub async fn check_rate(
        &self,
        identifier: &str,
        limit_type: &str,
        capacity: f64,
    ) -> Result<bool, StoreError> {
        let now = time::OffsetDateTime::now_utc();
        let refill_rate = capacity / 3600.0;

        let mut bucket = match self.store.get_bucket(limit_type, identifier).await? {
            Some(bucket) => bucket,
            None => RateBucket::new(identifier.to_owned(), limit_type.to_owned(), capacity, refill_rate, now),
        };

        let allowed = bucket.try_consume(now);
        self.store.put_bucket(&bucket).await?;
        Ok(allowed)
    }

    /// Greylist decision for a `(sender, recipient, peer_ip)` triplet.
    /// Returns `true` once the triplet has waited out `greylist_min_delay`
    /// without exceeding `greylist_max_age` since first seen.
    pub async fn check_greylist(
        &self,
        sender: &str,
        recipient: &str,
        peer_ip: std::net::IpAddr,
    ) -> Result<bool, StoreError> {
        let now = time::OffsetDateTime::now_utc();

        let entry = self.store.get_greylist(sender, recipient, peer_ip).await?;
        let mut entry = match entry {
            None => {
                let entry = GreylistEntry::new(sender.to_owned(), recipient.to_owned(), peer_ip, now);
                self.store.put_greylist(&entry).await?;
                return Ok(false);
            }
            Some(entry) if now - entry.first_seen > self.greylist_max_age => {
                let entry = GreylistEntry::new(sender.to_owned(), recipient.to_owned(), peer_ip, now);
                self.store.put_greylist(&entry).await?;
                return Ok(false);
            }
            Some(entry) => entry,
        };

        entry.attempts += 1;
        entry.last_seen = now;

        let passed = now - entry.first_seen >= self.greylist_min_delay;
        entry.passed = entry.passed || passed;
        self.store.put_greylist(&entry).await?;
        Ok(passed)
    }
}

#[cfg(test)]
mod tests {
    use super::{BlacklistQuery, PolicyService};
    use vsmtp_common::{PolicyRule, RuleAction, RuleType};
    use vsmtp_store::PolicyStore;

    fn service() -> (std::path::PathBuf, PolicyService) {
        let tmp = std::env::temp_dir().join(format!("vsmtp-policy-svc-test-{}", uuid::Uuid::new_v4()));
        let store = std::sync::Arc::new(PolicyStore::open(&tmp).unwrap());
        let service = PolicyService::new(
            store,
            std::time::Duration::from_secs(5 * 60),
            std::time::Duration::from_secs(4 * 60 * 60),
        );
        (tmp, service)
    }

    #[tokio::test]
    async fn blacklist_matches_and_whitelist_overrides() {
        let (tmp, service) = service();
        let store = PolicyStore::open(&tmp).unwrap();

        store
            .put_rule(&PolicyRule {
                rule_type: RuleType::Blacklist,
                target: "spammer.example".to_owned(),
                action: RuleAction::Reject,
                reason: None,
                enabled: true,
                expires_at: None,
            })
            .await
            .unwrap();

        let query = BlacklistQuery {
            domain: Some("spammer.example"),
            ..Default::default()
        };
        assert!(service.is_blacklisted(&query).await.unwrap());

        store
            .put_rule(&PolicyRule {
                rule_type: RuleType::Whitelist,
                target: "spammer.example".to_owned(),
                action: RuleAction::Allow,
                reason: Some("known false positive".to_owned()),
                enabled: true,
                expires_at: None,
            })
            .await
            .unwrap();

        assert!(!service.is_blacklisted(&query).await.unwrap());

        std::fs::remove_dir_all(&tmp).ok();
    }

    #[tokio::test]
    async fn greylist_defers_then_passes_after_min_delay() {
        let (tmp, service) = service();
        let peer: std::net::IpAddr = "198.51.100.7".parse().unwrap();

        assert!(!service
            .check_greylist("a@example.com", "b@example.org", peer)
            .await
            .unwrap());
        // Immediate retry still inside MIN_DELAY.
        assert!(!service
            .check_greylist("a@example.com", "b@example.org", peer)
            .await
            .unwrap());

        std::fs::remove_dir_all(&tmp).ok();
    }

    #[tokio::test]
    async fn rate_limit_admits_then_rejects() {
        let (tmp, service) = service();
        assert!(service.check_rate("203.0.113.4", "per_ip", 1.0).await.unwrap());
        assert!(!service.check_rate("203.0.113.4", "per_ip", 1.0).await.unwrap());

        std::fs::remove_dir_all(&tmp).ok();
    }
}
