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

use crate::{file_store::JsonFileStore, StoreError};
use vsmtp_common::{GreylistEntry, PolicyRule, RateBucket};

/// Persists the three kinds of record `vsmtp-policy` consults on every
/// connection: blacklist/whitelist rules, per-identifier rate buckets,
/// and greylist triplets. Each gets its own sub-directory of
/// [`JsonFileStore`] so the three never collide on key names.
pub struct PolicyStore {
    rules: JsonFileStore,
    buckets: JsonFileStore,
    greylist: JsonFileStore,
    lock: tokio::sync::RwLock<()>,
}

fn rule_key(rule_type: vsmtp_common::RuleType, target: &str) -> String {
    format!("{rule_type}__{target}")
}

fn bucket_key(limit_type: &str, identifier: &str) -> String {
    format!("{limit_type}__{identifier}")
}

fn greylist_key(sender: &str, recipient: &str, peer_ip: std::net::IpAddr) -> String {
    format!("{sender}__{recipient}__{peer_ip}")
}

impl PolicyStore {
    pub fn open(dir: impl Into<std::path::PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        Ok(Self {
            rules: JsonFileStore::open(dir.join("rules"))?,
            buckets: JsonFileStore::open(dir.join("buckets"))?,
            greylist: JsonFileStore::open(dir.join("greylist"))?,
            lock: tokio::sync::RwLock::new(()),
        })
    }

    pub async fn put_rule(&self, rule: &PolicyRule) -> Result<(), StoreError> {
        let _guard = self.lock.write().await;
        self.rules.write(&rule_key(rule.rule_type, &rule.target), rule)
    }

    pub async fn delete_rule(&self, rule_type: vsmtp_common::RuleType, target: &str) -> Result<(), StoreError> {
        let _guard = self.lock.write().await;
        self.rules.delete(&rule_key(rule_type, target))
    }

    pub async fn list_rules(&self) -> Result<Vec<PolicyRule>, StoreError> {
        let _guard = self.lock.read().await;
        self.rules.list()
    }

    pub async fn get_bucket(&self, limit_type: &str, identifier: &str) -> Result<Option<RateBucket>, StoreError> {
        let _guard = self.lock.read().await;
        self.buckets.read(&bucket_key(limit_type, identifier))
    }

    pub async fn put_bucket(&self, bucket: &RateBucket) -> Result<(), StoreError> {
        let _guard = self.lock.write().await;
        self.buckets
            .write(&bucket_key(&bucket.limit_type, &bucket.identifier), bucket)
    }

    pub async fn get_greylist(
        &self,
        sender: &str,
        recipient: &str,
        peer_ip: std::net::IpAddr,
    ) -> Result<Option<GreylistEntry>, StoreError> {
        let _guard = self.lock.read().await;
        self.greylist.read(&greylist_key(sender, recipient, peer_ip))
    }

    pub async fn put_greylist(&self, entry: &GreylistEntry) -> Result<(), StoreError> {
        let _guard = self.lock.write().await;
        self.greylist
            .write(&greylist_key(&entry.sender, &entry.recipient, entry.peer_ip), entry)
    }

    /// All greylist triplets, for the periodic sweep that prunes entries
    /// older than `greylist_max_age`.
    pub async fn list_greylist(&self) -> Result<Vec<GreylistEntry>, StoreError> {
        let _guard = self.lock.read().await;
        self.greylist.list()
    }

    pub async fn delete_greylist(
        &self,
        sender: &str,
        recipient: &str,
        peer_ip: std::net::IpAddr,
    ) -> Result<(), StoreError> {
        let _guard = self.lock.write().await;
        self.greylist.delete(&greylist_key(sender, recipient, peer_ip))
    }
}

#[cfg(test)]
mod tests {
    use super::PolicyStore;
    use vsmtp_common::{PolicyRule, RuleAction, RuleType};

    #[tokio::test]
    async fn put_list_delete_rule() {
        let tmp = std::env::temp_dir().join(format!("vsmtp-policy-test-{}", uuid::Uuid::new_v4()));
        let store = PolicyStore::open(&tmp).unwrap();

        let rule = PolicyRule {
            rule_type: RuleType::Blacklist,
            target: "spammer.example".to_owned(),
            action: RuleAction::Reject,
            reason: Some("reported abuse".to_owned()),
            enabled: true,
            expires_at: None,
        };
        store.put_rule(&rule).await.unwrap();

        let rules = store.list_rules().await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].target, "spammer.example");

        store.delete_rule(RuleType::Blacklist, "spammer.example").await.unwrap();
        assert!(store.list_rules().await.unwrap().is_empty());

        std::fs::remove_dir_all(&tmp).ok();
    }
}
