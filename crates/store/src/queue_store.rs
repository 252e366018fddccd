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
use vsmtp_common::{
    model::queue::{RecipientStateKind, RETRY_SCHEDULE},
    Envelope, Lease, OverallStatus, QueuedMessage,
};
use vsmtp_protocol::Mailbox;

/// Durable, per-recipient message queue backed by one JSON metadata file
/// and one sibling `.eml` body blob per `queue_id`, plus an in-memory
/// index mirroring the `status`/`next_retry_at` lookups callers need.
///
/// The index and the on-disk files are kept in lockstep under a single
/// `tokio::sync::RwLock`: every mutating call takes the write half, which
/// is exactly the "single-writer discipline" the specification allows.
pub struct QueueStore {
    meta: JsonFileStore,
    bodies_dir: std::path::PathBuf,
    index: tokio::sync::RwLock<Index>,
    lease_ttl: std::time::Duration,
}

#[derive(Default)]
struct Index {
    /// `queue_id -> (status, next_retry_at)`, rebuilt from disk at open
    /// and kept current by every mutating method.
    entries: std::collections::HashMap<String, (OverallStatus, Option<time::OffsetDateTime>)>,
}

impl QueueStore {
    pub fn open(dir: impl Into<std::path::PathBuf>, lease_ttl: std::time::Duration) -> Result<Self, StoreError> {
        let dir = dir.into();
        let meta = JsonFileStore::open(dir.join("meta"))?;
        let bodies_dir = dir.join("bodies");
        std::fs::create_dir_all(&bodies_dir).map_err(|source| StoreError::Io {
            path: bodies_dir.clone(),
            source,
        })?;

        let mut index = Index::default();
        for key in meta.list_keys()? {
            if let Some(record) = meta.read::<QueuedMessage>(&key)? {
                index
                    .entries
                    .insert(record.queue_id.clone(), (record.status, record.next_retry_at));
            }
        }

        Ok(Self {
            meta,
            bodies_dir,
            index: tokio::sync::RwLock::new(index),
            lease_ttl,
        })
    }

    fn body_path(&self, queue_id: &str) -> std::path::PathBuf {
        self.bodies_dir.join(format!("{queue_id}.eml"))
    }

    fn write_record(&self, record: &QueuedMessage) -> Result<(), StoreError> {
        self.write_body(&record.queue_id, &record.envelope.message_data)?;

        let mut stripped = record.clone();
        stripped.envelope.message_data = Vec::new();
        self.meta.write(&record.queue_id, &stripped)
    }

    fn write_body(&self, queue_id: &str, bytes: &[u8]) -> Result<(), StoreError> {
        if bytes.is_empty() {
            return Ok(());
        }
        let path = self.body_path(queue_id);
        std::fs::write(&path, bytes).map_err(|source| StoreError::Io { path, source })
    }

    fn read_record(&self, queue_id: &str) -> Result<Option<QueuedMessage>, StoreError> {
        let Some(mut record) = self.meta.read::<QueuedMessage>(queue_id)? else {
            return Ok(None);
        };
        let body_path = self.body_path(queue_id);
        if let Ok(bytes) = std::fs::read(&body_path) {
            record.envelope.message_data = bytes;
        }
        Ok(Some(record))
    }

    pub async fn enqueue(&self, envelope: Envelope) -> Result<QueuedMessage, StoreError> {
        self.enqueue_with_id(uuid::Uuid::new_v4().to_string(), envelope).await
    }

    /// Same as [`Self::enqueue`], but with a caller-supplied `queue_id`.
    /// Lets the receiver mint the id before the message body is built, so
    /// the synthesized `Received:` header and the `250` reply agree on it.
    pub async fn enqueue_with_id(&self, queue_id: String, envelope: Envelope) -> Result<QueuedMessage, StoreError> {
        let now = time::OffsetDateTime::now_utc();
        let record = QueuedMessage::new(queue_id, envelope, now);

        let mut index = self.index.write().await;
        self.write_record(&record)?;
        index
            .entries
            .insert(record.queue_id.clone(), (record.status, record.next_retry_at));

        Ok(record)
    }

    pub async fn get(&self, queue_id: &str) -> Result<Option<QueuedMessage>, StoreError> {
        let _index = self.index.read().await;
        self.read_record(queue_id)
    }

    pub async fn delete(&self, queue_id: &str) -> Result<(), StoreError> {
        let mut index = self.index.write().await;
        self.meta.delete(queue_id)?;
        std::fs::remove_file(self.body_path(queue_id)).ok();
        index.entries.remove(queue_id);
        Ok(())
    }

    pub async fn list_by_status(&self, status: OverallStatus) -> Result<Vec<QueuedMessage>, StoreError> {
        let index = self.index.read().await;
        index
            .entries
            .iter()
            .filter(|(_, (s, _))| *s == status)
            .filter_map(|(id, _)| self.read_record(id).transpose())
            .collect()
    }

    /// Returns up to `limit` messages ready for an attempt, each marked
    /// with a lease under `owner` so no other worker picks it up until
    /// the lease expires or this worker reports a result.
    pub async fn get_ready_for_delivery(
        &self,
        limit: usize,
        owner: uuid::Uuid,
    ) -> Result<Vec<QueuedMessage>, StoreError> {
        let now = time::OffsetDateTime::now_utc();
        let mut index = self.index.write().await;

        let candidate_ids: Vec<String> = index
            .entries
            .iter()
            .filter(|(_, (status, next_retry_at))| {
                matches!(status, OverallStatus::Active | OverallStatus::Deferred)
                    && next_retry_at.map_or(true, |t| t <= now)
            })
            .map(|(id, _)| id.clone())
            .collect();

        // Read every ready candidate and sort oldest-created-first before
        // applying `limit`, so the cut picks the oldest mail rather than
        // an arbitrary `limit`-sized slice of ready ids.
        let mut candidates = Vec::new();
        for id in candidate_ids {
            if let Some(record) = self.read_record(&id)? {
                candidates.push(record);
            }
        }
        candidates.sort_by_key(|r| r.created_at);

        let mut records = Vec::new();
        for mut record in candidates {
            if let Some(lease) = &record.lease {
                if !lease.is_expired(now) {
                    continue;
                }
            }

            record.lease = Some(Lease {
                owner,
                expires_at: now + time::Duration::try_from(self.lease_ttl).unwrap_or(time::Duration::MINUTE),
            });
            self.write_record(&record)?;
            records.push(record);

            if records.len() >= limit {
                break;
            }
        }

        drop(index);
        Ok(records)
    }

    /// Records one delivery attempt's outcome for `recipient`, recomputes
    /// the message's overall status, and releases its lease.
    #[allow(clippy::too_many_arguments)]
    pub async fn update_delivery_status(
        &self,
        queue_id: &str,
        recipient: &Mailbox,
        smtp_code: u16,
        smtp_message: impl Into<String>,
        mx_host: Option<String>,
        max_queue_age: std::time::Duration,
    ) -> Result<(), StoreError> {
        let mut index = self.index.write().await;
        let Some(mut record) = self.read_record(queue_id)? else {
            return Err(StoreError::NotFound(queue_id.to_owned()));
        };

        let now = time::OffsetDateTime::now_utc();
        let next_state = match smtp_code / 100 {
            2 => RecipientStateKind::Delivered,
            5 => RecipientStateKind::Bounce,
            _ => RecipientStateKind::Deferred,
        };

        if let Some(state) = record.recipient_status.get_mut(recipient) {
            state.record_attempt(next_state, smtp_code, smtp_message, mx_host, now);
        }

        record.attempts += 1;
        record.lease = None;
        record.recompute_status();

        if matches!(record.status, OverallStatus::Deferred) {
            let schedule_index = usize::try_from(record.attempts.saturating_sub(1)).unwrap_or(usize::MAX);
            if schedule_index >= RETRY_SCHEDULE.len() {
                if let Some(state) = record.recipient_status.get_mut(recipient) {
                    if matches!(state.state, RecipientStateKind::Deferred) {
                        state.state = RecipientStateKind::Expired;
                    }
                }
                record.recompute_status();
                if matches!(record.status, OverallStatus::Active | OverallStatus::Deferred) {
                    record.next_retry_at = Some(now);
                } else {
                    record.next_retry_at = None;
                }
            } else {
                let base = RETRY_SCHEDULE[schedule_index];
                let jitter = 1.0 + rand_jitter();
                #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let jittered = std::time::Duration::from_secs_f64(base.as_secs_f64() * jitter);
                record.next_retry_at =
                    Some(now + time::Duration::try_from(jittered).unwrap_or(time::Duration::ZERO));
            }
        } else {
            record.next_retry_at = None;
        }

        record.expire_if_too_old(now, max_queue_age);

        self.write_record(&record)?;
        index
            .entries
            .insert(record.queue_id.clone(), (record.status, record.next_retry_at));

        Ok(())
    }

    /// Resets a message for a fresh delivery attempt: clears the retry
    /// timer and un-defers every non-terminal recipient.
    pub async fn requeue(&self, queue_id: &str) -> Result<(), StoreError> {
        let mut index = self.index.write().await;
        let Some(mut record) = self.read_record(queue_id)? else {
            return Err(StoreError::NotFound(queue_id.to_owned()));
        };

        record.next_retry_at = None;
        record.status = OverallStatus::Active;
        record.lease = None;
        for state in record.recipient_status.values_mut() {
            if matches!(
                state.state,
                RecipientStateKind::Deferred | RecipientStateKind::Bounce
            ) {
                state.state = RecipientStateKind::Pending;
            }
        }

        self.write_record(&record)?;
        index
            .entries
            .insert(record.queue_id.clone(), (record.status, record.next_retry_at));
        Ok(())
    }
}

/// `u ~ uniform(-0.2, +0.2)`, applied as a multiplicative jitter to the
/// retry schedule per §4.4.
fn rand_jitter() -> f64 {
    use rand::Rng;
    rand::thread_rng().gen_range(-0.2..=0.2)
}

#[cfg(test)]
mod tests {
    use super::QueueStore;
    use vsmtp_common::{model::envelope::SessionInfo, Envelope, OverallStatus};
    use vsmtp_protocol::{Mailbox, ReversePath};

    fn envelope() -> Envelope {
        Envelope::new(
            ReversePath::Mailbox("sender@example.com".parse().unwrap()),
            vec!["rcpt@example.com".parse::<Mailbox>().unwrap()],
            b"Subject: hi\r\n\r\nbody\r\n".to_vec(),
            SessionInfo {
                peer_addr: "127.0.0.1:4000".parse().unwrap(),
                helo_name: None,
                authenticated_user: None,
                tls_active: false,
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn enqueue_then_get_ready_then_deliver() {
        let tmp = std::env::temp_dir().join(format!("vsmtp-queue-test-{}", uuid::Uuid::new_v4()));
        let store = QueueStore::open(&tmp, std::time::Duration::from_secs(60)).unwrap();

        let queued = store.enqueue(envelope()).await.unwrap();
        assert_eq!(queued.status, OverallStatus::Active);

        let owner = uuid::Uuid::new_v4();
        let ready = store.get_ready_for_delivery(10, owner).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].envelope.message_data, queued.envelope.message_data);

        // Leased: a second worker gets nothing until it's released.
        let ready_again = store.get_ready_for_delivery(10, uuid::Uuid::new_v4()).await.unwrap();
        assert!(ready_again.is_empty());

        let recipient = queued.envelope.recipients[0].clone();
        store
            .update_delivery_status(
                &queued.queue_id,
                &recipient,
                250,
                "Ok",
                Some("mx.example.com".to_owned()),
                std::time::Duration::from_secs(5 * 24 * 60 * 60),
            )
            .await
            .unwrap();

        let after = store.get(&queued.queue_id).await.unwrap().unwrap();
        assert_eq!(after.status, OverallStatus::Delivered);
        assert!(after.lease.is_none());

        std::fs::remove_dir_all(&tmp).ok();
    }

    #[tokio::test]
    async fn deferred_schedules_retry_with_jitter() {
        let tmp = std::env::temp_dir().join(format!("vsmtp-queue-test-{}", uuid::Uuid::new_v4()));
        let store = QueueStore::open(&tmp, std::time::Duration::from_secs(60)).unwrap();

        let queued = store.enqueue(envelope()).await.unwrap();
        let recipient = queued.envelope.recipients[0].clone();
        let owner = uuid::Uuid::new_v4();
        store.get_ready_for_delivery(10, owner).await.unwrap();

        store
            .update_delivery_status(
                &queued.queue_id,
                &recipient,
                450,
                "try later",
                None,
                std::time::Duration::from_secs(5 * 24 * 60 * 60),
            )
            .await
            .unwrap();

        let after = store.get(&queued.queue_id).await.unwrap().unwrap();
        assert_eq!(after.status, OverallStatus::Deferred);
        assert!(after.next_retry_at.is_some());

        std::fs::remove_dir_all(&tmp).ok();
    }
}
