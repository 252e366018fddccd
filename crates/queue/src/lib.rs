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

//! The durable delivery queue, as seen by the rest of the system:
//! envelope validation at intake, lease-protected retrieval for workers,
//! and the status/retry bookkeeping on attempt completion.

use vsmtp_common::{Envelope, OverallStatus, QueuedMessage};
use vsmtp_protocol::Mailbox;
use vsmtp_store::{QueueStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("queued message {0:?} not found")]
    NotFound(String),
}

pub struct QueueService {
    store: std::sync::Arc<QueueStore>,
    max_queue_age: std::time::Duration,
}

impl QueueService {
    #[must_use]
    pub fn new(store: std::sync::Arc<QueueStore>, max_queue_age: std::time::Duration) -> Self {
        Self { store, max_queue_age }
    }

    /// Accepts a fully-formed envelope for relay. Recipient/body
    /// validation already happened in [`Envelope::new`]; this generates
    /// the queue id and persists the initial, all-pending state.
    pub async fn enqueue(&self, envelope: Envelope) -> Result<QueuedMessage, QueueError> {
        let queued = self.store.enqueue(envelope).await?;
        tracing::info!(queue_id = %queued.queue_id, recipients = queued.envelope.recipients.len(), "message queued");
        Ok(queued)
    }

    /// Same as [`Self::enqueue`] but with a caller-chosen `queue_id`, so a
    /// reception-side `Received:` header can name the id before the store
    /// assigns one of its own.
    pub async fn enqueue_with_id(&self, queue_id: String, envelope: Envelope) -> Result<QueuedMessage, QueueError> {
        let queued = self.store.enqueue_with_id(queue_id, envelope).await?;
        tracing::info!(queue_id = %queued.queue_id, recipients = queued.envelope.recipients.len(), "message queued");
        Ok(queued)
    }

    /// Claims up to `limit` messages ready for an attempt under `owner`'s
    /// lease; a worker must call [`Self::update_delivery_status`] for
    /// every recipient it attempts, or let the lease expire.
    pub async fn get_ready_for_delivery(
        &self,
        limit: usize,
        owner: uuid::Uuid,
    ) -> Result<Vec<QueuedMessage>, QueueError> {
        Ok(self.store.get_ready_for_delivery(limit, owner).await?)
    }

    pub async fn update_delivery_status(
        &self,
        queue_id: &str,
        recipient: &Mailbox,
        smtp_code: u16,
        smtp_message: impl Into<String>,
        mx_host: Option<String>,
    ) -> Result<(), QueueError> {
        self.store
            .update_delivery_status(queue_id, recipient, smtp_code, smtp_message, mx_host, self.max_queue_age)
            .await?;
        Ok(())
    }

    pub async fn requeue(&self, queue_id: &str) -> Result<(), QueueError> {
        self.store.requeue(queue_id).await?;
        Ok(())
    }

    pub async fn delete(&self, queue_id: &str) -> Result<(), QueueError> {
        self.store.delete(queue_id).await?;
        Ok(())
    }

    pub async fn get(&self, queue_id: &str) -> Result<QueuedMessage, QueueError> {
        self.store
            .get(queue_id)
            .await?
            .ok_or_else(|| QueueError::NotFound(queue_id.to_owned()))
    }

    pub async fn list_by_status(&self, status: OverallStatus) -> Result<Vec<QueuedMessage>, QueueError> {
        Ok(self.store.list_by_status(status).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::QueueService;
    use vsmtp_common::{model::envelope::SessionInfo, Envelope, OverallStatus};
    use vsmtp_protocol::{Mailbox, ReversePath};
    use vsmtp_store::QueueStore;

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
    async fn enqueue_list_and_delete() {
        let tmp = std::env::temp_dir().join(format!("vsmtp-queue-svc-test-{}", uuid::Uuid::new_v4()));
        let store = std::sync::Arc::new(QueueStore::open(&tmp, std::time::Duration::from_secs(60)).unwrap());
        let service = QueueService::new(store, std::time::Duration::from_secs(5 * 24 * 60 * 60));

        let queued = service.enqueue(envelope()).await.unwrap();
        let active = service.list_by_status(OverallStatus::Active).await.unwrap();
        assert_eq!(active.len(), 1);

        service.delete(&queued.queue_id).await.unwrap();
        assert!(service.get(&queued.queue_id).await.is_err());

        std::fs::remove_dir_all(&tmp).ok();
    }
}
