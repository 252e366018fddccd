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

//! MX-resolving outbound delivery: [`DeliveryService`] attempts one
//! message against the resolved hosts of each recipient domain;
//! [`DeliveryWorkerPool`] is the polling loop that feeds it from the
//! queue and reports outcomes back.

mod client;
mod mx;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::TokioAsyncResolver;
use vsmtp_common::{QueuedMessage, RecipientStateKind};
use vsmtp_protocol::{rustls, Domain, Mailbox, ReversePath};
use vsmtp_queue::QueueService;

/// The knobs [`DeliveryService`] and [`DeliveryWorkerPool`] need, lifted
/// out of `vsmtp_config::Config` by the binary at startup.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub hostname: String,
    pub max_connections_per_domain: usize,
    pub mx_fallback_to_a: bool,
    pub smtp_connect_timeout: Duration,
    pub smtp_data_timeout: Duration,
    pub delivery_workers: usize,
    pub delivery_interval: Duration,
}

/// MX resolution, per-domain fanout, SMTP client with opportunistic
/// `STARTTLS`, and reply classification.
pub struct DeliveryService {
    config: DeliveryConfig,
    resolver: TokioAsyncResolver,
    tls_config: Arc<rustls::ClientConfig>,
    domain_gates: tokio::sync::Mutex<HashMap<Domain, Arc<Semaphore>>>,
}

impl DeliveryService {
    #[must_use]
    pub fn new(config: DeliveryConfig) -> Self {
        Self {
            config,
            resolver: TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default()),
            tls_config: Arc::new(vsmtp_common::tls::opportunistic_client_config()),
            domain_gates: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    async fn gate_for(&self, domain: &Domain) -> Arc<Semaphore> {
        let mut gates = self.domain_gates.lock().await;
        gates
            .entry(domain.clone())
            .or_insert_with(|| Arc::new(Semaphore::new(self.config.max_connections_per_domain)))
            .clone()
    }

    /// Attempt delivery of every still-pending/deferred recipient of
    /// `message`, grouped by destination domain. Returns the `(code,
    /// message, mx_host)` to record for each recipient; the caller
    /// persists it via [`QueueService::update_delivery_status`].
    pub async fn deliver(&self, message: &QueuedMessage) -> HashMap<Mailbox, (u16, String, Option<String>)> {
        let mut by_domain: HashMap<Domain, Vec<Mailbox>> = HashMap::new();
        for (mailbox, state) in &message.recipient_status {
            if matches!(
                state.state,
                RecipientStateKind::Pending | RecipientStateKind::Deferred
            ) {
                by_domain.entry(mailbox.domain()).or_default().push(mailbox.clone());
            }
        }

        let mut outcomes = HashMap::new();
        for (domain, rcpts) in by_domain {
            let semaphore = self.gate_for(&domain).await;
            let permit = match semaphore.try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    tracing::warn!(%domain, "per-domain connection limit reached");
                    for rcpt in rcpts {
                        outcomes.insert(rcpt, (450, "Connection limit reached for domain".to_owned(), None));
                    }
                    continue;
                }
            };

            let domain_outcomes = self
                .deliver_to_domain(&domain, &message.envelope.sender, rcpts, &message.envelope.message_data)
                .await;
            drop(permit);
            outcomes.extend(domain_outcomes);
        }
        outcomes
    }

    async fn deliver_to_domain(
        &self,
        domain: &Domain,
        sender: &ReversePath,
        rcpts: Vec<Mailbox>,
        message_data: &[u8],
    ) -> HashMap<Mailbox, (u16, String, Option<String>)> {
        let hosts = mx::resolve_mx(&self.resolver, domain.as_str(), self.config.mx_fallback_to_a).await;

        let mut outcomes = HashMap::new();
        if hosts.is_empty() {
            for rcpt in rcpts {
                outcomes.insert(rcpt, (550, "No MX records".to_owned(), None));
            }
            return outcomes;
        }

        let mut pending = rcpts;
        let mut last_transient: HashMap<Mailbox, (u16, String, Option<String>)> = HashMap::new();

        for (_priority, host) in hosts {
            if pending.is_empty() {
                break;
            }

            let attempt = client::attempt_delivery(
                &host,
                sender,
                &pending,
                message_data,
                &self.config.hostname,
                self.config.smtp_connect_timeout,
                self.config.smtp_data_timeout,
                self.tls_config.clone(),
            )
            .await;

            for (rcpt, (code, message)) in attempt.per_recipient {
                if code / 100 == 2 || code / 100 == 5 {
                    pending.retain(|r| r != &rcpt);
                    outcomes.insert(rcpt, (code, message, Some(host.clone())));
                } else {
                    last_transient.insert(rcpt, (code, message, Some(host.clone())));
                }
            }

            if let Some((code, message)) = attempt.blanket {
                if code / 100 == 5 {
                    for rcpt in pending.drain(..) {
                        outcomes.insert(rcpt, (code, message.clone(), Some(host.clone())));
                    }
                    break;
                }
                for rcpt in &pending {
                    last_transient.insert(rcpt.clone(), (code, message.clone(), Some(host.clone())));
                }
            }
        }

        for rcpt in pending {
            let outcome = last_transient
                .remove(&rcpt)
                .unwrap_or_else(|| (450, "delivery attempt failed".to_owned(), None));
            outcomes.insert(rcpt, outcome);
        }

        outcomes
    }
}

/// Polls [`QueueService`] for ready messages and hands them to a
/// [`DeliveryService`], recording the outcome of every attempted
/// recipient. Runs until [`Self::stop`] is called.
pub struct DeliveryWorkerPool {
    queue: Arc<QueueService>,
    delivery: Arc<DeliveryService>,
    worker_count: usize,
    poll_interval: Duration,
    running: Arc<std::sync::atomic::AtomicBool>,
}

impl DeliveryWorkerPool {
    #[must_use]
    pub fn new(queue: Arc<QueueService>, delivery: Arc<DeliveryService>, worker_count: usize, poll_interval: Duration) -> Self {
        Self {
            queue,
            delivery,
            worker_count,
            poll_interval,
            running: Arc::new(std::sync::atomic::AtomicBool::new(true)),
        }
    }

    /// Spawns `worker_count` worker tasks and returns their join handles.
    /// Call [`Self::stop`] to request cooperative shutdown, then await the
    /// handles to join.
    #[must_use]
    pub fn spawn(&self) -> Vec<tokio::task::JoinHandle<()>> {
        (0..self.worker_count)
            .map(|id| {
                let queue = self.queue.clone();
                let delivery = self.delivery.clone();
                let running = self.running.clone();
                let poll_interval = self.poll_interval;
                tokio::spawn(async move { worker_loop(id, queue, delivery, running, poll_interval).await })
            })
            .collect()
    }

    pub fn stop(&self) {
        self.running.store(false, std::sync::atomic::Ordering::SeqCst);
    }
}

async fn worker_loop(
    id: usize,
    queue: Arc<QueueService>,
    delivery: Arc<DeliveryService>,
    running: Arc<std::sync::atomic::AtomicBool>,
    poll_interval: Duration,
) {
    let owner = uuid::Uuid::new_v4();
    while running.load(std::sync::atomic::Ordering::SeqCst) {
        let batch = match queue.get_ready_for_delivery(10, owner).await {
            Ok(batch) => batch,
            Err(e) => {
                tracing::warn!(worker = id, error = %e, "failed to poll the queue");
                tokio::time::sleep(poll_interval).await;
                continue;
            }
        };

        if batch.is_empty() {
            tokio::time::sleep(poll_interval).await;
            continue;
        }

        for message in batch {
            let outcomes = delivery.deliver(&message).await;
            record_outcomes(&queue, &message, outcomes).await;
        }
    }
}

async fn record_outcomes(
    queue: &QueueService,
    message: &QueuedMessage,
    outcomes: HashMap<Mailbox, (u16, String, Option<String>)>,
) {
    for (rcpt, (code, text, mx_host)) in outcomes {
        if let Err(e) = queue
            .update_delivery_status(&message.queue_id, &rcpt, code, text, mx_host)
            .await
        {
            tracing::warn!(queue_id = %message.queue_id, recipient = %rcpt, error = %e, "failed to record delivery outcome");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Arc, DeliveryConfig, DeliveryService, Domain, Duration};

    fn config() -> DeliveryConfig {
        DeliveryConfig {
            hostname: "mail.example.com".to_owned(),
            max_connections_per_domain: 2,
            mx_fallback_to_a: true,
            smtp_connect_timeout: Duration::from_secs(1),
            smtp_data_timeout: Duration::from_secs(1),
            delivery_workers: 1,
            delivery_interval: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn gate_for_reuses_the_same_semaphore_per_domain_and_honors_the_cap() {
        let service = DeliveryService::new(config());
        let a: Domain = "a.example.com".parse().unwrap();
        let b: Domain = "b.example.com".parse().unwrap();

        let gate_a1 = service.gate_for(&a).await;
        let gate_a2 = service.gate_for(&a).await;
        let gate_b = service.gate_for(&b).await;

        assert!(Arc::ptr_eq(&gate_a1, &gate_a2));
        assert!(!Arc::ptr_eq(&gate_a1, &gate_b));
        assert_eq!(gate_a1.available_permits(), 2);
    }
}
