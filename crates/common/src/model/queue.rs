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

use crate::model::envelope::Envelope;
use vsmtp_protocol::Mailbox;

/// The retry backoff schedule: 5m, 15m, 1h, 4h, 12h, 24h, 48h. Indexed by
/// `attempts - 1`; once exhausted the last interval repeats until
/// `MAX_QUEUE_AGE` forces expiry.
pub const RETRY_SCHEDULE: &[std::time::Duration] = &[
    std::time::Duration::from_secs(5 * 60),
    std::time::Duration::from_secs(15 * 60),
    std::time::Duration::from_secs(60 * 60),
    std::time::Duration::from_secs(4 * 60 * 60),
    std::time::Duration::from_secs(12 * 60 * 60),
    std::time::Duration::from_secs(24 * 60 * 60),
    std::time::Duration::from_secs(48 * 60 * 60),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, serde::Serialize, serde::Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Active,
    Deferred,
    Delivered,
    Bounce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, serde::Serialize, serde::Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RecipientStateKind {
    Pending,
    Deferred,
    Delivered,
    Bounce,
    Expired,
}

/// Delivery progress for a single recipient of a [`QueuedMessage`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RecipientState {
    pub state: RecipientStateKind,
    pub attempts: u32,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_attempt_at: Option<time::OffsetDateTime>,
    pub smtp_code: Option<u16>,
    pub smtp_message: Option<String>,
    pub mx_host: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub delivered_at: Option<time::OffsetDateTime>,
}

impl RecipientState {
    #[must_use]
    pub fn pending() -> Self {
        Self {
            state: RecipientStateKind::Pending,
            attempts: 0,
            last_attempt_at: None,
            smtp_code: None,
            smtp_message: None,
            mx_host: None,
            delivered_at: None,
        }
    }

    /// Enforces the per-recipient invariants:
    /// `delivered ⇒ 2xx`, `bounce ⇒ 5xx`, `deferred ⇒ 4xx`.
    pub fn record_attempt(
        &mut self,
        state: RecipientStateKind,
        code: u16,
        message: impl Into<String>,
        mx_host: Option<String>,
        now: time::OffsetDateTime,
    ) {
        debug_assert!(
            match state {
                RecipientStateKind::Delivered => (200..300).contains(&code),
                RecipientStateKind::Bounce => (500..600).contains(&code),
                RecipientStateKind::Deferred => (400..500).contains(&code),
                RecipientStateKind::Pending | RecipientStateKind::Expired => true,
            },
            "reply code {code} inconsistent with recipient state {state:?}"
        );

        self.attempts += 1;
        self.last_attempt_at = Some(now);
        self.smtp_code = Some(code);
        self.smtp_message = Some(message.into());
        self.mx_host = mx_host;
        self.state = state;
        if matches!(state, RecipientStateKind::Delivered) {
            self.delivered_at = Some(now);
        }
    }
}

/// A worker's temporary claim on a [`QueuedMessage`], preventing two
/// workers from attempting the same message concurrently.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Lease {
    pub owner: uuid::Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: time::OffsetDateTime,
}

impl Lease {
    #[must_use]
    pub fn is_expired(&self, now: time::OffsetDateTime) -> bool {
        now >= self.expires_at
    }
}

/// A message accepted for relay, tracked per-recipient until every
/// recipient reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct QueuedMessage {
    pub queue_id: String,
    pub envelope: Envelope,
    pub status: OverallStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: time::OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub next_retry_at: Option<time::OffsetDateTime>,
    pub attempts: u32,
    pub last_error: String,
    pub recipient_status: std::collections::BTreeMap<Mailbox, RecipientState>,
    pub lease: Option<Lease>,
}

impl QueuedMessage {
    #[must_use]
    pub fn new(queue_id: String, envelope: Envelope, now: time::OffsetDateTime) -> Self {
        let recipient_status = envelope
            .recipients
            .iter()
            .cloned()
            .map(|r| (r, RecipientState::pending()))
            .collect();

        Self {
            queue_id,
            envelope,
            status: OverallStatus::Active,
            created_at: now,
            next_retry_at: None,
            attempts: 0,
            last_error: String::new(),
            recipient_status,
            lease: None,
        }
    }

    /// Recomputes `status` from `recipient_status`, enforcing the
    /// overall-status invariant: delivered iff every recipient is
    /// delivered; bounce iff none are pending/deferred and at least one
    /// bounced; otherwise active/deferred while work remains.
    pub fn recompute_status(&mut self) {
        let mut any_pending_or_deferred = false;
        let mut any_bounce = false;
        let mut all_delivered = true;

        for state in self.recipient_status.values() {
            match state.state {
                RecipientStateKind::Pending | RecipientStateKind::Deferred => {
                    any_pending_or_deferred = true;
                    all_delivered = false;
                }
                RecipientStateKind::Bounce | RecipientStateKind::Expired => {
                    any_bounce = true;
                    all_delivered = false;
                }
                RecipientStateKind::Delivered => {}
            }
        }

        self.status = if all_delivered {
            OverallStatus::Delivered
        } else if !any_pending_or_deferred && any_bounce {
            OverallStatus::Bounce
        } else if any_pending_or_deferred {
            OverallStatus::Deferred
        } else {
            OverallStatus::Active
        };
    }

    /// Forces every still-pending/deferred recipient to `expired` once the
    /// message has outlived `max_age`, per the Overall-status invariant.
    pub fn expire_if_too_old(&mut self, now: time::OffsetDateTime, max_age: std::time::Duration) {
        let max_age = time::Duration::try_from(max_age).unwrap_or(time::Duration::MAX);
        if (now - self.created_at) <= max_age {
            return;
        }

        for state in self.recipient_status.values_mut() {
            if matches!(
                state.state,
                RecipientStateKind::Pending | RecipientStateKind::Deferred
            ) {
                state.state = RecipientStateKind::Expired;
                state.last_attempt_at = Some(now);
            }
        }
        self.recompute_status();
    }
}
