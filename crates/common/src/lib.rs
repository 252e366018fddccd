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

//! Data model and ambient infrastructure (TLS, telemetry, cross-cutting
//! errors) shared by every `vsmtp-*` crate.

pub mod model;
pub mod telemetry;
pub mod tls;
pub mod transfer_error;

pub use model::{
    Envelope, EnvelopeError, GreylistEntry, Lease, OverallStatus, PolicyRule, QueuedMessage,
    RateBucket, RecipientState, RecipientStateKind, RuleAction, RuleType, SessionInfo, User,
};

#[derive(Debug, thiserror::Error)]
pub enum DeserializeError {
    #[error("deserialize error: {0}")]
    Error(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    #[error("serialize error: {0}")]
    Error(#[from] serde_json::Error),
}
