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

//! The persisted data model shared by the receiver, queue, policy, and
//! delivery services.

pub mod envelope;
pub mod policy;
pub mod queue;
pub mod user;

pub use envelope::{Envelope, EnvelopeError, SessionInfo};
pub use policy::{GreylistEntry, PolicyRule, RateBucket, RuleAction, RuleType};
pub use queue::{Lease, OverallStatus, QueuedMessage, RecipientState, RecipientStateKind};
pub use user::User;
