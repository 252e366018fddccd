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

//! File-backed persistence for the mail queue, SASL accounts, and policy
//! rules. Every store is one directory of one-JSON-file-per-record,
//! written atomically; see [`file_store::JsonFileStore`] for the shared
//! primitive they're all built on.

mod error;
mod file_store;
mod policy_store;
mod queue_store;
mod user_store;

pub use error::StoreError;
pub use file_store::JsonFileStore;
pub use policy_store::PolicyStore;
pub use queue_store::QueueStore;
pub use user_store::UserStore;
