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

//! The SMTP/ESMTP reception side: [`session::SmtpSession`] drives one
//! connection through the protocol state machine; [`server`] owns the
//! relay and submission listeners that spawn sessions and the
//! `tokio::sync::broadcast` shutdown signal they watch.

pub mod server;
pub mod session;

use std::sync::Arc;

use vsmtp_auth::AuthService;
use vsmtp_policy::PolicyService;
use vsmtp_protocol::tokio_rustls;
use vsmtp_queue::QueueService;

/// The services every [`session::SmtpSession`] needs, built once at
/// startup and shared across every connection via `Arc`.
pub struct Services {
    pub auth: Arc<AuthService>,
    pub policy: Arc<PolicyService>,
    pub queue: Arc<QueueService>,
    pub tls_acceptor: Option<tokio_rustls::TlsAcceptor>,
}

/// Builds the server-side TLS acceptor from `Config`'s certificate/key
/// paths, if both are configured.
pub fn build_tls_acceptor(
    tls_cert_path: Option<&std::path::Path>,
    tls_key_path: Option<&std::path::Path>,
) -> Result<Option<tokio_rustls::TlsAcceptor>, vsmtp_common::tls::error::Error> {
    let (Some(cert_path), Some(key_path)) = (tls_cert_path, tls_key_path) else {
        return Ok(None);
    };

    let secret = vsmtp_common::tls::secret::Secret {
        certificate: vsmtp_common::tls::secret::SecretFile {
            inner: vsmtp_common::tls::secret::tls_certificate_from_path(&cert_path.display().to_string())?,
            path: cert_path.to_owned(),
        },
        private_key: vsmtp_common::tls::secret::SecretFile {
            inner: vsmtp_common::tls::secret::tls_private_key_from_path(&key_path.display().to_string())?,
            path: key_path.to_owned(),
        },
    };

    let server_config = vsmtp_common::tls::server_config(&secret)?;
    Ok(Some(tokio_rustls::TlsAcceptor::from(Arc::new(server_config))))
}
