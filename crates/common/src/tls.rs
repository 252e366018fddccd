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

pub mod error;
pub mod secret;

use error::Error;
use secret::Secret;
use vsmtp_protocol::rustls;

/// Build the server-side rustls configuration the receiver uses for
/// `STARTTLS` upgrades. A single certificate/key pair is served for all
/// connections; there is no per-virtual-host SNI resolution.
pub fn server_config(secret: &Secret) -> Result<rustls::ServerConfig, Error> {
    rustls::ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(
            secret.certificate.inner.clone(),
            secret.private_key.inner.clone(),
        )
        .map_err(Error::Protocol)
}

/// Build a client-side rustls configuration trusting the Mozilla root
/// set, for any future use that needs authenticated outbound TLS.
#[must_use]
pub fn client_config() -> rustls::ClientConfig {
    let mut roots = rustls::RootCertStore::empty();
    roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
        rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(
            ta.subject,
            ta.spki,
            ta.name_constraints,
        )
    }));

    rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth()
}

/// Accepts any certificate chain the remote presents. Outbound
/// `STARTTLS` during relay is opportunistic: its purpose is defeating
/// passive eavesdropping, not authenticating the remote MX, so a
/// self-signed or hostname-mismatched certificate must not abort the
/// handshake.
struct AcceptAnyCertificate;

impl rustls::client::ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::Certificate,
        _intermediates: &[rustls::Certificate],
        _server_name: &rustls::ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> Result<rustls::client::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::ServerCertVerified::assertion())
    }
}

/// Build the client-side rustls configuration the delivery service uses
/// for opportunistic outbound `STARTTLS`: encrypts the connection but
/// performs no certificate validation.
#[must_use]
pub fn opportunistic_client_config() -> rustls::ClientConfig {
    rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_custom_certificate_verifier(std::sync::Arc::new(AcceptAnyCertificate))
        .with_no_client_auth()
}
