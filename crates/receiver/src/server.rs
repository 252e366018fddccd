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

//! The relay and submission listeners: one `TcpListener::accept()` loop
//! each, spawning one task per connection and stopping cooperatively on
//! a `tokio::sync::broadcast` shutdown signal.

use std::net::SocketAddr;
use std::sync::Arc;

use vsmtp_config::Config;

use crate::session::{self, SmtpSession};
use crate::Services;

/// Accepts connections on `bind_addr` until `shutdown` fires, spawning
/// one task per connection. `is_submission` selects the submission
/// (587, `AUTH`/TLS enforced per `Config`) or relay (25) listener
/// behavior.
pub async fn listen(
    bind_addr: SocketAddr,
    is_submission: bool,
    config: Arc<Config>,
    services: Arc<Services>,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    let listener_name = if is_submission { "submission" } else { "relay" };
    tracing::info!(%bind_addr, listener = listener_name, "listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer_addr) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!(listener = listener_name, error = %e, "accept failed");
                        continue;
                    }
                };
                let config = config.clone();
                let services = services.clone();
                let mut connection_shutdown = shutdown.resubscribe();
                tokio::spawn(async move {
                    let mut smtp_session = SmtpSession::new(peer_addr, is_submission);
                    tracing::info!(session_id = %smtp_session.session_id, %peer_addr, is_submission, "connection accepted");
                    tokio::select! {
                        () = session::run(stream, &mut smtp_session, &config, &services) => {}
                        _ = connection_shutdown.recv() => {
                            tracing::info!(session_id = %smtp_session.session_id, "connection dropped for shutdown");
                        }
                    }
                });
            }
            _ = shutdown.recv() => {
                tracing::info!(listener = listener_name, "shutting down listener");
                return Ok(());
            }
        }
    }
}
