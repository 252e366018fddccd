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

//! `vsmtp-mta`: the SMTP reception service plus its delivery worker pool.

use std::sync::Arc;

use clap::Parser;
use vsmtp_auth::AuthService;
use vsmtp_config::{Args, Config};
use vsmtp_delivery::{DeliveryConfig, DeliveryService, DeliveryWorkerPool};
use vsmtp_policy::PolicyService;
use vsmtp_queue::QueueService;
use vsmtp_receiver::{build_tls_acceptor, server, Services};
use vsmtp_store::{PolicyStore, QueueStore, UserStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = Config::from_file(&args.config)?;
    vsmtp_common::telemetry::init(&config.log, "vsmtp-mta");

    let config = Arc::new(config);

    let queue_store = Arc::new(QueueStore::open(
        config.store_dir.join("queue"),
        config.queue_lease_ttl,
    )?);
    let user_store = Arc::new(UserStore::open(config.store_dir.join("users"))?);
    let policy_store = Arc::new(PolicyStore::open(config.store_dir.join("policy"))?);

    let auth = Arc::new(AuthService::new(
        user_store,
        config.max_auth_failures,
        config.lockout_duration,
    ));
    let policy = Arc::new(PolicyService::new(
        policy_store,
        config.greylist_min_delay,
        config.greylist_max_age,
    ));
    let queue = Arc::new(QueueService::new(queue_store, config.max_queue_age));

    let tls_acceptor = build_tls_acceptor(config.tls_cert_path.as_deref(), config.tls_key_path.as_deref())?;

    let delivery_config = DeliveryConfig {
        hostname: config.hostname.clone(),
        max_connections_per_domain: config.max_connections_per_domain,
        mx_fallback_to_a: config.mx_fallback_to_a,
        smtp_connect_timeout: config.smtp_connect_timeout,
        smtp_data_timeout: config.smtp_data_timeout,
        delivery_workers: config.delivery_workers,
        delivery_interval: config.delivery_interval,
    };
    let delivery_service = Arc::new(DeliveryService::new(delivery_config));
    let worker_pool = DeliveryWorkerPool::new(
        queue.clone(),
        delivery_service,
        config.delivery_workers,
        config.delivery_interval,
    );
    let worker_handles = worker_pool.spawn();

    let services = Arc::new(Services {
        auth,
        policy,
        queue,
        tls_acceptor,
    });

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

    let relay = tokio::spawn(server::listen(
        config.relay_bind,
        false,
        config.clone(),
        services.clone(),
        shutdown_tx.subscribe(),
    ));
    let submission = tokio::spawn(server::listen(
        config.submission_bind,
        true,
        config.clone(),
        services,
        shutdown_tx.subscribe(),
    ));

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    let _ = shutdown_tx.send(());
    worker_pool.stop();

    let _ = relay.await;
    let _ = submission.await;
    for handle in worker_handles {
        let _ = handle.await;
    }

    Ok(())
}
