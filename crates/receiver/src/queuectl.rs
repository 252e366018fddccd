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

//! `vsmtp-queuectl`: an operator CLI over the same durable queue and
//! user store `vsmtp-mta` uses, for inspecting and unsticking deliveries
//! and managing SASL accounts without touching the store files directly.

use clap::{Parser, Subcommand};
use vsmtp_auth::AuthService;
use vsmtp_common::OverallStatus;
use vsmtp_config::{Args, Config};
use vsmtp_policy::PolicyService;
use vsmtp_queue::QueueService;
use vsmtp_store::{PolicyStore, QueueStore, UserStore};

#[derive(Parser)]
#[command(name = "vsmtp-queuectl", author, version, about)]
struct Cli {
    #[command(flatten)]
    args: Args,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List queued messages, optionally filtered by status.
    List {
        /// One of active, deferred, delivered, bounce.
        #[arg(long)]
        status: Option<StatusArg>,
    },
    /// Show the full record for one queued message.
    Get {
        queue_id: String,
    },
    /// Clear a message's lease and retry timer so the next delivery
    /// sweep picks it up immediately.
    Retry {
        queue_id: String,
    },
    /// Permanently remove a queued message and its body.
    Delete {
        queue_id: String,
    },
    /// Create a new SASL user.
    UserAdd {
        username: String,
        password: String,
        #[arg(long, default_value_t = 100)]
        rate_limit: u32,
    },
    /// List all SASL users.
    UserList,
    /// Remove a SASL user.
    UserDelete {
        username: String,
    },
    /// Enable or disable a SASL user without deleting it.
    UserSetEnabled {
        username: String,
        #[arg(long)]
        enabled: bool,
    },
    /// Change a user's per-identity rate limit.
    UserSetRateLimit {
        username: String,
        rate_limit: u32,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum StatusArg {
    Active,
    Deferred,
    Delivered,
    Bounce,
}

impl From<StatusArg> for OverallStatus {
    fn from(value: StatusArg) -> Self {
        match value {
            StatusArg::Active => Self::Active,
            StatusArg::Deferred => Self::Deferred,
            StatusArg::Delivered => Self::Delivered,
            StatusArg::Bounce => Self::Bounce,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = Config::from_file(&cli.args.config)?;
    vsmtp_common::telemetry::init(&config.log, "vsmtp-queuectl");

    let queue_store = std::sync::Arc::new(QueueStore::open(
        config.store_dir.join("queue"),
        config.queue_lease_ttl,
    )?);
    let user_store = std::sync::Arc::new(UserStore::open(config.store_dir.join("users"))?);
    let policy_store = std::sync::Arc::new(PolicyStore::open(config.store_dir.join("policy"))?);

    let queue = QueueService::new(queue_store, config.max_queue_age);
    let auth = AuthService::new(user_store, config.max_auth_failures, config.lockout_duration);
    // Opened so the store directory is validated even though no
    // subcommand below touches greylist/blacklist entries directly.
    let _policy = PolicyService::new(policy_store, config.greylist_min_delay, config.greylist_max_age);

    match cli.command {
        Command::List { status } => {
            let messages = match status {
                Some(status) => queue.list_by_status(status.into()).await?,
                None => {
                    let mut all = Vec::new();
                    for status in [
                        OverallStatus::Active,
                        OverallStatus::Deferred,
                        OverallStatus::Delivered,
                        OverallStatus::Bounce,
                    ] {
                        all.extend(queue.list_by_status(status).await?);
                    }
                    all
                }
            };

            if messages.is_empty() {
                println!("no queued messages");
            } else {
                println!("{:<38} {:<10} {:<8} {:<20}", "queue id", "status", "attempts", "recipients");
                for message in &messages {
                    println!(
                        "{:<38} {:<10} {:<8} {}",
                        message.queue_id,
                        message.status,
                        message.attempts,
                        message.envelope.recipients.len()
                    );
                }
                println!("\n{} message(s)", messages.len());
            }
        }
        Command::Get { queue_id } => {
            let message = queue.get(&queue_id).await?;
            println!("queue id:   {}", message.queue_id);
            println!("status:     {}", message.status);
            println!("from:       {}", message.envelope.sender);
            println!("created at: {}", message.created_at);
            println!("attempts:   {}", message.attempts);
            if !message.last_error.is_empty() {
                println!("last error: {}", message.last_error);
            }
            println!("recipients:");
            for (recipient, state) in &message.recipient_status {
                println!(
                    "  {:<32} {:?} attempts={} last_code={}",
                    recipient.to_string(),
                    state.state,
                    state.attempts,
                    state.smtp_code.map_or_else(|| "-".to_owned(), |c| c.to_string())
                );
            }
        }
        Command::Retry { queue_id } => {
            queue.requeue(&queue_id).await?;
            println!("queued {queue_id} for immediate retry");
        }
        Command::Delete { queue_id } => {
            queue.delete(&queue_id).await?;
            println!("deleted {queue_id}");
        }
        Command::UserAdd {
            username,
            password,
            rate_limit,
        } => {
            auth.create_user(username.clone(), &password, rate_limit).await?;
            println!("created user {username}");
        }
        Command::UserList => {
            let users = auth.list_users().await?;
            if users.is_empty() {
                println!("no users");
            } else {
                println!("{:<24} {:<8} {:<8} {:<10}", "username", "enabled", "admin", "rate limit");
                for user in &users {
                    println!("{:<24} {:<8} {:<8} {:<10}", user.username, user.enabled, user.admin, user.rate_limit);
                }
            }
        }
        Command::UserDelete { username } => {
            if auth.delete_user(&username).await? {
                println!("deleted user {username}");
            } else {
                eprintln!("no such user: {username}");
                std::process::exit(1);
            }
        }
        Command::UserSetEnabled { username, enabled } => {
            if auth.set_enabled(&username, enabled).await? {
                println!("user {username} enabled={enabled}");
            } else {
                eprintln!("no such user: {username}");
                std::process::exit(1);
            }
        }
        Command::UserSetRateLimit { username, rate_limit } => {
            if auth.set_rate_limit(&username, rate_limit).await? {
                println!("user {username} rate_limit={rate_limit}");
            } else {
                eprintln!("no such user: {username}");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
