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

//! SASL credential storage and verification: Argon2id password hashing,
//! per-peer lockout, and the pass-through account-management operations
//! `AuthService` exposes to the admin CLI.

mod error;

pub use error::AuthError;

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use vsmtp_common::User;
use vsmtp_store::UserStore;

/// A PHC-string hash of a fixed, never-issued password. Used to run the
/// same KDF work for an unknown username as for a real one, so that
/// response latency can't reveal whether the account exists.
fn dummy_hash() -> &'static str {
    static DUMMY: std::sync::OnceLock<String> = std::sync::OnceLock::new();
    DUMMY.get_or_init(|| {
        hash_password("not-a-real-password-xyzzy").expect("hashing a constant password cannot fail")
    })
}

/// Hashes `password` with Argon2id and a fresh random salt, returning the
/// PHC-encoded string suitable for [`User::password_hash`].
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut argon2::password_hash::rand_core::OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Hash(e.to_string()))
}

fn verify_password(password: &str, phc: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(phc) else {
        return false;
    };
    Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok()
}

/// Runs the verifier against the dummy hash and discards the result; the
/// point is solely to spend the same CPU time as a real verification.
fn verify_password_against_dummy(password: &str) {
    let _ = verify_password(password, dummy_hash());
}

/// Authenticates SASL credentials, tracks per-peer failures, and
/// temporarily locks out a peer once it exceeds `max_attempts` within
/// `lockout_duration`.
pub struct AuthService {
    store: std::sync::Arc<UserStore>,
    max_attempts: u32,
    lockout_duration: time::Duration,
    failures: tokio::sync::Mutex<std::collections::HashMap<std::net::IpAddr, Vec<time::OffsetDateTime>>>,
}

impl AuthService {
    #[must_use]
    pub fn new(store: std::sync::Arc<UserStore>, max_attempts: u32, lockout_duration: std::time::Duration) -> Self {
        Self {
            store,
            max_attempts,
            lockout_duration: time::Duration::try_from(lockout_duration).unwrap_or(time::Duration::MINUTE * 15),
            failures: tokio::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// Drops failure timestamps older than `lockout_duration`; an empty
    /// resulting vector means the lockout, if any, has expired.
    fn prune(&self, failures: &mut Vec<time::OffsetDateTime>, now: time::OffsetDateTime) {
        failures.retain(|t| now - *t < self.lockout_duration);
    }

    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
        peer_ip: std::net::IpAddr,
    ) -> Result<Option<User>, AuthError> {
        let now = time::OffsetDateTime::now_utc();

        {
            let mut failures = self.failures.lock().await;
            if let Some(entries) = failures.get_mut(&peer_ip) {
                self.prune(entries, now);
                if entries.len() >= self.max_attempts as usize {
                    tracing::warn!(%peer_ip, "authentication attempt from locked-out peer");
                    return Ok(None);
                }
            }
        }

        let user = self.store.get(username).await?;
        let verified = match &user {
            Some(u) if u.enabled => verify_password(password, &u.password_hash),
            _ => {
                verify_password_against_dummy(password);
                false
            }
        };

        if !verified {
            let mut failures = self.failures.lock().await;
            let entries = failures.entry(peer_ip).or_default();
            entries.push(now);
            self.prune(entries, now);
            if entries.len() >= self.max_attempts as usize {
                tracing::warn!(%peer_ip, attempts = entries.len(), "peer locked out after repeated auth failures");
            }
            tracing::warn!(%username, %peer_ip, "authentication failed");
            return Ok(None);
        }

        let mut user = user.expect("verified=true implies a matching enabled user was found");
        user.last_login = Some(now);
        user.login_count += 1;
        self.store.put(&user).await?;

        let mut failures = self.failures.lock().await;
        failures.remove(&peer_ip);
        drop(failures);

        tracing::info!(%username, %peer_ip, "user authenticated");
        Ok(Some(user))
    }

    pub async fn create_user(&self, username: String, password: &str, rate_limit: u32) -> Result<User, AuthError> {
        let hash = hash_password(password)?;
        let user = User::new(username, hash, rate_limit);
        self.store.put(&user).await?;
        Ok(user)
    }

    pub async fn change_password(&self, username: &str, new_password: &str) -> Result<bool, AuthError> {
        let Some(mut user) = self.store.get(username).await? else {
            return Ok(false);
        };
        user.password_hash = hash_password(new_password)?;
        self.store.put(&user).await?;
        Ok(true)
    }

    pub async fn delete_user(&self, username: &str) -> Result<bool, AuthError> {
        let existed = self.store.get(username).await?.is_some();
        if existed {
            self.store.delete(username).await?;
        }
        Ok(existed)
    }

    pub async fn get_user(&self, username: &str) -> Result<Option<User>, AuthError> {
        Ok(self.store.get(username).await?)
    }

    pub async fn list_users(&self) -> Result<Vec<User>, AuthError> {
        Ok(self.store.list().await?)
    }

    pub async fn set_enabled(&self, username: &str, enabled: bool) -> Result<bool, AuthError> {
        let Some(mut user) = self.store.get(username).await? else {
            return Ok(false);
        };
        user.enabled = enabled;
        self.store.put(&user).await?;
        Ok(true)
    }

    pub async fn set_rate_limit(&self, username: &str, rate_limit: u32) -> Result<bool, AuthError> {
        let Some(mut user) = self.store.get(username).await? else {
            return Ok(false);
        };
        user.rate_limit = rate_limit;
        self.store.put(&user).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::{hash_password, verify_password, AuthService};
    use vsmtp_store::UserStore;

    #[test]
    fn hash_and_verify_roundtrip() {
        let hash = hash_password("correct horse battery staple").unwrap();
        assert!(verify_password("correct horse battery staple", &hash));
        assert!(!verify_password("wrong password", &hash));
    }

    #[tokio::test]
    async fn authenticate_locks_out_after_repeated_failures() {
        let tmp = std::env::temp_dir().join(format!("vsmtp-auth-test-{}", uuid::Uuid::new_v4()));
        let store = std::sync::Arc::new(UserStore::open(&tmp).unwrap());
        let auth = AuthService::new(store.clone(), 3, std::time::Duration::from_secs(900));

        auth.create_user("alice".to_owned(), "hunter2", 100).await.unwrap();

        let peer: std::net::IpAddr = "203.0.113.5".parse().unwrap();
        for _ in 0..3 {
            assert!(auth.authenticate("alice", "wrong", peer).await.unwrap().is_none());
        }

        // Correct password is still rejected: the peer is locked out.
        assert!(auth.authenticate("alice", "hunter2", peer).await.unwrap().is_none());

        std::fs::remove_dir_all(&tmp).ok();
    }

    #[tokio::test]
    async fn authenticate_succeeds_and_updates_login_count() {
        let tmp = std::env::temp_dir().join(format!("vsmtp-auth-test-{}", uuid::Uuid::new_v4()));
        let store = std::sync::Arc::new(UserStore::open(&tmp).unwrap());
        let auth = AuthService::new(store.clone(), 5, std::time::Duration::from_secs(900));

        auth.create_user("bob".to_owned(), "swordfish", 50).await.unwrap();
        let peer: std::net::IpAddr = "203.0.113.9".parse().unwrap();

        let user = auth.authenticate("bob", "swordfish", peer).await.unwrap().unwrap();
        assert_eq!(user.login_count, 1);
        assert!(user.last_login.is_some());

        std::fs::remove_dir_all(&tmp).ok();
    }

    #[tokio::test]
    async fn unknown_username_runs_the_same_kdf_and_fails() {
        let tmp = std::env::temp_dir().join(format!("vsmtp-auth-test-{}", uuid::Uuid::new_v4()));
        let store = std::sync::Arc::new(UserStore::open(&tmp).unwrap());
        let auth = AuthService::new(store, 5, std::time::Duration::from_secs(900));

        let peer: std::net::IpAddr = "203.0.113.1".parse().unwrap();
        assert!(auth.authenticate("nobody", "whatever", peer).await.unwrap().is_none());

        std::fs::remove_dir_all(&tmp).ok();
    }
}
