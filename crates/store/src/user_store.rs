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

use crate::{file_store::JsonFileStore, StoreError};
use vsmtp_common::User;

/// One JSON file per account, keyed by username.
pub struct UserStore {
    files: JsonFileStore,
    lock: tokio::sync::RwLock<()>,
}

impl UserStore {
    pub fn open(dir: impl Into<std::path::PathBuf>) -> Result<Self, StoreError> {
        Ok(Self {
            files: JsonFileStore::open(dir)?,
            lock: tokio::sync::RwLock::new(()),
        })
    }

    pub async fn get(&self, username: &str) -> Result<Option<User>, StoreError> {
        let _guard = self.lock.read().await;
        self.files.read(username)
    }

    pub async fn put(&self, user: &User) -> Result<(), StoreError> {
        let _guard = self.lock.write().await;
        self.files.write(&user.username, user)
    }

    pub async fn delete(&self, username: &str) -> Result<(), StoreError> {
        let _guard = self.lock.write().await;
        self.files.delete(username)
    }

    pub async fn list(&self) -> Result<Vec<User>, StoreError> {
        let _guard = self.lock.read().await;
        self.files.list()
    }
}

#[cfg(test)]
mod tests {
    use super::UserStore;
    use vsmtp_common::User;

    #[tokio::test]
    async fn put_get_delete_roundtrip() {
        let tmp = std::env::temp_dir().join(format!("vsmtp-user-test-{}", uuid::Uuid::new_v4()));
        let store = UserStore::open(&tmp).unwrap();

        let user = User::new("alice".to_owned(), "$argon2id$...".to_owned(), 100);
        store.put(&user).await.unwrap();

        let fetched = store.get("alice").await.unwrap().unwrap();
        assert_eq!(fetched.username, "alice");
        assert_eq!(fetched.rate_limit, 100);

        store.delete("alice").await.unwrap();
        assert!(store.get("alice").await.unwrap().is_none());

        std::fs::remove_dir_all(&tmp).ok();
    }
}
