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

use crate::StoreError;

/// One directory, one JSON file per record, keyed by an arbitrary string
/// id. Writes go through a temp-file-then-rename so a crash mid-write
/// never leaves a half-written record behind.
pub struct JsonFileStore {
    dir: std::path::PathBuf,
}

impl JsonFileStore {
    pub fn open(dir: impl Into<std::path::PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> std::path::PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    pub fn read<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let path = self.path_for(key);
        match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|source| StoreError::Corrupt { path, source }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    pub fn write<T: serde::Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let path = self.path_for(key);
        let tmp = self.dir.join(format!("{key}.json.tmp"));

        let bytes = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Corrupt {
            path: path.clone(),
            source,
        })?;
        std::fs::write(&tmp, bytes).map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, &path).map_err(|source| StoreError::Io { path, source })
    }

    pub fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key);
        match std::fs::remove_file(&path) {
            Ok(()) | Err(_) if !path.exists() => Ok(()),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    pub fn list_keys(&self) -> Result<Vec<String>, StoreError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if let Some(key) = name.strip_suffix(".json") {
                keys.push(key.to_owned());
            }
        }
        Ok(keys)
    }

    pub fn list<T: serde::de::DeserializeOwned>(&self) -> Result<Vec<T>, StoreError> {
        self.list_keys()?
            .iter()
            .filter_map(|key| self.read(key).transpose())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::JsonFileStore;

    #[test]
    fn write_read_delete_roundtrip() {
        let tmp = std::env::temp_dir().join(format!("vsmtp-store-test-{}", uuid::Uuid::new_v4()));
        let store = JsonFileStore::open(&tmp).unwrap();

        assert_eq!(store.read::<String>("a").unwrap(), None);

        store.write("a", &"hello".to_owned()).unwrap();
        assert_eq!(store.read::<String>("a").unwrap(), Some("hello".to_owned()));

        store.delete("a").unwrap();
        assert_eq!(store.read::<String>("a").unwrap(), None);

        std::fs::remove_dir_all(&tmp).ok();
    }

    #[test]
    fn list_returns_every_record() {
        let tmp = std::env::temp_dir().join(format!("vsmtp-store-test-{}", uuid::Uuid::new_v4()));
        let store = JsonFileStore::open(&tmp).unwrap();

        store.write("a", &1_i32).unwrap();
        store.write("b", &2_i32).unwrap();

        let mut values = store.list::<i32>().unwrap();
        values.sort_unstable();
        assert_eq!(values, vec![1, 2]);

        std::fs::remove_dir_all(&tmp).ok();
    }
}
