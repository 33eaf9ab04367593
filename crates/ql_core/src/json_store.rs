//! Typed JSON documents on disk.
//!
//! A [`JsonStore`] owns one document path plus an ordered
//! list of legacy paths that older launcher versions used.
//!
//! Reading never fails because of *content*: a missing file is an
//! empty document, and a document with a broken field only loses
//! that field (see [`JsonSchema::decode_lenient`]). Only real
//! I/O errors (permissions, etc.) are returned.
//!
//! Writing validates the document first and replaces the file
//! atomically (see [`write_atomic`]).

use std::{
    marker::PhantomData,
    path::{Path, PathBuf},
};

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

use crate::{
    err,
    file_utils::{read_or_empty, with_suffix, write_atomic},
    info, IntoJsonError, JsonFileError,
};

/// A document that can be stored by [`JsonStore`].
pub trait JsonSchema: Serialize + DeserializeOwned + Default {
    /// Checked before every write. Return a description of the
    /// first broken invariant, if any.
    ///
    /// # Errors
    /// If the document is in a state that shouldn't be saved.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }

    /// Called when strict decoding failed. Implementations should pull
    /// each field out separately (see [`take_field`]) so that one
    /// corrupt field doesn't throw away the rest of the document.
    fn decode_lenient(value: Value) -> Self {
        serde_json::from_value(value).unwrap_or_default()
    }

    /// Repairs cross-field invariants after loading.
    fn normalize(&mut self) {}
}

/// Removes `key` from `object` and decodes it,
/// falling back to the default (with an error log) if it's broken.
pub fn take_field<T: DeserializeOwned + Default>(object: &mut Map<String, Value>, key: &str) -> T {
    match object.remove(key) {
        None | Some(Value::Null) => T::default(),
        Some(value) => match serde_json::from_value(value) {
            Ok(n) => n,
            Err(error) => {
                err!("Field {key:?} is corrupted, resetting it: {error}");
                T::default()
            }
        },
    }
}

/// A typed JSON document at a fixed path.
#[derive(Debug, Clone)]
pub struct JsonStore<T> {
    path: PathBuf,
    legacy_paths: Vec<PathBuf>,
    _doc: PhantomData<fn() -> T>,
}

impl<T: JsonSchema> JsonStore<T> {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            legacy_paths: Vec::new(),
            _doc: PhantomData,
        }
    }

    /// Paths to migrate from, in order of preference,
    /// if the document doesn't exist yet.
    #[must_use]
    pub fn with_legacy_paths(mut self, paths: impl IntoIterator<Item = PathBuf>) -> Self {
        self.legacy_paths = paths.into_iter().collect();
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the document, migrating from a legacy path first if needed.
    ///
    /// # Errors
    /// Only if the file exists but couldn't be read.
    pub async fn read(&self) -> Result<T, JsonFileError> {
        self.migrate_legacy().await;

        let bytes = read_or_empty(&self.path).await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(T::default());
        }

        let mut doc = match serde_json::from_slice::<T>(&bytes) {
            Ok(doc) => doc,
            Err(error) => {
                err!(
                    "Document {:?} is corrupted, recovering what's readable: {error}",
                    self.path
                );
                let backup = with_suffix(&self.path, ".bak");
                _ = tokio::fs::write(&backup, &bytes).await;

                match serde_json::from_slice::<Value>(&bytes) {
                    Ok(value) => T::decode_lenient(value),
                    Err(_) => T::default(),
                }
            }
        };
        doc.normalize();
        Ok(doc)
    }

    /// Validates and atomically writes the document.
    ///
    /// # Errors
    /// - if validation fails (nothing is written)
    /// - if serialization or the write fails
    pub async fn write(&self, doc: &T) -> Result<(), JsonFileError> {
        doc.validate().map_err(JsonFileError::Invalid)?;
        let json = serde_json::to_string_pretty(doc).json_to()?;
        write_atomic(&self.path, json.as_bytes()).await?;
        Ok(())
    }

    /// Copies the first existing legacy file to the primary path,
    /// if the primary path doesn't exist. Legacy files are left in place.
    async fn migrate_legacy(&self) {
        if tokio::fs::try_exists(&self.path).await.unwrap_or(true) {
            return;
        }
        for legacy in &self.legacy_paths {
            if !tokio::fs::try_exists(legacy).await.unwrap_or(false) {
                continue;
            }
            if let Some(parent) = self.path.parent() {
                _ = tokio::fs::create_dir_all(parent).await;
            }
            match tokio::fs::copy(legacy, &self.path).await {
                Ok(_) => {
                    info!("Migrated {legacy:?} to {:?}", self.path);
                    return;
                }
                Err(error) => {
                    err!("Couldn't migrate {legacy:?} to {:?}: {error}", self.path);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Serialize, Deserialize, Default, Debug, PartialEq)]
    struct Doc {
        name: String,
        count: u32,
        tags: Vec<String>,
    }

    impl JsonSchema for Doc {
        fn validate(&self) -> Result<(), String> {
            if self.count > 100 {
                return Err("count too large".to_owned());
            }
            Ok(())
        }

        fn decode_lenient(value: Value) -> Self {
            let Value::Object(mut object) = value else {
                return Self::default();
            };
            Self {
                name: take_field(&mut object, "name"),
                count: take_field(&mut object, "count"),
                tags: take_field(&mut object, "tags"),
            }
        }
    }

    fn doc() -> Doc {
        Doc {
            name: "steve".to_owned(),
            count: 3,
            tags: vec!["a".to_owned()],
        }
    }

    #[tokio::test]
    async fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::<Doc>::new(dir.path().join("doc.json"));
        store.write(&doc()).await.unwrap();
        assert_eq!(store.read().await.unwrap(), doc());
    }

    #[tokio::test]
    async fn invalid_document_is_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::<Doc>::new(dir.path().join("doc.json"));
        let mut bad = doc();
        bad.count = 1000;
        assert!(matches!(
            store.write(&bad).await,
            Err(JsonFileError::Invalid(_))
        ));
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::<Doc>::new(dir.path().join("doc.json"));
        assert_eq!(store.read().await.unwrap(), Doc::default());
    }

    #[tokio::test]
    async fn corrupt_field_keeps_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        tokio::fs::write(&path, r#"{"name": "alex", "count": "many", "tags": ["x"]}"#)
            .await
            .unwrap();

        let store = JsonStore::<Doc>::new(&path);
        let doc = store.read().await.unwrap();
        assert_eq!(doc.name, "alex");
        assert_eq!(doc.count, 0);
        assert_eq!(doc.tags, vec!["x".to_owned()]);
        assert!(with_suffix(&path, ".bak").exists());
    }

    #[tokio::test]
    async fn legacy_migration_runs_once() {
        let dir = tempfile::tempdir().unwrap();
        let legacy = dir.path().join("old.json");
        let missing = dir.path().join("older.json");
        tokio::fs::write(&legacy, serde_json::to_string(&doc()).unwrap())
            .await
            .unwrap();

        let store = JsonStore::<Doc>::new(dir.path().join("new").join("doc.json"))
            .with_legacy_paths([missing, legacy.clone()]);

        assert_eq!(store.read().await.unwrap(), doc());
        assert!(store.path().exists());
        assert!(legacy.exists());

        // Changing the legacy file must not affect the migrated copy
        tokio::fs::write(&legacy, "{}").await.unwrap();
        assert_eq!(store.read().await.unwrap(), doc());
    }
}
