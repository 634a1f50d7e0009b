//! On-disk copy of the last fetched treatments, used to become ready before the first fetch
//! completes.
use std::{
    fs,
    io::ErrorKind,
    path::PathBuf,
};

use serde::{Deserialize, Serialize};

use super::store::Treatments;
use crate::{Key, Result};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CachedTreatments {
    key: Key,
    #[serde(flatten)]
    treatments: Treatments,
}

/// Treatments cache stored as JSON at a fixed path.
///
/// Treatments are computed per key, so the cache also remembers the key they were computed for. A
/// session started with the same cache path reuses that key (see [`TreatmentsCache::stored_key`]),
/// and entries written for any other key are ignored.
#[derive(Debug, Clone)]
pub struct TreatmentsCache {
    path: PathBuf,
}

impl TreatmentsCache {
    pub fn new(path: impl Into<PathBuf>) -> TreatmentsCache {
        TreatmentsCache { path: path.into() }
    }

    /// Key of the session that last wrote the cache, if any.
    pub fn stored_key(&self) -> Result<Option<Key>> {
        Ok(self.read()?.map(|cached| cached.key))
    }

    /// Load cached treatments for `key`. Returns `Ok(None)` if there is no cache or it belongs to
    /// another key.
    pub fn load(&self, key: &Key) -> Result<Option<Treatments>> {
        let Some(cached) = self.read()? else {
            return Ok(None);
        };
        if &cached.key != key {
            log::debug!(target: "flagwatch", path:display = self.path.display(); "ignoring treatments cached for another key");
            return Ok(None);
        }
        Ok(Some(cached.treatments))
    }

    fn read(&self) -> Result<Option<CachedTreatments>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Replace the cache atomically.
    pub fn save(&self, key: &Key, treatments: &Treatments) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_vec(&CachedTreatments {
            key: key.clone(),
            treatments: treatments.clone(),
        })?;

        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::TreatmentsCache;
    use crate::{http::store::Treatments, Error, Key};

    fn treatments() -> Treatments {
        Treatments {
            change_number: 3,
            treatments: HashMap::from([("track_workouts".to_owned(), "on".to_owned())]),
        }
    }

    #[test]
    fn missing_file_is_empty_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TreatmentsCache::new(dir.path().join("treatments.json"));

        assert_eq!(cache.load(&Key::new("k")).unwrap(), None);
        assert_eq!(cache.stored_key().unwrap(), None);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TreatmentsCache::new(dir.path().join("nested/treatments.json"));
        let key = Key::new("k");

        cache.save(&key, &treatments()).unwrap();

        assert_eq!(cache.load(&key).unwrap(), Some(treatments()));
    }

    #[test]
    fn ignores_cache_of_another_key() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TreatmentsCache::new(dir.path().join("treatments.json"));

        cache.save(&Key::new("a"), &treatments()).unwrap();

        assert_eq!(cache.load(&Key::new("b")).unwrap(), None);
        assert_eq!(cache.stored_key().unwrap(), Some(Key::new("a")));
    }

    #[test]
    fn corrupted_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("treatments.json");
        std::fs::write(&path, b"{not json").unwrap();

        let result = TreatmentsCache::new(path).load(&Key::new("k"));
        assert!(matches!(result, Err(Error::Cache(_))));
    }
}
