//! In-memory treatments for the session key.
use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use serde::{Deserialize, Serialize};

/// Treatments precomputed by the server for one key.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Treatments {
    /// Monotonic version of the definitions these treatments were computed from.
    #[serde(default)]
    pub change_number: i64,
    pub treatments: HashMap<String, String>,
}

impl Treatments {
    pub fn get(&self, flag_name: &str) -> Option<&str> {
        self.treatments.get(flag_name).map(String::as_str)
    }
}

/// Latest treatments, shared between the poller thread and evaluation.
///
/// Snapshots are immutable and swapped whole, so a reader never sees a half-written update and a
/// poisoned lock still holds a consistent snapshot.
#[derive(Debug, Default)]
pub struct TreatmentStore {
    treatments: RwLock<Option<Arc<Treatments>>>,
}

impl TreatmentStore {
    pub fn new() -> Self {
        TreatmentStore::default()
    }

    /// Currently active snapshot, or `None` if nothing has been loaded yet.
    pub fn get_treatments(&self) -> Option<Arc<Treatments>> {
        self.treatments
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Set new treatments, returning the previous snapshot.
    pub fn set_treatments(&self, treatments: Treatments) -> Option<Arc<Treatments>> {
        let snapshot = Arc::new(treatments);
        self.treatments
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{TreatmentStore, Treatments};

    #[test]
    fn can_set_treatments_from_another_thread() {
        let store = Arc::new(TreatmentStore::new());
        assert!(store.get_treatments().is_none());

        {
            let store = store.clone();
            let _ = std::thread::spawn(move || {
                store.set_treatments(Treatments::default());
            })
            .join();
        }

        assert!(store.get_treatments().is_some());
    }

    #[test]
    fn set_returns_previous_snapshot() {
        let store = TreatmentStore::new();
        store.set_treatments(Treatments {
            change_number: 1,
            ..Default::default()
        });

        let previous = store.set_treatments(Treatments {
            change_number: 2,
            ..Default::default()
        });

        assert_eq!(previous.unwrap().change_number, 1);
        assert_eq!(store.get_treatments().unwrap().change_number, 2);
    }

    #[test]
    fn parses_server_response() {
        let treatments: Treatments = serde_json::from_str(
            r#"{"changeNumber": 7, "treatments": {"track_workouts": "on"}}"#,
        )
        .unwrap();

        assert_eq!(treatments.change_number, 7);
        assert_eq!(treatments.get("track_workouts"), Some("on"));
        assert_eq!(treatments.get("other"), None);
    }
}
