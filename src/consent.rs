//! User consent for sending impressions and events.
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::FlagClient;

/// Whether the user agreed to have impressions and events sent to the backend.
///
/// Starts as `Unknown` unless configured otherwise. Once the user decides, the state moves between
/// `Granted` and `Denied` and never goes back to `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsentState {
    /// No decision yet. Data is buffered but not sent.
    #[default]
    Unknown,
    /// Data may be sent.
    Granted,
    /// Data must not be collected.
    Denied,
}

impl ConsentState {
    /// `true` only for [`ConsentState::Granted`].
    pub fn is_granted(self) -> bool {
        self == ConsentState::Granted
    }

    /// `true` only for [`ConsentState::Unknown`].
    pub fn is_unknown(self) -> bool {
        self == ConsentState::Unknown
    }
}

impl From<bool> for ConsentState {
    fn from(granted: bool) -> ConsentState {
        if granted {
            ConsentState::Granted
        } else {
            ConsentState::Denied
        }
    }
}

/// Holds the user's consent decision and forwards changes to the [`FlagClient`].
///
/// The gate is owned by whatever presents the consent prompt. Other parts of the application
/// observe the decision through a [`ConsentWatch`].
pub struct ConsentGate {
    client: Arc<FlagClient>,
    state: watch::Sender<ConsentState>,
}

impl ConsentGate {
    /// Create a gate starting from the client's current consent state.
    pub fn new(client: Arc<FlagClient>) -> (ConsentGate, ConsentWatch) {
        let (state, rx) = watch::channel(client.consent());
        (ConsentGate { client, state }, ConsentWatch { rx })
    }

    /// Current decision.
    pub fn get(&self) -> ConsentState {
        *self.state.borrow()
    }

    /// Record the user's decision.
    ///
    /// Forwards to [`FlagClient::set_consent`] and publishes the new state. Repeating the same
    /// decision does not notify observers again. A decision the client refused (after shutdown)
    /// is not published.
    pub fn set(&self, granted: bool) {
        if !self.client.set_consent(granted) {
            return;
        }

        let new_state = ConsentState::from(granted);
        self.state.send_if_modified(|state| {
            if *state == new_state {
                false
            } else {
                *state = new_state;
                true
            }
        });
    }

    /// Get another observer of this gate.
    pub fn watch(&self) -> ConsentWatch {
        ConsentWatch {
            rx: self.state.subscribe(),
        }
    }
}

/// Read-only view of a [`ConsentGate`].
#[derive(Debug, Clone)]
pub struct ConsentWatch {
    rx: watch::Receiver<ConsentState>,
}

impl ConsentWatch {
    /// Latest published decision.
    pub fn get(&self) -> ConsentState {
        *self.rx.borrow()
    }

    pub fn is_granted(&self) -> bool {
        self.get().is_granted()
    }

    pub fn is_unknown(&self) -> bool {
        self.get().is_unknown()
    }

    /// Wait until the decision changes. Returns `None` once the gate is gone.
    pub async fn changed(&mut self) -> Option<ConsentState> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{ConsentGate, ConsentState};
    use crate::{test_support::RecordingBackend, ClientConfig, FlagClient};

    fn client() -> (Arc<FlagClient>, RecordingBackend) {
        let backend = RecordingBackend::default();
        let (client, _event_loop) =
            FlagClient::connect(ClientConfig::from_api_key("api-key"), backend.clone()).unwrap();
        (Arc::new(client), backend)
    }

    #[test]
    fn starts_unknown() {
        let (client, _) = client();
        let (gate, watch) = ConsentGate::new(client);

        assert_eq!(gate.get(), ConsentState::Unknown);
        assert!(watch.is_unknown());
    }

    #[test]
    fn set_true_then_get_returns_granted() {
        let (client, backend) = client();
        let (gate, watch) = ConsentGate::new(client.clone());

        gate.set(true);

        assert_eq!(gate.get(), ConsentState::Granted);
        assert!(watch.is_granted());
        assert_eq!(client.consent(), ConsentState::Granted);
        assert_eq!(backend.consent_calls(), vec![true]);
    }

    #[test]
    fn set_false_then_get_returns_denied() {
        let (client, _) = client();
        let (gate, watch) = ConsentGate::new(client);

        gate.set(false);

        assert_eq!(gate.get(), ConsentState::Denied);
        assert_eq!(watch.get(), ConsentState::Denied);
    }

    #[test]
    fn never_returns_to_unknown() {
        let (client, _) = client();
        let (gate, _watch) = ConsentGate::new(client);

        for granted in [true, false, false, true, true, false] {
            gate.set(granted);
            assert_ne!(gate.get(), ConsentState::Unknown);
        }
    }

    #[test]
    fn repeated_decision_does_not_notify_observers() {
        let (client, _) = client();
        let (gate, watch) = ConsentGate::new(client);
        let mut rx = watch.rx.clone();

        gate.set(true);
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        gate.set(true);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn starts_from_configured_consent() {
        let mut config = ClientConfig::from_api_key("api-key");
        config.user_consent(ConsentState::Granted);
        let (client, _event_loop) =
            FlagClient::connect(config, RecordingBackend::default()).unwrap();

        let (gate, _) = ConsentGate::new(Arc::new(client));
        assert_eq!(gate.get(), ConsentState::Granted);
    }

    #[test]
    fn decision_after_shutdown_is_not_published() {
        let (client, backend) = client();
        let (gate, watch) = ConsentGate::new(client.clone());

        client.shutdown();
        gate.set(true);

        assert_eq!(gate.get(), ConsentState::Unknown);
        assert!(watch.is_unknown());
        assert_eq!(client.consent(), ConsentState::Unknown);
        assert!(backend.consent_calls().is_empty());
    }
}
