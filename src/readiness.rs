//! Observable readiness of a client session.
use serde::Serialize;
use tokio::sync::watch;

use crate::SdkEvent;

/// Readiness flags of a session.
///
/// `ready` and `timed_out` are tracked independently: a session that timed out can still become
/// ready later. Each flag flips to `true` at most once and never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Readiness {
    pub ready: bool,
    pub timed_out: bool,
}

impl Readiness {
    /// Neither ready nor timed out yet.
    pub fn is_pending(self) -> bool {
        !self.ready && !self.timed_out
    }

    /// A decision has been made: flags are loaded, or waiting for them has been given up. Either
    /// way, flag-gated actions may proceed (possibly with `CONTROL` treatments).
    pub fn is_usable(self) -> bool {
        !self.is_pending()
    }
}

/// Writer side of the readiness state. Owned by the [`EventLoop`](crate::EventLoop).
#[derive(Debug)]
pub struct ReadinessSignal {
    state: watch::Sender<Readiness>,
}

impl ReadinessSignal {
    pub fn new() -> (ReadinessSignal, ReadinessWatch) {
        let (state, rx) = watch::channel(Readiness::default());
        (ReadinessSignal { state }, ReadinessWatch { rx })
    }

    /// Apply a backend event. Returns `true` if the observable state changed.
    pub fn apply(&self, event: &SdkEvent) -> bool {
        self.state.send_if_modified(|readiness| match event {
            SdkEvent::Ready | SdkEvent::ReadyFromCache if !readiness.ready => {
                readiness.ready = true;
                true
            }
            SdkEvent::ReadyTimedOut if !readiness.timed_out => {
                readiness.timed_out = true;
                true
            }
            _ => false,
        })
    }

    pub fn watch(&self) -> ReadinessWatch {
        ReadinessWatch {
            rx: self.state.subscribe(),
        }
    }
}

/// Read-only, cloneable view of a [`ReadinessSignal`].
#[derive(Debug, Clone)]
pub struct ReadinessWatch {
    rx: watch::Receiver<Readiness>,
}

impl ReadinessWatch {
    pub fn get(&self) -> Readiness {
        *self.rx.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.get().ready
    }

    pub fn is_timed_out(&self) -> bool {
        self.get().timed_out
    }

    pub fn is_usable(&self) -> bool {
        self.get().is_usable()
    }

    /// Wait until the session is ready or timed out.
    ///
    /// Returns the current state if the signal is dropped before that happens.
    pub async fn wait_usable(&mut self) -> Readiness {
        let usable = match self.rx.wait_for(|readiness| readiness.is_usable()).await {
            Ok(readiness) => Some(*readiness),
            Err(_) => None,
        };
        usable.unwrap_or_else(|| self.get())
    }

    /// Wait for the next change. Returns `None` once the signal is dropped.
    pub async fn changed(&mut self) -> Option<Readiness> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }
}
