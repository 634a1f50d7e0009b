//! A background poller thread that periodically fetches treatments from the server, stores them in
//! a [`TreatmentStore`] and reports lifecycle events.
use std::{
    sync::{mpsc::RecvTimeoutError, Arc},
    time::Duration,
};

use rand::{thread_rng, Rng};

use super::{cache::TreatmentsCache, fetcher::FetchTreatments, store::TreatmentStore};
use crate::{backend::EventSink, Error, Key, Result, SdkEvent};

/// Configuration for [`PollerThread`].
#[derive(Debug, Clone)]
pub(crate) struct PollerThreadConfig {
    /// Interval to wait between requests for treatments.
    pub interval: Duration,
    /// Upper bound of the random amount subtracted from each interval.
    pub jitter: Duration,
}

/// Where fetched treatments are persisted, if anywhere.
pub(crate) struct PollerCache {
    pub cache: TreatmentsCache,
    pub key: Key,
}

/// A treatments poller thread.
pub(crate) struct PollerThread {
    join_handle: std::thread::JoinHandle<()>,
    stop_sender: std::sync::mpsc::SyncSender<()>,
}

impl PollerThread {
    /// Start polling.
    ///
    /// The first successful fetch emits [`SdkEvent::Ready`]. Later fetches that bring a new change
    /// number emit [`SdkEvent::Updated`].
    pub fn start(
        mut fetcher: impl FetchTreatments + 'static,
        store: Arc<TreatmentStore>,
        cache: Option<PollerCache>,
        events: EventSink,
        config: PollerThreadConfig,
    ) -> std::io::Result<PollerThread> {
        // One slot: a second stop command is redundant.
        let (stop_sender, stop_receiver) = std::sync::mpsc::sync_channel::<()>(1);

        let join_handle = std::thread::Builder::new()
            .name("flagwatch-poller".to_owned())
            .spawn(move || {
                let mut fetched = false;

                loop {
                    match fetcher.fetch() {
                        Ok(treatments) => {
                            let change_number = treatments.change_number;
                            let previous = store.set_treatments(treatments.clone());

                            if !fetched {
                                fetched = true;
                                events.send(SdkEvent::Ready);
                            } else if previous.map(|p| p.change_number) != Some(change_number) {
                                log::debug!(target: "flagwatch", change_number; "treatments updated");
                                events.send(SdkEvent::Updated);
                            }

                            if let Some(PollerCache { cache, key }) = &cache {
                                if let Err(err) = cache.save(key, &treatments) {
                                    log::warn!(target: "flagwatch", "failed to write treatments cache: {:?}", err);
                                }
                            }
                        }
                        Err(err @ (Error::Unauthorized | Error::InvalidBaseUrl(_))) => {
                            // Unrecoverable errors. The ready timeout will fire if nothing else
                            // was loaded.
                            log::error!(target: "flagwatch", "stopping poller: {:?}", err);
                            return;
                        }
                        Err(err) => {
                            log::warn!(target: "flagwatch", "error while fetching treatments: {:?}", err);
                        }
                    }

                    let timeout = next_delay(config.interval, config.jitter);
                    match stop_receiver.recv_timeout(timeout) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                            log::debug!(target: "flagwatch", "poller thread received stop command");
                            return;
                        }
                    }
                }
            })?;

        Ok(PollerThread {
            join_handle,
            stop_sender,
        })
    }

    /// Stop the poller thread.
    ///
    /// This function does not wait for the thread to actually stop.
    pub fn stop(&self) {
        // Fails only if the thread has exited or a stop is already queued.
        let _ = self.stop_sender.try_send(());
    }

    /// Stop the poller thread and block waiting for it to exit. An in-flight request is bounded
    /// by the fetcher's request timeout.
    pub fn shutdown(self) -> Result<()> {
        self.stop();
        self.join_handle
            .join()
            .map_err(|_| Error::BackgroundThreadPanicked)?;
        Ok(())
    }
}

/// Delay before the next fetch: `interval` shortened by a random amount of at most `jitter`.
fn next_delay(interval: Duration, jitter: Duration) -> Duration {
    let max_jitter = jitter.min(interval);
    if max_jitter.is_zero() {
        return interval;
    }
    interval - thread_rng().gen_range(Duration::ZERO..=max_jitter)
}

#[cfg(test)]
mod tests {
    use std::{
        collections::{HashMap, VecDeque},
        sync::Arc,
        time::Duration,
    };

    use tokio::sync::mpsc;

    use super::{next_delay, PollerCache, PollerThread, PollerThreadConfig};
    use crate::{
        backend::{EventSink, LoopMessage},
        http::{cache::TreatmentsCache, fetcher::FetchTreatments, store::{TreatmentStore, Treatments}},
        Error, Key, Result, SdkEvent,
    };

    struct ScriptedFetcher {
        responses: VecDeque<Result<Treatments>>,
    }

    impl FetchTreatments for ScriptedFetcher {
        fn fetch(&mut self) -> Result<Treatments> {
            self.responses
                .pop_front()
                .unwrap_or_else(|| Err(Error::Transport("script exhausted".to_owned())))
        }
    }

    fn treatments(change_number: i64, value: &str) -> Treatments {
        Treatments {
            change_number,
            treatments: HashMap::from([("track_workouts".to_owned(), value.to_owned())]),
        }
    }

    fn config() -> PollerThreadConfig {
        PollerThreadConfig {
            interval: Duration::from_millis(5),
            jitter: Duration::ZERO,
        }
    }

    fn collect_events(rx: &mut mpsc::UnboundedReceiver<LoopMessage>) -> Vec<SdkEvent> {
        let mut events = vec![];
        while let Ok(LoopMessage::Event(event)) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("condition not met in time");
    }

    #[test]
    fn emits_ready_then_updated_on_change() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx);
        let store = Arc::new(TreatmentStore::new());
        let fetcher = ScriptedFetcher {
            responses: VecDeque::from([
                Err(Error::Transport("flaky".to_owned())),
                Ok(treatments(1, "off")),
                Ok(treatments(1, "off")),
                Ok(treatments(2, "on")),
            ]),
        };

        let poller =
            PollerThread::start(fetcher, store.clone(), None, sink.clone(), config()).unwrap();
        wait_for(|| store.get_treatments().map(|t| t.change_number) == Some(2));
        poller.shutdown().unwrap();

        assert!(sink.definitions_loaded());
        assert_eq!(collect_events(&mut rx), vec![SdkEvent::Ready, SdkEvent::Updated]);
        assert_eq!(
            store.get_treatments().unwrap().get("track_workouts"),
            Some("on")
        );
    }

    #[test]
    fn stops_on_unauthorized() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx);
        let fetcher = ScriptedFetcher {
            responses: VecDeque::from([Err(Error::Unauthorized), Ok(treatments(1, "on"))]),
        };

        let poller = PollerThread::start(
            fetcher,
            Arc::new(TreatmentStore::new()),
            None,
            sink.clone(),
            config(),
        )
        .unwrap();
        poller.shutdown().unwrap();

        assert!(!sink.definitions_loaded());
        assert!(collect_events(&mut rx).is_empty());
    }

    #[test]
    fn writes_fetched_treatments_to_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TreatmentsCache::new(dir.path().join("treatments.json"));
        let key = Key::new("anon");
        let (tx, _rx) = mpsc::unbounded_channel();
        let store = Arc::new(TreatmentStore::new());

        let poller = PollerThread::start(
            ScriptedFetcher {
                responses: VecDeque::from([Ok(treatments(4, "on"))]),
            },
            store.clone(),
            Some(PollerCache {
                cache: cache.clone(),
                key: key.clone(),
            }),
            EventSink::new(tx),
            config(),
        )
        .unwrap();
        wait_for(|| cache.load(&key).ok().flatten().is_some());
        poller.shutdown().unwrap();

        assert_eq!(cache.load(&key).unwrap(), Some(treatments(4, "on")));
    }

    #[test]
    fn next_delay_stays_within_jitter() {
        let interval = Duration::from_secs(60);
        let jitter = Duration::from_secs(5);

        for _ in 0..100 {
            let delay = next_delay(interval, jitter);
            assert!(delay <= interval && delay >= interval - jitter, "{delay:?}");
        }
        assert_eq!(next_delay(interval, Duration::ZERO), interval);
    }

    #[test]
    fn next_delay_never_underflows() {
        let interval = Duration::from_millis(10);

        for _ in 0..100 {
            assert!(next_delay(interval, Duration::from_secs(30)) <= interval);
        }
    }
}
