//! Background traffic sampling while a profile is connected.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Local};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use sysinfo::Networks;

use crate::traffic::TrafficStore;

/// Cumulative counters of the VPN interface at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetrySample {
    pub taken_at: DateTime<Local>,
    pub bytes_sent: u64,
    pub bytes_recv: u64,
}

/// Source of interface byte counters.
pub trait InterfaceCounters: Send + Sync {
    /// Current counters of the VPN interface, or `None` if it does not exist.
    fn sample(&self) -> Option<TelemetrySample>;
}

/// Reads counters through `sysinfo`, picking the first interface whose name
/// contains `pattern` (case-insensitive).
pub struct SysinfoCounters {
    pattern: String,
}

impl SysinfoCounters {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into().to_lowercase(),
        }
    }
}

impl InterfaceCounters for SysinfoCounters {
    fn sample(&self) -> Option<TelemetrySample> {
        let networks = Networks::new_with_refreshed_list();
        networks
            .list()
            .iter()
            .find(|(name, _)| name.to_lowercase().contains(&self.pattern))
            .map(|(name, data)| {
                log::trace!("Sampling interface {}", name);
                TelemetrySample {
                    taken_at: Local::now(),
                    bytes_sent: data.total_transmitted(),
                    bytes_recv: data.total_received(),
                }
            })
    }
}

/// Periodic sampler thread. Dropping it signals the thread to stop without
/// waiting for it.
pub struct TelemetryLogger {
    profile: String,
    stop_tx: Option<Sender<()>>,
    done_rx: Receiver<()>,
    handle: Option<thread::JoinHandle<()>>,
}

impl TelemetryLogger {
    /// Starts sampling `profile` immediately and then every `interval`.
    pub fn start(
        profile: impl Into<String>,
        counters: Arc<dyn InterfaceCounters>,
        store: Arc<dyn TrafficStore>,
        interval: Duration,
    ) -> Self {
        let profile = profile.into();
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (done_tx, done_rx) = bounded::<()>(1);

        let name = profile.clone();
        let handle = thread::spawn(move || {
            log::debug!("Traffic logger started for '{}'", name);
            loop {
                record_once(&name, counters.as_ref(), store.as_ref());
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            log::debug!("Traffic logger for '{}' exiting", name);
            let _ = done_tx.send(());
        });

        Self {
            profile,
            stop_tx: Some(stop_tx),
            done_rx,
            handle: Some(handle),
        }
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signals the thread and waits up to `join_timeout` for it to finish.
    /// Returns false (and logs a warning) if it did not finish in time.
    pub fn stop(mut self, join_timeout: Duration) -> bool {
        log::debug!("Attempting to stop traffic logger for '{}'...", self.profile);
        self.signal();

        let Some(handle) = self.handle.take() else {
            return true;
        };
        match self.done_rx.recv_timeout(join_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                let _ = handle.join();
                log::debug!("Traffic logger for '{}' stopped.", self.profile);
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "Traffic logger for '{}' did not terminate within {:?}.",
                    self.profile,
                    join_timeout
                );
                false
            }
        }
    }

    fn signal(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.try_send(());
        }
    }
}

impl Drop for TelemetryLogger {
    fn drop(&mut self) {
        self.signal();
    }
}

fn record_once(profile: &str, counters: &dyn InterfaceCounters, store: &dyn TrafficStore) {
    match counters.sample() {
        Some(sample) => {
            if let Err(e) = store.insert(profile, sample.bytes_sent, sample.bytes_recv) {
                log::error!("Failed to store traffic sample for '{}': {:#}", profile, e);
            }
        }
        None => log::debug!("VPN interface not found; no traffic sample for '{}'.", profile),
    }
}
