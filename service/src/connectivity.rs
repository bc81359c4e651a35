//! Network reachability: a watcher that re-arms pending downloads when the
//! device comes back online, and a TCP probe that feeds it.

use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::bus::ProgressBus;
use crate::model::Connectivity;
use crate::recovery::{RecoveryOutcome, RestartRecovery};

pub struct ConnectivityWatcher {
    recovery: RestartRecovery,
    last: Mutex<Option<Connectivity>>,
}

impl ConnectivityWatcher {
    pub fn new(recovery: RestartRecovery) -> Self {
        Self {
            recovery,
            last: Mutex::new(None),
        }
    }

    /// Handles one reachability report. Only a transition into `Connected`
    /// with a pending, idle download triggers recovery.
    pub fn on_change(&self, state: Connectivity) -> Option<RecoveryOutcome> {
        let previous = self
            .last
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(state);

        if previous == Some(state) {
            return None;
        }
        log::info!("Connectivity changed: {:?} -> {:?}", previous, state);

        if state != Connectivity::Connected || !self.recovery.has_pending_work() {
            return None;
        }
        Some(self.recovery.run())
    }

    /// Consumes the bus connectivity channel on a background thread.
    pub fn spawn(self, bus: &ProgressBus) -> std::io::Result<JoinHandle<()>> {
        let rx = bus.subscribe_connectivity();
        thread::Builder::new()
            .name("connectivity-watcher".to_string())
            .spawn(move || {
                for state in rx.iter() {
                    if let Some(outcome) = self.on_change(state) {
                        log::info!("Reconnect recovery: {:?}", outcome);
                    }
                }
                log::debug!("Connectivity watcher exiting");
            })
    }
}

pub fn probe_once(address: &str, timeout: Duration) -> Connectivity {
    let addrs = match address.to_socket_addrs() {
        Ok(addrs) => addrs,
        Err(err) => {
            log::debug!("Cannot resolve {address}: {err}");
            return Connectivity::Disconnected;
        }
    };

    for addr in addrs {
        if TcpStream::connect_timeout(&addr, timeout).is_ok() {
            return Connectivity::Connected;
        }
    }
    Connectivity::Disconnected
}

/// `host:port` of a URL, for probing.
pub fn probe_address(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    let port = parsed.port_or_known_default()?;
    Some(format!("{host}:{port}"))
}

/// Periodically probes an address and publishes reachability transitions.
pub struct ReachabilityProbe {
    running: Arc<AtomicBool>,
}

impl Default for ReachabilityProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ReachabilityProbe {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn start(
        &self,
        bus: Arc<ProgressBus>,
        address: String,
        interval: Duration,
    ) -> std::io::Result<JoinHandle<()>> {
        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();

        thread::Builder::new()
            .name("reachability-probe".to_string())
            .spawn(move || {
                log::info!("Reachability probe started for {address}");
                let mut last: Option<Connectivity> = None;
                while running.load(Ordering::Relaxed) {
                    let state = probe_once(&address, interval);
                    if last != Some(state) {
                        bus.publish_connectivity(state);
                        last = Some(state);
                    }
                    thread::sleep(interval);
                }
                log::info!("Reachability probe exiting");
            })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::probe_address;

    #[test]
    fn probe_address_uses_default_ports() {
        assert_eq!(
            probe_address("https://alphacephei.com/vosk/models/").as_deref(),
            Some("alphacephei.com:443")
        );
        assert_eq!(
            probe_address("http://localhost:8080/x").as_deref(),
            Some("localhost:8080")
        );
        assert_eq!(probe_address("not a url"), None);
    }
}
