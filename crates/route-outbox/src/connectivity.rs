//! Connectivity signal and the flush trigger bound to it.

use crate::{FlushCoordinator, OutboxResult};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Latest connectivity as published to subscribers.
///
/// `restores` counts offline to online transitions. A subscriber that misses
/// the intermediate values of a quick flap still sees the counter move.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectivityState {
    pub online: bool,
    pub restores: u64,
}

/// Current online/offline state, observable through a watch channel.
pub struct ConnectivityMonitor {
    tx: watch::Sender<ConnectivityState>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (tx, _) = watch::channel(ConnectivityState {
            online: initially_online,
            restores: 0,
        });
        Self { tx }
    }

    /// Record the latest state. Subscribers are only woken on a change.
    ///
    /// Returns `true` when this call moved the state from offline to online.
    pub fn set_online(&self, online: bool) -> bool {
        let mut restored = false;
        self.tx.send_if_modified(|state| {
            if state.online == online {
                return false;
            }
            state.online = online;
            if online {
                state.restores = state.restores.wrapping_add(1);
                restored = true;
            }
            true
        });
        if restored {
            info!("Connectivity restored");
        } else {
            debug!(online, "Connectivity state recorded");
        }
        restored
    }

    pub fn is_online(&self) -> bool {
        self.tx.borrow().online
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.tx.subscribe()
    }
}

/// Flush the queue after every offline to online transition.
///
/// Restores that happen while a flush is running are folded into one more
/// flush once it returns. The task ends when the monitor is dropped.
pub fn spawn_connectivity_flush(
    coordinator: Arc<FlushCoordinator>,
    mut connectivity: watch::Receiver<ConnectivityState>,
) -> JoinHandle<()> {
    let mut handled = connectivity.borrow_and_update().restores;

    tokio::spawn(async move {
        while connectivity.changed().await.is_ok() {
            let restores = connectivity.borrow_and_update().restores;
            if restores == handled {
                continue;
            }
            handled = restores;

            info!("Online, auto-flushing routes");
            match coordinator.flush().await {
                Ok(report) => debug!(?report, "Connectivity flush done"),
                Err(e) => error!(error = %e, "Connectivity flush failed"),
            }
        }

        debug!("Connectivity monitor closed, stopping flush trigger");
    })
}

/// Polls the API base URL to derive connectivity on hosts without a
/// platform network-status API.
///
/// Any HTTP response counts as online; a transport error counts as offline.
pub struct ConnectivityProbe {
    client: Client,
    url: String,
    interval: Duration,
}

impl ConnectivityProbe {
    pub fn new(url: &str, interval: Duration, timeout: Duration) -> OutboxResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
            interval,
        })
    }

    /// One probe.
    pub async fn check(&self) -> bool {
        match self.client.head(&self.url).send().await {
            Ok(response) => {
                debug!(status = %response.status(), "Connectivity probe answered");
                true
            }
            Err(e) => {
                debug!(error = %e, "Connectivity probe failed");
                false
            }
        }
    }

    /// Probe forever, feeding `monitor`.
    pub async fn run(self, monitor: Arc<ConnectivityMonitor>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let online = self.check().await;
            monitor.set_online(online);
        }
    }
}
