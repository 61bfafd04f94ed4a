//! Scanner application
//!
//! Wires the admission filter between the radio driver boundary and the
//! transport sink: validate, admit, stamp a RawEvent, publish. Also owns
//! the periodic staleness sweep and the heartbeat/status publisher.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use blip_common::config::Config;
use blip_common::metrics::{bump, AdmissionCounters, AdmissionSnapshot};
use blip_common::types::RawEvent;
use blip_common::Result;

use crate::admission::{AdmissionFilter, Decision};
use crate::source::{Advertisement, AdvertisementSource};
use crate::transport::{events_channel, status_channel, EventSink};

/// Heartbeat payload published on the status channel.
#[derive(Debug, Serialize)]
pub struct ScannerStatus {
    pub timestamp: chrono::DateTime<Utc>,
    pub scanner_id: String,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub tracked_addresses: usize,
    pub counters: AdmissionSnapshot,
}

/// The edge scanner process.
pub struct ScannerApp {
    config: Config,
    filter: Arc<AdmissionFilter>,
    sink: Arc<dyn EventSink>,
    counters: Arc<AdmissionCounters>,
    events_channel: String,
    status_channel: String,
    started_at: Instant,
}

impl ScannerApp {
    pub fn new(
        config: Config,
        filter: Arc<AdmissionFilter>,
        sink: Arc<dyn EventSink>,
        counters: Arc<AdmissionCounters>,
    ) -> Self {
        let events_channel = events_channel(&config.scanner.channel_prefix, &config.scanner.id);
        let status_channel = status_channel(&config.scanner.channel_prefix, &config.scanner.id);
        Self {
            config,
            filter,
            sink,
            counters,
            events_channel,
            status_channel,
            started_at: Instant::now(),
        }
    }

    /// Consume advertisements until the source is exhausted or shutdown
    /// is requested. Spawns the sweep and heartbeat tasks for the
    /// duration of the run.
    pub async fn run<S: AdvertisementSource>(
        &self,
        source: &mut S,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        info!(scanner_id = %self.config.scanner.id, "scanner started");

        let sweep_task = self.spawn_sweep_task(shutdown.clone());
        let heartbeat_task = self.spawn_heartbeat_task(shutdown.clone());

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("shutdown requested, stopping advertisement intake");
                        break;
                    }
                }
                next = source.next_advertisement() => {
                    match next {
                        Ok(Some(adv)) => self.handle_advertisement(adv).await,
                        Ok(None) => {
                            info!("advertisement source exhausted");
                            break;
                        }
                        Err(e) => {
                            warn!(error = %e, "advertisement source error");
                        }
                    }
                }
            }
        }

        sweep_task.abort();
        heartbeat_task.abort();

        let snap = self.counters.snapshot();
        info!(
            admitted = snap.admitted,
            dropped_denylist = snap.dropped_denylist,
            dropped_duplicate = snap.dropped_duplicate,
            "scanner stopped"
        );
        Ok(())
    }

    /// Handle one advertisement from the scan callback. Never returns an
    /// error: every failure mode is counted and logged instead.
    pub async fn handle_advertisement(&self, adv: Advertisement) {
        let decision = self.filter.admit(
            &adv.address,
            adv.rssi,
            adv.name.as_deref(),
            Instant::now(),
        );

        match decision {
            Decision::Forward => self.forward(adv).await,
            Decision::Drop(reason) => {
                debug!(address = %adv.address, ?reason, "advertisement dropped");
            }
        }
    }

    async fn forward(&self, adv: Advertisement) {
        let event = RawEvent {
            id: Uuid::new_v4(),
            scanner_id: self.config.scanner.id.clone(),
            address: adv.address.to_uppercase(),
            rssi: adv.rssi,
            name: adv.name,
            manufacturer_data: adv.manufacturer_data,
            service_data: adv.service_data,
            service_uuids: adv.service_uuids,
            detected_at: adv.detected_at,
            received_at: Utc::now(),
        };

        let payload = match serde_json::to_vec(&event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(address = %event.address, error = %e, "failed to serialize event");
                bump(&self.counters.publish_failed);
                return;
            }
        };

        // Drop-on-failure edge policy: no local queue, no retry
        if let Err(e) = self.sink.publish(&self.events_channel, &payload).await {
            warn!(address = %event.address, error = %e, "publish failed, dropping event");
            bump(&self.counters.publish_failed);
        }
    }

    fn spawn_sweep_task(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let filter = Arc::clone(&self.filter);
        let interval = self.config.admission.sweep_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        filter.sweep(Instant::now());
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    fn spawn_heartbeat_task(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        if !self.config.heartbeat.enabled {
            // Resolves immediately; nothing to publish
            return tokio::spawn(async {});
        }

        let sink = Arc::clone(&self.sink);
        let counters = Arc::clone(&self.counters);
        let filter = Arc::clone(&self.filter);
        let channel = self.status_channel.clone();
        let scanner_id = self.config.scanner.id.clone();
        let interval = self.config.heartbeat.interval();
        let started_at = self.started_at;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let status = ScannerStatus {
                            timestamp: Utc::now(),
                            scanner_id: scanner_id.clone(),
                            status: "online",
                            uptime_secs: started_at.elapsed().as_secs(),
                            tracked_addresses: filter.tracked_addresses(),
                            counters: counters.snapshot(),
                        };
                        match serde_json::to_vec(&status) {
                            Ok(payload) => {
                                if let Err(e) = sink.publish(&channel, &payload).await {
                                    warn!(error = %e, "heartbeat publish failed");
                                }
                            }
                            Err(e) => warn!(error = %e, "heartbeat serialization failed"),
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}
