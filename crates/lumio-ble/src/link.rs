//! Connection supervision and the write pipeline.
//!
//! One long-lived [`BleLink`] task owns the whole connection lifecycle:
//!
//! ```text
//! Down → Scanning → Connecting → Discovering → Ready → Down → …
//! ```
//!
//! Any failure (scan timeout, connect timeout, write error, heartbeat
//! miss) drops the connection cleanly, publishes `LinkChanged(down)` and
//! restarts the cycle after `retryDelay`. The frame queue outlives
//! individual connections, so intent enqueued while the link is down is
//! flushed once the strip comes back.

use std::sync::Arc;
use std::time::Duration;

use btleplug::api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use chrono::{Datelike, Timelike};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use lumio_core::{Event, EventBus};

use crate::frame::{self, Frame};
use crate::limiter::TokenBucket;

/// Primary service exposing the write characteristic.
const WRITE_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000fff0_0000_1000_8000_00805f9b34fb);
/// Write-without-response characteristic taking the 9-byte frames.
const WRITE_CHAR_UUID: Uuid = Uuid::from_u128(0x0000fff3_0000_1000_8000_00805f9b34fb);
/// Generic Access "Device Name", read periodically as a liveness probe.
const DEVICE_NAME_UUID: Uuid = Uuid::from_u128(0x00002a00_0000_1000_8000_00805f9b34fb);

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),
    #[error("strip exposes no write characteristic {0}")]
    MissingCharacteristic(Uuid),
}

/// BLE section of the agent configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LinkConfig {
    /// Advertised local names to accept. Whitespace is significant: some
    /// strips pad their name (`"ELK-BLEDOM   "`).
    pub device_names: Vec<String>,
    pub scan_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub retry_delay_secs: u64,
    /// Frames per second sustained.
    pub rate_limit: f64,
    /// Frames allowed in a cold burst.
    pub rate_burst: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            device_names: vec!["BLEDOM".into(), "ELK-BLEDOM   ".into()],
            scan_timeout_secs: 30,
            connect_timeout_secs: 7,
            heartbeat_interval_secs: 60,
            retry_delay_secs: 5,
            rate_limit: 25.0,
            rate_burst: 25,
        }
    }
}

impl LinkConfig {
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
    /// Queue capacity: two bursts worth of frames.
    pub fn queue_capacity(&self) -> usize {
        self.rate_burst.max(1) * 2
    }
}

pub type FrameReceiver = mpsc::Receiver<Frame>;

/// Creates the bounded frame queue feeding a [`BleLink`].
pub fn frame_channel(capacity: usize) -> (BleHandle, FrameReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (BleHandle { tx }, rx)
}

/// Enqueue side of the write pipeline.
///
/// The semantic helpers build a frame and enqueue it without awaiting.
/// When the queue is full the frame is dropped with a debug log: LED
/// frames are idempotent in effect, so losing the latest-but-one is
/// preferable to blocking a caller.
#[derive(Debug, Clone)]
pub struct BleHandle {
    tx: mpsc::Sender<Frame>,
}

impl BleHandle {
    pub fn enqueue(&self, frame: Frame) {
        match self.tx.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(frame)) => {
                debug!(?frame, "write queue full, dropping frame");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("ble link gone, dropping frame");
            }
        }
    }

    pub fn set_power(&self, on: bool) {
        self.enqueue(frame::power(on));
    }

    pub fn set_color(&self, r: u8, g: u8, b: u8) {
        self.enqueue(frame::color(r, g, b));
    }

    pub fn set_brightness(&self, value: u8) {
        self.enqueue(frame::brightness(value));
    }

    pub fn set_speed(&self, value: u8) {
        self.enqueue(frame::speed(value));
    }

    pub fn set_hardware_effect(&self, id: u8) {
        self.enqueue(frame::hardware_effect(id));
    }

    /// Pushes the local wall clock to the strip (Monday = 0).
    pub fn sync_time(&self) {
        let now = chrono::Local::now();
        self.enqueue(frame::sync_time(
            now.hour() as u8,
            now.minute() as u8,
            now.second() as u8,
            now.weekday().num_days_from_monday() as u8,
        ));
    }

    pub fn set_rgb_order(&self, v1: u8, v2: u8, v3: u8) {
        self.enqueue(frame::rgb_order(v1, v2, v3));
    }

    pub fn set_device_schedule(
        &self,
        hour: u8,
        minute: u8,
        second: u8,
        weekdays: u8,
        is_on: bool,
        is_set: bool,
    ) {
        self.enqueue(frame::device_schedule(
            hour, minute, second, weekdays, is_on, is_set,
        ));
    }
}

enum CycleEnd {
    Shutdown,
    /// All [`BleHandle`]s dropped; nothing left to write for.
    HandlesDropped,
    Retry,
}

/// The supervision loop. The only task that ever holds the peripheral and
/// its write characteristic.
pub struct BleLink {
    config: LinkConfig,
    bus: Arc<EventBus>,
    frames: FrameReceiver,
    limiter: TokenBucket,
}

impl BleLink {
    pub fn new(config: LinkConfig, bus: Arc<EventBus>, frames: FrameReceiver) -> Self {
        let limiter = TokenBucket::new(config.rate_limit, config.rate_burst);
        Self {
            config,
            bus,
            frames,
            limiter,
        }
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        self.publish_link(false, 0);

        let manager = loop {
            match Manager::new().await {
                Ok(manager) => break manager,
                Err(e) => {
                    warn!(error = %e, "bluetooth stack unavailable, retrying");
                    if self.wait_retry(&shutdown).await {
                        return;
                    }
                }
            }
        };

        loop {
            if shutdown.is_cancelled() {
                info!("ble link shutting down");
                return;
            }
            match self.connect_cycle(&manager, &shutdown).await {
                CycleEnd::Shutdown => {
                    info!("ble link shutting down");
                    return;
                }
                CycleEnd::HandlesDropped => return,
                CycleEnd::Retry => {
                    if self.wait_retry(&shutdown).await {
                        return;
                    }
                }
            }
        }
    }

    /// One pass through scan → connect → discover → ready.
    async fn connect_cycle(&mut self, manager: &Manager, shutdown: &CancellationToken) -> CycleEnd {
        let adapter = match manager.adapters().await {
            Ok(mut adapters) if !adapters.is_empty() => adapters.remove(0),
            Ok(_) => {
                warn!("no bluetooth adapter present");
                return CycleEnd::Retry;
            }
            Err(e) => {
                warn!(error = %e, "adapter enumeration failed");
                return CycleEnd::Retry;
            }
        };

        let (peripheral, rssi) = match self.find_strip(&adapter, shutdown).await {
            Ok(Some(found)) => found,
            Ok(None) => {
                if shutdown.is_cancelled() {
                    return CycleEnd::Shutdown;
                }
                info!("scan finished without finding a strip");
                return CycleEnd::Retry;
            }
            Err(e) => {
                warn!(error = %e, "scan failed");
                return CycleEnd::Retry;
            }
        };

        info!(rssi, "strip found, connecting");
        match timeout(self.config.connect_timeout(), peripheral.connect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(error = %e, "connect failed");
                return CycleEnd::Retry;
            }
            Err(_) => {
                // Some adapter stacks leave the scan stuck after an
                // aborted connect; stop it before retrying.
                let _ = adapter.stop_scan().await;
                warn!("connect timed out");
                return CycleEnd::Retry;
            }
        }

        let discovered = timeout(self.config.connect_timeout(), discover(&peripheral)).await;
        let (write_char, heartbeat_char) = match discovered {
            Ok(Ok(chars)) => chars,
            Ok(Err(e)) => {
                warn!(error = %e, "service discovery failed");
                let _ = peripheral.disconnect().await;
                return CycleEnd::Retry;
            }
            Err(_) => {
                warn!("service discovery timed out");
                let _ = peripheral.disconnect().await;
                return CycleEnd::Retry;
            }
        };

        if heartbeat_char.is_none() {
            debug!("device name characteristic missing, heartbeat disabled");
        }
        info!("strip ready");
        self.publish_link(true, rssi);

        let end = self
            .serve(&peripheral, &write_char, heartbeat_char.as_ref(), shutdown)
            .await;

        self.publish_link(false, 0);
        if let Err(e) = peripheral.disconnect().await {
            debug!(error = %e, "disconnect failed");
        }
        end
    }

    /// Scans until a configured local name is seen or the scan window ends.
    async fn find_strip(
        &self,
        adapter: &Adapter,
        shutdown: &CancellationToken,
    ) -> Result<Option<(Peripheral, i16)>, LinkError> {
        let _ = adapter.stop_scan().await;
        adapter.start_scan(ScanFilter::default()).await?;
        let deadline = Instant::now() + self.config.scan_timeout();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    let _ = adapter.stop_scan().await;
                    return Ok(None);
                }
                _ = sleep(Duration::from_secs(1)) => {}
            }

            for peripheral in adapter.peripherals().await? {
                let Ok(Some(props)) = peripheral.properties().await else {
                    continue;
                };
                let Some(name) = props.local_name else {
                    continue;
                };
                if self.config.device_names.iter().any(|n| *n == name) {
                    let _ = adapter.stop_scan().await;
                    return Ok(Some((peripheral, props.rssi.unwrap_or(0))));
                }
            }

            if Instant::now() >= deadline {
                let _ = adapter.stop_scan().await;
                return Ok(None);
            }
        }
    }

    /// Ready state: drain the frame queue through the rate limiter and
    /// probe the link every heartbeat interval.
    async fn serve(
        &mut self,
        peripheral: &Peripheral,
        write_char: &Characteristic,
        heartbeat_char: Option<&Characteristic>,
        shutdown: &CancellationToken,
    ) -> CycleEnd {
        let period = self.config.heartbeat_interval();
        let mut heartbeat = interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return CycleEnd::Shutdown,
                received = self.frames.recv() => {
                    let Some(frame) = received else {
                        return CycleEnd::HandlesDropped;
                    };
                    tokio::select! {
                        _ = shutdown.cancelled() => return CycleEnd::Shutdown,
                        () = self.limiter.acquire() => {}
                    }
                    if let Err(e) = peripheral
                        .write(write_char, &frame, WriteType::WithoutResponse)
                        .await
                    {
                        warn!(error = %e, "characteristic write failed, dropping connection");
                        return CycleEnd::Retry;
                    }
                }
                _ = heartbeat.tick() => {
                    let Some(probe) = heartbeat_char else { continue };
                    if let Err(e) = peripheral.read(probe).await {
                        warn!(error = %e, "heartbeat read failed, dropping connection");
                        return CycleEnd::Retry;
                    }
                }
            }
        }
    }

    /// Sleeps the retry delay; returns true when shutdown fired instead.
    async fn wait_retry(&self, shutdown: &CancellationToken) -> bool {
        tokio::select! {
            _ = shutdown.cancelled() => true,
            _ = sleep(self.config.retry_delay()) => false,
        }
    }

    fn publish_link(&self, up: bool, rssi: i16) {
        self.bus.publish(Event::LinkChanged { up, rssi });
    }
}

/// Locates the write characteristic and, when present, the Device Name
/// characteristic used for heartbeat reads.
async fn discover(
    peripheral: &Peripheral,
) -> Result<(Characteristic, Option<Characteristic>), LinkError> {
    peripheral.discover_services().await?;
    let characteristics = peripheral.characteristics();

    let write_char = characteristics
        .iter()
        .find(|c| c.uuid == WRITE_CHAR_UUID && c.service_uuid == WRITE_SERVICE_UUID)
        .cloned()
        .ok_or(LinkError::MissingCharacteristic(WRITE_CHAR_UUID))?;
    let heartbeat_char = characteristics
        .iter()
        .find(|c| c.uuid == DEVICE_NAME_UUID)
        .cloned();

    Ok((write_char, heartbeat_char))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = LinkConfig::default();
        assert_eq!(config.device_names, vec!["BLEDOM", "ELK-BLEDOM   "]);
        assert_eq!(config.scan_timeout(), Duration::from_secs(30));
        assert_eq!(config.connect_timeout(), Duration::from_secs(7));
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(60));
        assert_eq!(config.retry_delay(), Duration::from_secs(5));
        assert_eq!(config.queue_capacity(), 50);
    }

    #[test]
    fn config_deserializes_partial_json() {
        let config: LinkConfig =
            serde_json::from_str(r#"{"deviceNames":["MY-STRIP"],"rateLimit":10.0}"#).unwrap();
        assert_eq!(config.device_names, vec!["MY-STRIP"]);
        assert_eq!(config.rate_limit, 10.0);
        assert_eq!(config.rate_burst, 25);
    }

    #[tokio::test]
    async fn handle_enqueues_built_frames() {
        let (handle, mut rx) = frame_channel(8);
        handle.set_power(true);
        handle.set_color(1, 2, 3);
        assert_eq!(rx.recv().await, Some(frame::power(true)));
        assert_eq!(rx.recv().await, Some(frame::color(1, 2, 3)));
    }

    #[tokio::test]
    async fn full_queue_drops_newest_frame() {
        let (handle, mut rx) = frame_channel(1);
        handle.set_power(true);
        handle.set_power(false);
        assert_eq!(rx.recv().await, Some(frame::power(true)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn sync_time_frame_is_well_formed() {
        let (handle, mut rx) = frame_channel(1);
        handle.sync_time();
        let frame = rx.recv().await.unwrap();
        assert_eq!(&frame[..3], &[0x7E, 0x07, 0x83]);
        assert!(frame[3] < 24 && frame[4] < 60 && frame[5] < 60);
        assert!(frame[6] < 7);
        assert_eq!(&frame[7..], &[0xFF, 0xEF]);
    }
}
