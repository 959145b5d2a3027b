//! Device state: the single source of truth for the strip's intended state.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// An RGB color, one byte per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const WHITE: Rgb = Rgb {
        r: 255,
        g: 255,
        b: 255,
    };

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Returns the `#RRGGBB` representation used on the wire.
    pub fn hex(&self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

/// The device's intended state.
///
/// `link_up == false` does not clear the other fields; they represent
/// intent and are replayed against the strip on reconnect.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceState {
    pub link_up: bool,
    /// Signal strength of the last connection; 0 while the link is down.
    pub rssi: i16,
    pub power: bool,
    pub color: Rgb,
    /// 1..=100
    pub brightness: u8,
    /// 0..=100
    pub speed: u8,
    /// Basename of the running pattern; empty while idle.
    pub running_pattern: String,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            link_up: false,
            rssi: 0,
            power: false,
            color: Rgb::WHITE,
            brightness: 100,
            speed: 50,
            running_pattern: String::new(),
        }
    }
}

/// Thread-safe store around [`DeviceState`].
///
/// Readers get a value copy via [`snapshot`](Self::snapshot), so a reader
/// never observes a half-updated tuple. The store emits no events itself;
/// the orchestrator decides when a mutation is worth publishing, since one
/// logical command may touch several fields.
#[derive(Debug, Default)]
pub struct StateStore {
    inner: RwLock<DeviceState>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a consistent copy of the current state.
    pub fn snapshot(&self) -> DeviceState {
        self.inner.read().clone()
    }

    pub fn set_link(&self, up: bool, rssi: i16) {
        let mut state = self.inner.write();
        state.link_up = up;
        state.rssi = rssi;
    }

    pub fn set_power(&self, power: bool) {
        self.inner.write().power = power;
    }

    pub fn set_color(&self, color: Rgb) {
        self.inner.write().color = color;
    }

    pub fn set_brightness(&self, brightness: u8) {
        self.inner.write().brightness = brightness;
    }

    pub fn set_speed(&self, speed: u8) {
        self.inner.write().speed = speed;
    }

    pub fn set_running_pattern(&self, pattern: impl Into<String>) {
        self.inner.write().running_pattern = pattern.into();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_startup_state() {
        let state = DeviceState::default();
        assert!(!state.link_up);
        assert_eq!(state.rssi, 0);
        assert!(!state.power);
        assert_eq!(state.color, Rgb::WHITE);
        assert_eq!(state.brightness, 100);
        assert_eq!(state.speed, 50);
        assert!(state.running_pattern.is_empty());
    }

    #[test]
    fn snapshot_is_a_copy() {
        let store = StateStore::new();
        let before = store.snapshot();
        store.set_color(Rgb::new(10, 20, 30));
        assert_eq!(before.color, Rgb::WHITE);
        assert_eq!(store.snapshot().color, Rgb::new(10, 20, 30));
    }

    #[test]
    fn link_down_preserves_intent() {
        let store = StateStore::new();
        store.set_power(true);
        store.set_color(Rgb::new(1, 2, 3));
        store.set_link(true, -60);
        store.set_link(false, 0);

        let state = store.snapshot();
        assert!(!state.link_up);
        assert!(state.power);
        assert_eq!(state.color, Rgb::new(1, 2, 3));
    }

    #[test]
    fn hex_formatting() {
        assert_eq!(Rgb::new(255, 0, 0).hex(), "#FF0000");
        assert_eq!(Rgb::new(0, 255, 171).hex(), "#00FFAB");
    }

    #[test]
    fn snapshot_color_is_never_torn() {
        // Hammer the store from a writer thread while reading snapshots;
        // every snapshot must hold one of the two colors in full.
        use std::sync::Arc;

        let store = Arc::new(StateStore::new());
        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for _ in 0..1000 {
                    store.set_color(Rgb::new(10, 20, 30));
                    store.set_color(Rgb::WHITE);
                }
            })
        };

        for _ in 0..1000 {
            let color = store.snapshot().color;
            assert!(
                color == Rgb::new(10, 20, 30) || color == Rgb::WHITE,
                "torn read: {color:?}"
            );
        }
        writer.join().expect("writer thread");
    }
}
