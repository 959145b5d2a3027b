//! The event envelope broadcast over the bus.

use serde::Serialize;

use crate::state::DeviceState;

/// Subscription key. Each [`Event`] variant maps to exactly one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Link,
    State,
    Pattern,
    Power,
    Color,
    Brightness,
    PatternList,
    PatternCode,
    ScheduleList,
}

/// An event fanned out to subscribers.
///
/// Variants carry only the affected fields. The first six mirror device
/// and runtime state; the last three are fan-out refreshes (pattern and
/// schedule listings) that ride the same bus so that no component ever
/// holds a direct reference to a transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Event {
    LinkChanged {
        up: bool,
        rssi: i16,
    },
    StateChanged(StateDelta),
    PatternChanged {
        running: String,
    },
    PowerChanged {
        is_on: bool,
    },
    ColorChanged {
        r: u8,
        g: u8,
        b: u8,
        hex: String,
    },
    BrightnessChanged {
        value: u8,
    },
    PatternList(Vec<String>),
    PatternCode {
        name: String,
        /// Absent when the pattern could not be read; the missing field is
        /// the error signal on the wire.
        code: Option<String>,
    },
    ScheduleList(Vec<ScheduleView>),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::LinkChanged { .. } => EventKind::Link,
            Event::StateChanged(_) => EventKind::State,
            Event::PatternChanged { .. } => EventKind::Pattern,
            Event::PowerChanged { .. } => EventKind::Power,
            Event::ColorChanged { .. } => EventKind::Color,
            Event::BrightnessChanged { .. } => EventKind::Brightness,
            Event::PatternList(_) => EventKind::PatternList,
            Event::PatternCode { .. } => EventKind::PatternCode,
            Event::ScheduleList(_) => EventKind::ScheduleList,
        }
    }
}

/// A partial (or full) view of the device state; unset fields are omitted
/// from the wire form.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StateDelta {
    #[serde(rename = "isOn", skip_serializing_if = "Option::is_none")]
    pub is_on: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub g: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub b: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hex: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brightness: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<u8>,
}

impl StateDelta {
    /// A full snapshot of every command-derived field.
    pub fn snapshot(state: &DeviceState) -> Self {
        Self {
            is_on: Some(state.power),
            r: Some(state.color.r),
            g: Some(state.color.g),
            b: Some(state.color.b),
            hex: Some(state.color.hex()),
            brightness: Some(state.brightness),
            speed: Some(state.speed),
        }
    }

    pub fn speed(value: u8) -> Self {
        Self {
            speed: Some(value),
            ..Self::default()
        }
    }
}

/// A schedule entry as shown to transports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleView {
    pub id: u32,
    pub spec: String,
    pub command: String,
}
