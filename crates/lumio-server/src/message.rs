//! Wire envelope and the event → tag mapping.

use serde::Serialize;
use serde_json::{json, Value};

use lumio_core::Event;

/// Outgoing message: `{"type": <tag>, "payload": {...}}`.
#[derive(Debug, Clone, Serialize)]
pub struct WireMessage {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub payload: Value,
}

impl WireMessage {
    pub fn new(kind: &'static str, payload: Value) -> Self {
        Self { kind, payload }
    }
}

/// Maps a bus event to its wire form.
pub fn event_message(event: &Event) -> WireMessage {
    match event {
        Event::LinkChanged { up, rssi } => WireMessage::new(
            "ble_status",
            json!({ "connected": up, "rssi": rssi }),
        ),
        Event::StateChanged(delta) => WireMessage::new(
            "device_state",
            serde_json::to_value(delta).unwrap_or_default(),
        ),
        Event::PatternChanged { running } => {
            WireMessage::new("pattern_status", json!({ "running": running }))
        }
        Event::PowerChanged { is_on } => {
            WireMessage::new("power_update", json!({ "isOn": is_on }))
        }
        Event::ColorChanged { r, g, b, hex } => WireMessage::new(
            "color_update",
            json!({ "r": r, "g": g, "b": b, "hex": hex }),
        ),
        Event::BrightnessChanged { value } => {
            WireMessage::new("brightness_update", json!({ "value": value }))
        }
        Event::PatternList(names) => WireMessage::new("pattern_list", json!(names)),
        Event::PatternCode { name, code } => {
            // A missing `code` field is the error signal for the client.
            let mut payload = json!({ "name": name });
            if let (Some(code), Some(obj)) = (code, payload.as_object_mut()) {
                obj.insert("code".into(), json!(code));
            }
            WireMessage::new("pattern_code", payload)
        }
        Event::ScheduleList(entries) => WireMessage::new(
            "schedule_list",
            serde_json::to_value(entries).unwrap_or_default(),
        ),
    }
}
