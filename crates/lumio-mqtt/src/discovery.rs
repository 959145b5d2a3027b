//! Home Assistant MQTT discovery document.
//!
//! The JSON layout is a wire contract with Home Assistant's MQTT light
//! integration; the rest of the agent treats it as opaque.

use serde_json::{json, Value};

/// Strips a client id down to the characters HA accepts in object ids.
fn safe_id(client_id: &str) -> String {
    client_id
        .chars()
        .map(|c| if c == ' ' { '_' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

/// Retained topic the discovery document is published on.
pub(crate) fn config_topic(ha_prefix: &str, client_id: &str) -> String {
    format!("{ha_prefix}/light/{}/light/config", safe_id(client_id))
}

/// Builds the light entity document for one strip.
pub(crate) fn light_entity(
    prefix: &str,
    client_id: &str,
    version: &str,
    patterns: &[String],
) -> Value {
    let id = safe_id(client_id);
    json!({
        "name": "Light",
        "unique_id": format!("{id}_light"),
        "object_id": id,
        "icon": "mdi:led-strip",

        "command_topic": format!("{prefix}/power/set"),
        "state_topic": format!("{prefix}/power/state"),

        "brightness_command_topic": format!("{prefix}/brightness/set"),
        "brightness_state_topic": format!("{prefix}/brightness/state"),
        "brightness_scale": 100,

        "rgb_command_topic": format!("{prefix}/color/set"),
        "rgb_state_topic": format!("{prefix}/color/state"),

        "effect_command_topic": format!("{prefix}/pattern/run"),
        "effect_state_topic": format!("{prefix}/pattern/state"),
        "effect_list": patterns,

        "availability_mode": "all",
        "availability": [
            {
                "topic": format!("{prefix}/availability"),
                "payload_available": "online",
                "payload_not_available": "offline",
            },
            {
                "topic": format!("{prefix}/connection"),
                "payload_available": "connected",
                "payload_not_available": "disconnected",
            },
        ],

        "device": {
            "identifiers": [id],
            "name": "lumio",
            "manufacturer": "lumio",
            "model": "BLEDOM BLE agent",
            "sw_version": version,
        },
    })
}
