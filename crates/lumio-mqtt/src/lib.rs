//! MQTT bridge for the lumio agent.
//!
//! Config-gated and fully optional: when enabled it mirrors device state
//! onto retained topics under a configurable prefix, accepts commands on
//! the matching `…/set` topics, and announces a Home-Assistant light
//! entity via MQTT discovery. A Last-Will message flips
//! `<prefix>/availability` to `offline` if the agent dies uncleanly.
//!
//! Like the WebSocket hub, the bridge only translates: inbound payloads
//! become [`lumio_core::Command`]s, outbound [`lumio_core::Event`]s become
//! publishes. All policy stays in the orchestrator.

mod bridge;
mod discovery;

pub use bridge::{broker_addr, BridgeConfig, BridgeError, MqttBridge};
