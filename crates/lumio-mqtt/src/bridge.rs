//! The bridge task: broker session, topic routing, event mirroring.

use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event as MqttEvent, LastWill, MqttOptions, Packet, QoS};
use serde::Deserialize;
use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use lumio_core::{Command, CommandSender, Event, EventBus, EventKind};
use lumio_lua::PatternStore;

use crate::discovery;

const KEEP_ALIVE: Duration = Duration::from_secs(10);
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("invalid mqtt broker address '{0}'")]
    InvalidBroker(String),
}

/// MQTT section of the agent configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeConfig {
    pub enabled: bool,
    /// `mqtt://host:port` (scheme optional, port defaults to 1883).
    pub broker: String,
    pub username: String,
    pub password: String,
    pub client_id: String,
    pub topic_prefix: String,
    pub ha_discovery_enabled: bool,
    pub ha_discovery_prefix: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            broker: "mqtt://localhost:1883".into(),
            username: String::new(),
            password: String::new(),
            client_id: "lumio".into(),
            topic_prefix: "lumio".into(),
            ha_discovery_enabled: false,
            ha_discovery_prefix: "homeassistant".into(),
        }
    }
}

/// Splits a broker URL into host and port.
pub fn broker_addr(broker: &str) -> Result<(String, u16), BridgeError> {
    let rest = broker
        .strip_prefix("mqtt://")
        .or_else(|| broker.strip_prefix("tcp://"))
        .unwrap_or(broker);
    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => (
            host,
            port.parse::<u16>()
                .map_err(|_| BridgeError::InvalidBroker(broker.to_string()))?,
        ),
        None => (rest, 1883),
    };
    if host.is_empty() {
        return Err(BridgeError::InvalidBroker(broker.to_string()));
    }
    Ok((host.to_string(), port))
}

/// The bridge task.
pub struct MqttBridge {
    config: BridgeConfig,
    prefix: String,
    bus: Arc<EventBus>,
    commands: CommandSender,
    patterns: PatternStore,
}

impl MqttBridge {
    pub fn new(
        config: BridgeConfig,
        bus: Arc<EventBus>,
        commands: CommandSender,
        patterns: PatternStore,
    ) -> Result<Self, BridgeError> {
        broker_addr(&config.broker)?;
        let prefix = config.topic_prefix.trim_end_matches('/').to_string();
        Ok(Self {
            config,
            prefix,
            bus,
            commands,
            patterns,
        })
    }

    fn topic(&self, subtopic: &str) -> String {
        format!("{}/{}", self.prefix, subtopic)
    }

    pub async fn run(self, shutdown: CancellationToken) {
        // Validated in new().
        let Ok((host, port)) = broker_addr(&self.config.broker) else {
            return;
        };

        let mut options = MqttOptions::new(self.config.client_id.clone(), host, port);
        options.set_keep_alive(KEEP_ALIVE);
        if !self.config.username.is_empty() {
            options.set_credentials(self.config.username.clone(), self.config.password.clone());
        }
        options.set_last_will(LastWill::new(
            self.topic("availability"),
            "offline",
            QoS::AtLeastOnce,
            true,
        ));

        let (client, mut eventloop) = AsyncClient::new(options, 16);
        let mut events = self.bus.subscribe(&[
            EventKind::Link,
            EventKind::State,
            EventKind::Pattern,
            EventKind::Power,
            EventKind::Color,
            EventKind::Brightness,
        ]);
        let mut backoff = INITIAL_BACKOFF;

        info!(broker = %self.config.broker, "mqtt bridge starting");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    // Flip availability before the clean disconnect; the
                    // last will only covers unclean deaths.
                    let _ = client
                        .publish(self.topic("availability"), QoS::AtLeastOnce, true, "offline")
                        .await;
                    let _ = client.disconnect().await;
                    break;
                }
                polled = eventloop.poll() => match polled {
                    Ok(MqttEvent::Incoming(Packet::ConnAck(_))) => {
                        backoff = INITIAL_BACKOFF;
                        self.on_connect(&client).await;
                    }
                    Ok(MqttEvent::Incoming(Packet::Publish(publish))) => {
                        self.handle_publish(&publish.topic, &publish.payload).await;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt connection error, backing off");
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            _ = sleep(backoff) => {}
                        }
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                    }
                },
                event = events.recv() => {
                    let Some(event) = event else { break };
                    self.forward(&client, &event).await;
                }
            }
        }
        self.bus.unsubscribe(events.id());
        info!("mqtt bridge stopped");
    }

    async fn on_connect(&self, client: &AsyncClient) {
        info!("mqtt connected");
        for subtopic in [
            "power/set",
            "brightness/set",
            "color/set",
            "pattern/run",
            "pattern/stop",
        ] {
            if let Err(e) = client.subscribe(self.topic(subtopic), QoS::AtLeastOnce).await {
                warn!(topic = subtopic, error = %e, "mqtt subscribe failed");
            }
        }
        self.publish(client, "availability", "online", true).await;
        if self.config.ha_discovery_enabled {
            self.publish_discovery(client).await;
        }
    }

    async fn publish_discovery(&self, client: &AsyncClient) {
        let patterns = self.patterns.list().unwrap_or_default();
        let entity = discovery::light_entity(
            &self.prefix,
            &self.config.client_id,
            env!("CARGO_PKG_VERSION"),
            &patterns,
        );
        let topic =
            discovery::config_topic(&self.config.ha_discovery_prefix, &self.config.client_id);
        let Ok(payload) = serde_json::to_vec(&entity) else {
            return;
        };
        match client
            .publish(topic.clone(), QoS::AtLeastOnce, true, payload)
            .await
        {
            Ok(()) => info!(topic, "home assistant discovery published"),
            Err(e) => warn!(topic, error = %e, "discovery publish failed"),
        }
    }

    async fn handle_publish(&self, topic: &str, payload: &[u8]) {
        let Some(subtopic) = topic
            .strip_prefix(self.prefix.as_str())
            .and_then(|t| t.strip_prefix('/'))
        else {
            return;
        };
        let Some(command) = command_for(subtopic, payload) else {
            debug!(topic, "dropping unusable mqtt payload");
            return;
        };
        if self.commands.send(command).await.is_err() {
            warn!("command channel closed, dropping mqtt command");
        }
    }

    async fn forward(&self, client: &AsyncClient, event: &Event) {
        match event {
            Event::LinkChanged { up, rssi } => {
                let status = if *up { "connected" } else { "disconnected" };
                self.publish(client, "connection", status, true).await;
                if *up {
                    self.publish(client, "rssi", rssi.to_string(), false).await;
                }
            }
            Event::StateChanged(delta) => {
                if let Some(is_on) = delta.is_on {
                    self.publish(client, "power/state", power_payload(is_on), true)
                        .await;
                }
                if let Some(brightness) = delta.brightness {
                    self.publish(client, "brightness/state", brightness.to_string(), true)
                        .await;
                }
                if let (Some(r), Some(g), Some(b)) = (delta.r, delta.g, delta.b) {
                    self.publish(client, "color/state", format!("{r},{g},{b}"), true)
                        .await;
                }
            }
            Event::PatternChanged { running } => {
                let state = if running.is_empty() {
                    "IDLE"
                } else {
                    running.as_str()
                };
                self.publish(client, "pattern/state", state, true).await;
            }
            Event::PowerChanged { is_on } => {
                self.publish(client, "power/state", power_payload(*is_on), true)
                    .await;
            }
            Event::ColorChanged { r, g, b, .. } => {
                self.publish(client, "color/state", format!("{r},{g},{b}"), true)
                    .await;
            }
            Event::BrightnessChanged { value } => {
                self.publish(client, "brightness/state", value.to_string(), true)
                    .await;
            }
            _ => {}
        }
    }

    async fn publish(
        &self,
        client: &AsyncClient,
        subtopic: &str,
        payload: impl Into<Vec<u8>>,
        retain: bool,
    ) {
        let topic = self.topic(subtopic);
        if let Err(e) = client
            .publish(topic.clone(), QoS::AtLeastOnce, retain, payload.into())
            .await
        {
            warn!(topic, error = %e, "mqtt publish failed");
        }
    }
}

fn power_payload(is_on: bool) -> &'static str {
    if is_on {
        "ON"
    } else {
        "OFF"
    }
}

/// Translates a `<prefix>`-relative topic and payload into a command.
fn command_for(subtopic: &str, payload: &[u8]) -> Option<Command> {
    let text = std::str::from_utf8(payload).ok()?;
    match subtopic {
        "power/set" => match text.trim().to_ascii_lowercase().as_str() {
            "on" | "true" | "1" => Some(Command::SetPower { is_on: true }),
            "off" | "false" | "0" => Some(Command::SetPower { is_on: false }),
            _ => None,
        },
        "brightness/set" => text
            .trim()
            .parse::<u8>()
            .ok()
            .map(|value| Command::SetBrightness { value }),
        "color/set" => parse_color(text).map(|(r, g, b)| Command::SetColor { r, g, b }),
        "pattern/run" => {
            let name = text.trim();
            (!name.is_empty()).then(|| Command::RunPattern { name: name.into() })
        }
        "pattern/stop" => Some(Command::StopPattern),
        _ => None,
    }
}

/// Accepts `#RRGGBB`, bare `RRGGBB`, `r,g,b`, or `{"r":..,"g":..,"b":..}`.
fn parse_color(text: &str) -> Option<(u8, u8, u8)> {
    let text = text.trim();

    if let Some(hex) = text.strip_prefix('#') {
        return parse_hex(hex);
    }
    if text.len() == 6 && text.chars().all(|c| c.is_ascii_hexdigit()) {
        return parse_hex(text);
    }
    if text.starts_with('{') {
        #[derive(Deserialize)]
        struct JsonColor {
            r: u8,
            g: u8,
            b: u8,
        }
        return serde_json::from_str::<JsonColor>(text)
            .ok()
            .map(|c| (c.r, c.g, c.b));
    }

    let mut parts = text.split(',');
    let r = parts.next()?.trim().parse().ok()?;
    let g = parts.next()?.trim().parse().ok()?;
    let b = parts.next()?.trim().parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((r, g, b))
}

fn parse_hex(hex: &str) -> Option<(u8, u8, u8)> {
    if hex.len() != 6 {
        return None;
    }
    let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
    let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
    let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
    Some((r, g, b))
}
