//! Web transport: static UI files plus the WebSocket hub.
//!
//! The hub is a thin translation layer. Inbound JSON envelopes become
//! [`lumio_core::Command`]s pushed onto the orchestrator's channel;
//! outbound [`lumio_core::Event`]s are mapped to wire tags and fanned out
//! to every connected socket. Policy (pre-emption, validation) lives in
//! the orchestrator; transports stay dumb on purpose.

mod hub;
mod message;
mod server;
mod ws;

pub use hub::Hub;
pub use message::{event_message, WireMessage};
pub use server::{ScheduleListFn, ServerConfig, WebServer};
