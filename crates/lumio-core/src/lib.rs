//! Core types for the lumio agent.
//!
//! Everything that the individual components (BLE link, script worker,
//! scheduler, transports) need to talk to each other lives here:
//!
//! - [`Command`]: the envelope entering the orchestrator. All external
//!   inputs (WebSocket, MQTT, cron firings) are parsed into a `Command`
//!   and pushed onto a single channel that the orchestrator consumes
//!   serially.
//! - [`Event`]: the envelope leaving the orchestrator and the long-lived
//!   components, broadcast over the [`EventBus`].
//! - [`StateStore`]: the single authoritative snapshot of the device's
//!   intended state.
//!
//! # Data Flow
//!
//! ```text
//!  WebSocket ─┐                       ┌──► BLE Link ──► strip
//!  MQTT ──────┼─► Command channel ──► │
//!  Scheduler ─┘    (single consumer)  └──► Script Worker
//!                        │                      │
//!                   Orchestrator          (frames via the
//!                        │                 BLE handle)
//!                        ▼
//!                   State Store
//!                        │
//!                        ▼
//!                    Event Bus ──► WebSocket hub, MQTT bridge,
//!                                  Orchestrator (link/pattern events)
//! ```
//!
//! # Ownership
//!
//! Components hold a handle to the bus but never a reference to each
//! other; the bus is the only back-channel. This keeps the dependency
//! graph acyclic even though, at runtime, events flow in both directions.

mod bus;
mod command;
mod event;
mod state;

pub use bus::{EventBus, Subscription, SUBSCRIBER_BUFFER};
pub use command::{Command, CommandSender};
pub use event::{Event, EventKind, ScheduleView, StateDelta};
pub use state::{DeviceState, Rgb, StateStore};
