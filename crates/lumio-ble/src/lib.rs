//! BLE link management for BLEDOM-family LED strips.
//!
//! The strip speaks a fixed 9-byte frame protocol over a single
//! write-without-response characteristic.
//!
//! ```text
//!        ┌──────────────────────────────────────────────┐
//!        ▼                                              │ retryDelay
//!      Down ─► Scanning ─► Connecting ─► Discovering ───┤
//!                 │            │              │         │
//!                 │ timeout    │ timeout      │ failure │
//!                 └────────────┴──────────────┘         │
//!                                                       ▼
//!                              write error ◄────────  Ready
//!                              heartbeat miss         (drain queue,
//!                                                      heartbeat)
//! ```
//!
//! This crate owns:
//!
//! - [`frame`]: total encoders from semantic operations to raw frames.
//! - [`TokenBucket`]: the write rate limiter (default 25 frames/s,
//!   burst 25). Cheap strips lose frames when written to faster.
//! - [`BleLink`]: the supervision loop pictured above. It is the only
//!   holder of the write characteristic.
//! - [`BleHandle`]: the clone-able enqueue side handed to the
//!   orchestrator and the script worker. Enqueueing never awaits; a full
//!   queue drops the frame, since animation frames are idempotent in
//!   effect and best-effort by design.

pub mod frame;
mod limiter;
mod link;

pub use frame::Frame;
pub use limiter::TokenBucket;
pub use link::{frame_channel, BleHandle, BleLink, FrameReceiver, LinkConfig, LinkError};
