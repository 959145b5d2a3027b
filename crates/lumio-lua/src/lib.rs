//! Embedded Lua runtime for user-authored strip animations.
//!
//! A pattern is a Lua file driving the strip over time through a small
//! host API (`set_color`, `sleep`, `fade`, …). Two hard rules shape this
//! crate:
//!
//! 1. **At most one script runs at any instant.** A single dispatcher
//!    task owns the run/stop queue; any new command first cancels the
//!    incumbent and waits up to two seconds for it to exit.
//! 2. **A stop must be honoured within two seconds, even mid-sleep.**
//!    Every blocking wait inside a script goes through [`StopToken::sleep`],
//!    which wakes immediately on cancellation; an instruction-count hook
//!    aborts scripts that spin without sleeping.
//!
//! The VM is untrusted user input: it is built with only the math, string
//! and table libraries, so `io`, `os`, `require` and `debug` never exist.

mod bindings;
mod effects;
mod error;
mod patterns;
mod token;
mod worker;

pub use error::PatternError;
pub use patterns::PatternStore;
pub use token::StopToken;
pub use worker::{MinuteClock, ScriptWorker, WorkerHandle, STOP_GRACE};
