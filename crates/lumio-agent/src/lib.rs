//! Agent assembly: configuration, cron scheduler, orchestrator, wiring.
//!
//! The [`Orchestrator`] is the heart of the system: the single consumer
//! of the command channel and the only place that decides whether an
//! imperative command pre-empts a running pattern. Everything else here
//! is plumbing: [`AgentConfig`] loads `config.json`, the [`Scheduler`]
//! turns cron firings into commands, and [`Agent`] spawns the whole task
//! tree under one cancellation token.

mod agent;
mod config;
mod orchestrator;
mod schedule;

pub use agent::Agent;
pub use config::{AgentConfig, ConfigError};
pub use orchestrator::Orchestrator;
pub use schedule::{parse_schedule_command, CronEntry, CronTab, ScheduleError, Scheduler};
