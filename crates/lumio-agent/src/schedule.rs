//! Cron schedules: persistent store plus the evaluator task.
//!
//! Entries live in a JSON object mapping stringified ids to
//! `{spec, command}` and are rewritten atomically on every mutation. Ids
//! are reassigned on reload; they are not portable across restarts.
//!
//! The `cron` crate does the expression parsing (it wants a seconds
//! field, so standard 5-field specs get `0 ` prepended); the evaluator
//! loop here just sleeps until the earliest upcoming match and turns the
//! fired entry's command text into [`Command`]s.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use cron::Schedule;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use lumio_core::{Command, CommandSender, ScheduleView};

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("invalid cron spec '{spec}': {source}")]
    InvalidSpec {
        spec: String,
        source: cron::error::Error,
    },
}

/// A persisted schedule entry; the id is the map key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronEntry {
    pub spec: String,
    pub command: String,
}

/// Standard cron specs have five fields; the parser wants seconds too.
fn normalize_spec(spec: &str) -> String {
    if spec.split_whitespace().count() == 5 {
        format!("0 {spec}")
    } else {
        spec.to_string()
    }
}

fn parse_spec(spec: &str) -> Result<Schedule, ScheduleError> {
    Schedule::from_str(&normalize_spec(spec)).map_err(|source| ScheduleError::InvalidSpec {
        spec: spec.to_string(),
        source,
    })
}

#[derive(Debug, Default)]
struct Inner {
    entries: BTreeMap<u32, CronEntry>,
    next_id: u32,
}

/// In-memory schedule table with best-effort JSON persistence.
#[derive(Debug)]
pub struct CronTab {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl CronTab {
    /// Loads entries from `path`. Unreadable files and invalid specs are
    /// logged and skipped; ids are assigned fresh.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut inner = Inner {
            next_id: 1,
            ..Inner::default()
        };

        match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<BTreeMap<String, CronEntry>>(&raw) {
                Ok(saved) => {
                    for entry in saved.into_values() {
                        if let Err(e) = parse_spec(&entry.spec) {
                            warn!(error = %e, "skipping persisted schedule");
                            continue;
                        }
                        let id = inner.next_id;
                        inner.next_id += 1;
                        inner.entries.insert(id, entry);
                    }
                    info!(count = inner.entries.len(), "schedules loaded");
                }
                Err(e) => warn!(path = %path.display(), error = %e, "unreadable schedules file"),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "cannot read schedules file"),
        }

        Self {
            path,
            inner: Mutex::new(inner),
        }
    }

    /// Validates the spec, stores the entry and persists.
    pub fn add(&self, spec: &str, command: &str) -> Result<u32, ScheduleError> {
        parse_spec(spec)?;
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.entries.insert(
            id,
            CronEntry {
                spec: spec.to_string(),
                command: command.to_string(),
            },
        );
        self.persist(&inner);
        info!(id, spec, command, "schedule added");
        Ok(id)
    }

    /// Removes an entry; returns whether it existed.
    pub fn remove(&self, id: u32) -> bool {
        let mut inner = self.inner.lock();
        let removed = inner.entries.remove(&id).is_some();
        if removed {
            self.persist(&inner);
            info!(id, "schedule removed");
        }
        removed
    }

    pub fn entries(&self) -> Vec<ScheduleView> {
        self.inner
            .lock()
            .entries
            .iter()
            .map(|(id, entry)| ScheduleView {
                id: *id,
                spec: entry.spec.clone(),
                command: entry.command.clone(),
            })
            .collect()
    }

    /// The earliest upcoming fire time, with every command due then.
    pub fn next_firing(&self) -> Option<(DateTime<Local>, Vec<String>)> {
        let now = Local::now();
        let inner = self.inner.lock();
        let mut best: Option<DateTime<Local>> = None;
        let mut due: Vec<String> = Vec::new();

        for entry in inner.entries.values() {
            let Ok(schedule) = parse_spec(&entry.spec) else {
                continue;
            };
            let Some(next) = schedule.after(&now).next() else {
                continue;
            };
            match best {
                None => {
                    best = Some(next);
                    due.push(entry.command.clone());
                }
                Some(current) if next < current => {
                    best = Some(next);
                    due.clear();
                    due.push(entry.command.clone());
                }
                Some(current) if next == current => due.push(entry.command.clone()),
                Some(_) => {}
            }
        }

        best.map(|at| (at, due))
    }

    fn persist(&self, inner: &Inner) {
        let saved: BTreeMap<String, &CronEntry> = inner
            .entries
            .iter()
            .map(|(id, entry)| (id.to_string(), entry))
            .collect();
        let json = match serde_json::to_vec_pretty(&saved) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "cannot serialize schedules");
                return;
            }
        };
        let tmp = self.path.with_extension("tmp");
        if let Err(e) = fs::write(&tmp, &json).and_then(|()| fs::rename(&tmp, &self.path)) {
            warn!(path = %self.path.display(), error = %e, "cannot persist schedules");
        }
    }
}

/// Parses the schedule command grammar: `power on|off`,
/// `pattern <basename.lua>`, `lua <source…>`.
pub fn parse_schedule_command(text: &str) -> Option<Command> {
    let mut parts = text.split_whitespace();
    match parts.next()? {
        "power" => match parts.next() {
            Some("on") => Some(Command::SetPower { is_on: true }),
            Some("off") => Some(Command::SetPower { is_on: false }),
            _ => None,
        },
        "pattern" => parts.next().map(|name| Command::RunPattern {
            name: name.to_string(),
        }),
        "lua" => {
            let code = text.splitn(2, char::is_whitespace).nth(1)?.trim();
            (!code.is_empty()).then(|| Command::RunLua {
                code: code.to_string(),
            })
        }
        _ => None,
    }
}

/// The evaluator task: sleeps until the next match, emits commands.
pub struct Scheduler {
    crontab: Arc<CronTab>,
    commands: CommandSender,
    changed: Arc<Notify>,
}

impl Scheduler {
    pub fn new(crontab: Arc<CronTab>, commands: CommandSender, changed: Arc<Notify>) -> Self {
        Self {
            crontab,
            commands,
            changed,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!("cron scheduler started");
        loop {
            match self.crontab.next_firing() {
                None => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = self.changed.notified() => {}
                    }
                }
                Some((at, due)) => {
                    let wait = (at - Local::now()).to_std().unwrap_or(Duration::ZERO);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = self.changed.notified() => {}
                        _ = tokio::time::sleep(wait) => {
                            for text in due {
                                self.execute(&text).await;
                            }
                        }
                    }
                }
            }
        }
        info!("cron scheduler stopped");
    }

    async fn execute(&self, text: &str) {
        info!(command = text, "executing scheduled command");
        match parse_schedule_command(text) {
            Some(command) => {
                if self.commands.send(command).await.is_err() {
                    warn!("command channel closed, dropping scheduled command");
                }
            }
            None => warn!(command = text, "unrecognised scheduled command"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn five_field_specs_are_normalized() {
        assert_eq!(normalize_spec("*/5 * * * *"), "0 */5 * * * *");
        assert_eq!(normalize_spec("0 30 7 * * *"), "0 30 7 * * *");
        assert!(parse_spec("*/5 * * * *").is_ok());
        assert!(parse_spec("not a cron line").is_err());
    }

    #[test]
    fn grammar_parses_the_three_forms() {
        assert_eq!(
            parse_schedule_command("power on"),
            Some(Command::SetPower { is_on: true })
        );
        assert_eq!(
            parse_schedule_command("power off"),
            Some(Command::SetPower { is_on: false })
        );
        assert_eq!(
            parse_schedule_command("pattern sunrise.lua"),
            Some(Command::RunPattern {
                name: "sunrise.lua".into()
            })
        );
        assert_eq!(
            parse_schedule_command("lua set_power(true) sleep(100)"),
            Some(Command::RunLua {
                code: "set_power(true) sleep(100)".into()
            })
        );
    }

    #[test]
    fn grammar_rejects_malformed_lines() {
        assert_eq!(parse_schedule_command(""), None);
        assert_eq!(parse_schedule_command("power"), None);
        assert_eq!(parse_schedule_command("power maybe"), None);
        assert_eq!(parse_schedule_command("pattern"), None);
        assert_eq!(parse_schedule_command("lua"), None);
        assert_eq!(parse_schedule_command("dance"), None);
    }

    #[test]
    fn add_remove_and_list() {
        let dir = TempDir::new().unwrap();
        let crontab = CronTab::load(dir.path().join("schedules.json"));

        let id = crontab.add("*/5 * * * *", "power on").unwrap();
        assert_eq!(crontab.entries().len(), 1);
        assert!(crontab.remove(id));
        assert!(!crontab.remove(id));
        assert!(crontab.entries().is_empty());
    }

    #[test]
    fn invalid_spec_is_rejected() {
        let dir = TempDir::new().unwrap();
        let crontab = CronTab::load(dir.path().join("schedules.json"));
        assert!(crontab.add("every full moon", "power on").is_err());
        assert!(crontab.entries().is_empty());
    }

    #[test]
    fn entries_survive_reload_with_fresh_ids() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("schedules.json");

        let crontab = CronTab::load(&path);
        crontab.add("*/5 * * * *", "power on").unwrap();
        crontab.add("0 7 * * *", "pattern sunrise.lua").unwrap();
        drop(crontab);

        let reloaded = CronTab::load(&path);
        let entries = reloaded.entries();
        assert_eq!(entries.len(), 2);
        assert!(entries
            .iter()
            .any(|e| e.command == "pattern sunrise.lua" && e.spec == "0 7 * * *"));
        // Ids restart from 1 on reload.
        assert!(entries.iter().all(|e| e.id >= 1 && e.id <= 2));
    }

    #[test]
    fn persisted_file_maps_string_ids_to_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("schedules.json");
        let crontab = CronTab::load(&path);
        crontab.add("*/5 * * * *", "power on").unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let parsed: BTreeMap<String, CronEntry> = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["1"].command, "power on");
    }

    #[test]
    fn next_firing_is_in_the_future() {
        let dir = TempDir::new().unwrap();
        let crontab = CronTab::load(dir.path().join("schedules.json"));
        assert!(crontab.next_firing().is_none());

        crontab.add("* * * * *", "power on").unwrap();
        let (at, due) = crontab.next_firing().unwrap();
        assert!(at > Local::now());
        assert!(at <= Local::now() + chrono::Duration::seconds(61));
        assert_eq!(due, vec!["power on"]);
    }

    #[test]
    fn simultaneous_entries_fire_together() {
        let dir = TempDir::new().unwrap();
        let crontab = CronTab::load(dir.path().join("schedules.json"));
        crontab.add("* * * * *", "power on").unwrap();
        crontab.add("* * * * *", "pattern x.lua").unwrap();

        let (_, due) = crontab.next_firing().unwrap();
        assert_eq!(due.len(), 2);
    }
}
