//! The single command consumer.
//!
//! Every policy decision lives here so it can be tested in isolation and
//! exists exactly once. Earlier revisions of this system duplicated the
//! pre-emption rule in each transport, and simultaneous UI + MQTT traffic
//! produced inconsistent state.
//!
//! # Pre-emption rule
//!
//! An incoming `setPower` or `setColor` stops a running script only if it
//! changes the corresponding field. `setBrightness` and `setSpeed` never
//! stop scripts; dragging the brightness slider while an animation runs
//! just changes its ceiling. `setHardwareEffect` always stops scripts.

use std::sync::Arc;

use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use lumio_ble::BleHandle;
use lumio_core::{Command, Event, EventBus, EventKind, Rgb, StateDelta, StateStore};
use lumio_lua::{PatternStore, WorkerHandle};

use crate::schedule::CronTab;

pub struct Orchestrator {
    commands: mpsc::Receiver<Command>,
    store: Arc<StateStore>,
    bus: Arc<EventBus>,
    ble: BleHandle,
    worker: WorkerHandle,
    patterns: PatternStore,
    crontab: Arc<CronTab>,
    schedule_changed: Arc<Notify>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        commands: mpsc::Receiver<Command>,
        store: Arc<StateStore>,
        bus: Arc<EventBus>,
        ble: BleHandle,
        worker: WorkerHandle,
        patterns: PatternStore,
        crontab: Arc<CronTab>,
        schedule_changed: Arc<Notify>,
    ) -> Self {
        Self {
            commands,
            store,
            bus,
            ble,
            worker,
            patterns,
            crontab,
            schedule_changed,
        }
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut events = self.bus.subscribe(&[EventKind::Link, EventKind::Pattern]);
        info!("orchestrator ready");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
            }
        }

        self.bus.unsubscribe(events.id());
        info!("orchestrator stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        debug!(?command, "handling command");
        let current = self.store.snapshot();

        match command {
            Command::SetPower { is_on } => {
                if current.power == is_on {
                    debug!(is_on, "power unchanged, pattern keeps running");
                } else {
                    self.worker.stop().await;
                }
                self.store.set_power(is_on);
                self.ble.set_power(is_on);
                self.bus.publish(Event::PowerChanged { is_on });
            }

            Command::SetColor { r, g, b } => {
                let color = Rgb::new(r, g, b);
                if current.color == color {
                    debug!(hex = %color.hex(), "color unchanged, pattern keeps running");
                } else {
                    self.worker.stop().await;
                }
                self.store.set_color(color);
                self.ble.set_color(r, g, b);
                self.bus.publish(Event::ColorChanged {
                    r,
                    g,
                    b,
                    hex: color.hex(),
                });
            }

            Command::SetBrightness { value } => {
                if !(1..=100).contains(&value) {
                    warn!(value, "brightness out of range, dropping command");
                    return;
                }
                self.store.set_brightness(value);
                self.ble.set_brightness(value);
                self.bus.publish(Event::BrightnessChanged { value });
            }

            Command::SetSpeed { value } => {
                if value > 100 {
                    warn!(value, "speed out of range, dropping command");
                    return;
                }
                self.store.set_speed(value);
                self.ble.set_speed(value);
                self.bus
                    .publish(Event::StateChanged(StateDelta::speed(value)));
            }

            Command::SetHardwareEffect { id } => {
                if id > 28 {
                    warn!(id, "hardware effect out of range, dropping command");
                    return;
                }
                if !current.running_pattern.is_empty() {
                    info!(
                        pattern = %current.running_pattern,
                        "hardware effect requested, stopping pattern"
                    );
                }
                self.worker.stop().await;
                self.ble.set_hardware_effect(id);
            }

            Command::SyncTime => self.ble.sync_time(),

            Command::SetRgbOrder { v1, v2, v3 } => self.ble.set_rgb_order(v1, v2, v3),

            Command::SetDeviceSchedule {
                hour,
                minute,
                second,
                weekdays,
                is_on,
                is_set,
            } => {
                if hour > 23 || minute > 59 || second > 59 || weekdays > 0x7F {
                    warn!(hour, minute, second, weekdays, "device schedule out of range");
                    return;
                }
                self.ble
                    .set_device_schedule(hour, minute, second, weekdays, is_on, is_set);
            }

            Command::RunPattern { name } => self.worker.run_pattern(name).await,

            Command::StopPattern => self.worker.stop().await,

            Command::RunLua { code } => self.worker.run_inline(code).await,

            Command::AddSchedule { spec, command } => {
                match self.crontab.add(&spec, &command) {
                    Ok(_) => {
                        self.schedule_changed.notify_one();
                        self.publish_schedules();
                    }
                    Err(e) => warn!(error = %e, "rejecting schedule"),
                }
            }

            Command::RemoveSchedule { id } => {
                if self.crontab.remove(id) {
                    self.schedule_changed.notify_one();
                    self.publish_schedules();
                } else {
                    warn!(id, "no such schedule");
                }
            }

            Command::GetPatternCode { name } => match self.patterns.read(&name) {
                Ok(code) => self.bus.publish(Event::PatternCode {
                    name,
                    code: Some(code),
                }),
                Err(e) => {
                    warn!(pattern = %name, error = %e, "cannot read pattern");
                    self.bus.publish(Event::PatternCode { name, code: None });
                }
            },

            Command::SavePatternCode { name, code } => {
                match self.patterns.save(&name, &code) {
                    Ok(()) => self.publish_patterns(),
                    Err(e) => warn!(pattern = %name, error = %e, "cannot save pattern"),
                }
            }

            Command::DeletePattern { name } => match self.patterns.delete(&name) {
                Ok(()) => self.publish_patterns(),
                Err(e) => warn!(pattern = %name, error = %e, "cannot delete pattern"),
            },
        }
    }

    async fn handle_event(&mut self, event: Event) {
        match event {
            Event::LinkChanged { up, rssi } => {
                let was_up = self.store.snapshot().link_up;
                self.store.set_link(up, rssi);

                if up && !was_up {
                    self.replay_intent();
                    let pattern = self.store.snapshot().running_pattern;
                    if !pattern.is_empty() {
                        info!(pattern = %pattern, "link restored, resuming pattern");
                        self.worker.run_pattern(pattern).await;
                    }
                }
            }

            Event::PatternChanged { running } => {
                self.store.set_running_pattern(running.clone());
                if running.is_empty() {
                    // The pattern may have left the strip in arbitrary
                    // colors; rebroadcast the last commanded intent so
                    // every view resyncs.
                    let snapshot = self.store.snapshot();
                    self.bus
                        .publish(Event::StateChanged(StateDelta::snapshot(&snapshot)));
                }
            }

            _ => {}
        }
    }

    /// Pushes the stored intent back to the strip after a reconnect.
    fn replay_intent(&self) {
        let state = self.store.snapshot();
        self.ble.set_power(state.power);
        self.ble.set_color(state.color.r, state.color.g, state.color.b);
        self.ble.set_brightness(state.brightness);
        self.ble.set_speed(state.speed);
    }

    fn publish_schedules(&self) {
        self.bus.publish(Event::ScheduleList(self.crontab.entries()));
    }

    fn publish_patterns(&self) {
        let names = self.patterns.list().unwrap_or_default();
        self.bus.publish(Event::PatternList(names));
    }
}
