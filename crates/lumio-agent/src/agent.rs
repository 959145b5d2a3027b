//! Component wiring and task supervision.

use std::sync::Arc;

use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use lumio_ble::{frame_channel, BleLink};
use lumio_core::{EventBus, StateStore};
use lumio_lua::{PatternStore, ScriptWorker};
use lumio_mqtt::MqttBridge;
use lumio_server::{ScheduleListFn, WebServer};

use crate::config::AgentConfig;
use crate::orchestrator::Orchestrator;
use crate::schedule::{CronTab, Scheduler};

const COMMAND_BUFFER: usize = 64;

/// Builds and runs the whole task tree.
///
/// Ownership is deliberately flat: components hold a bus handle and
/// whatever narrow channel they need, never each other. The orchestrator
/// reaches the BLE link and the script worker through their enqueue
/// handles, and both report back through the bus.
pub struct Agent {
    config: AgentConfig,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    /// Runs until `shutdown` is cancelled and every task has exited.
    pub async fn run(self, shutdown: CancellationToken) {
        let AgentConfig {
            server,
            ble,
            mqtt,
            patterns_dir,
            schedules_file,
        } = self.config;

        let bus = Arc::new(EventBus::new());
        let store = Arc::new(StateStore::new());
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);

        let (ble_handle, frames) = frame_channel(ble.queue_capacity());
        let link = BleLink::new(ble, Arc::clone(&bus), frames);

        let patterns = PatternStore::new(patterns_dir);
        let (worker_handle, worker) =
            ScriptWorker::new(ble_handle.clone(), patterns.clone(), Arc::clone(&bus));

        let crontab = Arc::new(CronTab::load(schedules_file));
        let schedule_changed = Arc::new(Notify::new());
        let scheduler = Scheduler::new(
            Arc::clone(&crontab),
            commands_tx.clone(),
            Arc::clone(&schedule_changed),
        );

        let schedules_view: ScheduleListFn = {
            let crontab = Arc::clone(&crontab);
            Arc::new(move || crontab.entries())
        };
        let web = WebServer::new(
            server,
            Arc::clone(&bus),
            Arc::clone(&store),
            commands_tx.clone(),
            patterns.clone(),
            schedules_view,
        );

        let orchestrator = Orchestrator::new(
            commands_rx,
            Arc::clone(&store),
            Arc::clone(&bus),
            ble_handle.clone(),
            worker_handle.clone(),
            patterns.clone(),
            Arc::clone(&crontab),
            Arc::clone(&schedule_changed),
        );

        let mut tasks = vec![
            tokio::spawn(link.run(shutdown.clone())),
            tokio::spawn(worker.run(shutdown.clone())),
            tokio::spawn(scheduler.run(shutdown.clone())),
            tokio::spawn(web.run(shutdown.clone())),
            tokio::spawn(orchestrator.run(shutdown.clone())),
        ];

        if mqtt.enabled {
            match MqttBridge::new(mqtt, Arc::clone(&bus), commands_tx.clone(), patterns) {
                Ok(bridge) => tasks.push(tokio::spawn(bridge.run(shutdown.clone()))),
                // Config validation rejects bad brokers before we get
                // here; a failure now is a programming error, not fatal.
                Err(e) => error!(error = %e, "mqtt bridge not started"),
            }
        }

        info!("agent running");
        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "task panicked");
            }
        }
        info!("agent stopped");
    }
}
