//! The singleton script dispatcher.
//!
//! One async task consumes a small command channel; at most one script
//! thread exists at any instant. Every incoming command first cancels the
//! incumbent script and waits up to [`STOP_GRACE`] for it to exit; a
//! script that overstays is abandoned (it still observes its token at the
//! next suspension point or instruction-count check) and the dispatcher
//! moves on.

use std::sync::Arc;
use std::time::Duration;

use mlua::{HookTriggers, Lua, LuaOptions, StdLib, VmState};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use lumio_ble::BleHandle;
use lumio_core::{Event, EventBus};

use crate::bindings::{self, ScriptEnv};
use crate::patterns::PatternStore;
use crate::token::StopToken;

/// How long a cancelled script may take to exit before being abandoned.
pub const STOP_GRACE: Duration = Duration::from_secs(2);

/// Instructions between cancellation checks; keeps busy loops killable.
const HOOK_INTERVAL: u32 = 4096;

/// Running name reported for inline chunks.
const INLINE_NAME: &str = "inline";

const COMMAND_BUFFER: usize = 10;

/// Clock handed to scripts as `minute_of_day()`; injectable for tests.
pub type MinuteClock = Arc<dyn Fn() -> u32 + Send + Sync>;

enum WorkerCmd {
    RunFile { name: String },
    RunInline { code: String },
    Stop { done: oneshot::Sender<()> },
}

/// Sending side of the dispatcher.
#[derive(Clone)]
pub struct WorkerHandle {
    tx: mpsc::Sender<WorkerCmd>,
}

impl WorkerHandle {
    pub async fn run_pattern(&self, name: impl Into<String>) {
        let cmd = WorkerCmd::RunFile { name: name.into() };
        if self.tx.send(cmd).await.is_err() {
            warn!("script worker gone, dropping run request");
        }
    }

    pub async fn run_inline(&self, code: impl Into<String>) {
        let cmd = WorkerCmd::RunInline { code: code.into() };
        if self.tx.send(cmd).await.is_err() {
            warn!("script worker gone, dropping run request");
        }
    }

    /// Stops the running script, returning once it has exited (or the
    /// grace period expired).
    pub async fn stop(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        let cmd = WorkerCmd::Stop { done: done_tx };
        if self.tx.send(cmd).await.is_ok() {
            let _ = done_rx.await;
        }
    }
}

struct RunningScript {
    token: StopToken,
    done: oneshot::Receiver<()>,
}

/// The dispatcher task state.
pub struct ScriptWorker {
    rx: mpsc::Receiver<WorkerCmd>,
    ble: BleHandle,
    patterns: PatternStore,
    bus: Arc<EventBus>,
    clock: MinuteClock,
}

impl ScriptWorker {
    pub fn new(
        ble: BleHandle,
        patterns: PatternStore,
        bus: Arc<EventBus>,
    ) -> (WorkerHandle, Self) {
        Self::with_clock(ble, patterns, bus, bindings::local_minute_clock())
    }

    /// Like [`new`](Self::new) with a custom `minute_of_day` source.
    pub fn with_clock(
        ble: BleHandle,
        patterns: PatternStore,
        bus: Arc<EventBus>,
        clock: MinuteClock,
    ) -> (WorkerHandle, Self) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        (
            WorkerHandle { tx },
            Self {
                rx,
                ble,
                patterns,
                bus,
                clock,
            },
        )
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut current: Option<RunningScript> = None;

        loop {
            let cmd = tokio::select! {
                _ = shutdown.cancelled() => break,
                cmd = self.rx.recv() => match cmd {
                    Some(cmd) => cmd,
                    None => break,
                },
            };

            cancel_script(current.take()).await;

            match cmd {
                WorkerCmd::Stop { done } => {
                    let _ = done.send(());
                }
                WorkerCmd::RunFile { name } => match self.patterns.read(&name) {
                    Ok(code) => current = Some(self.spawn_script(name, code)),
                    Err(e) => {
                        warn!(pattern = %name, error = %e, "cannot load pattern");
                        self.bus.publish(Event::PatternChanged {
                            running: String::new(),
                        });
                    }
                },
                WorkerCmd::RunInline { code } => {
                    current = Some(self.spawn_script(INLINE_NAME.to_string(), code));
                }
            }
        }

        cancel_script(current.take()).await;
    }

    fn spawn_script(&self, name: String, code: String) -> RunningScript {
        let token = StopToken::new();
        let env = ScriptEnv {
            ble: self.ble.clone(),
            token: token.clone(),
            clock: Arc::clone(&self.clock),
        };
        let bus = Arc::clone(&self.bus);
        let (done_tx, done_rx) = oneshot::channel();

        tokio::task::spawn_blocking(move || {
            info!(pattern = %name, "pattern starting");
            bus.publish(Event::PatternChanged {
                running: name.clone(),
            });

            match run_chunk(&env, &name, &code) {
                Ok(()) => info!(pattern = %name, "pattern finished"),
                Err(_) if env.token.is_cancelled() => {
                    info!(pattern = %name, "pattern cancelled");
                }
                Err(e) => warn!(pattern = %name, error = %e, "pattern failed"),
            }

            bus.publish(Event::PatternChanged {
                running: String::new(),
            });
            let _ = done_tx.send(());
        });

        RunningScript {
            token,
            done: done_rx,
        }
    }
}

async fn cancel_script(current: Option<RunningScript>) {
    let Some(script) = current else { return };
    script.token.cancel();
    if timeout(STOP_GRACE, script.done).await.is_err() {
        warn!("script did not stop within the grace period, abandoning it");
    }
}

/// Builds a restricted VM and runs one chunk to completion.
fn run_chunk(env: &ScriptEnv, name: &str, code: &str) -> mlua::Result<()> {
    let lua = Lua::new_with(
        StdLib::MATH | StdLib::STRING | StdLib::TABLE,
        LuaOptions::default(),
    )?;
    bindings::install(&lua, env)?;

    let hook_token = env.token.clone();
    lua.set_hook(
        HookTriggers::new().every_nth_instruction(HOOK_INTERVAL),
        move |_lua, _debug| {
            if hook_token.is_cancelled() {
                Err(mlua::Error::RuntimeError("script cancelled".into()))
            } else {
                Ok(VmState::Continue)
            }
        },
    );

    lua.load(code).set_name(name).exec()
}
