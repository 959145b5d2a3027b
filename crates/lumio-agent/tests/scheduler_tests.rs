//! Scheduler integration: firing entries become commands on the
//! orchestrator channel. Specs with a seconds field keep these tests
//! fast; standard 5-field specs are covered by the unit tests.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use lumio_agent::{CronTab, Scheduler};
use lumio_core::Command;

struct Fixture {
    crontab: Arc<CronTab>,
    changed: Arc<Notify>,
    commands: mpsc::Receiver<Command>,
    shutdown: CancellationToken,
    _dir: tempfile::TempDir,
}

fn fixture() -> Fixture {
    let dir = tempfile::TempDir::new().expect("tempdir");
    let crontab = Arc::new(CronTab::load(dir.path().join("schedules.json")));
    let changed = Arc::new(Notify::new());
    let (tx, rx) = mpsc::channel(8);
    let shutdown = CancellationToken::new();

    let scheduler = Scheduler::new(Arc::clone(&crontab), tx, Arc::clone(&changed));
    tokio::spawn(scheduler.run(shutdown.clone()));

    Fixture {
        crontab,
        changed,
        commands: rx,
        shutdown,
        _dir: dir,
    }
}

#[tokio::test]
async fn due_entry_emits_its_command() {
    let mut fx = fixture();
    // Six fields: fires every second.
    fx.crontab.add("* * * * * *", "power on").unwrap();
    fx.changed.notify_one();

    let command = timeout(Duration::from_secs(3), fx.commands.recv())
        .await
        .expect("fires within 3s")
        .expect("channel alive");
    assert_eq!(command, Command::SetPower { is_on: true });
    fx.shutdown.cancel();
}

#[tokio::test]
async fn adding_an_entry_wakes_a_parked_evaluator() {
    let mut fx = fixture();

    // Let the evaluator park on an empty table first.
    tokio::time::sleep(Duration::from_millis(100)).await;
    fx.crontab
        .add("* * * * * *", "pattern sunrise.lua")
        .unwrap();
    fx.changed.notify_one();

    let command = timeout(Duration::from_secs(3), fx.commands.recv())
        .await
        .expect("fires within 3s")
        .expect("channel alive");
    assert_eq!(
        command,
        Command::RunPattern {
            name: "sunrise.lua".into()
        }
    );
    fx.shutdown.cancel();
}

#[tokio::test]
async fn inline_lua_entries_carry_their_source() {
    let mut fx = fixture();
    fx.crontab
        .add("* * * * * *", "lua set_power(true) sleep(50)")
        .unwrap();
    fx.changed.notify_one();

    let command = timeout(Duration::from_secs(3), fx.commands.recv())
        .await
        .expect("fires within 3s")
        .expect("channel alive");
    assert_eq!(
        command,
        Command::RunLua {
            code: "set_power(true) sleep(50)".into()
        }
    );
    fx.shutdown.cancel();
}

#[tokio::test]
async fn unrecognised_command_text_emits_nothing() {
    let mut fx = fixture();
    fx.crontab.add("* * * * * *", "dance party").unwrap();
    fx.changed.notify_one();

    // The entry fires every second but never parses into a command.
    assert!(
        timeout(Duration::from_millis(2500), fx.commands.recv())
            .await
            .is_err(),
        "no command should be emitted"
    );
    fx.shutdown.cancel();
}
