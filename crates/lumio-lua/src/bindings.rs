//! Host functions registered into every script VM.

use std::sync::Arc;
use std::time::Duration;

use chrono::Timelike;
use mlua::{Lua, MultiValue, Value};
use tracing::info;

use lumio_ble::BleHandle;
use lumio_core::Rgb;

use crate::effects;
use crate::token::StopToken;
use crate::worker::MinuteClock;

/// Everything a running script may touch.
#[derive(Clone)]
pub(crate) struct ScriptEnv {
    pub ble: BleHandle,
    pub token: StopToken,
    pub clock: MinuteClock,
}

/// The real wall clock, minutes since local midnight.
pub(crate) fn local_minute_clock() -> MinuteClock {
    Arc::new(|| {
        let now = chrono::Local::now();
        now.hour() * 60 + now.minute()
    })
}

fn channel(value: i64) -> u8 {
    value.clamp(0, 255) as u8
}

fn rgb(r: i64, g: i64, b: i64) -> Rgb {
    Rgb::new(channel(r), channel(g), channel(b))
}

fn display(value: &Value) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s
            .to_str()
            .map_or_else(|_| "<invalid utf8>".into(), |s| s.to_string()),
        other => format!("{other:?}"),
    }
}

/// Registers the script API as globals on `lua`.
///
/// The VM is created without the io/os/package/debug libraries; the base
/// library's file loaders are stripped here so no code path can touch the
/// filesystem.
pub(crate) fn install(lua: &Lua, env: &ScriptEnv) -> mlua::Result<()> {
    let globals = lua.globals();

    for name in ["dofile", "loadfile", "load", "require"] {
        globals.set(name, Value::Nil)?;
    }

    let ble = env.ble.clone();
    globals.set(
        "set_power",
        lua.create_function(move |_, on: bool| {
            ble.set_power(on);
            Ok(())
        })?,
    )?;

    let ble = env.ble.clone();
    globals.set(
        "set_color",
        lua.create_function(move |_, (r, g, b): (i64, i64, i64)| {
            let c = rgb(r, g, b);
            ble.set_color(c.r, c.g, c.b);
            Ok(())
        })?,
    )?;

    let ble = env.ble.clone();
    globals.set(
        "set_brightness",
        lua.create_function(move |_, value: i64| {
            ble.set_brightness(value.clamp(1, 100) as u8);
            Ok(())
        })?,
    )?;

    // The one blocking primitive; wakes immediately on cancellation.
    let token = env.token.clone();
    globals.set(
        "sleep",
        lua.create_function(move |_, ms: u64| {
            token.sleep(Duration::from_millis(ms));
            Ok(())
        })?,
    )?;

    let token = env.token.clone();
    globals.set(
        "should_stop",
        lua.create_function(move |_, ()| Ok(token.is_cancelled()))?,
    )?;

    globals.set(
        "print",
        lua.create_function(|_, values: MultiValue| {
            let line = values.iter().map(display).collect::<Vec<_>>().join("\t");
            info!(target: "lumio::script", "{line}");
            Ok(())
        })?,
    )?;

    // Deterministic wall-clock minute for time-aware patterns; `os` does
    // not exist inside the VM.
    let clock = env.clock.clone();
    globals.set(
        "minute_of_day",
        lua.create_function(move |_, ()| Ok(clock()))?,
    )?;

    let fx = env.clone();
    globals.set(
        "fade",
        lua.create_function(
            move |_, (r1, g1, b1, r2, g2, b2, ms): (i64, i64, i64, i64, i64, i64, u64)| {
                effects::fade(
                    &fx.ble,
                    &fx.token,
                    rgb(r1, g1, b1),
                    rgb(r2, g2, b2),
                    Duration::from_millis(ms),
                );
                Ok(())
            },
        )?,
    )?;

    let fx = env.clone();
    globals.set(
        "fade_brightness",
        lua.create_function(move |_, (from, to, ms): (i64, i64, u64)| {
            effects::fade_brightness(
                &fx.ble,
                &fx.token,
                from.clamp(1, 100) as u8,
                to.clamp(1, 100) as u8,
                Duration::from_millis(ms),
            );
            Ok(())
        })?,
    )?;

    let fx = env.clone();
    globals.set(
        "breathe",
        lua.create_function(move |_, ms: u64| {
            effects::breathe(&fx.ble, &fx.token, Duration::from_millis(ms));
            Ok(())
        })?,
    )?;

    let fx = env.clone();
    globals.set(
        "strobe",
        lua.create_function(move |_, (r, g, b, ms, hz): (i64, i64, i64, u64, f64)| {
            effects::strobe(
                &fx.ble,
                &fx.token,
                rgb(r, g, b),
                Duration::from_millis(ms),
                hz,
            );
            Ok(())
        })?,
    )?;

    Ok(())
}
