//! Frame encoders for the BLEDOM wire protocol.
//!
//! Every frame is exactly 9 bytes: `0x7E`, an opcode byte, up to six
//! payload bytes, `0xEF`. The encoders are total functions; range
//! enforcement beyond what the byte layout gives for free belongs to the
//! orchestrator.

/// A single 9-byte packet for the write characteristic.
pub type Frame = [u8; 9];

/// Power on/off.
pub fn power(on: bool) -> Frame {
    let v = u8::from(on);
    [0x7E, 0x04, 0x04, v, 0x00, v, 0xFF, 0x00, 0xEF]
}

/// Static color.
pub fn color(r: u8, g: u8, b: u8) -> Frame {
    [0x7E, 0x07, 0x05, 0x03, r, g, b, 0x10, 0xEF]
}

/// Brightness, 1..=100.
pub fn brightness(value: u8) -> Frame {
    [0x7E, 0x04, 0x01, value, 0xFF, 0xFF, 0xFF, 0x00, 0xEF]
}

/// Built-in effect speed. Values above 100 are clamped.
pub fn speed(value: u8) -> Frame {
    [0x7E, 0x04, 0x02, value.min(100), 0xFF, 0xFF, 0xFF, 0x00, 0xEF]
}

/// One of the strip's built-in animation programs, id 0..=28.
pub fn hardware_effect(id: u8) -> Frame {
    [
        0x7E,
        0x05,
        0x03,
        0x80u8.wrapping_add(id),
        0x03,
        0xFF,
        0xFF,
        0x00,
        0xEF,
    ]
}

/// Clock synchronisation. `weekday` counts Monday = 0 .. Sunday = 6.
pub fn sync_time(hour: u8, minute: u8, second: u8, weekday: u8) -> Frame {
    [0x7E, 0x07, 0x83, hour, minute, second, weekday, 0xFF, 0xEF]
}

/// RGB wire-order remapping.
pub fn rgb_order(v1: u8, v2: u8, v3: u8) -> Frame {
    [0x7E, 0x06, 0x81, v1, v2, v3, 0xFF, 0x00, 0xEF]
}

/// The strip's own on/off timer.
///
/// `weekdays` is a bit mask, Monday = bit 0 .. Sunday = bit 6. `is_set`
/// programs the timer, `!is_set` clears it.
pub fn device_schedule(
    hour: u8,
    minute: u8,
    second: u8,
    weekdays: u8,
    is_on: bool,
    is_set: bool,
) -> Frame {
    let action: u8 = if is_on { 0x00 } else { 0x01 };
    let mode: u8 = if is_set { 0x80 } else { 0x00 };
    [
        0x7E,
        0x08,
        0x82,
        hour,
        minute,
        second,
        action,
        mode | weekdays,
        0xEF,
    ]
}
