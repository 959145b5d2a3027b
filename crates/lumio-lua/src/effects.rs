//! Native effect primitives exposed to scripts.
//!
//! These run on the script's blocking thread and are the only loops a
//! typical pattern needs; every wait goes through [`StopToken::sleep`] so
//! cancellation lands between two frames, never after the animation.

use std::time::{Duration, Instant};

use lumio_ble::BleHandle;
use lumio_core::Rgb;

use crate::token::StopToken;

/// Interpolation steps for `fade` and `fade_brightness`.
const FADE_STEPS: u32 = 100;

fn lerp(from: u8, to: u8, t: f64) -> u8 {
    (f64::from(from) + t * (f64::from(to) - f64::from(from))).round() as u8
}

/// Linear color fade. Guarantees the final color is exactly `to` on
/// normal completion; returns early when cancelled.
pub(crate) fn fade(ble: &BleHandle, token: &StopToken, from: Rgb, to: Rgb, duration: Duration) {
    ble.set_power(true);
    let step = duration / FADE_STEPS;
    for i in 0..=FADE_STEPS {
        let t = f64::from(i) / f64::from(FADE_STEPS);
        ble.set_color(
            lerp(from.r, to.r, t),
            lerp(from.g, to.g, t),
            lerp(from.b, to.b, t),
        );
        if token.sleep(step) {
            return;
        }
    }
    ble.set_color(to.r, to.g, to.b);
}

/// Linear brightness fade over 1..=100, same shape as [`fade`].
pub(crate) fn fade_brightness(
    ble: &BleHandle,
    token: &StopToken,
    from: u8,
    to: u8,
    duration: Duration,
) {
    let from = from.clamp(1, 100);
    let to = to.clamp(1, 100);
    let step = duration / FADE_STEPS;
    for i in 0..=FADE_STEPS {
        let t = f64::from(i) / f64::from(FADE_STEPS);
        ble.set_brightness(lerp(from, to, t).clamp(1, 100));
        if token.sleep(step) {
            return;
        }
    }
    ble.set_brightness(to);
}

/// Symmetric brightness pulse 1 → 100 → 1 over `duration`. The color is
/// whatever the script set beforehand.
pub(crate) fn breathe(ble: &BleHandle, token: &StopToken, duration: Duration) {
    let steps = 100u32;
    let step = duration / (2 * steps);
    for level in 1..=steps {
        ble.set_brightness(level as u8);
        if token.sleep(step) {
            return;
        }
    }
    for level in (1..=steps).rev() {
        ble.set_brightness(level as u8);
        if token.sleep(step) {
            return;
        }
    }
}

/// Alternates `color` and black at `hz` for `duration`. A non-positive
/// frequency is a no-op.
pub(crate) fn strobe(
    ble: &BleHandle,
    token: &StopToken,
    color: Rgb,
    duration: Duration,
    hz: f64,
) {
    if hz <= 0.0 {
        return;
    }
    ble.set_power(true);
    ble.set_brightness(100);

    let half_period = Duration::from_secs_f64(1.0 / hz / 2.0);
    let start = Instant::now();
    while start.elapsed() < duration {
        ble.set_color(color.r, color.g, color.b);
        if token.sleep(half_period) {
            return;
        }
        ble.set_color(0, 0, 0);
        if token.sleep(half_period) {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumio_ble::{frame, frame_channel, Frame, FrameReceiver};

    fn drain(rx: &mut FrameReceiver) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    #[tokio::test]
    async fn fade_ends_on_exact_target_color() {
        let (ble, mut rx) = frame_channel(1024);
        let token = StopToken::new();
        fade(
            &ble,
            &token,
            Rgb::new(0, 0, 0),
            Rgb::new(10, 200, 31),
            Duration::ZERO,
        );
        let frames = drain(&mut rx);
        assert_eq!(frames[0], frame::power(true));
        assert_eq!(frames.last(), Some(&frame::color(10, 200, 31)));
        // power + 101 interpolation steps + explicit final color
        assert_eq!(frames.len(), 103);
    }

    #[tokio::test]
    async fn cancelled_fade_stops_early() {
        let (ble, mut rx) = frame_channel(1024);
        let token = StopToken::new();
        token.cancel();
        fade(
            &ble,
            &token,
            Rgb::new(0, 0, 0),
            Rgb::new(255, 255, 255),
            Duration::from_secs(10),
        );
        // power + first step only; the final color is not forced.
        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[tokio::test]
    async fn breathe_is_symmetric() {
        let (ble, mut rx) = frame_channel(1024);
        let token = StopToken::new();
        breathe(&ble, &token, Duration::ZERO);
        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 200);
        assert_eq!(frames.first(), Some(&frame::brightness(1)));
        assert_eq!(frames[99], frame::brightness(100));
        assert_eq!(frames.last(), Some(&frame::brightness(1)));
    }

    #[tokio::test]
    async fn fade_brightness_hits_target() {
        let (ble, mut rx) = frame_channel(1024);
        let token = StopToken::new();
        fade_brightness(&ble, &token, 1, 80, Duration::ZERO);
        let frames = drain(&mut rx);
        assert_eq!(frames.last(), Some(&frame::brightness(80)));
    }

    #[tokio::test]
    async fn strobe_with_non_positive_hz_is_a_no_op() {
        let (ble, mut rx) = frame_channel(1024);
        let token = StopToken::new();
        strobe(&ble, &token, Rgb::new(255, 0, 0), Duration::from_secs(1), 0.0);
        strobe(
            &ble,
            &token,
            Rgb::new(255, 0, 0),
            Duration::from_secs(1),
            -5.0,
        );
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn strobe_alternates_color_and_black() {
        let (ble, mut rx) = frame_channel(1024);
        let token = StopToken::new();
        strobe(
            &ble,
            &token,
            Rgb::new(255, 0, 0),
            Duration::from_millis(30),
            100.0,
        );
        let frames = drain(&mut rx);
        assert_eq!(frames[0], frame::power(true));
        assert_eq!(frames[1], frame::brightness(100));
        assert_eq!(frames[2], frame::color(255, 0, 0));
        assert_eq!(frames[3], frame::color(0, 0, 0));
    }
}
