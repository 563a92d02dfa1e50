use std::{
    f64::consts::PI,
    time::{SystemTime, UNIX_EPOCH},
};

use image::Rgba;

use crate::canvas::{Canvas, Color};

const BACKGROUND: Color = Rgba([0xee, 0xee, 0xee, 0xff]);
const LEFT: Color = Rgba([0x00, 0x66, 0x99, 0xff]);
const RIGHT: Color = Rgba([0x66, 0x99, 0x00, 0xff]);
const CLOCK: Color = Rgba([0x00, 0x00, 0x00, 0xff]);

/// Layout is authored for this size and scaled to the canvas.
const REFERENCE_WIDTH: f64 = 640.0;
const REFERENCE_HEIGHT: f64 = 480.0;

const STEP: f64 = PI / 128.0;

/// Two pulsing circles and a seconds bar.
#[derive(Debug, Default)]
pub struct Scene {
    angle: f64,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render callback: draws the current state, then advances the animation.
    pub fn update(&mut self, canvas: &mut Canvas) {
        self.draw(canvas, current_second());
        self.angle += STEP;
    }

    pub fn draw(&self, canvas: &mut Canvas, second: u32) {
        let sx = f64::from(canvas.width()) / REFERENCE_WIDTH;
        let sy = f64::from(canvas.height()) / REFERENCE_HEIGHT;
        let scale = sx.min(sy);

        canvas.clear(BACKGROUND);

        let left = radius(self.angle) * scale;
        canvas.fill_circle(225.0 * sx, 225.0 * sy, left, LEFT);
        let right = radius(self.angle + 1.0) * scale;
        canvas.fill_circle(425.0 * sx, 225.0 * sy, right, RIGHT);

        // one notch per second of the current minute
        let width = (f64::from(second % 60 + 1) * 10.0 * sx).round() as u32;
        let height = (10.0 * sy).round().max(1.0) as u32;
        canvas.fill_rect(
            (10.0 * sx) as i64,
            (40.0 * sy) as i64,
            width,
            height,
            CLOCK,
        );
    }
}

fn radius(angle: f64) -> f64 {
    25.0 + 150.0 * angle.cos().abs()
}

fn current_second() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| (d.as_secs() % 60) as u32)
        .unwrap_or(0)
}

#[cfg(test)]
#[path = "scene_test.rs"]
mod scene_test;
