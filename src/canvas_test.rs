// ============================================================================
// Canvas Tests
// ============================================================================

use encoder_bus::Surface;
use image::Rgba;

use super::{Canvas, Color};

const RED: Color = Rgba([0xff, 0, 0, 0xff]);
const WHITE: Color = Rgba([0xff, 0xff, 0xff, 0xff]);

fn pixel(canvas: &Canvas, x: u32, y: u32) -> [u8; 4] {
    let frame = canvas.snapshot();
    let offset = ((y * canvas.width() + x) * 4) as usize;
    let mut px = [0u8; 4];
    px.copy_from_slice(&frame.data()[offset..offset + 4]);
    px
}

#[test]
fn test_snapshot_is_raw_rgba() {
    let mut canvas = Canvas::new(8, 4);
    canvas.clear(WHITE);
    let frame = canvas.snapshot();
    assert_eq!(frame.len(), 8 * 4 * 4);
    assert!(frame.data().iter().all(|b| *b == 0xff));
}

#[test]
fn test_fill_rect_is_clipped() {
    let mut canvas = Canvas::new(10, 10);
    canvas.clear(WHITE);
    canvas.fill_rect(-5, 8, 100, 100, RED);

    assert_eq!(pixel(&canvas, 0, 8), RED.0);
    assert_eq!(pixel(&canvas, 9, 9), RED.0);
    assert_eq!(pixel(&canvas, 0, 7), WHITE.0);
}

#[test]
fn test_fill_circle() {
    let mut canvas = Canvas::new(20, 20);
    canvas.clear(WHITE);
    canvas.fill_circle(10.0, 10.0, 5.0, RED);

    assert_eq!(pixel(&canvas, 10, 10), RED.0);
    assert_eq!(pixel(&canvas, 6, 10), RED.0);
    assert_eq!(pixel(&canvas, 1, 1), WHITE.0);
    assert_eq!(pixel(&canvas, 10, 17), WHITE.0);
}

#[test]
fn test_circle_outside_canvas_is_ignored() {
    let mut canvas = Canvas::new(4, 4);
    canvas.clear(WHITE);
    canvas.fill_circle(-50.0, -50.0, 10.0, RED);
    canvas.fill_circle(2.0, 2.0, 0.0, RED);
    assert!(canvas.snapshot().data().iter().all(|b| *b == 0xff));
}
