//! Skeleton drawing onto RGB frames

use super::{PoseLandmarks, LANDMARK_COUNT};
use crate::frame::Frame;

/// Bone list (start joint, end joint), same topology as MediaPipe's `POSE_CONNECTIONS`
pub const POSE_CONNECTIONS: [(usize, usize); 35] = [
    // face
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 7),
    (0, 4),
    (4, 5),
    (5, 6),
    (6, 8),
    (9, 10),
    // arms and hands
    (11, 12),
    (11, 13),
    (13, 15),
    (15, 17),
    (15, 19),
    (15, 21),
    (17, 19),
    (12, 14),
    (14, 16),
    (16, 18),
    (16, 20),
    (16, 22),
    (18, 20),
    // torso
    (11, 23),
    (12, 24),
    (23, 24),
    // legs and feet
    (23, 25),
    (24, 26),
    (25, 27),
    (26, 28),
    (27, 29),
    (28, 30),
    (29, 31),
    (30, 32),
    (27, 31),
    (28, 32),
];

/// Colours and sizes for one drawing pass
#[derive(Debug, Clone, Copy)]
pub struct DrawStyle {
    pub joint: [u8; 3],
    pub bone: [u8; 3],
    pub joint_radius: i64,
    pub thickness: i64,
}

impl DrawStyle {
    /// Blue joints, magenta bones on a white canvas
    pub const ANIMATION: DrawStyle = DrawStyle {
        joint: [0, 0, 255],
        bone: [255, 0, 255],
        joint_radius: 2,
        thickness: 2,
    };

    /// Orange-blue joints, white bones over live video
    pub const PREVIEW: DrawStyle = DrawStyle {
        joint: [0, 100, 255],
        bone: [255, 255, 255],
        joint_radius: 4,
        thickness: 2,
    };
}

/// Draw `image` landmarks (normalised coordinates) onto `frame`.
///
/// Bones are clipped to the frame before rasterising and joints outside it
/// are skipped, so arbitrary model output costs at most one frame's worth of
/// pixels. Non-finite joints are not drawn.
pub fn draw_skeleton(frame: &mut Frame, image: &PoseLandmarks, style: DrawStyle) {
    let (w, h) = (frame.width() as f32, frame.height() as f32);
    if w < 1.0 || h < 1.0 {
        return;
    }
    let mut px = [None; LANDMARK_COUNT];
    for (p, lm) in px.iter_mut().zip(image.iter()) {
        let (x, y) = (lm.x * w, lm.y * h);
        if x.is_finite() && y.is_finite() {
            *p = Some((x, y));
        }
    }
    let bounds = (w - 1.0, h - 1.0);

    for &(a, b) in POSE_CONNECTIONS.iter() {
        let (Some(from), Some(to)) = (px[a], px[b]) else {
            continue;
        };
        if let Some((from, to)) = clip_segment(from, to, bounds) {
            draw_line(frame, from, to, style.bone, style.thickness);
        }
    }

    let reach = style.joint_radius.max(0) as f32;
    for &(x, y) in px.iter().flatten() {
        if (-reach..=bounds.0 + reach).contains(&x) && (-reach..=bounds.1 + reach).contains(&y) {
            fill_circle(frame, (x as i64, y as i64), style.joint_radius, style.joint);
        }
    }
}

/// Liang-Barsky clip of a bone against `[0, max.0] x [0, max.1]`.
///
/// Clipping runs from the endpoint nearer the origin so a far-away joint
/// does not swamp the visible part in rounding error.
fn clip_segment(a: (f32, f32), b: (f32, f32), max: (f32, f32)) -> Option<((i64, i64), (i64, i64))> {
    let magnitude = |p: (f32, f32)| p.0.abs().max(p.1.abs());
    let (from, to) = if magnitude(a) <= magnitude(b) { (a, b) } else { (b, a) };

    let (x0, y0) = (from.0 as f64, from.1 as f64);
    let (dx, dy) = (to.0 as f64 - x0, to.1 as f64 - y0);
    let (xmax, ymax) = (max.0 as f64, max.1 as f64);
    let (mut t0, mut t1) = (0.0f64, 1.0f64);

    for (p, q) in [(-dx, x0), (dx, xmax - x0), (-dy, y0), (dy, ymax - y0)] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            if r > t1 {
                return None;
            }
            t0 = t0.max(r);
        } else {
            if r < t0 {
                return None;
            }
            t1 = t1.min(r);
        }
    }

    let at = |t: f64| {
        let x = (x0 + t * dx).clamp(0.0, xmax);
        let y = (y0 + t * dy).clamp(0.0, ymax);
        (x as i64, y as i64)
    };
    Some((at(t0), at(t1)))
}

fn draw_line(frame: &mut Frame, from: (i64, i64), to: (i64, i64), rgb: [u8; 3], thickness: i64) {
    let (mut x, mut y) = from;
    let dx = (to.0 - x).abs();
    let dy = -(to.1 - y).abs();
    let sx = if x < to.0 { 1 } else { -1 };
    let sy = if y < to.1 { 1 } else { -1 };
    let mut err = dx + dy;
    let r = (thickness / 2).max(0);

    loop {
        fill_circle(frame, (x, y), r, rgb);
        if x == to.0 && y == to.1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

fn fill_circle(frame: &mut Frame, center: (i64, i64), radius: i64, rgb: [u8; 3]) {
    for oy in -radius..=radius {
        for ox in -radius..=radius {
            if ox * ox + oy * oy <= radius * radius {
                frame.put_pixel(center.0 + ox, center.1 + oy, rgb);
            }
        }
    }
}
