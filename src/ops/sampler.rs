// ============================================================================
// SAMPLER – nearest / bilinear / bicubic reads from a TiledCanvas
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::canvas::{Pixel, TRANSPARENT, TiledCanvas, pack_rgba, unpack_rgba};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Interpolation {
    Nearest,
    #[default]
    Bilinear,
    Bicubic,
}

impl Interpolation {
    pub fn all() -> &'static [Interpolation] {
        &[Interpolation::Nearest, Interpolation::Bilinear, Interpolation::Bicubic]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Interpolation::Nearest => "nearest",
            Interpolation::Bilinear => "bilinear",
            Interpolation::Bicubic => "bicubic",
        }
    }

    pub fn from_name(name: &str) -> Option<Interpolation> {
        Self::all().iter().copied().find(|i| i.name().eq_ignore_ascii_case(name.trim()))
    }
}

/// Sample `canvas` at continuous coordinates.  Integer coordinates hit pixel
/// `(x, y)` exactly.  Taps outside the logical area read as transparent, so
/// layer edges fade out instead of clamping.
pub fn sample(canvas: &TiledCanvas, x: f32, y: f32, mode: Interpolation) -> Pixel {
    match mode {
        Interpolation::Nearest => tap(canvas, x.floor() as i32, y.floor() as i32),
        Interpolation::Bilinear => sample_bilinear(canvas, x, y),
        Interpolation::Bicubic => sample_bicubic(canvas, x, y),
    }
}

#[inline]
fn tap(canvas: &TiledCanvas, x: i32, y: i32) -> Pixel {
    if x < 0 || y < 0 || x >= canvas.width() as i32 || y >= canvas.height() as i32 {
        return TRANSPARENT;
    }
    canvas.get_pixel(x, y)
}

/// Tap as premultiplied `[r, g, b, a]` in 0..255 floats.
#[inline]
fn tap_premul(canvas: &TiledCanvas, x: i32, y: i32) -> [f32; 4] {
    let [r, g, b, a] = unpack_rgba(tap(canvas, x, y));
    if a == 0 {
        return [0.0; 4];
    }
    let af = a as f32 / 255.0;
    [r as f32 * af, g as f32 * af, b as f32 * af, a as f32]
}

fn repack(acc: [f32; 4]) -> Pixel {
    let a = acc[3].round().clamp(0.0, 255.0);
    if a < 1.0 {
        return TRANSPARENT;
    }
    let scale = 255.0 / acc[3];
    let ch = |v: f32| (v * scale).round().clamp(0.0, 255.0) as u8;
    pack_rgba(ch(acc[0]), ch(acc[1]), ch(acc[2]), a as u8)
}

fn sample_bilinear(canvas: &TiledCanvas, x: f32, y: f32) -> Pixel {
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let tl = tap_premul(canvas, x0, y0);
    let tr = tap_premul(canvas, x0 + 1, y0);
    let bl = tap_premul(canvas, x0, y0 + 1);
    let br = tap_premul(canvas, x0 + 1, y0 + 1);

    let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
    let mut out = [0.0f32; 4];
    for c in 0..4 {
        let top = lerp(tl[c], tr[c], fx);
        let bot = lerp(bl[c], br[c], fx);
        out[c] = lerp(top, bot, fy);
    }
    repack(out)
}

/// Catmull-Rom kernel (a = -0.5) evaluated at distance `t`.
pub fn cubic_weight(t: f32) -> f32 {
    let t = t.abs();
    if t <= 1.0 {
        1.5 * t * t * t - 2.5 * t * t + 1.0
    } else if t < 2.0 {
        -0.5 * t * t * t + 2.5 * t * t - 4.0 * t + 2.0
    } else {
        0.0
    }
}

fn sample_bicubic(canvas: &TiledCanvas, x: f32, y: f32) -> Pixel {
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let wx: [f32; 4] = std::array::from_fn(|i| cubic_weight(fx - (i as f32 - 1.0)));
    let wy: [f32; 4] = std::array::from_fn(|j| cubic_weight(fy - (j as f32 - 1.0)));

    let mut out = [0.0f32; 4];
    for (j, wyj) in wy.iter().enumerate() {
        for (i, wxi) in wx.iter().enumerate() {
            let w = wxi * wyj;
            if w == 0.0 {
                continue;
            }
            let p = tap_premul(canvas, x0 + i as i32 - 1, y0 + j as i32 - 1);
            for c in 0..4 {
                out[c] += p[c] * w;
            }
        }
    }
    // Catmull-Rom overshoots; keep premultiplied colour within alpha.
    out[3] = out[3].clamp(0.0, 255.0);
    for c in 0..3 {
        out[c] = out[c].clamp(0.0, out[3]);
    }
    repack(out)
}
