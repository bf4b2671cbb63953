// ============================================================================
// ADJUSTMENTS – per-pixel colour transforms used by adjustment layers
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::canvas::{Pixel, alpha_of, pack_rgba, unpack_rgba};

/// Colourise parameters for black & white conversion.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MonoTint {
    /// Degrees, 0..360.
    pub hue: f32,
    /// 0..100.
    pub saturation: f32,
}

/// Adjustment parameters.  Ranges follow the usual editor sliders; channel
/// math runs in 0..255 floats and is clamped before repacking.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Adjustment {
    /// `brightness` -255..255, `contrast` -255..255.
    BrightnessContrast { brightness: f32, contrast: f32 },
    /// `hue` degrees, `saturation`/`lightness` -100..100.
    HueSaturation { hue: f32, saturation: f32, lightness: f32 },
    Invert,
    /// `exposure` in stops, `offset` -0.5..0.5, `gamma` 0.01..10.
    Exposure { exposure: f32, offset: f32, gamma: f32 },
    /// Channel weights in percent (40/40/20 is a neutral mix).
    BlackAndWhite { red: f32, green: f32, blue: f32, tint: Option<MonoTint> },
    /// Both -100..100.
    TemperatureTint { temperature: f32, tint: f32 },
    /// -100..100.
    Vibrance { amount: f32 },
    /// Per-range RGB shifts, each channel -100..100.
    ColorBalance {
        shadows: [f32; 3],
        midtones: [f32; 3],
        highlights: [f32; 3],
        preserve_luminosity: bool,
    },
    /// Both -100..100.
    HighlightsShadows { shadows: f32, highlights: f32 },
    /// Input/output points 0..255, `gamma` 0.1..10.
    Levels { input_black: f32, input_white: f32, gamma: f32, output_black: f32, output_white: f32 },
}

impl Adjustment {
    pub fn name(&self) -> &'static str {
        match self {
            Adjustment::BrightnessContrast { .. } => "Brightness/Contrast",
            Adjustment::HueSaturation { .. } => "Hue/Saturation",
            Adjustment::Invert => "Invert",
            Adjustment::Exposure { .. } => "Exposure",
            Adjustment::BlackAndWhite { .. } => "Black & White",
            Adjustment::TemperatureTint { .. } => "Temperature/Tint",
            Adjustment::Vibrance { .. } => "Vibrance",
            Adjustment::ColorBalance { .. } => "Color Balance",
            Adjustment::HighlightsShadows { .. } => "Highlights/Shadows",
            Adjustment::Levels { .. } => "Levels",
        }
    }
}

/// Apply `adj` to one straight-alpha pixel.  Alpha is preserved; fully
/// transparent pixels are returned untouched.
pub fn apply_adjustment(pixel: Pixel, adj: &Adjustment) -> Pixel {
    if alpha_of(pixel) == 0 {
        return pixel;
    }
    let [r, g, b, a] = unpack_rgba(pixel);
    let (r, g, b) = (r as f32, g as f32, b as f32);

    let (nr, ng, nb) = match *adj {
        Adjustment::BrightnessContrast { brightness, contrast } => {
            let contrast = contrast.clamp(-254.0, 254.0);
            let factor = (259.0 * (contrast + 255.0)) / (255.0 * (259.0 - contrast));
            let f = |c: f32| factor * (c + brightness - 128.0) + 128.0;
            (f(r), f(g), f(b))
        }
        Adjustment::HueSaturation { hue, saturation, lightness } => {
            let sat_factor = 1.0 + saturation / 100.0;
            let light_offset = lightness * 255.0 / 100.0;
            let (h, s, l) = rgb_to_hsl(r / 255.0, g / 255.0, b / 255.0);
            let nh = (h + hue / 360.0).rem_euclid(1.0);
            let ns = (s * sat_factor).clamp(0.0, 1.0);
            let (nr, ng, nb) = hsl_to_rgb(nh, ns, l);
            (nr * 255.0 + light_offset, ng * 255.0 + light_offset, nb * 255.0 + light_offset)
        }
        Adjustment::Invert => (255.0 - r, 255.0 - g, 255.0 - b),
        Adjustment::Exposure { exposure, offset, gamma } => {
            let gain = 2.0f32.powf(exposure);
            let inv_gamma = 1.0 / gamma.max(0.01);
            let f = |c: f32| ((c / 255.0) * gain + offset).clamp(0.0, 1.0).powf(inv_gamma) * 255.0;
            (f(r), f(g), f(b))
        }
        Adjustment::BlackAndWhite { red, green, blue, tint } => {
            let v = ((r * red + g * green + b * blue) / 100.0).clamp(0.0, 255.0);
            match tint {
                Some(MonoTint { hue, saturation }) => {
                    let (tr, tg, tb) = hsl_to_rgb(
                        (hue / 360.0).rem_euclid(1.0),
                        (saturation / 100.0).clamp(0.0, 1.0),
                        v / 255.0,
                    );
                    (tr * 255.0, tg * 255.0, tb * 255.0)
                }
                None => (v, v, v),
            }
        }
        Adjustment::TemperatureTint { temperature, tint } => {
            let temp_shift = temperature * 1.5;
            (r + temp_shift, g - tint * 0.5, b - temp_shift)
        }
        Adjustment::Vibrance { amount } => {
            let v = amount / 100.0;
            let (h, s, l) = rgb_to_hsl(r / 255.0, g / 255.0, b / 255.0);
            let boost = if v >= 0.0 { v * (1.0 - s).powi(2) } else { v * s.powi(2) };
            let (nr, ng, nb) = hsl_to_rgb(h, (s + boost).clamp(0.0, 1.0), l);
            (nr * 255.0, ng * 255.0, nb * 255.0)
        }
        Adjustment::ColorBalance { shadows, midtones, highlights, preserve_luminosity } => {
            let lum = luminance(r, g, b) / 255.0;
            let sw = (1.0 - lum * 2.0).max(0.0).powi(2);
            let hw = (lum * 2.0 - 1.0).max(0.0).powi(2);
            let mw = (1.0 - sw - hw).max(0.0);
            let shift = |i: usize| (sw * shadows[i] + mw * midtones[i] + hw * highlights[i]) * 1.28;
            let (nr, ng, nb) = (r + shift(0), g + shift(1), b + shift(2));
            if preserve_luminosity {
                let (_, _, l0) = rgb_to_hsl(r / 255.0, g / 255.0, b / 255.0);
                let clamp = |c: f32| (c / 255.0).clamp(0.0, 1.0);
                let (h, s, _) = rgb_to_hsl(clamp(nr), clamp(ng), clamp(nb));
                let (pr, pg, pb) = hsl_to_rgb(h, s, l0);
                (pr * 255.0, pg * 255.0, pb * 255.0)
            } else {
                (nr, ng, nb)
            }
        }
        Adjustment::HighlightsShadows { shadows, highlights } => {
            let lum = luminance(r, g, b) / 255.0;
            let sw = (1.0 - lum).powi(2);
            let hw = lum.powi(2);
            let shift = sw * (shadows / 100.0) * 128.0 + hw * (highlights / 100.0) * 128.0;
            (r + shift, g + shift, b + shift)
        }
        Adjustment::Levels { input_black, input_white, gamma, output_black, output_white } => {
            let in_range = (input_white - input_black).max(1.0);
            let out_range = output_white - output_black;
            let inv_gamma = 1.0 / gamma.max(0.01);
            let f = |c: f32| {
                let normalized = ((c - input_black) / in_range).clamp(0.0, 1.0);
                output_black + normalized.powf(inv_gamma) * out_range
            };
            (f(r), f(g), f(b))
        }
    };

    let q = |c: f32| c.round().clamp(0.0, 255.0) as u8;
    pack_rgba(q(nr), q(ng), q(nb), a)
}

#[inline]
fn luminance(r: f32, g: f32, b: f32) -> f32 {
    0.2126 * r + 0.7152 * g + 0.0722 * b
}

/// RGB (0..1) → HSL (H: 0..1, S: 0..1, L: 0..1)
pub fn rgb_to_hsl(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let l = (max + min) / 2.0;

    if (max - min).abs() < 1e-6 {
        return (0.0, 0.0, l);
    }

    let d = max - min;
    let s = if l > 0.5 { d / (2.0 - max - min) } else { d / (max + min) };

    let h = if (max - r).abs() < 1e-6 {
        let mut h = (g - b) / d;
        if h < 0.0 {
            h += 6.0;
        }
        h / 6.0
    } else if (max - g).abs() < 1e-6 {
        ((b - r) / d + 2.0) / 6.0
    } else {
        ((r - g) / d + 4.0) / 6.0
    };

    (h, s, l)
}

/// HSL (H: 0..1, S: 0..1, L: 0..1) → RGB (0..1)
pub fn hsl_to_rgb(h: f32, s: f32, l: f32) -> (f32, f32, f32) {
    if s.abs() < 1e-6 {
        return (l, l, l);
    }

    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;

    (hue_to_rgb(p, q, h + 1.0 / 3.0), hue_to_rgb(p, q, h), hue_to_rgb(p, q, h - 1.0 / 3.0))
}

fn hue_to_rgb(p: f32, q: f32, mut t: f32) -> f32 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    if t < 1.0 / 6.0 {
        return p + (q - p) * 6.0 * t;
    }
    if t < 1.0 / 2.0 {
        return q;
    }
    if t < 2.0 / 3.0 {
        return p + (q - p) * (2.0 / 3.0 - t) * 6.0;
    }
    p
}
