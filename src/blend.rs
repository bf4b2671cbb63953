use serde::{Deserialize, Serialize};

use crate::canvas::{Pixel, TRANSPARENT, alpha_of, pack_rgba, unit_to_byte, unpack_rgba};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BlendMode {
    #[default]
    Normal,
    Multiply,
    Screen,
    Overlay,
    Darken,
    Lighten,
    ColorDodge,
    ColorBurn,
    HardLight,
    SoftLight,
    Difference,
    Exclusion,
}

impl BlendMode {
    pub fn all() -> &'static [BlendMode] {
        &[
            BlendMode::Normal,
            BlendMode::Multiply,
            BlendMode::Screen,
            BlendMode::Overlay,
            BlendMode::Darken,
            BlendMode::Lighten,
            BlendMode::ColorDodge,
            BlendMode::ColorBurn,
            BlendMode::HardLight,
            BlendMode::SoftLight,
            BlendMode::Difference,
            BlendMode::Exclusion,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            BlendMode::Normal => "Normal",
            BlendMode::Multiply => "Multiply",
            BlendMode::Screen => "Screen",
            BlendMode::Overlay => "Overlay",
            BlendMode::Darken => "Darken",
            BlendMode::Lighten => "Lighten",
            BlendMode::ColorDodge => "Color Dodge",
            BlendMode::ColorBurn => "Color Burn",
            BlendMode::HardLight => "Hard Light",
            BlendMode::SoftLight => "Soft Light",
            BlendMode::Difference => "Difference",
            BlendMode::Exclusion => "Exclusion",
        }
    }

    /// Case-insensitive lookup by display name; spaces, dashes and
    /// underscores are ignored.
    pub fn from_name(name: &str) -> Option<BlendMode> {
        let wanted: String = name
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '_'))
            .flat_map(char::to_lowercase)
            .collect();
        Self::all().iter().copied().find(|mode| {
            let candidate: String = mode.name().chars().filter(|c| *c != ' ').flat_map(char::to_lowercase).collect();
            candidate == wanted
        })
    }

    /// Per-channel transfer function `B(base, top)` on normalised values.
    #[inline]
    fn channel(self, base: f32, top: f32) -> f32 {
        match self {
            BlendMode::Normal => top,
            BlendMode::Multiply => base * top,
            BlendMode::Screen => 1.0 - (1.0 - base) * (1.0 - top),
            BlendMode::Overlay => overlay_channel(base, top),
            BlendMode::Darken => base.min(top),
            BlendMode::Lighten => base.max(top),
            BlendMode::ColorDodge => color_dodge_channel(base, top),
            BlendMode::ColorBurn => color_burn_channel(base, top),
            BlendMode::HardLight => overlay_channel(top, base),
            BlendMode::SoftLight => soft_light_channel(base, top),
            BlendMode::Difference => (base - top).abs(),
            BlendMode::Exclusion => base + top - 2.0 * base * top,
        }
    }
}

// ============================================================================
// CHANNEL HELPERS
// ============================================================================

fn overlay_channel(base: f32, top: f32) -> f32 {
    if base < 0.5 {
        2.0 * base * top
    } else {
        1.0 - 2.0 * (1.0 - base) * (1.0 - top)
    }
}

fn color_dodge_channel(base: f32, top: f32) -> f32 {
    if top >= 1.0 {
        1.0
    } else {
        (base / (1.0 - top)).min(1.0)
    }
}

fn color_burn_channel(base: f32, top: f32) -> f32 {
    if top <= 0.0 {
        0.0
    } else {
        (1.0 - (1.0 - base) / top).max(0.0)
    }
}

/// W3C Soft Light formula.
fn soft_light_channel(base: f32, top: f32) -> f32 {
    if top <= 0.5 {
        base - (1.0 - 2.0 * top) * base * (1.0 - base)
    } else {
        let d = if base <= 0.25 {
            ((16.0 * base - 12.0) * base + 4.0) * base
        } else {
            base.sqrt()
        };
        base + (2.0 * top - 1.0) * (d - base)
    }
}

#[inline(always)]
fn to_unit(c: u8) -> f32 {
    c as f32 / 255.0
}

#[inline(always)]
fn to_byte(v: f32) -> u8 {
    unit_to_byte(v)
}

// ============================================================================
// COMPOSITING
// ============================================================================

/// Porter-Duff "over" on straight-alpha pixels.
#[inline]
pub fn alpha_blend(dst: Pixel, src: Pixel) -> Pixel {
    match alpha_of(src) {
        0 => dst,
        255 => src,
        _ => composite(dst, src, BlendMode::Normal, 1.0),
    }
}

/// Composite `src` over `dst` with a blend mode and an opacity multiplier.
pub fn blend(dst: Pixel, src: Pixel, mode: BlendMode, opacity: f32) -> Pixel {
    if alpha_of(src) == 0 || opacity <= 0.0 {
        return dst;
    }
    if mode == BlendMode::Normal && opacity >= 1.0 && alpha_of(src) == 255 {
        return src;
    }
    composite(dst, src, mode, opacity)
}

fn composite(dst: Pixel, src: Pixel, mode: BlendMode, opacity: f32) -> Pixel {
    let [br, bg, bb, ba] = unpack_rgba(dst);
    let [tr, tg, tb, ta] = unpack_rgba(src);

    let base_a = to_unit(ba);
    let top_a = to_unit(ta) * opacity.clamp(0.0, 1.0);
    if top_a <= 0.0 {
        return dst;
    }

    let out_a = top_a + base_a * (1.0 - top_a);
    if out_a <= 0.0 {
        return TRANSPARENT;
    }

    let mut out = [0u8; 3];
    for (slot, (b, t)) in out.iter_mut().zip([(br, tr), (bg, tg), (bb, tb)]) {
        let (b, t) = (to_unit(b), to_unit(t));
        // Where the backdrop is transparent the source colour shows unmodified.
        let mixed = (1.0 - base_a) * t + base_a * mode.channel(b, t);
        let c = (mixed * top_a + b * base_a * (1.0 - top_a)) / out_a;
        *slot = to_byte(c);
    }

    let a = to_byte(out_a);
    if a == 0 {
        return TRANSPARENT;
    }
    pack_rgba(out[0], out[1], out[2], a)
}

#[inline(always)]
fn div255(x: u32) -> u32 {
    let x = x + 128;
    (x + (x >> 8)) >> 8
}

/// "Over" for pixels whose colour channels are already multiplied by alpha.
pub fn blend_premultiplied(dst: Pixel, src: Pixel) -> Pixel {
    let sa = alpha_of(src) as u32;
    if sa == 0 {
        return dst;
    }
    if sa == 255 {
        return src;
    }
    let inv = 255 - sa;
    let s = unpack_rgba(src);
    let d = unpack_rgba(dst);
    let ch = |i: usize| (s[i] as u32 + div255(d[i] as u32 * inv)).min(255) as u8;
    pack_rgba(ch(0), ch(1), ch(2), ch(3))
}

pub fn premultiply(p: Pixel) -> Pixel {
    let [r, g, b, a] = unpack_rgba(p);
    let a32 = a as u32;
    pack_rgba(
        div255(r as u32 * a32) as u8,
        div255(g as u32 * a32) as u8,
        div255(b as u32 * a32) as u8,
        a,
    )
}

pub fn unpremultiply(p: Pixel) -> Pixel {
    let [r, g, b, a] = unpack_rgba(p);
    if a == 0 {
        return TRANSPARENT;
    }
    let un = |c: u8| ((c as u32 * 255 + a as u32 / 2) / a as u32).min(255) as u8;
    pack_rgba(un(r), un(g), un(b), a)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLACK: Pixel = 0x0000_00FF;
    const WHITE: Pixel = 0xFFFF_FFFF;

    #[test]
    fn transparent_source_leaves_destination() {
        for &mode in BlendMode::all() {
            assert_eq!(blend(0x1234_56FF, 0xFFFF_FF00, mode, 1.0), 0x1234_56FF);
        }
        assert_eq!(alpha_blend(0x1234_5678, 0xABCD_EF00), 0x1234_5678);
    }

    #[test]
    fn opaque_normal_source_replaces() {
        assert_eq!(blend(0x1234_56FF, 0xAABB_CCFF, BlendMode::Normal, 1.0), 0xAABB_CCFF);
        assert_eq!(alpha_blend(0x1234_56FF, 0xAABB_CCFF), 0xAABB_CCFF);
    }

    #[test]
    fn zero_opacity_is_identity() {
        assert_eq!(blend(BLACK, WHITE, BlendMode::Screen, 0.0), BLACK);
    }

    #[test]
    fn multiply_half_white_over_black() {
        // top_a = 128/255; multiply of any channel with 0 is 0.
        let top_a = 128.0f32 / 255.0;
        let out_a = top_a + 1.0 * (1.0 - top_a);
        let expected_a = (out_a * 255.0).round() as u8;
        let expected = pack_rgba(0, 0, 0, expected_a);
        assert_eq!(expected, 0x0000_00FF);
        assert_eq!(blend(BLACK, 0xFFFF_FF80, BlendMode::Multiply, 1.0), expected);
    }

    #[test]
    fn half_alpha_over_transparent_keeps_colour() {
        assert_eq!(alpha_blend(TRANSPARENT, 0xFF00_0080), 0xFF00_0080);
        // Mode has no effect over an empty backdrop.
        assert_eq!(blend(TRANSPARENT, 0xFF00_0080, BlendMode::Multiply, 1.0), 0xFF00_0080);
    }

    #[test]
    fn screen_and_multiply_on_opaque() {
        let grey = pack_rgba(128, 128, 128, 255);
        let screened = unpack_rgba(blend(grey, grey, BlendMode::Screen, 1.0));
        let s = 1.0 - (1.0 - 128.0 / 255.0f32).powi(2);
        assert_eq!(screened[0], (s * 255.0).round() as u8);
        let multiplied = unpack_rgba(blend(grey, grey, BlendMode::Multiply, 1.0));
        let m = (128.0 / 255.0f32).powi(2);
        assert_eq!(multiplied[0], (m * 255.0).round() as u8);
    }

    #[test]
    fn dodge_and_burn_saturate_on_degenerate_divisor() {
        assert_eq!(blend(pack_rgba(10, 10, 10, 255), WHITE, BlendMode::ColorDodge, 1.0), WHITE);
        assert_eq!(blend(pack_rgba(200, 200, 200, 255), BLACK, BlendMode::ColorBurn, 1.0), BLACK);
    }

    #[test]
    fn difference_of_equal_is_black() {
        let c = pack_rgba(90, 160, 30, 255);
        assert_eq!(blend(c, c, BlendMode::Difference, 1.0), BLACK);
    }

    #[test]
    fn soft_light_branches_on_dark_base() {
        let d = soft_light_channel(0.2, 1.0);
        let poly = ((16.0 * 0.2 - 12.0) * 0.2 + 4.0) * 0.2;
        assert!((d - poly).abs() < 1e-6);
        let d = soft_light_channel(0.64, 1.0);
        assert!((d - 0.8).abs() < 1e-6);
    }

    #[test]
    fn premultiplied_over() {
        assert_eq!(blend_premultiplied(0x1122_33FF, 0), 0x1122_33FF);
        let half_red = premultiply(0xFF00_0080);
        assert_eq!(half_red, 0x8000_0080);
        let out = blend_premultiplied(TRANSPARENT, half_red);
        assert_eq!(unpremultiply(out), 0xFF00_0080);
    }

    #[test]
    fn names_round_trip() {
        for &mode in BlendMode::all() {
            assert_eq!(BlendMode::from_name(mode.name()), Some(mode));
        }
        assert_eq!(BlendMode::from_name("color-burn"), Some(BlendMode::ColorBurn));
        assert_eq!(BlendMode::from_name("plasma"), None);
    }
}
