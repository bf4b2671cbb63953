use ab_glyph::{Font, FontArc, GlyphId, ScaleFont, point};

use crate::blend::BlendMode;
use crate::canvas::{Pixel, TiledCanvas, alpha_of, with_alpha};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TextAlignment {
    #[default]
    Left,
    Center,
    Right,
}

/// Everything needed to rasterize a text layer.  `origin` is the top-left of
/// the first line in layer coordinates; lines are split on `'\n'`.
#[derive(Clone, Debug, PartialEq)]
pub struct TextStyle {
    pub text: String,
    pub font_size: f32,
    pub color: Pixel,
    pub alignment: TextAlignment,
    pub origin_x: f32,
    pub origin_y: f32,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            text: String::new(),
            font_size: 24.0,
            color: 0x0000_00FF,
            alignment: TextAlignment::Left,
            origin_x: 0.0,
            origin_y: 0.0,
        }
    }
}

/// Turns a [`TextStyle`] into pixels.  Implementations composite glyph
/// coverage into `target`, which the caller clears beforehand.
pub trait TextRasterizer: Send + Sync {
    fn rasterize(&self, style: &TextStyle, target: &mut TiledCanvas);
}

/// ab_glyph-backed rasterizer.
#[derive(Clone)]
pub struct GlyphRasterizer {
    font: FontArc,
}

impl std::fmt::Debug for GlyphRasterizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlyphRasterizer").finish_non_exhaustive()
    }
}

impl GlyphRasterizer {
    pub fn new(font: FontArc) -> Self {
        Self { font }
    }

    /// Parse TrueType/OpenType bytes.  `None` if the data is not a font.
    pub fn from_bytes(data: Vec<u8>) -> Option<Self> {
        FontArc::try_from_vec(data).ok().map(Self::new)
    }

    pub fn from_file(path: &std::path::Path) -> std::io::Result<Option<Self>> {
        Ok(Self::from_bytes(std::fs::read(path)?))
    }

    /// Lay out one line, returning `(glyph, x, baseline_y)` and the line width.
    fn layout_line(&self, line: &str, font_size: f32, alignment: TextAlignment) -> (Vec<(GlyphId, f32, f32)>, f32) {
        let scaled = self.font.as_scaled(font_size);
        let ascent = scaled.ascent();

        let mut glyphs = Vec::new();
        let mut cursor_x = 0.0f32;
        let mut last_glyph: Option<GlyphId> = None;

        for ch in line.chars() {
            let glyph_id = self.font.glyph_id(ch);
            if let Some(prev) = last_glyph {
                cursor_x += scaled.kern(prev, glyph_id);
            }
            glyphs.push((glyph_id, cursor_x, ascent));
            cursor_x += scaled.h_advance(glyph_id);
            last_glyph = Some(glyph_id);
        }

        let offset = match alignment {
            TextAlignment::Left => 0.0,
            TextAlignment::Center => -cursor_x * 0.5,
            TextAlignment::Right => -cursor_x,
        };
        for glyph in &mut glyphs {
            glyph.1 += offset;
        }
        (glyphs, cursor_x)
    }
}

impl TextRasterizer for GlyphRasterizer {
    fn rasterize(&self, style: &TextStyle, target: &mut TiledCanvas) {
        if style.text.is_empty() || style.font_size <= 0.0 || alpha_of(style.color) == 0 {
            return;
        }
        let line_height = self.font.as_scaled(style.font_size).height();
        let base_alpha = alpha_of(style.color) as f32;

        for (line_idx, line) in style.text.split('\n').enumerate() {
            let (glyphs, _) = self.layout_line(line, style.font_size, style.alignment);
            let line_y = style.origin_y + line_idx as f32 * line_height;

            for (glyph_id, gx, gy) in glyphs {
                let glyph = glyph_id.with_scale_and_position(
                    style.font_size,
                    point(style.origin_x + gx, line_y + gy),
                );
                let Some(outlined) = self.font.outline_glyph(glyph) else {
                    continue;
                };
                let bounds = outlined.px_bounds();
                let (bx, by) = (bounds.min.x as i32, bounds.min.y as i32);
                outlined.draw(|px, py, cov| {
                    let a = (cov.clamp(0.0, 1.0) * base_alpha).round() as u8;
                    if a > 0 {
                        target.blend_pixel(bx + px as i32, by + py as i32, with_alpha(style.color, a), BlendMode::Normal, 1.0);
                    }
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::layer::TextLayer;

    const MONO: &[u8] = include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fonts/DejaVuSansMono.ttf"));

    fn mono() -> GlyphRasterizer {
        GlyphRasterizer::from_bytes(MONO.to_vec()).expect("bundled font parses")
    }

    fn a_at(origin_x: f32, origin_y: f32) -> TextStyle {
        TextStyle { text: "A".into(), font_size: 32.0, origin_x, origin_y, ..Default::default() }
    }

    #[test]
    fn rejects_non_font_bytes() {
        assert!(GlyphRasterizer::from_bytes(b"definitely not a font".to_vec()).is_none());
    }

    #[test]
    fn default_style_is_opaque_black() {
        let style = TextStyle::default();
        assert_eq!(style.color, 0x0000_00FF);
        assert_eq!(style.alignment, TextAlignment::Left);
    }

    #[test]
    fn glyph_is_drawn_below_the_origin() {
        let mut canvas = TiledCanvas::new(64, 64);
        mono().rasterize(&a_at(10.0, 5.0), &mut canvas);
        let bounds = canvas.content_bounds().expect("glyph pixels");
        assert!(bounds.min_y >= 5 && bounds.max_y <= 5 + 32, "{bounds:?}");
        assert!(bounds.width() > 4 && bounds.width() < 24, "{bounds:?}");

        let mut max = 0;
        canvas.for_each_pixel(|_, _, p| {
            assert_eq!(p & 0xFFFF_FF00, 0);
            max = max.max(alpha_of(p));
        });
        assert!(max > 200, "{max}");
    }

    #[test]
    fn transparent_color_draws_nothing() {
        let mut canvas = TiledCanvas::new(64, 64);
        let style = TextStyle { color: 0x0000_0000, ..a_at(0.0, 0.0) };
        mono().rasterize(&style, &mut canvas);
        assert_eq!(canvas.tile_count(), 0);
    }

    #[test]
    fn lines_stack_and_alignment_shifts_left() {
        let mut two_lines = TiledCanvas::new(64, 128);
        mono().rasterize(&TextStyle { text: "A\nA".into(), ..a_at(0.0, 0.0) }, &mut two_lines);
        let mut one_line = TiledCanvas::new(64, 128);
        mono().rasterize(&a_at(0.0, 0.0), &mut one_line);
        let (one, two) = (one_line.content_bounds().expect("one"), two_lines.content_bounds().expect("two"));
        assert_eq!(two.min_y, one.min_y);
        assert!(two.max_y > one.max_y + 20);

        let mut right = TiledCanvas::new(64, 64);
        let style = TextStyle { alignment: TextAlignment::Right, ..a_at(40.0, 0.0) };
        mono().rasterize(&style, &mut right);
        assert!(right.content_bounds().expect("right").max_x <= 42);
    }

    #[test]
    fn editing_text_invalidates_the_layer_cache() {
        let mut layer = TextLayer::new(a_at(0.0, 0.0), Arc::new(mono()), 256, 64);
        assert!(!layer.is_cache_valid());
        layer.ensure_cache_valid();
        assert!(layer.is_cache_valid());
        let first = layer.cached().content_bounds().expect("rendered");

        layer.set_text("AAAA");
        assert!(!layer.is_cache_valid());
        assert_eq!(layer.cached().content_bounds(), Some(first));

        layer.ensure_cache_valid();
        let second = layer.cached().content_bounds().expect("rendered");
        assert!(second.width() > first.width() * 3, "{first:?} {second:?}");
    }
}
