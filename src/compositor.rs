use image::RgbaImage;
use rayon::prelude::*;

use crate::blend::{self, BlendMode};
use crate::canvas::{Pixel, PixelRect, TRANSPARENT, TiledCanvas, alpha_of, pack_rgba, to_rgba8, unpack_rgba};
use crate::document::{Document, FloatingSelection, StrokeBuffer};
use crate::layer::{LayerContent, LayerTransform, Mat3, apply};
use crate::ops::adjustments::{Adjustment, apply_adjustment};
use crate::ops::sampler::{Interpolation, sample};
use crate::settings::AppSettings;

// ============================================================================
// FRAMEBUFFER – screen-space RGBA target
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct Framebuffer {
    width: u32,
    height: u32,
    pixels: Vec<Pixel>,
}

impl Framebuffer {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height, pixels: vec![TRANSPARENT; (width as usize) * (height as usize)] }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn rect(&self) -> PixelRect {
        PixelRect::from_xywh(0, 0, self.width, self.height)
    }

    #[inline]
    pub fn get(&self, x: i32, y: i32) -> Pixel {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return TRANSPARENT;
        }
        self.pixels[y as usize * self.width as usize + x as usize]
    }

    #[inline]
    pub fn set(&mut self, x: i32, y: i32, p: Pixel) {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return;
        }
        self.pixels[y as usize * self.width as usize + x as usize] = p;
    }

    pub fn clear(&mut self, color: Pixel) {
        self.pixels.fill(color);
    }

    pub fn pixels(&self) -> &[Pixel] {
        &self.pixels
    }

    pub fn fill_checkerboard(&mut self, cell: u32, light: Pixel, dark: Pixel) {
        let cell = cell.max(1);
        let width = self.width as usize;
        self.pixels.par_chunks_mut(width.max(1)).enumerate().for_each(|(y, row)| {
            for (x, px) in row.iter_mut().enumerate() {
                *px = checker(x as u32, y as u32, cell, light, dark);
            }
        });
    }

    pub fn to_rgba_image(&self) -> RgbaImage {
        let mut img = RgbaImage::new(self.width, self.height);
        for (i, px) in img.pixels_mut().enumerate() {
            *px = to_rgba8(self.pixels[i]);
        }
        img
    }
}

#[inline]
fn checker(x: u32, y: u32, cell: u32, light: Pixel, dark: Pixel) -> Pixel {
    if ((x / cell) + (y / cell)) % 2 == 0 { light } else { dark }
}

/// Pick the resampling filter for a layer.  Rotated or scaled layers always
/// use the filtered `transformed` mode; otherwise nearest at 1:1 and above,
/// bilinear when zoomed out.
pub fn choose_interpolation(zoom: f32, transform: &LayerTransform, transformed: Interpolation) -> Interpolation {
    if !transform.is_position_only() {
        return match transformed {
            Interpolation::Nearest => Interpolation::Bilinear,
            mode => mode,
        };
    }
    if zoom >= 1.0 { Interpolation::Nearest } else { Interpolation::Bilinear }
}

// ============================================================================
// COMPOSITOR
// ============================================================================

enum Source<'a> {
    Pixels {
        canvas: &'a TiledCanvas,
        stroke: Option<&'a StrokeBuffer>,
        /// Document → layer mapping; `None` for position-only layers.
        inverse: Option<Mat3>,
        offset: (f32, f32),
        mode: Interpolation,
        blend_mode: BlendMode,
        opacity: f32,
    },
    Adjust {
        adjustment: &'a Adjustment,
        opacity: f32,
    },
}

impl Source<'_> {
    #[inline]
    fn apply(&self, acc: Pixel, dx: f32, dy: f32) -> Pixel {
        match *self {
            Source::Pixels { canvas, stroke, inverse, offset, mode, blend_mode, opacity } => {
                let (lx, ly) = match inverse {
                    Some(m) => apply(&m, dx, dy),
                    None => (dx - offset.0, dy - offset.1),
                };
                // Filtered modes address pixel centres at integer coordinates.
                let (sx, sy) = if mode == Interpolation::Nearest { (lx, ly) } else { (lx - 0.5, ly - 0.5) };
                let mut px = sample(canvas, sx, sy, mode);
                if let Some(buffer) = stroke {
                    let bp = sample(&buffer.canvas, sx, sy, mode);
                    if alpha_of(bp) > 0 {
                        px = buffer.composite_pixel(px, bp);
                    }
                }
                if alpha_of(px) == 0 {
                    return acc;
                }
                blend::blend(acc, px, blend_mode, opacity)
            }
            Source::Adjust { adjustment, opacity } => {
                if alpha_of(acc) == 0 || opacity <= 0.0 {
                    return acc;
                }
                mix_rgb(acc, apply_adjustment(acc, adjustment), opacity)
            }
        }
    }
}

/// Lerp colour channels by `t`, keeping `from`'s alpha.
fn mix_rgb(from: Pixel, to: Pixel, t: f32) -> Pixel {
    if t >= 1.0 {
        return to;
    }
    let f = unpack_rgba(from);
    let g = unpack_rgba(to);
    let ch = |i: usize| (f[i] as f32 + (g[i] as f32 - f[i] as f32) * t).round().clamp(0.0, 255.0) as u8;
    pack_rgba(ch(0), ch(1), ch(2), f[3])
}

/// Renders a [`Document`] into a screen-space [`Framebuffer`].
#[derive(Clone, Debug)]
pub struct Compositor {
    pub checkerboard_size: u32,
    pub checkerboard_light: Pixel,
    pub checkerboard_dark: Pixel,
    pub transformed_sampling: Interpolation,
    pub marching_ants_phase_ms: u64,
}

impl Default for Compositor {
    fn default() -> Self {
        Self::new(&AppSettings::default())
    }
}

impl Compositor {
    pub fn new(settings: &AppSettings) -> Self {
        Self {
            checkerboard_size: settings.checkerboard_size.max(1),
            checkerboard_light: settings.checkerboard_light,
            checkerboard_dark: settings.checkerboard_dark,
            transformed_sampling: settings.transformed_sampling,
            marching_ants_phase_ms: settings.marching_ants_phase_ms.max(1),
        }
    }

    /// Composite the visible layers of `doc` into `viewport` (screen pixels).
    /// Screen pixel `(sx, sy)` shows document point
    /// `((sx + 0.5 - pan.0) / zoom, (sy + 0.5 - pan.1) / zoom)`.  Pixels that
    /// fall outside the document are left untouched.
    pub fn composite_document(
        &self,
        fb: &mut Framebuffer,
        doc: &mut Document,
        viewport: PixelRect,
        zoom: f32,
        pan: (f32, f32),
    ) {
        for layer in &mut doc.layers {
            if layer.visible {
                layer.prepare();
            }
        }
        let doc: &Document = doc;

        let area = viewport.intersect(fb.rect());
        if area.is_empty() || zoom <= 0.0 {
            return;
        }

        let sources: Vec<Source> = doc
            .layers
            .iter()
            .enumerate()
            .filter(|(_, layer)| layer.visible)
            .map(|(i, layer)| {
                let canvas = match &layer.content {
                    LayerContent::Pixel(canvas) => canvas,
                    LayerContent::Text(text) => text.cached(),
                    LayerContent::Adjustment(adjustment) => {
                        return Source::Adjust { adjustment, opacity: layer.opacity };
                    }
                };
                let t = &layer.transform;
                Source::Pixels {
                    canvas,
                    stroke: doc.stroke_buffer.as_ref().filter(|b| b.layer_index == i),
                    inverse: if t.is_position_only() { None } else { Some(t.inverse()) },
                    offset: (t.offset_x, t.offset_y),
                    mode: choose_interpolation(zoom, t, self.transformed_sampling),
                    blend_mode: layer.blend_mode,
                    opacity: layer.opacity,
                }
            })
            .collect();

        let floating = doc.floating.as_ref();
        let (doc_w, doc_h) = (doc.width as f32, doc.height as f32);
        let width = fb.width as usize;

        fb.pixels
            .par_chunks_mut(width)
            .enumerate()
            .skip(area.min_y as usize)
            .take(area.height() as usize)
            .for_each(|(sy, row)| {
                let dy = (sy as f32 + 0.5 - pan.1) / zoom;
                if dy < 0.0 || dy >= doc_h {
                    return;
                }
                for sx in area.min_x..area.max_x {
                    let dx = (sx as f32 + 0.5 - pan.0) / zoom;
                    if dx < 0.0 || dx >= doc_w {
                        continue;
                    }
                    let mut acc = sources.iter().fold(TRANSPARENT, |acc, src| src.apply(acc, dx, dy));
                    if let Some(f) = floating {
                        acc = blend::alpha_blend(acc, floating_pixel(f, dx, dy));
                    }
                    let bg = checker(
                        sx as u32,
                        sy as u32,
                        self.checkerboard_size,
                        self.checkerboard_light,
                        self.checkerboard_dark,
                    );
                    row[sx as usize] = if alpha_of(acc) == 0 { bg } else { blend::alpha_blend(bg, acc) };
                }
            });
    }

    /// Draw the selection outline into `fb`: an 8-phase dashed black/white
    /// pattern advancing every `marching_ants_phase_ms`.
    #[allow(clippy::too_many_arguments)]
    pub fn draw_marching_ants(
        &self,
        fb: &mut Framebuffer,
        doc: &Document,
        viewport: PixelRect,
        zoom: f32,
        pan: (f32, f32),
        time_ms: u64,
    ) {
        let Some(selection) = doc.selection.as_ref() else {
            return;
        };
        let area = viewport.intersect(fb.rect());
        if area.is_empty() || zoom <= 0.0 {
            return;
        }
        // The outline travels with a floating selection.
        let (ox, oy) = doc.floating.as_ref().map_or((0, 0), |f| f.offset);
        let phase = ((time_ms / self.marching_ants_phase_ms) % 8) as i32;
        // Outline thickness in document pixels: one screen pixel, at most one document pixel.
        let edge = (1.0 / zoom).min(1.0);

        for sy in area.min_y..area.max_y {
            let dy = (sy as f32 + 0.5 - pan.1) / zoom;
            let y = dy.floor() as i32;
            let fy = dy - y as f32;
            for sx in area.min_x..area.max_x {
                let dx = (sx as f32 + 0.5 - pan.0) / zoom;
                let x = dx.floor() as i32;
                let fx = dx - x as f32;
                let (mx, my) = (x - ox, y - oy);
                if !selection.is_boundary(mx, my) {
                    continue;
                }
                let on_edge = (!selection.is_selected(mx - 1, my) && fx < edge)
                    || (!selection.is_selected(mx + 1, my) && fx >= 1.0 - edge)
                    || (!selection.is_selected(mx, my - 1) && fy < edge)
                    || (!selection.is_selected(mx, my + 1) && fy >= 1.0 - edge);
                if !on_edge {
                    continue;
                }
                let dash = (x + y + phase).div_euclid(4).rem_euclid(2) == 0;
                fb.set(sx, sy, if dash { 0x0000_00FF } else { 0xFFFF_FFFF });
            }
        }
    }
}

#[inline]
fn floating_pixel(f: &FloatingSelection, dx: f32, dy: f32) -> Pixel {
    let x = dx.floor() as i32 - f.offset.0;
    let y = dy.floor() as i32 - f.offset.1;
    if !f.original_bounds.contains(x, y) {
        return TRANSPARENT;
    }
    f.pixels.get_pixel(x, y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::Layer;
    use crate::selection::{Selection, SelectionShape};

    const RED: Pixel = 0xFF00_00FF;
    const WHITE: Pixel = 0xFFFF_FFFF;
    const LIGHT: Pixel = 0xFFFF_FFFF;
    const DARK: Pixel = 0xCCCC_CCFF;

    fn render(doc: &mut Document, zoom: f32) -> Framebuffer {
        let w = (doc.width as f32 * zoom).ceil() as u32;
        let h = (doc.height as f32 * zoom).ceil() as u32;
        let mut fb = Framebuffer::new(w, h);
        let rect = fb.rect();
        Compositor::default().composite_document(&mut fb, doc, rect, zoom, (0.0, 0.0));
        fb
    }

    #[test]
    fn checkerboard_alternates_cells() {
        let mut fb = Framebuffer::new(32, 32);
        fb.fill_checkerboard(8, LIGHT, DARK);
        assert_eq!(fb.get(0, 0), LIGHT);
        assert_eq!(fb.get(8, 0), DARK);
        assert_eq!(fb.get(8, 8), LIGHT);
        assert_eq!(fb.to_rgba_image().get_pixel(8, 0).0, [0xCC, 0xCC, 0xCC, 0xFF]);
    }

    #[test]
    fn empty_document_shows_checkerboard() {
        let mut doc = Document::empty(16, 16);
        let fb = render(&mut doc, 1.0);
        assert_eq!(fb.get(0, 0), LIGHT);
        assert_eq!(fb.get(9, 0), DARK);
    }

    #[test]
    fn opaque_layer_is_copied_at_unit_zoom() {
        let mut doc = Document::new(16, 16);
        if let Some(c) = doc.active_pixel_layer() {
            c.set_pixel(3, 4, RED);
        }
        let fb = render(&mut doc, 1.0);
        assert_eq!(fb.get(3, 4), RED);
        assert_eq!(fb.get(4, 4), WHITE);
    }

    #[test]
    fn layer_blend_mode_and_opacity_apply() {
        let mut doc = Document::new(8, 8);
        let top = doc.add_pixel_layer("Top");
        if let Some(c) = doc.layers[top].pixels_mut() {
            c.set_pixel(0, 0, RED);
        }
        doc.layers[top].blend_mode = BlendMode::Multiply;
        doc.layers[top].opacity = 0.5;
        let fb = render(&mut doc, 1.0);
        assert_eq!(fb.get(0, 0), blend::blend(WHITE, RED, BlendMode::Multiply, 0.5));
    }

    #[test]
    fn hidden_layers_are_skipped() {
        let mut doc = Document::new(8, 8);
        doc.layers[0].visible = false;
        let fb = render(&mut doc, 1.0);
        assert_eq!(fb.get(0, 0), LIGHT);
    }

    #[test]
    fn zoom_maps_screen_to_document() {
        let mut doc = Document::new(8, 8);
        if let Some(c) = doc.active_pixel_layer() {
            c.set_pixel(1, 0, RED);
        }
        let fb = render(&mut doc, 2.0);
        assert_eq!(fb.get(1, 1), WHITE);
        assert_eq!(fb.get(2, 0), RED);
        assert_eq!(fb.get(3, 1), RED);
        assert_eq!(fb.get(4, 0), WHITE);
    }

    #[test]
    fn pan_leaves_outside_pixels_untouched() {
        let mut doc = Document::new(4, 4);
        let mut fb = Framebuffer::new(8, 8);
        fb.clear(0x1111_11FF);
        let rect = fb.rect();
        Compositor::default().composite_document(&mut fb, &mut doc, rect, 1.0, (2.0, 2.0));
        assert_eq!(fb.get(0, 0), 0x1111_11FF);
        assert_eq!(fb.get(2, 2), WHITE);
        assert_eq!(fb.get(6, 6), 0x1111_11FF);
    }

    #[test]
    fn adjustment_layer_filters_what_is_below() {
        let mut doc = Document::new(4, 4);
        doc.add_adjustment_layer(Adjustment::Invert);
        let fb = render(&mut doc, 1.0);
        assert_eq!(fb.get(0, 0), 0x0000_00FF);

        doc.layers[1].opacity = 0.0;
        let fb = render(&mut doc, 1.0);
        assert_eq!(fb.get(0, 0), WHITE);
    }

    #[test]
    fn stroke_buffer_previews_paint_and_erase() {
        let mut doc = Document::new(8, 8);
        let mut buffer = TiledCanvas::new(8, 8);
        buffer.set_pixel(2, 2, RED);
        doc.stroke_buffer = Some(StrokeBuffer {
            canvas: buffer.clone(),
            layer_index: 0,
            opacity: 1.0,
            blend_mode: BlendMode::Normal,
            erase: false,
        });
        let fb = render(&mut doc, 1.0);
        assert_eq!(fb.get(2, 2), RED);
        assert_eq!(fb.get(3, 2), WHITE);

        if let Some(b) = doc.stroke_buffer.as_mut() {
            b.erase = true;
        }
        let fb = render(&mut doc, 1.0);
        // Background erased to nothing: the checkerboard shows through.
        assert_eq!(fb.get(2, 2), LIGHT);
        // The layer itself is untouched until the stroke commits.
        assert_eq!(doc.layers[0].pixels().map(|c| c.get_pixel(2, 2)), Some(WHITE));
    }

    #[test]
    fn floating_selection_draws_at_offset() {
        let mut doc = Document::new(16, 16);
        let mut pixels = TiledCanvas::new(16, 16);
        pixels.set_pixel(1, 1, RED);
        doc.floating = Some(FloatingSelection {
            pixels,
            original_bounds: PixelRect::new(0, 0, 4, 4),
            offset: (5, 0),
            layer_index: 0,
        });
        let fb = render(&mut doc, 1.0);
        assert_eq!(fb.get(6, 1), RED);
        assert_eq!(fb.get(1, 1), WHITE);
    }

    #[test]
    fn text_layer_uses_cached_raster() {
        use crate::layer::tests::BlockRasterizer;
        use crate::ops::text::TextStyle;
        use std::sync::Arc;

        let mut doc = Document::new(8, 8);
        let style = TextStyle { text: "ab".into(), color: RED, origin_x: 2.0, origin_y: 3.0, ..Default::default() };
        doc.add_text_layer("Text", style, Arc::new(BlockRasterizer::default()));
        let fb = render(&mut doc, 1.0);
        assert_eq!(fb.get(2, 3), RED);
        assert_eq!(fb.get(3, 3), RED);
        assert_eq!(fb.get(4, 3), WHITE);
    }

    #[test]
    fn rotated_layer_is_filtered() {
        let mut doc = Document::empty(16, 16);
        doc.layers.push(Layer::new_filled("Square", 16, 16, RED));
        doc.layers[0].transform = LayerTransform { rotation: 45.0, pivot_x: 8.0, pivot_y: 8.0, ..Default::default() };
        let fb = render(&mut doc, 1.0);
        assert_eq!(fb.get(8, 8), RED);
        // The rotated corner leaves the document corner empty.
        assert_eq!(fb.get(0, 0), LIGHT);
    }

    #[test]
    fn interpolation_policy() {
        let plain = LayerTransform::translation(3.0, 1.0);
        let rotated = LayerTransform { rotation: 10.0, ..Default::default() };
        assert_eq!(choose_interpolation(2.0, &plain, Interpolation::Bicubic), Interpolation::Nearest);
        assert_eq!(choose_interpolation(1.0, &plain, Interpolation::Bicubic), Interpolation::Nearest);
        assert_eq!(choose_interpolation(0.5, &plain, Interpolation::Bicubic), Interpolation::Bilinear);
        assert_eq!(choose_interpolation(4.0, &rotated, Interpolation::Bicubic), Interpolation::Bicubic);
        assert_eq!(choose_interpolation(4.0, &rotated, Interpolation::Nearest), Interpolation::Bilinear);
    }

    #[test]
    fn marching_ants_trace_the_boundary() {
        let mut doc = Document::new(16, 16);
        doc.selection = Some(Selection::from_shape(16, 16, &SelectionShape::Rectangle {
            min_x: 2,
            min_y: 2,
            max_x: 9,
            max_y: 9,
        }));
        let compositor = Compositor::default();
        let mut fb = Framebuffer::new(16, 16);
        fb.clear(RED);
        let rect = fb.rect();
        compositor.draw_marching_ants(&mut fb, &doc, rect, 1.0, (0.0, 0.0), 0);

        // Interior and exterior untouched.
        assert_eq!(fb.get(5, 5), RED);
        assert_eq!(fb.get(0, 0), RED);
        // Dash index is (x + y + phase) / 4, even = black.
        assert_eq!(fb.get(2, 2), WHITE);
        assert_eq!(fb.get(9, 9), 0x0000_00FF);

        // One phase later the pattern shifts by one pixel.
        let mut later = Framebuffer::new(16, 16);
        later.clear(RED);
        compositor.draw_marching_ants(&mut later, &doc, rect, 1.0, (0.0, 0.0), 100);
        assert_eq!(later.get(9, 9), 0x0000_00FF);
        let mut shifted = Framebuffer::new(16, 16);
        shifted.clear(RED);
        compositor.draw_marching_ants(&mut shifted, &doc, rect, 1.0, (0.0, 0.0), 200);
        assert_eq!(shifted.get(9, 9), WHITE);
    }

    #[test]
    fn marching_ants_are_thin_when_zoomed_in() {
        let mut doc = Document::new(8, 8);
        doc.selection = Some(Selection::from_shape(8, 8, &SelectionShape::Rectangle {
            min_x: 0,
            min_y: 0,
            max_x: 3,
            max_y: 3,
        }));
        let mut fb = Framebuffer::new(32, 32);
        fb.clear(RED);
        let rect = fb.rect();
        Compositor::default().draw_marching_ants(&mut fb, &doc, rect, 4.0, (0.0, 0.0), 0);
        // Doc pixel (3,1) covers screen 12..16; only its right-hand column is outline.
        assert_eq!(fb.get(13, 5), RED);
        assert_ne!(fb.get(15, 5), RED);
    }
}
