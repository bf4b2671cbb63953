use std::sync::Arc;

use crate::blend::BlendMode;
use crate::canvas::{Pixel, TiledCanvas};
use crate::ops::adjustments::Adjustment;
use crate::ops::text::{TextRasterizer, TextStyle};

// ============================================================================
// LAYER TRANSFORM – offset / rotation / scale about a pivot
// ============================================================================

pub type Mat3 = [[f32; 3]; 3];

const IDENTITY: Mat3 = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

/// Maps layer coordinates to document coordinates:
/// `doc = offset + pivot + R(rotation) * S(scale) * (layer - pivot)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LayerTransform {
    pub offset_x: f32,
    pub offset_y: f32,
    /// Degrees, clockwise in screen space.
    pub rotation: f32,
    pub scale_x: f32,
    pub scale_y: f32,
    pub pivot_x: f32,
    pub pivot_y: f32,
}

impl Default for LayerTransform {
    fn default() -> Self {
        Self { offset_x: 0.0, offset_y: 0.0, rotation: 0.0, scale_x: 1.0, scale_y: 1.0, pivot_x: 0.0, pivot_y: 0.0 }
    }
}

impl LayerTransform {
    pub fn translation(dx: f32, dy: f32) -> Self {
        Self { offset_x: dx, offset_y: dy, ..Self::default() }
    }

    /// No rotation and unit scale; only the offset applies.
    pub fn is_position_only(&self) -> bool {
        self.rotation.abs() < 1e-4 && (self.scale_x - 1.0).abs() < 1e-4 && (self.scale_y - 1.0).abs() < 1e-4
    }

    pub fn is_identity(&self) -> bool {
        self.is_position_only() && self.offset_x == 0.0 && self.offset_y == 0.0
    }

    pub fn matrix(&self) -> Mat3 {
        let (sin, cos) = self.rotation.to_radians().sin_cos();
        let (sx, sy) = (self.scale_x, self.scale_y);
        let a = cos * sx;
        let b = -sin * sy;
        let c = sin * sx;
        let d = cos * sy;
        let tx = self.offset_x + self.pivot_x - (a * self.pivot_x + b * self.pivot_y);
        let ty = self.offset_y + self.pivot_y - (c * self.pivot_x + d * self.pivot_y);
        [[a, b, tx], [c, d, ty], [0.0, 0.0, 1.0]]
    }

    /// Document → layer mapping.  A degenerate (zero-scale) transform yields
    /// the identity.
    pub fn inverse(&self) -> Mat3 {
        invert_3x3(self.matrix())
    }

    pub fn to_document(&self, x: f32, y: f32) -> (f32, f32) {
        apply(&self.matrix(), x, y)
    }

    pub fn to_layer(&self, x: f32, y: f32) -> (f32, f32) {
        if self.is_position_only() {
            return (x - self.offset_x, y - self.offset_y);
        }
        apply(&self.inverse(), x, y)
    }
}

#[inline]
pub fn apply(m: &Mat3, x: f32, y: f32) -> (f32, f32) {
    (m[0][0] * x + m[0][1] * y + m[0][2], m[1][0] * x + m[1][1] * y + m[1][2])
}

fn invert_3x3(m: Mat3) -> Mat3 {
    let (a, b, c) = (m[0][0], m[0][1], m[0][2]);
    let (d, e, f) = (m[1][0], m[1][1], m[1][2]);
    let (g, h, i) = (m[2][0], m[2][1], m[2][2]);

    let det = a * (e * i - f * h) - b * (d * i - f * g) + c * (d * h - e * g);
    if det.abs() < 1e-12 {
        return IDENTITY;
    }
    let inv = 1.0 / det;
    [
        [(e * i - f * h) * inv, (c * h - b * i) * inv, (b * f - c * e) * inv],
        [(f * g - d * i) * inv, (a * i - c * g) * inv, (c * d - a * f) * inv],
        [(d * h - e * g) * inv, (b * g - a * h) * inv, (a * e - b * d) * inv],
    ]
}

// ============================================================================
// TEXT LAYER – style plus a lazily rebuilt raster cache
// ============================================================================

#[derive(Clone)]
pub struct TextLayer {
    style: TextStyle,
    rasterizer: Arc<dyn TextRasterizer>,
    cache: TiledCanvas,
    cache_valid: bool,
}

impl std::fmt::Debug for TextLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextLayer")
            .field("style", &self.style)
            .field("cache_valid", &self.cache_valid)
            .finish_non_exhaustive()
    }
}

impl TextLayer {
    pub fn new(style: TextStyle, rasterizer: Arc<dyn TextRasterizer>, width: u32, height: u32) -> Self {
        Self { style, rasterizer, cache: TiledCanvas::new(width, height), cache_valid: false }
    }

    pub fn style(&self) -> &TextStyle {
        &self.style
    }

    /// Mutable access to the style; the raster cache is invalidated.
    pub fn style_mut(&mut self) -> &mut TextStyle {
        self.cache_valid = false;
        &mut self.style
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.style_mut().text = text.into();
    }

    pub fn set_color(&mut self, color: Pixel) {
        self.style_mut().color = color;
    }

    pub fn is_cache_valid(&self) -> bool {
        self.cache_valid
    }

    pub fn invalidate(&mut self) {
        self.cache_valid = false;
    }

    /// Re-rasterize if the style changed since the last call.
    pub fn ensure_cache_valid(&mut self) {
        if self.cache_valid {
            return;
        }
        self.cache.clear();
        self.rasterizer.rasterize(&self.style, &mut self.cache);
        self.cache_valid = true;
    }

    /// Last rasterization.  Stale until [`ensure_cache_valid`](Self::ensure_cache_valid) runs.
    pub fn cached(&self) -> &TiledCanvas {
        &self.cache
    }

    fn set_logical_size(&mut self, width: u32, height: u32) {
        self.cache.set_logical_size(width, height);
    }

    /// Rasterize into a fresh pixel canvas.
    pub fn rasterize_to_canvas(&self, width: u32, height: u32) -> TiledCanvas {
        let mut canvas = TiledCanvas::new(width, height);
        self.rasterizer.rasterize(&self.style, &mut canvas);
        canvas
    }
}

// ============================================================================
// LAYER
// ============================================================================

#[derive(Clone, Debug)]
pub enum LayerContent {
    Pixel(TiledCanvas),
    Text(TextLayer),
    Adjustment(Adjustment),
}

#[derive(Clone, Debug)]
pub struct Layer {
    pub name: String,
    pub visible: bool,
    pub locked: bool,
    pub opacity: f32,
    pub blend_mode: BlendMode,
    pub transform: LayerTransform,
    pub content: LayerContent,
}

impl Layer {
    fn with_content(name: impl Into<String>, content: LayerContent) -> Self {
        Self {
            name: name.into(),
            visible: true,
            locked: false,
            opacity: 1.0,
            blend_mode: BlendMode::Normal,
            transform: LayerTransform::default(),
            content,
        }
    }

    pub fn new_pixel(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self::with_content(name, LayerContent::Pixel(TiledCanvas::new(width, height)))
    }

    pub fn new_filled(name: impl Into<String>, width: u32, height: u32, color: Pixel) -> Self {
        Self::with_content(name, LayerContent::Pixel(TiledCanvas::new_filled(width, height, color)))
    }

    pub fn from_canvas(name: impl Into<String>, canvas: TiledCanvas) -> Self {
        Self::with_content(name, LayerContent::Pixel(canvas))
    }

    pub fn new_text(name: impl Into<String>, text: TextLayer) -> Self {
        Self::with_content(name, LayerContent::Text(text))
    }

    pub fn new_adjustment(adjustment: Adjustment) -> Self {
        Self::with_content(adjustment.name(), LayerContent::Adjustment(adjustment))
    }

    pub fn pixels(&self) -> Option<&TiledCanvas> {
        match &self.content {
            LayerContent::Pixel(canvas) => Some(canvas),
            _ => None,
        }
    }

    pub fn pixels_mut(&mut self) -> Option<&mut TiledCanvas> {
        match &mut self.content {
            LayerContent::Pixel(canvas) => Some(canvas),
            _ => None,
        }
    }

    pub fn is_pixel(&self) -> bool {
        matches!(self.content, LayerContent::Pixel(_))
    }

    /// Deep copy with " copy" appended to the name.
    pub fn duplicate(&self) -> Self {
        let mut copy = self.clone();
        copy.name = format!("{} copy", self.name);
        copy
    }

    /// Make text/pixel content ready for sampling.
    pub fn prepare(&mut self) {
        if let LayerContent::Text(text) = &mut self.content {
            text.ensure_cache_valid();
        }
    }

    pub fn set_logical_size(&mut self, width: u32, height: u32) {
        match &mut self.content {
            LayerContent::Pixel(canvas) => canvas.set_logical_size(width, height),
            LayerContent::Text(text) => text.set_logical_size(width, height),
            LayerContent::Adjustment(_) => {}
        }
    }

    /// Approximate heap footprint.
    pub fn memory_bytes(&self) -> usize {
        match &self.content {
            LayerContent::Pixel(canvas) => canvas.memory_bytes(),
            LayerContent::Text(text) => text.cached().memory_bytes(),
            LayerContent::Adjustment(_) => 0,
        }
    }
}
