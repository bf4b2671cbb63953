use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::blend::{self, BlendMode};
use crate::canvas::{
    Pixel, PixelRect, TILE_SIZE, TRANSPARENT, TileCoord, TileKey, TiledCanvas, alpha_of, floor_mod, unit_to_byte,
    with_alpha,
};
use crate::components::brush::{BrushDynamics, BrushStamp, BrushTip, PressureCurve, StampCache, StampShape};
use crate::document::{Document, StrokeBuffer};
use crate::layer::{Layer, LayerTransform};
use crate::selection::Selection;

// ============================================================================
// TOOL EVENTS
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PointerType {
    #[default]
    Mouse,
    Pen,
    Touch,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Modifiers {
    pub shift: bool,
    pub ctrl: bool,
    pub alt: bool,
}

/// Pointer sample in document coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ToolEvent {
    pub x: f32,
    pub y: f32,
    pub pressure: f32,
    pub tilt_x: f32,
    pub tilt_y: f32,
    pub zoom: f32,
    pub pointer_type: PointerType,
    pub modifiers: Modifiers,
}

impl ToolEvent {
    /// Full-pressure mouse event at `(x, y)`.
    pub fn at(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            pressure: 1.0,
            tilt_x: 0.0,
            tilt_y: 0.0,
            zoom: 1.0,
            pointer_type: PointerType::Mouse,
            modifiers: Modifiers::default(),
        }
    }

    /// Same position as a pen sample with the given pressure.
    pub fn with_pressure(self, pressure: f32) -> Self {
        Self { pressure, pointer_type: PointerType::Pen, ..self }
    }
}

// ============================================================================
// BRUSH SETTINGS
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BrushMode {
    #[default]
    Brush,
    /// Hard aliased stamp written straight to the layer.
    Pencil,
}

/// How dabs reach the layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StrokeModel {
    /// Dabs accumulate at flow in a stroke buffer that is folded into the
    /// layer at the stroke opacity on mouse up.
    Buffered,
    /// Dabs are written to the layer immediately, clamped per pixel to the
    /// stroke opacity by an accumulated-coverage map.
    OpacityLimited,
}

/// What a dab does to the pixels under it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StampOp {
    Paint { color: Pixel, mode: BlendMode },
    Erase,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrushSettings {
    pub color: Pixel,
    /// Diameter in pixels.
    pub size: f32,
    pub hardness: f32,
    /// Dab spacing as a fraction of the stamp size.
    pub spacing: f32,
    pub flow: f32,
    pub opacity: f32,
    pub blend_mode: BlendMode,
    /// Tip rotation in degrees.
    pub angle: f32,
    pub tip: Option<BrushTip>,
    pub dynamics: BrushDynamics,
    pub pressure_curve: PressureCurve,
    pub pressure_size: bool,
    pub pressure_flow: bool,
    pub mode: BrushMode,
    pub erase: bool,
    /// Erase straight into the layer instead of through a stroke buffer.
    pub erase_direct: bool,
}

impl Default for BrushSettings {
    fn default() -> Self {
        Self {
            color: 0x0000_00FF,
            size: 10.0,
            hardness: 0.8,
            spacing: 0.1,
            flow: 1.0,
            opacity: 1.0,
            blend_mode: BlendMode::Normal,
            angle: 0.0,
            tip: None,
            dynamics: BrushDynamics::default(),
            pressure_curve: PressureCurve::default(),
            pressure_size: true,
            pressure_flow: false,
            mode: BrushMode::Brush,
            erase: false,
            erase_direct: false,
        }
    }
}

impl BrushSettings {
    pub fn stroke_model(&self) -> StrokeModel {
        if self.mode == BrushMode::Pencil || (self.erase && self.erase_direct) {
            StrokeModel::OpacityLimited
        } else {
            StrokeModel::Buffered
        }
    }

    pub fn stamp_shape(&self, angle: f32) -> StampShape {
        match (&self.mode, &self.tip) {
            (BrushMode::Pencil, _) => StampShape::Pencil,
            (BrushMode::Brush, Some(tip)) => StampShape::Tip { id: tip.id(), angle },
            (BrushMode::Brush, None) => StampShape::Round { hardness: self.hardness },
        }
    }

    /// Undo step name for a stroke made with these settings.
    pub fn stroke_name(&self) -> &'static str {
        match (self.erase, self.mode) {
            (true, _) => "Eraser",
            (false, BrushMode::Pencil) => "Pencil",
            (false, BrushMode::Brush) => "Brush Stroke",
        }
    }
}

// ============================================================================
// STAMPING
// ============================================================================

/// Selection clip for a layer.  Stamps are placed in layer pixel space; the
/// selection lives in document space.
pub struct StampClip<'a> {
    selection: &'a Selection,
    transform: LayerTransform,
}

impl<'a> StampClip<'a> {
    pub fn new(selection: &'a Selection, transform: &LayerTransform) -> Self {
        Self { selection, transform: *transform }
    }

    #[inline]
    pub fn coverage(&self, x: i32, y: i32) -> f32 {
        if self.transform.is_identity() {
            return self.selection.coverage(x, y);
        }
        let (dx, dy) = self.transform.to_document(x as f32 + 0.5, y as f32 + 0.5);
        self.selection.coverage(dx.floor() as i32, dy.floor() as i32)
    }
}

/// Per-stroke accumulated coverage plus the stroke-start value of every
/// touched pixel, stored densely for each touched tile.
#[derive(Default)]
pub struct CoverageMap {
    tiles: HashMap<TileKey, CoverageTile>,
}

struct CoverageTile {
    coverage: Box<[f32]>,
    original: Box<[Pixel]>,
}

impl CoverageTile {
    fn new() -> Self {
        let n = (TILE_SIZE * TILE_SIZE) as usize;
        Self { coverage: vec![0.0; n].into_boxed_slice(), original: vec![0; n].into_boxed_slice() }
    }
}

impl CoverageMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn index(x: i32, y: i32) -> (TileKey, usize) {
        let key = TileCoord::of_pixel(x, y).key();
        (key, (floor_mod(y, TILE_SIZE) * TILE_SIZE + floor_mod(x, TILE_SIZE)) as usize)
    }

    pub fn get(&self, x: i32, y: i32) -> f32 {
        let (key, i) = Self::index(x, y);
        self.tiles.get(&key).map_or(0.0, |t| t.coverage[i])
    }

    /// Pixel value before this stroke first touched `(x, y)`.
    pub fn original(&self, x: i32, y: i32) -> Option<Pixel> {
        let (key, i) = Self::index(x, y);
        self.tiles.get(&key).filter(|t| t.coverage[i] > 0.0).map(|t| t.original[i])
    }

    /// Store `value` as the accumulated coverage.  On the first touch the
    /// current pixel is recorded via `current`.  Returns the recorded pixel.
    pub fn advance(&mut self, x: i32, y: i32, value: f32, current: impl FnOnce() -> Pixel) -> Pixel {
        let (key, i) = Self::index(x, y);
        let tile = self.tiles.entry(key).or_insert_with(CoverageTile::new);
        if tile.coverage[i] <= 0.0 {
            tile.original[i] = current();
        }
        tile.coverage[i] = value;
        tile.original[i]
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    pub fn clear(&mut self) {
        self.tiles.clear();
    }
}

#[inline]
fn apply_op(target: &mut TiledCanvas, x: i32, y: i32, op: StampOp, amount: f32) {
    match op {
        StampOp::Paint { color, mode } => {
            let a = unit_to_byte(alpha_of(color) as f32 / 255.0 * amount);
            if a > 0 {
                target.blend_pixel(x, y, with_alpha(color, a), mode, 1.0);
            }
        }
        StampOp::Erase => target.erase_pixel(x, y, amount),
    }
}

/// Stroke-start pixel with the op applied once at the accumulated coverage.
#[inline]
fn limited_pixel(original: Pixel, op: StampOp, coverage: f32) -> Pixel {
    match op {
        StampOp::Paint { color, mode } => blend::blend(original, color, mode, coverage),
        StampOp::Erase => {
            let a = unit_to_byte(alpha_of(original) as f32 / 255.0 * (1.0 - coverage));
            if a == 0 { TRANSPARENT } else { with_alpha(original, a) }
        }
    }
}

/// Apply one dab with "over" accumulation.  Returns the stamp rectangle.
pub fn stamp_dab(
    target: &mut TiledCanvas,
    stamp: &BrushStamp,
    cx: f32,
    cy: f32,
    op: StampOp,
    flow: f32,
    clip: Option<&StampClip>,
) -> PixelRect {
    let rect = stamp.rect_at(cx, cy);
    for y in rect.min_y..rect.max_y {
        for x in rect.min_x..rect.max_x {
            let (sx, sy) = (x.abs_diff(rect.min_x), y.abs_diff(rect.min_y));
            let mut cov = stamp.coverage(sx, sy) * flow;
            if let Some(clip) = clip {
                cov *= clip.coverage(x, y);
            }
            if cov > 0.0 {
                apply_op(target, x, y, op, cov);
            }
        }
    }
    rect
}

/// Apply one dab written straight to the layer, never letting the stroke's
/// accumulated coverage at any pixel exceed `ceiling`.  Each pixel is
/// recomputed from its stroke-start value, so rounding never accumulates.
#[allow(clippy::too_many_arguments)]
pub fn stamp_dab_with_opacity_limit(
    target: &mut TiledCanvas,
    stamp: &BrushStamp,
    cx: f32,
    cy: f32,
    op: StampOp,
    flow: f32,
    ceiling: f32,
    coverage: &mut CoverageMap,
    clip: Option<&StampClip>,
) -> PixelRect {
    let rect = stamp.rect_at(cx, cy);
    let ceiling = ceiling.clamp(0.0, 1.0);
    for y in rect.min_y..rect.max_y {
        for x in rect.min_x..rect.max_x {
            let (sx, sy) = (x.abs_diff(rect.min_x), y.abs_diff(rect.min_y));
            let mut cov = stamp.coverage(sx, sy) * flow;
            if let Some(clip) = clip {
                cov *= clip.coverage(x, y);
            }
            if cov <= 0.0 {
                continue;
            }
            let prev = coverage.get(x, y);
            if prev >= ceiling {
                continue;
            }
            let next = (prev + cov * (1.0 - prev)).min(ceiling);
            let original = coverage.advance(x, y, next, || target.get_pixel(x, y));
            target.set_pixel(x, y, limited_pixel(original, op, next));
        }
    }
    rect
}

// ============================================================================
// BRUSH RENDERER – Idle → Stroking → Idle
// ============================================================================

/// Buffer colour for erase strokes; only the alpha is used.
const ERASE_MASK: Pixel = 0xFFFF_FFFF;

struct ActiveStroke {
    layer_index: usize,
    model: StrokeModel,
    transform: LayerTransform,
    pointer: PointerType,
    last: (f32, f32),
    last_pressure: f32,
    direction: (f32, f32),
    /// Distance travelled since the last dab.
    carry: f32,
    dab_count: u32,
    bounds: PixelRect,
    coverage: CoverageMap,
}

enum StrokeState {
    Idle,
    Stroking(ActiveStroke),
}

pub struct BrushRenderer {
    pub settings: BrushSettings,
    /// Drop tiles an erase stroke left fully transparent.
    pub prune_after_erase: bool,
    stamps: StampCache,
    state: StrokeState,
}

impl BrushRenderer {
    pub fn new(settings: BrushSettings) -> Self {
        Self { settings, prune_after_erase: true, stamps: StampCache::new(), state: StrokeState::Idle }
    }

    pub fn is_stroking(&self) -> bool {
        matches!(self.state, StrokeState::Stroking(_))
    }

    pub fn stamp_cache(&self) -> &StampCache {
        &self.stamps
    }

    /// Start a stroke on the active layer.  Returns `false` (and stays idle)
    /// when the active layer cannot be painted.
    pub fn on_mouse_down(&mut self, doc: &mut Document, ev: &ToolEvent) -> bool {
        if self.is_stroking() {
            return false;
        }
        let layer_index = doc.active_layer_index;
        let Some(layer) = doc.layers.get(layer_index) else {
            log_warn!("Brush: no active layer");
            return false;
        };
        let Some(canvas) = layer.pixels() else {
            log_warn!("Brush: layer '{}' is not a pixel layer", layer.name);
            return false;
        };
        if layer.locked || !layer.visible {
            log_warn!("Brush: layer '{}' is locked or hidden", layer.name);
            return false;
        }

        let transform = layer.transform;
        let model = self.settings.stroke_model();
        if model == StrokeModel::Buffered {
            doc.stroke_buffer = Some(StrokeBuffer {
                canvas: TiledCanvas::new(canvas.width(), canvas.height()),
                layer_index,
                opacity: self.settings.opacity.clamp(0.0, 1.0),
                blend_mode: self.settings.blend_mode,
                erase: self.settings.erase,
            });
        }
        log_info!("Stroke begin: {} on layer '{}'", self.settings.stroke_name(), layer.name);

        let (x, y) = transform.to_layer(ev.x, ev.y);
        let mut stroke = ActiveStroke {
            layer_index,
            model,
            transform,
            pointer: ev.pointer_type,
            last: (x, y),
            last_pressure: ev.pressure,
            direction: (0.0, 0.0),
            carry: 0.0,
            dab_count: 0,
            bounds: PixelRect::default(),
            coverage: CoverageMap::new(),
        };
        place_dab(&self.settings, &mut self.stamps, &mut stroke, doc, x, y, ev.pressure);
        self.state = StrokeState::Stroking(stroke);
        true
    }

    /// Interpolate dabs from the previous sample to this one.
    pub fn on_mouse_drag(&mut self, doc: &mut Document, ev: &ToolEvent) {
        let StrokeState::Stroking(stroke) = &mut self.state else {
            return;
        };
        let (x, y) = stroke.transform.to_layer(ev.x, ev.y);
        let (dx, dy) = (x - stroke.last.0, y - stroke.last.1);
        let dist = (dx * dx + dy * dy).sqrt();
        if dist <= f32::EPSILON {
            return;
        }
        stroke.direction = (dx, dy);

        let pressure_scale = match (stroke.pointer, self.settings.pressure_size) {
            (PointerType::Mouse, _) | (_, false) => 1.0,
            _ => self.settings.pressure_curve.evaluate(ev.pressure),
        };
        let step = (self.settings.size * pressure_scale * self.settings.spacing).max(1.0);

        let (x0, y0, p0) = (stroke.last.0, stroke.last.1, stroke.last_pressure);
        let mut d = step - stroke.carry;
        while d <= dist {
            let t = d / dist;
            let pressure = p0 + (ev.pressure - p0) * t;
            place_dab(&self.settings, &mut self.stamps, stroke, doc, x0 + dx * t, y0 + dy * t, pressure);
            d += step;
        }
        stroke.carry = dist - (d - step);
        stroke.last = (x, y);
        stroke.last_pressure = ev.pressure;
    }

    /// Finish the stroke: fold the buffer into the layer and record one undo
    /// step.  Returns the document-space area the stroke touched.
    pub fn on_mouse_up(&mut self, doc: &mut Document, ev: &ToolEvent) -> Option<PixelRect> {
        self.on_mouse_drag(doc, ev);
        let StrokeState::Stroking(stroke) = std::mem::replace(&mut self.state, StrokeState::Idle) else {
            return None;
        };
        let index = stroke.layer_index;

        if stroke.model == StrokeModel::Buffered {
            if let Some(buffer) = doc.stroke_buffer.take() {
                if !stroke.bounds.is_empty() {
                    doc.capture_original_tiles_in_rect(index, stroke.bounds);
                    if let Some(canvas) = doc.layers.get_mut(index).and_then(Layer::pixels_mut) {
                        buffer.canvas.for_each_pixel(|x, y, src| {
                            let dst = canvas.get_pixel(x, y);
                            canvas.set_pixel(x, y, buffer.composite_pixel(dst, src));
                        });
                    }
                }
            }
        }

        if self.settings.erase && self.prune_after_erase {
            if let Some(canvas) = doc.layers.get_mut(index).and_then(Layer::pixels_mut) {
                let pruned = canvas.prune_empty_tiles();
                if pruned > 0 {
                    log_info!("Pruned {} empty tiles after erase", pruned);
                }
            }
        }

        let name = self.settings.stroke_name();
        let committed = doc.commit_undo(name);
        let rect = doc.layer_rect_to_document(index, stroke.bounds);
        doc.notify_changed(rect);
        log_info!("Stroke end: {} – {} dabs, bounds {:?}, recorded: {}", name, stroke.dab_count, rect, committed);
        Some(rect)
    }

    /// Abort the stroke.  Buffered strokes leave the layer untouched; direct
    /// strokes restore the captured tiles.
    pub fn cancel(&mut self, doc: &mut Document) {
        let StrokeState::Stroking(stroke) = std::mem::replace(&mut self.state, StrokeState::Idle) else {
            return;
        };
        doc.stroke_buffer = None;
        doc.discard_capture(true);
        let rect = doc.layer_rect_to_document(stroke.layer_index, stroke.bounds);
        doc.notify_changed(rect);
        log_info!("Stroke cancelled after {} dabs", stroke.dab_count);
    }
}

fn place_dab(
    settings: &BrushSettings,
    stamps: &mut StampCache,
    stroke: &mut ActiveStroke,
    doc: &mut Document,
    x: f32,
    y: f32,
    pressure: f32,
) {
    let p = match stroke.pointer {
        PointerType::Mouse => 1.0,
        _ => settings.pressure_curve.evaluate(pressure),
    };
    let size = if settings.pressure_size { settings.size * p } else { settings.size };
    let flow = if settings.pressure_flow { settings.flow * p } else { settings.flow }.clamp(0.0, 1.0);

    let dab = settings.dynamics.apply(x, y, size, settings.angle, stroke.direction, stroke.dab_count);
    stroke.dab_count = stroke.dab_count.wrapping_add(1);
    if dab.size < 0.5 || flow <= 0.0 {
        return;
    }

    let stamp = stamps.get(settings.stamp_shape(dab.angle), dab.size, settings.tip.as_ref());
    let index = stroke.layer_index;

    let rect = match stroke.model {
        StrokeModel::Buffered => {
            let op = if settings.erase {
                StampOp::Paint { color: ERASE_MASK, mode: BlendMode::Normal }
            } else {
                StampOp::Paint { color: settings.color, mode: BlendMode::Normal }
            };
            let clip = doc.selection.as_ref().map(|s| StampClip::new(s, &stroke.transform));
            let Some(buffer) = doc.stroke_buffer.as_mut() else {
                return;
            };
            stamp_dab(&mut buffer.canvas, stamp, dab.x, dab.y, op, flow, clip.as_ref())
        }
        StrokeModel::OpacityLimited => {
            doc.capture_original_tiles_in_rect(index, stamp.rect_at(dab.x, dab.y));
            let op = if settings.erase {
                StampOp::Erase
            } else {
                StampOp::Paint { color: settings.color, mode: settings.blend_mode }
            };
            let clip = doc.selection.as_ref().map(|s| StampClip::new(s, &stroke.transform));
            let Some(canvas) = doc.layers.get_mut(index).and_then(Layer::pixels_mut) else {
                return;
            };
            stamp_dab_with_opacity_limit(
                canvas,
                stamp,
                dab.x,
                dab.y,
                op,
                flow,
                settings.opacity,
                &mut stroke.coverage,
                clip.as_ref(),
            )
        }
    };

    stroke.bounds = if stroke.bounds.is_empty() { rect } else { stroke.bounds.union(rect) };
    let doc_rect = doc.layer_rect_to_document(index, rect);
    doc.notify_changed(doc_rect);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::brush::{generate_pencil_stamp, generate_stamp};
    use crate::selection::SelectionShape;

    const RED: Pixel = 0xFF00_00FF;

    fn paint_doc() -> Document {
        let mut doc = Document::empty(128, 128);
        doc.add_pixel_layer("Paint");
        doc.history.clear();
        doc
    }

    fn stroke(renderer: &mut BrushRenderer, doc: &mut Document, points: &[(f32, f32)]) -> Option<PixelRect> {
        let (first, rest) = points.split_first()?;
        renderer.on_mouse_down(doc, &ToolEvent::at(first.0, first.1));
        for p in rest {
            renderer.on_mouse_drag(doc, &ToolEvent::at(p.0, p.1));
        }
        let last = points.last()?;
        renderer.on_mouse_up(doc, &ToolEvent::at(last.0, last.1))
    }

    fn max_alpha(canvas: &TiledCanvas) -> u8 {
        let mut max = 0;
        canvas.for_each_pixel(|_, _, p| max = max.max(alpha_of(p)));
        max
    }

    #[test]
    fn stroke_model_selection() {
        let mut s = BrushSettings::default();
        assert_eq!(s.stroke_model(), StrokeModel::Buffered);
        s.erase = true;
        assert_eq!(s.stroke_model(), StrokeModel::Buffered);
        s.erase_direct = true;
        assert_eq!(s.stroke_model(), StrokeModel::OpacityLimited);
        s.erase = false;
        s.mode = BrushMode::Pencil;
        assert_eq!(s.stroke_model(), StrokeModel::OpacityLimited);
    }

    #[test]
    fn buffered_stroke_respects_opacity_ceiling() {
        let mut doc = paint_doc();
        let settings = BrushSettings { color: RED, hardness: 1.0, opacity: 0.5, ..Default::default() };
        let mut renderer = BrushRenderer::new(settings);
        // Back-and-forth so every pixel sees many overlapping dabs.
        stroke(&mut renderer, &mut doc, &[(20.0, 20.0), (60.0, 20.0), (20.0, 20.0), (60.0, 20.0)]);

        assert!(doc.stroke_buffer.is_none());
        let canvas = doc.active_pixel_layer().expect("pixels");
        assert_eq!(max_alpha(canvas), 127);
        assert_eq!(doc.history.undo_descriptions(), vec!["Brush Stroke".to_string()]);
    }

    #[test]
    fn pencil_stroke_respects_opacity_ceiling() {
        let mut doc = paint_doc();
        let settings = BrushSettings { color: RED, mode: BrushMode::Pencil, opacity: 0.5, size: 3.0, ..Default::default() };
        let mut renderer = BrushRenderer::new(settings);
        stroke(&mut renderer, &mut doc, &[(10.5, 10.5), (30.5, 10.5), (10.5, 10.5)]);

        let canvas = doc.active_pixel_layer().expect("pixels");
        assert_eq!(max_alpha(canvas), 127);
        assert_eq!(canvas.get_pixel(20, 10), with_alpha(RED, 127));
    }

    #[test]
    fn opacity_limited_stamp_clamps_accumulated_coverage() {
        let mut canvas = TiledCanvas::new(16, 16);
        let mut coverage = CoverageMap::new();
        let stamp = generate_pencil_stamp(1.0);
        let op = StampOp::Paint { color: RED, mode: BlendMode::Normal };
        for _ in 0..10 {
            stamp_dab_with_opacity_limit(&mut canvas, &stamp, 4.5, 4.5, op, 0.3, 0.6, &mut coverage, None);
        }
        assert!((coverage.get(4, 4) - 0.6).abs() < 1e-6);
        assert_eq!(canvas.get_pixel(4, 4), with_alpha(RED, unit_to_byte(0.6)));
        assert_eq!(coverage.original(4, 4), Some(TRANSPARENT));
        assert_eq!(coverage.original(5, 5), None);
        assert_eq!(coverage.tile_count(), 1);
    }

    #[test]
    fn low_flow_dabs_build_up_to_the_ceiling() {
        let mut canvas = TiledCanvas::new(16, 16);
        let mut coverage = CoverageMap::new();
        let stamp = generate_pencil_stamp(1.0);
        let op = StampOp::Paint { color: RED, mode: BlendMode::Normal };
        for _ in 0..3000 {
            stamp_dab_with_opacity_limit(&mut canvas, &stamp, 4.5, 4.5, op, 0.001, 0.5, &mut coverage, None);
        }
        assert_eq!(coverage.get(4, 4), 0.5);
        assert_eq!(canvas.get_pixel(4, 4), with_alpha(RED, 127));
    }

    #[test]
    fn low_flow_direct_erase_lands_on_the_ceiling() {
        let mut canvas = TiledCanvas::new(16, 16);
        canvas.set_pixel(4, 4, RED);
        let mut coverage = CoverageMap::new();
        let stamp = generate_pencil_stamp(1.0);
        for _ in 0..3000 {
            stamp_dab_with_opacity_limit(&mut canvas, &stamp, 4.5, 4.5, StampOp::Erase, 0.01, 0.5, &mut coverage, None);
        }
        assert_eq!(canvas.get_pixel(4, 4), with_alpha(RED, 127));
        assert_eq!(coverage.original(4, 4), Some(RED));
    }

    #[test]
    fn soft_stamp_never_exceeds_ceiling() {
        let mut canvas = TiledCanvas::new(64, 64);
        let mut coverage = CoverageMap::new();
        let stamp = generate_stamp(15.0, 0.0);
        let op = StampOp::Paint { color: RED, mode: BlendMode::Normal };
        for i in 0..400 {
            let x = 24.0 + (i % 16) as f32;
            stamp_dab_with_opacity_limit(&mut canvas, &stamp, x, 32.0, op, 0.05, 0.5, &mut coverage, None);
        }
        assert_eq!(max_alpha(&canvas), 127);
        assert_eq!(canvas.get_pixel(31, 32), with_alpha(RED, 127));
        let mut at_ceiling = 0;
        canvas.for_each_pixel(|_, _, p| at_ceiling += (alpha_of(p) == 127) as usize);
        assert!(at_ceiling > 16, "{at_ceiling}");
    }

    #[test]
    fn stroke_is_one_undo_step_and_restores_exactly() {
        let mut doc = paint_doc();
        if let Some(c) = doc.active_pixel_layer() {
            c.set_pixel(100, 100, 0x00FF_00FF);
        }
        let before: Vec<_> = {
            let mut v = Vec::new();
            doc.active_pixel_layer().expect("pixels").for_each_pixel(|x, y, p| v.push((x, y, p)));
            v
        };
        let mut renderer = BrushRenderer::new(BrushSettings { color: RED, ..Default::default() });
        stroke(&mut renderer, &mut doc, &[(5.0, 5.0), (90.0, 40.0)]);
        assert_eq!(doc.history.undo_count(), 1);

        doc.undo();
        let mut after = Vec::new();
        doc.active_pixel_layer().expect("pixels").for_each_pixel(|x, y, p| after.push((x, y, p)));
        assert_eq!(before, after);
    }

    #[test]
    fn buffered_erase_reduces_alpha_and_prunes() {
        let mut doc = paint_doc();
        if let Some(c) = doc.active_pixel_layer() {
            for y in 0..8 {
                for x in 0..8 {
                    c.set_pixel(x, y, RED);
                }
            }
        }
        let settings = BrushSettings { erase: true, size: 40.0, hardness: 1.0, ..Default::default() };
        let mut renderer = BrushRenderer::new(settings);
        stroke(&mut renderer, &mut doc, &[(4.0, 4.0)]);
        assert_eq!(doc.active_pixel_layer().map(|c| c.tile_count()), Some(0));

        doc.undo();
        assert_eq!(doc.active_pixel_layer().map(|c| c.get_pixel(3, 3)), Some(RED));
    }

    #[test]
    fn direct_erase_is_capped_by_opacity() {
        let mut doc = paint_doc();
        if let Some(c) = doc.active_pixel_layer() {
            c.set_pixel(20, 20, RED);
        }
        let settings = BrushSettings {
            erase: true,
            erase_direct: true,
            opacity: 0.5,
            size: 9.0,
            hardness: 1.0,
            ..Default::default()
        };
        let mut renderer = BrushRenderer::new(settings);
        stroke(&mut renderer, &mut doc, &[(20.5, 20.5), (22.5, 20.5), (18.5, 20.5)]);
        let px = doc.active_pixel_layer().map(|c| c.get_pixel(20, 20)).unwrap_or_default();
        assert_eq!(px, with_alpha(RED, 127));
    }

    #[test]
    fn dab_at_the_coordinate_limit_stays_in_range() {
        let stamp = generate_stamp(9.0, 1.0);
        let op = StampOp::Paint { color: RED, mode: BlendMode::Normal };
        let mut canvas = TiledCanvas::new(64, 64);
        let edge = i32::MAX as f32;
        let rect = stamp_dab(&mut canvas, &stamp, edge, edge, op, 1.0, None);
        assert_eq!(rect.max_x, i32::MAX);
        let mut coverage = CoverageMap::new();
        stamp_dab_with_opacity_limit(&mut canvas, &stamp, edge, edge, op, 1.0, 0.5, &mut coverage, None);
        assert!(rect.is_empty());
        assert_eq!(canvas.tile_count(), 0);
    }

    #[test]
    fn stamping_clips_to_selection() {
        let mut doc = paint_doc();
        doc.selection = Some(Selection::from_shape(128, 128, &SelectionShape::Rectangle {
            min_x: 0,
            min_y: 0,
            max_x: 15,
            max_y: 127,
        }));
        let mut renderer = BrushRenderer::new(BrushSettings { color: RED, size: 20.0, ..Default::default() });
        stroke(&mut renderer, &mut doc, &[(16.0, 30.0)]);
        let canvas = doc.active_pixel_layer().expect("pixels");
        assert!(alpha_of(canvas.get_pixel(14, 30)) > 0);
        assert_eq!(canvas.get_pixel(17, 30), 0);
    }

    #[test]
    fn stamps_outside_canvas_are_kept() {
        let mut doc = paint_doc();
        let mut renderer = BrushRenderer::new(BrushSettings { color: RED, hardness: 1.0, ..Default::default() });
        stroke(&mut renderer, &mut doc, &[(200.0, 5.0)]);
        let canvas = doc.active_pixel_layer().expect("pixels");
        assert_eq!(canvas.get_pixel(200, 5), RED);
        assert!(canvas.tile(TileCoord::new(3, 0)).is_some());
    }

    #[test]
    fn cancel_restores_direct_stroke_and_drops_buffer() {
        let mut doc = paint_doc();
        let mut renderer = BrushRenderer::new(BrushSettings { color: RED, mode: BrushMode::Pencil, ..Default::default() });
        renderer.on_mouse_down(&mut doc, &ToolEvent::at(10.0, 10.0));
        renderer.on_mouse_drag(&mut doc, &ToolEvent::at(40.0, 10.0));
        assert!(doc.active_pixel_layer().map(|c| c.tile_count()).unwrap_or(0) > 0);
        renderer.cancel(&mut doc);
        assert!(!renderer.is_stroking());
        assert_eq!(doc.active_pixel_layer().map(|c| c.tile_count()), Some(0));
        assert_eq!(doc.history.undo_count(), 0);

        renderer.settings.mode = BrushMode::Brush;
        renderer.on_mouse_down(&mut doc, &ToolEvent::at(10.0, 10.0));
        assert!(doc.stroke_buffer.is_some());
        renderer.cancel(&mut doc);
        assert!(doc.stroke_buffer.is_none());
        assert_eq!(doc.active_pixel_layer().map(|c| c.tile_count()), Some(0));
    }

    #[test]
    fn locked_layer_refuses_stroke() {
        let mut doc = paint_doc();
        if let Some(layer) = doc.active_layer_mut() {
            layer.locked = true;
        }
        let mut renderer = BrushRenderer::new(BrushSettings::default());
        assert!(!renderer.on_mouse_down(&mut doc, &ToolEvent::at(5.0, 5.0)));
        assert!(!renderer.is_stroking());
        assert!(doc.stroke_buffer.is_none());
    }

    #[test]
    fn dab_spacing_carries_between_segments() {
        let mut doc = paint_doc();
        let settings = BrushSettings { size: 10.0, spacing: 1.0, ..Default::default() };
        let mut renderer = BrushRenderer::new(settings);
        renderer.on_mouse_down(&mut doc, &ToolEvent::at(0.0, 50.0));
        for i in 1..=20 {
            renderer.on_mouse_drag(&mut doc, &ToolEvent::at(i as f32 * 2.5, 50.0));
        }
        let StrokeState::Stroking(stroke) = &renderer.state else {
            panic!("not stroking");
        };
        // 50px at a 10px step: the initial dab plus five more.
        assert_eq!(stroke.dab_count, 6);
        renderer.cancel(&mut doc);
    }

    #[test]
    fn pen_pressure_scales_size() {
        let mut doc = paint_doc();
        let settings = BrushSettings { color: RED, size: 20.0, hardness: 1.0, ..Default::default() };
        let mut renderer = BrushRenderer::new(settings);
        renderer.on_mouse_down(&mut doc, &ToolEvent::at(50.0, 50.0).with_pressure(0.25));
        renderer.on_mouse_up(&mut doc, &ToolEvent::at(50.0, 50.0).with_pressure(0.25));
        let canvas = doc.active_pixel_layer().expect("pixels");
        let bounds = canvas.content_bounds().expect("painted");
        assert!(bounds.width() <= 8, "{bounds:?}");
    }

    #[test]
    fn settings_serde_round_trip() {
        let settings = BrushSettings { size: 33.0, mode: BrushMode::Pencil, ..Default::default() };
        let bytes = bincode::serialize(&settings).expect("serialize");
        let back: BrushSettings = bincode::deserialize(&bytes).expect("deserialize");
        assert_eq!(back, settings);
    }
}
