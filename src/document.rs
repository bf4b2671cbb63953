use std::sync::Arc;

use crate::blend::{self, BlendMode};
use crate::canvas::{Pixel, PixelRect, TRANSPARENT, TileSnapshot, TiledCanvas, alpha_of, snapshot_bounds, unit_to_byte, with_alpha};
use crate::components::history::{
    Damage, HistoryManager, HistoryTarget, LayerSnapshot, SelectionSnapshot, TileDelta, UndoAction, UndoStep,
};
use crate::layer::{Layer, LayerContent, LayerTransform, TextLayer};
use crate::ops::adjustments::Adjustment;
use crate::ops::text::{TextRasterizer, TextStyle};
use crate::selection::{Selection, SelectionMode, SelectionShape};

/// Pixels lifted off a layer, drawn over the document until dropped.
/// `pixels` stay at their original document positions; `offset` is the
/// pending move.
#[derive(Clone, Debug)]
pub struct FloatingSelection {
    pub pixels: TiledCanvas,
    pub original_bounds: PixelRect,
    pub offset: (i32, i32),
    pub layer_index: usize,
}

impl FloatingSelection {
    pub fn bounds(&self) -> PixelRect {
        self.original_bounds.translate(self.offset.0, self.offset.1)
    }
}

/// Scratch surface for the stroke in progress, in the target layer's pixel
/// space.  The compositor previews it on top of (or, for erase, as a mask
/// over) its layer; the brush renderer folds it in on mouse up.
#[derive(Clone, Debug)]
pub struct StrokeBuffer {
    pub canvas: TiledCanvas,
    pub layer_index: usize,
    pub opacity: f32,
    pub blend_mode: BlendMode,
    pub erase: bool,
}

impl StrokeBuffer {
    /// Fold one buffer pixel into the layer pixel beneath it.  Painting blends
    /// at the stroke opacity; erasing treats the buffer alpha as a mask.
    pub fn composite_pixel(&self, dst: Pixel, src: Pixel) -> Pixel {
        if !self.erase {
            return blend::blend(dst, src, self.blend_mode, self.opacity);
        }
        let strength = (alpha_of(src) as f32 / 255.0 * self.opacity).min(1.0);
        let a = unit_to_byte(alpha_of(dst) as f32 / 255.0 * (1.0 - strength));
        if a == 0 { TRANSPARENT } else { with_alpha(dst, a) }
    }
}

struct PendingCapture {
    layer_index: usize,
    original: TileSnapshot,
}

// ============================================================================
// DOCUMENT – layer stack, selection and the pixel-edit undo protocol
// ============================================================================

pub struct Document {
    pub width: u32,
    pub height: u32,
    /// Bottom to top.
    pub layers: Vec<Layer>,
    pub active_layer_index: usize,
    pub selection: Option<Selection>,
    pub floating: Option<FloatingSelection>,
    pub stroke_buffer: Option<StrokeBuffer>,
    pub history: HistoryManager,
    pending: Option<PendingCapture>,
    dirty_rect: Option<PixelRect>,
    dirty_generation: u64,
}

impl Document {
    /// Document with an opaque white "Background" layer.
    pub fn new(width: u32, height: u32) -> Self {
        let mut doc = Self::empty(width, height);
        doc.layers.push(Layer::new_filled("Background", width, height, 0xFFFF_FFFF));
        doc
    }

    pub fn empty(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            layers: Vec::new(),
            active_layer_index: 0,
            selection: None,
            floating: None,
            stroke_buffer: None,
            history: HistoryManager::default(),
            pending: None,
            dirty_rect: None,
            dirty_generation: 0,
        }
    }

    pub fn logical_rect(&self) -> PixelRect {
        PixelRect::from_xywh(0, 0, self.width, self.height)
    }

    pub fn active_layer(&self) -> Option<&Layer> {
        self.layers.get(self.active_layer_index)
    }

    pub fn active_layer_mut(&mut self) -> Option<&mut Layer> {
        self.layers.get_mut(self.active_layer_index)
    }

    /// Pixels of the active layer, if it is a pixel layer.
    pub fn active_pixel_layer(&mut self) -> Option<&mut TiledCanvas> {
        self.layers.get_mut(self.active_layer_index).and_then(Layer::pixels_mut)
    }

    pub fn set_active_layer(&mut self, index: usize) -> bool {
        if index >= self.layers.len() {
            return false;
        }
        self.active_layer_index = index;
        true
    }

    // ---- dirty tracking ------------------------------------------------------

    /// Accumulate a changed document-space rectangle.
    pub fn notify_changed(&mut self, rect: PixelRect) {
        if rect.is_empty() {
            return;
        }
        self.dirty_rect = Some(match self.dirty_rect {
            Some(existing) => existing.union(rect),
            None => rect,
        });
        self.dirty_generation = self.dirty_generation.wrapping_add(1);
    }

    pub fn notify_full(&mut self) {
        self.notify_changed(self.logical_rect());
    }

    /// Pending dirty area, reset to clean.
    pub fn take_dirty(&mut self) -> Option<PixelRect> {
        self.dirty_rect.take()
    }

    pub fn dirty_generation(&self) -> u64 {
        self.dirty_generation
    }

    /// Document-space bounding box of a rectangle in a layer's pixel space.
    pub fn layer_rect_to_document(&self, layer_index: usize, rect: PixelRect) -> PixelRect {
        let Some(layer) = self.layers.get(layer_index) else {
            return rect;
        };
        transformed_bounds(&layer.transform, rect)
    }

    fn notify_layer_changed(&mut self, layer_index: usize, rect: PixelRect) {
        let rect = self.layer_rect_to_document(layer_index, rect);
        self.notify_changed(rect);
    }

    // ---- pixel edit protocol -------------------------------------------------

    /// Snapshot the tiles under `rect` (layer pixel space) before they are
    /// written.  Repeated calls during one operation extend the capture; a
    /// tile already captured keeps its first snapshot.
    pub fn capture_original_tiles_in_rect(&mut self, layer_index: usize, rect: PixelRect) -> bool {
        if self.pending.as_ref().is_some_and(|p| p.layer_index != layer_index) {
            log_warn!("Undo capture switched layers mid-operation; dropping the earlier capture");
            self.pending = None;
        }
        let Some(canvas) = self.layers.get(layer_index).and_then(Layer::pixels) else {
            return false;
        };
        let snapshot = canvas.clone_tiles_in_rect(rect);
        let pending = self.pending.get_or_insert_with(|| PendingCapture { layer_index, original: TileSnapshot::new() });
        for (key, tile) in snapshot {
            pending.original.entry(key).or_insert(tile);
        }
        true
    }

    pub fn has_pending_capture(&self) -> bool {
        self.pending.is_some()
    }

    /// Close the pending capture into an undo step.  Returns `false` when
    /// there was nothing captured or nothing actually changed.
    pub fn commit_undo(&mut self, name: &str) -> bool {
        let Some(pending) = self.pending.take() else {
            return false;
        };
        let Some(canvas) = self.layers.get(pending.layer_index).and_then(Layer::pixels) else {
            return false;
        };
        let new_tiles = canvas.clone_tiles_for_keys(pending.original.keys());
        let delta = TileDelta { layer_index: pending.layer_index, original_tiles: pending.original, new_tiles };
        if delta.is_noop() {
            return false;
        }
        self.history.push_step(UndoStep::new(name, UndoAction::Tiles(delta)));
        true
    }

    /// Abandon the pending capture.  With `restore` the captured tiles are
    /// written back, undoing any writes since the first capture.
    pub fn discard_capture(&mut self, restore: bool) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        if !restore {
            return;
        }
        let layer_index = pending.layer_index;
        if let Some(canvas) = self.layers.get_mut(layer_index).and_then(Layer::pixels_mut) {
            let replaced = canvas.swap_tiles(pending.original);
            let rect = snapshot_bounds(&replaced);
            self.notify_layer_changed(layer_index, rect);
        }
    }

    // ---- undo / redo ---------------------------------------------------------

    fn history_target(&mut self) -> (&mut HistoryManager, HistoryTarget<'_>) {
        (
            &mut self.history,
            HistoryTarget {
                layers: &mut self.layers,
                selection: &mut self.selection,
                active_layer_index: &mut self.active_layer_index,
            },
        )
    }

    fn apply_damage(&mut self, layer_index: Option<usize>, damage: Damage) {
        match (damage, layer_index) {
            (Damage::Rect(rect), Some(index)) => self.notify_layer_changed(index, rect),
            _ => self.notify_full(),
        }
    }

    /// Undo the newest step.  An uncommitted floating selection is put back
    /// instead.
    pub fn undo(&mut self) -> Option<String> {
        if self.floating.is_some() {
            self.cancel_floating();
            return Some("Move Selection".to_string());
        }
        if self.pending.is_some() {
            self.discard_capture(true);
        }
        let layer_index = match self.history.peek_undo().map(|s| &s.action) {
            Some(UndoAction::Tiles(delta)) => Some(delta.layer_index),
            _ => None,
        };
        let (history, mut target) = self.history_target();
        let (name, damage) = history.undo(&mut target)?;
        self.apply_damage(layer_index, damage);
        log_info!("Undo: {}", name);
        Some(name)
    }

    pub fn redo(&mut self) -> Option<String> {
        if self.floating.is_some() || self.pending.is_some() {
            return None;
        }
        let layer_index = match self.history.peek_redo().map(|s| &s.action) {
            Some(UndoAction::Tiles(delta)) => Some(delta.layer_index),
            _ => None,
        };
        let (history, mut target) = self.history_target();
        let (name, damage) = history.redo(&mut target)?;
        self.apply_damage(layer_index, damage);
        log_info!("Redo: {}", name);
        Some(name)
    }

    // ---- layer stack ---------------------------------------------------------

    fn insert_layer(&mut self, layer: Layer, step_name: &str) -> usize {
        let index = if self.layers.is_empty() { 0 } else { (self.active_layer_index + 1).min(self.layers.len()) };
        self.layers.insert(index, layer);
        self.active_layer_index = index;
        self.history.push_step(UndoStep::new(step_name, UndoAction::Layer(LayerSnapshot::inserted(index))));
        self.notify_full();
        index
    }

    /// New empty pixel layer above the active one.  Returns its index.
    pub fn add_pixel_layer(&mut self, name: impl Into<String>) -> usize {
        let layer = Layer::new_pixel(name, self.width, self.height);
        self.insert_layer(layer, "New Layer")
    }

    pub fn add_adjustment_layer(&mut self, adjustment: Adjustment) -> usize {
        self.insert_layer(Layer::new_adjustment(adjustment), "New Adjustment Layer")
    }

    pub fn add_text_layer(
        &mut self,
        name: impl Into<String>,
        style: TextStyle,
        rasterizer: Arc<dyn TextRasterizer>,
    ) -> usize {
        let text = TextLayer::new(style, rasterizer, self.width, self.height);
        self.insert_layer(Layer::new_text(name, text), "New Text Layer")
    }

    pub fn remove_layer(&mut self, index: usize) -> bool {
        if index >= self.layers.len() {
            return false;
        }
        if self.floating.as_ref().is_some_and(|f| f.layer_index == index) {
            self.drop_floating();
        }
        let layer = self.layers.remove(index);
        self.active_layer_index = self.active_layer_index.min(self.layers.len().saturating_sub(1));
        self.history.push_step(UndoStep::new("Delete Layer", UndoAction::Layer(LayerSnapshot::removed(index, layer))));
        self.notify_full();
        true
    }

    /// Copy of layer `index` placed directly above it.
    pub fn duplicate_layer(&mut self, index: usize) -> Option<usize> {
        let copy = self.layers.get(index)?.duplicate();
        let at = index + 1;
        self.layers.insert(at, copy);
        self.active_layer_index = at;
        self.history.push_step(UndoStep::new("Duplicate Layer", UndoAction::Layer(LayerSnapshot::inserted(at))));
        self.notify_full();
        Some(at)
    }

    /// Document-space bounds of the non-transparent pixels of a layer.
    pub fn content_bounds(&self, index: usize) -> Option<PixelRect> {
        let layer = self.layers.get(index)?;
        let canvas = match &layer.content {
            LayerContent::Pixel(canvas) => canvas,
            LayerContent::Text(text) => text.cached(),
            LayerContent::Adjustment(_) => return None,
        };
        canvas.content_bounds().map(|r| transformed_bounds(&layer.transform, r))
    }

    // ---- selection -----------------------------------------------------------

    /// Replace the selection, recording the previous one for undo.
    pub fn set_selection(&mut self, selection: Option<Selection>, name: &str) {
        let previous = std::mem::replace(&mut self.selection, selection);
        self.history
            .push_step(UndoStep::new(name, UndoAction::Selection(SelectionSnapshot { selection: previous })));
        self.notify_full();
    }

    /// Combine a shape into the selection.
    pub fn select_shape(&mut self, shape: &SelectionShape, mode: SelectionMode) {
        let mut next = self.selection.clone().unwrap_or_else(|| Selection::new(self.width, self.height));
        next.apply_shape(shape, mode);
        let next = if next.is_empty() { None } else { Some(next) };
        self.set_selection(next, "Select");
    }

    pub fn select_all(&mut self) {
        self.set_selection(Some(Selection::select_all(self.width, self.height)), "Select All");
    }

    pub fn clear_selection(&mut self) {
        if self.selection.is_some() {
            self.set_selection(None, "Deselect");
        }
    }

    /// Erase the selected pixels of the active layer, proportionally to the
    /// selection coverage.
    pub fn delete_selected_pixels(&mut self) -> bool {
        let index = self.active_layer_index;
        let Some(bounds) = self.selection.as_ref().and_then(Selection::bounds) else {
            return false;
        };
        let Some((dx, dy)) = self.layers.get(index).and_then(|l| integer_offset(&l.transform)) else {
            return false;
        };
        if !self.layers.get(index).is_some_and(Layer::is_pixel) {
            return false;
        }

        self.capture_original_tiles_in_rect(index, bounds.translate(-dx, -dy));
        if let (Some(selection), Some(canvas)) =
            (self.selection.as_ref(), self.layers.get_mut(index).and_then(Layer::pixels_mut))
        {
            for y in bounds.min_y..bounds.max_y {
                for x in bounds.min_x..bounds.max_x {
                    let cov = selection.coverage(x, y);
                    if cov > 0.0 {
                        canvas.erase_pixel(x - dx, y - dy, cov);
                    }
                }
            }
            let pruned = canvas.prune_empty_tiles();
            if pruned > 0 {
                log_info!("Pruned {} empty tiles", pruned);
            }
        }
        self.notify_changed(bounds);
        self.commit_undo("Delete Selection")
    }

    // ---- floating selection --------------------------------------------------

    /// Lift the selected pixels of the active layer into a floating
    /// selection.  The lift and the eventual drop form one undo step.
    pub fn lift_selection(&mut self) -> bool {
        if self.floating.is_some() {
            return false;
        }
        let index = self.active_layer_index;
        let Some(bounds) = self.selection.as_ref().and_then(Selection::bounds) else {
            return false;
        };
        let Some((dx, dy)) = self.layers.get(index).and_then(|l| integer_offset(&l.transform)) else {
            log_warn!("Cannot lift pixels from a rotated or scaled layer");
            return false;
        };
        if !self.layers.get(index).is_some_and(|l| l.is_pixel() && !l.locked) {
            return false;
        }

        self.capture_original_tiles_in_rect(index, bounds.translate(-dx, -dy));
        let mut pixels = TiledCanvas::new(self.width, self.height);
        if let (Some(selection), Some(canvas)) =
            (self.selection.as_ref(), self.layers.get_mut(index).and_then(Layer::pixels_mut))
        {
            for y in bounds.min_y..bounds.max_y {
                for x in bounds.min_x..bounds.max_x {
                    let cov = selection.coverage(x, y);
                    if cov <= 0.0 {
                        continue;
                    }
                    let px = canvas.get_pixel(x - dx, y - dy);
                    let a = alpha_of(px);
                    if a == 0 {
                        continue;
                    }
                    let lifted = unit_to_byte(a as f32 / 255.0 * cov);
                    pixels.set_pixel(x, y, with_alpha(px, lifted));
                    canvas.erase_pixel(x - dx, y - dy, cov);
                }
            }
        }
        self.floating = Some(FloatingSelection { pixels, original_bounds: bounds, offset: (0, 0), layer_index: index });
        self.notify_changed(bounds);
        true
    }

    pub fn move_floating(&mut self, dx: i32, dy: i32) {
        let Some(floating) = self.floating.as_mut() else {
            return;
        };
        let before = floating.bounds();
        floating.offset.0 += dx;
        floating.offset.1 += dy;
        let after = floating.bounds();
        self.notify_changed(before.union(after));
    }

    /// Composite the floating pixels onto their layer at the current offset
    /// and record the move.  The selection follows the pixels.
    pub fn drop_floating(&mut self) -> bool {
        let Some(floating) = self.floating.take() else {
            return false;
        };
        let index = floating.layer_index;
        let (ox, oy) = floating.offset;
        let Some((dx, dy)) = self.layers.get(index).and_then(|l| integer_offset(&l.transform)) else {
            self.discard_capture(true);
            return false;
        };

        let target = floating.bounds();
        self.capture_original_tiles_in_rect(index, target.translate(-dx, -dy));
        if let Some(canvas) = self.layers.get_mut(index).and_then(Layer::pixels_mut) {
            floating.pixels.for_each_pixel(|x, y, px| {
                canvas.blend_pixel(x + ox - dx, y + oy - dy, px, BlendMode::Normal, 1.0);
            });
            canvas.prune_empty_tiles();
        }
        self.notify_changed(floating.original_bounds.union(target));
        let committed = self.commit_undo("Move Selection");

        if (ox, oy) != (0, 0) {
            if let Some(mut moved) = self.selection.clone() {
                moved.translate(ox, oy);
                self.set_selection(Some(moved), "Move Selection Outline");
            }
        }
        committed
    }

    /// Put floating pixels back where they came from without recording a step.
    pub fn cancel_floating(&mut self) {
        if let Some(floating) = self.floating.take() {
            self.discard_capture(true);
            self.notify_changed(floating.original_bounds.union(floating.bounds()));
        }
    }

    pub fn memory_usage(&self) -> usize {
        self.layers.iter().map(Layer::memory_bytes).sum::<usize>() + self.history.memory_usage()
    }
}

/// Whole-pixel offset of a position-only transform.
fn integer_offset(transform: &LayerTransform) -> Option<(i32, i32)> {
    if !transform.is_position_only() {
        return None;
    }
    Some((transform.offset_x.round() as i32, transform.offset_y.round() as i32))
}

fn transformed_bounds(transform: &LayerTransform, rect: PixelRect) -> PixelRect {
    if rect.is_empty() || transform.is_identity() {
        return rect;
    }
    let corners = [
        (rect.min_x as f32, rect.min_y as f32),
        (rect.max_x as f32, rect.min_y as f32),
        (rect.min_x as f32, rect.max_y as f32),
        (rect.max_x as f32, rect.max_y as f32),
    ];
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (f32::MAX, f32::MAX, f32::MIN, f32::MIN);
    for (x, y) in corners {
        let (dx, dy) = transform.to_document(x, y);
        min_x = min_x.min(dx);
        min_y = min_y.min(dy);
        max_x = max_x.max(dx);
        max_y = max_y.max(dy);
    }
    PixelRect::new(min_x.floor() as i32, min_y.floor() as i32, max_x.ceil() as i32, max_y.ceil() as i32).expand(1)
}
