use std::collections::VecDeque;

use crate::canvas::{PixelRect, TileSnapshot, snapshot_bounds};
use crate::layer::Layer;
use crate::selection::Selection;

// ============================================================================
// UNDO TARGET – the document state an undo step mutates
// ============================================================================

/// Disjoint borrows of the document fields history steps touch.
pub struct HistoryTarget<'a> {
    pub layers: &'a mut Vec<Layer>,
    pub selection: &'a mut Option<Selection>,
    pub active_layer_index: &'a mut usize,
}

/// Area that needs recompositing after a step was applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Damage {
    Rect(PixelRect),
    Full,
}

// ============================================================================
// TILE DELTA – before/after tiles of one pixel edit
// ============================================================================

/// Tiles of one layer before and after an edit.  Both maps hold the same
/// keys; `None` entries stand for tiles that did not exist.
#[derive(Clone, Debug)]
pub struct TileDelta {
    pub layer_index: usize,
    pub original_tiles: TileSnapshot,
    pub new_tiles: TileSnapshot,
}

impl TileDelta {
    pub fn is_noop(&self) -> bool {
        self.original_tiles == self.new_tiles
    }

    pub fn bounds(&self) -> PixelRect {
        snapshot_bounds(&self.original_tiles).union(snapshot_bounds(&self.new_tiles))
    }

    fn memory_size(&self) -> usize {
        let bytes = |snap: &TileSnapshot| {
            snap.values().map(|t| t.as_ref().map_or(0, |t| std::mem::size_of_val(t.pixels()))).sum::<usize>()
        };
        bytes(&self.original_tiles) + bytes(&self.new_tiles)
    }

    fn revert(&mut self, target: &mut HistoryTarget) -> Damage {
        let Some(canvas) = target.layers.get_mut(self.layer_index).and_then(Layer::pixels_mut) else {
            return Damage::Rect(PixelRect::default());
        };
        self.new_tiles = canvas.swap_tiles(std::mem::take(&mut self.original_tiles));
        Damage::Rect(snapshot_bounds(&self.new_tiles))
    }

    fn reapply(&mut self, target: &mut HistoryTarget) -> Damage {
        let Some(canvas) = target.layers.get_mut(self.layer_index).and_then(Layer::pixels_mut) else {
            return Damage::Rect(PixelRect::default());
        };
        self.original_tiles = canvas.swap_tiles(std::mem::take(&mut self.new_tiles));
        Damage::Rect(snapshot_bounds(&self.original_tiles))
    }
}

// ============================================================================
// LAYER / SELECTION SNAPSHOTS – symmetric toggles
// ============================================================================

/// A layer that was inserted at or removed from `index`.  Applying the step
/// in either direction toggles between "layer present" and "layer held here".
#[derive(Clone, Debug)]
pub struct LayerSnapshot {
    pub index: usize,
    pub layer: Option<Layer>,
}

impl LayerSnapshot {
    /// Record a layer that now lives at `index`.
    pub fn inserted(index: usize) -> Self {
        Self { index, layer: None }
    }

    /// Record a layer that was taken out of `index`.
    pub fn removed(index: usize, layer: Layer) -> Self {
        Self { index, layer: Some(layer) }
    }

    fn toggle(&mut self, target: &mut HistoryTarget) -> Damage {
        match self.layer.take() {
            Some(layer) => {
                let index = self.index.min(target.layers.len());
                target.layers.insert(index, layer);
                *target.active_layer_index = index;
            }
            None => {
                if self.index < target.layers.len() {
                    self.layer = Some(target.layers.remove(self.index));
                    let last = target.layers.len().saturating_sub(1);
                    *target.active_layer_index = (*target.active_layer_index).min(last);
                }
            }
        }
        Damage::Full
    }
}

#[derive(Clone, Debug)]
pub struct SelectionSnapshot {
    pub selection: Option<Selection>,
}

impl SelectionSnapshot {
    fn toggle(&mut self, target: &mut HistoryTarget) -> Damage {
        std::mem::swap(&mut self.selection, target.selection);
        Damage::Full
    }
}

// ============================================================================
// UNDO STEP
// ============================================================================

#[derive(Clone, Debug)]
pub enum UndoAction {
    Tiles(TileDelta),
    Layer(LayerSnapshot),
    Selection(SelectionSnapshot),
}

#[derive(Clone, Debug)]
pub struct UndoStep {
    pub name: String,
    pub action: UndoAction,
}

impl UndoStep {
    pub fn new(name: impl Into<String>, action: UndoAction) -> Self {
        Self { name: name.into(), action }
    }

    /// Restore the state from before the step.
    pub fn revert(&mut self, target: &mut HistoryTarget) -> Damage {
        match &mut self.action {
            UndoAction::Tiles(delta) => delta.revert(target),
            UndoAction::Layer(snap) => snap.toggle(target),
            UndoAction::Selection(snap) => snap.toggle(target),
        }
    }

    /// Re-apply the step after a revert.
    pub fn reapply(&mut self, target: &mut HistoryTarget) -> Damage {
        match &mut self.action {
            UndoAction::Tiles(delta) => delta.reapply(target),
            UndoAction::Layer(snap) => snap.toggle(target),
            UndoAction::Selection(snap) => snap.toggle(target),
        }
    }

    pub fn memory_size(&self) -> usize {
        match &self.action {
            UndoAction::Tiles(delta) => delta.memory_size(),
            UndoAction::Layer(snap) => snap.layer.as_ref().map_or(0, Layer::memory_bytes),
            UndoAction::Selection(snap) => {
                snap.selection.as_ref().map_or(0, |s| (s.width() * s.height()) as usize)
            }
        }
    }
}

// ============================================================================
// HISTORY MANAGER – bounded undo stack plus redo stack
// ============================================================================

pub struct HistoryManager {
    undo_stack: VecDeque<UndoStep>,
    redo_stack: VecDeque<UndoStep>,
    max_history_size: usize,
    /// Running memory total across both stacks.
    total_memory: usize,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(20)
    }
}

impl HistoryManager {
    pub fn new(max_history_size: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            max_history_size: max_history_size.max(1),
            total_memory: 0,
        }
    }

    /// Push a finished step.  Clears the redo stack; evicts the oldest step
    /// when over capacity.
    pub fn push_step(&mut self, step: UndoStep) {
        for old in self.redo_stack.drain(..) {
            self.total_memory = self.total_memory.saturating_sub(old.memory_size());
        }
        self.total_memory += step.memory_size();
        self.undo_stack.push_back(step);
        self.prune();
    }

    fn prune(&mut self) {
        while self.undo_stack.len() > self.max_history_size {
            if let Some(removed) = self.undo_stack.pop_front() {
                self.total_memory = self.total_memory.saturating_sub(removed.memory_size());
                log_info!("History: evicted '{}'", removed.name);
            }
        }
    }

    pub fn peek_undo(&self) -> Option<&UndoStep> {
        self.undo_stack.back()
    }

    pub fn peek_undo_mut(&mut self) -> Option<&mut UndoStep> {
        self.undo_stack.back_mut()
    }

    /// Move the newest undo step onto the redo stack.
    pub fn move_top_to_redo(&mut self) {
        if let Some(step) = self.undo_stack.pop_back() {
            self.redo_stack.push_back(step);
        }
    }

    pub fn peek_redo(&self) -> Option<&UndoStep> {
        self.redo_stack.back()
    }

    pub fn peek_redo_mut(&mut self) -> Option<&mut UndoStep> {
        self.redo_stack.back_mut()
    }

    /// Move the newest redo step back onto the undo stack.
    pub fn move_top_to_undo(&mut self) {
        if let Some(step) = self.redo_stack.pop_back() {
            self.undo_stack.push_back(step);
        }
    }

    /// Revert the newest step.  `None` when there is nothing to undo.
    pub fn undo(&mut self, target: &mut HistoryTarget) -> Option<(String, Damage)> {
        let step = self.peek_undo_mut()?;
        let damage = step.revert(target);
        let name = step.name.clone();
        self.move_top_to_redo();
        Some((name, damage))
    }

    pub fn redo(&mut self, target: &mut HistoryTarget) -> Option<(String, Damage)> {
        let step = self.peek_redo_mut()?;
        let damage = step.reapply(target);
        let name = step.name.clone();
        self.move_top_to_undo();
        Some((name, damage))
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Undo step names, most recent first.
    pub fn undo_descriptions(&self) -> Vec<String> {
        self.undo_stack.iter().rev().map(|s| s.name.clone()).collect()
    }

    pub fn memory_usage(&self) -> usize {
        self.total_memory
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.total_memory = 0;
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn capacity(&self) -> usize {
        self.max_history_size
    }

    pub fn set_capacity(&mut self, max_history_size: usize) {
        self.max_history_size = max_history_size.max(1);
        self.prune();
    }
}
