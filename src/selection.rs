use image::{GrayImage, Luma};

use crate::canvas::PixelRect;

// ============================================================================
// SELECTION SHAPES & MODES
// ============================================================================

/// How a new selection shape interacts with the existing mask.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SelectionMode {
    /// Clear any existing selection, then set the new shape.
    #[default]
    Replace,
    Add,
    Subtract,
    /// Keep only pixels present in both the existing mask and the new shape.
    Intersect,
}

impl SelectionMode {
    pub fn all() -> &'static [SelectionMode] {
        &[SelectionMode::Replace, SelectionMode::Add, SelectionMode::Subtract, SelectionMode::Intersect]
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SelectionShape {
    /// Inclusive pixel corners.
    Rectangle { min_x: i32, min_y: i32, max_x: i32, max_y: i32 },
    Ellipse { cx: f32, cy: f32, rx: f32, ry: f32 },
}

impl SelectionShape {
    /// 255 if the pixel centre lies inside the shape, 0 otherwise.
    pub fn contains(&self, x: i32, y: i32) -> u8 {
        match *self {
            SelectionShape::Rectangle { min_x, min_y, max_x, max_y } => {
                if x >= min_x && x <= max_x && y >= min_y && y <= max_y { 255 } else { 0 }
            }
            SelectionShape::Ellipse { cx, cy, rx, ry } => {
                if rx <= 0.0 || ry <= 0.0 {
                    return 0;
                }
                let dx = (x as f32 + 0.5 - cx) / rx;
                let dy = (y as f32 + 0.5 - cy) / ry;
                if dx * dx + dy * dy <= 1.0 { 255 } else { 0 }
            }
        }
    }

    /// Pixel rect that may contain selected pixels (max exclusive).
    pub fn bounds(&self) -> PixelRect {
        match *self {
            SelectionShape::Rectangle { min_x, min_y, max_x, max_y } => {
                PixelRect::new(min_x, min_y, max_x + 1, max_y + 1)
            }
            SelectionShape::Ellipse { cx, cy, rx, ry } => PixelRect::new(
                (cx - rx).floor() as i32,
                (cy - ry).floor() as i32,
                (cx + rx).ceil() as i32,
                (cy + ry).ceil() as i32,
            ),
        }
    }
}

// ============================================================================
// SELECTION MASK
// ============================================================================

/// Per-pixel selection coverage over the document area.
#[derive(Clone, Debug, PartialEq)]
pub struct Selection {
    mask: GrayImage,
    bounds: Option<PixelRect>,
}

impl Selection {
    /// Empty selection (nothing selected).
    pub fn new(width: u32, height: u32) -> Self {
        Self { mask: GrayImage::new(width, height), bounds: None }
    }

    pub fn select_all(width: u32, height: u32) -> Self {
        let mut sel = Self { mask: GrayImage::from_pixel(width, height, Luma([255])), bounds: None };
        sel.recompute_bounds();
        sel
    }

    pub fn from_shape(width: u32, height: u32, shape: &SelectionShape) -> Self {
        let mut sel = Self::new(width, height);
        sel.apply_shape(shape, SelectionMode::Replace);
        sel
    }

    pub fn from_mask(mask: GrayImage) -> Self {
        let mut sel = Self { mask, bounds: None };
        sel.recompute_bounds();
        sel
    }

    pub fn width(&self) -> u32 {
        self.mask.width()
    }

    pub fn height(&self) -> u32 {
        self.mask.height()
    }

    pub fn mask(&self) -> &GrayImage {
        &self.mask
    }

    #[inline]
    fn in_range(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && (x as u32) < self.mask.width() && (y as u32) < self.mask.height()
    }

    /// Coverage 0..=255; 0 outside the mask.
    #[inline]
    pub fn value(&self, x: i32, y: i32) -> u8 {
        if !self.in_range(x, y) {
            return 0;
        }
        self.mask.get_pixel(x as u32, y as u32).0[0]
    }

    #[inline]
    pub fn is_selected(&self, x: i32, y: i32) -> bool {
        self.value(x, y) > 0
    }

    /// Coverage as a 0..1 factor.
    #[inline]
    pub fn coverage(&self, x: i32, y: i32) -> f32 {
        self.value(x, y) as f32 / 255.0
    }

    /// Selected with at least one unselected or out-of-range 4-neighbour.
    pub fn is_boundary(&self, x: i32, y: i32) -> bool {
        self.is_selected(x, y)
            && (!self.is_selected(x - 1, y)
                || !self.is_selected(x + 1, y)
                || !self.is_selected(x, y - 1)
                || !self.is_selected(x, y + 1))
    }

    pub fn set_value(&mut self, x: i32, y: i32, v: u8) {
        if !self.in_range(x, y) {
            return;
        }
        self.mask.put_pixel(x as u32, y as u32, Luma([v]));
        let px = PixelRect::new(x, y, x + 1, y + 1);
        match self.bounds {
            _ if v > 0 => self.bounds = Some(self.bounds.unwrap_or_default().union(px)),
            Some(b) if x == b.min_x || y == b.min_y || x == b.max_x - 1 || y == b.max_y - 1 => {
                self.recompute_bounds();
            }
            _ => {}
        }
    }

    /// Cached tight bounds of selected pixels.
    pub fn bounds(&self) -> Option<PixelRect> {
        self.bounds
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_none()
    }

    fn recompute_bounds(&mut self) {
        let mut bounds = PixelRect::default();
        for (x, y, p) in self.mask.enumerate_pixels() {
            if p.0[0] > 0 {
                let (x, y) = (x as i32, y as i32);
                bounds = bounds.union(PixelRect::new(x, y, x + 1, y + 1));
            }
        }
        self.bounds = (!bounds.is_empty()).then_some(bounds);
    }

    /// Apply a shape according to `mode`.
    pub fn apply_shape(&mut self, shape: &SelectionShape, mode: SelectionMode) {
        let area = shape.bounds().intersect(PixelRect::from_xywh(0, 0, self.width(), self.height()));

        match mode {
            SelectionMode::Replace => {
                self.mask.pixels_mut().for_each(|p| *p = Luma([0]));
                self.for_area(shape, area, |_, v| v);
            }
            SelectionMode::Add => self.for_area(shape, area, |old, v| old.max(v)),
            SelectionMode::Subtract => self.for_area(shape, area, |old, v| old.saturating_sub(v)),
            SelectionMode::Intersect => {
                let (w, h) = (self.width(), self.height());
                let old_mask = std::mem::replace(&mut self.mask, GrayImage::new(w, h));
                for y in area.min_y..area.max_y {
                    for x in area.min_x..area.max_x {
                        let v = shape.contains(x, y);
                        let old = old_mask.get_pixel(x as u32, y as u32).0[0];
                        if v > 0 && old > 0 {
                            self.mask.put_pixel(x as u32, y as u32, Luma([v.min(old)]));
                        }
                    }
                }
            }
        }
        self.recompute_bounds();
    }

    fn for_area<F: Fn(u8, u8) -> u8>(&mut self, shape: &SelectionShape, area: PixelRect, f: F) {
        for y in area.min_y..area.max_y {
            for x in area.min_x..area.max_x {
                let v = shape.contains(x, y);
                if v == 0 {
                    continue;
                }
                let px = self.mask.get_pixel_mut(x as u32, y as u32);
                px.0[0] = f(px.0[0], v);
            }
        }
    }

    pub fn invert(&mut self) {
        self.mask.pixels_mut().for_each(|p| p.0[0] = 255 - p.0[0]);
        self.recompute_bounds();
    }

    /// Shift the mask by whole pixels; pixels shifted out are dropped.
    pub fn translate(&mut self, dx: i32, dy: i32) {
        let (w, h) = (self.width(), self.height());
        let mut shifted = GrayImage::new(w, h);
        for (x, y, p) in self.mask.enumerate_pixels() {
            if p.0[0] == 0 {
                continue;
            }
            let (nx, ny) = (x as i32 + dx, y as i32 + dy);
            if nx >= 0 && ny >= 0 && (nx as u32) < w && (ny as u32) < h {
                shifted.put_pixel(nx as u32, ny as u32, *p);
            }
        }
        self.mask = shifted;
        self.recompute_bounds();
    }
}
