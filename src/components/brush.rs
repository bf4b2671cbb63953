use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::canvas::PixelRect;

// ============================================================================
// BRUSH STAMP – square coverage buffer for one dab
// ============================================================================

/// Immutable `size × size` coverage buffer (0..1), centred on the dab position.
#[derive(Clone, Debug, PartialEq)]
pub struct BrushStamp {
    size: u32,
    coverage: Vec<f32>,
}

impl BrushStamp {
    fn from_fn<F: Fn(f32, f32) -> f32>(size: u32, f: F) -> Self {
        let size = size.max(1);
        let half = size as f32 / 2.0;
        let mut coverage = Vec::with_capacity((size * size) as usize);
        for y in 0..size {
            for x in 0..size {
                // Offset of this pixel's centre from the stamp centre.
                let dx = x as f32 + 0.5 - half;
                let dy = y as f32 + 0.5 - half;
                coverage.push(f(dx, dy).clamp(0.0, 1.0));
            }
        }
        Self { size, coverage }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    #[inline]
    pub fn coverage(&self, x: u32, y: u32) -> f32 {
        if x >= self.size || y >= self.size {
            return 0.0;
        }
        self.coverage[(y * self.size + x) as usize]
    }

    /// Top-left pixel when the stamp is centred on `(cx, cy)`.
    pub fn origin(&self, cx: f32, cy: f32) -> (i32, i32) {
        let half = self.size as f32 / 2.0;
        ((cx - half).round() as i32, (cy - half).round() as i32)
    }

    /// Pixel area the stamp covers when centred on `(cx, cy)`.
    pub fn rect_at(&self, cx: f32, cy: f32) -> PixelRect {
        let (x0, y0) = self.origin(cx, cy);
        PixelRect::from_xywh(x0, y0, self.size, self.size)
    }
}

/// Smoothstep falloff for a round brush.  Hardness 0 is airbrush-soft,
/// hardness 1 leaves a one-pixel anti-aliased rim.
pub fn brush_falloff(dist: f32, radius: f32, hardness: f32) -> f32 {
    let remapped_hardness = 0.02 + hardness.clamp(0.0, 1.0) * 0.98;
    let safe_hardness = remapped_hardness.clamp(0.0, 0.99);

    let (effective_radius, fade_width) = if radius < 3.0 {
        // Tiny brushes get at least 1.5px of anti-aliasing outside the radius.
        let aa_extend = 1.5;
        (radius + aa_extend, aa_extend + radius * (1.0 - safe_hardness))
    } else {
        (radius, (radius * (1.0 - safe_hardness)).max(1.0))
    };

    let solid_radius = effective_radius - fade_width;
    if dist <= solid_radius {
        return 1.0;
    } else if dist >= effective_radius {
        return 0.0;
    }

    let t = (dist - solid_radius) / fade_width;
    let x = 1.0 - t.clamp(0.0, 1.0);
    x * x * (3.0 - 2.0 * x)
}

/// Round anti-aliased stamp.
pub fn generate_stamp(diameter: f32, hardness: f32) -> BrushStamp {
    let radius = (diameter / 2.0).max(0.0);
    let extent = if radius < 3.0 { radius + 1.5 } else { radius };
    let size = (extent * 2.0).ceil().max(1.0) as u32;
    BrushStamp::from_fn(size, |dx, dy| brush_falloff((dx * dx + dy * dy).sqrt(), radius, hardness))
}

/// Aliased stamp: every pixel whose centre lies within the radius is fully on.
pub fn generate_pencil_stamp(diameter: f32) -> BrushStamp {
    let size = diameter.ceil().max(1.0) as u32;
    let radius = (size as f32 / 2.0).max(0.5);
    BrushStamp::from_fn(size, |dx, dy| if dx * dx + dy * dy <= radius * radius { 1.0 } else { 0.0 })
}

/// Resample an image tip to `diameter` and rotate it by `angle` degrees.
pub fn generate_stamp_from_tip(tip: &BrushTip, diameter: f32, angle: f32) -> BrushStamp {
    let size = diameter.ceil().max(1.0) as u32;
    let scale = tip.size as f32 / size as f32;
    let (sin, cos) = (-angle.to_radians()).sin_cos();
    let tip_half = tip.size as f32 / 2.0;

    BrushStamp::from_fn(size, |dx, dy| {
        // Inverse-rotate into tip space, then scale.
        let rx = dx * cos - dy * sin;
        let ry = dx * sin + dy * cos;
        let sx = rx * scale + tip_half - 0.5;
        let sy = ry * scale + tip_half - 0.5;
        tip.sample_bilinear(sx, sy)
    })
}

// ============================================================================
// BRUSH TIP – greyscale image mask
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrushTip {
    size: u32,
    mask: Vec<u8>,
    id: u64,
}

impl BrushTip {
    /// `mask` is `size × size` bytes, 255 = full coverage.
    pub fn new(size: u32, mask: Vec<u8>) -> Option<Self> {
        if size == 0 || mask.len() != (size * size) as usize {
            return None;
        }
        let id = fnv1a(&mask) ^ size as u64;
        Some(Self { size, mask, id })
    }

    /// Build from a greyscale image; non-square images are centred on a
    /// square transparent canvas.
    pub fn from_gray(img: &GrayImage) -> Option<Self> {
        let size = img.width().max(img.height());
        if size == 0 {
            return None;
        }
        let ox = (size - img.width()) / 2;
        let oy = (size - img.height()) / 2;
        let mut mask = vec![0u8; (size * size) as usize];
        for (x, y, p) in img.enumerate_pixels() {
            mask[((y + oy) * size + x + ox) as usize] = p.0[0];
        }
        Self::new(size, mask)
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Content hash used to key the stamp cache.
    pub fn id(&self) -> u64 {
        self.id
    }

    fn value(&self, x: i32, y: i32) -> f32 {
        if x < 0 || y < 0 || x >= self.size as i32 || y >= self.size as i32 {
            return 0.0;
        }
        self.mask[(y as u32 * self.size + x as u32) as usize] as f32 / 255.0
    }

    fn sample_bilinear(&self, x: f32, y: f32) -> f32 {
        let x0 = x.floor() as i32;
        let y0 = y.floor() as i32;
        let fx = x - x0 as f32;
        let fy = y - y0 as f32;
        let top = self.value(x0, y0) * (1.0 - fx) + self.value(x0 + 1, y0) * fx;
        let bot = self.value(x0, y0 + 1) * (1.0 - fx) + self.value(x0 + 1, y0 + 1) * fx;
        top * (1.0 - fy) + bot * fy
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325u64, |h, &b| (h ^ b as u64).wrapping_mul(0x0100_0000_01b3))
}

// ============================================================================
// STAMP CACHE
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StampShape {
    Round { hardness: f32 },
    Pencil,
    Tip { id: u64, angle: f32 },
}

impl StampShape {
    fn approx_eq(&self, other: &StampShape) -> bool {
        const EPS: f32 = 0.01;
        match (self, other) {
            (StampShape::Round { hardness: a }, StampShape::Round { hardness: b }) => (a - b).abs() < EPS,
            (StampShape::Pencil, StampShape::Pencil) => true,
            (StampShape::Tip { id: a, angle: x }, StampShape::Tip { id: b, angle: y }) => {
                a == b && (x - y).abs() < EPS
            }
            _ => false,
        }
    }
}

const STAMP_CACHE_SLOTS: usize = 4;

/// Keeps the most recently used stamps; a request within 0.01 of a cached
/// size/hardness/angle reuses the cached buffer.
#[derive(Default)]
pub struct StampCache {
    entries: Vec<(StampShape, f32, BrushStamp)>,
    hits: u64,
    misses: u64,
}

impl StampCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached stamp for `shape` at `diameter`.  `tip` must be present for
    /// `StampShape::Tip`; a missing tip falls back to a round stamp.
    pub fn get(&mut self, shape: StampShape, diameter: f32, tip: Option<&BrushTip>) -> &BrushStamp {
        let found = self
            .entries
            .iter()
            .position(|(s, d, _)| s.approx_eq(&shape) && (d - diameter).abs() < 0.01);

        let index = match found {
            Some(i) => {
                self.hits += 1;
                i
            }
            None => {
                self.misses += 1;
                let stamp = match (shape, tip) {
                    (StampShape::Round { hardness }, _) => generate_stamp(diameter, hardness),
                    (StampShape::Pencil, _) => generate_pencil_stamp(diameter),
                    (StampShape::Tip { angle, .. }, Some(tip)) => generate_stamp_from_tip(tip, diameter, angle),
                    (StampShape::Tip { .. }, None) => generate_stamp(diameter, 1.0),
                };
                if self.entries.len() == STAMP_CACHE_SLOTS {
                    self.entries.remove(0);
                }
                self.entries.push((shape, diameter, stamp));
                self.entries.len() - 1
            }
        };
        &self.entries[index].2
    }

    /// `(hits, misses)` since creation.
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

// ============================================================================
// DYNAMICS – deterministic per-dab jitter
// ============================================================================

/// Deterministic pseudo-random hash of a dab position and counter.
pub fn stamp_hash(x: f32, y: f32, counter: u32) -> u32 {
    let ix = (x * 100.0) as u32;
    let iy = (y * 100.0) as u32;
    let mut h = ix
        .wrapping_mul(374761393)
        .wrapping_add(iy.wrapping_mul(668265263))
        .wrapping_add(counter.wrapping_mul(1013904223));
    h ^= h >> 13;
    h = h.wrapping_mul(1274126177);
    h ^= h >> 16;
    h
}

#[inline]
fn unit_hash(x: f32, y: f32, counter: u32) -> f32 {
    stamp_hash(x, y, counter) as f32 / u32::MAX as f32
}

#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct BrushDynamics {
    /// 0..1: how far a dab may shrink below the nominal size.
    pub size_jitter: f32,
    /// 0..1: smallest allowed fraction of the nominal size.
    pub size_jitter_min: f32,
    /// Degrees of random rotation either way.
    pub angle_jitter: f32,
    /// Offset perpendicular to the stroke, as a fraction of the dab size.
    pub scatter: f32,
    /// Offset along the stroke, as a fraction of the dab size.
    pub scatter_along: f32,
}

/// Final placement of one dab.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Dab {
    pub x: f32,
    pub y: f32,
    pub size: f32,
    pub angle: f32,
}

impl BrushDynamics {
    pub fn is_static(&self) -> bool {
        self.size_jitter <= 0.0 && self.angle_jitter <= 0.0 && self.scatter <= 0.0 && self.scatter_along <= 0.0
    }

    /// Jitter a dab.  `direction` is the stroke direction (need not be unit
    /// length); `counter` is the dab index within the stroke.
    pub fn apply(&self, x: f32, y: f32, size: f32, angle: f32, direction: (f32, f32), counter: u32) -> Dab {
        let mut dab = Dab { x, y, size, angle };
        if self.is_static() {
            return dab;
        }

        if self.size_jitter > 0.0 {
            let r = unit_hash(x, y, counter);
            let factor = (1.0 - self.size_jitter.min(1.0) * r).max(self.size_jitter_min.clamp(0.0, 1.0));
            dab.size = size * factor;
        }
        if self.angle_jitter > 0.0 {
            let r = unit_hash(x + 0.1, y + 0.2, counter.wrapping_add(777));
            dab.angle = angle + (r * 2.0 - 1.0) * self.angle_jitter;
        }
        if self.scatter > 0.0 || self.scatter_along > 0.0 {
            let len = (direction.0 * direction.0 + direction.1 * direction.1).sqrt();
            let (ux, uy) = if len > 1e-6 { (direction.0 / len, direction.1 / len) } else { (1.0, 0.0) };
            let perp = (unit_hash(y, x, counter.wrapping_add(99991)) * 2.0 - 1.0) * self.scatter * size;
            let along = (unit_hash(x + 0.3, y + 0.4, counter.wrapping_add(555)) * 2.0 - 1.0) * self.scatter_along * size;
            dab.x += -uy * perp + ux * along;
            dab.y += ux * perp + uy * along;
        }
        dab
    }
}

// ============================================================================
// PRESSURE CURVE – cubic bezier from (0,0) to (1,1)
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PressureCurve {
    pub p1: (f32, f32),
    pub p2: (f32, f32),
}

impl Default for PressureCurve {
    fn default() -> Self {
        Self::LINEAR
    }
}

impl PressureCurve {
    pub const LINEAR: PressureCurve = PressureCurve { p1: (1.0 / 3.0, 1.0 / 3.0), p2: (2.0 / 3.0, 2.0 / 3.0) };

    fn bezier(t: f32, a: f32, b: f32) -> f32 {
        let mt = 1.0 - t;
        3.0 * mt * mt * t * a + 3.0 * mt * t * t * b + t * t * t
    }

    /// Map raw pressure to output.  The curve is inverted on x with a fixed
    /// 10-step bisection.
    pub fn evaluate(&self, pressure: f32) -> f32 {
        let p = pressure.clamp(0.0, 1.0);
        let (mut lo, mut hi) = (0.0f32, 1.0f32);
        for _ in 0..10 {
            let mid = (lo + hi) * 0.5;
            if Self::bezier(mid, self.p1.0, self.p2.0) < p {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        let t = (lo + hi) * 0.5;
        Self::bezier(t, self.p1.1, self.p2.1).clamp(0.0, 1.0)
    }
}
