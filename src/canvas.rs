use std::collections::{BTreeMap, HashMap};

use image::{Rgba, RgbaImage};
use rayon::prelude::*;

use crate::blend::{self, BlendMode};

// ============================================================================
// PIXEL FORMAT – packed RGBA8888, alpha in the low byte
// ============================================================================

/// Packed `R<<24 | G<<16 | B<<8 | A` pixel.  Alpha 0 means "absent".
pub type Pixel = u32;

pub const TRANSPARENT: Pixel = 0;

#[inline(always)]
pub const fn pack_rgba(r: u8, g: u8, b: u8, a: u8) -> Pixel {
    ((r as u32) << 24) | ((g as u32) << 16) | ((b as u32) << 8) | a as u32
}

#[inline(always)]
pub const fn unpack_rgba(p: Pixel) -> [u8; 4] {
    [(p >> 24) as u8, (p >> 16) as u8, (p >> 8) as u8, p as u8]
}

#[inline(always)]
pub const fn alpha_of(p: Pixel) -> u8 {
    p as u8
}

/// Replace the alpha byte, keeping the colour channels.
#[inline(always)]
pub const fn with_alpha(p: Pixel, a: u8) -> Pixel {
    (p & 0xFFFF_FF00) | a as u32
}

/// Quantize a 0..1 value to a byte.  Exact halves round down so that an
/// opacity ceiling of 0.5 yields 127, never 128.
#[inline(always)]
pub fn unit_to_byte(v: f32) -> u8 {
    (v * 255.0 + 0.499).clamp(0.0, 255.0) as u8
}

pub fn to_rgba8(p: Pixel) -> Rgba<u8> {
    Rgba(unpack_rgba(p))
}

pub fn from_rgba8(px: Rgba<u8>) -> Pixel {
    let [r, g, b, a] = px.0;
    pack_rgba(r, g, b, a)
}

// ============================================================================
// PIXEL RECT – integer rectangle, max edges exclusive
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct PixelRect {
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
}

impl PixelRect {
    pub const fn new(min_x: i32, min_y: i32, max_x: i32, max_y: i32) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    /// Far edges saturate at `i32::MAX`.
    pub const fn from_xywh(x: i32, y: i32, w: u32, h: u32) -> Self {
        Self::new(x, y, x.saturating_add_unsigned(w), y.saturating_add_unsigned(h))
    }

    pub fn is_empty(&self) -> bool {
        self.min_x >= self.max_x || self.min_y >= self.max_y
    }

    pub fn width(&self) -> u32 {
        (self.max_x - self.min_x).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        (self.max_y - self.min_y).max(0) as u32
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.min_x && x < self.max_x && y >= self.min_y && y < self.max_y
    }

    pub fn union(&self, other: PixelRect) -> PixelRect {
        if self.is_empty() {
            return other;
        }
        if other.is_empty() {
            return *self;
        }
        PixelRect::new(
            self.min_x.min(other.min_x),
            self.min_y.min(other.min_y),
            self.max_x.max(other.max_x),
            self.max_y.max(other.max_y),
        )
    }

    /// Overlap of two rects (may be empty).
    pub fn intersect(&self, other: PixelRect) -> PixelRect {
        PixelRect::new(
            self.min_x.max(other.min_x),
            self.min_y.max(other.min_y),
            self.max_x.min(other.max_x),
            self.max_y.min(other.max_y),
        )
    }

    pub fn expand(&self, by: i32) -> PixelRect {
        PixelRect::new(self.min_x - by, self.min_y - by, self.max_x + by, self.max_y + by)
    }

    pub fn translate(&self, dx: i32, dy: i32) -> PixelRect {
        PixelRect::new(self.min_x + dx, self.min_y + dy, self.max_x + dx, self.max_y + dy)
    }

    /// Inclusive tile-coordinate range covering this rect, or `None` when empty.
    pub fn tile_range(&self) -> Option<(TileCoord, TileCoord)> {
        if self.is_empty() {
            return None;
        }
        Some((
            TileCoord::of_pixel(self.min_x, self.min_y),
            TileCoord::of_pixel(self.max_x - 1, self.max_y - 1),
        ))
    }
}

// ============================================================================
// TILE – fixed 64×64 block, unit of sparse allocation
// ============================================================================

pub const TILE_SIZE: i32 = 64;
const TILE_PIXELS: usize = (TILE_SIZE * TILE_SIZE) as usize;

/// Floor division (rounds toward negative infinity).
#[inline(always)]
pub fn floor_div(x: i32, d: i32) -> i32 {
    x.div_euclid(d)
}

/// Floor modulo, always in `0..d` for positive `d`.
#[inline(always)]
pub fn floor_mod(x: i32, d: i32) -> i32 {
    x.rem_euclid(d)
}

#[derive(Clone, PartialEq, Eq)]
pub struct Tile {
    pixels: Box<[Pixel]>,
}

impl Default for Tile {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Tile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let opaque = self.pixels.iter().filter(|&&p| alpha_of(p) != 0).count();
        f.debug_struct("Tile").field("non_transparent", &opaque).finish()
    }
}

impl Tile {
    pub fn new() -> Self {
        Self { pixels: vec![TRANSPARENT; TILE_PIXELS].into_boxed_slice() }
    }

    pub fn filled(color: Pixel) -> Self {
        Self { pixels: vec![color; TILE_PIXELS].into_boxed_slice() }
    }

    #[inline(always)]
    fn index(lx: i32, ly: i32) -> usize {
        (ly * TILE_SIZE + lx) as usize
    }

    #[inline]
    pub fn get(&self, lx: i32, ly: i32) -> Pixel {
        self.pixels[Self::index(lx, ly)]
    }

    #[inline]
    pub fn set(&mut self, lx: i32, ly: i32, p: Pixel) {
        self.pixels[Self::index(lx, ly)] = p;
    }

    #[inline]
    pub fn get_mut(&mut self, lx: i32, ly: i32) -> &mut Pixel {
        &mut self.pixels[Self::index(lx, ly)]
    }

    pub fn pixels(&self) -> &[Pixel] {
        &self.pixels
    }

    /// True when every pixel has alpha 0.
    pub fn is_empty(&self) -> bool {
        self.pixels.iter().all(|&p| alpha_of(p) == 0)
    }
}

// ============================================================================
// TILE ADDRESSING
// ============================================================================

/// Packed tile coordinate: biased X in the high 32 bits, biased Y in the low.
pub type TileKey = u64;

const KEY_BIAS: u32 = 0x8000_0000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoord {
    pub x: i32,
    pub y: i32,
}

impl TileCoord {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    #[inline]
    pub fn of_pixel(x: i32, y: i32) -> Self {
        Self { x: floor_div(x, TILE_SIZE), y: floor_div(y, TILE_SIZE) }
    }

    #[inline]
    pub fn key(self) -> TileKey {
        let hi = (self.x as u32).wrapping_add(KEY_BIAS) as u64;
        let lo = (self.y as u32).wrapping_add(KEY_BIAS) as u64;
        (hi << 32) | lo
    }

    #[inline]
    pub fn from_key(key: TileKey) -> Self {
        let x = ((key >> 32) as u32).wrapping_sub(KEY_BIAS) as i32;
        let y = (key as u32).wrapping_sub(KEY_BIAS) as i32;
        Self { x, y }
    }

    /// Pixel area covered by this tile.
    pub fn pixel_rect(self) -> PixelRect {
        PixelRect::from_xywh(self.x * TILE_SIZE, self.y * TILE_SIZE, TILE_SIZE as u32, TILE_SIZE as u32)
    }
}

/// Before/after tile state for a set of keys.  `None` records that the tile
/// was absent, so swapping it back in removes whatever was allocated since.
pub type TileSnapshot = BTreeMap<TileKey, Option<Tile>>;

// ============================================================================
// TILED CANVAS – sparse surface over signed tile coordinates
// ============================================================================

/// Sparse pixel surface.  A tile is stored only while it may hold a
/// non-transparent pixel; missing tiles read as transparent.
///
/// `width`/`height` describe the logical document area used by the
/// iteration helpers.  Pixel accessors accept any coordinate, so strokes and
/// floating content may temporarily live outside it.
#[derive(Clone, Debug, Default)]
pub struct TiledCanvas {
    width: u32,
    height: u32,
    tiles: HashMap<TileKey, Tile>,
}

impl TiledCanvas {
    // ---- construction -------------------------------------------------------

    /// Create an empty (fully transparent) canvas.
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height, tiles: HashMap::new() }
    }

    /// Fill the logical area with `color`.  A transparent fill allocates nothing.
    pub fn new_filled(width: u32, height: u32, color: Pixel) -> Self {
        let mut canvas = Self::new(width, height);
        if alpha_of(color) == 0 {
            return canvas;
        }
        if let Some((t0, t1)) = canvas.logical_rect().tile_range() {
            for ty in t0.y..=t1.y {
                for tx in t0.x..=t1.x {
                    let coord = TileCoord::new(tx, ty);
                    let area = coord.pixel_rect().intersect(canvas.logical_rect());
                    let mut tile = Tile::new();
                    for y in area.min_y..area.max_y {
                        for x in area.min_x..area.max_x {
                            tile.set(floor_mod(x, TILE_SIZE), floor_mod(y, TILE_SIZE), color);
                        }
                    }
                    canvas.tiles.insert(coord.key(), tile);
                }
            }
        }
        canvas
    }

    /// Import from a flat `RgbaImage`.  Only non-transparent tiles are stored.
    /// Tile conversion is parallelised with rayon.
    pub fn from_rgba_image(src: &RgbaImage) -> Self {
        let (width, height) = src.dimensions();
        let mut canvas = Self::new(width, height);
        let Some((_, last)) = canvas.logical_rect().tile_range() else {
            return canvas;
        };
        let tiles_x = (last.x + 1) as usize;
        let total = tiles_x * (last.y + 1) as usize;

        let built: Vec<(TileKey, Tile)> = (0..total)
            .into_par_iter()
            .filter_map(|flat| {
                let coord = TileCoord::new((flat % tiles_x) as i32, (flat / tiles_x) as i32);
                let area = coord.pixel_rect().intersect(PixelRect::from_xywh(0, 0, width, height));
                let mut tile = Tile::new();
                let mut has_content = false;
                for y in area.min_y..area.max_y {
                    for x in area.min_x..area.max_x {
                        let p = from_rgba8(*src.get_pixel(x as u32, y as u32));
                        if alpha_of(p) != 0 {
                            has_content = true;
                            tile.set(floor_mod(x, TILE_SIZE), floor_mod(y, TILE_SIZE), p);
                        }
                    }
                }
                has_content.then(|| (coord.key(), tile))
            })
            .collect();

        canvas.tiles.extend(built);
        canvas
    }

    /// Flatten the logical area into a contiguous `RgbaImage`.
    pub fn to_rgba_image(&self) -> RgbaImage {
        let mut out = RgbaImage::new(self.width, self.height);
        let logical = self.logical_rect();
        self.for_each_pixel(|x, y, p| {
            if logical.contains(x, y) {
                out.put_pixel(x as u32, y as u32, to_rgba8(p));
            }
        });
        out
    }

    // ---- dimensions ---------------------------------------------------------

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn logical_rect(&self) -> PixelRect {
        PixelRect::from_xywh(0, 0, self.width, self.height)
    }

    /// Change the logical size without touching stored tiles.
    pub fn set_logical_size(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    // ---- tile access --------------------------------------------------------

    /// Number of allocated tiles.
    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    pub fn tile(&self, coord: TileCoord) -> Option<&Tile> {
        self.tiles.get(&coord.key())
    }

    pub fn tile_mut(&mut self, coord: TileCoord) -> Option<&mut Tile> {
        self.tiles.get_mut(&coord.key())
    }

    /// Get or allocate the tile at `coord`.
    pub fn ensure_tile(&mut self, coord: TileCoord) -> &mut Tile {
        self.tiles.entry(coord.key()).or_default()
    }

    /// Allocated tile keys in ascending key order (X-major, then Y).
    pub fn sorted_keys(&self) -> Vec<TileKey> {
        let mut keys: Vec<TileKey> = self.tiles.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    // ---- pixel access -------------------------------------------------------

    /// Read a pixel.  Unallocated tiles read as transparent.
    #[inline]
    pub fn get_pixel(&self, x: i32, y: i32) -> Pixel {
        let coord = TileCoord::of_pixel(x, y);
        match self.tiles.get(&coord.key()) {
            Some(tile) => tile.get(floor_mod(x, TILE_SIZE), floor_mod(y, TILE_SIZE)),
            None => TRANSPARENT,
        }
    }

    /// Write a pixel.  A transparent write to an absent tile allocates nothing.
    #[inline]
    pub fn set_pixel(&mut self, x: i32, y: i32, p: Pixel) {
        let key = TileCoord::of_pixel(x, y).key();
        let (lx, ly) = (floor_mod(x, TILE_SIZE), floor_mod(y, TILE_SIZE));
        if alpha_of(p) == 0 {
            if let Some(tile) = self.tiles.get_mut(&key) {
                tile.set(lx, ly, p);
            }
            return;
        }
        self.tiles.entry(key).or_default().set(lx, ly, p);
    }

    /// Composite `src` onto the stored pixel with the given mode and opacity.
    #[inline]
    pub fn blend_pixel(&mut self, x: i32, y: i32, src: Pixel, mode: BlendMode, opacity: f32) {
        if alpha_of(src) == 0 || opacity <= 0.0 {
            return;
        }
        let dst = self.get_pixel(x, y);
        self.set_pixel(x, y, blend::blend(dst, src, mode, opacity));
    }

    /// Reduce the stored alpha by `strength` (0..1).  Colour is kept so that a
    /// partial erase does not shift hue.
    #[inline]
    pub fn erase_pixel(&mut self, x: i32, y: i32, strength: f32) {
        if strength <= 0.0 {
            return;
        }
        let key = TileCoord::of_pixel(x, y).key();
        let Some(tile) = self.tiles.get_mut(&key) else {
            return;
        };
        let px = tile.get_mut(floor_mod(x, TILE_SIZE), floor_mod(y, TILE_SIZE));
        let a = unit_to_byte(alpha_of(*px) as f32 / 255.0 * (1.0 - strength.min(1.0)));
        *px = if a == 0 { TRANSPARENT } else { with_alpha(*px, a) };
    }

    // ---- traversal ----------------------------------------------------------

    /// Visit allocated tiles in key order.  Cost is proportional to the
    /// painted area, not the logical size.
    pub fn for_each_tile<F: FnMut(TileCoord, &Tile)>(&self, mut f: F) {
        for key in self.sorted_keys() {
            if let Some(tile) = self.tiles.get(&key) {
                f(TileCoord::from_key(key), tile);
            }
        }
    }

    /// Visit every non-transparent pixel in allocated tiles.
    pub fn for_each_pixel<F: FnMut(i32, i32, Pixel)>(&self, mut f: F) {
        self.for_each_tile(|coord, tile| {
            let base_x = coord.x * TILE_SIZE;
            let base_y = coord.y * TILE_SIZE;
            for ly in 0..TILE_SIZE {
                for lx in 0..TILE_SIZE {
                    let p = tile.get(lx, ly);
                    if alpha_of(p) != 0 {
                        f(base_x + lx, base_y + ly, p);
                    }
                }
            }
        });
    }

    // ---- maintenance --------------------------------------------------------

    /// Drop tiles whose pixels are all transparent.  Returns how many went.
    pub fn prune_empty_tiles(&mut self) -> usize {
        let before = self.tiles.len();
        self.tiles.retain(|_, tile| !tile.is_empty());
        before - self.tiles.len()
    }

    /// Tight bounds of non-transparent content, or `None` for an empty canvas.
    pub fn content_bounds(&self) -> Option<PixelRect> {
        let mut bounds = PixelRect::default();
        for (&key, tile) in &self.tiles {
            let coord = TileCoord::from_key(key);
            let tile_rect = coord.pixel_rect();
            // Skip the per-pixel scan when the tile cannot extend the bounds.
            if !bounds.is_empty() && bounds.union(tile_rect) == bounds {
                continue;
            }
            for ly in 0..TILE_SIZE {
                for lx in 0..TILE_SIZE {
                    if alpha_of(tile.get(lx, ly)) != 0 {
                        let x = tile_rect.min_x + lx;
                        let y = tile_rect.min_y + ly;
                        bounds = bounds.union(PixelRect::new(x, y, x + 1, y + 1));
                    }
                }
            }
        }
        (!bounds.is_empty()).then_some(bounds)
    }

    /// Drop every tile.
    pub fn clear(&mut self) {
        self.tiles.clear();
    }

    /// Bytes held by allocated tile pixel data.
    pub fn memory_bytes(&self) -> usize {
        self.tiles.len() * TILE_PIXELS * std::mem::size_of::<Pixel>()
    }

    // ---- undo primitives ----------------------------------------------------

    /// Snapshot every tile key whose pixel range intersects `bounds`.
    /// Absent tiles are recorded as `None`.
    pub fn clone_tiles_in_rect(&self, bounds: PixelRect) -> TileSnapshot {
        let mut snapshot = TileSnapshot::new();
        let Some((t0, t1)) = bounds.tile_range() else {
            return snapshot;
        };
        for tx in t0.x..=t1.x {
            for ty in t0.y..=t1.y {
                let key = TileCoord::new(tx, ty).key();
                snapshot.insert(key, self.tiles.get(&key).cloned());
            }
        }
        snapshot
    }

    /// Current state of exactly the keys present in `keys`.
    pub fn clone_tiles_for_keys<'a, I: IntoIterator<Item = &'a TileKey>>(&self, keys: I) -> TileSnapshot {
        keys.into_iter().map(|&key| (key, self.tiles.get(&key).cloned())).collect()
    }

    /// Install `incoming` for its keys and return what those keys held before.
    pub fn swap_tiles(&mut self, incoming: TileSnapshot) -> TileSnapshot {
        let mut replaced = TileSnapshot::new();
        for (key, tile) in incoming {
            let previous = match tile {
                Some(tile) => self.tiles.insert(key, tile),
                None => self.tiles.remove(&key),
            };
            replaced.insert(key, previous);
        }
        replaced
    }
}

/// Union of the pixel areas of every key in a snapshot.
pub fn snapshot_bounds(snapshot: &TileSnapshot) -> PixelRect {
    snapshot
        .keys()
        .fold(PixelRect::default(), |acc, &key| acc.union(TileCoord::from_key(key).pixel_rect()))
}
