//! Sparse tiled raster editing core: 64×64 tile canvases, blend modes,
//! resampling, brush stamping with stroke buffers, tile-diff undo and a
//! layer compositor.

#![allow(clippy::too_many_arguments)]

#[macro_use]
pub mod logger;

pub mod blend;
pub mod canvas;
pub mod cli;
pub mod components;
pub mod compositor;
pub mod document;
pub mod io;
pub mod layer;
pub mod ops;
pub mod selection;
pub mod settings;

pub use blend::BlendMode;
pub use canvas::{Pixel, PixelRect, TILE_SIZE, TiledCanvas};
pub use components::history::HistoryManager;
pub use components::tools::{BrushRenderer, BrushSettings, ToolEvent};
pub use compositor::{Compositor, Framebuffer};
pub use document::Document;
pub use settings::AppSettings;
