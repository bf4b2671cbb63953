use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use image::codecs::png::PngEncoder;
use image::{ImageEncoder, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::canvas::TiledCanvas;
use crate::components::brush::BrushTip;
use crate::components::tools::BrushSettings;

// ============================================================================
// BRUSH PRESET FILE FORMAT
// ============================================================================

/// Magic header for brush preset files
const PRESET_MAGIC: &str = "PCBR";
/// Current preset format version
pub const PRESET_VERSION: u32 = 1;
/// Largest preset file accepted, guards against crafted inputs.
const MAX_PRESET_BYTES: u64 = 16 * 1024 * 1024;

/// Serializable brush preset
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BrushPreset {
    magic: String,
    pub version: u32,
    pub name: String,
    pub settings: BrushSettings,
}

impl BrushPreset {
    pub fn new(name: impl Into<String>, settings: BrushSettings) -> Self {
        Self { magic: PRESET_MAGIC.to_string(), version: PRESET_VERSION, name: name.into(), settings }
    }
}

/// Error type for preset and image file operations
#[derive(Debug)]
pub enum PresetError {
    Io(std::io::Error),
    Serialize(String),
    InvalidFormat(String),
}

impl std::fmt::Display for PresetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PresetError::Io(e) => write!(f, "I/O error: {}", e),
            PresetError::Serialize(e) => write!(f, "Serialization error: {}", e),
            PresetError::InvalidFormat(e) => write!(f, "Invalid format: {}", e),
        }
    }
}

impl std::error::Error for PresetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PresetError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PresetError {
    fn from(e: std::io::Error) -> Self {
        PresetError::Io(e)
    }
}

impl From<Box<bincode::ErrorKind>> for PresetError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        PresetError::Serialize(e.to_string())
    }
}

impl From<image::ImageError> for PresetError {
    fn from(e: image::ImageError) -> Self {
        match e {
            image::ImageError::IoError(io) => PresetError::Io(io),
            other => PresetError::InvalidFormat(other.to_string()),
        }
    }
}

pub fn encode_brush_preset(preset: &BrushPreset) -> Result<Vec<u8>, PresetError> {
    Ok(bincode::serialize(preset)?)
}

pub fn decode_brush_preset(raw: &[u8]) -> Result<BrushPreset, PresetError> {
    if raw.len() < 12 {
        return Err(PresetError::InvalidFormat("File too small".into()));
    }
    // bincode writes a String as an 8-byte length prefix + UTF-8 data, so
    // bytes 8..12 hold the magic.
    let magic = std::str::from_utf8(&raw[8..12]).unwrap_or("");
    if magic != PRESET_MAGIC {
        return Err(PresetError::InvalidFormat(format!("Unknown magic '{}'", magic)));
    }
    let preset: BrushPreset = bincode::deserialize(raw)?;
    if preset.version > PRESET_VERSION {
        return Err(PresetError::InvalidFormat(format!("Unsupported preset version {}", preset.version)));
    }
    Ok(preset)
}

/// Write a brush preset (`.pcbr`).
pub fn save_brush_preset(preset: &BrushPreset, path: &Path) -> Result<(), PresetError> {
    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    bincode::serialize_into(writer, preset).inspect_err(|e| {
        log_err!("Preset: failed to write {}: {}", path.display(), e);
    })?;
    log_info!("Preset '{}' saved to {}", preset.name, path.display());
    Ok(())
}

pub fn load_brush_preset(path: &Path) -> Result<BrushPreset, PresetError> {
    let len = std::fs::metadata(path)?.len();
    if len > MAX_PRESET_BYTES {
        return Err(PresetError::InvalidFormat(format!("Preset file too large ({} bytes)", len)));
    }
    let raw = std::fs::read(path)?;
    decode_brush_preset(&raw).inspect_err(|e| {
        log_warn!("Preset: could not load {}: {}", path.display(), e);
    })
}

// ============================================================================
// IMAGE HELPERS
// ============================================================================

/// Encode an RGBA image as PNG.
pub fn export_png(image: &RgbaImage, path: &Path) -> Result<(), PresetError> {
    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    PngEncoder::new(writer).write_image(image.as_raw(), image.width(), image.height(), image::ColorType::Rgba8)?;
    Ok(())
}

/// Write the logical area of a canvas as PNG.
pub fn export_canvas_png(canvas: &TiledCanvas, path: &Path) -> Result<(), PresetError> {
    export_png(&canvas.to_rgba_image(), path)
}

/// Load any image the `image` crate understands into a sparse canvas.
pub fn load_canvas(path: &Path) -> Result<TiledCanvas, PresetError> {
    let img = image::open(path)?.to_rgba8();
    Ok(TiledCanvas::from_rgba_image(&img))
}

/// Load a brush tip from an image; luminance times alpha becomes coverage.
pub fn load_brush_tip(path: &Path) -> Result<BrushTip, PresetError> {
    let rgba = image::open(path)?.to_rgba8();
    let gray = image::GrayImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let luma = (r as u32 * 299 + g as u32 * 587 + b as u32 * 114) / 1000;
        image::Luma([(luma * a as u32 / 255) as u8])
    });
    BrushTip::from_gray(&gray).ok_or_else(|| PresetError::InvalidFormat("Empty brush tip image".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::tools::BrushMode;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("paintcore_{}_{}", std::process::id(), name))
    }

    #[test]
    fn preset_round_trips_through_file() {
        let settings = BrushSettings { size: 42.0, mode: BrushMode::Pencil, color: 0x1234_56FF, ..Default::default() };
        let preset = BrushPreset::new("Chunky", settings);
        let path = temp_path("preset.pcbr");
        save_brush_preset(&preset, &path).expect("save");
        let loaded = load_brush_preset(&path).expect("load");
        let _ = std::fs::remove_file(&path);
        assert_eq!(loaded, preset);
    }

    #[test]
    fn preset_with_tip_round_trips() {
        let tip = BrushTip::new(2, vec![0, 255, 255, 0]).expect("tip");
        let preset = BrushPreset::new("Tipped", BrushSettings { tip: Some(tip), ..Default::default() });
        let bytes = encode_brush_preset(&preset).expect("encode");
        assert_eq!(&bytes[8..12], b"PCBR");
        assert_eq!(decode_brush_preset(&bytes).expect("decode"), preset);
    }

    #[test]
    fn rejects_bad_magic_and_short_files() {
        let mut bytes = encode_brush_preset(&BrushPreset::new("x", BrushSettings::default())).expect("encode");
        bytes[8] = b'X';
        assert!(matches!(decode_brush_preset(&bytes), Err(PresetError::InvalidFormat(_))));
        assert!(matches!(decode_brush_preset(&[1, 2, 3]), Err(PresetError::InvalidFormat(_))));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_brush_preset(&temp_path("does_not_exist.pcbr")).unwrap_err();
        assert!(matches!(err, PresetError::Io(_)));
        assert!(err.to_string().starts_with("I/O error"));
    }

    #[test]
    fn png_export_and_reload() {
        let mut canvas = TiledCanvas::new(70, 10);
        canvas.set_pixel(65, 3, 0xFF00_00FF);
        let path = temp_path("canvas.png");
        export_canvas_png(&canvas, &path).expect("export");
        let loaded = load_canvas(&path).expect("load");
        let _ = std::fs::remove_file(&path);
        assert_eq!(loaded.width(), 70);
        assert_eq!(loaded.get_pixel(65, 3), 0xFF00_00FF);
        assert_eq!(loaded.tile_count(), 1);
    }
}
