// ============================================================================
// PaintCore CLI – headless stroke replay via command-line arguments
// ============================================================================
//
// Usage examples:
//   paintcore -W 256 -H 256 --stroke "10,10 200,180" --output out.png
//   paintcore --color FF0000FF --size 24 --stroke "20,20 40,60,0.5 80,90" -o red.png
//   paintcore --input photo.png --erase --stroke "0,0 300,300" -o holes.png
//   paintcore --preset soft.pcbr --stroke "5,5 100,5" -o soft.png
//   paintcore --size 40 --hardness 0.2 --save-preset soft.pcbr -o preview.png
//
// Each --stroke is a whitespace-separated list of "x,y" or "x,y,pressure"
// points in document coordinates, replayed as mouse down / drag / up.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::{Parser, ValueEnum};

use crate::canvas::Pixel;
use crate::components::tools::{BrushMode, BrushRenderer, BrushSettings, ToolEvent};
use crate::compositor::{Compositor, Framebuffer};
use crate::document::Document;
use crate::io::{BrushPreset, export_png, load_brush_preset, load_brush_tip, load_canvas, save_brush_preset};
use crate::layer::Layer;
use crate::settings::AppSettings;

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum CliBrushMode {
    Brush,
    Pencil,
}

/// PaintCore headless stroke renderer.
#[derive(Parser, Debug)]
#[command(
    name = "paintcore",
    about = "Replay brush strokes onto a tiled canvas and write the result as PNG",
    long_about = "Builds a document with a white background and a paint layer, replays\n\
                  each --stroke through the brush engine, composites the layers and\n\
                  writes the flattened image.\n\n\
                  Example:\n  \
                  paintcore -W 256 -H 256 --stroke \"10,10 200,180\" --output out.png"
)]
pub struct CliArgs {
    /// Canvas width in pixels (ignored with --input).
    #[arg(short = 'W', long, default_value_t = 256)]
    pub width: u32,

    /// Canvas height in pixels (ignored with --input).
    #[arg(short = 'H', long, default_value_t = 256)]
    pub height: u32,

    /// Image to use as the background layer instead of plain white.
    #[arg(short, long, value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// Stroke points: "x0,y0 x1,y1 ..." with optional ",pressure" per point.
    #[arg(short, long, value_name = "POINTS")]
    pub stroke: Vec<String>,

    /// Brush colour as RRGGBB or RRGGBBAA hex.
    #[arg(short, long, value_name = "HEX")]
    pub color: Option<String>,

    /// Brush diameter in pixels.
    #[arg(long)]
    pub size: Option<f32>,

    /// Edge hardness 0..1.
    #[arg(long)]
    pub hardness: Option<f32>,

    /// Dab spacing as a fraction of the brush size.
    #[arg(long)]
    pub spacing: Option<f32>,

    /// Per-dab flow 0..1.
    #[arg(long)]
    pub flow: Option<f32>,

    /// Stroke opacity ceiling 0..1.
    #[arg(long)]
    pub opacity: Option<f32>,

    /// Erase from the background layer instead of painting.
    #[arg(long)]
    pub erase: bool,

    #[arg(long, value_enum)]
    pub mode: Option<CliBrushMode>,

    /// Grayscale image used as the brush tip.
    #[arg(long, value_name = "FILE")]
    pub tip: Option<PathBuf>,

    /// Brush preset to start from; other brush flags override it.
    #[arg(long, value_name = "FILE")]
    pub preset: Option<PathBuf>,

    /// Write the effective brush settings as a preset.
    #[arg(long, value_name = "FILE")]
    pub save_preset: Option<PathBuf>,

    /// Output PNG path.
    #[arg(short, long, value_name = "FILE")]
    pub output: PathBuf,

    /// Print per-stroke information and mirror the log to stderr.
    #[arg(short, long)]
    pub verbose: bool,
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run the CLI and return an OS exit code.
pub fn run(args: CliArgs) -> ExitCode {
    let settings = AppSettings::load();
    match run_with_settings(&args, &settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            log_err!("CLI: {}", e);
            ExitCode::FAILURE
        }
    }
}

pub fn run_with_settings(args: &CliArgs, settings: &AppSettings) -> Result<(), String> {
    let start = Instant::now();

    // -- Step 1: Brush settings -----------------------------------------
    let brush = build_brush(args)?;
    if let Some(path) = &args.save_preset {
        let name = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        save_brush_preset(&BrushPreset::new(name, brush.clone()), path)
            .map_err(|e| format!("could not save preset '{}': {}", path.display(), e))?;
        if args.verbose {
            println!("preset → {}", path.display());
        }
    }

    // -- Step 2: Document -----------------------------------------------
    let mut doc = build_document(args)?;
    doc.history.set_capacity(settings.max_undo_steps);
    let paint = doc.add_pixel_layer("Paint");
    let target = if brush.erase { 0 } else { paint };
    doc.set_active_layer(target);

    // -- Step 3: Replay strokes -----------------------------------------
    let mut renderer = BrushRenderer::new(brush);
    renderer.prune_after_erase = settings.prune_after_erase;
    for (i, points) in args.stroke.iter().enumerate() {
        let events = parse_stroke(points).map_err(|e| format!("stroke {}: {}", i + 1, e))?;
        let dirty = replay_stroke(&mut renderer, &mut doc, &events)
            .ok_or_else(|| format!("stroke {}: layer refused the stroke", i + 1))?;
        if args.verbose {
            println!(
                "stroke {}: {} points, dirty {}x{} at ({}, {})",
                i + 1,
                events.len(),
                dirty.width(),
                dirty.height(),
                dirty.min_x,
                dirty.min_y
            );
        }
    }

    // -- Step 4: Composite and save -------------------------------------
    let compositor = Compositor::new(settings);
    let mut fb = Framebuffer::new(doc.width, doc.height);
    let viewport = fb.rect();
    compositor.composite_document(&mut fb, &mut doc, viewport, 1.0, (0.0, 0.0));
    export_png(&fb.to_rgba_image(), &args.output)
        .map_err(|e| format!("could not write '{}': {}", args.output.display(), e))?;

    if args.verbose {
        let (hits, misses) = renderer.stamp_cache().stats();
        println!("stamp cache: {} hits, {} misses", hits, misses);
        println!("memory: {} bytes in tiles and history", doc.memory_usage());
        println!(
            "→ {} ({:.0}ms)",
            args.output.display(),
            start.elapsed().as_secs_f64() * 1000.0
        );
    }
    log_info!("CLI: wrote {} ({} strokes)", args.output.display(), args.stroke.len());
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn build_brush(args: &CliArgs) -> Result<BrushSettings, String> {
    let mut brush = match &args.preset {
        Some(path) => {
            load_brush_preset(path)
                .map_err(|e| format!("could not load preset '{}': {}", path.display(), e))?
                .settings
        }
        None => BrushSettings::default(),
    };
    if let Some(hex) = &args.color {
        brush.color = parse_color(hex).ok_or_else(|| format!("invalid colour '{}'", hex))?;
    }
    if let Some(v) = args.size {
        brush.size = v.max(1.0);
    }
    if let Some(v) = args.hardness {
        brush.hardness = v.clamp(0.0, 1.0);
    }
    if let Some(v) = args.spacing {
        brush.spacing = v.max(0.01);
    }
    if let Some(v) = args.flow {
        brush.flow = v.clamp(0.0, 1.0);
    }
    if let Some(v) = args.opacity {
        brush.opacity = v.clamp(0.0, 1.0);
    }
    if args.erase {
        brush.erase = true;
    }
    if let Some(mode) = args.mode {
        brush.mode = match mode {
            CliBrushMode::Brush => BrushMode::Brush,
            CliBrushMode::Pencil => BrushMode::Pencil,
        };
    }
    if let Some(path) = &args.tip {
        let tip = load_brush_tip(path).map_err(|e| format!("could not load tip '{}': {}", path.display(), e))?;
        brush.tip = Some(tip);
    }
    Ok(brush)
}

fn build_document(args: &CliArgs) -> Result<Document, String> {
    match &args.input {
        Some(path) => {
            let canvas = load_canvas(path).map_err(|e| format!("could not load '{}': {}", path.display(), e))?;
            let mut doc = Document::empty(canvas.width(), canvas.height());
            doc.layers.push(Layer::from_canvas("Background", canvas));
            Ok(doc)
        }
        None => {
            if args.width == 0 || args.height == 0 {
                return Err("canvas size must be non-zero".into());
            }
            Ok(Document::new(args.width, args.height))
        }
    }
}

/// Feed one stroke to the renderer as down / drag… / up.
fn replay_stroke(
    renderer: &mut BrushRenderer,
    doc: &mut Document,
    events: &[ToolEvent],
) -> Option<crate::canvas::PixelRect> {
    let (first, rest) = events.split_first()?;
    if !renderer.on_mouse_down(doc, first) {
        return None;
    }
    for ev in rest {
        renderer.on_mouse_drag(doc, ev);
    }
    let last = events.last().unwrap_or(first);
    renderer.on_mouse_up(doc, last)
}

/// Parse `"x,y x,y,p …"` into tool events.  Points with a pressure value are
/// reported as pen input.
pub fn parse_stroke(points: &str) -> Result<Vec<ToolEvent>, String> {
    let mut events = Vec::new();
    for token in points.split_whitespace() {
        let parts: Vec<&str> = token.split(',').collect();
        let num = |s: &str| s.trim().parse::<f32>().map_err(|_| format!("bad number '{}' in '{}'", s, token));
        let ev = match parts.as_slice() {
            [x, y] => ToolEvent::at(num(x)?, num(y)?),
            [x, y, p] => ToolEvent::at(num(x)?, num(y)?).with_pressure(num(p)?.clamp(0.0, 1.0)),
            _ => return Err(format!("expected x,y or x,y,pressure, got '{}'", token)),
        };
        events.push(ev);
    }
    if events.is_empty() {
        return Err("no points".into());
    }
    Ok(events)
}

/// Parse `RRGGBB` / `RRGGBBAA` (optional leading `#`).
pub fn parse_color(hex: &str) -> Option<Pixel> {
    let hex = hex.trim().trim_start_matches('#');
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    match hex.len() {
        6 => u32::from_str_radix(hex, 16).ok().map(|rgb| (rgb << 8) | 0xFF),
        8 => u32::from_str_radix(hex, 16).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::tools::PointerType;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("paintcore_cli_{}_{}", std::process::id(), name))
    }

    #[test]
    fn colors() {
        assert_eq!(parse_color("FF0000"), Some(0xFF00_00FF));
        assert_eq!(parse_color("#11223344"), Some(0x1122_3344));
        assert_eq!(parse_color("12345"), None);
        assert_eq!(parse_color("GG0000FF"), None);
    }

    #[test]
    fn stroke_points() {
        let evs = parse_stroke("1,2  3.5,4,0.25").expect("parse");
        assert_eq!(evs.len(), 2);
        assert_eq!((evs[0].x, evs[0].y), (1.0, 2.0));
        assert_eq!(evs[0].pointer_type, PointerType::Mouse);
        assert_eq!(evs[1].pointer_type, PointerType::Pen);
        assert_eq!(evs[1].pressure, 0.25);
        assert!(parse_stroke("").is_err());
        assert!(parse_stroke("1,2,3,4").is_err());
        assert!(parse_stroke("a,b").is_err());
    }

    #[test]
    fn flags_override_preset_defaults() {
        let args = CliArgs::try_parse_from([
            "paintcore", "--size", "30", "--mode", "pencil", "--color", "00FF00", "-o", "x.png",
        ])
        .expect("args");
        let brush = build_brush(&args).expect("brush");
        assert_eq!(brush.size, 30.0);
        assert_eq!(brush.mode, BrushMode::Pencil);
        assert_eq!(brush.color, 0x00FF_00FF);
    }

    #[test]
    fn paints_and_writes_png() {
        let out = temp_path("out.png");
        let args = CliArgs::try_parse_from([
            "paintcore",
            "-W", "64",
            "-H", "32",
            "--color", "FF0000FF",
            "--size", "8",
            "--hardness", "1",
            "--stroke", "8,16 56,16",
            "-o", out.to_str().expect("utf8 path"),
        ])
        .expect("args");
        run_with_settings(&args, &AppSettings::default()).expect("run");
        let img = image::open(&out).expect("png").to_rgba8();
        let _ = std::fs::remove_file(&out);
        assert_eq!((img.width(), img.height()), (64, 32));
        assert_eq!(img.get_pixel(32, 16).0, [255, 0, 0, 255]);
        assert_eq!(img.get_pixel(32, 2).0, [255, 255, 255, 255]);
    }

    #[test]
    fn erase_reveals_checkerboard() {
        let out = temp_path("erase.png");
        let args = CliArgs::try_parse_from([
            "paintcore", "-W", "32", "-H", "32", "--erase", "--size", "12", "--hardness", "1",
            "--stroke", "16,16 16,17", "-o", out.to_str().expect("utf8 path"),
        ])
        .expect("args");
        let settings = AppSettings { checkerboard_light: 0x0000_FFFF, checkerboard_dark: 0x0000_FFFF, ..Default::default() };
        run_with_settings(&args, &settings).expect("run");
        let img = image::open(&out).expect("png").to_rgba8();
        let _ = std::fs::remove_file(&out);
        assert_eq!(img.get_pixel(16, 16).0, [0, 0, 255, 255]);
        assert_eq!(img.get_pixel(0, 0).0, [255, 255, 255, 255]);
    }

    #[test]
    fn bad_stroke_fails() {
        let args = CliArgs::try_parse_from(["paintcore", "--stroke", "1;2", "-o", "never.png"]).expect("args");
        assert!(run_with_settings(&args, &AppSettings::default()).is_err());
    }
}
