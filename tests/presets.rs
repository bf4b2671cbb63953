use std::path::PathBuf;

use paintcore::components::brush::BrushDynamics;
use paintcore::components::tools::{BrushMode, BrushRenderer, BrushSettings, ToolEvent};
use paintcore::document::Document;
use paintcore::io::{BrushPreset, PresetError, load_brush_preset, save_brush_preset};

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("paintcore_it_{}_{}", std::process::id(), name))
}

fn paint_with(settings: BrushSettings) -> Vec<u32> {
    let mut doc = Document::new(96, 96);
    let layer = doc.add_pixel_layer("Paint");
    let mut renderer = BrushRenderer::new(settings);
    assert!(renderer.on_mouse_down(&mut doc, &ToolEvent::at(10.0, 10.0)));
    renderer.on_mouse_drag(&mut doc, &ToolEvent::at(50.0, 70.0).with_pressure(0.4));
    renderer.on_mouse_up(&mut doc, &ToolEvent::at(85.0, 30.0).with_pressure(0.9));
    let canvas = doc.layers[layer].pixels().expect("pixels");
    let mut out = Vec::new();
    for y in 0..96 {
        for x in 0..96 {
            out.push(canvas.get_pixel(x, y));
        }
    }
    out
}

#[test]
fn loaded_preset_paints_identically() {
    let settings = BrushSettings {
        color: 0x3366_99FF,
        size: 14.0,
        hardness: 0.3,
        spacing: 0.2,
        flow: 0.7,
        opacity: 0.8,
        dynamics: BrushDynamics { size_jitter: 0.3, angle_jitter: 20.0, scatter: 0.5, ..Default::default() },
        ..Default::default()
    };
    let path = temp_path("jitter.pcbr");
    save_brush_preset(&BrushPreset::new("Jitter", settings.clone()), &path).expect("save");
    let loaded = load_brush_preset(&path).expect("load");
    let _ = std::fs::remove_file(&path);

    assert_eq!(loaded.name, "Jitter");
    assert_eq!(loaded.settings, settings);
    assert_eq!(paint_with(loaded.settings), paint_with(settings));
}

#[test]
fn truncated_preset_is_rejected() {
    let path = temp_path("truncated.pcbr");
    let preset = BrushPreset::new("Pencil", BrushSettings { mode: BrushMode::Pencil, ..Default::default() });
    save_brush_preset(&preset, &path).expect("save");
    let bytes = std::fs::read(&path).expect("read");
    std::fs::write(&path, &bytes[..bytes.len() / 2]).expect("write");
    let result = load_brush_preset(&path);
    let _ = std::fs::remove_file(&path);
    assert!(matches!(result, Err(PresetError::Serialize(_))));
}
