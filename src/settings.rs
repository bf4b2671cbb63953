use std::path::{Path, PathBuf};

use crate::canvas::{Pixel, pack_rgba, unpack_rgba};
use crate::ops::sampler::Interpolation;

/// Settings that persist across sessions, stored as `key=value` lines.
#[derive(Clone, Debug, PartialEq)]
pub struct AppSettings {
    /// Maximum number of undo steps
    pub max_undo_steps: usize,
    /// Checkerboard cell size in screen pixels
    pub checkerboard_size: u32,
    pub checkerboard_light: Pixel,
    pub checkerboard_dark: Pixel,
    /// Interpolation forced for rotated or scaled layers
    pub transformed_sampling: Interpolation,
    /// Duration of one marching-ants phase
    pub marching_ants_phase_ms: u64,
    /// Drop fully transparent tiles after an erase stroke
    pub prune_after_erase: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            max_undo_steps: 20,
            checkerboard_size: 8,
            checkerboard_light: 0xFFFF_FFFF,
            checkerboard_dark: 0xCCCC_CCFF,
            transformed_sampling: Interpolation::Bilinear,
            marching_ants_phase_ms: 100,
            prune_after_erase: true,
        }
    }
}

impl AppSettings {
    /// Path to the settings file.  Nothing is created here; [`save`](Self::save)
    /// makes the directory on first write.
    /// On Linux:   ~/.config/paintcore/paintcore_settings.cfg  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\PaintCore\paintcore_settings.cfg  (`None` if neither
    ///             APPDATA nor USERPROFILE is set)
    /// On macOS:   ~/Library/Application Support/PaintCore/paintcore_settings.cfg
    /// Elsewhere:  next to the executable.
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            let config_dir = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
                    PathBuf::from(home).join(".config")
                })
                .join("paintcore");
            return Some(config_dir.join("paintcore_settings.cfg"));
        }
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA").or_else(|_| std::env::var("USERPROFILE")).ok()?;
            let config_dir = PathBuf::from(appdata).join("PaintCore");
            return Some(config_dir.join("paintcore_settings.cfg"));
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
            let config_dir = PathBuf::from(home).join("Library").join("Application Support").join("PaintCore");
            return Some(config_dir.join("paintcore_settings.cfg"));
        }
        #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
        {
            std::env::current_exe().ok().and_then(|p| p.parent().map(|d| d.join("paintcore_settings.cfg")))
        }
    }

    /// Serialize a pixel as "r,g,b,a"
    fn color_to_str(c: Pixel) -> String {
        let [r, g, b, a] = unpack_rgba(c);
        format!("{r},{g},{b},{a}")
    }

    /// Parse a pixel from "r,g,b,a"
    fn str_to_color(s: &str) -> Option<Pixel> {
        let parts: Vec<&str> = s.split(',').collect();
        if parts.len() != 4 {
            return None;
        }
        let r = parts[0].trim().parse::<u8>().ok()?;
        let g = parts[1].trim().parse::<u8>().ok()?;
        let b = parts[2].trim().parse::<u8>().ok()?;
        let a = parts[3].trim().parse::<u8>().ok()?;
        Some(pack_rgba(r, g, b, a))
    }

    pub fn to_config_string(&self) -> String {
        format!(
            "max_undo_steps={}\n\
             checkerboard_size={}\n\
             checkerboard_light={}\n\
             checkerboard_dark={}\n\
             transformed_sampling={}\n\
             marching_ants_phase_ms={}\n\
             prune_after_erase={}\n",
            self.max_undo_steps,
            self.checkerboard_size,
            Self::color_to_str(self.checkerboard_light),
            Self::color_to_str(self.checkerboard_dark),
            self.transformed_sampling.name(),
            self.marching_ants_phase_ms,
            self.prune_after_erase,
        )
    }

    /// Parse `key=value` lines.  Unknown keys are ignored; malformed values
    /// keep their defaults.
    pub fn parse(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let key = key.trim();
            let val = val.trim();
            let ok = match key {
                "max_undo_steps" => val.parse().map(|v: usize| s.max_undo_steps = v.max(1)).is_ok(),
                "checkerboard_size" => val.parse().map(|v: u32| s.checkerboard_size = v.max(1)).is_ok(),
                "checkerboard_light" => Self::str_to_color(val).map(|c| s.checkerboard_light = c).is_some(),
                "checkerboard_dark" => Self::str_to_color(val).map(|c| s.checkerboard_dark = c).is_some(),
                "transformed_sampling" => match Interpolation::from_name(val) {
                    Some(Interpolation::Nearest) | None => false,
                    Some(mode) => {
                        s.transformed_sampling = mode;
                        true
                    }
                },
                "marching_ants_phase_ms" => val.parse().map(|v: u64| s.marching_ants_phase_ms = v.max(1)).is_ok(),
                "prune_after_erase" => val.parse().map(|v: bool| s.prune_after_erase = v).is_ok(),
                _ => true,
            };
            if !ok {
                log_warn!("Settings: bad value '{}' for '{}', using default", val, key);
            }
        }
        s
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(e) => {
                log_warn!("Settings: could not read {}: {} – using defaults", path.display(), e);
                Self::default()
            }
        }
    }

    /// Load settings from disk (returns default if file missing or corrupt)
    pub fn load() -> Self {
        let Some(path) = Self::settings_path() else { return Self::default() };
        if !path.exists() {
            return Self::default();
        }
        Self::load_from(&path)
    }

    /// Write the config, creating missing parent directories.
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, self.to_config_string())
    }

    /// Save settings to disk
    pub fn save(&self) {
        let Some(path) = Self::settings_path() else { return };
        if let Err(e) = self.save_to(&path) {
            log_err!("Settings: could not write {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = AppSettings::default();
        assert_eq!(s.max_undo_steps, 20);
        assert_eq!(s.checkerboard_dark, 0xCCCC_CCFF);
        assert_eq!(s.transformed_sampling, Interpolation::Bilinear);
        assert!(s.prune_after_erase);
    }

    #[test]
    fn config_string_round_trips() {
        let s = AppSettings {
            max_undo_steps: 7,
            checkerboard_light: 0x1020_30FF,
            transformed_sampling: Interpolation::Bicubic,
            prune_after_erase: false,
            ..Default::default()
        };
        assert_eq!(AppSettings::parse(&s.to_config_string()), s);
    }

    #[test]
    fn malformed_values_fall_back() {
        let s = AppSettings::parse(
            "max_undo_steps=lots\n\
             checkerboard_dark=1,2,3\n\
             transformed_sampling=nearest\n\
             no_equals_sign\n\
             unknown_key=5\n\
             checkerboard_size=16\n",
        );
        assert_eq!(s.max_undo_steps, 20);
        assert_eq!(s.checkerboard_dark, 0xCCCC_CCFF);
        assert_eq!(s.transformed_sampling, Interpolation::Bilinear);
        assert_eq!(s.checkerboard_size, 16);
    }

    #[test]
    fn save_and_load_file() {
        let path = std::env::temp_dir().join(format!("paintcore_settings_test_{}.cfg", std::process::id()));
        let s = AppSettings { marching_ants_phase_ms: 250, ..Default::default() };
        s.save_to(&path).expect("write settings");
        assert_eq!(AppSettings::load_from(&path), s);
        let _ = std::fs::remove_file(&path);
        assert_eq!(AppSettings::load_from(&path), AppSettings::default());
    }

    #[test]
    fn save_creates_missing_config_dir() {
        let root = std::env::temp_dir().join(format!("paintcore_settings_dir_{}", std::process::id()));
        let path = root.join("nested").join("paintcore_settings.cfg");
        let _ = std::fs::remove_dir_all(&root);
        assert_eq!(AppSettings::load_from(&path), AppSettings::default());
        assert!(!root.exists());

        let s = AppSettings { checkerboard_size: 12, ..Default::default() };
        s.save_to(&path).expect("write settings");
        assert_eq!(AppSettings::load_from(&path), s);
        let _ = std::fs::remove_dir_all(&root);
    }
}
