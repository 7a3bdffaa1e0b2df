use std::path::{Path, PathBuf};

use crate::canvas::RenderType;
use crate::io::DEFAULT_MAX_RAW_BYTES;

/// Persisted user preferences.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppSettings {
    pub last_path_import: String,
    pub last_path_raw: String,
    pub last_path_load: String,
    pub last_path_save: String,
    pub last_path_export: String,
    /// Whether raw imports read 4-byte ARGB groups by default.
    pub raw_alpha: bool,
    pub default_render_type: RenderType,
    /// Cap on bytes read by a raw import.
    pub max_raw_bytes: u64,
    /// Use rayon in the compositor and the per-pixel effects.
    pub parallel_render: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            last_path_import: String::new(),
            last_path_raw: String::new(),
            last_path_load: String::new(),
            last_path_save: String::new(),
            last_path_export: String::new(),
            raw_alpha: false,
            default_render_type: RenderType::Sum,
            max_raw_bytes: DEFAULT_MAX_RAW_BYTES,
            parallel_render: true,
        }
    }
}

impl AppSettings {
    /// Path to the settings file.
    /// On Linux:   ~/.config/glitchy/glitchy_settings.cfg  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\Glitchy\glitchy_settings.cfg
    /// On macOS:   ~/Library/Application Support/Glitchy/glitchy_settings.cfg
    /// Fallback:   same directory as the executable.
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            let config_dir = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
                    PathBuf::from(home).join(".config")
                })
                .join("glitchy");
            Some(config_dir.join("glitchy_settings.cfg"))
        }
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA")
                .or_else(|_| std::env::var("USERPROFILE"))
                .ok()?;
            Some(PathBuf::from(appdata).join("Glitchy").join("glitchy_settings.cfg"))
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").ok()?;
            Some(
                PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("Glitchy")
                    .join("glitchy_settings.cfg"),
            )
        }
        #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
        {
            std::env::current_exe()
                .ok()
                .and_then(|p| p.parent().map(|d| d.join("glitchy_settings.cfg")))
        }
    }

    /// Load from the default location (defaults if missing or unreadable).
    pub fn load() -> Self {
        match Self::settings_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Save to the default location. Failures are logged, not returned.
    pub fn save(&self) {
        if let Some(path) = Self::settings_path()
            && let Err(e) = self.save_to(&path)
        {
            crate::log_warn!("Could not save settings to {}: {}", path.display(), e);
        }
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(_) => Self::default(),
        }
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_config())
    }

    fn to_config(&self) -> String {
        format!(
            "last_path_import={}\n\
             last_path_raw={}\n\
             last_path_load={}\n\
             last_path_save={}\n\
             last_path_export={}\n\
             raw_alpha={}\n\
             default_render_type={}\n\
             max_raw_bytes={}\n\
             parallel_render={}\n",
            self.last_path_import,
            self.last_path_raw,
            self.last_path_load,
            self.last_path_save,
            self.last_path_export,
            self.raw_alpha,
            self.default_render_type.code(),
            self.max_raw_bytes,
            self.parallel_render,
        )
    }

    /// Unknown keys are skipped; malformed values keep their defaults.
    fn parse(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            let Some((key, val)) = line.split_once('=') else { continue };
            let key = key.trim();
            let val = val.trim();
            match key {
                "last_path_import" => s.last_path_import = val.to_string(),
                "last_path_raw" => s.last_path_raw = val.to_string(),
                "last_path_load" => s.last_path_load = val.to_string(),
                "last_path_save" => s.last_path_save = val.to_string(),
                "last_path_export" => s.last_path_export = val.to_string(),
                "raw_alpha" => s.raw_alpha = val == "true",
                "default_render_type" => {
                    if let Some(rt) = val.parse().ok().and_then(RenderType::from_code) {
                        s.default_render_type = rt;
                    }
                }
                "max_raw_bytes" => {
                    s.max_raw_bytes = val.parse().unwrap_or(DEFAULT_MAX_RAW_BYTES);
                }
                "parallel_render" => s.parallel_render = val != "false",
                _ => {}
            }
        }
        s
    }
}
