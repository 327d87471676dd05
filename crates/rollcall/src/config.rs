//! Runtime configuration: built-in defaults, an optional TOML file named by
//! `ROLLCALL_CONFIG`, then `ROLLCALL_*` environment overrides.

use rollcall_core::{MatchThresholds, RecognitionSettings};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Toml {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Application configuration.
///
/// Built-in defaults, overridden by the TOML file named in `ROLLCALL_CONFIG`,
/// overridden in turn by `ROLLCALL_*` environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub capture_width: u32,
    pub capture_height: u32,
    /// Upper bound on one blocking camera read.
    pub read_timeout_ms: u64,
    /// Frames discarded after the stream starts (camera AGC/AE stabilization).
    pub warmup_frames: usize,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Enrolled face encodings (JSON).
    pub gallery_path: PathBuf,
    /// Path to the SQLite attendance database.
    pub db_path: PathBuf,
    /// Class roster with PINs (JSON).
    pub classes_path: PathBuf,
    /// TrueType font for preview labels; boxes only when unset.
    pub font_path: Option<PathBuf>,
    /// Where the preview task writes the latest annotated frame.
    pub preview_path: Option<PathBuf>,
    /// Maximum embedding distance for a candidate match.
    pub tolerance: f32,
    pub min_confidence: f32,
    pub cooldown_secs: u64,
    /// Process every Nth frame.
    pub frame_skip: u32,
    pub scale_factor: f32,
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

impl Default for Config {
    fn default() -> Self {
        Self::with_data_dir(&default_data_dir())
    }
}

impl Config {
    /// Defaults with every data file under `data_dir`.
    pub fn with_data_dir(data_dir: &Path) -> Self {
        let recognition = RecognitionSettings::default();
        Self {
            camera_device: "/dev/video0".to_string(),
            capture_width: 640,
            capture_height: 480,
            read_timeout_ms: 2000,
            warmup_frames: 4,
            model_dir: data_dir.join("models"),
            gallery_path: data_dir.join("encodings.json"),
            db_path: data_dir.join("attendance.db"),
            classes_path: data_dir.join("classes.json"),
            font_path: None,
            preview_path: None,
            tolerance: recognition.thresholds.tolerance,
            min_confidence: recognition.thresholds.min_confidence,
            cooldown_secs: recognition.cooldown.as_secs(),
            frame_skip: recognition.frame_skip,
            scale_factor: recognition.scale_factor,
        }
    }

    /// Load from defaults, `ROLLCALL_CONFIG` and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os("ROLLCALL_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&text).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Apply `ROLLCALL_*` overrides. Unparseable values are ignored with a
    /// warning.
    pub fn apply_env(&mut self, vars: impl Fn(&str) -> Option<String>) {
        if let Some(v) = vars("ROLLCALL_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        env_parse(&vars, "ROLLCALL_CAPTURE_WIDTH", &mut self.capture_width);
        env_parse(&vars, "ROLLCALL_CAPTURE_HEIGHT", &mut self.capture_height);
        env_parse(&vars, "ROLLCALL_READ_TIMEOUT_MS", &mut self.read_timeout_ms);
        env_parse(&vars, "ROLLCALL_WARMUP_FRAMES", &mut self.warmup_frames);
        env_path(&vars, "ROLLCALL_MODEL_DIR", &mut self.model_dir);
        env_path(&vars, "ROLLCALL_GALLERY_PATH", &mut self.gallery_path);
        env_path(&vars, "ROLLCALL_DB_PATH", &mut self.db_path);
        env_path(&vars, "ROLLCALL_CLASSES_PATH", &mut self.classes_path);
        if let Some(v) = vars("ROLLCALL_FONT_PATH") {
            self.font_path = (!v.is_empty()).then(|| PathBuf::from(v));
        }
        if let Some(v) = vars("ROLLCALL_PREVIEW_PATH") {
            self.preview_path = (!v.is_empty()).then(|| PathBuf::from(v));
        }
        env_parse(&vars, "ROLLCALL_TOLERANCE", &mut self.tolerance);
        env_parse(&vars, "ROLLCALL_MIN_CONFIDENCE", &mut self.min_confidence);
        env_parse(&vars, "ROLLCALL_COOLDOWN_SECS", &mut self.cooldown_secs);
        env_parse(&vars, "ROLLCALL_FRAME_SKIP", &mut self.frame_skip);
        env_parse(&vars, "ROLLCALL_SCALE_FACTOR", &mut self.scale_factor);
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_dir.join("det_10g.onnx")
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> PathBuf {
        self.model_dir.join("w600k_r50.onnx")
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn recognition(&self) -> RecognitionSettings {
        RecognitionSettings {
            thresholds: MatchThresholds {
                tolerance: self.tolerance,
                min_confidence: self.min_confidence,
            },
            cooldown: Duration::from_secs(self.cooldown_secs),
            frame_skip: self.frame_skip,
            scale_factor: self.scale_factor,
        }
    }
}

fn env_parse<T: FromStr>(vars: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    let Some(raw) = vars(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(v) => *slot = v,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable environment override"),
    }
}

fn env_path(vars: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut PathBuf) {
    if let Some(v) = vars(key) {
        if !v.is_empty() {
            *slot = PathBuf::from(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::with_data_dir(Path::new("/data/rollcall"));
        assert_eq!(config.camera_device, "/dev/video0");
        assert_eq!((config.capture_width, config.capture_height), (640, 480));
        assert_eq!(config.gallery_path, PathBuf::from("/data/rollcall/encodings.json"));
        assert_eq!(config.db_path, PathBuf::from("/data/rollcall/attendance.db"));
        assert_eq!(config.scrfd_model_path(), PathBuf::from("/data/rollcall/models/det_10g.onnx"));
        assert!(config.font_path.is_none());

        let settings = config.recognition();
        assert_eq!(settings, RecognitionSettings::default());
        assert_eq!(settings.thresholds.tolerance, 0.6);
        assert_eq!(settings.thresholds.min_confidence, 0.5);
        assert_eq!(settings.cooldown, Duration::from_secs(5));
        assert_eq!(settings.frame_skip, 2);
        assert_eq!(settings.scale_factor, 0.5);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::with_data_dir(Path::new("/data"));
        config.apply_env(lookup(&[
            ("ROLLCALL_CAMERA_DEVICE", "/dev/video4"),
            ("ROLLCALL_TOLERANCE", "0.45"),
            ("ROLLCALL_COOLDOWN_SECS", "10"),
            ("ROLLCALL_FRAME_SKIP", "3"),
            ("ROLLCALL_DB_PATH", "/var/lib/rollcall/att.db"),
            ("ROLLCALL_FONT_PATH", "/usr/share/fonts/DejaVuSans.ttf"),
        ]));
        assert_eq!(config.camera_device, "/dev/video4");
        assert_eq!(config.tolerance, 0.45);
        assert_eq!(config.db_path, PathBuf::from("/var/lib/rollcall/att.db"));
        assert_eq!(config.font_path, Some(PathBuf::from("/usr/share/fonts/DejaVuSans.ttf")));
        let settings = config.recognition();
        assert_eq!(settings.cooldown, Duration::from_secs(10));
        assert_eq!(settings.frame_skip, 3);
    }

    #[test]
    fn test_invalid_env_value_keeps_previous() {
        let mut config = Config::with_data_dir(Path::new("/data"));
        config.apply_env(lookup(&[
            ("ROLLCALL_TOLERANCE", "loose"),
            ("ROLLCALL_WARMUP_FRAMES", "-1"),
        ]));
        assert_eq!(config.tolerance, 0.6);
        assert_eq!(config.warmup_frames, 4);
    }

    #[test]
    fn test_toml_partial_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            file.path(),
            "camera_device = \"/dev/video1\"\nmin_confidence = 0.7\npreview_path = \"/tmp/preview.jpg\"\n",
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.camera_device, "/dev/video1");
        assert_eq!(config.min_confidence, 0.7);
        assert_eq!(config.preview_path, Some(PathBuf::from("/tmp/preview.jpg")));
        // Unset keys keep their defaults.
        assert_eq!(config.read_timeout_ms, 2000);
        assert_eq!(config.scale_factor, 0.5);
    }

    #[test]
    fn test_toml_unknown_key_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "tolerence = 0.5\n").unwrap();
        assert!(matches!(
            Config::from_file(file.path()),
            Err(ConfigError::Toml { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            Config::from_file(Path::new("/nonexistent/rollcall.toml")),
            Err(ConfigError::Io { .. })
        ));
    }
}
