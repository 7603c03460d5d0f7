use facekit_models::{ModelPaths, ScrfdConfig, YoloConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Daemon configuration.
///
/// Layered as defaults, then the TOML file named by `FACEKIT_CONFIG`, then
/// `FACEKIT_*` environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Minimum SCRFD score for a face.
    pub face_confidence: f32,
    /// IoU above which overlapping faces are suppressed.
    pub nms_threshold: f32,
    /// Minimum YOLOv8 person score.
    pub person_confidence: f32,
    /// IoU above which overlapping people are suppressed.
    pub person_iou: f32,
    /// Upper bound on faces meshed per image.
    pub max_faces: usize,
    /// ONNX Runtime intra-op threads per session.
    pub intra_threads: usize,
    /// Serve on the session bus instead of the system bus.
    pub session_bus: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_dir: facekit_models::default_model_dir(),
            face_confidence: 0.5,
            nms_threshold: 0.4,
            person_confidence: 0.25,
            person_iou: 0.7,
            max_faces: 10,
            intra_threads: 2,
            session_bus: false,
        }
    }
}

impl Config {
    /// Load from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let file = match std::env::var("FACEKIT_CONFIG") {
            Ok(path) => Some(read_file(Path::new(&path))?),
            Err(_) => None,
        };
        Self::from_sources(file.as_deref(), |key| std::env::var(key).ok())
    }

    /// Layer an optional TOML document and an environment lookup over the defaults.
    pub fn from_sources(
        toml_text: Option<&str>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = match toml_text {
            Some(text) => toml::from_str(text)?,
            None => Self::default(),
        };

        if let Some(dir) = env("FACEKIT_MODEL_DIR") {
            config.model_dir = PathBuf::from(dir);
        }
        override_parsed(&env, "FACEKIT_FACE_CONFIDENCE", &mut config.face_confidence);
        override_parsed(&env, "FACEKIT_NMS_THRESHOLD", &mut config.nms_threshold);
        override_parsed(&env, "FACEKIT_PERSON_CONFIDENCE", &mut config.person_confidence);
        override_parsed(&env, "FACEKIT_PERSON_IOU", &mut config.person_iou);
        override_parsed(&env, "FACEKIT_MAX_FACES", &mut config.max_faces);
        override_parsed(&env, "FACEKIT_INTRA_THREADS", &mut config.intra_threads);
        if let Some(v) = env("FACEKIT_SESSION_BUS") {
            config.session_bus = v != "0" && !v.eq_ignore_ascii_case("false");
        }

        Ok(config)
    }

    pub fn model_paths(&self) -> ModelPaths {
        ModelPaths::new(&self.model_dir)
    }

    pub fn scrfd(&self) -> ScrfdConfig {
        ScrfdConfig {
            confidence_threshold: self.face_confidence,
            nms_threshold: self.nms_threshold,
            intra_threads: self.intra_threads,
        }
    }

    pub fn yolo(&self) -> YoloConfig {
        YoloConfig {
            confidence_threshold: self.person_confidence,
            iou_threshold: self.person_iou,
            intra_threads: self.intra_threads,
        }
    }
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Unparseable values keep the current setting.
fn override_parsed<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    match env(key).map(|v| v.parse::<T>()) {
        Some(Ok(value)) => *slot = value,
        Some(Err(_)) => tracing::warn!(key, "ignoring unparseable environment override"),
        None => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_sources(None, env_from(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert!((config.face_confidence - 0.5).abs() < 1e-6);
        assert!((config.person_iou - 0.7).abs() < 1e-6);
        assert_eq!(config.max_faces, 10);
        assert!(!config.session_bus);
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let text = r#"
            model_dir = "/srv/models"
            person_confidence = 0.4
            session_bus = true
        "#;
        let config = Config::from_sources(Some(text), env_from(&[])).unwrap();
        assert_eq!(config.model_dir, PathBuf::from("/srv/models"));
        assert!((config.person_confidence - 0.4).abs() < 1e-6);
        assert!(config.session_bus);
        // untouched keys keep defaults
        assert!((config.nms_threshold - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_env_overrides_toml() {
        let text = "max_faces = 3\nintra_threads = 4\n";
        let env = env_from(&[
            ("FACEKIT_MAX_FACES", "1"),
            ("FACEKIT_MODEL_DIR", "/tmp/m"),
            ("FACEKIT_SESSION_BUS", "1"),
        ]);
        let config = Config::from_sources(Some(text), env).unwrap();
        assert_eq!(config.max_faces, 1);
        assert_eq!(config.intra_threads, 4);
        assert_eq!(config.model_dir, PathBuf::from("/tmp/m"));
        assert!(config.session_bus);
    }

    #[test]
    fn test_unparseable_env_is_ignored() {
        let env = env_from(&[("FACEKIT_FACE_CONFIDENCE", "high"), ("FACEKIT_SESSION_BUS", "false")]);
        let config = Config::from_sources(None, env).unwrap();
        assert!((config.face_confidence - 0.5).abs() < 1e-6);
        assert!(!config.session_bus);
    }

    #[test]
    fn test_invalid_toml() {
        let err = Config::from_sources(Some("max_faces = \"many\""), env_from(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_config_file() {
        let err = read_file(Path::new("/nonexistent/facekit.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_model_specific_configs() {
        let config = Config::from_sources(None, env_from(&[("FACEKIT_NMS_THRESHOLD", "0.3")])).unwrap();
        assert!((config.scrfd().nms_threshold - 0.3).abs() < 1e-6);
        assert!((config.yolo().confidence_threshold - 0.25).abs() < 1e-6);
        assert!(config.model_paths().scrfd().ends_with("det_10g.onnx"));
    }
}
