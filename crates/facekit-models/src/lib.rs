//! facekit-models: ONNX Runtime backends for the facekit-core collaborator traits.
//!
//! SCRFD for face detection, ArcFace for identity embeddings, the InsightFace
//! gender/age head, MediaPipe face-mesh for dense landmarks and YOLOv8 for
//! person detection. All run on CPU.

pub mod alignment;
pub mod arcface;
pub mod facemesh;
pub mod genderage;
pub mod scrfd;
pub mod yolo;

use ort::session::Session;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use arcface::ArcFaceRecognizer;
pub use facemesh::{MeshModel, MeshPipeline};
pub use genderage::GenderAgeModel;
pub use scrfd::{ScrfdConfig, ScrfdDetector};
pub use yolo::{YoloConfig, YoloPersonDetector};

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face has no keypoints; the detector must return keypoints for alignment")]
    NoKeypoints,
    #[error(transparent)]
    Mesh(#[from] facekit_core::MeshError),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Model file locations under one directory.
#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub dir: PathBuf,
}

impl ModelPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn scrfd(&self) -> PathBuf {
        self.dir.join("det_10g.onnx")
    }

    pub fn arcface(&self) -> PathBuf {
        self.dir.join("w600k_r50.onnx")
    }

    pub fn genderage(&self) -> PathBuf {
        self.dir.join("genderage.onnx")
    }

    pub fn face_mesh(&self) -> PathBuf {
        self.dir.join("face_landmark.onnx")
    }

    pub fn yolo(&self) -> PathBuf {
        self.dir.join("yolov8n.onnx")
    }
}

/// `$XDG_DATA_HOME/facekit/models`, falling back to `~/.local/share/facekit/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facekit")
        .join("models")
}

/// Open an ONNX session, failing early with [`ModelError::ModelNotFound`].
pub(crate) fn load_session(path: &Path, intra_threads: usize, label: &str) -> Result<Session, ModelError> {
    if !path.exists() {
        return Err(ModelError::ModelNotFound(path.display().to_string()));
    }

    let session = Session::builder()?
        .with_intra_threads(intra_threads)?
        .commit_from_file(path)?;

    tracing::info!(
        path = %path.display(),
        inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
        outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
        "loaded {label} model"
    );

    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_paths() {
        let paths = ModelPaths::new("/opt/models");
        assert_eq!(paths.scrfd(), PathBuf::from("/opt/models/det_10g.onnx"));
        assert_eq!(paths.arcface(), PathBuf::from("/opt/models/w600k_r50.onnx"));
        assert_eq!(paths.genderage(), PathBuf::from("/opt/models/genderage.onnx"));
        assert_eq!(paths.face_mesh(), PathBuf::from("/opt/models/face_landmark.onnx"));
        assert_eq!(paths.yolo(), PathBuf::from("/opt/models/yolov8n.onnx"));
    }

    #[test]
    fn test_default_model_dir_suffix() {
        assert!(default_model_dir().ends_with("facekit/models"));
    }

    #[test]
    fn test_load_session_missing_file() {
        let err = load_session(Path::new("/nonexistent/det.onnx"), 1, "test").unwrap_err();
        assert!(matches!(err, ModelError::ModelNotFound(_)));
    }
}
