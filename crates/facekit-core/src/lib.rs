//! facekit-core: Face image quality scoring and face-mesh geometry.
//!
//! Pure algorithms over decoded pixel buffers. Pretrained models sit behind
//! the traits in [`inference`]; ONNX-backed implementations live in
//! `facekit-models`.

pub mod decode;
pub mod error;
pub mod inference;
pub mod mesh;
pub mod pipeline;
pub mod quality;
pub mod types;

pub use decode::{DecodedImage, ImageSource};
pub use error::{DecodeError, MeshError, PipelineError};
pub use mesh::{embed, landmark_confidence, LandmarkSet, MeshEmbedding};
pub use quality::{assess, AssessmentResult, QualityReport};
pub use types::{Embedding, Landmark, QualityLevel, Region};
