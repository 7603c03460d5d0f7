use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("no image data provided")]
    EmptyInput,
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("failed to decode image: {0}")]
    Image(#[from] image::ImageError),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MeshError {
    #[error("malformed landmark set: expected {expected} points, got {actual}")]
    MalformedLandmarks { expected: usize, actual: usize },
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("No face detected")]
    NoFaceDetected,
    /// A collaborator (detector, mesh, recognizer) failed; carries its message.
    #[error("{0}")]
    Collaborator(String),
}

impl PipelineError {
    pub fn collaborator(err: impl std::fmt::Display) -> Self {
        PipelineError::Collaborator(err.to_string())
    }
}
