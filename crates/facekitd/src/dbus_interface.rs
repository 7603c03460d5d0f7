use crate::engine::{error_body, EngineHandle, Operation};
use facekit_core::pipeline::compare_embeddings;
use serde_json::{json, Value};
use zbus::interface;

pub const BUS_NAME: &str = "io.facekit.Analytics1";
pub const OBJECT_PATH: &str = "/io/facekit/Analytics1";

/// D-Bus interface for the facekit analytics daemon.
///
/// Every method returns a JSON document. Request-level failures come back as
/// `{"error": "..."}`; only a dead engine surfaces as a D-Bus error.
pub struct AnalyticsService {
    engine: EngineHandle,
    attributes_loaded: bool,
}

impl AnalyticsService {
    pub fn new(engine: EngineHandle, attributes_loaded: bool) -> Self {
        Self {
            engine,
            attributes_loaded,
        }
    }

    async fn dispatch(&self, operation: Operation, image: &str) -> zbus::fdo::Result<String> {
        tracing::info!(operation = operation.as_str(), bytes = image.len(), "request received");
        if image.trim().is_empty() {
            return Ok(error_body("No image provided").to_string());
        }
        let body = self
            .engine
            .run(operation, image.to_string())
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        Ok(body.to_string())
    }
}

#[interface(name = "io.facekit.Analytics1")]
impl AnalyticsService {
    /// Sharpness, lighting and angle scores for an enrollment photo.
    async fn assess_quality(&self, image: &str) -> zbus::fdo::Result<String> {
        self.dispatch(Operation::AssessQuality, image).await
    }

    async fn detect_faces(&self, image: &str) -> zbus::fdo::Result<String> {
        self.dispatch(Operation::DetectFaces, image).await
    }

    /// 468-point mesh plus geometric embedding per face.
    async fn extract_landmarks(&self, image: &str) -> zbus::fdo::Result<String> {
        self.dispatch(Operation::ExtractLandmarks, image).await
    }

    async fn analyze_face(&self, image: &str) -> zbus::fdo::Result<String> {
        self.dispatch(Operation::AnalyzeFace, image).await
    }

    async fn count_people(&self, image: &str) -> zbus::fdo::Result<String> {
        self.dispatch(Operation::CountPeople, image).await
    }

    async fn extract_embedding(&self, image: &str) -> zbus::fdo::Result<String> {
        self.dispatch(Operation::ExtractEmbedding, image).await
    }

    /// Cosine similarity of two embeddings given as JSON arrays.
    async fn compare_embeddings(&self, a: &str, b: &str) -> zbus::fdo::Result<String> {
        Ok(compare_json(a, b).to_string())
    }

    async fn health(&self) -> zbus::fdo::Result<String> {
        Ok(json!({
            "status": "healthy",
            "service": "facekit",
            "version": env!("CARGO_PKG_VERSION"),
            "attributes": self.attributes_loaded,
        })
        .to_string())
    }
}

fn compare_json(a: &str, b: &str) -> Value {
    let parse = |text: &str| serde_json::from_str::<Vec<f32>>(text);
    match (parse(a), parse(b)) {
        (Ok(a), Ok(b)) => json!({ "similarity": compare_embeddings(&a, &b) }),
        (Err(e), _) | (_, Err(e)) => error_body(format!("invalid embedding: {e}")),
    }
}
