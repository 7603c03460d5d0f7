use crate::config::Config;
use facekit_core::pipeline;
use facekit_core::{ImageSource, PipelineError};
use facekit_models::{
    ArcFaceRecognizer, GenderAgeModel, MeshModel, MeshPipeline, ModelError, ScrfdDetector,
    YoloPersonDetector,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("model error: {0}")]
    Model(#[from] ModelError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Image operations served by the engine thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    AssessQuality,
    DetectFaces,
    ExtractLandmarks,
    AnalyzeFace,
    CountPeople,
    ExtractEmbedding,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::AssessQuality => "assess_quality",
            Operation::DetectFaces => "detect_faces",
            Operation::ExtractLandmarks => "extract_landmarks",
            Operation::AnalyzeFace => "analyze_face",
            Operation::CountPeople => "count_people",
            Operation::ExtractEmbedding => "extract_embedding",
        }
    }
}

/// Message sent from D-Bus handlers to the engine thread.
struct EngineRequest {
    operation: Operation,
    image: String,
    reply: oneshot::Sender<Value>,
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Run `operation` on a base64 image and return its JSON body.
    pub async fn run(&self, operation: Operation, image: String) -> Result<Value, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest {
                operation,
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Every model the daemon serves with. ORT sessions need `&mut`, so this
/// lives on one thread.
pub struct Models {
    /// Face mesh pipeline; its SCRFD detector is shared by every face operation.
    pub mesh: MeshPipeline,
    pub recognizer: ArcFaceRecognizer,
    pub attributes: Option<GenderAgeModel>,
    pub people: YoloPersonDetector,
}

impl Models {
    /// Load every model, failing fast on required ones. A missing gender/age
    /// model only disables attributes.
    pub fn load(config: &Config) -> Result<Self, ModelError> {
        let paths = config.model_paths();
        let threads = config.intra_threads;

        let detector = ScrfdDetector::load(&paths.scrfd(), config.scrfd())?;
        let mesh_model = MeshModel::load(&paths.face_mesh(), threads)?;
        let recognizer = ArcFaceRecognizer::load(&paths.arcface(), threads)?;
        let people = YoloPersonDetector::load(&paths.yolo(), config.yolo())?;

        let attributes = match GenderAgeModel::load(&paths.genderage(), threads) {
            Ok(model) => Some(model),
            Err(ModelError::ModelNotFound(path)) => {
                tracing::warn!(path, "gender/age model not found; attributes disabled");
                None
            }
            Err(e) => return Err(e),
        };

        Ok(Self {
            mesh: MeshPipeline::new(detector, mesh_model, config.max_faces),
            recognizer,
            attributes,
            people,
        })
    }

    pub fn attributes_loaded(&self) -> bool {
        self.attributes.is_some()
    }

    fn handle(&mut self, operation: Operation, image: &str) -> Value {
        let source = ImageSource::Base64(image);
        match operation {
            Operation::AssessQuality => {
                to_json(&pipeline::assess_image_quality(source, self.mesh.detector_mut()))
            }
            Operation::DetectFaces => render(pipeline::detect_faces(source, self.mesh.detector_mut())),
            Operation::ExtractLandmarks => {
                render(pipeline::extract_landmarks_and_embedding(source, &mut self.mesh))
            }
            Operation::AnalyzeFace => {
                let faces = pipeline::analyze_faces(
                    source,
                    self.mesh.detector_mut(),
                    &mut self.recognizer,
                    self.attributes.as_mut(),
                );
                render(faces.map(|faces| json!({ "success": true, "faces": faces })))
            }
            Operation::CountPeople => {
                let counted = pipeline::count_people(source, &mut self.people);
                render(counted.map(|c| {
                    json!({ "success": true, "count": c.count, "detections": c.detections })
                }))
            }
            Operation::ExtractEmbedding => {
                let embedding = pipeline::extract_embedding(
                    source,
                    self.mesh.detector_mut(),
                    &mut self.recognizer,
                );
                render(embedding.map(|e| json!({ "success": true, "embedding": e.values })))
            }
        }
    }
}

pub fn error_body(message: impl std::fmt::Display) -> Value {
    json!({ "error": message.to_string() })
}

fn to_json<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(error_body)
}

fn render<T: Serialize>(result: Result<T, PipelineError>) -> Value {
    match result {
        Ok(value) => to_json(&value),
        Err(e) => error_body(e),
    }
}

/// Spawn the engine on a dedicated OS thread that owns `models`.
pub fn spawn_engine(mut models: Models) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(8);

    std::thread::Builder::new()
        .name("facekit-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                let started = Instant::now();
                let body = models.handle(req.operation, &req.image);
                tracing::debug!(
                    operation = req.operation.as_str(),
                    failed = body.get("error").is_some(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "request served"
                );
                let _ = req.reply.send(body);
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}
