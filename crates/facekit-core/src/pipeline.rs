//! Request-level operations: decode an image, run the collaborators, shape
//! the JSON-ready result.

use crate::decode::{DecodedImage, ImageSource};
use crate::error::PipelineError;
use crate::inference::{
    FaceAttributes, FaceDetector, FaceEmbedder, FaceMesh, FaceRegionDetector, PersonDetector,
};
use crate::mesh::{embed, landmark_confidence};
use crate::quality::{assess, QualityReport};
use crate::types::{cosine_similarity, Embedding, Landmark, Region};
use crate::types::{KP_LEFT_EYE, KP_LEFT_MOUTH, KP_RIGHT_EYE, KP_RIGHT_MOUTH};
use serde::Serialize;

/// Mouth width over eye distance above which a face reads as smiling.
const SMILE_RATIO: f32 = 0.7;

fn decode(source: ImageSource<'_>) -> Result<DecodedImage, PipelineError> {
    Ok(source.decode()?)
}

/// Score an image for enrollment. Never fails: errors become an error-only report.
pub fn assess_image_quality<D: FaceRegionDetector>(
    source: ImageSource<'_>,
    detector: &mut D,
) -> QualityReport {
    let image = match source.decode() {
        Ok(image) => image,
        Err(e) => {
            tracing::debug!(error = %e, "quality request rejected");
            return QualityReport::failed(e);
        }
    };
    match assess(&image, detector) {
        Ok(result) => QualityReport::Assessed(result),
        Err(e) => QualityReport::failed(e),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MeshFace {
    pub landmarks: Vec<Landmark>,
    pub embedding: Vec<f64>,
    pub landmark_count: usize,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MeshReport {
    pub faces: Vec<MeshFace>,
    pub count: usize,
}

/// Dense landmarks, geometric embedding and confidence for every face.
pub fn extract_landmarks_and_embedding<M: FaceMesh>(
    source: ImageSource<'_>,
    mesh: &mut M,
) -> Result<MeshReport, PipelineError> {
    let image = decode(source)?;
    let sets = mesh.landmarks(&image.rgb).map_err(PipelineError::collaborator)?;
    if sets.is_empty() {
        return Err(PipelineError::NoFaceDetected);
    }

    let faces: Vec<MeshFace> = sets
        .into_iter()
        .map(|set| {
            let embedding = embed(&set);
            let confidence = landmark_confidence(set.points(), image.width(), image.height());
            let landmarks = set.into_points();
            MeshFace {
                landmark_count: landmarks.len(),
                landmarks,
                embedding: embedding.values,
                confidence,
            }
        })
        .collect();

    tracing::debug!(faces = faces.len(), "mesh extracted");
    Ok(MeshReport { count: faces.len(), faces })
}

/// Integer pixel box, truncated toward zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PixelBox {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

impl From<&Region> for PixelBox {
    fn from(r: &Region) -> Self {
        Self {
            x: r.x as i64,
            y: r.y as i64,
            width: r.width as i64,
            height: r.height as i64,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectedFace {
    pub bbox: PixelBox,
    pub confidence: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectionReport {
    pub faces: Vec<DetectedFace>,
    pub count: usize,
}

pub fn detect_faces<D: FaceDetector>(
    source: ImageSource<'_>,
    detector: &mut D,
) -> Result<DetectionReport, PipelineError> {
    let image = decode(source)?;
    let faces: Vec<DetectedFace> = detector
        .detect(&image.rgb)
        .map_err(PipelineError::collaborator)?
        .iter()
        .map(|r| DetectedFace {
            bbox: PixelBox::from(r),
            confidence: r.confidence,
        })
        .collect();
    Ok(DetectionReport { count: faces.len(), faces })
}

#[derive(Debug, Clone, Serialize)]
pub struct FaceAnalysis {
    /// `[x1, y1, x2, y2]`
    pub bbox: [f32; 4],
    pub kps: Option<[[f32; 2]; 5]>,
    pub det_score: f32,
    pub embedding: Vec<f32>,
    pub age: Option<u32>,
    pub gender: Option<&'static str>,
    pub expression: &'static str,
    pub race: &'static str,
}

/// Smile heuristic on the five keypoints: `"happy"` or `"neutral"`.
pub fn estimate_expression(keypoints: Option<&[(f32, f32); 5]>) -> &'static str {
    let Some(kps) = keypoints else {
        return "neutral";
    };
    let dist = |a: (f32, f32), b: (f32, f32)| ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt();

    let mouth_width = dist(kps[KP_LEFT_MOUTH], kps[KP_RIGHT_MOUTH]);
    let eye_distance = dist(kps[KP_LEFT_EYE], kps[KP_RIGHT_EYE]);
    if eye_distance > 0.0 && mouth_width / eye_distance > SMILE_RATIO {
        "happy"
    } else {
        "neutral"
    }
}

/// Detection, identity embedding and demographics for every face.
///
/// Attributes are reported as `None` when no attribute model is supplied.
pub fn analyze_faces<D, E, A>(
    source: ImageSource<'_>,
    detector: &mut D,
    embedder: &mut E,
    mut attributes: Option<&mut A>,
) -> Result<Vec<FaceAnalysis>, PipelineError>
where
    D: FaceDetector,
    E: FaceEmbedder,
    A: FaceAttributes,
{
    let image = decode(source)?;
    let faces = detector.detect(&image.rgb).map_err(PipelineError::collaborator)?;

    let mut results = Vec::with_capacity(faces.len());
    for face in &faces {
        let embedding = embedder
            .embed(&image.rgb, face)
            .map_err(PipelineError::collaborator)?;
        let estimate = match attributes.as_deref_mut() {
            Some(model) => Some(
                model
                    .estimate(&image.rgb, face)
                    .map_err(PipelineError::collaborator)?,
            ),
            None => None,
        };

        results.push(FaceAnalysis {
            bbox: face.corners(),
            kps: face.keypoints.map(|kps| kps.map(|(x, y)| [x, y])),
            det_score: face.confidence,
            embedding: embedding.values,
            age: estimate.map(|a| a.age),
            gender: estimate.map(|a| a.gender.as_str()),
            expression: estimate_expression(face.keypoints.as_ref()),
            race: "unknown",
        });
    }

    tracing::debug!(faces = results.len(), "faces analyzed");
    Ok(results)
}

/// Identity embedding of the most confident face.
pub fn extract_embedding<D: FaceDetector, E: FaceEmbedder>(
    source: ImageSource<'_>,
    detector: &mut D,
    embedder: &mut E,
) -> Result<Embedding, PipelineError> {
    let image = decode(source)?;
    let faces = detector.detect(&image.rgb).map_err(PipelineError::collaborator)?;
    let face = faces.first().ok_or(PipelineError::NoFaceDetected)?;
    embedder
        .embed(&image.rgb, face)
        .map_err(PipelineError::collaborator)
}

#[derive(Debug, Clone, Serialize)]
pub struct PersonDetection {
    /// `[x1, y1, x2, y2]`
    pub bbox: [f32; 4],
    pub confidence: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeopleCount {
    pub count: usize,
    pub detections: Vec<PersonDetection>,
}

pub fn count_people<P: PersonDetector>(
    source: ImageSource<'_>,
    detector: &mut P,
) -> Result<PeopleCount, PipelineError> {
    let image = decode(source)?;
    let detections: Vec<PersonDetection> = detector
        .detect_people(&image.rgb)
        .map_err(PipelineError::collaborator)?
        .iter()
        .map(|r| PersonDetection {
            bbox: r.corners(),
            confidence: r.confidence,
        })
        .collect();
    Ok(PeopleCount { count: detections.len(), detections })
}

/// Cosine similarity of two raw embedding vectors.
pub fn compare_embeddings(a: &[f32], b: &[f32]) -> f32 {
    cosine_similarity(a, b)
}
