//! Face-mesh geometry: 468-point landmark sets, geometric embeddings and
//! landmark confidence.
//!
//! Indices follow the MediaPipe face-mesh topology. Embeddings compared
//! across deployments depend on these exact tables and their order.

use crate::error::MeshError;
use crate::types::{dot, norm, Landmark};
use serde::Serialize;

pub const MESH_POINT_COUNT: usize = 468;
pub const EMBEDDING_DIM: usize = 128;
pub const MESH_EMBEDDING_VERSION: &str = "face_mesh_geometry";

const EPS: f64 = 1e-6;
/// Each key point is paired with this many following key points.
const DISTANCE_BAND: usize = 4;

pub const LEFT_EYE_CORNER: usize = 33;
pub const RIGHT_EYE_CORNER: usize = 263;
pub const NOSE_TIP: usize = 1;
pub const MOUTH_CENTER: usize = 13;
pub const FACE_LEFT_EDGE: usize = 234;
pub const FACE_RIGHT_EDGE: usize = 454;
pub const FOREHEAD_TOP: usize = 10;
pub const CHIN_BOTTOM: usize = 152;

/// Key points sampled for banded pairwise distances, in feature order.
#[rustfmt::skip]
pub const KEY_INDICES: [usize; 48] = [
    // left eye
    33, 133, 160, 159, 158, 157, 173,
    // right eye
    263, 362, 387, 386, 385, 384, 398,
    // nose
    1, 2, 98, 327,
    // mouth
    61, 291, 0, 17,
    // face contour
    10, 338, 297, 332, 284, 251, 389, 356, 454, 323, 361, 288,
    // eyebrows
    70, 63, 105, 66, 107, 336, 296, 334, 293, 300,
    // cheeks
    205, 425, 206, 426,
];

/// Exactly [`MESH_POINT_COUNT`] landmarks in mesh order.
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkSet {
    points: Vec<Landmark>,
}

impl LandmarkSet {
    pub fn new(points: Vec<Landmark>) -> Result<Self, MeshError> {
        if points.len() != MESH_POINT_COUNT {
            return Err(MeshError::MalformedLandmarks {
                expected: MESH_POINT_COUNT,
                actual: points.len(),
            });
        }
        Ok(Self { points })
    }

    /// Build from a flat `[x0, y0, z0, x1, ...]` buffer.
    pub fn from_flat(flat: &[f64]) -> Result<Self, MeshError> {
        if flat.len() != MESH_POINT_COUNT * 3 {
            return Err(MeshError::MalformedLandmarks {
                expected: MESH_POINT_COUNT,
                actual: flat.len() / 3,
            });
        }
        let points = flat
            .chunks_exact(3)
            .map(|c| Landmark::new(c[0], c[1], c[2]))
            .collect();
        Ok(Self { points })
    }

    pub fn points(&self) -> &[Landmark] {
        &self.points
    }

    pub fn get(&self, index: usize) -> &Landmark {
        &self.points[index]
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn into_points(self) -> Vec<Landmark> {
        self.points
    }
}

fn angle_between(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    let cos = dot(a, b) / (norm(a) * norm(b) + EPS);
    cos.clamp(-1.0, 1.0).acos()
}

/// Raw geometric features before normalization.
///
/// Order: banded key-point distances, two triangle angles, then face width,
/// face height, eye distance and width/height ratio.
pub fn geometric_features(landmarks: &LandmarkSet) -> Vec<f64> {
    let key: Vec<&Landmark> = KEY_INDICES.iter().map(|&i| landmarks.get(i)).collect();

    let mut features = Vec::with_capacity(KEY_INDICES.len() * DISTANCE_BAND + 6);

    for i in 0..key.len() {
        let end = (i + 1 + DISTANCE_BAND).min(key.len());
        for j in (i + 1)..end {
            features.push(key[i].distance(key[j]));
        }
    }

    let left_eye = landmarks.get(LEFT_EYE_CORNER);
    let right_eye = landmarks.get(RIGHT_EYE_CORNER);
    let nose_tip = landmarks.get(NOSE_TIP);
    let mouth_center = landmarks.get(MOUTH_CENTER);

    let eye_axis = right_eye.sub(left_eye);
    let eye_to_nose = nose_tip.sub(left_eye);
    let nose_to_mouth = mouth_center.sub(nose_tip);

    features.push(angle_between(&eye_axis, &eye_to_nose));
    features.push(angle_between(&eye_to_nose, &nose_to_mouth));

    let face_width = landmarks.get(FACE_LEFT_EDGE).distance(landmarks.get(FACE_RIGHT_EDGE));
    let face_height = landmarks.get(FOREHEAD_TOP).distance(landmarks.get(CHIN_BOTTOM));
    let eye_distance = left_eye.distance(right_eye);

    features.extend([
        face_width,
        face_height,
        eye_distance,
        face_width / (face_height + EPS),
    ]);

    features
}

/// Per-sample z-score: subtract own mean, divide by own population std (+ε).
fn standardize(features: &mut [f64]) {
    if features.is_empty() {
        return;
    }
    let n = features.len() as f64;
    let mean = features.iter().sum::<f64>() / n;
    let std = (features.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
    for v in features.iter_mut() {
        *v = (*v - mean) / (std + EPS);
    }
}

/// Geometric embedding of a landmark set, kept at full `f64` precision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeshEmbedding {
    pub values: Vec<f64>,
    pub model_version: &'static str,
}

impl MeshEmbedding {
    /// Cosine similarity in [-1, 1].
    pub fn similarity(&self, other: &MeshEmbedding) -> f64 {
        let mut dot = 0.0;
        let mut norm_a = 0.0;
        let mut norm_b = 0.0;
        for (x, y) in self.values.iter().zip(other.values.iter()) {
            dot += x * y;
            norm_a += x * x;
            norm_b += y * y;
        }
        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom == 0.0 {
            0.0
        } else {
            dot / denom
        }
    }
}

/// Synthesize a fixed-length geometric embedding from a landmark set.
///
/// Deterministic: identical input yields a bit-identical vector.
pub fn embed(landmarks: &LandmarkSet) -> MeshEmbedding {
    let mut features = geometric_features(landmarks);
    standardize(&mut features);
    features.resize(EMBEDDING_DIM, 0.0);

    MeshEmbedding {
        values: features,
        model_version: MESH_EMBEDDING_VERSION,
    }
}

fn size_score(ratio: f64) -> f64 {
    if (0.3..=0.7).contains(&ratio) {
        0.4
    } else if (0.2..0.3).contains(&ratio) || (ratio > 0.7 && ratio <= 0.8) {
        0.3
    } else if (0.15..0.2).contains(&ratio) || (ratio > 0.8 && ratio <= 0.9) {
        0.2
    } else {
        0.1
    }
}

/// Heuristic confidence in [0, 1] for how usable a landmark set is.
///
/// Sums a face-size term (≤0.4, best at 30–70% of image width), a centering
/// term (≤0.3) and a depth-spread term (≤0.3).
pub fn landmark_confidence(points: &[Landmark], width: u32, height: u32) -> f64 {
    if points.is_empty() || width == 0 || height == 0 {
        return 0.0;
    }
    let (w, h) = (width as f64, height as f64);

    let (mut min_x, mut max_x) = (f64::INFINITY, f64::NEG_INFINITY);
    let (mut min_y, mut max_y) = (f64::INFINITY, f64::NEG_INFINITY);
    for p in points {
        min_x = min_x.min(p.x);
        max_x = max_x.max(p.x);
        min_y = min_y.min(p.y);
        max_y = max_y.max(p.y);
    }

    let face_width = max_x - min_x;
    let center_x = (max_x + min_x) / 2.0;
    let center_y = (max_y + min_y) / 2.0;

    let size = size_score(face_width / w);

    let offset_x = (center_x - w / 2.0).abs() / (w / 2.0);
    let offset_y = (center_y - h / 2.0).abs() / (h / 2.0);
    let centering = (0.3 - (offset_x + offset_y) * 0.15).max(0.0);

    let n = points.len() as f64;
    let z_mean = points.iter().map(|p| p.z).sum::<f64>() / n;
    let z_std = (points.iter().map(|p| (p.z - z_mean).powi(2)).sum::<f64>() / n).sqrt();
    let distribution = (z_std / (face_width + EPS) * 0.5).min(0.3);

    (size + centering + distribution).clamp(0.0, 1.0)
}
