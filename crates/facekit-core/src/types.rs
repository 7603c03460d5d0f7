use serde::{Deserialize, Serialize};

/// Index of each point in a five-point keypoint array.
pub const KP_LEFT_EYE: usize = 0;
pub const KP_RIGHT_EYE: usize = 1;
pub const KP_NOSE: usize = 2;
pub const KP_LEFT_MOUTH: usize = 3;
pub const KP_RIGHT_MOUTH: usize = 4;

/// Axis-aligned region returned by a detector, with optional facial keypoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point keypoints: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub keypoints: Option<[(f32, f32); 5]>,
}

impl Region {
    pub fn new(x: f32, y: f32, width: f32, height: f32, confidence: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            confidence,
            keypoints: None,
        }
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn x2(&self) -> f32 {
        self.x + self.width
    }

    pub fn y2(&self) -> f32 {
        self.y + self.height
    }

    pub fn contains(&self, px: f32, py: f32) -> bool {
        px >= self.x && px <= self.x2() && py >= self.y && py <= self.y2()
    }

    /// Corner form `[x1, y1, x2, y2]`.
    pub fn corners(&self) -> [f32; 4] {
        [self.x, self.y, self.x2(), self.y2()]
    }

    /// Intersection-over-Union with another region.
    pub fn iou(&self, other: &Region) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = self.x2().min(other.x2());
        let y2 = self.y2().min(other.y2());

        let inter_area = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union_area = self.area() + other.area() - inter_area;

        if union_area > 0.0 {
            inter_area / union_area
        } else {
            0.0
        }
    }
}

/// Non-Maximum Suppression: keep the most confident of each overlapping group.
///
/// Output is sorted by confidence, highest first.
pub fn nms(mut regions: Vec<Region>, iou_threshold: f32) -> Vec<Region> {
    regions.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<Region> = Vec::new();
    let mut suppressed = vec![false; regions.len()];

    for i in 0..regions.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(regions[i].clone());

        for j in (i + 1)..regions.len() {
            if !suppressed[j] && regions[i].iou(&regions[j]) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

/// One face-mesh point in image-pixel units. `z` is a relative depth proxy.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Landmark {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn sub(&self, other: &Landmark) -> [f64; 3] {
        [self.x - other.x, self.y - other.y, self.z - other.z]
    }

    pub fn distance(&self, other: &Landmark) -> f64 {
        norm(&self.sub(other))
    }
}

pub(crate) fn norm(v: &[f64; 3]) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

pub(crate) fn dot(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// Identity embedding vector (512-dim for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Producer of this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar. Zero vectors compare as 0.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        cosine_similarity(&self.values, &other.values)
    }

    /// Compute Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// Cosine similarity over the common prefix of two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom > 0.0 { dot / denom } else { 0.0 }
}

/// Three-level verdict shared by every quality metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityLevel {
    Poor,
    Acceptable,
    Good,
}

impl QualityLevel {
    /// `<50` poor, `<75` acceptable, otherwise good.
    pub fn from_score(score: f64) -> Self {
        if score < 50.0 {
            QualityLevel::Poor
        } else if score < 75.0 {
            QualityLevel::Acceptable
        } else {
            QualityLevel::Good
        }
    }
}

/// Round half away from zero to two decimals.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
