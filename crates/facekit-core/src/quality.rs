//! Enrollment image quality: sharpness, lighting and face angle.
//!
//! Each sub-score lands in [0, 100] with a poor/acceptable/good verdict.
//! The composite is a fixed weighted sum of the rounded sub-scores.

use crate::decode::DecodedImage;
use crate::inference::FaceRegionDetector;
use crate::types::{round2, QualityLevel, Region};
use image::GrayImage;
use serde::Serialize;

// Laplacian variance break points.
const SHARPNESS_BLURRY_BELOW: f64 = 100.0;
const SHARPNESS_SHARP_FROM: f64 = 500.0;

const IDEAL_BRIGHTNESS: f64 = 125.0;
const IDEAL_CONTRAST: f64 = 60.0;
const BRIGHTNESS_WEIGHT: f64 = 0.6;
const CONTRAST_WEIGHT: f64 = 0.4;

const SHARPNESS_WEIGHT: f64 = 0.35;
const LIGHTING_WEIGHT: f64 = 0.35;
const ANGLE_WEIGHT: f64 = 0.30;

pub const RECOMMEND_POOR: &str = "Image quality is too low. Please ensure good lighting, hold camera steady, and face the camera directly.";
pub const RECOMMEND_ACCEPTABLE: &str = "Image quality is acceptable but could be improved. Consider better lighting or a more frontal angle.";
pub const RECOMMEND_GOOD: &str = "Image quality is good for enrollment.";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SharpnessScore {
    pub score: f64,
    pub quality: QualityLevel,
    /// Laplacian variance.
    pub raw_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LightingScore {
    pub score: f64,
    pub quality: QualityLevel,
    /// Mean grayscale intensity.
    pub brightness: f64,
    /// Standard deviation of grayscale intensity.
    pub contrast: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AngleEstimate {
    NoFaceDetected,
    Frontal,
    SlightAngle,
    Profile,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AngleScore {
    pub score: f64,
    pub quality: QualityLevel,
    pub angle_estimate: AngleEstimate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eyes_detected: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssessmentResult {
    pub overall_score: f64,
    pub overall_quality: QualityLevel,
    pub recommendation: &'static str,
    pub sharpness: SharpnessScore,
    pub lighting: LightingScore,
    pub angle: AngleScore,
}

/// Outcome of a quality request: either the full assessment or an error only.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QualityReport {
    Assessed(AssessmentResult),
    Failed { error: String },
}

impl QualityReport {
    pub fn failed(err: impl std::fmt::Display) -> Self {
        QualityReport::Failed { error: err.to_string() }
    }
}

/// Variance of the 3×3 Laplacian `[0 1 0; 1 -4 1; 0 1 0]` over the image.
///
/// Borders reflect without repeating the edge pixel (`dcb|abcd|cba`).
pub fn laplacian_variance(gray: &GrayImage) -> f64 {
    let w = gray.width() as usize;
    let h = gray.height() as usize;
    if w == 0 || h == 0 {
        return 0.0;
    }
    let data = gray.as_raw();
    let at = |x: isize, y: isize| -> f64 {
        data[reflect101(y, h) * w + reflect101(x, w)] as f64
    };

    let mut responses = Vec::with_capacity(w * h);
    for y in 0..h as isize {
        for x in 0..w as isize {
            let lap = at(x - 1, y) + at(x + 1, y) + at(x, y - 1) + at(x, y + 1) - 4.0 * at(x, y);
            responses.push(lap);
        }
    }

    let (_, variance) = mean_and_variance(responses.iter().copied(), responses.len());
    variance
}

fn reflect101(i: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let last = n as isize - 1;
    let mut i = i;
    if i < 0 {
        i = -i;
    }
    if i > last {
        i = 2 * last - i;
    }
    i.clamp(0, last) as usize
}

/// Population mean and variance, two-pass.
fn mean_and_variance(values: impl Iterator<Item = f64> + Clone, n: usize) -> (f64, f64) {
    if n == 0 {
        return (0.0, 0.0);
    }
    let mean = values.clone().sum::<f64>() / n as f64;
    let variance = values.map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
    (mean, variance)
}

/// Map Laplacian variance onto the three sharpness bands.
pub fn sharpness_from_variance(variance: f64) -> SharpnessScore {
    let (score, quality) = if variance < SHARPNESS_BLURRY_BELOW {
        (variance / SHARPNESS_BLURRY_BELOW * 50.0, QualityLevel::Poor)
    } else if variance < SHARPNESS_SHARP_FROM {
        (
            50.0 + (variance - SHARPNESS_BLURRY_BELOW) / 400.0 * 30.0,
            QualityLevel::Acceptable,
        )
    } else {
        (
            (80.0 + (variance - SHARPNESS_SHARP_FROM) / 500.0 * 20.0).min(100.0),
            QualityLevel::Good,
        )
    };

    SharpnessScore {
        score: round2(score),
        quality,
        raw_value: round2(variance),
    }
}

pub fn assess_sharpness(gray: &GrayImage) -> SharpnessScore {
    sharpness_from_variance(laplacian_variance(gray))
}

/// Score brightness (ideal 125) and contrast (ideal std 60).
pub fn lighting_from_stats(mean: f64, std_dev: f64) -> LightingScore {
    let brightness_score =
        (100.0 - (mean - IDEAL_BRIGHTNESS).abs() / IDEAL_BRIGHTNESS * 100.0).clamp(0.0, 100.0);
    let contrast_score =
        (100.0 - (std_dev - IDEAL_CONTRAST).abs() / IDEAL_CONTRAST * 100.0).clamp(0.0, 100.0);
    let score = brightness_score * BRIGHTNESS_WEIGHT + contrast_score * CONTRAST_WEIGHT;

    LightingScore {
        score: round2(score),
        quality: QualityLevel::from_score(score),
        brightness: round2(mean),
        contrast: round2(std_dev),
    }
}

pub fn assess_lighting(gray: &GrayImage) -> LightingScore {
    let pixels = gray.as_raw();
    let (mean, variance) = mean_and_variance(pixels.iter().map(|&p| p as f64), pixels.len());
    lighting_from_stats(mean, variance.sqrt())
}

/// Angle verdict from the number of eyes found in the subject's face,
/// or `None` when no face was found.
pub fn angle_from_eyes(eyes: Option<usize>) -> AngleScore {
    let (score, quality, angle_estimate) = match eyes {
        None => (0.0, QualityLevel::Poor, AngleEstimate::NoFaceDetected),
        Some(n) if n >= 2 => (100.0, QualityLevel::Good, AngleEstimate::Frontal),
        Some(1) => (60.0, QualityLevel::Acceptable, AngleEstimate::SlightAngle),
        Some(_) => (30.0, QualityLevel::Poor, AngleEstimate::Profile),
    };

    AngleScore {
        score,
        quality,
        angle_estimate,
        eyes_detected: eyes,
    }
}

/// Locate the largest face and count the eyes inside it.
pub fn assess_angle<D: FaceRegionDetector>(
    gray: &GrayImage,
    detector: &mut D,
) -> Result<AngleScore, D::Error> {
    let faces = detector.detect_faces(gray)?;

    // Largest box wins; ties keep the first candidate.
    let subject = faces.iter().fold(None, |best: Option<&Region>, face| match best {
        Some(b) if b.area() >= face.area() => Some(b),
        _ => Some(face),
    });

    let Some(face) = subject else {
        return Ok(angle_from_eyes(None));
    };

    let eyes = detector.detect_eyes(gray, face)?;
    tracing::debug!(
        faces = faces.len(),
        eyes = eyes.len(),
        face_w = face.width,
        face_h = face.height,
        "angle: subject face selected"
    );
    Ok(angle_from_eyes(Some(eyes.len())))
}

/// Weighted composite of the three sub-scores.
pub fn composite(
    sharpness: SharpnessScore,
    lighting: LightingScore,
    angle: AngleScore,
) -> AssessmentResult {
    let overall = sharpness.score * SHARPNESS_WEIGHT
        + lighting.score * LIGHTING_WEIGHT
        + angle.score * ANGLE_WEIGHT;

    let overall_quality = QualityLevel::from_score(overall);
    let recommendation = match overall_quality {
        QualityLevel::Poor => RECOMMEND_POOR,
        QualityLevel::Acceptable => RECOMMEND_ACCEPTABLE,
        QualityLevel::Good => RECOMMEND_GOOD,
    };

    AssessmentResult {
        overall_score: round2(overall),
        overall_quality,
        recommendation,
        sharpness,
        lighting,
        angle,
    }
}

/// Full assessment of a decoded image.
pub fn assess<D: FaceRegionDetector>(
    image: &DecodedImage,
    detector: &mut D,
) -> Result<AssessmentResult, D::Error> {
    let sharpness = assess_sharpness(&image.gray);
    let lighting = assess_lighting(&image.gray);
    let angle = assess_angle(&image.gray, detector)?;

    tracing::debug!(
        sharpness = sharpness.score,
        lighting = lighting.score,
        angle = angle.score,
        "quality sub-scores"
    );

    Ok(composite(sharpness, lighting, angle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// Region detector stub returning canned boxes; records the face it was asked about.
    struct StubRegions {
        faces: Vec<Region>,
        eyes: usize,
        asked: Option<Region>,
        fail: bool,
    }

    impl StubRegions {
        fn new(faces: Vec<Region>, eyes: usize) -> Self {
            Self { faces, eyes, asked: None, fail: false }
        }
    }

    impl FaceRegionDetector for StubRegions {
        type Error = String;

        fn detect_faces(&mut self, _gray: &GrayImage) -> Result<Vec<Region>, String> {
            if self.fail {
                return Err("cascade exploded".into());
            }
            Ok(self.faces.clone())
        }

        fn detect_eyes(&mut self, _gray: &GrayImage, face: &Region) -> Result<Vec<Region>, String> {
            self.asked = Some(face.clone());
            Ok(vec![Region::new(0.0, 0.0, 4.0, 4.0, 1.0); self.eyes])
        }
    }

    /// Vertical stripes alternating `a`/`b`: Laplacian is ±2(b-a) everywhere.
    fn stripes(w: u32, h: u32, a: u8, b: u8) -> GrayImage {
        GrayImage::from_fn(w, h, |x, _| Luma([if x % 2 == 0 { a } else { b }]))
    }

    fn face(w: f32, h: f32) -> Region {
        Region::new(10.0, 10.0, w, h, 0.9)
    }

    #[test]
    fn test_laplacian_variance_uniform_is_zero() {
        let gray = GrayImage::from_pixel(16, 16, Luma([128]));
        assert_eq!(laplacian_variance(&gray), 0.0);
    }

    #[test]
    fn test_laplacian_variance_stripes_exact() {
        // ±10 responses, half each → variance exactly 100
        let gray = stripes(8, 4, 100, 105);
        assert_eq!(laplacian_variance(&gray), 100.0);
    }

    #[test]
    fn test_laplacian_single_pixel() {
        let gray = GrayImage::from_pixel(1, 1, Luma([200]));
        assert_eq!(laplacian_variance(&gray), 0.0);
    }

    #[test]
    fn test_reflect101() {
        assert_eq!(reflect101(-1, 5), 1);
        assert_eq!(reflect101(5, 5), 3);
        assert_eq!(reflect101(2, 5), 2);
        assert_eq!(reflect101(-1, 1), 0);
    }

    #[test]
    fn test_sharpness_band_edge_at_100() {
        let s = assess_sharpness(&stripes(8, 4, 100, 105));
        assert_eq!(s.score, 50.0);
        assert_eq!(s.quality, QualityLevel::Acceptable);
        assert_eq!(s.raw_value, 100.0);
    }

    #[test]
    fn test_sharpness_bands() {
        let blurry = sharpness_from_variance(90.0);
        assert_eq!(blurry.quality, QualityLevel::Poor);
        assert_eq!(blurry.score, 45.0);
        assert_eq!(sharpness_from_variance(99.9).quality, QualityLevel::Poor);

        let edge = sharpness_from_variance(500.0);
        assert_eq!(edge.score, 80.0);
        assert_eq!(edge.quality, QualityLevel::Good);

        let mid = sharpness_from_variance(300.0);
        assert_eq!(mid.score, 65.0);
        assert_eq!(mid.quality, QualityLevel::Acceptable);

        assert_eq!(sharpness_from_variance(1000.0).score, 100.0);
        assert_eq!(sharpness_from_variance(50_000.0).score, 100.0);
        assert_eq!(sharpness_from_variance(0.0).score, 0.0);
    }

    #[test]
    fn test_lighting_ideal() {
        // Half 65, half 185 → mean 125, std 60
        let gray = GrayImage::from_fn(10, 10, |x, _| Luma([if x < 5 { 65 } else { 185 }]));
        let l = assess_lighting(&gray);
        assert_eq!(l.score, 100.0);
        assert_eq!(l.quality, QualityLevel::Good);
        assert_eq!(l.brightness, 125.0);
        assert_eq!(l.contrast, 60.0);
    }

    #[test]
    fn test_lighting_black_frame() {
        let l = assess_lighting(&GrayImage::from_pixel(8, 8, Luma([0])));
        assert_eq!(l.score, 0.0);
        assert_eq!(l.quality, QualityLevel::Poor);
    }

    #[test]
    fn test_lighting_flat_mid_gray() {
        // Perfect brightness, zero contrast → 60
        let l = lighting_from_stats(125.0, 0.0);
        assert_eq!(l.score, 60.0);
        assert_eq!(l.quality, QualityLevel::Acceptable);
    }

    #[test]
    fn test_angle_no_face() {
        let mut det = StubRegions::new(vec![], 2);
        let a = assess_angle(&GrayImage::new(4, 4), &mut det).unwrap();
        assert_eq!(a.score, 0.0);
        assert_eq!(a.angle_estimate, AngleEstimate::NoFaceDetected);
        assert_eq!(a.quality, QualityLevel::Poor);
        assert!(det.asked.is_none());
    }

    #[test]
    fn test_angle_eye_table() {
        let cases = [
            (3, 100.0, AngleEstimate::Frontal, QualityLevel::Good),
            (2, 100.0, AngleEstimate::Frontal, QualityLevel::Good),
            (1, 60.0, AngleEstimate::SlightAngle, QualityLevel::Acceptable),
            (0, 30.0, AngleEstimate::Profile, QualityLevel::Poor),
        ];
        for (eyes, score, estimate, quality) in cases {
            let mut det = StubRegions::new(vec![face(50.0, 50.0)], eyes);
            let a = assess_angle(&GrayImage::new(4, 4), &mut det).unwrap();
            assert_eq!(a.score, score, "eyes={eyes}");
            assert_eq!(a.angle_estimate, estimate);
            assert_eq!(a.quality, quality);
            assert_eq!(a.eyes_detected, Some(eyes));
        }
    }

    #[test]
    fn test_angle_picks_largest_face() {
        let mut det = StubRegions::new(
            vec![face(20.0, 20.0), face(60.0, 40.0), face(30.0, 90.0)],
            2,
        );
        assess_angle(&GrayImage::new(4, 4), &mut det).unwrap();
        let asked = det.asked.unwrap();
        assert_eq!((asked.width, asked.height), (30.0, 90.0));
    }

    #[test]
    fn test_angle_error_propagates() {
        let mut det = StubRegions::new(vec![], 0);
        det.fail = true;
        let err = assess_angle(&GrayImage::new(4, 4), &mut det).unwrap_err();
        assert_eq!(err, "cascade exploded");
    }

    #[test]
    fn test_composite_weights() {
        let r = composite(
            sharpness_from_variance(100.0),
            lighting_from_stats(125.0, 60.0),
            angle_from_eyes(Some(2)),
        );
        // 50*0.35 + 100*0.35 + 100*0.30
        assert_eq!(r.overall_score, 82.5);
        assert_eq!(r.overall_quality, QualityLevel::Good);
        assert_eq!(r.recommendation, RECOMMEND_GOOD);
    }

    #[test]
    fn test_composite_bands() {
        let poor = composite(
            sharpness_from_variance(0.0),
            lighting_from_stats(0.0, 0.0),
            angle_from_eyes(None),
        );
        assert_eq!(poor.overall_score, 0.0);
        assert_eq!(poor.recommendation, RECOMMEND_POOR);

        // 50*0.35 + 60*0.35 + 60*0.30 = 56.5
        let acceptable = composite(
            sharpness_from_variance(100.0),
            lighting_from_stats(125.0, 0.0),
            angle_from_eyes(Some(1)),
        );
        assert_eq!(acceptable.overall_score, 56.5);
        assert_eq!(acceptable.overall_quality, QualityLevel::Acceptable);
        assert_eq!(acceptable.recommendation, RECOMMEND_ACCEPTABLE);
    }

    #[test]
    fn test_assess_scores_bounded() {
        let images = [
            GrayImage::from_pixel(12, 12, Luma([0])),
            GrayImage::from_pixel(12, 12, Luma([255])),
            GrayImage::from_fn(12, 12, |x, y| Luma([if (x + y) % 2 == 0 { 0 } else { 255 }])),
            GrayImage::from_fn(12, 12, |x, y| Luma([(x * 20 + y) as u8])),
        ];
        for gray in images {
            let img = DecodedImage::from_gray(gray);
            let mut det = StubRegions::new(vec![face(5.0, 5.0)], 1);
            let r = assess(&img, &mut det).unwrap();
            for s in [r.sharpness.score, r.lighting.score, r.angle.score, r.overall_score] {
                assert!((0.0..=100.0).contains(&s), "score out of range: {s}");
            }
        }
    }

    #[test]
    fn test_assessment_json_shape() {
        let r = composite(
            sharpness_from_variance(250.0),
            lighting_from_stats(110.0, 45.0),
            angle_from_eyes(None),
        );
        let json = serde_json::to_value(QualityReport::Assessed(r)).unwrap();
        assert!(json.get("overall_score").is_some());
        assert_eq!(json["angle"]["angle_estimate"], "no_face_detected");
        assert!(json["angle"].get("eyes_detected").is_none());
        assert!(json["sharpness"].get("raw_value").is_some());
        assert!(json["lighting"].get("brightness").is_some());
    }

    #[test]
    fn test_failed_report_has_only_error() {
        let json = serde_json::to_value(QualityReport::failed("Failed to decode image")).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 1);
        assert_eq!(obj["error"], "Failed to decode image");
    }
}
