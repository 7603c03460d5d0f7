//! YOLOv8 person detector via ONNX Runtime.
//!
//! Output is `[1, 84, N]`: rows 0-3 hold `cx, cy, w, h` in 640-space and
//! rows 4-83 the 80 COCO class scores, one column per proposal.

use crate::{load_session, ModelError};
use facekit_core::inference::PersonDetector;
use facekit_core::types::nms;
use facekit_core::Region;
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const YOLO_SIZE: u32 = 640;
const YOLO_NUM_CLASSES: usize = 80;
const YOLO_ROWS: usize = 4 + YOLO_NUM_CLASSES;
/// COCO class index for "person".
const PERSON_CLASS: usize = 0;

#[derive(Debug, Clone, Copy)]
pub struct YoloConfig {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub intra_threads: usize,
}

impl Default for YoloConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.25,
            iou_threshold: 0.7,
            intra_threads: 2,
        }
    }
}

pub struct YoloPersonDetector {
    session: Session,
    config: YoloConfig,
}

impl YoloPersonDetector {
    pub fn load(model_path: &Path, config: YoloConfig) -> Result<Self, ModelError> {
        let session = load_session(model_path, config.intra_threads, "YOLOv8")?;
        Ok(Self { session, config })
    }
}

impl PersonDetector for YoloPersonDetector {
    type Error = ModelError;

    fn detect_people(&mut self, image: &RgbImage) -> Result<Vec<Region>, ModelError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }
        let input = preprocess(image);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::InferenceFailed(format!("YOLOv8 output: {e}")))?;

        if data.len() % YOLO_ROWS != 0 {
            return Err(ModelError::InferenceFailed(format!(
                "YOLOv8 output length {} is not a multiple of {YOLO_ROWS}",
                data.len()
            )));
        }

        let candidates = decode_people(
            data,
            image.width() as f32,
            image.height() as f32,
            self.config.confidence_threshold,
        );
        let people = nms(candidates, self.config.iou_threshold);
        tracing::debug!(people = people.len(), "YOLOv8 detections");
        Ok(people)
    }
}

/// Stretch-resize to 640×640 and scale to [0, 1], NCHW.
fn preprocess(image: &RgbImage) -> Array4<f32> {
    let resized = image::imageops::resize(image, YOLO_SIZE, YOLO_SIZE, FilterType::Triangle);
    let size = YOLO_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, px) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = px.0[c] as f32 / 255.0;
        }
    }
    tensor
}

/// Proposals whose best class is "person" with a score at or above `threshold`,
/// in source-image pixels and clipped to the image.
fn decode_people(data: &[f32], width: f32, height: f32, threshold: f32) -> Vec<Region> {
    let n = data.len() / YOLO_ROWS;
    let scale_x = width / YOLO_SIZE as f32;
    let scale_y = height / YOLO_SIZE as f32;
    let at = |row: usize, i: usize| data[row * n + i];

    let mut candidates = Vec::new();
    for i in 0..n {
        let person = at(4 + PERSON_CLASS, i);
        if person < threshold {
            continue;
        }
        let best = (0..YOLO_NUM_CLASSES).map(|c| at(4 + c, i)).fold(f32::MIN, f32::max);
        if person < best {
            continue;
        }

        let (cx, cy, w, h) = (at(0, i), at(1, i), at(2, i), at(3, i));
        let x1 = ((cx - w / 2.0) * scale_x).max(0.0);
        let y1 = ((cy - h / 2.0) * scale_y).max(0.0);
        let x2 = ((cx + w / 2.0) * scale_x).min(width);
        let y2 = ((cy + h / 2.0) * scale_y).min(height);

        candidates.push(Region::new(x1, y1, x2 - x1, y2 - y1, person));
    }
    candidates
}
