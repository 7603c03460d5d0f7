//! SCRFD face detector via ONNX Runtime.
//!
//! 3-stride anchor-free decoding with five-point keypoints and NMS. Also
//! serves as the quality assessor's face/eye locator: eye presence is read
//! off the keypoints instead of running a second model.

use crate::{load_session, ModelError};
use facekit_core::inference::{FaceDetector, FaceRegionDetector};
use facekit_core::types::{nms, KP_LEFT_EYE, KP_NOSE, KP_RIGHT_EYE};
use facekit_core::Region;
use image::{GrayImage, RgbImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

/// An eye keypoint this close to the nose (as a fraction of box width) is
/// treated as occluded by a turned head.
const EYE_NOSE_MIN_OFFSET: f32 = 0.15;

#[derive(Debug, Clone, Copy)]
pub struct ScrfdConfig {
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
    pub intra_threads: usize,
}

impl Default for ScrfdConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            nms_threshold: 0.4,
            intra_threads: 2,
        }
    }
}

/// Coordinate de-mapping after letterbox resize.
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Output tensor indices for one stride: (score, bbox, kps).
type StrideOutputIndices = (usize, usize, usize);

pub struct ScrfdDetector {
    session: Session,
    config: ScrfdConfig,
    /// Per-stride output slots for strides [8, 16, 32].
    stride_indices: [StrideOutputIndices; 3],
}

impl ScrfdDetector {
    pub fn load(model_path: &Path, config: ScrfdConfig) -> Result<Self, ModelError> {
        let session = load_session(model_path, config.intra_threads, "SCRFD")?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if output_names.len() < 9 {
            return Err(ModelError::InferenceFailed(format!(
                "SCRFD model requires 9 outputs (3 strides × score/bbox/kps), got {}",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self {
            session,
            config,
            stride_indices,
        })
    }

    /// Detect faces in an interleaved 8-bit buffer with 1 or 3 channels.
    fn run(
        &mut self,
        pixels: &[u8],
        width: usize,
        height: usize,
        channels: usize,
    ) -> Result<Vec<Region>, ModelError> {
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }
        let (input, letterbox) = preprocess(pixels, width, height, channels);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut all = Vec::new();
        for (stride_pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.stride_indices[stride_pos];

            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| ModelError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| ModelError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;
            let (_, kps) = outputs[kps_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| ModelError::InferenceFailed(format!("kps stride {stride}: {e}")))?;

            all.extend(decode_stride(
                scores,
                bboxes,
                kps,
                stride,
                &letterbox,
                self.config.confidence_threshold,
            ));
        }

        let faces = nms(all, self.config.nms_threshold);
        tracing::debug!(faces = faces.len(), "SCRFD detections");
        Ok(faces)
    }
}

impl FaceDetector for ScrfdDetector {
    type Error = ModelError;

    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Region>, ModelError> {
        self.run(image.as_raw(), image.width() as usize, image.height() as usize, 3)
    }
}

impl FaceRegionDetector for ScrfdDetector {
    type Error = ModelError;

    fn detect_faces(&mut self, gray: &GrayImage) -> Result<Vec<Region>, ModelError> {
        self.run(gray.as_raw(), gray.width() as usize, gray.height() as usize, 1)
    }

    fn detect_eyes(&mut self, _gray: &GrayImage, face: &Region) -> Result<Vec<Region>, ModelError> {
        Ok(visible_eyes(face))
    }
}

/// Eyes whose keypoint lies inside the face box and sits clear of the nose.
///
/// Each eye is reported as a small box centered on its keypoint.
pub fn visible_eyes(face: &Region) -> Vec<Region> {
    let Some(kps) = face.keypoints else {
        return Vec::new();
    };
    let nose_x = kps[KP_NOSE].0;
    let min_offset = face.width * EYE_NOSE_MIN_OFFSET;
    let eye_size = face.width * 0.2;

    [kps[KP_LEFT_EYE], kps[KP_RIGHT_EYE]]
        .into_iter()
        .filter(|&(x, y)| face.contains(x, y) && (x - nose_x).abs() >= min_offset)
        .map(|(x, y)| {
            Region::new(
                x - eye_size / 2.0,
                y - eye_size / 2.0,
                eye_size,
                eye_size,
                face.confidence,
            )
        })
        .collect()
}

/// Letterbox an interleaved 1- or 3-channel buffer into a normalized NCHW tensor.
///
/// Single-channel input is replicated across R, G and B.
fn preprocess(pixels: &[u8], width: usize, height: usize, channels: usize) -> (Array4<f32>, LetterboxInfo) {
    let size = SCRFD_INPUT_SIZE;
    let scale = (size as f32 / width as f32).min(size as f32 / height as f32);

    let new_w = ((width as f32 * scale).round() as usize).clamp(1, size);
    let new_h = ((height as f32 * scale).round() as usize).clamp(1, size);
    let pad_x = (size - new_w) as f32 / 2.0;
    let pad_y = (size - new_h) as f32 / 2.0;

    let resized = resize_bilinear(pixels, width, height, channels, new_w, new_h);

    let pad_x_start = pad_x.floor() as usize;
    let pad_y_start = pad_y.floor() as usize;

    // Padding normalizes to 0.0
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for y in 0..new_h {
        for x in 0..new_w {
            let base = (y * new_w + x) * channels;
            for c in 0..3 {
                let v = resized[base + if channels == 1 { 0 } else { c }] as f32;
                tensor[[0, c, y + pad_y_start, x + pad_x_start]] = (v - SCRFD_MEAN) / SCRFD_STD;
            }
        }
    }

    (tensor, LetterboxInfo { scale, pad_x, pad_y })
}

/// Bilinear resize of an interleaved buffer with pixel-center alignment.
fn resize_bilinear(
    src: &[u8],
    width: usize,
    height: usize,
    channels: usize,
    new_w: usize,
    new_h: usize,
) -> Vec<u8> {
    let inv_x = width as f32 / new_w as f32;
    let inv_y = height as f32 / new_h as f32;
    let mut out = vec![0u8; new_w * new_h * channels];

    for y in 0..new_h {
        let src_y = (y as f32 + 0.5) * inv_y - 0.5;
        let y0 = (src_y.floor() as i64).clamp(0, height as i64 - 1) as usize;
        let y1 = (y0 + 1).min(height - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

        for x in 0..new_w {
            let src_x = (x as f32 + 0.5) * inv_x - 0.5;
            let x0 = (src_x.floor() as i64).clamp(0, width as i64 - 1) as usize;
            let x1 = (x0 + 1).min(width - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

            for c in 0..channels {
                let at = |px: usize, py: usize| src[(py * width + px) * channels + c] as f32;
                let val = at(x0, y0) * (1.0 - fx) * (1.0 - fy)
                    + at(x1, y0) * fx * (1.0 - fy)
                    + at(x0, y1) * (1.0 - fx) * fy
                    + at(x1, y1) * fx * fy;
                out[(y * new_w + x) * channels + c] = val.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
    out
}

/// Map output tensors to stride slots by name (`score_8`, `bbox_16`, ...),
/// falling back to the standard positional export order:
///   [0-2] scores, [3-5] bboxes, [6-8] kps for strides 8/16/32.
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let named: Option<Vec<StrideOutputIndices>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| Some((find("score", stride)?, find("bbox", stride)?, find("kps", stride)?)))
        .collect();

    match named {
        Some(slots) => {
            tracing::info!("SCRFD: using name-based output tensor mapping");
            [slots[0], slots[1], slots[2]]
        }
        None => {
            tracing::info!(
                ?names,
                "SCRFD: output names not recognized, using positional mapping [0-2]=scores, [3-5]=bboxes, [6-8]=kps"
            );
            [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
        }
    }
}

/// Decode detections for a single stride level into source-image coordinates.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Vec<Region> {
    let grid = SCRFD_INPUT_SIZE / stride;
    let num_anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let s = stride as f32;
    let unmap = |v: f32, pad: f32| (v - pad) / letterbox.scale;

    let mut detections = Vec::new();
    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_x = (cell % grid) as f32 * s;
        let anchor_y = (cell / grid) as f32 * s;

        let Some(b) = bboxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };
        let x1 = unmap(anchor_x - b[0] * s, letterbox.pad_x);
        let y1 = unmap(anchor_y - b[1] * s, letterbox.pad_y);
        let x2 = unmap(anchor_x + b[2] * s, letterbox.pad_x);
        let y2 = unmap(anchor_y + b[3] * s, letterbox.pad_y);

        let keypoints = kps.get(idx * 10..idx * 10 + 10).map(|k| {
            std::array::from_fn(|i| {
                (
                    unmap(anchor_x + k[i * 2] * s, letterbox.pad_x),
                    unmap(anchor_y + k[i * 2 + 1] * s, letterbox.pad_y),
                )
            })
        });

        detections.push(Region {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            keypoints,
        });
    }

    detections
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn frontal_face() -> Region {
        let mut face = Region::new(100.0, 100.0, 100.0, 120.0, 0.9);
        face.keypoints = Some([(130.0, 150.0), (170.0, 150.0), (150.0, 175.0), (135.0, 195.0), (165.0, 195.0)]);
        face
    }

    #[test]
    fn test_discover_output_indices_named() {
        let indices = discover_output_indices(&names(&[
            "score_8", "score_16", "score_32", "bbox_8", "bbox_16", "bbox_32", "kps_8", "kps_16", "kps_32",
        ]));
        assert_eq!(indices, [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }

    #[test]
    fn test_discover_output_indices_shuffled_named() {
        let indices = discover_output_indices(&names(&[
            "bbox_8", "kps_8", "score_8", "bbox_16", "kps_16", "score_16", "bbox_32", "kps_32", "score_32",
        ]));
        assert_eq!(indices, [(2, 0, 1), (5, 3, 4), (8, 6, 7)]);
    }

    #[test]
    fn test_discover_output_indices_positional_fallback() {
        let generic: Vec<String> = (0..9).map(|i: usize| (i + 448).to_string()).collect();
        assert_eq!(discover_output_indices(&generic), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }

    #[test]
    fn test_decode_stride_single_anchor() {
        // stride 32 → 20x20 grid, 800 anchors; fire anchor 2*(3*20+5)+1 = cell (5, 3)
        let grid = 20;
        let idx = 2 * (3 * grid + 5) + 1;
        let mut scores = vec![0.0f32; grid * grid * 2];
        scores[idx] = 0.92;
        let mut bboxes = vec![0.0f32; scores.len() * 4];
        bboxes[idx * 4..idx * 4 + 4].copy_from_slice(&[1.0, 1.0, 2.0, 3.0]);
        let mut kps = vec![0.0f32; scores.len() * 10];
        kps[idx * 10] = 0.5;
        kps[idx * 10 + 1] = -0.25;

        let letterbox = LetterboxInfo { scale: 2.0, pad_x: 0.0, pad_y: 80.0 };
        let dets = decode_stride(&scores, &bboxes, &kps, 32, &letterbox, 0.5);
        assert_eq!(dets.len(), 1);

        let d = &dets[0];
        // anchor (160, 96); x1 = (160-32)/2, y1 = (96-32-80)/2
        assert!((d.x - 64.0).abs() < 1e-4);
        assert!((d.y + 8.0).abs() < 1e-4);
        assert!((d.width - 48.0).abs() < 1e-4);
        assert!((d.height - 64.0).abs() < 1e-4);
        let kp = d.keypoints.unwrap()[0];
        assert!((kp.0 - 88.0).abs() < 1e-4);
        assert!((kp.1 - 4.0).abs() < 1e-4);
    }

    #[test]
    fn test_decode_stride_threshold() {
        let scores = vec![0.5f32; 800];
        let bboxes = vec![1.0f32; 800 * 4];
        let kps = vec![0.0f32; 800 * 10];
        let letterbox = LetterboxInfo { scale: 1.0, pad_x: 0.0, pad_y: 0.0 };
        assert!(decode_stride(&scores, &bboxes, &kps, 32, &letterbox, 0.5).is_empty());
    }

    #[test]
    fn test_letterbox_coordinate_roundtrip() {
        let (width, height) = (320.0f32, 240.0f32);
        let scale = (640.0 / width).min(640.0 / height);
        let pad_x = (640.0 - (width * scale).round()) / 2.0;
        let pad_y = (640.0 - (height * scale).round()) / 2.0;

        let (orig_x, orig_y) = (100.0f32, 50.0f32);
        let recovered_x = (orig_x * scale + pad_x - pad_x) / scale;
        let recovered_y = (orig_y * scale + pad_y - pad_y) / scale;
        assert!((recovered_x - orig_x).abs() < 0.1);
        assert!((recovered_y - orig_y).abs() < 0.1);
    }

    #[test]
    fn test_preprocess_gray_replicates_and_pads() {
        let frame = vec![255u8; 320 * 240];
        let (tensor, letterbox) = preprocess(&frame, 320, 240, 1);
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        assert!((letterbox.scale - 2.0).abs() < 1e-6);
        assert!((letterbox.pad_y - 80.0).abs() < 1e-6);

        let inside = (255.0 - SCRFD_MEAN) / SCRFD_STD;
        assert!((tensor[[0, 0, 320, 320]] - inside).abs() < 1e-6);
        assert_eq!(tensor[[0, 0, 320, 320]], tensor[[0, 2, 320, 320]]);
        assert_eq!(tensor[[0, 1, 10, 320]], 0.0);
    }

    #[test]
    fn test_preprocess_rgb_channel_order() {
        let frame: Vec<u8> = std::iter::repeat([255u8, 0, 128]).take(64 * 64).flatten().collect();
        let (tensor, _) = preprocess(&frame, 64, 64, 3);
        assert!(tensor[[0, 0, 300, 300]] > 0.9);
        assert!(tensor[[0, 1, 300, 300]] < -0.9);
        assert!((tensor[[0, 2, 300, 300]] - 0.5 / SCRFD_STD).abs() < 1e-6);
    }

    #[test]
    fn test_resize_bilinear_uniform() {
        let frame = vec![128u8; 100 * 100 * 3];
        let resized = resize_bilinear(&frame, 100, 100, 3, 200, 150);
        assert_eq!(resized.len(), 200 * 150 * 3);
        assert!(resized.iter().all(|&p| p == 128));
    }

    #[test]
    fn test_visible_eyes_frontal() {
        assert_eq!(visible_eyes(&frontal_face()).len(), 2);
    }

    #[test]
    fn test_visible_eyes_turned_head() {
        let mut face = frontal_face();
        // right eye collapses onto the nose line
        if let Some(kps) = face.keypoints.as_mut() {
            kps[KP_RIGHT_EYE] = (155.0, 150.0);
        }
        assert_eq!(visible_eyes(&face).len(), 1);
    }

    #[test]
    fn test_visible_eyes_outside_box() {
        let mut face = frontal_face();
        if let Some(kps) = face.keypoints.as_mut() {
            kps[KP_LEFT_EYE] = (90.0, 150.0);
            kps[KP_RIGHT_EYE] = (152.0, 150.0);
        }
        assert!(visible_eyes(&face).is_empty());
    }

    #[test]
    fn test_visible_eyes_without_keypoints() {
        assert!(visible_eyes(&Region::new(0.0, 0.0, 50.0, 50.0, 0.8)).is_empty());
    }
}
