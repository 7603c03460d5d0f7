//! MediaPipe face-mesh landmark model (`face_landmark.onnx`).
//!
//! The model sees one 192×192 crop per face and regresses 468 (x, y, z)
//! points in crop pixels. [`MeshPipeline`] pairs it with SCRFD to find the
//! crops and maps the points back to image pixels.

use crate::alignment::{box_crop_transform, invert_point, transform_scale, warp_affine, Affine};
use crate::scrfd::ScrfdDetector;
use crate::{load_session, ModelError};
use facekit_core::inference::{FaceDetector, FaceMesh};
use facekit_core::mesh::{LandmarkSet, MESH_POINT_COUNT};
use facekit_core::{Landmark, Region};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const MESH_INPUT_SIZE: u32 = 192;
/// 25% margin on each side of the detection box.
const MESH_CROP_EXPAND: f32 = 1.5;
const MESH_OUTPUT_LEN: usize = MESH_POINT_COUNT * 3;

pub struct MeshModel {
    session: Session,
    /// Index of the landmark tensor among the session outputs.
    landmark_output: usize,
}

impl MeshModel {
    pub fn load(model_path: &Path, intra_threads: usize) -> Result<Self, ModelError> {
        let session = load_session(model_path, intra_threads, "face mesh")?;
        Ok(Self {
            session,
            landmark_output: 0,
        })
    }

    /// Landmarks for one face, in source-image pixels.
    pub fn landmarks_for(&mut self, image: &RgbImage, face: &Region) -> Result<LandmarkSet, ModelError> {
        let matrix = box_crop_transform(face, MESH_CROP_EXPAND, MESH_INPUT_SIZE);
        let crop = warp_affine(image, &matrix, MESH_INPUT_SIZE);
        let input = preprocess(&crop);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        // Converted exports differ in output order; lock onto the first tensor
        // large enough to hold the mesh and remember it.
        let mut found = None;
        for idx in std::iter::once(self.landmark_output).chain(0..outputs.len()) {
            if idx >= outputs.len() {
                continue;
            }
            let (_, data) = outputs[idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| ModelError::InferenceFailed(format!("mesh output {idx}: {e}")))?;
            if data.len() >= MESH_OUTPUT_LEN {
                found = Some((idx, data[..MESH_OUTPUT_LEN].to_vec()));
                break;
            }
        }

        let Some((idx, raw)) = found else {
            return Err(ModelError::InferenceFailed(format!(
                "no mesh output with {MESH_OUTPUT_LEN} values"
            )));
        };
        self.landmark_output = idx;

        Ok(LandmarkSet::new(crop_to_image(&raw, &matrix))?)
    }
}

/// Raw RGB scaled to [0, 1], NHWC as exported from TFLite.
fn preprocess(crop: &RgbImage) -> Array4<f32> {
    let size = MESH_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, size, size, 3));
    for (x, y, px) in crop.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, y as usize, x as usize, c]] = px.0[c] as f32 / 255.0;
        }
    }
    tensor
}

/// Map flat crop-space `[x, y, z, ...]` back into image pixels. Depth is
/// rescaled with the same factor as x and y.
fn crop_to_image(raw: &[f32], matrix: &Affine) -> Vec<Landmark> {
    let scale = transform_scale(matrix);
    let inv_scale = if scale > 0.0 { 1.0 / scale } else { 1.0 };
    raw.chunks_exact(3)
        .map(|p| {
            let (x, y) = invert_point(matrix, p[0], p[1]);
            Landmark::new(x as f64, y as f64, (p[2] * inv_scale) as f64)
        })
        .collect()
}

/// SCRFD detection followed by per-face mesh regression.
pub struct MeshPipeline {
    detector: ScrfdDetector,
    mesh: MeshModel,
    max_faces: usize,
}

impl MeshPipeline {
    pub fn new(detector: ScrfdDetector, mesh: MeshModel, max_faces: usize) -> Self {
        Self {
            detector,
            mesh,
            max_faces,
        }
    }

    pub fn detector_mut(&mut self) -> &mut ScrfdDetector {
        &mut self.detector
    }
}

impl FaceMesh for MeshPipeline {
    type Error = ModelError;

    fn landmarks(&mut self, image: &RgbImage) -> Result<Vec<LandmarkSet>, ModelError> {
        let faces = self.detector.detect(image)?;
        faces
            .iter()
            .take(self.max_faces)
            .map(|face| self.mesh.landmarks_for(image, face))
            .collect()
    }
}
