//! InsightFace gender/age head (`genderage.onnx`).

use crate::alignment::{box_crop_transform, warp_affine};
use crate::{load_session, ModelError};
use facekit_core::inference::{Attributes, FaceAttributes, Gender};
use facekit_core::Region;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const GENDERAGE_INPUT_SIZE: u32 = 96;
/// Crop side relative to the longer side of the detection box.
const GENDERAGE_CROP_EXPAND: f32 = 1.5;
/// Age output is a fraction of a century.
const AGE_SCALE: f32 = 100.0;

pub struct GenderAgeModel {
    session: Session,
}

impl GenderAgeModel {
    pub fn load(model_path: &Path, intra_threads: usize) -> Result<Self, ModelError> {
        let session = load_session(model_path, intra_threads, "gender/age")?;
        Ok(Self { session })
    }
}

impl FaceAttributes for GenderAgeModel {
    type Error = ModelError;

    fn estimate(&mut self, image: &RgbImage, face: &Region) -> Result<Attributes, ModelError> {
        let matrix = box_crop_transform(face, GENDERAGE_CROP_EXPAND, GENDERAGE_INPUT_SIZE);
        let crop = warp_affine(image, &matrix, GENDERAGE_INPUT_SIZE);
        let input = preprocess(&crop);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, pred) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::InferenceFailed(format!("gender/age output: {e}")))?;

        decode_prediction(pred)
    }
}

/// `[female_logit, male_logit, age / 100]`
fn decode_prediction(pred: &[f32]) -> Result<Attributes, ModelError> {
    let &[female, male, age, ..] = pred else {
        return Err(ModelError::InferenceFailed(format!(
            "expected 3 gender/age outputs, got {}",
            pred.len()
        )));
    };
    let gender = if male > female { Gender::Male } else { Gender::Female };
    let age = (age * AGE_SCALE).round().max(0.0) as u32;
    Ok(Attributes { age, gender })
}

/// Raw 0-255 RGB values; the model normalizes internally.
fn preprocess(crop: &RgbImage) -> Array4<f32> {
    let size = GENDERAGE_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, px) in crop.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = px.0[c] as f32;
        }
    }
    tensor
}
