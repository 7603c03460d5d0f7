//! Seams to the pretrained models.
//!
//! Each trait takes `&mut self` because ONNX sessions need exclusive access
//! to run; callers own the handles and pass them into the pipelines.

use crate::mesh::LandmarkSet;
use crate::types::{Embedding, Region};
use image::{GrayImage, RgbImage};

/// Cheap face/eye locator used only for the angle sub-score.
pub trait FaceRegionDetector {
    type Error: std::fmt::Display;

    /// Candidate face boxes in a grayscale image, in any order.
    fn detect_faces(&mut self, gray: &GrayImage) -> Result<Vec<Region>, Self::Error>;

    /// Eyes found inside `face`, which is one of the boxes from [`detect_faces`](Self::detect_faces).
    fn detect_eyes(&mut self, gray: &GrayImage, face: &Region) -> Result<Vec<Region>, Self::Error>;
}

/// General-purpose face detector, results sorted by confidence (highest first).
pub trait FaceDetector {
    type Error: std::fmt::Display;

    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Region>, Self::Error>;
}

/// Identity embedding for a detected face.
pub trait FaceEmbedder {
    type Error: std::fmt::Display;

    fn embed(&mut self, image: &RgbImage, face: &Region) -> Result<Embedding, Self::Error>;
}

/// Demographic estimate for a detected face.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attributes {
    pub age: u32,
    pub gender: Gender,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gender {
    Female,
    Male,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Female => "female",
            Gender::Male => "male",
        }
    }
}

pub trait FaceAttributes {
    type Error: std::fmt::Display;

    fn estimate(&mut self, image: &RgbImage, face: &Region) -> Result<Attributes, Self::Error>;
}

/// Dense face mesh: one landmark set per detected face.
pub trait FaceMesh {
    type Error: std::fmt::Display;

    fn landmarks(&mut self, image: &RgbImage) -> Result<Vec<LandmarkSet>, Self::Error>;
}

/// Person (COCO class 0) detector.
pub trait PersonDetector {
    type Error: std::fmt::Display;

    fn detect_people(&mut self, image: &RgbImage) -> Result<Vec<Region>, Self::Error>;
}
