//! Image input decoding: base64/data-URL unwrapping, format sniffing, grayscale.

use crate::error::DecodeError;
use base64::Engine;
use image::{DynamicImage, GrayImage, Luma, RgbImage};

/// Where request image bytes come from.
#[derive(Debug, Clone, Copy)]
pub enum ImageSource<'a> {
    /// Base64 text, optionally prefixed with a data URL header (`data:image/png;base64,`).
    Base64(&'a str),
    /// Raw encoded file bytes (PNG, JPEG, ...).
    Bytes(&'a [u8]),
}

impl ImageSource<'_> {
    pub fn decode(&self) -> Result<DecodedImage, DecodeError> {
        match self {
            ImageSource::Base64(text) => {
                let bytes = decode_base64(text)?;
                DecodedImage::from_bytes(&bytes)
            }
            ImageSource::Bytes(bytes) => DecodedImage::from_bytes(bytes),
        }
    }
}

/// Strip an optional data-URL header and decode standard base64.
pub fn decode_base64(text: &str) -> Result<Vec<u8>, DecodeError> {
    let payload = match text.split_once(',') {
        Some((_, rest)) => rest,
        None => text,
    };
    // Wrapped output from `base64(1)` carries newlines every 76 columns.
    let payload: String = payload.split_ascii_whitespace().collect();
    if payload.is_empty() {
        return Err(DecodeError::EmptyInput);
    }
    Ok(base64::engine::general_purpose::STANDARD.decode(payload)?)
}

/// A decoded request image with color and grayscale planes.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub rgb: RgbImage,
    pub gray: GrayImage,
    /// Channel count of the source encoding (1 gray, 2 gray+alpha, 3 RGB, 4 RGBA).
    pub channels: u8,
}

impl DecodedImage {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::EmptyInput);
        }
        let dynamic = image::load_from_memory(bytes)?;
        Ok(Self::from_dynamic(dynamic))
    }

    pub fn from_dynamic(dynamic: DynamicImage) -> Self {
        let channels = dynamic.color().channel_count();
        let rgb = dynamic.into_rgb8();
        let gray = to_grayscale(&rgb);
        Self { rgb, gray, channels }
    }

    /// Build from a grayscale buffer; the RGB plane replicates Y.
    pub fn from_gray(gray: GrayImage) -> Self {
        let rgb = DynamicImage::ImageLuma8(gray.clone()).into_rgb8();
        Self { rgb, gray, channels: 1 }
    }

    pub fn width(&self) -> u32 {
        self.rgb.width()
    }

    pub fn height(&self) -> u32 {
        self.rgb.height()
    }
}

/// BT.601 weights (0.299, 0.587, 0.114) in 14-bit fixed point.
const LUMA_R: u32 = 4899;
const LUMA_G: u32 = 9617;
const LUMA_B: u32 = 1868;
const LUMA_SHIFT: u32 = 14;

/// Convert RGB to 8-bit luma with BT.601 weights, using the same 14-bit
/// fixed-point arithmetic as OpenCV's `cvtColor` so statistics match
/// level for level.
///
/// `image`'s own `to_luma8` uses BT.709 weights, which shifts brightness
/// statistics relative to the scores' calibration.
pub fn to_grayscale(rgb: &RgbImage) -> GrayImage {
    let mut gray = GrayImage::new(rgb.width(), rgb.height());
    for (x, y, px) in rgb.enumerate_pixels() {
        gray.put_pixel(x, y, Luma([luma(px.0)]));
    }
    gray
}

fn luma([r, g, b]: [u8; 3]) -> u8 {
    let weighted = r as u32 * LUMA_R + g as u32 * LUMA_G + b as u32 * LUMA_B;
    // Weights sum to 1 << 14, so the result never exceeds 255.
    ((weighted + (1 << (LUMA_SHIFT - 1))) >> LUMA_SHIFT) as u8
}
