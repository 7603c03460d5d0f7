//! Face crops via 2×3 affine warps.
//!
//! ArcFace input is aligned with a 4-DOF similarity transform fitted to the
//! five InsightFace reference keypoints. The gender/age and mesh models take
//! an axis-aligned square crop around the detection box instead.

use facekit_core::Region;
use image::{Rgb, RgbImage};

/// ArcFace reference keypoints for a 112×112 output.
pub const REFERENCE_KEYPOINTS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: u32 = 112;

/// Row-major `[a, -b, tx, b, a, ty]` mapping source pixels to crop pixels.
pub type Affine = [f32; 6];

/// Least-squares similarity transform (scale, rotation, translation) from
/// `src` points onto `dst` points.
pub fn estimate_similarity_transform(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Affine {
    // Unknowns [a, b, tx, ty]; each pair contributes
    //   sx*a - sy*b + tx = dx
    //   sy*a + sx*b + ty = dy
    let mut ata = [0.0f32; 16];
    let mut atb = [0.0f32; 4];

    for ((sx, sy), (dx, dy)) in src.iter().copied().zip(dst.iter().copied()) {
        let r1 = [sx, -sy, 1.0, 0.0];
        let r2 = [sy, sx, 0.0, 1.0];

        for j in 0..4 {
            for k in 0..4 {
                ata[j * 4 + k] += r1[j] * r1[k] + r2[j] * r2[k];
            }
            atb[j] += r1[j] * dx + r2[j] * dy;
        }
    }

    let [a, b, tx, ty] = solve_4x4(&ata, &atb);
    [a, -b, tx, b, a, ty]
}

/// Gaussian elimination with partial pivoting. Singular systems yield identity scale.
#[allow(clippy::needless_range_loop)]
fn solve_4x4(ata: &[f32; 16], atb: &[f32; 4]) -> [f32; 4] {
    let mut m = [[0.0f32; 5]; 4];
    for i in 0..4 {
        m[i][..4].copy_from_slice(&ata[i * 4..i * 4 + 4]);
        m[i][4] = atb[i];
    }

    for col in 0..4 {
        let mut max_row = col;
        for row in (col + 1)..4 {
            if m[row][col].abs() > m[max_row][col].abs() {
                max_row = row;
            }
        }
        m.swap(col, max_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            return [1.0, 0.0, 0.0, 0.0];
        }

        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..5 {
                m[row][j] -= factor * m[col][j];
            }
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        x[i] = m[i][4];
        for j in (i + 1)..4 {
            x[i] -= m[i][j] * x[j];
        }
        x[i] /= m[i][i];
    }
    x
}

/// Square crop around a detection box, `expand` times its longer side,
/// scaled to `out_size`.
pub fn box_crop_transform(face: &Region, expand: f32, out_size: u32) -> Affine {
    let side = face.width.max(face.height) * expand;
    let scale = if side > 0.0 { out_size as f32 / side } else { 1.0 };
    let cx = face.x + face.width / 2.0;
    let cy = face.y + face.height / 2.0;
    let half = out_size as f32 / 2.0;
    [scale, 0.0, half - cx * scale, 0.0, scale, half - cy * scale]
}

/// Map a crop-space point back into source-image space.
pub fn invert_point(matrix: &Affine, x: f32, y: f32) -> (f32, f32) {
    let (a, b) = (matrix[0], matrix[3]);
    let det = a * a + b * b;
    if det.abs() < 1e-12 {
        return (x, y);
    }
    let dx = x - matrix[2];
    let dy = y - matrix[5];
    ((a * dx + b * dy) / det, (-b * dx + a * dy) / det)
}

/// Uniform scale factor of a similarity transform.
pub fn transform_scale(matrix: &Affine) -> f32 {
    (matrix[0] * matrix[0] + matrix[3] * matrix[3]).sqrt()
}

/// Warp `image` into an `out_size`² crop with bilinear sampling.
/// Samples outside the source are black.
pub fn warp_affine(image: &RgbImage, matrix: &Affine, out_size: u32) -> RgbImage {
    let mut output = RgbImage::new(out_size, out_size);
    let (a, b) = (matrix[0], matrix[3]);
    let det = a * a + b * b;
    if det.abs() < 1e-12 {
        return output;
    }

    let (w, h) = (image.width() as i64, image.height() as i64);
    let sample = |x: i64, y: i64| -> [f32; 3] {
        if x >= 0 && x < w && y >= 0 && y < h {
            let p = image.get_pixel(x as u32, y as u32).0;
            [p[0] as f32, p[1] as f32, p[2] as f32]
        } else {
            [0.0; 3]
        }
    };

    for (ox, oy, px) in output.enumerate_pixels_mut() {
        let (sx, sy) = invert_point(matrix, ox as f32, oy as f32);

        let x0 = sx.floor() as i64;
        let y0 = sy.floor() as i64;
        let fx = sx - x0 as f32;
        let fy = sy - y0 as f32;

        let tl = sample(x0, y0);
        let tr = sample(x0 + 1, y0);
        let bl = sample(x0, y0 + 1);
        let br = sample(x0 + 1, y0 + 1);

        let mut rgb = [0u8; 3];
        for c in 0..3 {
            let v = tl[c] * (1.0 - fx) * (1.0 - fy)
                + tr[c] * fx * (1.0 - fy)
                + bl[c] * (1.0 - fx) * fy
                + br[c] * fx * fy;
            rgb[c] = v.round().clamp(0.0, 255.0) as u8;
        }
        *px = Rgb(rgb);
    }

    output
}

/// Align a face to the canonical 112×112 ArcFace crop.
pub fn align_face(image: &RgbImage, keypoints: &[(f32, f32); 5]) -> RgbImage {
    let matrix = estimate_similarity_transform(keypoints, &REFERENCE_KEYPOINTS_112);
    warp_affine(image, &matrix, ALIGNED_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_transform() {
        let pts = REFERENCE_KEYPOINTS_112;
        let m = estimate_similarity_transform(&pts, &pts);
        assert!((m[0] - 1.0).abs() < 1e-4, "a = {}", m[0]);
        assert!(m[1].abs() < 1e-4, "-b = {}", m[1]);
        assert!(m[2].abs() < 1e-3, "tx = {}", m[2]);
        assert!(m[3].abs() < 1e-4, "b = {}", m[3]);
        assert!((m[4] - 1.0).abs() < 1e-4, "a2 = {}", m[4]);
        assert!(m[5].abs() < 1e-3, "ty = {}", m[5]);
    }

    #[test]
    fn test_scaled_transform() {
        let src = REFERENCE_KEYPOINTS_112.map(|(x, y)| (x * 2.0, y * 2.0));
        let m = estimate_similarity_transform(&src, &REFERENCE_KEYPOINTS_112);
        assert!((m[0] - 0.5).abs() < 0.05, "a = {}, expected ~0.5", m[0]);
        assert!((transform_scale(&m) - 0.5).abs() < 0.05);
    }

    #[test]
    fn test_box_crop_transform_centers_face() {
        let face = Region::new(100.0, 50.0, 80.0, 100.0, 0.9);
        let m = box_crop_transform(&face, 1.5, 192);
        // box center maps to crop center
        let cx = 140.0 * m[0] + m[2];
        let cy = 100.0 * m[4] + m[5];
        assert!((cx - 96.0).abs() < 1e-3);
        assert!((cy - 96.0).abs() < 1e-3);
        // longer side (100) * 1.5 spans the whole crop
        assert!((m[0] - 192.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_invert_point_roundtrip() {
        let m: Affine = [0.8, -0.3, 12.0, 0.3, 0.8, -7.0];
        let (sx, sy) = (55.0, 31.0);
        let ox = m[0] * sx + m[1] * sy + m[2];
        let oy = m[3] * sx + m[4] * sy + m[5];
        let (rx, ry) = invert_point(&m, ox, oy);
        assert!((rx - sx).abs() < 1e-3, "x: {rx}");
        assert!((ry - sy).abs() < 1e-3, "y: {ry}");
    }

    #[test]
    fn test_warp_output_size() {
        let image = RgbImage::from_pixel(640, 480, Rgb([128, 128, 128]));
        let out = warp_affine(&image, &[1.0, 0.0, 0.0, 0.0, 1.0, 0.0], 112);
        assert_eq!(out.dimensions(), (112, 112));
        assert_eq!(out.get_pixel(50, 50).0, [128, 128, 128]);
    }

    #[test]
    fn test_warp_degenerate_matrix_is_black() {
        let image = RgbImage::from_pixel(10, 10, Rgb([200, 10, 10]));
        let out = warp_affine(&image, &[0.0; 6], 8);
        assert!(out.pixels().all(|p| p.0 == [0, 0, 0]));
    }

    #[test]
    fn test_keypoint_lands_on_reference() {
        let mut image = RgbImage::new(200, 200);
        let src: [(f32, f32); 5] = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];

        // 5x5 red patch at the left eye survives bilinear sampling
        for y in 58..63 {
            for x in 78..83 {
                image.put_pixel(x, y, Rgb([255, 0, 0]));
            }
        }

        let aligned = align_face(&image, &src);

        let ref_x = REFERENCE_KEYPOINTS_112[0].0.round() as u32;
        let ref_y = REFERENCE_KEYPOINTS_112[0].1.round() as u32;
        let mut max_red = 0u8;
        for y in (ref_y - 1)..=(ref_y + 1) {
            for x in (ref_x - 1)..=(ref_x + 1) {
                let p = aligned.get_pixel(x, y).0;
                max_red = max_red.max(p[0]);
                assert_eq!(p[1], 0);
            }
        }
        assert!(max_red > 100, "expected red patch near ({ref_x}, {ref_y}), max={max_red}");
    }
}
