//! Five-point face alignment for the encoder.
//!
//! Fits a similarity transform (scale, rotation, translation) from detected
//! landmarks to the canonical ArcFace positions and warps the face into a
//! 112×112 crop.

use crate::types::Landmarks;
use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};

pub const ALIGNED_SIZE: u32 = 112;

/// Canonical landmark positions in a 112×112 ArcFace crop.
pub const REFERENCE_LANDMARKS: Landmarks = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth corner
    (70.7299, 92.2041), // right mouth corner
];

/// Least-squares similarity transform mapping `src` onto `dst`.
///
/// Returns the row-major 3×3 matrix
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// | 0   0   1 |
/// ```
/// or `None` when the source points are degenerate.
fn similarity_transform(src: &Landmarks, dst: &Landmarks) -> Option<[f32; 9]> {
    let n = src.len() as f32;
    let mean = |pts: &Landmarks| {
        let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
        (sx / n, sy / n)
    };
    let (msx, msy) = mean(src);
    let (mdx, mdy) = mean(dst);

    let mut dot = 0.0;
    let mut cross = 0.0;
    let mut spread = 0.0;
    for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
        let (sx, sy) = (sx - msx, sy - msy);
        let (dx, dy) = (dx - mdx, dy - mdy);
        dot += sx * dx + sy * dy;
        cross += sx * dy - sy * dx;
        spread += sx * sx + sy * sy;
    }
    if spread < 1e-6 {
        return None;
    }

    let a = dot / spread;
    let b = cross / spread;
    let tx = mdx - (a * msx - b * msy);
    let ty = mdy - (b * msx + a * msy);
    Some([a, -b, tx, b, a, ty, 0.0, 0.0, 1.0])
}

/// Warp the face described by `landmarks` into an aligned 112×112 crop.
///
/// Pixels that fall outside `frame` are black. Returns `None` when the
/// landmarks do not define a usable transform.
pub fn align_face(frame: &RgbImage, landmarks: &Landmarks) -> Option<RgbImage> {
    let matrix = similarity_transform(landmarks, &REFERENCE_LANDMARKS)?;
    let projection = Projection::from_matrix(matrix)?;

    let mut aligned = RgbImage::new(ALIGNED_SIZE, ALIGNED_SIZE);
    warp_into(frame, &projection, Interpolation::Bilinear, Rgb([0, 0, 0]), &mut aligned);
    Some(aligned)
}
