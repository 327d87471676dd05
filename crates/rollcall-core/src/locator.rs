//! Face location.
//!
//! [`ScrfdLocator`] runs the SCRFD detector through ONNX Runtime with
//! letterbox preprocessing, 3-stride anchor decoding and NMS. Each face
//! carries the five SCRFD keypoints used for alignment.

use crate::types::{FaceRegion, Landmarks, LocatedFace};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_SCORE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;
const SCRFD_KEYPOINTS: usize = 5;

#[derive(Error, Debug)]
pub enum LocatorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("unreadable frame: {0}")]
    UnreadableFrame(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Finds faces in a color frame.
///
/// Regions and landmarks are returned in the pixel coordinates of the frame
/// passed in.
pub trait FaceLocator {
    fn locate(&mut self, frame: &RgbImage) -> Result<Vec<LocatedFace>, LocatorError>;
}

/// Reject frames that cannot hold image data.
pub fn check_frame(frame: &RgbImage) -> Result<(), LocatorError> {
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 {
        return Err(LocatorError::UnreadableFrame(format!(
            "empty frame ({width}x{height})"
        )));
    }
    let expected = width as usize * height as usize * 3;
    if frame.as_raw().len() != expected {
        return Err(LocatorError::UnreadableFrame(format!(
            "buffer holds {} bytes, expected {expected}",
            frame.as_raw().len()
        )));
    }
    Ok(())
}

/// Letterbox parameters for mapping model coordinates back to the frame.
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Scored box in frame coordinates, before NMS.
#[derive(Debug, Clone)]
struct Candidate {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    score: f32,
    landmarks: Option<Landmarks>,
}

/// Output tensor indices for one stride: (score_idx, bbox_idx, kps_idx).
type StrideOutputIndices = (usize, usize, usize);

pub struct ScrfdLocator {
    session: Session,
    stride_indices: [StrideOutputIndices; 3],
}

impl ScrfdLocator {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, LocatorError> {
        if !model_path.exists() {
            return Err(LocatorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        if output_names.len() < 9 {
            return Err(LocatorError::InferenceFailed(format!(
                "SCRFD model needs score, bbox and kps outputs for 3 strides, got {} outputs",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self {
            session,
            stride_indices,
        })
    }
}

impl FaceLocator for ScrfdLocator {
    fn locate(&mut self, frame: &RgbImage) -> Result<Vec<LocatedFace>, LocatorError> {
        check_frame(frame)?;

        let (input, letterbox) = preprocess(frame);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.stride_indices[pos];
            let (_, scores) = outputs[score_idx].try_extract_tensor::<f32>().map_err(|e| {
                LocatorError::InferenceFailed(format!("scores stride {stride}: {e}"))
            })?;
            let (_, bboxes) = outputs[bbox_idx].try_extract_tensor::<f32>().map_err(|e| {
                LocatorError::InferenceFailed(format!("bboxes stride {stride}: {e}"))
            })?;
            let (_, kps) = outputs[kps_idx].try_extract_tensor::<f32>().map_err(|e| {
                LocatorError::InferenceFailed(format!("kps stride {stride}: {e}"))
            })?;
            candidates.extend(decode_stride(scores, bboxes, kps, stride, &letterbox));
        }

        let (width, height) = frame.dimensions();
        let faces: Vec<LocatedFace> = nms(candidates, SCRFD_NMS_THRESHOLD)
            .into_iter()
            .map(|c| {
                let region = FaceRegion::new(c.y1 as i32, c.x2 as i32, c.y2 as i32, c.x1 as i32)
                    .clamp_to(width, height);
                LocatedFace {
                    region,
                    landmarks: c.landmarks,
                }
            })
            .filter(|f| f.region.width() > 0 && f.region.height() > 0)
            .collect();

        tracing::trace!(faces = faces.len(), "located faces");
        Ok(faces)
    }
}

/// Letterbox the frame into the 640×640 NCHW input tensor.
fn preprocess(frame: &RgbImage) -> (Array4<f32>, Letterbox) {
    let (width, height) = frame.dimensions();
    let scale = (SCRFD_INPUT_SIZE as f32 / width as f32).min(SCRFD_INPUT_SIZE as f32 / height as f32);

    let new_w = ((width as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE as u32);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE as u32);
    let pad_x = (SCRFD_INPUT_SIZE as u32 - new_w) as f32 / 2.0;
    let pad_y = (SCRFD_INPUT_SIZE as u32 - new_h) as f32 / 2.0;

    let resized = image::imageops::resize(frame, new_w, new_h, image::imageops::FilterType::Triangle);

    // Padding is left at 0.0, which is SCRFD_MEAN after normalization.
    let mut tensor = Array4::<f32>::zeros((1, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE));
    let off_x = pad_x.floor() as usize;
    let off_y = pad_y.floor() as usize;
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (tx, ty) = (off_x + x as usize, off_y + y as usize);
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    (tensor, Letterbox { scale, pad_x, pad_y })
}

/// Map output tensors to strides by name ("score_8", "bbox_16", "kps_32", ...),
/// falling back to the standard positional layout
/// [scores 8/16/32, bboxes 8/16/32, kps 8/16/32].
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let mut named = [(0, 0, 0); 3];
    for (i, &stride) in SCRFD_STRIDES.iter().enumerate() {
        match (find("score", stride), find("bbox", stride), find("kps", stride)) {
            (Some(score), Some(bbox), Some(kps)) => named[i] = (score, bbox, kps),
            _ => {
                tracing::info!(?names, "SCRFD: output names not recognized, using positional mapping");
                return [(0, 3, 6), (1, 4, 7), (2, 5, 8)];
            }
        }
    }
    named
}

/// Decode scored boxes and keypoints for a single stride level into frame
/// coordinates.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    letterbox: &Letterbox,
) -> Vec<Candidate> {
    let grid = SCRFD_INPUT_SIZE / stride;
    let num_anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let s = stride as f32;

    let mut out = Vec::new();
    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= SCRFD_SCORE_THRESHOLD {
            continue;
        }
        let off = idx * 4;
        if off + 3 >= bboxes.len() {
            continue;
        }

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let cx = (cell % grid) as f32 * s;
        let cy = (cell / grid) as f32 * s;

        let unbox_x = |v: f32| (v - letterbox.pad_x) / letterbox.scale;
        let unbox_y = |v: f32| (v - letterbox.pad_y) / letterbox.scale;

        let kps_off = idx * SCRFD_KEYPOINTS * 2;
        let landmarks = kps.get(kps_off..kps_off + SCRFD_KEYPOINTS * 2).map(|k| {
            std::array::from_fn(|i| (unbox_x(cx + k[i * 2] * s), unbox_y(cy + k[i * 2 + 1] * s)))
        });

        out.push(Candidate {
            x1: unbox_x(cx - bboxes[off] * s),
            y1: unbox_y(cy - bboxes[off + 1] * s),
            x2: unbox_x(cx + bboxes[off + 2] * s),
            y2: unbox_y(cy + bboxes[off + 3] * s),
            score,
            landmarks,
        });
    }
    out
}

/// Non-maximum suppression, highest score first.
fn nms(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    let mut keep: Vec<Candidate> = Vec::new();
    for c in candidates {
        if keep.iter().all(|k| iou(k, &c) <= iou_threshold) {
            keep.push(c);
        }
    }
    keep
}

fn iou(a: &Candidate, b: &Candidate) -> f32 {
    let inter_w = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let inter_h = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let inter = inter_w * inter_h;
    let union = (a.x2 - a.x1) * (a.y2 - a.y1) + (b.x2 - b.x1) * (b.y2 - b.y1) - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(x: f32, y: f32, w: f32, h: f32, score: f32) -> Candidate {
        Candidate { x1: x, y1: y, x2: x + w, y2: y + h, score, landmarks: None }
    }

    #[test]
    fn test_check_frame_rejects_empty() {
        let frame = RgbImage::new(0, 0);
        assert!(matches!(check_frame(&frame), Err(LocatorError::UnreadableFrame(_))));
    }

    #[test]
    fn test_check_frame_accepts_normal() {
        assert!(check_frame(&RgbImage::new(4, 3)).is_ok());
    }

    #[test]
    fn test_iou_identical() {
        let a = cand(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = cand(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = cand(5.0, 0.0, 10.0, 10.0, 1.0);
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let kept = nms(
            vec![
                cand(5.0, 5.0, 100.0, 100.0, 0.8),
                cand(0.0, 0.0, 100.0, 100.0, 0.9),
                cand(200.0, 200.0, 50.0, 50.0, 0.7),
            ],
            0.4,
        );
        assert_eq!(kept.len(), 2);
        assert!((kept[0].score - 0.9).abs() < 1e-6);
        assert!((kept[1].score - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_preprocess_letterbox_landscape() {
        let frame = RgbImage::from_pixel(320, 240, image::Rgb([128, 128, 128]));
        let (tensor, lb) = preprocess(&frame);
        assert_eq!(tensor.shape(), &[1, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE]);
        assert!((lb.scale - 2.0).abs() < 1e-6);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 80.0);
        // Padding rows normalize to zero, image rows to (128 - 127.5) / 128.
        assert_eq!(tensor[[0, 0, 10, 10]], 0.0);
        let inside = tensor[[0, 1, 320, 320]];
        assert!((inside - 0.5 / SCRFD_STD).abs() < 1e-6);
    }

    #[test]
    fn test_decode_stride_maps_to_frame() {
        let lb = Letterbox { scale: 2.0, pad_x: 0.0, pad_y: 80.0 };
        let grid = SCRFD_INPUT_SIZE / 32;
        let mut scores = vec![0.0; grid * grid * SCRFD_ANCHORS_PER_CELL];
        let mut bboxes = vec![0.0; scores.len() * 4];
        let mut kps = vec![0.0; scores.len() * 10];
        // Anchor at cell (x=5, y=5) → centre (160, 160) in model space.
        let idx = (5 * grid + 5) * SCRFD_ANCHORS_PER_CELL;
        scores[idx] = 0.9;
        bboxes[idx * 4..idx * 4 + 4].copy_from_slice(&[1.0, 1.0, 1.0, 1.0]);
        // Left eye one stride left of and above the anchor, nose on it.
        kps[idx * 10..idx * 10 + 10]
            .copy_from_slice(&[-1.0, -1.0, 1.0, -1.0, 0.0, 0.0, -0.5, 0.5, 0.5, 0.5]);

        let out = decode_stride(&scores, &bboxes, &kps, 32, &lb);
        assert_eq!(out.len(), 1);
        let c = &out[0];
        assert!((c.x1 - 64.0).abs() < 1e-4, "x1 = {}", c.x1);
        assert!((c.x2 - 96.0).abs() < 1e-4, "x2 = {}", c.x2);
        assert!((c.y1 - 24.0).abs() < 1e-4, "y1 = {}", c.y1);
        assert!((c.y2 - 56.0).abs() < 1e-4, "y2 = {}", c.y2);

        let lm = c.landmarks.unwrap();
        assert!((lm[0].0 - 64.0).abs() < 1e-4 && (lm[0].1 - 24.0).abs() < 1e-4, "{:?}", lm[0]);
        assert!((lm[1].0 - 96.0).abs() < 1e-4, "{:?}", lm[1]);
        assert!((lm[2].0 - 80.0).abs() < 1e-4 && (lm[2].1 - 40.0).abs() < 1e-4, "{:?}", lm[2]);
        assert!((lm[4].1 - 48.0).abs() < 1e-4, "{:?}", lm[4]);
    }

    #[test]
    fn test_decode_stride_without_keypoints() {
        let lb = Letterbox { scale: 1.0, pad_x: 0.0, pad_y: 0.0 };
        let grid = SCRFD_INPUT_SIZE / 32;
        let mut scores = vec![0.0; grid * grid * SCRFD_ANCHORS_PER_CELL];
        scores[0] = 0.8;
        let bboxes = vec![1.0; scores.len() * 4];

        let out = decode_stride(&scores, &bboxes, &[], 32, &lb);
        assert_eq!(out.len(), 1);
        assert!(out[0].landmarks.is_none());
    }

    #[test]
    fn test_discover_output_indices_named() {
        let names: Vec<String> = [
            "bbox_8", "score_8", "kps_8", "bbox_16", "score_16", "kps_16", "bbox_32", "score_32", "kps_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(discover_output_indices(&names), [(1, 0, 2), (4, 3, 5), (7, 6, 8)]);
    }

    #[test]
    fn test_discover_output_indices_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i: usize| i.to_string()).collect();
        assert_eq!(discover_output_indices(&names), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }
}
