//! ArcFace face encoder via ONNX Runtime.
//!
//! Aligns a located face to the canonical 112×112 ArcFace crop using its
//! landmarks and extracts an L2-normalized embedding. Faces without
//! landmarks fall back to a resized bounding-box crop.

use crate::align::{align_face, ALIGNED_SIZE};
use crate::types::{Embedding, FaceRegion, LocatedFace};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const ARCFACE_INPUT_SIZE: u32 = ALIGNED_SIZE;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // ArcFace uses symmetric normalization
const ARCFACE_EMBEDDING_DIM: usize = 512;

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("face region {0:?} is empty after clamping to the frame")]
    EmptyRegion(FaceRegion),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Turns a located face into an embedding.
pub trait FaceEncoder {
    fn encode(&mut self, frame: &RgbImage, face: &LocatedFace) -> Result<Embedding, EncoderError>;
}

pub struct ArcFaceEncoder {
    session: Session,
}

impl ArcFaceEncoder {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, EncoderError> {
        if !model_path.exists() {
            return Err(EncoderError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    pub fn dimension(&self) -> usize {
        ARCFACE_EMBEDDING_DIM
    }
}

impl FaceEncoder for ArcFaceEncoder {
    fn encode(&mut self, frame: &RgbImage, face: &LocatedFace) -> Result<Embedding, EncoderError> {
        let crop = face_crop(frame, face)?;
        let input = preprocess(&crop);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EncoderError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(EncoderError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding::new(l2_normalize(raw)))
    }
}

/// The 112×112 model input for a face: aligned when landmarks are known.
fn face_crop(frame: &RgbImage, face: &LocatedFace) -> Result<RgbImage, EncoderError> {
    if let Some(aligned) = face.landmarks.and_then(|lm| align_face(frame, &lm)) {
        return Ok(aligned);
    }
    tracing::debug!(region = ?face.region, "no usable landmarks, encoding unaligned crop");
    crop_face(frame, &face.region)
}

/// Crop `region` out of `frame` and resize it to the model input size.
fn crop_face(frame: &RgbImage, region: &FaceRegion) -> Result<RgbImage, EncoderError> {
    let r = region.clamp_to(frame.width(), frame.height());
    if r.width() == 0 || r.height() == 0 {
        return Err(EncoderError::EmptyRegion(*region));
    }
    let crop = imageops::crop_imm(frame, r.left as u32, r.top as u32, r.width() as u32, r.height() as u32)
        .to_image();
    Ok(imageops::resize(&crop, ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE, FilterType::Triangle))
}

/// Normalize a 112×112 RGB crop into a NCHW float tensor.
fn preprocess(face: &RgbImage) -> Array4<f32> {
    let size = ARCFACE_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in face.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
        }
    }
    tensor
}

fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw.to_vec()
    }
}
