//! Temporal and spatial frame sampling.

use crate::types::FaceRegion;
use image::imageops::{self, FilterType};
use image::RgbImage;
use thiserror::Error;

pub const DEFAULT_FRAME_SKIP: u32 = 2;
pub const DEFAULT_SCALE_FACTOR: f32 = 0.5;

#[derive(Error, Debug, PartialEq)]
pub enum SamplerError {
    #[error("scale factor must be in (0, 1], got {0}")]
    InvalidScale(f32),
}

/// Decides which frames are processed and at what resolution.
///
/// Frames are counted from 1; every `every_nth` frame is accepted. Accepted
/// frames are downscaled by `scale` before faces are located, and located
/// regions are mapped back to original-frame coordinates.
#[derive(Debug, Clone)]
pub struct FrameSampler {
    every_nth: u32,
    scale: f32,
    frame_count: u64,
}

impl Default for FrameSampler {
    fn default() -> Self {
        Self {
            every_nth: DEFAULT_FRAME_SKIP,
            scale: DEFAULT_SCALE_FACTOR,
            frame_count: 0,
        }
    }
}

impl FrameSampler {
    /// `every_nth` of 0 is treated as 1 (process every frame).
    pub fn new(every_nth: u32, scale: f32) -> Result<Self, SamplerError> {
        if !scale.is_finite() || scale <= 0.0 || scale > 1.0 {
            return Err(SamplerError::InvalidScale(scale));
        }
        Ok(Self {
            every_nth: every_nth.max(1),
            scale,
            frame_count: 0,
        })
    }

    pub fn every_nth(&self) -> u32 {
        self.every_nth
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Whether the frame with the given 1-based index is processed.
    pub fn accepts(&self, frame_index: u64) -> bool {
        frame_index % u64::from(self.every_nth) == 0
    }

    /// Count one incoming frame and report whether it is processed.
    pub fn tick(&mut self) -> bool {
        self.frame_count += 1;
        self.accepts(self.frame_count)
    }

    /// Downscale an accepted frame for face location.
    pub fn downscale(&self, frame: &RgbImage) -> RgbImage {
        if self.scale >= 1.0 {
            return frame.clone();
        }
        let width = ((frame.width() as f32 * self.scale).round() as u32).max(1);
        let height = ((frame.height() as f32 * self.scale).round() as u32).max(1);
        imageops::resize(frame, width, height, FilterType::Triangle)
    }

    /// Map a region from downscaled coordinates back to the original frame.
    pub fn to_original(&self, region: &FaceRegion) -> FaceRegion {
        region.rescale(self.scale)
    }
}
