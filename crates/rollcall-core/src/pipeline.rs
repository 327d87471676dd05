//! Per-frame recognition: sample → locate → encode → match → cooldown.

use crate::cooldown::{CooldownTracker, DEFAULT_COOLDOWN};
use crate::encoder::{EncoderError, FaceEncoder};
use crate::gallery::Gallery;
use crate::locator::{check_frame, FaceLocator, LocatorError};
use crate::matcher::{EuclideanMatcher, MatchThresholds, Matcher};
use crate::sampler::{FrameSampler, SamplerError, DEFAULT_FRAME_SKIP, DEFAULT_SCALE_FACTOR};
use crate::types::{Detection, Identity, MatchResult};
use image::RgbImage;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("locator error: {0}")]
    Locator(#[from] LocatorError),
    #[error("encoder error: {0}")]
    Encoder(#[from] EncoderError),
}

impl PipelineError {
    /// Whether the capture session must end. Only a frame that could not be
    /// read is terminal; inference failures skip the frame.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineError::Locator(LocatorError::UnreadableFrame(_)))
    }
}

/// Tunables of the recognition pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecognitionSettings {
    pub thresholds: MatchThresholds,
    pub cooldown: Duration,
    pub frame_skip: u32,
    pub scale_factor: f32,
}

impl Default for RecognitionSettings {
    fn default() -> Self {
        Self {
            thresholds: MatchThresholds::default(),
            cooldown: DEFAULT_COOLDOWN,
            frame_skip: DEFAULT_FRAME_SKIP,
            scale_factor: DEFAULT_SCALE_FACTOR,
        }
    }
}

/// A known match that passed the cooldown and should be recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct Emission {
    pub identity_id: String,
    pub display_name: String,
    pub confidence: f32,
}

/// Result of processing one frame.
#[derive(Debug, Clone, Default)]
pub struct FrameOutcome {
    /// False when the sampler skipped the frame.
    pub sampled: bool,
    /// One result per located face, in locator order.
    pub matches: Vec<MatchResult>,
    pub emissions: Vec<Emission>,
}

impl FrameOutcome {
    fn skipped() -> Self {
        Self::default()
    }
}

/// Owns the per-session recognition state.
pub struct FrameProcessor<L, E, M = EuclideanMatcher> {
    sampler: FrameSampler,
    locator: L,
    encoder: E,
    matcher: M,
    cooldown: CooldownTracker,
    gallery: Arc<Gallery>,
}

impl<L: FaceLocator, E: FaceEncoder> FrameProcessor<L, E, EuclideanMatcher> {
    pub fn new(
        locator: L,
        encoder: E,
        gallery: Arc<Gallery>,
        settings: RecognitionSettings,
    ) -> Result<Self, SamplerError> {
        let sampler = FrameSampler::new(settings.frame_skip, settings.scale_factor)?;
        Ok(Self {
            sampler,
            locator,
            encoder,
            matcher: EuclideanMatcher::new(settings.thresholds),
            cooldown: CooldownTracker::new(settings.cooldown),
            gallery,
        })
    }
}

impl<L: FaceLocator, E: FaceEncoder, M: Matcher> FrameProcessor<L, E, M> {
    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    pub fn sampler(&self) -> &FrameSampler {
        &self.sampler
    }

    pub fn cooldown(&self) -> &CooldownTracker {
        &self.cooldown
    }

    /// Process one captured frame observed at `now`.
    ///
    /// The frame is only read; annotation is left to the caller so drawing
    /// can never influence matching or emission.
    pub fn process(&mut self, frame: &RgbImage, now: Instant) -> Result<FrameOutcome, PipelineError> {
        if !self.sampler.tick() {
            return Ok(FrameOutcome::skipped());
        }

        check_frame(frame)?;
        let small = self.sampler.downscale(frame);
        let faces = self.locator.locate(&small)?;
        if faces.is_empty() {
            return Ok(FrameOutcome {
                sampled: true,
                ..FrameOutcome::default()
            });
        }

        let (width, height) = frame.dimensions();
        let mut detections = Vec::with_capacity(faces.len());
        for face in &faces {
            let embedding = self.encoder.encode(&small, face)?;
            detections.push(Detection {
                region: self.sampler.to_original(&face.region).clamp_to(width, height),
                embedding,
            });
        }

        let matches = self.matcher.resolve_all(&detections, &self.gallery);

        let mut emissions = Vec::new();
        for result in &matches {
            if !self.cooldown.observe(result, now) {
                continue;
            }
            if let Identity::Known {
                identity_id,
                display_name,
            } = &result.identity
            {
                tracing::info!(
                    identity = %identity_id,
                    name = %display_name,
                    confidence = format!("{:.2}", result.confidence),
                    "recognized"
                );
                emissions.push(Emission {
                    identity_id: identity_id.clone(),
                    display_name: display_name.clone(),
                    confidence: result.confidence,
                });
            }
        }

        Ok(FrameOutcome {
            sampled: true,
            matches,
            emissions,
        })
    }
}
