//! rollcall-core — Face matching and de-duplication engine.
//!
//! Locates faces with SCRFD, aligns them on their landmarks and encodes them
//! with ArcFace (both via ONNX Runtime), matches embeddings against an
//! enrolled gallery and throttles repeat recognitions of the same person.

pub mod align;
pub mod annotate;
pub mod cooldown;
pub mod encoder;
pub mod gallery;
pub mod locator;
pub mod matcher;
pub mod pipeline;
pub mod sampler;
pub mod types;

pub use annotate::Annotator;
pub use cooldown::CooldownTracker;
pub use encoder::{ArcFaceEncoder, EncoderError, FaceEncoder};
pub use gallery::{Gallery, GalleryError};
pub use locator::{FaceLocator, LocatorError, ScrfdLocator};
pub use matcher::{EuclideanMatcher, MatchThresholds, Matcher};
pub use pipeline::{Emission, FrameOutcome, FrameProcessor, PipelineError, RecognitionSettings};
pub use sampler::{FrameSampler, SamplerError};
pub use types::{
    Detection, Embedding, FaceRegion, GalleryEntry, Identity, Landmarks, LocatedFace, MatchResult,
};
