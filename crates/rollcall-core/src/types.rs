use serde::{Deserialize, Serialize};

/// Face bounding region in pixel coordinates, ordered (top, right, bottom, left).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub left: i32,
}

impl FaceRegion {
    pub fn new(top: i32, right: i32, bottom: i32, left: i32) -> Self {
        Self { top, right, bottom, left }
    }

    pub fn width(&self) -> i32 {
        (self.right - self.left).max(0)
    }

    pub fn height(&self) -> i32 {
        (self.bottom - self.top).max(0)
    }

    /// Map a region found in a frame downscaled by `scale` back to the
    /// original frame. Coordinates are truncated to whole pixels.
    pub fn rescale(&self, scale: f32) -> Self {
        let up = |v: i32| (v as f32 / scale) as i32;
        Self {
            top: up(self.top),
            right: up(self.right),
            bottom: up(self.bottom),
            left: up(self.left),
        }
    }

    /// Clamp the region to a `width` × `height` frame.
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        let max_x = width as i32;
        let max_y = height as i32;
        Self {
            top: self.top.clamp(0, max_y),
            right: self.right.clamp(0, max_x),
            bottom: self.bottom.clamp(0, max_y),
            left: self.left.clamp(0, max_x),
        }
    }
}

/// Five facial landmarks in pixel coordinates: left eye, right eye, nose,
/// left mouth corner, right mouth corner.
pub type Landmarks = [(f32, f32); 5];

/// A face found by the locator.
///
/// Landmarks, when the locator provides them, are only used to align the
/// face for encoding and live in the same coordinates as `region`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocatedFace {
    pub region: FaceRegion,
    pub landmarks: Option<Landmarks>,
}

impl LocatedFace {
    pub fn new(region: FaceRegion) -> Self {
        Self {
            region,
            landmarks: None,
        }
    }

    pub fn with_landmarks(region: FaceRegion, landmarks: Landmarks) -> Self {
        Self {
            region,
            landmarks: Some(landmarks),
        }
    }
}

/// Face embedding vector produced by the encoder or loaded from the gallery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// Compute Euclidean distance between two embeddings.
    ///
    /// Returns `None` when the dimensionalities differ.
    pub fn euclidean_distance(&self, other: &Embedding) -> Option<f32> {
        if self.values.len() != other.values.len() {
            return None;
        }
        let sum = self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>();
        Some(sum.sqrt())
    }
}

/// One enrolled face: who it belongs to and its reference embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GalleryEntry {
    pub identity_id: String,
    pub display_name: String,
    pub embedding: Embedding,
}

/// A located face and its embedding, for one frame.
#[derive(Debug, Clone)]
pub struct Detection {
    /// Region in original-frame coordinates.
    pub region: FaceRegion,
    pub embedding: Embedding,
}

/// Who a detection resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Identity {
    Known {
        identity_id: String,
        display_name: String,
    },
    Unknown,
}

/// Outcome of matching one detection against the gallery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub identity: Identity,
    /// `1 - distance` of the nearest gallery entry, in [0, 1].
    pub confidence: f32,
    pub region: FaceRegion,
}

impl MatchResult {
    pub fn unknown(region: FaceRegion, confidence: f32) -> Self {
        Self {
            identity: Identity::Unknown,
            confidence,
            region,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self.identity, Identity::Known { .. })
    }

    /// Identity id of a known match, `None` when unknown.
    pub fn identity_id(&self) -> Option<&str> {
        match &self.identity {
            Identity::Known { identity_id, .. } => Some(identity_id),
            Identity::Unknown => None,
        }
    }

    /// Overlay label: `"Name (ID)"` for known faces, `"Unknown"` otherwise.
    pub fn label(&self) -> String {
        match &self.identity {
            Identity::Known {
                identity_id,
                display_name,
            } => format!("{display_name} ({identity_id})"),
            Identity::Unknown => "Unknown".to_string(),
        }
    }
}
