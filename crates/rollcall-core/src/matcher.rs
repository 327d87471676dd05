//! Gallery matching: nearest enrolled embedding with a tolerance gate and a
//! confidence floor.

use crate::gallery::Gallery;
use crate::types::{Detection, Identity, MatchResult};

const DEFAULT_TOLERANCE: f32 = 0.6;
const DEFAULT_MIN_CONFIDENCE: f32 = 0.5;

/// Thresholds applied by [`EuclideanMatcher`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchThresholds {
    /// Maximum distance for an entry to count as a candidate. Lower is stricter.
    pub tolerance: f32,
    /// Minimum `1 - distance` of the nearest entry for a known match.
    pub min_confidence: f32,
}

impl Default for MatchThresholds {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }
}

/// Strategy for resolving detections against a gallery of enrolled faces.
pub trait Matcher {
    fn resolve(&self, detection: &Detection, gallery: &Gallery) -> MatchResult;

    /// Resolve every detection of a frame, preserving order.
    fn resolve_all(&self, detections: &[Detection], gallery: &Gallery) -> Vec<MatchResult> {
        detections
            .iter()
            .map(|detection| self.resolve(detection, gallery))
            .collect()
    }
}

/// Euclidean-distance matcher.
///
/// Always visits every gallery entry. An entry is a candidate when its
/// distance is within `tolerance`; the nearest entry overall supplies the
/// identity and confidence, and is accepted only if it is itself a candidate
/// and its confidence clears `min_confidence`.
#[derive(Debug, Clone, Default)]
pub struct EuclideanMatcher {
    thresholds: MatchThresholds,
}

impl EuclideanMatcher {
    pub fn new(thresholds: MatchThresholds) -> Self {
        Self { thresholds }
    }
}

impl Matcher for EuclideanMatcher {
    fn resolve(&self, detection: &Detection, gallery: &Gallery) -> MatchResult {
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;
        let mut any_candidate = false;

        for (i, entry) in gallery.entries().iter().enumerate() {
            let Some(dist) = detection.embedding.euclidean_distance(&entry.embedding) else {
                continue;
            };
            if dist <= self.thresholds.tolerance {
                any_candidate = true;
            }
            // Strict comparison: the first of equally-near entries wins.
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        if !any_candidate {
            if !gallery.is_empty() && best_idx.is_none() {
                tracing::debug!(
                    detection_dim = detection.embedding.dimension(),
                    gallery_dim = ?gallery.dimension(),
                    "detection dimension does not match gallery"
                );
            }
            return MatchResult::unknown(detection.region, 0.0);
        }

        let Some(idx) = best_idx else {
            return MatchResult::unknown(detection.region, 0.0);
        };
        let confidence = (1.0 - best_dist).clamp(0.0, 1.0);
        let best_is_candidate = best_dist <= self.thresholds.tolerance;

        if best_is_candidate && confidence >= self.thresholds.min_confidence {
            let entry = &gallery.entries()[idx];
            MatchResult {
                identity: Identity::Known {
                    identity_id: entry.identity_id.clone(),
                    display_name: entry.display_name.clone(),
                },
                confidence,
                region: detection.region,
            }
        } else {
            MatchResult::unknown(detection.region, confidence)
        }
    }
}
