//! Enrolled face gallery.
//!
//! Loaded once per session from the JSON artifact written by the enrollment
//! tooling, then shared read-only behind an `Arc`.

use crate::types::{Embedding, GalleryEntry};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("failed to read gallery artifact {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("malformed gallery artifact: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("gallery arrays are not parallel: {encodings} encodings, {ids} ids, {names} names")]
    LengthMismatch {
        encodings: usize,
        ids: usize,
        names: usize,
    },
    #[error("entry {index} has a {actual}-dim embedding, expected {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },
    #[error("entry {index} has an empty embedding")]
    EmptyEmbedding { index: usize },
}

/// On-disk layout: three parallel arrays plus provenance we don't interpret.
#[derive(Debug, Deserialize)]
struct GalleryArtifact {
    encodings: Vec<Vec<f32>>,
    ids: Vec<String>,
    names: Vec<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    total_faces: Option<usize>,
}

/// Immutable, ordered collection of enrolled faces.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a gallery from entries, rejecting mixed embedding dimensions.
    pub fn from_entries(entries: Vec<GalleryEntry>) -> Result<Self, GalleryError> {
        let mut expected: Option<usize> = None;
        for (index, entry) in entries.iter().enumerate() {
            let actual = entry.embedding.dimension();
            if actual == 0 {
                return Err(GalleryError::EmptyEmbedding { index });
            }
            match expected {
                None => expected = Some(actual),
                Some(expected) if expected != actual => {
                    return Err(GalleryError::DimensionMismatch {
                        index,
                        expected,
                        actual,
                    });
                }
                Some(_) => {}
            }
        }
        Ok(Self { entries })
    }

    /// Build a gallery from the artifact's parallel arrays.
    pub fn from_parallel(
        encodings: Vec<Vec<f32>>,
        ids: Vec<String>,
        names: Vec<String>,
    ) -> Result<Self, GalleryError> {
        if encodings.len() != ids.len() || ids.len() != names.len() {
            return Err(GalleryError::LengthMismatch {
                encodings: encodings.len(),
                ids: ids.len(),
                names: names.len(),
            });
        }

        let entries = encodings
            .into_iter()
            .zip(ids)
            .zip(names)
            .map(|((values, identity_id), display_name)| GalleryEntry {
                identity_id,
                display_name,
                embedding: Embedding::new(values),
            })
            .collect();

        Self::from_entries(entries)
    }

    /// Parse a gallery from the JSON artifact text.
    pub fn from_json(text: &str) -> Result<Self, GalleryError> {
        let artifact: GalleryArtifact = serde_json::from_str(text)?;
        tracing::debug!(
            created_at = ?artifact.created_at,
            total_faces = ?artifact.total_faces,
            "gallery artifact provenance"
        );
        Self::from_parallel(artifact.encodings, artifact.ids, artifact.names)
    }

    /// Load the gallery artifact from disk.
    pub fn load(path: &Path) -> Result<Self, GalleryError> {
        let text = std::fs::read_to_string(path).map_err(|source| GalleryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let gallery = Self::from_json(&text)?;
        tracing::info!(
            path = %path.display(),
            entries = gallery.len(),
            identities = gallery.identity_count(),
            "loaded face gallery"
        );
        Ok(gallery)
    }

    /// Load the gallery, falling back to an empty one on any failure.
    ///
    /// Every face resolves to "unknown" against an empty gallery, so the
    /// session stays usable for manual attendance.
    pub fn load_or_empty(path: &Path) -> Self {
        match Self::load(path) {
            Ok(gallery) => gallery,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "gallery unavailable; every face will be reported as unknown"
                );
                Self::empty()
            }
        }
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Embedding dimensionality shared by all entries, `None` when empty.
    pub fn dimension(&self) -> Option<usize> {
        self.entries.first().map(|e| e.embedding.dimension())
    }

    /// Number of distinct identities (several entries may share one id).
    pub fn identity_count(&self) -> usize {
        self.entries
            .iter()
            .map(|e| e.identity_id.as_str())
            .collect::<HashSet<_>>()
            .len()
    }
}
