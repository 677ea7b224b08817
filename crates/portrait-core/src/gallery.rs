//! Identity gallery: enrolled people, their embeddings, and enrollment snapshots.
//!
//! Matching scores each person by the mean cosine similarity of the query
//! against every embedding that person owns, so a consistently similar
//! enrollment set beats a single lucky sample.

use crate::persist::write_atomic;
use crate::types::{Embedding, Gender};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Score reported when no person has a single embedding to compare against.
pub const NO_MATCH_SCORE: f32 = -1.0;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("gallery io: {0}")]
    Io(#[from] std::io::Error),
    #[error("gallery file is not a valid container: {0}")]
    Format(#[from] serde_json::Error),
    #[error("embedding for {name} has dimension {actual}, gallery uses {expected}")]
    DimensionMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("refusing to enroll an empty embedding for {0}")]
    EmptyEmbedding(String),
    #[error("embedding for {0} contains NaN or infinite values")]
    NonFinite(String),
}

/// Attributes captured alongside an embedding at enrollment time.
///
/// Unknown keys are kept in `extra` so a load/save cycle never drops data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<Gender>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_image: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Result of matching a query embedding against the gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Name of the accepted identity, `None` when the best score is under threshold.
    pub name: Option<String>,
    /// Best mean similarity found, reported even on rejection.
    pub score: f32,
}

impl MatchResult {
    pub fn matched(&self) -> bool {
        self.name.is_some()
    }
}

/// On-disk container. The legacy form is a bare name → embeddings mapping.
#[derive(Deserialize)]
#[serde(untagged)]
enum GalleryFile {
    Current {
        people: BTreeMap<String, Vec<Embedding>>,
        #[serde(default)]
        metadata: BTreeMap<String, Vec<EnrollmentSnapshot>>,
    },
    Legacy(BTreeMap<String, Vec<Vec<f32>>>),
}

#[derive(Serialize)]
struct GalleryFileRef<'a> {
    people: &'a BTreeMap<String, Vec<Embedding>>,
    metadata: &'a BTreeMap<String, Vec<EnrollmentSnapshot>>,
}

/// Enrolled identities keyed by unique name.
///
/// The embeddings list is authoritative for matching; the snapshot list is
/// sized independently and may be empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gallery {
    people: BTreeMap<String, Vec<Embedding>>,
    metadata: BTreeMap<String, Vec<EnrollmentSnapshot>>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an embedding (and optional snapshot) to a person, creating them if new.
    pub fn add(
        &mut self,
        name: &str,
        embedding: Embedding,
        snapshot: Option<EnrollmentSnapshot>,
    ) -> Result<(), GalleryError> {
        if embedding.values.is_empty() {
            return Err(GalleryError::EmptyEmbedding(name.to_string()));
        }
        // JSON has no NaN/inf; they would serialize as null and break reloading.
        if !embedding.is_finite() {
            return Err(GalleryError::NonFinite(name.to_string()));
        }
        if let Some(expected) = self.dim() {
            if embedding.dim() != expected {
                return Err(GalleryError::DimensionMismatch {
                    name: name.to_string(),
                    expected,
                    actual: embedding.dim(),
                });
            }
        }

        self.people.entry(name.to_string()).or_default().push(embedding);
        if let Some(snapshot) = snapshot {
            self.annotate(name, snapshot);
        }
        Ok(())
    }

    /// Attach a snapshot without an embedding. The person becomes known but
    /// stays unmatchable until an embedding is added.
    pub fn annotate(&mut self, name: &str, snapshot: EnrollmentSnapshot) {
        self.people.entry(name.to_string()).or_default();
        self.metadata.entry(name.to_string()).or_default().push(snapshot);
    }

    /// Remove a person and everything stored for them. Returns whether they existed.
    pub fn remove(&mut self, name: &str) -> bool {
        let had_people = self.people.remove(name).is_some();
        let had_metadata = self.metadata.remove(name).is_some();
        had_people || had_metadata
    }

    /// Embedding dimension of the gallery, if anything is enrolled.
    pub fn dim(&self) -> Option<usize> {
        self.people.values().flatten().map(Embedding::dim).next()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.people.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.people.len()
    }

    pub fn is_empty(&self) -> bool {
        self.people.is_empty()
    }

    pub fn embeddings(&self, name: &str) -> &[Embedding] {
        self.people.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn embedding_count(&self, name: &str) -> usize {
        self.embeddings(name).len()
    }

    pub fn person_metadata(&self, name: &str) -> &[EnrollmentSnapshot] {
        self.metadata.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Find the person with the highest mean similarity to `query`.
    ///
    /// People without embeddings are skipped. Only stored embeddings of the
    /// query's dimension are compared, so a query from a different model
    /// matches nobody. The best score is always reported; the name only when
    /// it reaches `threshold` (inclusive).
    pub fn match_embedding(&self, query: &Embedding, threshold: f32) -> MatchResult {
        let mut best_name: Option<&str> = None;
        let mut best_score = NO_MATCH_SCORE;

        if query.values.is_empty() || !query.is_finite() {
            tracing::warn!(dim = query.dim(), "unusable query embedding");
            return MatchResult { name: None, score: best_score };
        }

        for (name, embeddings) in &self.people {
            let (sum, count) = embeddings
                .iter()
                .filter(|e| e.dim() == query.dim())
                .fold((0.0f32, 0usize), |(sum, count), e| (sum + query.similarity(e), count + 1));
            if count == 0 {
                if !embeddings.is_empty() {
                    tracing::debug!(name = %name, dim = query.dim(), "no embeddings of the query dimension");
                }
                continue;
            }
            let mean = sum / count as f32;
            if best_name.is_none() || mean > best_score {
                best_score = mean;
                best_name = Some(name.as_str());
            }
        }

        let name = match best_name {
            Some(name) if best_score >= threshold => Some(name.to_string()),
            _ => None,
        };
        tracing::debug!(score = best_score, matched = name.is_some(), "gallery match");
        MatchResult { name, score: best_score }
    }

    /// Write the full gallery as a single JSON container, replacing the
    /// previous file atomically.
    pub fn save(&self, path: &Path) -> Result<(), GalleryError> {
        let file = GalleryFileRef {
            people: &self.people,
            metadata: &self.metadata,
        };
        write_atomic(path, &serde_json::to_vec(&file)?)?;
        tracing::info!(
            path = %path.display(),
            people = self.people.len(),
            "gallery saved"
        );
        Ok(())
    }

    /// Load a gallery, accepting both the current and the legacy container.
    pub fn load(path: &Path) -> Result<Self, GalleryError> {
        let bytes = std::fs::read(path)?;
        let gallery = Self::from_slice(&bytes)?;
        tracing::info!(
            path = %path.display(),
            people = gallery.people.len(),
            "gallery loaded"
        );
        Ok(gallery)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, GalleryError> {
        let gallery = match serde_json::from_slice::<GalleryFile>(bytes)? {
            GalleryFile::Current { people, metadata } => Self { people, metadata },
            GalleryFile::Legacy(raw) => {
                tracing::info!("legacy gallery container without metadata");
                let people = raw
                    .into_iter()
                    .map(|(name, embs)| (name, embs.into_iter().map(Embedding::new).collect()))
                    .collect();
                Self {
                    people,
                    metadata: BTreeMap::new(),
                }
            }
        };
        Ok(gallery)
    }
}
