//! portrait-core — Face types, identity gallery, and face-quality scoring.
//!
//! Detection and embedding happen upstream; this crate consumes their output
//! (bounding box, embedding, raw attributes, landmarks).

pub mod filters;
pub mod gallery;
pub mod persist;
pub mod quality;
pub mod types;

pub use gallery::{EnrollmentSnapshot, Gallery, GalleryError, MatchResult};
pub use quality::{QualityBreakdown, QualityScore, QualityScorer, QualityWeights};
pub use types::{BoundingBox, DetectedFace, Embedding, Gender, Pose};
