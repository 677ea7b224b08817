//! portrait-meta — Capture-metadata normalization and feature encoding.
//!
//! Turns loosely-typed photo metadata (EXIF fields, GPS, location, camera
//! settings) into the fixed-length vector the attribute models consume.

pub mod encoder;
pub mod metadata;
pub mod schema;

pub use encoder::{FeatureVector, MetadataEncoder};
pub use metadata::{parse_datetime, CaptureMetadata, GpsPosition};
pub use schema::{FeatureSchema, SchemaError};
