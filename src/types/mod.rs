//! Type definitions for the complaint classification service

pub mod complaint;
pub mod report;

pub use complaint::{BufferRecord, Complaint, Prediction};
pub use report::{DriftReport, FeatureDrift, FeatureKind};
