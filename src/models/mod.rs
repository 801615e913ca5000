//! Model registry, artifacts and the serving holder

pub mod artifact;
pub mod holder;
pub mod identifier;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod registry;

pub use artifact::{Classifier, LinearModelSpec, LinearTextClassifier};
pub use holder::{ActiveModel, ModelHolder};
pub use identifier::{ModelIdentifier, Stage, VersionSelector};
pub use registry::ModelRegistry;
