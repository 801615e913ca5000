//! Complaint Classification Service Library
//!
//! Classifies consumer complaint narratives into product categories behind an
//! API key, hot-swaps the serving model from a versioned registry, and
//! watches the stream of served predictions for data drift against the
//! training corpus.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod feature_extractor;
pub mod metrics;
pub mod models;
pub mod monitoring;
pub mod server;
pub mod text;
pub mod types;

pub use api::{ApiError, ApiService, Reply};
pub use config::AppConfig;
pub use feature_extractor::FeatureVectorizer;
pub use models::{ModelHolder, ModelIdentifier, ModelRegistry};
pub use monitoring::DataMonitor;
pub use server::RequestServer;
pub use types::{BufferRecord, Complaint, DriftReport, Prediction};
