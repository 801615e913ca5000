//! Endpoint contracts: predict and model management.
//!
//! Transport-independent. Handlers take the presented credential and the raw
//! request body and return either a response body or an [`ApiError`] that
//! carries the status code to reply with.

use crate::auth::HashedCredential;
use crate::error::{AuthError, PredictionError, ResolutionError};
use crate::metrics::ServiceMetrics;
use crate::models::{ModelHolder, ModelIdentifier, ModelRegistry, VersionSelector};
use crate::monitoring::DataMonitor;
use crate::types::{Complaint, Prediction};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info, warn};

/// Errors surfaced to API callers
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Unauthorized(#[from] AuthError),

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Prediction(PredictionError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    /// HTTP-style status code
    pub fn status(&self) -> u16 {
        match self {
            ApiError::Unauthorized(_) => 401,
            ApiError::BadRequest(_) => 400,
            ApiError::Prediction(_) | ApiError::Resolution(_) | ApiError::Internal(_) => 500,
        }
    }

    /// Message returned to the caller
    pub fn detail(&self) -> String {
        match self {
            // Never reveal why a credential was rejected
            ApiError::Unauthorized(_) => AuthError::InvalidCredential.to_string(),
            other => other.to_string(),
        }
    }
}

impl From<PredictionError> for ApiError {
    fn from(e: PredictionError) -> Self {
        match e {
            PredictionError::EmptyInput => ApiError::BadRequest(e.to_string()),
            other => ApiError::Prediction(other),
        }
    }
}

/// Body of a model management request. No version reloads the serving stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManageRequest {
    #[serde(default)]
    pub version: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManageResponse {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub detail: String,
}

/// Reply envelope published back to the requester
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub body: serde_json::Value,
}

impl Reply {
    /// Successful reply carrying `body`
    pub fn ok<T: Serialize>(body: &T) -> Self {
        match serde_json::to_value(body) {
            Ok(body) => Self { status: 200, body },
            Err(e) => Self::from_error(&ApiError::Internal(e.to_string())),
        }
    }

    /// Error reply with the status and detail of `err`
    pub fn from_error(err: &ApiError) -> Self {
        Self {
            status: err.status(),
            body: serde_json::json!({ "detail": err.detail() }),
        }
    }

    /// Reply for either outcome of a handler
    pub fn from_result<T: Serialize>(result: Result<T, ApiError>) -> Self {
        match result {
            Ok(body) => Self::ok(&body),
            Err(err) => Self::from_error(&err),
        }
    }

    /// Serialized envelope
    pub fn to_bytes(&self) -> Vec<u8> {
        // Value-only envelope cannot fail to serialize
        serde_json::to_vec(self).unwrap_or_default()
    }
}

/// Request handlers shared by every in-flight request
pub struct ApiService {
    credential: HashedCredential,
    holder: Arc<ModelHolder>,
    registry: ModelRegistry,
    /// Identifier reloaded when a manage request names no version
    serving_id: ModelIdentifier,
    monitor: Arc<DataMonitor>,
    metrics: Arc<ServiceMetrics>,
}

impl ApiService {
    /// Create a new service over the shared model holder and monitor
    pub fn new(
        credential: HashedCredential,
        holder: Arc<ModelHolder>,
        registry: ModelRegistry,
        serving_id: ModelIdentifier,
        monitor: Arc<DataMonitor>,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self {
            credential,
            holder,
            registry,
            serving_id,
            monitor,
            metrics,
        }
    }

    /// Holder serving predictions
    pub fn holder(&self) -> &Arc<ModelHolder> {
        &self.holder
    }

    fn authorize(&self, api_key: Option<&str>) -> Result<(), ApiError> {
        self.credential.authorize(api_key).map_err(|e| {
            ServiceMetrics::incr(&self.metrics.auth_failures);
            warn!("Rejected request with invalid API key");
            ApiError::from(e)
        })
    }

    /// Classify a complaint and hand the observation to the monitor.
    pub fn predict(&self, api_key: Option<&str>, body: &[u8]) -> Result<Prediction, ApiError> {
        let start = Instant::now();
        self.authorize(api_key)?;

        let complaint: Complaint = serde_json::from_slice(body)
            .map_err(|e| ApiError::BadRequest(format!("invalid predict request: {}", e)))?;
        if complaint.is_blank() {
            return Err(PredictionError::EmptyInput.into());
        }

        let prediction = self.holder.predict(&complaint.text).map_err(|e| {
            if let PredictionError::Model(reason) = &e {
                ServiceMetrics::incr(&self.metrics.prediction_failures);
                error!(reason = %reason, "Prediction failed");
            }
            ApiError::from(e)
        })?;

        // Only successful predictions are observed
        self.monitor.collect(&complaint.text, &prediction.category);
        self.metrics
            .record_prediction(&prediction.category, start.elapsed());

        Ok(prediction)
    }

    /// Reload the serving model, by version or from the serving stage.
    pub async fn manage_model(
        &self,
        api_key: Option<&str>,
        body: &[u8],
    ) -> Result<ManageResponse, ApiError> {
        self.authorize(api_key)?;

        let request: ManageRequest = if body.iter().all(u8::is_ascii_whitespace) {
            ManageRequest::default()
        } else {
            serde_json::from_slice(body)
                .map_err(|e| ApiError::BadRequest(format!("invalid manage request: {}", e)))?
        };

        let id = match request.version {
            Some(version) => self.serving_id.with_selector(VersionSelector::Version(version)),
            None => self.serving_id.clone(),
        };
        info!(model = %id, "Model reload requested");

        // Loading happens off the async workers; the swap itself is instant
        let holder = Arc::clone(&self.holder);
        let registry = self.registry.clone();
        let load_id = id.clone();
        let reloaded = tokio::task::spawn_blocking(move || holder.reload(&registry, &load_id))
            .await
            .map_err(|e| ApiError::Internal(format!("reload task failed: {}", e)))?;

        let active = reloaded.map_err(|e| {
            ServiceMetrics::incr(&self.metrics.reload_failures);
            error!(model = %id, error = %e, "Model reload failed, keeping current model");
            ApiError::from(e)
        })?;
        let version = active.version;
        ServiceMetrics::incr(&self.metrics.reloads);

        Ok(ManageResponse {
            message: format!("Model version {} reloaded for predictions", version),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WindowSource;
    use crate::feature_extractor::FeatureVectorizer;
    use crate::models::artifact::tests::sample_spec;
    use crate::models::registry::write_linear_version;
    use crate::models::Stage;
    use crate::monitoring::{
        DriftAnalyzer, DriftSettings, FsArtifactSink, LogAppender, MonitorHandle, MonitorWorker,
        ReferenceDataset,
    };
    use crate::types::BufferRecord;
    use std::path::Path;
    use std::time::Duration;

    const KEY: &str = "mysecretkey";
    const NAME: &str = "CustomerComplaintsModel";

    fn service(dir: &Path) -> (ApiService, MonitorHandle) {
        let registry_dir = dir.join("registry");
        write_linear_version(&registry_dir, NAME, 1, Stage::Production, &sample_spec()).unwrap();
        write_linear_version(&registry_dir, NAME, 2, Stage::Staging, &sample_spec()).unwrap();
        let registry = ModelRegistry::new(&registry_dir);

        let serving_id = ModelIdentifier::parse("models:/CustomerComplaintsModel/production").unwrap();
        let holder = Arc::new(ModelHolder::new(registry.load(&serving_id).unwrap()));

        let reference = vec![
            BufferRecord::new("loan payment", "Loan"),
            BufferRecord::new("credit card", "Credit card"),
        ];
        let vectorizer = Arc::new(FeatureVectorizer::fit(
            reference.iter().map(|r| r.narrative.as_str()),
            100,
        ));
        let dataset = ReferenceDataset::build(&vectorizer, &reference);
        let metrics = Arc::new(ServiceMetrics::new());
        let (monitor, handle) = DataMonitor::spawn(
            3,
            MonitorWorker {
                appender: Arc::new(LogAppender::new(dir.join("log.csv"))),
                analyzer: Arc::new(DriftAnalyzer::new(
                    vectorizer,
                    dataset,
                    DriftSettings::default(),
                )),
                sink: Arc::new(FsArtifactSink::new(dir.join("reports"))),
                metrics: Arc::clone(&metrics),
                window: WindowSource::Log,
                window_rows: 100,
                retry_delay: Duration::from_millis(10),
            },
        );

        let service = ApiService::new(
            HashedCredential::from_secret(KEY),
            holder,
            registry,
            serving_id,
            Arc::new(monitor),
            metrics,
        );
        (service, handle)
    }

    fn body(text: &str) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({ "text": text })).unwrap()
    }

    #[tokio::test]
    async fn test_predict_loan_complaint() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _handle) = service(dir.path());

        let prediction = service
            .predict(Some(KEY), &body("I have an issue with my loan."))
            .unwrap();
        assert!(!prediction.category.is_empty());
        assert_eq!(prediction.category, "Loan");
        assert_eq!(service.monitor.buffered(), 1);

        let reply = Reply::from_result(Ok::<_, ApiError>(prediction));
        assert_eq!(reply.status, 200);
        assert_eq!(reply.body, serde_json::json!({ "category": "Loan" }));
    }

    #[tokio::test]
    async fn test_predict_rejects_bad_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _handle) = service(dir.path());

        for key in [Some("wrong"), Some(""), None] {
            let err = service.predict(key, &body("my loan")).unwrap_err();
            assert_eq!(err.status(), 401);
            assert_eq!(err.detail(), "Invalid API Key");
        }
        assert_eq!(ServiceMetrics::get(&service.metrics.auth_failures), 3);
        // Rejected requests are never observed
        assert_eq!(service.monitor.buffered(), 0);
    }

    #[tokio::test]
    async fn test_predict_rejects_malformed_requests() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _handle) = service(dir.path());

        assert_eq!(service.predict(Some(KEY), b"not json").unwrap_err().status(), 400);
        assert_eq!(service.predict(Some(KEY), &body("   ")).unwrap_err().status(), 400);
        assert_eq!(service.monitor.buffered(), 0);
    }

    #[tokio::test]
    async fn test_reload_to_version() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _handle) = service(dir.path());
        assert_eq!(service.holder().version(), 1);

        let response = service
            .manage_model(Some(KEY), br#"{"version": 2}"#)
            .await
            .unwrap();
        assert_eq!(response.message, "Model version 2 reloaded for predictions");
        assert_eq!(service.holder().version(), 2);
        assert_eq!(service.holder().predict("my loan").unwrap().model_version, 2);

        // Empty body goes back to the serving stage
        let response = service.manage_model(Some(KEY), b"").await.unwrap();
        assert_eq!(response.message, "Model version 1 reloaded for predictions");
    }

    #[tokio::test]
    async fn test_reload_missing_version_keeps_model() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _handle) = service(dir.path());

        let err = service
            .manage_model(Some(KEY), br#"{"version": 42}"#)
            .await
            .unwrap_err();
        assert_eq!(err.status(), 500);
        assert!(err.detail().contains("models:/CustomerComplaintsModel/42"));

        assert_eq!(service.holder().version(), 1);
        let prediction = service
            .predict(Some(KEY), &body("I have an issue with my loan."))
            .unwrap();
        assert_eq!(prediction.model_version, 1);
    }

    #[tokio::test]
    async fn test_manage_requires_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _handle) = service(dir.path());

        let err = service.manage_model(Some("nope"), b"").await.unwrap_err();
        assert_eq!(err.status(), 401);
        assert_eq!(
            Reply::from_error(&err).body,
            serde_json::json!({ "detail": "Invalid API Key" })
        );
    }
}
