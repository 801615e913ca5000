//! Serving model holder with atomic hot-swap

use crate::error::{PredictionError, ResolutionError};
use crate::models::artifact::Classifier;
use crate::models::identifier::ModelIdentifier;
use crate::models::registry::ModelRegistry;
use crate::types::Prediction;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// A loaded model version ready to serve
pub struct ActiveModel {
    /// Identifier the model was loaded from
    pub identifier: ModelIdentifier,
    /// Concrete registry version
    pub version: u32,
    pub loaded_at: DateTime<Utc>,
    classifier: Box<dyn Classifier>,
}

impl ActiveModel {
    /// Create a new serving model around a loaded classifier
    pub fn new(identifier: ModelIdentifier, version: u32, classifier: Box<dyn Classifier>) -> Self {
        Self {
            identifier,
            version,
            loaded_at: Utc::now(),
            classifier,
        }
    }

    /// Raw category label for `text`
    pub fn predict(&self, text: &str) -> Result<String, PredictionError> {
        self.classifier.predict(text)
    }

    /// Labels the model can answer with
    pub fn classes(&self) -> &[String] {
        self.classifier.classes()
    }
}

impl fmt::Debug for ActiveModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveModel")
            .field("identifier", &self.identifier.to_string())
            .field("version", &self.version)
            .field("loaded_at", &self.loaded_at)
            .field("classes", &self.classes())
            .finish()
    }
}

/// Holds exactly one active model.
///
/// Readers take a snapshot (`Arc` clone) and release the lock before
/// invoking the model, so a swap never waits on in-flight predictions and
/// every prediction runs start to finish on one version.
pub struct ModelHolder {
    active: RwLock<Arc<ActiveModel>>,
}

impl ModelHolder {
    /// Create a new holder serving `model`
    pub fn new(model: ActiveModel) -> Self {
        info!(
            model = %model.identifier,
            version = model.version,
            "Serving model installed"
        );
        Self {
            active: RwLock::new(Arc::new(model)),
        }
    }

    /// Current model. A poisoned lock still holds a fully built model.
    pub fn snapshot(&self) -> Arc<ActiveModel> {
        match self.active.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Version number of the current model
    pub fn version(&self) -> u32 {
        self.snapshot().version
    }

    /// Classify one complaint with whatever model is current at call time.
    pub fn predict(&self, text: &str) -> Result<Prediction, PredictionError> {
        if text.trim().is_empty() {
            return Err(PredictionError::EmptyInput);
        }

        let model = self.snapshot();
        let category = model.predict(text)?;

        debug!(version = model.version, category = %category, "Prediction complete");

        Ok(Prediction {
            category,
            model_version: model.version,
        })
    }

    /// Install a fully loaded model, returning the one it replaced.
    pub fn swap(&self, model: ActiveModel) -> Arc<ActiveModel> {
        self.install(Arc::new(model))
    }

    fn install(&self, next: Arc<ActiveModel>) -> Arc<ActiveModel> {
        let previous = match self.active.write() {
            Ok(mut guard) => std::mem::replace(&mut *guard, Arc::clone(&next)),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), Arc::clone(&next)),
        };

        info!(
            model = %next.identifier,
            from_version = previous.version,
            to_version = next.version,
            "Serving model swapped"
        );

        previous
    }

    /// Load `id` from the registry and swap it in, returning the installed
    /// model.
    ///
    /// Blocks on registry I/O. On failure the current model keeps serving.
    pub fn reload(
        &self,
        registry: &ModelRegistry,
        id: &ModelIdentifier,
    ) -> Result<Arc<ActiveModel>, ResolutionError> {
        let next = Arc::new(registry.load(id)?);
        self.install(Arc::clone(&next));
        Ok(next)
    }
}
