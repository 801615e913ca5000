//! ONNX Runtime backed classifier
//!
//! Artifact directory: `model.onnx` taking a `[1, n_terms]` float tensor of
//! term counts, `vocabulary.json` (term list, column order) and
//! `classes.json` (class list, output order).

use crate::error::PredictionError;
use crate::models::artifact::{argmax, Classifier};
use crate::text;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, Once};
use tracing::info;

pub const ONNX_MODEL_FILE: &str = "model.onnx";
pub const VOCABULARY_FILE: &str = "vocabulary.json";
pub const CLASSES_FILE: &str = "classes.json";

static ORT_INIT: Once = Once::new();

pub struct OnnxClassifier {
    /// `run` needs exclusive access to the session
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
    index: HashMap<String, usize>,
    n_terms: usize,
    classes: Vec<String>,
}

impl OnnxClassifier {
    /// Load the session, vocabulary and class labels from a version directory
    pub fn load(dir: &Path, onnx_threads: usize) -> Result<Self, String> {
        ORT_INIT.call_once(|| {
            if let Err(e) = ort::init().commit() {
                tracing::error!(error = %e, "ONNX Runtime initialization failed");
            }
        });

        let vocabulary: Vec<String> = read_json(&dir.join(VOCABULARY_FILE))?;
        let classes: Vec<String> = read_json(&dir.join(CLASSES_FILE))?;
        if classes.is_empty() {
            return Err("classes.json lists no classes".to_string());
        }

        let path = dir.join(ONNX_MODEL_FILE);
        let session = Session::builder()
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|b| b.with_intra_threads(onnx_threads))
            .and_then(|b| b.commit_from_file(&path))
            .map_err(|e| format!("failed to load {}: {}", path.display(), e))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "float_input".to_string());

        let output_name = session
            .outputs
            .iter()
            .find(|o| o.name.contains("prob"))
            .or_else(|| session.outputs.last())
            .map(|o| o.name.clone())
            .unwrap_or_else(|| "probabilities".to_string());

        info!(
            path = %path.display(),
            input = %input_name,
            output = %output_name,
            terms = vocabulary.len(),
            "ONNX session ready"
        );

        let index = vocabulary
            .iter()
            .enumerate()
            .map(|(i, term)| (term.to_lowercase(), i))
            .collect();

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_name,
            index,
            n_terms: vocabulary.len(),
            classes,
        })
    }

    fn features(&self, text: &str) -> Vec<f32> {
        let mut features = vec![0.0_f32; self.n_terms];
        for token in text::tokenize(text) {
            if let Some(&j) = self.index.get(&token) {
                features[j] += 1.0;
            }
        }
        features
    }
}

impl Classifier for OnnxClassifier {
    fn predict(&self, text: &str) -> Result<String, PredictionError> {
        let features = self.features(text);
        let shape = vec![1_i64, features.len() as i64];
        let input = Tensor::from_array((shape, features))
            .map_err(|e| PredictionError::Model(format!("input tensor: {}", e)))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| PredictionError::Model("session lock poisoned".to_string()))?;
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => input])
            .map_err(|e| PredictionError::Model(e.to_string()))?;

        let output = outputs
            .get(self.output_name.as_str())
            .ok_or_else(|| PredictionError::Model(format!("missing output '{}'", self.output_name)))?;
        let (_, probabilities) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| PredictionError::Model(e.to_string()))?;

        let scores: Vec<f64> = probabilities
            .iter()
            .take(self.classes.len())
            .map(|&p| p as f64)
            .collect();
        let best = argmax(&scores)
            .ok_or_else(|| PredictionError::Model("model produced no finite scores".to_string()))?;
        Ok(self.classes[best].clone())
    }

    fn classes(&self) -> &[String] {
        &self.classes
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, String> {
    let raw = fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    serde_json::from_str(&raw).map_err(|e| format!("{}: {}", path.display(), e))
}
