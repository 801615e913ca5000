//! Model artifacts and the classifier interface they implement.

use crate::error::PredictionError;
use crate::text;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Anything that maps complaint text to a product category.
pub trait Classifier: Send + Sync {
    /// Predict the category of a single complaint.
    fn predict(&self, text: &str) -> Result<String, PredictionError>;

    /// Categories this classifier can emit.
    fn classes(&self) -> &[String];
}

/// Serialized form of a linear text classifier (`model.json`).
///
/// Mirrors a TF-IDF vectorizer followed by a multinomial linear model:
/// `scores = coefficients · tfidf(text) + intercepts`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearModelSpec {
    pub classes: Vec<String>,
    pub vocabulary: Vec<String>,
    /// Inverse document frequencies, one per vocabulary term
    #[serde(default)]
    pub idf: Option<Vec<f64>>,
    /// `[class][term]` weights
    pub coefficients: Vec<Vec<f64>>,
    pub intercepts: Vec<f64>,
    /// Scale the term vector to unit length before scoring
    #[serde(default = "default_l2_normalize")]
    pub l2_normalize: bool,
}

fn default_l2_normalize() -> bool {
    true
}

/// Linear text classifier loaded from a [`LinearModelSpec`].
#[derive(Debug, Clone)]
pub struct LinearTextClassifier {
    spec: LinearModelSpec,
    index: HashMap<String, usize>,
}

impl LinearTextClassifier {
    /// Validate a spec and build the token index.
    pub fn from_spec(spec: LinearModelSpec) -> Result<Self, String> {
        let n_terms = spec.vocabulary.len();
        let n_classes = spec.classes.len();

        if n_classes == 0 {
            return Err("artifact declares no classes".to_string());
        }
        if spec.classes.iter().any(|c| c.trim().is_empty()) {
            return Err("artifact declares an empty class name".to_string());
        }
        if spec.coefficients.len() != n_classes {
            return Err(format!(
                "expected {} coefficient rows, found {}",
                n_classes,
                spec.coefficients.len()
            ));
        }
        if let Some(row) = spec.coefficients.iter().find(|row| row.len() != n_terms) {
            return Err(format!(
                "coefficient row has {} weights for {} vocabulary terms",
                row.len(),
                n_terms
            ));
        }
        if spec.intercepts.len() != n_classes {
            return Err(format!(
                "expected {} intercepts, found {}",
                n_classes,
                spec.intercepts.len()
            ));
        }
        if let Some(idf) = &spec.idf {
            if idf.len() != n_terms {
                return Err(format!(
                    "idf has {} entries for {} vocabulary terms",
                    idf.len(),
                    n_terms
                ));
            }
        }

        let mut index = HashMap::with_capacity(n_terms);
        for (i, term) in spec.vocabulary.iter().enumerate() {
            if index.insert(term.to_lowercase(), i).is_some() {
                return Err(format!("duplicate vocabulary term '{}'", term));
            }
        }

        Ok(Self { spec, index })
    }

    /// Parse and validate `model.json` contents.
    pub fn from_json(json: &str) -> Result<Self, String> {
        let spec: LinearModelSpec = serde_json::from_str(json).map_err(|e| e.to_string())?;
        Self::from_spec(spec)
    }

    fn features(&self, text: &str) -> Vec<f64> {
        let mut features = vec![0.0; self.spec.vocabulary.len()];
        for token in text::tokenize(text) {
            if let Some(&j) = self.index.get(&token) {
                features[j] += 1.0;
            }
        }

        if let Some(idf) = &self.spec.idf {
            for (value, weight) in features.iter_mut().zip(idf) {
                *value *= weight;
            }
        }

        if self.spec.l2_normalize {
            let norm = features.iter().map(|v| v * v).sum::<f64>().sqrt();
            if norm > 0.0 {
                features.iter_mut().for_each(|v| *v /= norm);
            }
        }

        features
    }

    /// Per-class decision scores.
    pub fn scores(&self, text: &str) -> Vec<f64> {
        let features = self.features(text);
        self.spec
            .coefficients
            .iter()
            .zip(&self.spec.intercepts)
            .map(|(row, intercept)| {
                row.iter().zip(&features).map(|(w, x)| w * x).sum::<f64>() + intercept
            })
            .collect()
    }
}

impl Classifier for LinearTextClassifier {
    fn predict(&self, text: &str) -> Result<String, PredictionError> {
        let scores = self.scores(text);
        let best = argmax(&scores)
            .ok_or_else(|| PredictionError::Model("model produced no finite scores".to_string()))?;
        Ok(self.spec.classes[best].clone())
    }

    fn classes(&self) -> &[String] {
        &self.spec.classes
    }
}

/// Index of the largest finite value; the first one wins on ties.
pub(crate) fn argmax(values: &[f64]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .fold(None, |best: Option<(usize, f64)>, (i, &v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Two-class loan / credit card model used across the crate's tests.
    pub(crate) fn sample_spec() -> LinearModelSpec {
        LinearModelSpec {
            classes: vec!["Credit card".to_string(), "Loan".to_string()],
            vocabulary: vec![
                "card".to_string(),
                "credit".to_string(),
                "fee".to_string(),
                "loan".to_string(),
            ],
            idf: Some(vec![1.0, 1.2, 1.5, 1.0]),
            coefficients: vec![vec![2.0, 1.5, 0.1, -1.0], vec![-1.0, -0.5, 0.4, 2.5]],
            intercepts: vec![0.1, 0.0],
            l2_normalize: true,
        }
    }

    #[test]
    fn test_predicts_expected_classes() {
        let model = LinearTextClassifier::from_spec(sample_spec()).unwrap();
        assert_eq!(model.predict("I have an issue with my loan.").unwrap(), "Loan");
        assert_eq!(model.predict("my credit card was charged twice").unwrap(), "Credit card");
        assert_eq!(model.classes().len(), 2);
    }

    #[test]
    fn test_unknown_tokens_fall_back_to_intercepts() {
        let model = LinearTextClassifier::from_spec(sample_spec()).unwrap();
        // No known terms: all features zero, intercept 0.1 wins
        assert_eq!(model.predict("zeppelin quasar").unwrap(), "Credit card");
    }

    #[test]
    fn test_rejects_inconsistent_dimensions() {
        let mut spec = sample_spec();
        spec.coefficients[1].pop();
        assert!(LinearTextClassifier::from_spec(spec).is_err());

        let mut spec = sample_spec();
        spec.intercepts.push(0.0);
        assert!(LinearTextClassifier::from_spec(spec).is_err());

        let mut spec = sample_spec();
        spec.idf = Some(vec![1.0]);
        assert!(LinearTextClassifier::from_spec(spec).is_err());

        let mut spec = sample_spec();
        spec.vocabulary[1] = "card".to_string();
        assert!(LinearTextClassifier::from_spec(spec).is_err());
    }

    #[test]
    fn test_from_json() {
        let json = serde_json::to_string(&sample_spec()).unwrap();
        let model = LinearTextClassifier::from_json(&json).unwrap();
        assert_eq!(model.predict("late fee on my loan").unwrap(), "Loan");
        assert!(LinearTextClassifier::from_json("{}").is_err());
    }

    #[test]
    fn test_argmax() {
        assert_eq!(argmax(&[0.1, 0.5, 0.5]), Some(1));
        assert_eq!(argmax(&[f64::NAN, -1.0]), Some(1));
        assert_eq!(argmax(&[]), None);
    }
}
