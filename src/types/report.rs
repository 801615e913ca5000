//! Drift report data structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a feature was compared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureKind {
    Numerical,
    Categorical,
}

/// Per-feature comparison between the reference and the current window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureDrift {
    /// Feature (vocabulary term or column) name
    pub feature: String,
    pub kind: FeatureKind,
    pub reference_mean: f64,
    pub current_mean: f64,
    pub reference_std: f64,
    pub current_std: f64,
    /// Test statistic (PSI or KS distance)
    pub score: f64,
    /// Score at or above which the feature counts as drifted
    pub threshold: f64,
    pub drift_detected: bool,
}

/// Result of one drift analysis run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftReport {
    /// Unique identifier of this run
    pub run_id: String,

    /// Report generation timestamp
    pub generated_at: DateTime<Utc>,

    /// Statistical test used for numerical features
    pub method: String,

    pub reference_rows: usize,
    pub current_rows: usize,

    /// Per-feature results, numerical features first
    pub features: Vec<FeatureDrift>,

    /// Number of features with drift detected
    pub drifted_features: usize,

    /// Fraction of features with drift detected
    pub share_drifted: f64,

    /// Whether the share of drifted features crossed the dataset threshold
    pub dataset_drift: bool,
}

impl DriftReport {
    /// Names of the drifted features, in report order
    pub fn drifted_feature_names(&self) -> Vec<&str> {
        self.features
            .iter()
            .filter(|f| f.drift_detected)
            .map(|f| f.feature.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_serialization() {
        let report = DriftReport {
            run_id: "20260101T000000.000Z-abcd1234".to_string(),
            generated_at: Utc::now(),
            method: "psi".to_string(),
            reference_rows: 10,
            current_rows: 3,
            features: vec![FeatureDrift {
                feature: "loan".to_string(),
                kind: FeatureKind::Numerical,
                reference_mean: 0.2,
                current_mean: 0.9,
                reference_std: 0.4,
                current_std: 0.3,
                score: 1.4,
                threshold: 0.2,
                drift_detected: true,
            }],
            drifted_features: 1,
            share_drifted: 1.0,
            dataset_drift: true,
        };

        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"kind\":\"numerical\""));

        let back: DriftReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.run_id, report.run_id);
        assert_eq!(back.drifted_feature_names(), vec!["loan"]);
    }
}
