//! Reference-vs-current drift analysis over vectorized complaint text.

use crate::config::{DriftMethodKind, MonitoringConfig};
use crate::error::MonitoringError;
use crate::feature_extractor::{FeatureMatrix, FeatureVectorizer};
use crate::monitoring::sink::new_run_id;
use crate::text;
use crate::types::{BufferRecord, DriftReport, FeatureDrift, FeatureKind};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Floor for empty bins so the log term stays finite
const EPSILON: f64 = 1e-4;

/// Name of the categorical prediction column in reports
pub const PRODUCT_FEATURE: &str = "product";
/// Name of the cleaned narrative length column in reports
pub const LENGTH_FEATURE: &str = "input_length";

/// Drift test parameters
#[derive(Debug, Clone, PartialEq)]
pub struct DriftSettings {
    pub method: DriftMethodKind,
    pub psi_bins: usize,
    pub threshold: f64,
    pub categorical_threshold: f64,
    pub drift_share: f64,
}

impl From<&MonitoringConfig> for DriftSettings {
    fn from(config: &MonitoringConfig) -> Self {
        Self {
            method: config.method,
            psi_bins: config.psi_bins.max(1),
            threshold: config.drift_threshold,
            categorical_threshold: config.categorical_threshold,
            drift_share: config.drift_share,
        }
    }
}

impl Default for DriftSettings {
    fn default() -> Self {
        Self::from(&MonitoringConfig::default())
    }
}

/// Vectorized training corpus the current window is compared against.
#[derive(Debug, Clone)]
pub struct ReferenceDataset {
    features: FeatureMatrix,
    lengths: Vec<f64>,
    products: Vec<String>,
}

impl ReferenceDataset {
    /// Vectorize already cleaned reference records.
    pub fn build(vectorizer: &FeatureVectorizer, records: &[BufferRecord]) -> Self {
        let narratives: Vec<&str> = records.iter().map(|r| r.narrative.as_str()).collect();
        Self {
            features: vectorizer.transform(&narratives),
            lengths: narrative_lengths(&narratives),
            products: records.iter().map(|r| r.product.clone()).collect(),
        }
    }

    /// Number of reference records
    pub fn rows(&self) -> usize {
        self.features.rows()
    }

    /// Vocabulary features per record
    pub fn dim(&self) -> usize {
        self.features.dim()
    }
}

/// Compares flushed windows with the reference dataset.
pub struct DriftAnalyzer {
    vectorizer: Arc<FeatureVectorizer>,
    reference: ReferenceDataset,
    settings: DriftSettings,
}

impl DriftAnalyzer {
    /// Create a new analyzer over a fitted vectorizer and its reference data
    pub fn new(
        vectorizer: Arc<FeatureVectorizer>,
        reference: ReferenceDataset,
        settings: DriftSettings,
    ) -> Self {
        Self {
            vectorizer,
            reference,
            settings,
        }
    }

    /// Active test parameters
    pub fn settings(&self) -> &DriftSettings {
        &self.settings
    }

    /// Analyze one window of logged records.
    pub fn run(&self, window: &[BufferRecord]) -> Result<DriftReport, MonitoringError> {
        if window.is_empty() {
            return Err(MonitoringError::EmptyWindow);
        }

        let cleaned: Vec<String> = window.iter().map(|r| text::clean(&r.narrative)).collect();
        let current = self.vectorizer.transform(&cleaned);
        if current.dim() != self.reference.dim() {
            return Err(MonitoringError::DimensionMismatch {
                expected: self.reference.dim(),
                found: current.dim(),
            });
        }

        let mut features = Vec::with_capacity(current.dim() + 2);
        for (j, name) in self.vectorizer.feature_names().iter().enumerate() {
            let reference = self.reference.features.column(j);
            let observed = current.column(j);
            features.push(self.numerical(name, &reference, &observed));
        }
        let lengths = narrative_lengths(&cleaned);
        features.push(self.numerical(LENGTH_FEATURE, &self.reference.lengths, &lengths));

        let products: Vec<&str> = window.iter().map(|r| r.product.as_str()).collect();
        let reference_products: Vec<&str> =
            self.reference.products.iter().map(String::as_str).collect();
        let score = categorical_psi(&reference_products, &products);
        features.push(FeatureDrift {
            feature: PRODUCT_FEATURE.to_string(),
            kind: FeatureKind::Categorical,
            reference_mean: 0.0,
            current_mean: 0.0,
            reference_std: 0.0,
            current_std: 0.0,
            score,
            threshold: self.settings.categorical_threshold,
            drift_detected: score >= self.settings.categorical_threshold,
        });

        let drifted_features = features.iter().filter(|f| f.drift_detected).count();
        let share_drifted = drifted_features as f64 / features.len() as f64;

        let report = DriftReport {
            run_id: new_run_id(),
            generated_at: Utc::now(),
            method: method_name(self.settings.method).to_string(),
            reference_rows: self.reference.rows(),
            current_rows: window.len(),
            features,
            drifted_features,
            share_drifted,
            dataset_drift: share_drifted >= self.settings.drift_share,
        };

        debug!(
            run_id = %report.run_id,
            drifted = report.drifted_features,
            share = report.share_drifted,
            "Drift analysis complete"
        );
        Ok(report)
    }

    fn numerical(&self, name: &str, reference: &[f64], observed: &[f64]) -> FeatureDrift {
        let score = match self.settings.method {
            DriftMethodKind::Psi => psi(reference, observed, self.settings.psi_bins),
            DriftMethodKind::Ks => ks_statistic(reference, observed),
        };
        numerical_drift(name, reference, observed, score, self.settings.threshold)
    }
}

/// Character count of each narrative
fn narrative_lengths<S: AsRef<str>>(narratives: &[S]) -> Vec<f64> {
    narratives
        .iter()
        .map(|n| n.as_ref().chars().count() as f64)
        .collect()
}

/// Method label written into reports
pub fn method_name(method: DriftMethodKind) -> &'static str {
    match method {
        DriftMethodKind::Psi => "psi",
        DriftMethodKind::Ks => "ks",
    }
}

fn numerical_drift(
    name: &str,
    reference: &[f64],
    current: &[f64],
    score: f64,
    threshold: f64,
) -> FeatureDrift {
    let (reference_mean, reference_std) = mean_std(reference);
    let (current_mean, current_std) = mean_std(current);
    FeatureDrift {
        feature: name.to_string(),
        kind: FeatureKind::Numerical,
        reference_mean,
        current_mean,
        reference_std,
        current_std,
        score,
        threshold,
        drift_detected: score >= threshold,
    }
}

/// Mean and population standard deviation
fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Population Stability Index over equal-width bins of the pooled range.
pub fn psi(reference: &[f64], current: &[f64], bins: usize) -> f64 {
    if reference.is_empty() || current.is_empty() || bins == 0 {
        return 0.0;
    }

    let (min, max) = reference
        .iter()
        .chain(current)
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if (max - min).abs() < EPSILON {
        return 0.0;
    }

    let width = (max - min) / bins as f64;
    let histogram = |values: &[f64]| {
        let mut counts = vec![0usize; bins];
        for &v in values {
            let bin = (((v - min) / width).floor() as usize).min(bins - 1);
            counts[bin] += 1;
        }
        counts
    };

    let ref_counts = histogram(reference);
    let cur_counts = histogram(current);
    let ref_total = reference.len() as f64;
    let cur_total = current.len() as f64;

    ref_counts
        .iter()
        .zip(&cur_counts)
        .map(|(&r, &c)| {
            let ref_pct = (r as f64 / ref_total).max(EPSILON);
            let cur_pct = (c as f64 / cur_total).max(EPSILON);
            (cur_pct - ref_pct) * (cur_pct / ref_pct).ln()
        })
        .sum::<f64>()
        .abs()
}

/// Two-sample Kolmogorov-Smirnov statistic (largest CDF distance).
pub fn ks_statistic(reference: &[f64], current: &[f64]) -> f64 {
    if reference.is_empty() || current.is_empty() {
        return 0.0;
    }

    let mut a = reference.to_vec();
    let mut b = current.to_vec();
    a.sort_by(f64::total_cmp);
    b.sort_by(f64::total_cmp);

    let (na, nb) = (a.len() as f64, b.len() as f64);
    let (mut i, mut j) = (0, 0);
    let mut distance: f64 = 0.0;

    while i < a.len() && j < b.len() {
        let x = a[i].min(b[j]);
        while i < a.len() && a[i] <= x {
            i += 1;
        }
        while j < b.len() && b[j] <= x {
            j += 1;
        }
        distance = distance.max((i as f64 / na - j as f64 / nb).abs());
    }

    distance
}

/// PSI over category frequencies.
pub fn categorical_psi(reference: &[&str], current: &[&str]) -> f64 {
    if reference.is_empty() || current.is_empty() {
        return 0.0;
    }

    let mut counts: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    for &category in reference {
        counts.entry(category).or_default().0 += 1;
    }
    for &category in current {
        counts.entry(category).or_default().1 += 1;
    }

    let ref_total = reference.len() as f64;
    let cur_total = current.len() as f64;

    counts
        .values()
        .map(|&(r, c)| {
            let ref_pct = (r as f64 / ref_total).max(EPSILON);
            let cur_pct = (c as f64 / cur_total).max(EPSILON);
            (cur_pct - ref_pct) * (cur_pct / ref_pct).ln()
        })
        .sum::<f64>()
        .abs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_records() -> Vec<BufferRecord> {
        let mut records = Vec::new();
        for _ in 0..4 {
            records.push(BufferRecord::new("loan payment", "Loan"));
            records.push(BufferRecord::new("credit card", "Credit card"));
        }
        records
    }

    fn analyzer(method: DriftMethodKind) -> DriftAnalyzer {
        let records = reference_records();
        let vectorizer = Arc::new(FeatureVectorizer::fit(
            records.iter().map(|r| r.narrative.as_str()),
            10,
        ));
        let reference = ReferenceDataset::build(&vectorizer, &records);
        let settings = DriftSettings {
            method,
            ..DriftSettings::default()
        };
        DriftAnalyzer::new(vectorizer, reference, settings)
    }

    #[test]
    fn test_identical_window_has_no_drift() {
        let analyzer = analyzer(DriftMethodKind::Psi);
        let report = analyzer.run(&reference_records()).unwrap();

        assert_eq!(report.reference_rows, 8);
        assert_eq!(report.current_rows, 8);
        // card, credit, loan, payment + input_length + product
        assert_eq!(report.features.len(), 6);
        assert_eq!(report.drifted_features, 0);
        assert!(!report.dataset_drift);
        assert!(report.features.iter().all(|f| f.score.abs() < 1e-12));
    }

    #[test]
    fn test_shifted_window_drifts() {
        let analyzer = analyzer(DriftMethodKind::Psi);
        let window = vec![BufferRecord::new("Credit card, credit card!", "Credit card"); 3];
        let report = analyzer.run(&window).unwrap();

        assert!(report.dataset_drift);
        let drifted = report.drifted_feature_names();
        assert!(drifted.contains(&"card"));
        assert!(drifted.contains(&"loan"));
        assert!(drifted.contains(&PRODUCT_FEATURE));

        let card = report.features.iter().find(|f| f.feature == "card").unwrap();
        assert_eq!(card.kind, FeatureKind::Numerical);
        assert!((card.reference_mean - 0.5).abs() < 1e-12);
        assert!((card.current_mean - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_narrative_length_feature() {
        let analyzer = analyzer(DriftMethodKind::Psi);
        // "loan payment" and "credit card" are 12 and 11 characters
        let window = vec![BufferRecord::new("Loan payment was late, again and again!", "Loan"); 4];
        let report = analyzer.run(&window).unwrap();

        let length = report.features.iter().find(|f| f.feature == LENGTH_FEATURE).unwrap();
        assert_eq!(length.kind, FeatureKind::Numerical);
        assert!((length.reference_mean - 11.5).abs() < 1e-12);
        assert!((length.reference_std - 0.5).abs() < 1e-12);
        assert!((length.current_mean - 37.0).abs() < 1e-12);
        assert!(length.drift_detected);
    }

    #[test]
    fn test_ks_method() {
        let analyzer = analyzer(DriftMethodKind::Ks);
        let window = vec![BufferRecord::new("credit card", "Credit card"); 4];
        let report = analyzer.run(&window).unwrap();
        assert_eq!(report.method, "ks");

        let loan = report.features.iter().find(|f| f.feature == "loan").unwrap();
        assert!((loan.score - 0.5).abs() < 1e-12);
        assert!(loan.drift_detected);
    }

    #[test]
    fn test_empty_window() {
        let analyzer = analyzer(DriftMethodKind::Psi);
        assert!(matches!(analyzer.run(&[]), Err(MonitoringError::EmptyWindow)));
    }

    #[test]
    fn test_dimension_mismatch() {
        let records = reference_records();
        let wide = FeatureVectorizer::fit(records.iter().map(|r| r.narrative.as_str()), 10);
        let reference = ReferenceDataset::build(&wide, &records);
        let narrow = Arc::new(FeatureVectorizer::fit(["loan loan"], 10));

        let analyzer = DriftAnalyzer::new(narrow, reference, DriftSettings::default());
        assert!(matches!(
            analyzer.run(&records),
            Err(MonitoringError::DimensionMismatch { expected: 4, found: 1 })
        ));
    }

    #[test]
    fn test_psi_edge_cases() {
        assert_eq!(psi(&[], &[1.0], 10), 0.0);
        assert_eq!(psi(&[0.0, 0.0], &[0.0], 10), 0.0);
        assert!(psi(&[0.0; 10], &[1.0; 10], 10) > 1.0);
    }

    #[test]
    fn test_ks_statistic() {
        assert_eq!(ks_statistic(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]), 0.0);
        assert_eq!(ks_statistic(&[0.0, 0.0], &[5.0, 6.0]), 1.0);
    }

    #[test]
    fn test_categorical_psi() {
        assert!(categorical_psi(&["Loan", "Loan"], &["Loan"]).abs() < 1e-12);
        assert!(categorical_psi(&["Loan", "Credit card"], &["Mortgage"]) > 1.0);
    }
}
