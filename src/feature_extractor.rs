//! Bag-of-words feature extraction for drift monitoring.
//!
//! The vectorizer is fitted once on the reference corpus at startup. After
//! that its vocabulary is frozen: every transform produces vectors of the same
//! dimension and tokens outside the vocabulary contribute nothing.

use crate::text;
use std::collections::HashMap;

/// Dense row-major matrix of feature values.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    rows: usize,
    dim: usize,
    data: Vec<f64>,
}

impl FeatureMatrix {
    /// Create a new all-zero matrix
    pub fn zeros(rows: usize, dim: usize) -> Self {
        Self {
            rows,
            dim,
            data: vec![0.0; rows * dim],
        }
    }

    /// Number of rows
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of features per row
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Feature values of row `i`
    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.dim..(i + 1) * self.dim]
    }

    fn row_mut(&mut self, i: usize) -> &mut [f64] {
        &mut self.data[i * self.dim..(i + 1) * self.dim]
    }

    /// Copy out the values of feature `j` across all rows.
    pub fn column(&self, j: usize) -> Vec<f64> {
        (0..self.rows).map(|i| self.data[i * self.dim + j]).collect()
    }
}

/// Count vectorizer with a bounded, frozen vocabulary.
#[derive(Debug, Clone)]
pub struct FeatureVectorizer {
    /// Vocabulary in feature order (alphabetical)
    vocabulary: Vec<String>,
    /// Token -> feature index
    index: HashMap<String, usize>,
}

impl FeatureVectorizer {
    /// Fit the vocabulary on a reference corpus.
    ///
    /// Keeps the `max_features` terms with the highest corpus-wide frequency.
    /// Ties are broken by the term itself so the result only depends on the
    /// corpus and the bound.
    pub fn fit<I, S>(corpus: I, max_features: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut counts: HashMap<String, u64> = HashMap::new();
        for document in corpus {
            for token in text::tokenize(document.as_ref()) {
                *counts.entry(token).or_insert(0) += 1;
            }
        }

        let mut ranked: Vec<(String, u64)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(max_features);

        let mut vocabulary: Vec<String> = ranked.into_iter().map(|(term, _)| term).collect();
        vocabulary.sort();

        let index = vocabulary
            .iter()
            .enumerate()
            .map(|(i, term)| (term.clone(), i))
            .collect();

        Self { vocabulary, index }
    }

    /// Transform a batch of documents into a `rows x feature_count` matrix.
    pub fn transform<S: AsRef<str>>(&self, rows: &[S]) -> FeatureMatrix {
        let mut matrix = FeatureMatrix::zeros(rows.len(), self.feature_count());
        for (i, document) in rows.iter().enumerate() {
            self.accumulate(document.as_ref(), matrix.row_mut(i));
        }
        matrix
    }

    /// Transform a single document.
    pub fn transform_one(&self, document: &str) -> Vec<f64> {
        let mut features = vec![0.0; self.feature_count()];
        self.accumulate(document, &mut features);
        features
    }

    fn accumulate(&self, document: &str, out: &mut [f64]) {
        for token in text::tokenize(document) {
            if let Some(&j) = self.index.get(&token) {
                out[j] += 1.0;
            }
        }
    }

    /// Number of features produced by every transform.
    pub fn feature_count(&self) -> usize {
        self.vocabulary.len()
    }

    /// Feature names in column order.
    pub fn feature_names(&self) -> &[String] {
        &self.vocabulary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn corpus() -> Vec<&'static str> {
        vec![
            "loan payment was late and the loan fee doubled",
            "credit card charged twice",
            "card declined at the store",
            "mortgage escrow account error",
        ]
    }

    #[test]
    fn test_fit_respects_bound_and_frequency() {
        let vectorizer = FeatureVectorizer::fit(corpus(), 3);

        assert_eq!(vectorizer.feature_count(), 3);
        // "loan", "card" and "the" occur twice; everything else once
        assert_eq!(vectorizer.feature_names(), &["card", "loan", "the"]);
    }

    #[test]
    fn test_fit_is_deterministic() {
        let a = FeatureVectorizer::fit(corpus(), 5);
        let b = FeatureVectorizer::fit(corpus(), 5);
        assert_eq!(a.feature_names(), b.feature_names());
    }

    #[test]
    fn test_transform_counts() {
        let vectorizer = FeatureVectorizer::fit(corpus(), 3);
        let matrix = vectorizer.transform(&["Loan loan CARD", "nothing known here"]);

        assert_eq!(matrix.rows(), 2);
        assert_eq!(matrix.dim(), 3);
        assert_eq!(matrix.row(0), &[1.0, 2.0, 0.0]);
        assert_eq!(matrix.row(1), &[0.0, 0.0, 0.0]);
        assert_eq!(matrix.column(1), vec![2.0, 0.0]);
    }

    #[test]
    fn test_dimension_constant_with_unseen_tokens() {
        let vectorizer = FeatureVectorizer::fit(corpus(), 100);
        let dim = vectorizer.feature_count();

        let inputs = [
            "completely novel vocabulary zeppelin quasar",
            "",
            "loan",
            "cryptocurrency wallet frozen by exchange without notice",
        ];
        for input in inputs {
            assert_eq!(vectorizer.transform_one(input).len(), dim);
        }
        assert_eq!(vectorizer.transform(&inputs).dim(), dim);
        assert_eq!(vectorizer.feature_count(), dim);
    }

    #[test]
    fn test_empty_corpus() {
        let vectorizer = FeatureVectorizer::fit(Vec::<String>::new(), 10);
        assert_eq!(vectorizer.feature_count(), 0);
        assert_eq!(vectorizer.transform(&["anything"]).dim(), 0);
    }

    proptest! {
        #[test]
        fn prop_transform_dimension_is_fixed(
            documents in proptest::collection::vec(".{0,80}", 0..8),
            max_features in 0usize..20,
        ) {
            let vectorizer = FeatureVectorizer::fit(corpus(), max_features);
            let dim = vectorizer.feature_count();
            prop_assert!(dim <= max_features);

            let matrix = vectorizer.transform(&documents);
            prop_assert_eq!(matrix.rows(), documents.len());
            prop_assert_eq!(matrix.dim(), dim);
            for document in &documents {
                prop_assert_eq!(vectorizer.transform_one(document).len(), dim);
            }
            prop_assert_eq!(vectorizer.feature_count(), dim);
        }
    }
}
