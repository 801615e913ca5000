//! Request-side data structures

use serde::{Deserialize, Serialize};

/// Customer complaint submitted for classification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Complaint {
    /// Free-text complaint narrative
    pub text: String,
}

impl Complaint {
    /// Create a new complaint from raw text
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Whether the complaint carries any non-whitespace text
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Category predicted for a complaint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Prediction {
    /// Predicted product category
    pub category: String,

    /// Registry version of the model that produced the category
    #[serde(skip)]
    pub model_version: u32,
}

/// One observed (input, prediction) pair awaiting the durable log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BufferRecord {
    /// Complaint text as received
    pub narrative: String,
    /// Predicted category
    pub product: String,
}

impl BufferRecord {
    /// Create a new record for one observed prediction
    pub fn new(narrative: impl Into<String>, product: impl Into<String>) -> Self {
        Self {
            narrative: narrative.into(),
            product: product.into(),
        }
    }
}
