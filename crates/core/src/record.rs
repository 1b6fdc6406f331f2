//! Core record types for spacevec.
//!
//! A [`VectorRecord`] is one dense vector stored in a (space, version, index)
//! triple, identified by a caller-chosen integer id. `MetadataValue` supports
//! boolean, integer, float, and string values for use in filter expressions.

use crate::config;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A typed metadata value attached to a vector.
///
/// Uses the default externally-tagged serde representation for bincode compatibility.
/// The server API layer converts to/from untagged JSON at the HTTP boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetadataValue {
    /// Boolean value (`true` / `false`).
    Boolean(bool),
    /// 64-bit signed integer.
    Integer(i64),
    /// 64-bit floating-point number.
    Float(f64),
    /// UTF-8 string.
    String(String),
}

/// A stored vector with its id, payload metadata, and optional lexical content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Caller-assigned id, unique within one (space, version, index).
    pub id: u64,
    /// Dense vector components. Length must equal the index dimension.
    pub data: Vec<f32>,
    /// Scalar metadata used by filter expressions.
    #[serde(default)]
    pub metadata: HashMap<String, MetadataValue>,
    /// Raw document text, stored verbatim.
    #[serde(default)]
    pub doc: Option<String>,
    /// Token list scored by BM25 during rerank.
    #[serde(default)]
    pub doc_tokens: Option<Vec<String>>,
}

impl VectorRecord {
    /// Creates a record with no metadata or lexical content.
    pub fn new(id: u64, data: Vec<f32>) -> Self {
        Self {
            id,
            data,
            metadata: HashMap::new(),
            doc: None,
            doc_tokens: None,
        }
    }

    /// Builder-style helper to attach a token list.
    pub fn with_tokens<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.doc_tokens = Some(tokens.into_iter().map(Into::into).collect());
        self
    }

    /// Builder-style helper to attach one metadata entry.
    pub fn with_meta(mut self, key: &str, value: MetadataValue) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// Returns the token list, or an empty slice when none was stored.
    pub fn tokens(&self) -> &[String] {
        self.doc_tokens.as_deref().unwrap_or(&[])
    }

    /// Checks the record against the target index dimension and input limits.
    pub fn validate(&self, dimension: usize) -> Result<()> {
        validate_vector(&self.data, dimension)
            .map_err(|e| Error::Validation(format!("vector {}: {}", self.id, e)))?;
        if self.metadata.len() > config::MAX_METADATA_KEYS {
            return Err(Error::Validation(format!(
                "vector {}: metadata exceeds maximum of {} keys",
                self.id,
                config::MAX_METADATA_KEYS
            )));
        }
        if let Some(doc) = &self.doc {
            if doc.len() > config::MAX_DOC_LEN {
                return Err(Error::Validation(format!(
                    "vector {}: doc exceeds maximum length of {} bytes",
                    self.id,
                    config::MAX_DOC_LEN
                )));
            }
        }
        Ok(())
    }
}

/// Checks that a vector has the expected length and only finite components.
///
/// Returns a bare message; callers wrap it with context.
pub fn validate_vector(data: &[f32], dimension: usize) -> std::result::Result<(), String> {
    if data.len() != dimension {
        return Err(format!(
            "dimension mismatch: expected {}, got {}",
            dimension,
            data.len()
        ));
    }
    if data.iter().any(|v| !v.is_finite()) {
        return Err("vector contains NaN or Inf".to_string());
    }
    Ok(())
}
