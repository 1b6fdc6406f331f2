//! Distance metrics for HNSW search.
//!
//! Three metrics are supported: squared Euclidean (`L2`), cosine distance and
//! negative dot product. Every metric returns a value where **lower is better**.
//! Each has an exact f32-vs-f32 variant and an asymmetric f32-vs-u8 variant used
//! during graph traversal when the index is quantized.

use crate::quantization::scalar;
use crate::quantization::VectorRef;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Distance metric used for vector similarity computation.
///
/// Serialized as its display name; deserialization accepts every alias [`FromStr`] does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DistanceMetric {
    /// Squared Euclidean distance (L2²). Range: \[0, ∞).
    L2,
    /// Cosine distance: `1 - cosine_similarity`. Range: \[0, 2\].
    Cosine,
    /// Negative dot product: `-dot(a, b)`.
    Dot,
}

impl DistanceMetric {
    /// Exact f32-vs-f32 distance. No quantization loss.
    #[inline]
    pub fn distance_exact(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::L2 => scalar::euclidean_sq_f32(a, b),
            DistanceMetric::Cosine => 1.0 - scalar::cosine_f32(a, b),
            DistanceMetric::Dot => -scalar::dot_product_f32(a, b),
        }
    }

    /// Asymmetric distance with precomputed query norm squared (only used by cosine).
    #[inline]
    pub fn distance_asym_prenorm(
        &self,
        query: &[f32],
        stored: VectorRef<'_>,
        query_norm_sq: f32,
    ) -> f32 {
        match self {
            DistanceMetric::L2 => scalar::euclidean_sq_asym(query, stored),
            DistanceMetric::Cosine => {
                1.0 - scalar::cosine_asym_prenorm(query, stored, query_norm_sq)
            }
            DistanceMetric::Dot => -scalar::dot_product_asym(query, stored),
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DistanceMetric::L2 => "L2",
            DistanceMetric::Cosine => "Cosine",
            DistanceMetric::Dot => "Dot",
        };
        f.write_str(s)
    }
}

impl FromStr for DistanceMetric {
    type Err = String;

    /// Case-insensitive parse. Accepts `l2`/`euclidean`, `cosine`, `dot`/`ip`/`dotproduct`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "l2" | "euclidean" => Ok(DistanceMetric::L2),
            "cosine" => Ok(DistanceMetric::Cosine),
            "dot" | "ip" | "dotproduct" | "dot_product" => Ok(DistanceMetric::Dot),
            other => Err(format!(
                "unsupported metric '{other}' (expected L2, Cosine or Dot)"
            )),
        }
    }
}

impl TryFrom<String> for DistanceMetric {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<DistanceMetric> for String {
    fn from(m: DistanceMetric) -> Self {
        m.to_string()
    }
}
