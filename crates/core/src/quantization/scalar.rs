//! Scalar int8 quantization.
//!
//! Each f32 vector is compressed to u8 by finding its min and max values, then
//! linearly mapping each component to \[0, 255\]. The `min` and `scale`
//! parameters are stored per vector for reconstruction.
//!
//! The asymmetric kernels keep the query in f32 and reconstruct stored
//! components on the fly. Inner loops run over fixed-size f32 chunks and
//! accumulate chunk sums in f64 to keep rounding error low on long vectors.

use serde::{Deserialize, Serialize};

/// Scalar-quantized vector: f32 → u8 with min/max for reconstruction.
/// `scale` is precomputed as (max - min) / 255.0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuantizedVector {
    pub data: Vec<u8>,
    pub min: f32,
    pub max: f32,
    pub scale: f32,
}

/// Borrowed view of one quantized vector inside an index arena.
#[derive(Debug, Clone, Copy)]
pub struct VectorRef<'a> {
    pub data: &'a [u8],
    pub min: f32,
    pub scale: f32,
}

impl VectorRef<'_> {
    #[inline(always)]
    fn component(&self, i: usize) -> f32 {
        self.min + self.data[i] as f32 * self.scale
    }
}

impl QuantizedVector {
    /// Quantize a f32 vector to u8 using min-max scaling.
    pub fn quantize(vector: &[f32]) -> Self {
        if vector.is_empty() {
            return Self {
                data: Vec::new(),
                min: 0.0,
                max: 0.0,
                scale: 0.0,
            };
        }

        let (min, max) = vector
            .iter()
            .fold((f32::MAX, f32::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));

        let range = max - min;
        if range < f32::EPSILON {
            // Constant vector: every component reconstructs to `min`.
            return Self {
                data: vec![0u8; vector.len()],
                min,
                max,
                scale: 0.0,
            };
        }

        let inv_scale = 255.0 / range;
        let data = vector
            .iter()
            .map(|&v| ((v - min) * inv_scale).round().clamp(0.0, 255.0) as u8)
            .collect();

        Self {
            data,
            min,
            max,
            scale: range / 255.0,
        }
    }

    /// Dequantize back to f32. Lossy.
    pub fn dequantize(&self) -> Vec<f32> {
        let view = self.as_ref();
        (0..self.data.len()).map(|i| view.component(i)).collect()
    }

    /// Create a VectorRef borrowing this vector's data.
    pub fn as_ref(&self) -> VectorRef<'_> {
        VectorRef {
            data: &self.data,
            min: self.min,
            scale: self.scale,
        }
    }
}

/// 8 × f32 = 256 bit = one AVX register.
const CHUNK_F32: usize = 8;

/// Sums `f(i)` over `0..len` in f32 chunks with f64 accumulation at chunk boundaries.
#[inline(always)]
fn chunked_sum<F: Fn(usize) -> f32>(len: usize, f: F) -> f64 {
    let full_chunks = len / CHUNK_F32;
    let mut total = 0.0f64;
    for c in 0..full_chunks {
        let base = c * CHUNK_F32;
        let mut acc = 0.0f32;
        for j in 0..CHUNK_F32 {
            acc += f(base + j);
        }
        total += acc as f64;
    }
    for i in (full_chunks * CHUNK_F32)..len {
        total += f(i) as f64;
    }
    total
}

/// Exact squared Euclidean distance between two f32 slices.
pub fn euclidean_sq_f32(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    chunked_sum(a.len(), |i| {
        let d = a[i] - b[i];
        d * d
    }) as f32
}

/// Exact dot product between two f32 slices.
pub fn dot_product_f32(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    chunked_sum(a.len(), |i| a[i] * b[i]) as f32
}

/// Exact cosine similarity between two f32 slices. Returns 0 when either norm is zero.
pub fn cosine_f32(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let dot = chunked_sum(a.len(), |i| a[i] * b[i]);
    let na = chunked_sum(a.len(), |i| a[i] * a[i]);
    let nb = chunked_sum(b.len(), |i| b[i] * b[i]);
    let denom = na.sqrt() * nb.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }
    (dot / denom) as f32
}

/// Asymmetric squared Euclidean distance: f32 query vs u8 stored.
pub fn euclidean_sq_asym(query: &[f32], stored: VectorRef<'_>) -> f32 {
    debug_assert_eq!(query.len(), stored.data.len());
    chunked_sum(query.len(), |i| {
        let d = query[i] - stored.component(i);
        d * d
    }) as f32
}

/// Asymmetric dot product: f32 query vs u8 stored.
pub fn dot_product_asym(query: &[f32], stored: VectorRef<'_>) -> f32 {
    debug_assert_eq!(query.len(), stored.data.len());
    chunked_sum(query.len(), |i| query[i] * stored.component(i)) as f32
}

/// Asymmetric cosine similarity with precomputed query norm squared.
pub fn cosine_asym_prenorm(query: &[f32], stored: VectorRef<'_>, query_norm_sq: f32) -> f32 {
    debug_assert_eq!(query.len(), stored.data.len());
    if query_norm_sq < 1e-10 {
        return 0.0;
    }
    let dot = chunked_sum(query.len(), |i| query[i] * stored.component(i));
    let ns = chunked_sum(query.len(), |i| {
        let s = stored.component(i);
        s * s
    });
    let denom = (query_norm_sq as f64).sqrt() * ns.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }
    (dot / denom) as f32
}
