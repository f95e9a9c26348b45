//! Distance metric implementations for HNSW search.
//!
//! All metrics return a distance where **lower is better**: squared
//! euclidean, cosine distance (`1 - cosine_similarity`), and negative
//! inner product.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Distance metric used for vector similarity computation.
///
/// Fixed per collection at creation time and validated against the
/// persisted index header on load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// Squared euclidean distance (no square root). Range: \[0, ∞).
    L2,
    /// Cosine distance: `1 - dot / (‖a‖·‖b‖)`; `1.0` when either norm is zero.
    Cosine,
    /// Negative inner product: `-dot(a, b)`. Lower = higher similarity.
    Ip,
}

impl DistanceMetric {
    /// Compute the distance between two equal-length vectors.
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::L2 => l2_squared(a, b),
            DistanceMetric::Cosine => cosine_distance(a, b),
            DistanceMetric::Ip => neg_inner_product(a, b),
        }
    }

    /// Byte encoding used by the on-disk index header.
    pub fn to_byte(self) -> u8 {
        match self {
            DistanceMetric::L2 => 0,
            DistanceMetric::Cosine => 1,
            DistanceMetric::Ip => 2,
        }
    }

    /// Decode the on-disk byte; unknown values are a format error.
    pub fn from_byte(b: u8) -> Result<Self> {
        match b {
            0 => Ok(DistanceMetric::L2),
            1 => Ok(DistanceMetric::Cosine),
            2 => Ok(DistanceMetric::Ip),
            other => Err(StoreError::Format(format!("unknown metric byte {other}"))),
        }
    }
}

impl std::fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DistanceMetric::L2 => "l2",
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Ip => "ip",
        };
        f.write_str(name)
    }
}

fn l2_squared(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}

fn neg_inner_product(a: &[f32], b: &[f32]) -> f32 {
    -a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>()
}
