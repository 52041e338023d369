use arbor_core::{ArborError, Float, Matrix, Result};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::encoder::{FeatureField, FeatureKind, FeatureSpec};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Candidate split points for one feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeatureBins {
    /// Strictly increasing thresholds; bin `k` holds values in `(t[k-1], t[k]]`.
    /// The final bin also receives `NaN`.
    Continuous { thresholds: Vec<Float> },
    /// One bin per category code.
    Categorical { arity: usize },
}

impl FeatureBins {
    pub fn num_bins(&self) -> usize {
        match self {
            FeatureBins::Continuous { thresholds } => thresholds.len() + 1,
            FeatureBins::Categorical { arity } => *arity,
        }
    }

    /// Bin index of an encoded value.
    ///
    /// For continuous features `v <= thresholds[k]` holds exactly when
    /// `bin(v) <= k`, so prefix scans over bins evaluate threshold splits.
    pub fn bin(&self, v: Float) -> u32 {
        match self {
            FeatureBins::Continuous { thresholds } if v.is_nan() => thresholds.len() as u32,
            FeatureBins::Continuous { thresholds } => thresholds.partition_point(|&t| t < v) as u32,
            FeatureBins::Categorical { .. } => v as u32,
        }
    }
}

/// Computes candidate thresholds for a continuous column.
///
/// Up to `max_bins - 1` thresholds: midpoints between every pair of
/// neighbouring distinct values when that fits, otherwise midpoints at evenly
/// spaced quantile ranks of the sorted column.
pub fn continuous_thresholds(column: &[Float], max_bins: usize) -> Vec<Float> {
    let mut sorted: Vec<Float> = column.iter().copied().filter(|v| !v.is_nan()).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let mut distinct = sorted.clone();
    distinct.dedup();

    if distinct.len() < 2 {
        return Vec::new();
    }

    if distinct.len() <= max_bins {
        return distinct.windows(2).map(|w| midpoint(w[0], w[1])).collect();
    }

    let n = sorted.len();
    let mut thresholds: Vec<Float> = Vec::with_capacity(max_bins - 1);
    for k in 1..max_bins {
        let rank = (k * n / max_bins).clamp(1, n - 1);
        let lower = sorted[rank - 1];
        let next = sorted.partition_point(|&v| v <= lower);
        if next >= n {
            continue;
        }
        let t = midpoint(lower, sorted[next]);
        if thresholds.last().map_or(true, |&last| t > last) {
            thresholds.push(t);
        }
    }
    thresholds
}

fn midpoint(a: Float, b: Float) -> Float {
    a + (b - a) * 0.5
}

/// Training matrix with every value replaced by its bin index.
#[derive(Debug, Clone)]
pub struct BinnedDataset {
    bins: Vec<FeatureBins>,
    binned: DMatrix<u32>,
}

impl BinnedDataset {
    /// Finds candidate splits for every feature of `x` and bins it.
    ///
    /// # Errors
    ///
    /// - [`ArborError::InvalidHyperparameter`] if `max_bins < 2` or a categorical
    ///   feature's cardinality exceeds `max_bins`
    /// - [`ArborError::ShapeMismatch`] if `x` and `spec` disagree on the feature count
    pub fn build(x: &Matrix, spec: &FeatureSpec, max_bins: usize) -> Result<Self> {
        if max_bins < 2 {
            return Err(ArborError::InvalidHyperparameter {
                name: "maxBins".into(),
                value: max_bins.to_string(),
            });
        }
        if x.ncols() != spec.len() {
            return Err(ArborError::ShapeMismatch {
                expected: format!("{} feature columns", spec.len()),
                got: format!("{} columns", x.ncols()),
            });
        }

        let find = |(j, field): (usize, &FeatureField)| -> Result<FeatureBins> {
            match field.kind {
                FeatureKind::Categorical { cardinality } if cardinality > max_bins => {
                    Err(ArborError::InvalidHyperparameter {
                        name: "maxBins".into(),
                        value: format!(
                            "{max_bins} (categorical field '{}' has cardinality {cardinality})",
                            field.name
                        ),
                    })
                }
                FeatureKind::Categorical { cardinality } => Ok(FeatureBins::Categorical {
                    arity: cardinality,
                }),
                FeatureKind::Continuous => {
                    let column: Vec<Float> = x.column(j).iter().copied().collect();
                    Ok(FeatureBins::Continuous {
                        thresholds: continuous_thresholds(&column, max_bins),
                    })
                }
            }
        };

        #[cfg(feature = "parallel")]
        let bins: Vec<FeatureBins> = spec
            .fields()
            .par_iter()
            .enumerate()
            .map(find)
            .collect::<Result<_>>()?;

        #[cfg(not(feature = "parallel"))]
        let bins: Vec<FeatureBins> = spec
            .fields()
            .iter()
            .enumerate()
            .map(find)
            .collect::<Result<_>>()?;

        for (field, b) in spec.fields().iter().zip(&bins) {
            tracing::debug!(field = %field.name, bins = b.num_bins(), "computed feature bins");
        }

        let binned = DMatrix::from_fn(x.nrows(), x.ncols(), |i, j| bins[j].bin(x[(i, j)]));

        Ok(Self { bins, binned })
    }

    pub fn feature_bins(&self, feature: usize) -> &FeatureBins {
        &self.bins[feature]
    }

    pub fn num_features(&self) -> usize {
        self.bins.len()
    }

    pub fn num_rows(&self) -> usize {
        self.binned.nrows()
    }

    #[inline]
    pub fn bin(&self, row: usize, feature: usize) -> u32 {
        self.binned[(row, feature)]
    }
}
