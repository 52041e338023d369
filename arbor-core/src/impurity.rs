use serde::{Deserialize, Serialize};

use crate::Float;

/// Node impurity criterion used to score candidate splits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impurity {
    /// Label variance, for regression.
    Variance,
    /// Gini impurity, for classification.
    Gini,
    /// Shannon entropy (base 2), for classification.
    Entropy,
}

impl Impurity {
    pub fn is_classification(self) -> bool {
        matches!(self, Impurity::Gini | Impurity::Entropy)
    }
}

/// Computes the **Gini impurity** of a node given class counts.
///
/// Gini impurity measures how often a randomly chosen element from the node
/// would be misclassified if it were labeled according to the class
/// distribution in that node.
///
/// # Definition
///
/// For class counts `c_k` with total count `n`:
///
/// ```text
/// G = 1 − Σ_k (c_k / n)²
/// ```
///
/// - `G = 0` indicates a **pure** node
/// - Returns `0.0` if `n == 0` (empty node)
///
/// Counts are floating point because they come out of merged label
/// histograms.
///
/// # Examples
///
/// ```rust
/// use arbor_core::impurity::gini_from_counts;
///
/// let gini = gini_from_counts(&[3.0, 1.0], 4.0);
/// assert!((gini - 0.375).abs() < 1e-12);
/// ```
pub fn gini_from_counts(counts: &[Float], n: Float) -> Float {
    if n <= 0.0 {
        return 0.0;
    }

    let mut sum_sq = 0.0;
    for &c in counts {
        let p = c / n;
        sum_sq += p * p;
    }

    1.0 - sum_sq
}

/// Computes the **entropy** (in bits) of a node given class counts.
///
/// ```text
/// H = − Σ_k p_k · log2(p_k),   p_k = c_k / n
/// ```
///
/// Empty classes contribute nothing. Returns `0.0` for an empty node.
pub fn entropy_from_counts(counts: &[Float], n: Float) -> Float {
    if n <= 0.0 {
        return 0.0;
    }

    let mut h = 0.0;
    for &c in counts {
        if c > 0.0 {
            let p = c / n;
            h -= p * p.log2();
        }
    }
    h
}

/// Population variance from running sums: `E[y²] − E[y]²`.
///
/// Clamped at zero to absorb rounding on near-constant labels.
pub fn variance_from_sums(count: Float, sum: Float, sum_sq: Float) -> Float {
    if count <= 0.0 {
        return 0.0;
    }
    let mean = sum / count;
    (sum_sq / count - mean * mean).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gini_pure_and_mixed() {
        assert_eq!(gini_from_counts(&[5.0, 0.0], 5.0), 0.0);
        assert!((gini_from_counts(&[2.0, 2.0], 4.0) - 0.5).abs() < 1e-12);
        assert_eq!(gini_from_counts(&[], 0.0), 0.0);
    }

    #[test]
    fn test_entropy_balanced_binary_is_one_bit() {
        assert!((entropy_from_counts(&[4.0, 4.0], 8.0) - 1.0).abs() < 1e-12);
        assert_eq!(entropy_from_counts(&[3.0, 0.0], 3.0), 0.0);
    }

    #[test]
    fn test_variance_from_sums() {
        // labels 1, 2, 3
        let v = variance_from_sums(3.0, 6.0, 14.0);
        assert!((v - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(variance_from_sums(0.0, 0.0, 0.0), 0.0);
        assert_eq!(variance_from_sums(2.0, 2.0, 2.0), 0.0);
    }

    #[test]
    fn test_impurity_serde_names() {
        let json = serde_json::to_string(&Impurity::Variance).unwrap();
        assert_eq!(json, "\"variance\"");
        let parsed: Impurity = serde_json::from_str("\"entropy\"").unwrap();
        assert_eq!(parsed, Impurity::Entropy);
        assert!(parsed.is_classification());
    }
}
