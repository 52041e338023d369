use arbor_core::{
    entropy_from_counts, gini_from_counts, variance_from_sums, ArborError, Float, Impurity, Label,
    Matrix, Result,
};
use serde::{Deserialize, Serialize};

use crate::binning::{BinnedDataset, FeatureBins};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Nodes with fewer rows than this become leaves.
pub const MIN_SAMPLES_SPLIT: usize = 2;

/// Each side of an accepted split keeps at least this many rows.
pub const MIN_SAMPLES_LEAF: usize = 1;

/// A split must reduce impurity by more than this to be accepted.
pub const MIN_GAIN: Float = 1e-12;

/// Deepest tree accepted as a hyperparameter.
pub const MAX_TREE_DEPTH: usize = 30;

/// Largest class count accepted for classification; labels must be below it.
pub const MAX_CLASSES: usize = 1024;

/// Default rows per histogram partition.
pub const PARTITION_ROWS: usize = 4096;

/// Split test stored at an internal node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SplitPredicate {
    /// Left when `value <= threshold`. `NaN` goes right.
    Threshold { threshold: Float },
    /// Left when the category code is in the (sorted) set.
    Categories { categories: Vec<u32> },
}

impl SplitPredicate {
    #[inline]
    pub fn goes_left(&self, value: Float) -> bool {
        match self {
            SplitPredicate::Threshold { threshold } => value <= *threshold,
            SplitPredicate::Categories { categories } => {
                value >= 0.0
                    && value.fract() == 0.0
                    && categories.binary_search(&(value as u32)).is_ok()
            }
        }
    }
}

/// A node in the decision tree.
///
/// - **Leaf**: the prediction for rows reaching it
/// - **Split**: a predicate on one feature and the two subtrees
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "lowercase")]
pub enum TreeNode {
    Leaf {
        prediction: Float,
        samples: usize,
        impurity: Float,
    },
    Split {
        feature: usize,
        predicate: SplitPredicate,
        gain: Float,
        samples: usize,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

impl TreeNode {
    /// Walks from this node to a leaf and returns its prediction.
    pub fn predict(&self, features: &[Float]) -> Float {
        let mut node = self;
        loop {
            match node {
                TreeNode::Leaf { prediction, .. } => return *prediction,
                TreeNode::Split {
                    feature,
                    predicate,
                    left,
                    right,
                    ..
                } => {
                    node = if predicate.goes_left(features[*feature]) {
                        left
                    } else {
                        right
                    };
                }
            }
        }
    }

    /// Number of split levels below this node (a lone leaf has depth 0).
    pub fn depth(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 0,
            TreeNode::Split { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }

    pub fn num_nodes(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 1,
            TreeNode::Split { left, right, .. } => 1 + left.num_nodes() + right.num_nodes(),
        }
    }

    pub fn num_leaves(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 1,
            TreeNode::Split { left, right, .. } => left.num_leaves() + right.num_leaves(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, TreeNode::Leaf { .. })
    }
}

/// Label statistics layout for an impurity criterion.
///
/// Regression keeps `[count, sum, sum_sq]` of labels minus `shift`, the
/// midrange of the training labels, so large offsets do not swamp the
/// variance. Classification keeps one count per class. Statistics are flat
/// `Float` slices so histograms are one contiguous buffer per feature.
#[derive(Debug, Clone, Copy)]
struct Objective {
    impurity: Impurity,
    num_classes: usize,
    shift: Float,
}

impl Objective {
    fn stats_len(&self) -> usize {
        match self.impurity {
            Impurity::Variance => 3,
            Impurity::Gini | Impurity::Entropy => self.num_classes,
        }
    }

    #[inline]
    fn add(&self, stats: &mut [Float], label: Label) {
        match self.impurity {
            Impurity::Variance => {
                let centered = label - self.shift;
                stats[0] += 1.0;
                stats[1] += centered;
                stats[2] += centered * centered;
            }
            Impurity::Gini | Impurity::Entropy => stats[label as usize] += 1.0,
        }
    }

    fn count(&self, stats: &[Float]) -> Float {
        match self.impurity {
            Impurity::Variance => stats[0],
            Impurity::Gini | Impurity::Entropy => stats.iter().sum(),
        }
    }

    fn impurity(&self, stats: &[Float]) -> Float {
        match self.impurity {
            Impurity::Variance => variance_from_sums(stats[0], stats[1], stats[2]),
            Impurity::Gini => gini_from_counts(stats, self.count(stats)),
            Impurity::Entropy => entropy_from_counts(stats, self.count(stats)),
        }
    }

    /// Mean label, or the majority class with ties going to the lowest class.
    fn prediction(&self, stats: &[Float]) -> Float {
        match self.impurity {
            Impurity::Variance if stats[0] > 0.0 => stats[1] / stats[0] + self.shift,
            Impurity::Variance => self.shift,
            Impurity::Gini | Impurity::Entropy => {
                let mut best_class = 0;
                let mut best_count = Float::NEG_INFINITY;
                for (class, &count) in stats.iter().enumerate() {
                    if count > best_count {
                        best_count = count;
                        best_class = class;
                    }
                }
                best_class as Float
            }
        }
    }

    /// Ordering key used to sort categories before scanning prefix subsets.
    fn centroid(&self, stats: &[Float]) -> Float {
        match self.impurity {
            Impurity::Variance => stats[1] / stats[0],
            Impurity::Gini | Impurity::Entropy if self.num_classes <= 2 => {
                stats.get(1).copied().unwrap_or(0.0) / self.count(stats)
            }
            Impurity::Gini | Impurity::Entropy => self.impurity(stats),
        }
    }
}

/// Winning split of one feature at one node.
#[derive(Debug, Clone)]
struct SplitCandidate {
    feature: usize,
    predicate: SplitPredicate,
    gain: Float,
}

/// Stopping limits and criterion for tree growth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeParams {
    pub max_depth: usize,
    pub max_bins: usize,
    pub impurity: Impurity,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: 5,
            max_bins: 32,
            impurity: Impurity::Variance,
        }
    }
}

impl TreeParams {
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_TREE_DEPTH).contains(&self.max_depth) {
            return Err(ArborError::InvalidHyperparameter {
                name: "maxDepth".into(),
                value: self.max_depth.to_string(),
            });
        }
        if self.max_bins < 2 {
            return Err(ArborError::InvalidHyperparameter {
                name: "maxBins".into(),
                value: self.max_bins.to_string(),
            });
        }
        Ok(())
    }
}

/// Grows a binary **decision tree** by greedy recursive splitting.
///
/// # Algorithm
///
/// 1. Start with all rows at the root
/// 2. For each node:
///    - Stop with a leaf if the depth limit is reached, the node is pure, or it
///      has fewer than [`MIN_SAMPLES_SPLIT`] rows
///    - Build per-feature label histograms over the node's rows. Rows are cut
///      into fixed-size partitions, each partition is summarized independently
///      (in parallel with the `parallel` feature), and partials are merged in
///      partition order so the result does not depend on thread scheduling
///    - Score every candidate: each threshold of a continuous feature, each
///      prefix of the node's categories sorted by centroid for a categorical one
///    - Keep the candidate with the largest gain. Ties go to the lowest feature
///      index, then the first candidate in scan order
///    - Stop with a leaf if no candidate gains more than [`MIN_GAIN`]
///    - Partition rows with the chosen predicate and recurse
///
/// Leaves predict the mean label (variance) or the majority class (gini / entropy).
#[derive(Debug, Clone)]
pub struct DecisionTreeBuilder {
    params: TreeParams,
    partition_rows: usize,
}

/// Borrowed training inputs shared by the recursion.
struct TrainingSet<'a> {
    x: &'a Matrix,
    binned: &'a BinnedDataset,
    labels: &'a [Label],
    objective: Objective,
}

impl DecisionTreeBuilder {
    pub fn new(params: TreeParams) -> Self {
        Self {
            params,
            partition_rows: PARTITION_ROWS,
        }
    }

    /// Overrides the histogram partition size (at least 1 row).
    pub fn with_partition_rows(mut self, rows: usize) -> Self {
        self.partition_rows = rows.max(1);
        self
    }

    pub fn params(&self) -> &TreeParams {
        &self.params
    }

    /// Grows a tree over `x` / `labels`.
    ///
    /// `binned` must be built from the same `x`.
    ///
    /// # Errors
    ///
    /// - [`ArborError::InvalidTrainingData`] if there are no rows or no features,
    ///   a label is not finite, or a classification label is not a
    ///   non-negative integer
    /// - [`ArborError::ShapeMismatch`] if `labels` or `binned` disagree with `x`
    /// - [`ArborError::InvalidHyperparameter`] for out-of-range parameters
    pub fn fit(&self, x: &Matrix, binned: &BinnedDataset, labels: &[Label]) -> Result<TreeNode> {
        self.params.validate()?;

        let n = x.nrows();
        if n == 0 {
            return Err(ArborError::invalid_training_data("no training rows"));
        }
        if x.ncols() == 0 {
            return Err(ArborError::invalid_training_data("no feature columns"));
        }
        if labels.len() != n {
            return Err(ArborError::ShapeMismatch {
                expected: format!("{n} labels"),
                got: format!("{} labels", labels.len()),
            });
        }
        if binned.num_rows() != n || binned.num_features() != x.ncols() {
            return Err(ArborError::ShapeMismatch {
                expected: format!("binned data of {n}x{}", x.ncols()),
                got: format!("{}x{}", binned.num_rows(), binned.num_features()),
            });
        }

        let num_classes = self.class_count(labels)?;
        let shift = match self.params.impurity {
            Impurity::Variance => midrange(labels),
            Impurity::Gini | Impurity::Entropy => 0.0,
        };
        let set = TrainingSet {
            x,
            binned,
            labels,
            objective: Objective {
                impurity: self.params.impurity,
                num_classes,
                shift,
            },
        };

        let rows: Vec<usize> = (0..n).collect();
        Ok(self.build_node(&set, rows, 0))
    }

    /// Validates labels and returns the class count (0 for regression).
    ///
    /// Classification labels must be integers in `0..MAX_CLASSES`.
    pub fn class_count(&self, labels: &[Label]) -> Result<usize> {
        if let Some(bad) = labels.iter().find(|l| !l.is_finite()) {
            return Err(ArborError::invalid_training_data(format!(
                "label {bad} is not finite"
            )));
        }
        if !self.params.impurity.is_classification() {
            return Ok(0);
        }
        if let Some(bad) = labels.iter().find(|&&l| l < 0.0 || l.fract() != 0.0) {
            return Err(ArborError::invalid_training_data(format!(
                "classification label {bad} is not a non-negative integer"
            )));
        }
        let max_label = labels.iter().copied().fold(0.0, Float::max);
        if max_label >= MAX_CLASSES as Float {
            return Err(ArborError::invalid_training_data(format!(
                "classification label {max_label} exceeds the limit of {MAX_CLASSES} classes"
            )));
        }
        (max_label as usize)
            .checked_add(1)
            .ok_or_else(|| ArborError::invalid_training_data("class count overflows"))
    }

    fn build_node(&self, set: &TrainingSet<'_>, rows: Vec<usize>, depth: usize) -> TreeNode {
        let objective = set.objective;
        let mut totals = vec![0.0; objective.stats_len()];
        for &row in &rows {
            objective.add(&mut totals, set.labels[row]);
        }

        let leaf = TreeNode::Leaf {
            prediction: objective.prediction(&totals),
            samples: rows.len(),
            impurity: objective.impurity(&totals),
        };

        let first = set.labels[rows[0]];
        let is_pure = rows.iter().all(|&r| set.labels[r] == first);
        if depth >= self.params.max_depth || rows.len() < MIN_SAMPLES_SPLIT || is_pure {
            return leaf;
        }

        let Some(best) = self.find_best_split(set, &rows, &totals) else {
            return leaf;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .iter()
            .partition(|&&r| best.predicate.goes_left(set.x[(r, best.feature)]));

        tracing::debug!(
            depth,
            feature = best.feature,
            gain = best.gain,
            left = left_rows.len(),
            right = right_rows.len(),
            "split node"
        );

        let samples = rows.len();
        drop(rows);
        let left = Box::new(self.build_node(set, left_rows, depth + 1));
        let right = Box::new(self.build_node(set, right_rows, depth + 1));

        TreeNode::Split {
            feature: best.feature,
            predicate: best.predicate,
            gain: best.gain,
            samples,
            left,
            right,
        }
    }

    /// Per-feature label histograms for `rows`, merged across partitions.
    fn histograms(&self, set: &TrainingSet<'_>, rows: &[usize]) -> Vec<Vec<Float>> {
        let objective = set.objective;
        let stride = objective.stats_len();
        let binned = set.binned;

        let partial = |chunk: &[usize]| -> Vec<Vec<Float>> {
            let mut hists: Vec<Vec<Float>> = (0..binned.num_features())
                .map(|f| vec![0.0; binned.feature_bins(f).num_bins() * stride])
                .collect();
            for &row in chunk {
                let label = set.labels[row];
                for (f, hist) in hists.iter_mut().enumerate() {
                    let bin = binned.bin(row, f) as usize;
                    objective.add(&mut hist[bin * stride..(bin + 1) * stride], label);
                }
            }
            hists
        };

        #[cfg(feature = "parallel")]
        let partials: Vec<Vec<Vec<Float>>> = rows.par_chunks(self.partition_rows).map(partial).collect();

        #[cfg(not(feature = "parallel"))]
        let partials: Vec<Vec<Vec<Float>>> = rows.chunks(self.partition_rows).map(partial).collect();

        let mut partials = partials.into_iter();
        let mut merged = partials.next().unwrap_or_default();
        for part in partials {
            for (acc, hist) in merged.iter_mut().zip(part) {
                for (a, h) in acc.iter_mut().zip(hist) {
                    *a += h;
                }
            }
        }
        merged
    }

    fn find_best_split(
        &self,
        set: &TrainingSet<'_>,
        rows: &[usize],
        totals: &[Float],
    ) -> Option<SplitCandidate> {
        let hists = self.histograms(set, rows);
        let parent_impurity = set.objective.impurity(totals);

        let evaluate = |(feature, hist): (usize, &Vec<Float>)| match set.binned.feature_bins(feature) {
            FeatureBins::Continuous { thresholds } => {
                best_threshold(set.objective, feature, thresholds, hist, totals, parent_impurity)
            }
            FeatureBins::Categorical { arity } => {
                best_category_subset(set.objective, feature, *arity, hist, totals, parent_impurity)
            }
        };

        #[cfg(feature = "parallel")]
        let per_feature: Vec<Option<SplitCandidate>> =
            hists.par_iter().enumerate().map(evaluate).collect();

        #[cfg(not(feature = "parallel"))]
        let per_feature: Vec<Option<SplitCandidate>> =
            hists.iter().enumerate().map(evaluate).collect();

        let mut best: Option<SplitCandidate> = None;
        for candidate in per_feature.into_iter().flatten() {
            if best.as_ref().map_or(true, |b| candidate.gain > b.gain) {
                best = Some(candidate);
            }
        }
        best.filter(|b| b.gain > MIN_GAIN)
    }
}

/// Midpoint of the label range; halved first so extreme labels cannot overflow.
fn midrange(labels: &[Label]) -> Float {
    let (min, max) = labels
        .iter()
        .fold((Float::INFINITY, Float::NEG_INFINITY), |(lo, hi), &l| (lo.min(l), hi.max(l)));
    if min.is_finite() {
        min / 2.0 + max / 2.0
    } else {
        0.0
    }
}

/// Gain of splitting `totals` into `left` and the remainder, if both sides are large enough.
fn split_gain(
    objective: Objective,
    left: &[Float],
    totals: &[Float],
    parent_impurity: Float,
) -> Option<Float> {
    let right: Vec<Float> = totals.iter().zip(left).map(|(t, l)| t - l).collect();
    let n = objective.count(totals);
    let n_left = objective.count(left);
    let n_right = objective.count(&right);

    let min_leaf = MIN_SAMPLES_LEAF as Float;
    if n_left < min_leaf || n_right < min_leaf {
        return None;
    }

    let weighted = (n_left / n) * objective.impurity(left) + (n_right / n) * objective.impurity(&right);
    Some(parent_impurity - weighted)
}

fn best_threshold(
    objective: Objective,
    feature: usize,
    thresholds: &[Float],
    hist: &[Float],
    totals: &[Float],
    parent_impurity: Float,
) -> Option<SplitCandidate> {
    let stride = objective.stats_len();
    let mut left = vec![0.0; stride];
    let mut best: Option<(usize, Float)> = None;

    for (k, _) in thresholds.iter().enumerate() {
        for (l, h) in left.iter_mut().zip(&hist[k * stride..(k + 1) * stride]) {
            *l += h;
        }
        if let Some(gain) = split_gain(objective, &left, totals, parent_impurity) {
            if best.map_or(true, |(_, g)| gain > g) {
                best = Some((k, gain));
            }
        }
    }

    best.map(|(k, gain)| SplitCandidate {
        feature,
        predicate: SplitPredicate::Threshold {
            threshold: thresholds[k],
        },
        gain,
    })
}

fn best_category_subset(
    objective: Objective,
    feature: usize,
    arity: usize,
    hist: &[Float],
    totals: &[Float],
    parent_impurity: Float,
) -> Option<SplitCandidate> {
    let stride = objective.stats_len();
    let stats = |code: usize| &hist[code * stride..(code + 1) * stride];

    let mut present: Vec<(Float, usize)> = (0..arity)
        .filter(|&code| objective.count(stats(code)) > 0.0)
        .map(|code| (objective.centroid(stats(code)), code))
        .collect();
    if present.len() < 2 {
        return None;
    }
    present.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut left = vec![0.0; stride];
    let mut best: Option<(usize, Float)> = None;
    for (prefix, &(_, code)) in present[..present.len() - 1].iter().enumerate() {
        for (l, h) in left.iter_mut().zip(stats(code)) {
            *l += h;
        }
        if let Some(gain) = split_gain(objective, &left, totals, parent_impurity) {
            if best.map_or(true, |(_, g)| gain > g) {
                best = Some((prefix, gain));
            }
        }
    }

    best.map(|(prefix, gain)| {
        let mut categories: Vec<u32> = present[..=prefix]
            .iter()
            .map(|&(_, code)| code as u32)
            .collect();
        categories.sort_unstable();
        SplitCandidate {
            feature,
            predicate: SplitPredicate::Categories { categories },
            gain,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{FeatureField, FeatureKind, FeatureSpec};

    fn matrix_from_vec(data: Vec<Vec<Float>>) -> Matrix {
        let rows = data.len();
        let cols = data[0].len();
        Matrix::from_fn(rows, cols, |i, j| data[i][j])
    }

    fn continuous_spec(cols: usize) -> FeatureSpec {
        FeatureSpec::new(
            (0..cols)
                .map(|j| FeatureField {
                    name: format!("f{j}"),
                    kind: FeatureKind::Continuous,
                })
                .collect(),
        )
    }

    fn fit(x: &Matrix, spec: &FeatureSpec, y: &[Label], params: TreeParams) -> Result<TreeNode> {
        let binned = BinnedDataset::build(x, spec, params.max_bins)?;
        DecisionTreeBuilder::new(params).fit(x, &binned, y)
    }

    fn params(max_depth: usize, impurity: Impurity) -> TreeParams {
        TreeParams {
            max_depth,
            max_bins: 32,
            impurity,
        }
    }

    fn leaves(node: &TreeNode) -> Vec<&TreeNode> {
        match node {
            TreeNode::Leaf { .. } => vec![node],
            TreeNode::Split { left, right, .. } => {
                let mut out = leaves(left);
                out.extend(leaves(right));
                out
            }
        }
    }

    #[test]
    fn test_decision_tree_empty_data() {
        let x = Matrix::zeros(0, 2);
        let binned = BinnedDataset::build(&x, &continuous_spec(2), 32).unwrap();
        let result = DecisionTreeBuilder::new(TreeParams::default()).fit(&x, &binned, &[]);
        assert!(matches!(result, Err(ArborError::InvalidTrainingData { .. })));
    }

    #[test]
    fn test_decision_tree_no_features() {
        let x = Matrix::zeros(3, 0);
        let binned = BinnedDataset::build(&x, &continuous_spec(0), 32).unwrap();
        let result =
            DecisionTreeBuilder::new(TreeParams::default()).fit(&x, &binned, &[0.0, 1.0, 0.0]);
        assert!(matches!(result, Err(ArborError::InvalidTrainingData { .. })));
    }

    #[test]
    fn test_decision_tree_label_mismatch() {
        let x = matrix_from_vec(vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        let result = fit(&x, &continuous_spec(2), &[0.0], TreeParams::default());
        assert!(matches!(result, Err(ArborError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_decision_tree_invalid_depth() {
        let x = matrix_from_vec(vec![vec![1.0], vec![2.0]]);
        let result = fit(&x, &continuous_spec(1), &[0.0, 1.0], params(0, Impurity::Variance));
        assert!(matches!(
            result,
            Err(ArborError::InvalidHyperparameter { ref name, .. }) if name == "maxDepth"
        ));
        let result = fit(&x, &continuous_spec(1), &[0.0, 1.0], params(31, Impurity::Variance));
        assert!(result.is_err());
    }

    #[test]
    fn test_classification_rejects_fractional_labels() {
        let x = matrix_from_vec(vec![vec![1.0], vec![2.0]]);
        let result = fit(&x, &continuous_spec(1), &[0.0, 0.5], params(3, Impurity::Gini));
        assert!(matches!(result, Err(ArborError::InvalidTrainingData { .. })));
    }

    #[test]
    fn test_classification_rejects_huge_labels() {
        let x = matrix_from_vec(vec![vec![0.0], vec![1.0], vec![2.0], vec![3.0]]);
        let result = fit(&x, &continuous_spec(1), &[0.0, 0.0, 1e20, 1e20], params(3, Impurity::Gini));
        assert!(matches!(result, Err(ArborError::InvalidTrainingData { .. })));

        let at_limit = MAX_CLASSES as Float;
        let result = fit(&x, &continuous_spec(1), &[0.0, 0.0, at_limit, 1.0], params(3, Impurity::Gini));
        assert!(matches!(result, Err(ArborError::InvalidTrainingData { .. })));

        let below = (MAX_CLASSES - 1) as Float;
        let builder = DecisionTreeBuilder::new(params(3, Impurity::Entropy));
        assert_eq!(builder.class_count(&[0.0, below]).unwrap(), MAX_CLASSES);
    }

    #[test]
    fn test_decision_tree_simple_split() {
        let x = matrix_from_vec(vec![
            vec![1.0, 0.0],
            vec![2.0, 0.0],
            vec![3.0, 0.0],
            vec![8.0, 0.0],
            vec![9.0, 0.0],
            vec![10.0, 0.0],
        ]);
        let y = [0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let root = fit(&x, &continuous_spec(2), &y, params(10, Impurity::Variance)).unwrap();

        match &root {
            TreeNode::Split {
                feature, predicate, ..
            } => {
                assert_eq!(*feature, 0);
                assert_eq!(*predicate, SplitPredicate::Threshold { threshold: 5.5 });
            }
            TreeNode::Leaf { .. } => panic!("expected a split at the root"),
        }
        assert_eq!(root.predict(&[1.5, 0.0]), 0.0);
        assert_eq!(root.predict(&[9.5, 0.0]), 1.0);
        assert_eq!(root.depth(), 1);
        assert_eq!(root.num_leaves(), 2);
    }

    #[test]
    fn test_decision_tree_multiclass_gini() {
        let x = matrix_from_vec(vec![
            vec![1.0],
            vec![2.0],
            vec![5.0],
            vec![6.0],
            vec![10.0],
            vec![11.0],
        ]);
        let y = [0.0, 0.0, 1.0, 1.0, 2.0, 2.0];
        let root = fit(&x, &continuous_spec(1), &y, params(10, Impurity::Gini)).unwrap();

        assert_eq!(root.predict(&[1.5]), 0.0);
        assert_eq!(root.predict(&[5.5]), 1.0);
        assert_eq!(root.predict(&[10.5]), 2.0);
    }

    #[test]
    fn test_decision_tree_entropy_matches_gini_on_separable_data() {
        let x = matrix_from_vec(vec![vec![1.0], vec![2.0], vec![8.0], vec![9.0]]);
        let y = [0.0, 0.0, 1.0, 1.0];
        let gini = fit(&x, &continuous_spec(1), &y, params(4, Impurity::Gini)).unwrap();
        let entropy = fit(&x, &continuous_spec(1), &y, params(4, Impurity::Entropy)).unwrap();
        assert_eq!(gini.num_nodes(), entropy.num_nodes());
        assert_eq!(gini.predict(&[1.0]), entropy.predict(&[1.0]));
    }

    #[test]
    fn test_decision_tree_max_depth_limit() {
        let x = matrix_from_vec(vec![vec![1.0], vec![2.0], vec![3.0], vec![4.0]]);
        let y = [0.0, 1.0, 0.0, 1.0];
        let root = fit(&x, &continuous_spec(1), &y, params(1, Impurity::Variance)).unwrap();
        assert!(root.depth() <= 1);
    }

    #[test]
    fn test_decision_tree_regression_leaf_is_mean() {
        let x = matrix_from_vec(vec![vec![1.0], vec![1.0], vec![1.0]]);
        let y = [1.0, 2.0, 6.0];
        let root = fit(&x, &continuous_spec(1), &y, params(5, Impurity::Variance)).unwrap();
        assert!(root.is_leaf());
        assert_eq!(root.predict(&[1.0]), 3.0);
    }

    #[test]
    fn test_decision_tree_single_class_is_leaf() {
        let x = matrix_from_vec(vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]]);
        let y = [1.0, 1.0, 1.0];
        let root = fit(&x, &continuous_spec(2), &y, params(10, Impurity::Gini)).unwrap();
        assert_eq!(
            root,
            TreeNode::Leaf {
                prediction: 1.0,
                samples: 3,
                impurity: 0.0
            }
        );
    }

    #[test]
    fn test_majority_tie_goes_to_lowest_class() {
        let x = matrix_from_vec(vec![vec![1.0], vec![1.0]]);
        let y = [1.0, 0.0];
        let root = fit(&x, &continuous_spec(1), &y, params(3, Impurity::Gini)).unwrap();
        assert_eq!(root.predict(&[1.0]), 0.0);
    }

    #[test]
    fn test_xor_needs_two_levels() {
        // Both features have zero gain at the root under variance, so no split is taken.
        let x = matrix_from_vec(vec![
            vec![0.0, 0.0],
            vec![0.0, 1.0],
            vec![1.0, 0.0],
            vec![1.0, 1.0],
        ]);
        let y = [0.0, 1.0, 1.0, 0.0];
        let root = fit(&x, &continuous_spec(2), &y, params(10, Impurity::Variance)).unwrap();
        assert!(root.is_leaf());
        assert_eq!(root.predict(&[0.0, 0.0]), 0.5);
    }

    #[test]
    fn test_tie_break_prefers_lowest_feature() {
        // Features 0 and 1 separate the labels equally well.
        let x = matrix_from_vec(vec![
            vec![1.0, 10.0],
            vec![2.0, 20.0],
            vec![3.0, 30.0],
            vec![4.0, 40.0],
        ]);
        let y = [0.0, 0.0, 1.0, 1.0];
        let root = fit(&x, &continuous_spec(2), &y, params(3, Impurity::Variance)).unwrap();
        match root {
            TreeNode::Split { feature, .. } => assert_eq!(feature, 0),
            TreeNode::Leaf { .. } => panic!("expected a split"),
        }
    }

    #[test]
    fn test_categorical_split_groups_codes() {
        // codes 0 and 2 -> label 1, codes 1 and 3 -> label 0
        let x = matrix_from_vec(vec![
            vec![0.0],
            vec![1.0],
            vec![2.0],
            vec![3.0],
            vec![0.0],
            vec![2.0],
        ]);
        let y = [1.0, 0.0, 1.0, 0.0, 1.0, 1.0];
        let spec = FeatureSpec::new(vec![FeatureField {
            name: "dofW".into(),
            kind: FeatureKind::Categorical { cardinality: 7 },
        }]);
        let root = fit(&x, &spec, &y, params(3, Impurity::Variance)).unwrap();
        match &root {
            TreeNode::Split { predicate, .. } => {
                assert_eq!(
                    *predicate,
                    SplitPredicate::Categories {
                        categories: vec![1, 3]
                    }
                );
            }
            TreeNode::Leaf { .. } => panic!("expected a categorical split"),
        }
        assert_eq!(root.predict(&[3.0]), 0.0);
        assert_eq!(root.predict(&[2.0]), 1.0);
        // unseen code goes right
        assert_eq!(root.predict(&[6.0]), 1.0);
    }

    #[test]
    fn test_nan_goes_right() {
        let x = matrix_from_vec(vec![vec![1.0], vec![2.0], vec![Float::NAN], vec![Float::NAN]]);
        let y = [0.0, 1.0, 1.0, 1.0];
        let root = fit(&x, &continuous_spec(1), &y, params(3, Impurity::Variance)).unwrap();
        assert_eq!(root.predict(&[Float::NAN]), 1.0);
        assert_eq!(root.predict(&[1.5]), 0.0);
    }

    #[test]
    fn test_leaves_are_pure_when_memorizable() {
        let x = matrix_from_vec((0..40).map(|i| vec![(i % 10) as Float, (i / 10) as Float]).collect());
        let y: Vec<Label> = (0..40).map(|i| ((i % 10) > 6 || (i / 10) == 2) as u8 as Float).collect();
        let root = fit(&x, &continuous_spec(2), &y, params(10, Impurity::Gini)).unwrap();

        for leaf in leaves(&root) {
            match leaf {
                TreeNode::Leaf { impurity, .. } => assert_eq!(*impurity, 0.0),
                TreeNode::Split { .. } => unreachable!(),
            }
        }
        for i in 0..40 {
            let row = [x[(i, 0)], x[(i, 1)]];
            assert_eq!(root.predict(&row), y[i]);
        }
    }

    #[test]
    fn test_sample_counts_add_up() {
        let x = matrix_from_vec((0..20).map(|i| vec![i as Float]).collect());
        let y: Vec<Label> = (0..20).map(|i| (i / 5) as Float).collect();
        let root = fit(&x, &continuous_spec(1), &y, params(4, Impurity::Variance)).unwrap();
        let total: usize = leaves(&root)
            .iter()
            .map(|l| match l {
                TreeNode::Leaf { samples, .. } => *samples,
                TreeNode::Split { .. } => 0,
            })
            .sum();
        assert_eq!(total, 20);
    }

    #[test]
    fn test_fit_is_deterministic() {
        let x = matrix_from_vec(
            (0..200)
                .map(|i| vec![((i * 37) % 101) as Float, ((i * 13) % 7) as Float])
                .collect(),
        );
        let y: Vec<Label> = (0..200).map(|i| ((i * 37) % 101) as Float * 0.1 + (i % 3) as Float).collect();
        let a = fit(&x, &continuous_spec(2), &y, params(6, Impurity::Variance)).unwrap();
        let b = fit(&x, &continuous_spec(2), &y, params(6, Impurity::Variance)).unwrap();
        assert_eq!(a, b);
    }

    fn partitioned_fit(x: &Matrix, spec: &FeatureSpec, y: &[Label], params: TreeParams, rows: usize) -> TreeNode {
        let binned = BinnedDataset::build(x, spec, params.max_bins).unwrap();
        DecisionTreeBuilder::new(params)
            .with_partition_rows(rows)
            .fit(x, &binned, y)
            .unwrap()
    }

    #[test]
    fn test_partitioned_histograms_match_single_partition() {
        let n = 2 * PARTITION_ROWS + 1808;
        let x = matrix_from_vec(
            (0..n)
                .map(|i| {
                    vec![
                        ((i * 37) % 1009) as Float,
                        ((i * 13) % 7) as Float,
                        ((i * 7919) % 251) as Float,
                    ]
                })
                .collect(),
        );
        let spec = continuous_spec(3);
        let y: Vec<Label> = (0..n).map(|i| ((i * 37) % 1009 / 100 + i % 3) as Float).collect();
        let classes: Vec<Label> = (0..n).map(|i| (((i * 37) % 1009) / 300) as Float).collect();

        for (labels, impurity) in [(&y, Impurity::Variance), (&classes, Impurity::Gini)] {
            let p = params(6, impurity);
            let merged = partitioned_fit(&x, &spec, labels, p, PARTITION_ROWS);
            let single = partitioned_fit(&x, &spec, labels, p, usize::MAX);
            let tiny = partitioned_fit(&x, &spec, labels, p, 97);
            assert!(!merged.is_leaf());
            assert_eq!(merged, single);
            assert_eq!(merged, tiny);
        }
    }

    #[test]
    fn test_large_label_offset_does_not_invent_splits() {
        // Each half holds the same two labels, so no split has any gain.
        let x = matrix_from_vec(vec![vec![0.0], vec![0.0], vec![1.0], vec![1.0]]);
        let base = 1.0e9;
        let y = [base, base + 1.0, base, base + 1.0];
        let root = fit(&x, &continuous_spec(1), &y, params(5, Impurity::Variance)).unwrap();
        assert!(root.is_leaf());
        assert_eq!(root.predict(&[0.0]), base + 0.5);
        match root {
            TreeNode::Leaf { impurity, .. } => assert_eq!(impurity, 0.25),
            TreeNode::Split { .. } => unreachable!(),
        }
    }

    #[test]
    fn test_large_label_offset_keeps_real_split() {
        let x = matrix_from_vec((0..8).map(|i| vec![i as Float]).collect());
        let base = 3.0e12;
        let y: Vec<Label> = (0..8).map(|i| base + if i < 4 { 0.0 } else { 2.0 }).collect();
        let root = fit(&x, &continuous_spec(1), &y, params(5, Impurity::Variance)).unwrap();
        match &root {
            TreeNode::Split { predicate, .. } => {
                assert_eq!(*predicate, SplitPredicate::Threshold { threshold: 3.5 })
            }
            TreeNode::Leaf { .. } => panic!("expected a split"),
        }
        assert_eq!(root.predict(&[0.0]), base);
        assert_eq!(root.predict(&[7.0]), base + 2.0);
    }

    #[test]
    fn test_midrange() {
        assert_eq!(midrange(&[1.0, 2.0, 6.0]), 3.5);
        assert_eq!(midrange(&[Float::MAX, Float::MAX]), Float::MAX);
        assert_eq!(midrange(&[]), 0.0);
    }
}
