use std::fmt::Write as _;

use arbor_core::{ArborError, Float, Impurity, Record, Result};
use serde::{Deserialize, Serialize};

use crate::decision_tree::{SplitPredicate, TreeNode, TreeParams};
use crate::encoder::FeatureEncoder;

/// Version tag written into every persisted model.
pub const MODEL_FORMAT_VERSION: u32 = 1;

/// Learning task of a model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    #[default]
    Regression,
    Classification,
}

impl Algorithm {
    pub fn default_impurity(self) -> Impurity {
        match self {
            Algorithm::Regression => Impurity::Variance,
            Algorithm::Classification => Impurity::Gini,
        }
    }

    /// Checks that `impurity` is meaningful for this task.
    pub fn check_impurity(self, impurity: Impurity) -> Result<()> {
        if impurity.is_classification() == (self == Algorithm::Classification) {
            Ok(())
        } else {
            Err(ArborError::InvalidConfig(format!(
                "impurity {impurity:?} cannot be used for {self:?}"
            )))
        }
    }
}

/// A trained **decision tree** together with everything needed to encode
/// new records exactly as the training records were encoded.
///
/// Immutable once built; share it across prediction threads by reference
/// or `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionTreeModel {
    format_version: u32,
    label_field: String,
    algorithm: Algorithm,
    params: TreeParams,
    /// Class count for classification, 0 for regression.
    num_classes: usize,
    encoder: FeatureEncoder,
    root: TreeNode,
}

impl DecisionTreeModel {
    pub(crate) fn new(
        label_field: String,
        algorithm: Algorithm,
        params: TreeParams,
        num_classes: usize,
        encoder: FeatureEncoder,
        root: TreeNode,
    ) -> Self {
        Self {
            format_version: MODEL_FORMAT_VERSION,
            label_field,
            algorithm,
            params,
            num_classes,
            encoder,
            root,
        }
    }

    pub fn format_version(&self) -> u32 {
        self.format_version
    }

    pub fn label_field(&self) -> &str {
        &self.label_field
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn params(&self) -> &TreeParams {
        &self.params
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn encoder(&self) -> &FeatureEncoder {
        &self.encoder
    }

    pub fn root(&self) -> &TreeNode {
        &self.root
    }

    pub fn feature_names(&self) -> Vec<String> {
        self.encoder.spec().names().map(str::to_owned).collect()
    }

    pub fn num_features(&self) -> usize {
        self.encoder.num_features()
    }

    pub fn depth(&self) -> usize {
        self.root.depth()
    }

    pub fn num_nodes(&self) -> usize {
        self.root.num_nodes()
    }

    pub fn num_leaves(&self) -> usize {
        self.root.num_leaves()
    }

    /// Checks the structure of a deserialized model.
    ///
    /// Every split must reference an existing feature with a predicate of the
    /// matching kind, and categorical splits must use sorted in-vocabulary codes.
    ///
    /// # Errors
    ///
    /// - [`ArborError::InvalidModel`] describing the first inconsistency found
    pub fn validate(&self) -> Result<()> {
        self.encoder.validate()?;
        if self.algorithm.check_impurity(self.params.impurity).is_err() {
            return Err(ArborError::invalid_model(format!(
                "impurity {:?} does not match algorithm {:?}",
                self.params.impurity, self.algorithm
            )));
        }

        let fields = self.encoder.spec().fields();
        let mut stack = vec![&self.root];
        while let Some(node) = stack.pop() {
            let TreeNode::Split {
                feature,
                predicate,
                left,
                right,
                ..
            } = node
            else {
                continue;
            };
            let field = fields.get(*feature).ok_or_else(|| {
                ArborError::invalid_model(format!(
                    "split on feature {feature} but the model has {} features",
                    fields.len()
                ))
            })?;
            match (predicate, self.encoder.vocabulary(*feature)) {
                (SplitPredicate::Threshold { threshold }, None) if !threshold.is_nan() => {}
                (SplitPredicate::Categories { categories }, Some(vocabulary)) => {
                    let in_range = categories.iter().all(|&c| (c as usize) < vocabulary.len());
                    let sorted = categories.windows(2).all(|w| w[0] < w[1]);
                    if !in_range || !sorted {
                        return Err(ArborError::invalid_model(format!(
                            "split on '{}' has invalid category codes {categories:?}",
                            field.name
                        )));
                    }
                }
                _ => {
                    return Err(ArborError::invalid_model(format!(
                        "split predicate on '{}' does not match the feature kind",
                        field.name
                    )))
                }
            }
            stack.push(left);
            stack.push(right);
        }
        Ok(())
    }

    /// Predicts from an already encoded feature vector.
    ///
    /// # Errors
    ///
    /// - [`ArborError::ShapeMismatch`] if `features` has the wrong length
    pub fn predict_vector(&self, features: &[Float]) -> Result<Float> {
        if features.len() != self.num_features() {
            return Err(ArborError::ShapeMismatch {
                expected: format!("{} features", self.num_features()),
                got: format!("{} features", features.len()),
            });
        }
        Ok(self.root.predict(features))
    }

    /// Encodes `record` with the stored encoder and predicts.
    pub fn predict_record(&self, record: &Record) -> Result<Float> {
        let features = self.encoder.encode(record)?;
        Ok(self.root.predict(&features))
    }

    /// Renders the tree as indented `If` / `Else` / `Predict` lines.
    ///
    /// ```text
    /// DecisionTreeModel regression of depth 1 with 3 nodes
    ///   If (dofM <= 13.5)
    ///    Predict: 1
    ///   Else (dofM > 13.5)
    ///    Predict: 0
    /// ```
    pub fn to_debug_string(&self) -> String {
        let mut out = format!(
            "DecisionTreeModel {} of depth {} with {} nodes\n",
            match self.algorithm {
                Algorithm::Regression => "regression",
                Algorithm::Classification => "classifier",
            },
            self.depth(),
            self.num_nodes()
        );
        self.write_node(&mut out, &self.root, 1);
        out
    }

    fn write_node(&self, out: &mut String, node: &TreeNode, indent: usize) {
        let pad = " ".repeat(indent * 2);
        match node {
            TreeNode::Leaf { prediction, .. } => {
                let _ = writeln!(out, "{pad} Predict: {prediction}");
            }
            TreeNode::Split {
                feature,
                predicate,
                left,
                right,
                ..
            } => {
                let name = self
                    .encoder
                    .spec()
                    .fields()
                    .get(*feature)
                    .map_or("?", |f| f.name.as_str());
                let (yes, no) = self.describe(*feature, name, predicate);
                let _ = writeln!(out, "{pad}If ({yes})");
                self.write_node(out, left, indent + 1);
                let _ = writeln!(out, "{pad}Else ({no})");
                self.write_node(out, right, indent + 1);
            }
        }
    }

    fn describe(&self, feature: usize, name: &str, predicate: &SplitPredicate) -> (String, String) {
        match predicate {
            SplitPredicate::Threshold { threshold } => {
                (format!("{name} <= {threshold}"), format!("{name} > {threshold}"))
            }
            SplitPredicate::Categories { categories } => {
                let vocabulary = self.encoder.vocabulary(feature);
                let labels: Vec<String> = categories
                    .iter()
                    .map(|&code| {
                        vocabulary
                            .and_then(|v| v.get(code as usize))
                            .map_or_else(|| code.to_string(), ToString::to_string)
                    })
                    .collect();
                let set = labels.join(",");
                (format!("{name} in {{{set}}}"), format!("{name} not in {{{set}}}"))
            }
        }
    }
}
