//! Typed trainer / predictor configuration.
//!
//! Configs deserialize from camelCase JSON and can also be built from the flat
//! string properties a pipeline host hands to a stage, e.g.
//!
//! ```text
//! fileSetName            = decision-tree-regression-model
//! featureFieldsToInclude = dofM,dofW,carrier
//! cardinalityMapping     = dofW:7
//! labelField             = delayed
//! maxBins                = 100
//! maxDepth               = 9
//! ```

use std::collections::BTreeMap;

use arbor_core::{ArborError, Impurity, Result};
use serde::{Deserialize, Serialize};

use crate::decision_tree::TreeParams;
use crate::encoder::FieldSelection;
use crate::model::Algorithm;

pub const DEFAULT_MAX_BINS: usize = 32;
pub const DEFAULT_MAX_DEPTH: usize = 5;

fn default_max_bins() -> usize {
    DEFAULT_MAX_BINS
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

/// Flat string properties keyed by name.
pub type Properties = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainerConfig {
    /// Artifact name the trained model is stored under.
    #[serde(alias = "fileSetName")]
    pub model_name: String,
    /// Optional sub-path of the model store.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub feature_fields_to_include: Vec<String>,
    #[serde(default)]
    pub feature_fields_to_exclude: Vec<String>,
    /// Categorical fields and their declared cardinality.
    #[serde(default)]
    pub cardinality_mapping: BTreeMap<String, usize>,
    pub label_field: String,
    #[serde(default = "default_max_bins")]
    pub max_bins: usize,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default)]
    pub algorithm: Algorithm,
    /// Overrides the algorithm's default impurity.
    #[serde(default)]
    pub impurity: Option<Impurity>,
}

impl TrainerConfig {
    pub fn new(model_name: impl Into<String>, label_field: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            path: None,
            feature_fields_to_include: Vec::new(),
            feature_fields_to_exclude: Vec::new(),
            cardinality_mapping: BTreeMap::new(),
            label_field: label_field.into(),
            max_bins: DEFAULT_MAX_BINS,
            max_depth: DEFAULT_MAX_DEPTH,
            algorithm: Algorithm::default(),
            impurity: None,
        }
    }

    pub fn include<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.feature_fields_to_include = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn exclude<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.feature_fields_to_exclude = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn categorical(mut self, field: impl Into<String>, cardinality: usize) -> Self {
        self.cardinality_mapping.insert(field.into(), cardinality);
        self
    }

    pub fn max_bins(mut self, max_bins: usize) -> Self {
        self.max_bins = max_bins;
        self
    }

    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn impurity(mut self, impurity: Impurity) -> Self {
        self.impurity = Some(impurity);
        self
    }

    /// Builds a config from pipeline-stage properties.
    ///
    /// Recognized keys: `fileSetName` / `modelName`, `path`,
    /// `featureFieldsToInclude`, `featureFieldsToExclude`, `cardinalityMapping`,
    /// `labelField`, `maxBins`, `maxDepth`, `algorithm`, `impurity`.
    pub fn from_properties(props: &Properties) -> Result<Self> {
        let model_name = model_name_property(props)?;
        let label_field = required(props, "labelField")?;

        let mut config = Self::new(model_name, label_field);
        config.path = optional(props, "path").map(str::to_owned);
        config.feature_fields_to_include = parse_field_list(optional(props, "featureFieldsToInclude"));
        config.feature_fields_to_exclude = parse_field_list(optional(props, "featureFieldsToExclude"));
        if let Some(mapping) = optional(props, "cardinalityMapping") {
            config.cardinality_mapping = parse_cardinality_mapping(mapping)?;
        }
        if let Some(v) = optional(props, "maxBins") {
            config.max_bins = parse_usize("maxBins", v)?;
        }
        if let Some(v) = optional(props, "maxDepth") {
            config.max_depth = parse_usize("maxDepth", v)?;
        }
        if let Some(v) = optional(props, "algorithm") {
            config.algorithm = parse_enum("algorithm", v)?;
        }
        if let Some(v) = optional(props, "impurity") {
            config.impurity = Some(parse_enum("impurity", v)?);
        }
        Ok(config)
    }

    /// Impurity to train with: the override, or the algorithm's default.
    pub fn resolved_impurity(&self) -> Impurity {
        self.impurity
            .unwrap_or_else(|| self.algorithm.default_impurity())
    }

    pub fn selection(&self) -> Result<FieldSelection> {
        FieldSelection::from_lists(
            &self.feature_fields_to_include,
            &self.feature_fields_to_exclude,
        )
    }

    pub fn tree_params(&self) -> TreeParams {
        TreeParams {
            max_depth: self.max_depth,
            max_bins: self.max_bins,
            impurity: self.resolved_impurity(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.model_name.trim().is_empty() {
            return Err(ArborError::InvalidConfig("model name must not be empty".into()));
        }
        if self.label_field.trim().is_empty() {
            return Err(ArborError::InvalidConfig("labelField must not be empty".into()));
        }
        self.selection()?;
        self.algorithm.check_impurity(self.resolved_impurity())?;
        self.tree_params().validate()?;
        for (field, &cardinality) in &self.cardinality_mapping {
            if cardinality == 0 {
                return Err(ArborError::InvalidConfig(format!(
                    "cardinality of '{field}' must be at least 1"
                )));
            }
            if cardinality > self.max_bins {
                return Err(ArborError::InvalidHyperparameter {
                    name: "maxBins".into(),
                    value: format!(
                        "{} (categorical field '{field}' has cardinality {cardinality})",
                        self.max_bins
                    ),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictorConfig {
    /// Artifact name of the model to load.
    #[serde(alias = "fileSetName")]
    pub model_name: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub feature_fields_to_include: Vec<String>,
    #[serde(default)]
    pub feature_fields_to_exclude: Vec<String>,
    /// Output field receiving the prediction.
    pub prediction_field: String,
}

impl PredictorConfig {
    pub fn new(model_name: impl Into<String>, prediction_field: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            path: None,
            feature_fields_to_include: Vec::new(),
            feature_fields_to_exclude: Vec::new(),
            prediction_field: prediction_field.into(),
        }
    }

    pub fn include<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.feature_fields_to_include = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn exclude<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.feature_fields_to_exclude = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Recognized keys: `fileSetName` / `modelName`, `path`,
    /// `featureFieldsToInclude`, `featureFieldsToExclude`, `predictionField`.
    pub fn from_properties(props: &Properties) -> Result<Self> {
        let mut config = Self::new(
            model_name_property(props)?,
            required(props, "predictionField")?,
        );
        config.path = optional(props, "path").map(str::to_owned);
        config.feature_fields_to_include = parse_field_list(optional(props, "featureFieldsToInclude"));
        config.feature_fields_to_exclude = parse_field_list(optional(props, "featureFieldsToExclude"));
        Ok(config)
    }

    pub fn selection(&self) -> Result<FieldSelection> {
        FieldSelection::from_lists(
            &self.feature_fields_to_include,
            &self.feature_fields_to_exclude,
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.model_name.trim().is_empty() {
            return Err(ArborError::InvalidConfig("model name must not be empty".into()));
        }
        if self.prediction_field.trim().is_empty() {
            return Err(ArborError::InvalidConfig(
                "predictionField must not be empty".into(),
            ));
        }
        self.selection()?;
        Ok(())
    }
}

fn optional<'a>(props: &'a Properties, key: &str) -> Option<&'a str> {
    props
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

fn required<'a>(props: &'a Properties, key: &str) -> Result<&'a str> {
    optional(props, key)
        .ok_or_else(|| ArborError::InvalidConfig(format!("missing required property '{key}'")))
}

fn model_name_property(props: &Properties) -> Result<&str> {
    optional(props, "fileSetName")
        .or_else(|| optional(props, "modelName"))
        .ok_or_else(|| ArborError::InvalidConfig("missing required property 'fileSetName'".into()))
}

/// Splits `a, b,c` into trimmed, non-empty names.
pub fn parse_field_list(value: Option<&str>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Parses `field:cardinality[,field:cardinality...]`.
pub fn parse_cardinality_mapping(value: &str) -> Result<BTreeMap<String, usize>> {
    let mut mapping = BTreeMap::new();
    for entry in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (field, cardinality) = entry.split_once(':').ok_or_else(|| {
            ArborError::InvalidConfig(format!(
                "cardinality mapping entry '{entry}' is not of the form field:cardinality"
            ))
        })?;
        let field = field.trim();
        if field.is_empty() {
            return Err(ArborError::InvalidConfig(format!(
                "cardinality mapping entry '{entry}' has an empty field name"
            )));
        }
        let cardinality = parse_usize("cardinalityMapping", cardinality)?;
        if mapping.insert(field.to_owned(), cardinality).is_some() {
            return Err(ArborError::InvalidConfig(format!(
                "cardinality mapping lists '{field}' more than once"
            )));
        }
    }
    Ok(mapping)
}

fn parse_usize(name: &str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse()
        .map_err(|_| ArborError::InvalidHyperparameter {
            name: name.to_owned(),
            value: value.to_owned(),
        })
}

fn parse_enum<T: serde::de::DeserializeOwned>(name: &str, value: &str) -> Result<T> {
    serde_json::from_value(serde_json::Value::String(value.trim().to_lowercase())).map_err(|_| {
        ArborError::InvalidHyperparameter {
            name: name.to_owned(),
            value: value.to_owned(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision_tree::MAX_TREE_DEPTH;

    fn props(pairs: &[(&str, &str)]) -> Properties {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_trainer_from_properties() {
        let config = TrainerConfig::from_properties(&props(&[
            ("fileSetName", "decision-tree-regression-model"),
            (
                "featureFieldsToInclude",
                "dofM,dofW,carrier,originId,destId,scheduleDepTime,scheduledArrTime,elapsedTime",
            ),
            ("cardinalityMapping", "dofW:7"),
            ("labelField", "delayed"),
            ("maxBins", "100"),
            ("maxDepth", "9"),
        ]))
        .unwrap();

        assert_eq!(config.model_name, "decision-tree-regression-model");
        assert_eq!(config.feature_fields_to_include.len(), 8);
        assert_eq!(config.feature_fields_to_include[1], "dofW");
        assert_eq!(config.cardinality_mapping.get("dofW"), Some(&7));
        assert_eq!(config.max_bins, 100);
        assert_eq!(config.max_depth, 9);
        assert_eq!(config.algorithm, Algorithm::Regression);
        assert_eq!(config.resolved_impurity(), Impurity::Variance);
        config.validate().unwrap();
    }

    #[test]
    fn test_trainer_defaults_from_json() {
        let config: TrainerConfig = serde_json::from_str(
            r#"{"fileSetName": "m", "labelField": "y", "algorithm": "classification"}"#,
        )
        .unwrap();
        assert_eq!(config.max_bins, DEFAULT_MAX_BINS);
        assert_eq!(config.max_depth, DEFAULT_MAX_DEPTH);
        assert_eq!(config.resolved_impurity(), Impurity::Gini);
        assert_eq!(config.selection().unwrap(), FieldSelection::All);
    }

    #[test]
    fn test_missing_label_field_property() {
        let result = TrainerConfig::from_properties(&props(&[("fileSetName", "m")]));
        assert!(matches!(result, Err(ArborError::InvalidConfig(_))));
    }

    #[test]
    fn test_bad_integer_property() {
        let result = TrainerConfig::from_properties(&props(&[
            ("fileSetName", "m"),
            ("labelField", "y"),
            ("maxDepth", "nine"),
        ]));
        assert!(matches!(
            result,
            Err(ArborError::InvalidHyperparameter { ref name, .. }) if name == "maxDepth"
        ));
    }

    #[test]
    fn test_parse_cardinality_mapping() {
        let mapping = parse_cardinality_mapping("dofW:7, carrier : 20").unwrap();
        assert_eq!(mapping.get("dofW"), Some(&7));
        assert_eq!(mapping.get("carrier"), Some(&20));

        assert!(parse_cardinality_mapping("dofW").is_err());
        assert!(parse_cardinality_mapping("dofW:x").is_err());
        assert!(parse_cardinality_mapping(":3").is_err());
        assert!(parse_cardinality_mapping("a:1,a:2").is_err());
        assert!(parse_cardinality_mapping("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_field_list_trims() {
        assert_eq!(
            parse_field_list(Some(" tailNum, flightNum ,,origin")),
            vec!["tailNum", "flightNum", "origin"]
        );
        assert!(parse_field_list(None).is_empty());
    }

    #[test]
    fn test_validate_rejects_bad_hyperparameters() {
        assert!(TrainerConfig::new("m", "y").max_bins(1).validate().is_err());
        assert!(TrainerConfig::new("m", "y").max_depth(0).validate().is_err());
        assert!(TrainerConfig::new("m", "y")
            .max_depth(MAX_TREE_DEPTH + 1)
            .validate()
            .is_err());
        assert!(TrainerConfig::new("m", "y")
            .categorical("dofW", 7)
            .max_bins(4)
            .validate()
            .is_err());
        assert!(TrainerConfig::new("", "y").validate().is_err());
    }

    #[test]
    fn test_validate_rejects_mismatched_impurity() {
        let config = TrainerConfig::new("m", "y").impurity(Impurity::Gini);
        assert!(matches!(config.validate(), Err(ArborError::InvalidConfig(_))));

        let config = TrainerConfig::new("m", "y")
            .algorithm(Algorithm::Classification)
            .impurity(Impurity::Entropy);
        config.validate().unwrap();
    }

    #[test]
    fn test_include_and_exclude_conflict() {
        let config = TrainerConfig::new("m", "y").include(["a"]).exclude(["b"]);
        assert!(matches!(config.validate(), Err(ArborError::InvalidConfig(_))));
    }

    #[test]
    fn test_predictor_from_properties() {
        let config = PredictorConfig::from_properties(&props(&[
            ("fileSetName", "decision-tree-regression-model"),
            (
                "featureFieldsToExclude",
                "tailNum,flightNum,origin,dest,deptime,depDelayMins,arrTime,arrDelay,distance",
            ),
            ("predictionField", "delayed"),
        ]))
        .unwrap();
        assert_eq!(config.prediction_field, "delayed");
        assert_eq!(config.feature_fields_to_exclude.len(), 9);
        assert!(matches!(config.selection().unwrap(), FieldSelection::Exclude(_)));
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_enum_properties() {
        let config = TrainerConfig::from_properties(&props(&[
            ("modelName", "m"),
            ("labelField", "y"),
            ("algorithm", "Classification"),
            ("impurity", "entropy"),
        ]))
        .unwrap();
        assert_eq!(config.algorithm, Algorithm::Classification);
        assert_eq!(config.impurity, Some(Impurity::Entropy));

        let result = TrainerConfig::from_properties(&props(&[
            ("modelName", "m"),
            ("labelField", "y"),
            ("impurity", "mse"),
        ]));
        assert!(result.is_err());
    }
}
