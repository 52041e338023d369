use arbor_core::{ArborError, Label, Record, Result, Value};

use crate::binning::BinnedDataset;
use crate::config::TrainerConfig;
use crate::decision_tree::DecisionTreeBuilder;
use crate::encoder::{FeatureEncoder, FeatureSpec};
use crate::model::DecisionTreeModel;
use crate::store::ModelStore;

/// Trains a [`DecisionTreeModel`] from labeled records.
///
/// The first record defines the schema used to resolve the feature
/// selection; every record must carry the selected fields and the label.
#[derive(Debug, Clone)]
pub struct DecisionTreeTrainer {
    config: TrainerConfig,
}

impl DecisionTreeTrainer {
    /// # Errors
    ///
    /// Anything [`TrainerConfig::validate`] rejects.
    pub fn new(config: TrainerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Trains a model in memory.
    ///
    /// # Errors
    ///
    /// - [`ArborError::InvalidTrainingData`] for no records, no feature fields,
    ///   or a missing / null / non-numeric label
    /// - [`ArborError::FeatureCardinalityExceeded`] if a categorical field has more
    ///   distinct values than declared
    /// - [`ArborError::MissingFeatureField`], [`ArborError::NonNumericFeature`] for
    ///   records that do not fit the resolved feature spec
    pub fn fit(&self, records: &[Record]) -> Result<DecisionTreeModel> {
        let config = &self.config;
        let sample = records
            .first()
            .ok_or_else(|| ArborError::invalid_training_data("no training records"))?;

        let spec = FeatureSpec::resolve(
            &config.selection()?,
            sample,
            &config.cardinality_mapping,
            &config.label_field,
        )?;
        if spec.is_empty() {
            return Err(ArborError::invalid_training_data(
                "feature selection yields no feature fields",
            ));
        }

        let labels = extract_labels(records, &config.label_field)?;
        let encoder = FeatureEncoder::fit(spec, records)?;
        let x = encoder.encode_all(records)?;

        let params = config.tree_params();
        let binned = BinnedDataset::build(&x, encoder.spec(), params.max_bins)?;
        let builder = DecisionTreeBuilder::new(params);
        let num_classes = builder.class_count(&labels)?;
        let root = builder.fit(&x, &binned, &labels)?;

        let model = DecisionTreeModel::new(
            config.label_field.clone(),
            config.algorithm,
            params,
            num_classes,
            encoder,
            root,
        );

        tracing::info!(
            model = %config.model_name,
            records = records.len(),
            features = model.num_features(),
            depth = model.depth(),
            nodes = model.num_nodes(),
            "trained decision tree"
        );
        Ok(model)
    }

    /// Trains and, only on success, writes the model to `store`.
    pub fn fit_and_save(&self, records: &[Record], store: &ModelStore) -> Result<DecisionTreeModel> {
        let model = self.fit(records)?;
        store
            .scoped(self.config.path.as_deref())?
            .save(&self.config.model_name, &model)?;
        Ok(model)
    }
}

fn extract_labels(records: &[Record], label_field: &str) -> Result<Vec<Label>> {
    records
        .iter()
        .enumerate()
        .map(|(i, record)| match record.get(label_field) {
            Some(Value::Int(v)) => Ok(*v as Label),
            Some(Value::Float(v)) if v.is_finite() => Ok(*v),
            Some(Value::Null) => Err(ArborError::invalid_training_data(format!(
                "record {i} has a null label '{label_field}'"
            ))),
            Some(other) => Err(ArborError::invalid_training_data(format!(
                "record {i} has non-numeric label {other}"
            ))),
            None => Err(ArborError::invalid_training_data(format!(
                "record {i} has no label field '{label_field}'"
            ))),
        })
        .collect()
}
