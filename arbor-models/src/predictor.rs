use std::sync::Arc;

use arbor_core::{ArborError, Record, Result, Value};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::config::PredictorConfig;
use crate::encoder::FieldSelection;
use crate::model::DecisionTreeModel;
use crate::store::ModelStore;

/// Scores records with a trained model, writing the prediction into
/// `prediction_field` of a copy of each record.
#[derive(Debug, Clone)]
pub struct DecisionTreePredictor {
    config: PredictorConfig,
    selection: FieldSelection,
    model: Arc<DecisionTreeModel>,
}

impl DecisionTreePredictor {
    pub fn new(config: PredictorConfig, model: Arc<DecisionTreeModel>) -> Result<Self> {
        config.validate()?;
        let selection = config.selection()?;
        Ok(Self {
            config,
            selection,
            model,
        })
    }

    /// Loads the model named by `config` from `store` (under `config.path`).
    ///
    /// # Errors
    ///
    /// - [`ArborError::ModelNotFound`] if no usable artifact exists
    pub fn load(config: PredictorConfig, store: &ModelStore) -> Result<Self> {
        config.validate()?;
        let model = store
            .scoped(config.path.as_deref())?
            .load(&config.model_name)?;
        Self::new(config, Arc::new(model))
    }

    pub fn config(&self) -> &PredictorConfig {
        &self.config
    }

    pub fn model(&self) -> &Arc<DecisionTreeModel> {
        &self.model
    }

    /// Predicts one record.
    ///
    /// Every input field is carried over unchanged and in order; the prediction
    /// is appended, or replaces an existing `prediction_field` in place.
    pub fn predict_record(&self, record: &Record) -> Result<Record> {
        self.check_schema(record)?;
        let prediction = self.model.predict_record(record)?;

        let mut output = record.clone();
        output.set(self.config.prediction_field.as_str(), Value::Float(prediction));
        Ok(output)
    }

    /// Predicts every record, in input order, with one result per record.
    pub fn predict_batch(&self, records: &[Record]) -> Vec<Result<Record>> {
        #[cfg(feature = "parallel")]
        return records.par_iter().map(|r| self.predict_record(r)).collect();

        #[cfg(not(feature = "parallel"))]
        return records.iter().map(|r| self.predict_record(r)).collect();
    }

    fn check_schema(&self, record: &Record) -> Result<()> {
        if self.selection == FieldSelection::All {
            return Ok(());
        }
        let expected = self.model.feature_names();
        if let Some(absent) = expected.iter().find(|name| !record.contains(name)) {
            return Err(ArborError::missing_field(absent.clone()));
        }
        let got = self
            .selection
            .resolve(record, &self.config.prediction_field)?;
        if got != expected {
            return Err(ArborError::FeatureSchemaMismatch { expected, got });
        }
        Ok(())
    }
}
