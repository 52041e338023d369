//! Run-level composition of training and prediction.
//!
//! A run never returns `Err`: failures are folded into a [`RunReport`] with
//! [`RunStatus::Failed`], the way a pipeline host records a failed stage.

use std::fmt;

use arbor_core::{ArborError, Record};
use arbor_models::{
    DecisionTreeModel, DecisionTreePredictor, DecisionTreeTrainer, ModelStore, PredictorConfig,
    TrainerConfig,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Succeeded,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Succeeded => f.write_str("SUCCEEDED"),
            RunStatus::Failed => f.write_str("FAILED"),
        }
    }
}

/// What a prediction run does with a record that cannot be scored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Fail the whole run.
    #[default]
    Abort,
    /// Drop the record, log a warning, and keep going.
    Skip,
}

/// Outcome of one run.
///
/// `output` is `Some` exactly when `status` is [`RunStatus::Succeeded`];
/// `error` is `Some` exactly when it is [`RunStatus::Failed`].
#[derive(Debug)]
pub struct RunReport<T> {
    pub status: RunStatus,
    pub output: Option<T>,
    pub error: Option<ArborError>,
    /// Records dropped under [`ErrorPolicy::Skip`].
    pub skipped: usize,
}

impl<T> RunReport<T> {
    fn succeeded(output: T, skipped: usize) -> Self {
        Self {
            status: RunStatus::Succeeded,
            output: Some(output),
            error: None,
            skipped,
        }
    }

    fn failed(error: ArborError) -> Self {
        Self {
            status: RunStatus::Failed,
            output: None,
            error: Some(error),
            skipped: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }
}

pub type TrainingRun = RunReport<DecisionTreeModel>;
pub type PredictionRun = RunReport<Vec<Record>>;

/// Trains on `records` and stores the model as `config.model_name`.
///
/// Nothing is written unless training succeeds.
pub fn run_training(config: &TrainerConfig, records: &[Record], store: &ModelStore) -> TrainingRun {
    tracing::info!(
        model = %config.model_name,
        records = records.len(),
        "training run started"
    );

    let result = DecisionTreeTrainer::new(config.clone())
        .and_then(|trainer| trainer.fit_and_save(records, store));

    match result {
        Ok(model) => {
            tracing::info!(
                model = %config.model_name,
                status = %RunStatus::Succeeded,
                depth = model.depth(),
                nodes = model.num_nodes(),
                "training run finished"
            );
            RunReport::succeeded(model, 0)
        }
        Err(error) => {
            tracing::error!(
                model = %config.model_name,
                status = %RunStatus::Failed,
                %error,
                "training run failed"
            );
            RunReport::failed(error)
        }
    }
}

/// Loads `config.model_name` from `store` and scores `records`.
///
/// Outputs keep input order. Under [`ErrorPolicy::Skip`] only record-scoped
/// errors (see [`ArborError::is_record_error`]) are skipped; anything else
/// fails the run.
pub fn run_prediction(
    config: &PredictorConfig,
    records: &[Record],
    store: &ModelStore,
    policy: ErrorPolicy,
) -> PredictionRun {
    tracing::info!(
        model = %config.model_name,
        records = records.len(),
        ?policy,
        "prediction run started"
    );

    let predictor = match DecisionTreePredictor::load(config.clone(), store) {
        Ok(predictor) => predictor,
        Err(error) => {
            tracing::error!(model = %config.model_name, %error, "prediction run failed");
            return RunReport::failed(error);
        }
    };

    let mut outputs = Vec::with_capacity(records.len());
    let mut skipped = 0;
    for (index, result) in predictor.predict_batch(records).into_iter().enumerate() {
        match result {
            Ok(record) => outputs.push(record),
            Err(error) if policy == ErrorPolicy::Skip && error.is_record_error() => {
                tracing::warn!(record = index, %error, "skipping record");
                skipped += 1;
            }
            Err(error) => {
                tracing::error!(
                    model = %config.model_name,
                    record = index,
                    %error,
                    "prediction run failed"
                );
                return RunReport::failed(error);
            }
        }
    }

    tracing::info!(
        model = %config.model_name,
        status = %RunStatus::Succeeded,
        predicted = outputs.len(),
        skipped,
        "prediction run finished"
    );
    RunReport::succeeded(outputs, skipped)
}
