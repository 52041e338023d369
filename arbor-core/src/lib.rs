pub mod error;
pub mod impurity;
pub mod record;
pub mod types;

pub use types::{FeatureVector, Float, Label, Matrix};

pub use error::{ArborError, Result};

pub use impurity::{entropy_from_counts, gini_from_counts, variance_from_sums, Impurity};

pub use record::{Record, Value};
