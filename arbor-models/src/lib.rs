pub mod binning;
pub mod config;
pub mod decision_tree;
pub mod encoder;
pub mod model;
pub mod predictor;
pub mod store;
pub mod trainer;

pub use binning::{BinnedDataset, FeatureBins};
pub use config::{PredictorConfig, Properties, TrainerConfig};
pub use decision_tree::{DecisionTreeBuilder, SplitPredicate, TreeNode, TreeParams};
pub use encoder::{Category, FeatureEncoder, FeatureField, FeatureKind, FeatureSpec, FieldSelection};
pub use model::{Algorithm, DecisionTreeModel, MODEL_FORMAT_VERSION};
pub use predictor::DecisionTreePredictor;
pub use store::ModelStore;
pub use trainer::DecisionTreeTrainer;
