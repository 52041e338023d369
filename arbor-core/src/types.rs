pub type Float = f64;
pub type Label = Float;
pub type Matrix = nalgebra::DMatrix<Float>;

/// One encoded row, one slot per feature.
pub type FeatureVector = Vec<Float>;
