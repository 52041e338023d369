pub mod pipeline;

// Re-export public API
pub use arbor_core::*;
pub use arbor_models::*;
pub use pipeline::*;
