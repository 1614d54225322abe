pub mod engine;
pub mod metadata;

pub use engine::{DecisionEngine, DecisionOracle};
pub use metadata::MetadataClient;
