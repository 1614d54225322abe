pub mod embedder;
pub mod index;
pub mod judgement_cache;
pub mod matcher;
pub mod tokenization;
