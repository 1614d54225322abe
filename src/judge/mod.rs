pub mod gateway;

pub use gateway::{JudgeGateway, RelevanceOracle};
