pub mod actor;

pub use actor::PipelineActor;
