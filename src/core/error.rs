use thiserror::Error;

/// Failure taxonomy for the pipeline. Transport failures are retried at the
/// boundary where they occur and degrade to the stage's fail-safe state once
/// the retry budget is spent; invariant violations are surfaced to the
/// caller as business rejections.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("oracle response failed schema validation: {0}")]
    OracleParse(String),

    #[error("market {0} is already indexed")]
    DuplicateMarket(String),

    #[error("market {0} already has a decision in flight")]
    MarketBusy(String),

    #[error("venue rejected order: {0}")]
    VenueRejection(String),

    #[error("store error: {0}")]
    Store(String),
}

impl PipelineError {
    /// Only transport failures are worth another attempt; everything else is
    /// either terminal or a legitimate rejection.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::Transport(_))
    }
}
