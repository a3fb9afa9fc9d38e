use gdc_core::error::CoreError;
use gdc_core::gateway::GatewayError;
use gdc_core::retry::RetryError;
use gdc_core::saga::SagaRejection;
use gdc_core::store::StoreError;
use gdc_core::types::DbId;
use gdc_events::ChannelError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Rejected upload or ingest conflict; returned to the ingest caller.
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Registry lookups failed for good (non-transient, or retries spent).
    #[error(transparent)]
    Lookup(#[from] RetryError<GatewayError>),

    /// Publishing failed for good.
    #[error(transparent)]
    Publish(#[from] RetryError<ChannelError>),

    #[error(transparent)]
    Saga(#[from] SagaRejection),

    #[error("Malformed message: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: DbId },

    #[error("Worker pool is shut down")]
    PoolClosed,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl PipelineError {
    /// Fold store conflicts into the core conflict the ingest caller sees.
    pub fn from_ingest_store(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(msg) => Self::Core(CoreError::Conflict(msg)),
            other => Self::Store(other),
        }
    }
}
