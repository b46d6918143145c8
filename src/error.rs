use thiserror::Error;

/// Engine-level failures.
///
/// Transport implementations report their own faults as `anyhow::Error`;
/// those only become an `EngineError` at pool startup. Faults raised while a
/// task is running are logged and contained, never returned.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to initialize transport {index} of {size}: {source}")]
    PoolInit {
        index: usize,
        size: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("transport pool is closed")]
    PoolClosed,

    #[error("concurrency gate is closed")]
    GateClosed,
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
