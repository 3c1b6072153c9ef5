//! Typed error taxonomy for the replay-and-mutation engine (see the error
//! handling design: infrastructural failures propagate typed; execution,
//! mutation, rule, and broadcast failures are handled in place and never
//! reach this type).
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("rpc call failed: {0}")]
    Rpc(String),

    #[error("malformed trace data: {0}")]
    MalformedTrace(String),

    #[error("snapshot construction failed: {0}")]
    SnapshotConstruction(String),

    #[error("could not construct a runnable EVM: {0}")]
    Infrastructural(String),
}
