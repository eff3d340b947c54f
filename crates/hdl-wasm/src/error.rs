#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unsupported data type: {0}")]
    UnsupportedDataType(String),

    #[error("unknown operator: {0}")]
    UnknownOperator(String),

    #[error("generated WASM failed validation: {0}")]
    ValidationFailed(String),

    #[error("state layout needs {needed} bytes, exceeding the {cap} byte memory cap")]
    MemoryLimitExceeded { needed: u64, cap: u64 },

    #[error("simulation did not settle after {0} iterations")]
    SettleDidNotConverge(u32),

    #[error("$readmem could not resolve file: {0}")]
    MissingFile(String),

    #[error("state blob is {got} bytes, expected {expected}")]
    StateSizeMismatch { expected: usize, got: usize },

    #[error("unknown variable: {0}")]
    UnknownVariable(String),

    #[error("WASM engine error: {0}")]
    Engine(#[from] wasmi::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
