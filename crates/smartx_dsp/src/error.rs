//! DSP module errors.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DspError {
    #[error("invalid module configuration: {0}")]
    InvalidConfiguration(String),

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("processing failed: {0}")]
    ProcessingFailed(String),
}

pub type DspResult<T> = Result<T, DspError>;
