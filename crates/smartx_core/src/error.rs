//! Top-level error type every façade method returns.

use thiserror::Error;

use smartx_dsp::DspError;
use smartx_model::ModelError;
use smartx_runtime::RuntimeError;

#[derive(Error, Debug)]
pub enum BarError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Dsp(#[from] DspError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type BarResult<T> = Result<T, BarError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_from_model() {
        let err: BarError = ModelError::NotFound("device".into()).into();
        assert!(matches!(err, BarError::Model(_)));
    }

    #[test]
    fn test_error_from_runtime() {
        let err: BarError = RuntimeError::PipelineCycle.into();
        assert!(matches!(err, BarError::Runtime(_)));
    }
}
