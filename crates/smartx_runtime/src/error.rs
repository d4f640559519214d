//! Runtime errors, composing the model and DSP error families plus the
//! failure modes specific to the real-time data path.

use thiserror::Error;

use smartx_dsp::DspError;
use smartx_model::ModelError;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Dsp(#[from] DspError),

    #[error("ring buffer is full")]
    RingBufferFull,

    #[error("ring buffer is empty")]
    RingBufferEmpty,

    #[error("sample format conversion failed: {0}")]
    FormatConversionFailed(String),

    #[error("rt scheduler unavailable: {0}")]
    SchedulerUnavailable(String),

    #[error("pipeline has a cycle with no delayed link to break it")]
    PipelineCycle,

    #[error("pipeline is ill-formed: {0}")]
    IllFormedPipeline(String),

    #[error("zone worker failed: {0}")]
    WorkerFailed(String),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;
