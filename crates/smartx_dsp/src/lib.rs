//! DSP module ABI.
//!
//! This crate defines the capability contract between the pipeline
//! engine (`smartx_runtime`) and processing modules (`ModuleCore`,
//! `ModuleFactory`), plus a handful of reference modules exercising that
//! contract: [`passthrough`], [`volume`] and [`mixer`]. Real audio
//! algorithms (EQ, DRC, real mixing topologies) are out of scope — this
//! is the plug-in boundary, not the plug-ins themselves.

pub mod error;
pub mod mixer;
pub mod module;
pub mod passthrough;
pub mod volume;

pub use error::{DspError, DspResult};
pub use mixer::{MixerFactory, MixerModule};
pub use module::{
    AudioStream, ModuleBinding, ModuleConfig, ModuleCore, ModuleEventEmitter, ModuleEventPayload,
    ModuleFactory,
};
pub use passthrough::{PassthroughFactory, PassthroughModule};
pub use volume::{VolumeFactory, VolumeModule};
