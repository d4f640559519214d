//! Processing module topology data.
//!
//! This is the module's place in the pipeline graph: its pins, its
//! internal pin mappings, and its configuration properties. The module's
//! actual signal processing behaviour lives behind the `ModuleCore` trait
//! in `smartx_dsp`, which this crate does not depend on — the pipeline
//! engine is what ties the two together.

use serde::{Deserialize, Serialize};

use crate::handle::{ModuleHandle, PinHandle};
use crate::properties::Properties;

/// A processing module instance inside a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingModule {
    pub handle: ModuleHandle,
    pub instance_name: String,
    pub type_name: String,
    pub pins: Vec<PinHandle>,
    /// (input_pin, output_pin) pairs sharing an internal transform, as
    /// opposed to a `ModuleInOut` pin which processes in place.
    pub mappings: Vec<(PinHandle, PinHandle)>,
    pub properties: Properties,
}

impl ProcessingModule {
    pub fn mapped_output_for(&self, input: PinHandle) -> Option<PinHandle> {
        self.mappings
            .iter()
            .find(|(i, _)| *i == input)
            .map(|(_, o)| *o)
    }
}
