//! Pipeline-internal pins: the endpoints that links join inside a
//! pipeline, as distinct from the device/zone-facing [`crate::port::AudioPort`].

use serde::{Deserialize, Serialize};

use crate::handle::{ModuleHandle, PinHandle, PipelineHandle};

/// A pin's role in the pipeline graph.
///
/// `ModuleInOut` pins process audio in place and reuse a single stream for
/// both directions; `ModuleInput`/`ModuleOutput` pins are joined in pairs
/// by a module's internal mapping and each get a distinct stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PinDirection {
    PipelineInput,
    PipelineOutput,
    ModuleInput,
    ModuleOutput,
    ModuleInOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PinOwner {
    Pipeline(PipelineHandle),
    Module(ModuleHandle),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioPin {
    pub handle: PinHandle,
    pub name: String,
    pub channel_count: u16,
    pub direction: PinDirection,
    pub owner: PinOwner,
}

impl AudioPin {
    pub fn is_pipeline_boundary(&self) -> bool {
        matches!(
            self.direction,
            PinDirection::PipelineInput | PinDirection::PipelineOutput
        )
    }

    pub fn is_module_side(&self) -> bool {
        matches!(
            self.direction,
            PinDirection::ModuleInput | PinDirection::ModuleOutput | PinDirection::ModuleInOut
        )
    }

    /// Pins that act as a link *source* (data flows out of them): pipeline
    /// inputs and module outputs/in-outs.
    pub fn can_be_link_source(&self) -> bool {
        matches!(
            self.direction,
            PinDirection::PipelineInput | PinDirection::ModuleOutput | PinDirection::ModuleInOut
        )
    }

    /// Pins that act as a link *sink* (data flows into them): pipeline
    /// outputs and module inputs/in-outs.
    pub fn can_be_link_sink(&self) -> bool {
        matches!(
            self.direction,
            PinDirection::PipelineOutput | PinDirection::ModuleInput | PinDirection::ModuleInOut
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_roles() {
        let pin = AudioPin {
            handle: PinHandle(0),
            name: "in".into(),
            channel_count: 2,
            direction: PinDirection::ModuleInput,
            owner: PinOwner::Module(ModuleHandle(0)),
        };
        assert!(pin.can_be_link_sink());
        assert!(!pin.can_be_link_source());
    }

    #[test]
    fn test_in_out_is_both() {
        let pin = AudioPin {
            handle: PinHandle(1),
            name: "io".into(),
            channel_count: 2,
            direction: PinDirection::ModuleInOut,
            owner: PinOwner::Module(ModuleHandle(0)),
        };
        assert!(pin.can_be_link_sink());
        assert!(pin.can_be_link_source());
    }
}
