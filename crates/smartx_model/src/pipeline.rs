//! Pipeline topology: the set of pins, modules and links a routing zone
//! processes audio through. The execution engine that walks this graph
//! lives in `smartx_runtime::pipeline_engine`; this is data only.

use serde::{Deserialize, Serialize};

use crate::handle::{LinkHandle, ModuleHandle, PinHandle, PipelineHandle};

/// A pipeline moves from `Building` (pins/modules/links can still be
/// added or removed) to `Initialized` once the runtime has computed a
/// processing order for it; after that, topology changes require
/// destroying and rebuilding the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineBuildState {
    Building,
    Initialized,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub handle: PipelineHandle,
    pub name: String,
    pub sample_rate: u32,
    pub period_frames: u32,
    pub pins: Vec<PinHandle>,
    pub modules: Vec<ModuleHandle>,
    pub links: Vec<LinkHandle>,
    pub state: PipelineBuildState,
}

impl Pipeline {
    pub fn is_building(&self) -> bool {
        matches!(self.state, PipelineBuildState::Building)
    }
}
