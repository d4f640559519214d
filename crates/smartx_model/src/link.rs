//! Links join two pins inside a pipeline.

use serde::{Deserialize, Serialize};

use crate::handle::{LinkHandle, PinHandle};

/// Immediate links are resolved within a single period (the sink sees the
/// source's output from the same tick); delayed links are resolved across
/// periods (the sink sees the source's output from the *previous* tick),
/// which is how a pipeline can contain a feedback cycle without deadlocking
/// the topological build order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkType {
    Immediate,
    Delayed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub handle: LinkHandle,
    pub source_pin: PinHandle,
    pub sink_pin: PinHandle,
    pub link_type: LinkType,
}

impl Link {
    pub fn is_delayed(&self) -> bool {
        matches!(self.link_type, LinkType::Delayed)
    }
}
