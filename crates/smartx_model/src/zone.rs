//! Routing zones: the unit of activation. A base zone owns a sink device
//! and a pipeline; derived zones share the base zone's sink but run their
//! own pipeline at a rate that is a rational multiple of the base rate.

use serde::{Deserialize, Serialize};

use crate::handle::{DeviceHandle, PipelineHandle, PortHandle, ZoneHandle};

/// `ActivePending`/`StopPending` are the transitional states a zone sits
/// in while its worker thread is spinning up or draining; only a zone in
/// `Active` is actually moving audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ZoneState {
    Inactive,
    ActivePending,
    Active,
    StopPending,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingZone {
    pub handle: ZoneHandle,
    pub name: String,
    pub sink_device: Option<DeviceHandle>,
    pub input_ports: Vec<PortHandle>,
    pub pipeline: Option<PipelineHandle>,
    pub derived_zones: Vec<ZoneHandle>,
    pub base_zone: Option<ZoneHandle>,
    pub state: ZoneState,
}

impl RoutingZone {
    pub fn is_base(&self) -> bool {
        self.base_zone.is_none()
    }

    /// Zones in these states have a running or spinning-up worker and
    /// can't have their topology mutated until they've stopped.
    pub fn is_mutation_locked(&self) -> bool {
        matches!(self.state, ZoneState::Active | ZoneState::ActivePending)
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, ZoneState::Active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone(state: ZoneState) -> RoutingZone {
        RoutingZone {
            handle: ZoneHandle(0),
            name: "zone".into(),
            sink_device: None,
            input_ports: Vec::new(),
            pipeline: None,
            derived_zones: Vec::new(),
            base_zone: None,
            state,
        }
    }

    #[test]
    fn test_mutation_lock() {
        assert!(zone(ZoneState::Active).is_mutation_locked());
        assert!(zone(ZoneState::ActivePending).is_mutation_locked());
        assert!(!zone(ZoneState::Inactive).is_mutation_locked());
        assert!(!zone(ZoneState::StopPending).is_mutation_locked());
    }

    #[test]
    fn test_is_base() {
        let mut z = zone(ZoneState::Inactive);
        assert!(z.is_base());
        z.base_zone = Some(ZoneHandle(1));
        assert!(!z.is_base());
    }
}
