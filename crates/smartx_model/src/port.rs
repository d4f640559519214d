//! Audio ports: the channel-addressable slices of a device or routing
//! zone that links connect to.

use serde::{Deserialize, Serialize};

use crate::handle::{DeviceHandle, PortHandle, ZoneHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortDirection {
    Input,
    Output,
}

/// Whichever object a port's channels live on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortOwner {
    Device(DeviceHandle),
    Zone(ZoneHandle),
}

/// A contiguous run of channels on a device or zone.
///
/// `id` is the port's optional positive identifier used by the routing
/// facade to address it from outside the registry; a negative value
/// means the port is anonymous and can only be reached by name or handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioPort {
    pub handle: PortHandle,
    pub name: String,
    pub id: i32,
    pub channel_count: u16,
    pub direction: PortDirection,
    pub base_index: u16,
    pub owner: PortOwner,
}

impl AudioPort {
    pub fn has_positive_id(&self) -> bool {
        self.id > 0
    }

    pub fn channel_range(&self) -> std::ops::Range<u16> {
        self.base_index..self.base_index + self.channel_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_range() {
        let port = AudioPort {
            handle: PortHandle(0),
            name: "out".into(),
            id: -1,
            channel_count: 2,
            direction: PortDirection::Output,
            base_index: 4,
            owner: PortOwner::Device(DeviceHandle(0)),
        };
        assert_eq!(port.channel_range(), 4..6);
        assert!(!port.has_positive_id());
    }
}
