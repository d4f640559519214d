//! Audio devices: the source/sink endpoints a routing zone or pipeline
//! exchanges PCM data with.

use serde::{Deserialize, Serialize};

use crate::clock::{ClockType, DataFormat};
use crate::handle::{DeviceHandle, PortHandle, ZoneHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceDirection {
    Source,
    Sink,
}

/// Period geometry and clock behaviour for a device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceParams {
    pub sample_rate: u32,
    pub period_frames: u32,
    pub num_periods: u32,
    pub format: DataFormat,
    pub channels: u16,
    pub clock: ClockType,
}

impl DeviceParams {
    /// Total byte capacity the device's ring buffer needs to hold
    /// `num_periods` full periods.
    pub fn buffer_capacity_bytes(&self) -> usize {
        self.period_frames as usize
            * self.num_periods as usize
            * self.channels as usize
            * self.format.bytes_per_sample()
    }

    pub fn period_duration_us(&self) -> u64 {
        (self.period_frames as u64 * 1_000_000) / self.sample_rate.max(1) as u64
    }
}

/// An audio source or sink, e.g. an ALSA device or a virtual loopback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioDevice {
    pub handle: DeviceHandle,
    pub name: String,
    pub direction: DeviceDirection,
    pub params: DeviceParams,
    pub ports: Vec<PortHandle>,
    /// Set only for sink devices: the routing zone that owns this sink.
    pub linked_zone: Option<ZoneHandle>,
}

impl AudioDevice {
    pub fn is_source(&self) -> bool {
        matches!(self.direction, DeviceDirection::Source)
    }

    pub fn is_sink(&self) -> bool {
        matches!(self.direction, DeviceDirection::Sink)
    }
}
