//! Topology model for the smart audio crossbar.
//!
//! ```text
//!            +----------------------------------------------------+
//!            |                     Registry                       |
//!            |  devices   ports   zones   pipelines   pins        |
//!            |  modules   links                                  |
//!            +----------------------------------------------------+
//!                 ^            ^             ^            ^
//!                 |            |             |            |
//!            AudioDevice   AudioPort   RoutingZone     Pipeline
//!                                           |               |
//!                                     derived zones   modules/pins/links
//! ```
//!
//! Every object above is owned exactly once, by the registry's arena, and
//! referred to everywhere else by a small `Copy` handle (see
//! [`handle`]). This sidesteps the reference cycles the object graph
//! naturally wants (a pipeline points at its pins, a pin points back at
//! its pipeline, a zone points at a pipeline and a pipeline's sink feeds
//! back into the zone...) without resorting to `Rc<RefCell<_>>` webs.
//!
//! This crate is pure topology data and has no knowledge of real-time
//! audio processing; `smartx_dsp` defines the module processing contract
//! and `smartx_runtime` is what actually moves samples through the graph
//! described here.

pub mod clock;
pub mod device;
pub mod error;
pub mod event;
pub mod handle;
pub mod link;
pub mod module;
pub mod pin;
pub mod pipeline;
pub mod port;
pub mod properties;
pub mod registry;
pub mod zone;

pub use clock::{ClockType, DataFormat};
pub use device::{AudioDevice, DeviceDirection, DeviceParams};
pub use error::{ModelError, ModelResult};
pub use event::ModelEvent;
pub use handle::{DeviceHandle, LinkHandle, ModuleHandle, PinHandle, PipelineHandle, PortHandle, ZoneHandle};
pub use link::{Link, LinkType};
pub use module::ProcessingModule;
pub use pin::{AudioPin, PinDirection, PinOwner};
pub use pipeline::{Pipeline, PipelineBuildState};
pub use port::{AudioPort, PortDirection, PortOwner};
pub use properties::{PropertyValue, Properties};
pub use registry::Registry;
pub use zone::{RoutingZone, ZoneState};
