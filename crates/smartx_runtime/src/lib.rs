//! Real-time runtime: the ring buffer, switch matrix, pipeline engine
//! and zone worker that actually move and process audio described by a
//! `smartx_model` topology.
//!
//! ```text
//!   device/debug source --(ring buffer)--> switch matrix --(ring buffer)--> pipeline engine --> sink device
//!                                              ^                                  |
//!                                              | per-connection gain / ASRC       | derived zones
//!                                              +----------------------------------+ co-scheduled
//! ```
//!
//! Everything on the tick path (`SwitchMatrix::run`, `PipelineEngine::process`,
//! `ModuleCore::process`) is built to allocate nothing; buffers are sized
//! once when a zone activates.

pub mod error;
pub mod pipeline_engine;
pub mod ring_buffer;
pub mod sched_shim;
pub mod switch_matrix;
pub mod zone_worker;

#[cfg(target_os = "linux")]
pub mod linux;

pub use error::{RuntimeError, RuntimeResult};
pub use pipeline_engine::PipelineEngine;
pub use ring_buffer::{new_ring_buffer, AreaLayout, AudioArea, RingBufferConsumer, RingBufferProducer};
pub use sched_shim::{get_scheduler, MockScheduler, SchedulerShim};
pub use switch_matrix::{build_resampler, JobKind, SwitchMatrix};
pub use zone_worker::{DerivedSchedule, InputFeed, SinkDelivery, ZoneWorker};
