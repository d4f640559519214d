//! `smartx_core`: the public control surface. Owns the event bus, the
//! scheduling configuration loader, and `SmartXbar` — the top-level handle
//! an application constructs and drives through four façades:
//!
//! - [`facade::setup`] — create/destroy/link every model object.
//! - [`facade::routing`] — `connect`/`disconnect`/source groups.
//! - [`facade::processing`] — `send_cmd` to a running module instance.
//! - [`facade::debug`] — WAV probes and the topology XML dump.
//!
//! Everything below `smartx_model`/`smartx_dsp`/`smartx_runtime` is pure
//! data and real-time mechanism; this crate is where those get wired
//! together behind a surface an application actually calls.

pub mod bar;
pub mod config;
pub mod error;
pub mod event_bus;
pub mod facade;

pub use bar::SmartXbar;
pub use config::{SchedPolicy, SchedulingConfig};
pub use error::{BarError, BarResult};
pub use event_bus::{EventBus, EventHandler, PollOutcome, WaitOutcome};
