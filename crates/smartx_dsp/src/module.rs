//! The module ABI: the capability contract the pipeline engine drives
//! and DSP plug-ins implement.
//!
//! `ModuleCore::process` runs on the real-time tick path and inherits
//! `AudioProcessor`'s real-time-safety contract from the teacher crate:
//! no allocation, no syscalls, no unbounded loops, no blocking locks held
//! across a call boundary that the engine doesn't already expect.

use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use smartx_model::properties::Properties;

use crate::error::DspResult;

/// A single-precision interleaved audio buffer shared between the
/// pipeline engine (which copies link data into/out of it) and a
/// module's `process()` (which reads and writes it in place).
///
/// Sized once at pipeline build time and never reallocated on the tick
/// path, matching the "no allocation on the real-time path" invariant.
#[derive(Clone)]
pub struct AudioStream {
    samples: Arc<Mutex<Vec<f32>>>,
    channel_count: u16,
}

impl AudioStream {
    pub fn new(channel_count: u16, period_frames: u32) -> Self {
        Self {
            samples: Arc::new(Mutex::new(vec![0.0; channel_count as usize * period_frames as usize])),
            channel_count,
        }
    }

    pub fn channel_count(&self) -> u16 {
        self.channel_count
    }

    pub fn with_samples<R>(&self, f: impl FnOnce(&[f32]) -> R) -> R {
        f(&self.samples.lock())
    }

    pub fn with_samples_mut<R>(&self, f: impl FnOnce(&mut [f32]) -> R) -> R {
        f(&mut self.samples.lock())
    }

    pub fn copy_from(&self, other: &AudioStream) {
        if self.same_buffer(other) {
            return;
        }
        let src = other.samples.lock();
        let mut dst = self.samples.lock();
        dst.copy_from_slice(&src);
    }

    /// True when `self` and `other` are clones of the same underlying
    /// buffer (the in-out pin case), where a copy would be a self-copy
    /// and, worse, would deadlock `parking_lot::Mutex` by locking it
    /// twice on one thread.
    pub fn same_buffer(&self, other: &AudioStream) -> bool {
        Arc::ptr_eq(&self.samples, &other.samples)
    }
}

/// Payload for a module-originated event, forwarded by the pipeline
/// engine to the event bus. Carries `instance_name`/`type_name` so the
/// bus doesn't need module-type knowledge to label the event.
#[derive(Debug, Clone)]
pub struct ModuleEventPayload {
    pub instance_name: String,
    pub type_name: String,
    pub properties: Properties,
}

/// Handed to a module core so it can raise events without knowing about
/// the event bus type, which lives several crates up from here.
#[derive(Clone)]
pub struct ModuleEventEmitter {
    instance_name: String,
    type_name: String,
    sender: Sender<ModuleEventPayload>,
}

impl ModuleEventEmitter {
    pub fn new(instance_name: String, type_name: String, sender: Sender<ModuleEventPayload>) -> Self {
        Self {
            instance_name,
            type_name,
            sender,
        }
    }

    pub fn emit(&self, properties: Properties) {
        let _ = self.sender.send(ModuleEventPayload {
            instance_name: self.instance_name.clone(),
            type_name: self.type_name.clone(),
            properties,
        });
    }
}

/// The audio-stream bindings a module is constructed with: one entry per
/// pin, keyed by pin name. An in-out pin appears under the same name in
/// both maps pointing at the same `AudioStream` (in-place processing); a
/// mapped input/output pair appears as distinct entries in each map.
#[derive(Default)]
pub struct ModuleBinding {
    pub input_streams: HashMap<String, AudioStream>,
    pub output_streams: HashMap<String, AudioStream>,
}

pub struct ModuleConfig {
    pub instance_name: String,
    pub type_name: String,
    pub properties: Properties,
    pub binding: ModuleBinding,
    pub emitter: ModuleEventEmitter,
}

/// A running module instance. Built by a [`ModuleFactory`] and driven by
/// the pipeline engine once per period.
pub trait ModuleCore: Send {
    /// Process one period's worth of audio: read `input_streams`, write
    /// `output_streams`. Must not allocate or block.
    fn process(&mut self);

    /// Handle an out-of-band command (the `IasProcessingModule` cmd/event
    /// surface). Returns a reply property bag.
    fn send_cmd(&mut self, cmd: &Properties) -> DspResult<Properties>;

    fn reset(&mut self) {}

    fn name(&self) -> &str;
}

/// Constructs module instances of a given type. One factory per module
/// type is registered with the pipeline engine; `create` is called once
/// per instance at pipeline build time, off the real-time path, so it
/// may allocate freely.
pub trait ModuleFactory: Send + Sync {
    fn type_name(&self) -> &'static str;

    fn create(&self, config: ModuleConfig) -> DspResult<Box<dyn ModuleCore>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_copy() {
        let a = AudioStream::new(2, 4);
        let b = AudioStream::new(2, 4);
        a.with_samples_mut(|s| s.iter_mut().for_each(|v| *v = 1.0));
        b.copy_from(&a);
        b.with_samples(|s| assert!(s.iter().all(|&v| v == 1.0)));
    }

    #[test]
    fn test_emitter_sends_payload() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let emitter = ModuleEventEmitter::new("vol1".into(), "volume".into(), tx);
        emitter.emit(Properties::new());
        let payload = rx.recv().unwrap();
        assert_eq!(payload.instance_name, "vol1");
        assert_eq!(payload.type_name, "volume");
    }
}
