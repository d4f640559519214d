//! The switch matrix: moves PCM data between connected ports, applying
//! whatever job the connection needs (a straight copy, a format
//! conversion, or full asynchronous sample-rate conversion) and a
//! per-connection gain.
//!
//! A `SwitchMatrix` owns one end of each connection it serves — the
//! consumer side of the source port's ring buffer, and the producer side
//! of the sink port's ring buffer. Whoever owns the *other* ends (a
//! device feeding the source, a pipeline engine draining the sink) is
//! wired up by the caller at `connect()` time.

use std::collections::HashMap;

use parking_lot::Mutex;
use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};
use smartx_model::handle::PortHandle;

use crate::error::{RuntimeError, RuntimeResult};
use crate::ring_buffer::{copy_audio_areas, RingBufferConsumer, RingBufferProducer};
use smartx_model::clock::DataFormat;

/// Builds the `Asrc` job kind's resampler for a source running at
/// `source_rate` feeding a zone at `target_rate`. `chunk_size` is the
/// zone's period in frames, since `rubato` is configured for a fixed
/// input chunk size and pre-allocates accordingly at construction (no
/// allocation on the tick path afterwards).
pub fn build_resampler(
    source_rate: u32,
    target_rate: u32,
    channels: usize,
    chunk_size: usize,
) -> RuntimeResult<Box<dyn Resampler<f32> + Send>> {
    let ratio = target_rate as f64 / source_rate as f64;
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, chunk_size, channels)
        .map_err(|e| RuntimeError::FormatConversionFailed(e.to_string()))?;
    Ok(Box::new(resampler))
}

/// What a connection's job does to the data in flight.
pub enum JobKind {
    /// Same format, same rate: byte-for-byte copy (with gain applied).
    Copy,
    /// Same rate, different sample format/channel layout.
    FormatConvert,
    /// Different, possibly drifting, sample rates: goes through `rubato`.
    Asrc(Box<dyn Resampler<f32> + Send>),
}

pub struct Connection {
    pub source_port: PortHandle,
    pub sink_port: PortHandle,
    source_consumer: RingBufferConsumer,
    sink_producer: RingBufferProducer,
    kind: JobKind,
    /// Linear gain applied while copying; see the source-group/per-connection
    /// gain supplement.
    gain_linear: f32,
    source_format: DataFormat,
    sink_format: DataFormat,
}

/// Guards the connection table. Connect/disconnect happen off the
/// real-time path (setup-time control calls); `run()` is called once per
/// period from the zone worker's tick.
#[derive(Default)]
pub struct SwitchMatrix {
    connections: Mutex<HashMap<(PortHandle, PortHandle), Connection>>,
}

impl SwitchMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn connect(
        &self,
        source_port: PortHandle,
        sink_port: PortHandle,
        source_consumer: RingBufferConsumer,
        sink_producer: RingBufferProducer,
        source_format: DataFormat,
        sink_format: DataFormat,
        kind: JobKind,
    ) -> RuntimeResult<()> {
        let mut connections = self.connections.lock();
        let key = (source_port, sink_port);
        if connections.contains_key(&key) {
            return Err(RuntimeError::Model(smartx_model::ModelError::AlreadyExists(
                format!("connection {source_port} -> {sink_port}"),
            )));
        }
        connections.insert(
            key,
            Connection {
                source_port,
                sink_port,
                source_consumer,
                sink_producer,
                kind,
                gain_linear: 1.0,
                source_format,
                sink_format,
            },
        );
        Ok(())
    }

    pub fn disconnect(&self, source_port: PortHandle, sink_port: PortHandle) -> RuntimeResult<()> {
        let mut connections = self.connections.lock();
        connections
            .remove(&(source_port, sink_port))
            .ok_or_else(|| {
                RuntimeError::Model(smartx_model::ModelError::NotFound(format!(
                    "connection {source_port} -> {sink_port}"
                )))
            })?;
        Ok(())
    }

    /// Removes every connection touching `port`, as either source or
    /// sink — used when a device or zone is torn down.
    pub fn remove_connections(&self, port: PortHandle) {
        let mut connections = self.connections.lock();
        connections.retain(|(src, sink), _| *src != port && *sink != port);
    }

    pub fn set_gain_linear(
        &self,
        source_port: PortHandle,
        sink_port: PortHandle,
        gain_linear: f32,
    ) -> RuntimeResult<()> {
        let mut connections = self.connections.lock();
        let conn = connections
            .get_mut(&(source_port, sink_port))
            .ok_or_else(|| {
                RuntimeError::Model(smartx_model::ModelError::NotFound(format!(
                    "connection {source_port} -> {sink_port}"
                )))
            })?;
        conn.gain_linear = gain_linear;
        Ok(())
    }

    pub fn active_connections(&self) -> Vec<(PortHandle, PortHandle)> {
        // Snapshot before returning: callers may disconnect while iterating
        // the result, and this must not observe that in-progress mutation.
        self.connections.lock().keys().copied().collect()
    }

    /// Whether the connection's job is `Asrc`. `JobKind` can't derive
    /// `PartialEq` (the `Asrc` variant holds a resampler trait object), so
    /// callers that need to assert on job selection go through this instead.
    pub fn is_asrc_job(&self, source_port: PortHandle, sink_port: PortHandle) -> bool {
        matches!(
            self.connections.lock().get(&(source_port, sink_port)).map(|c| &c.kind),
            Some(JobKind::Asrc(_))
        )
    }

    /// Runs every connection's job for up to `frames_requested` frames.
    /// Real-time safe once jobs are `Copy`/`FormatConvert`; `Asrc` jobs
    /// call into `rubato`, which pre-allocates its internal buffers at
    /// construction and does not allocate per call.
    pub fn run(&self, frames_requested: u32) -> RuntimeResult<()> {
        let mut connections = self.connections.lock();
        for conn in connections.values_mut() {
            conn.run_one(frames_requested)?;
        }
        Ok(())
    }
}

impl Connection {
    fn run_one(&mut self, frames_requested: u32) -> RuntimeResult<()> {
        let read = self.source_consumer.begin_access(frames_requested)?;
        let granted = read.frames_granted();
        if granted == 0 {
            read.end_access(0);
            return Ok(());
        }
        let mut write = self.sink_producer.begin_access(granted);
        let to_process = write.frames_granted();
        match &mut self.kind {
            JobKind::Copy | JobKind::FormatConvert => {
                copy_audio_areas(
                    write.areas(),
                    self.sink_format,
                    write.bytes_mut(),
                    read.areas(),
                    self.source_format,
                    read.bytes(),
                    to_process,
                )?;
                apply_gain(write.bytes_mut(), self.sink_format, self.gain_linear);
            }
            JobKind::Asrc(resampler) => {
                run_asrc(
                    resampler.as_mut(),
                    read.areas(),
                    self.source_format,
                    read.bytes(),
                    write.areas(),
                    self.sink_format,
                    write.bytes_mut(),
                    to_process,
                    self.gain_linear,
                )?;
            }
        }
        write.end_access(to_process)?;
        read.end_access(granted);
        Ok(())
    }
}

fn apply_gain(bytes: &mut [u8], format: DataFormat, gain: f32) {
    if (gain - 1.0).abs() < f32::EPSILON {
        return;
    }
    let sample_bytes = format.bytes_per_sample();
    for chunk in bytes.chunks_exact_mut(sample_bytes) {
        match format {
            DataFormat::Float32 => {
                let value = f32::from_le_bytes(chunk.try_into().unwrap());
                chunk.copy_from_slice(&(value * gain).to_le_bytes());
            }
            DataFormat::Int16 => {
                let value = i16::from_le_bytes(chunk.try_into().unwrap());
                let scaled = (value as f32 * gain).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
                chunk.copy_from_slice(&scaled.to_le_bytes());
            }
            DataFormat::Int32 => {
                let value = i32::from_le_bytes(chunk.try_into().unwrap());
                let scaled = (value as f64 * gain as f64).clamp(i32::MIN as f64, i32::MAX as f64) as i32;
                chunk.copy_from_slice(&scaled.to_le_bytes());
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_asrc(
    resampler: &mut (dyn Resampler<f32> + Send),
    src_areas: &[crate::ring_buffer::AudioArea],
    src_format: DataFormat,
    src_bytes: &[u8],
    dst_areas: &[crate::ring_buffer::AudioArea],
    dst_format: DataFormat,
    dst_bytes: &mut [u8],
    frame_count: u32,
    gain: f32,
) -> RuntimeResult<()> {
    let channels = src_areas.len();
    let mut input_channels: Vec<Vec<f32>> = vec![Vec::with_capacity(frame_count as usize); channels];
    for (ch, area) in src_areas.iter().enumerate() {
        for frame in 0..frame_count {
            let offset = area.frame_offset_bytes(frame);
            let sample = crate::ring_buffer::read_sample_normalized(src_format, src_bytes, offset);
            input_channels[ch].push(sample * gain);
        }
    }
    let output_channels = resampler
        .process(&input_channels, None)
        .map_err(|e| RuntimeError::FormatConversionFailed(e.to_string()))?;
    for (ch, area) in dst_areas.iter().enumerate() {
        let out_channel = &output_channels[ch];
        for (frame, value) in out_channel.iter().enumerate().take(frame_count as usize) {
            let offset = area.frame_offset_bytes(frame as u32);
            crate::ring_buffer::write_sample_normalized(dst_format, dst_bytes, offset, *value);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring_buffer::{new_ring_buffer, AreaLayout};

    #[test]
    fn test_copy_job_moves_data() {
        let (mut src_producer, src_consumer) =
            new_ring_buffer(1, DataFormat::Float32, AreaLayout::Interleaved, 4, 2);
        let (sink_producer, mut sink_consumer) =
            new_ring_buffer(1, DataFormat::Float32, AreaLayout::Interleaved, 4, 2);

        {
            let mut access = src_producer.begin_access(4);
            let bytes = access.bytes_mut();
            for (i, chunk) in bytes.chunks_exact_mut(4).enumerate() {
                chunk.copy_from_slice(&(i as f32).to_le_bytes());
            }
            access.end_access(4).unwrap();
        }

        let matrix = SwitchMatrix::new();
        matrix
            .connect(
                PortHandle::new(0),
                PortHandle::new(1),
                src_consumer,
                sink_producer,
                DataFormat::Float32,
                DataFormat::Float32,
                JobKind::Copy,
            )
            .unwrap();
        matrix.run(4).unwrap();

        let access = sink_consumer.begin_access(4).unwrap();
        assert_eq!(access.frames_granted(), 4);
        let area = &access.areas()[0];
        let value = crate::ring_buffer::read_sample_normalized(
            DataFormat::Float32,
            access.bytes(),
            area.frame_offset_bytes(2),
        );
        assert_eq!(value, 2.0);
    }

    #[test]
    fn test_active_connections_snapshot() {
        let (_src_producer, src_consumer) =
            new_ring_buffer(1, DataFormat::Float32, AreaLayout::Interleaved, 4, 2);
        let (sink_producer, _sink_consumer) =
            new_ring_buffer(1, DataFormat::Float32, AreaLayout::Interleaved, 4, 2);
        let matrix = SwitchMatrix::new();
        matrix
            .connect(
                PortHandle::new(0),
                PortHandle::new(1),
                src_consumer,
                sink_producer,
                DataFormat::Float32,
                DataFormat::Float32,
                JobKind::Copy,
            )
            .unwrap();
        let snapshot = matrix.active_connections();
        matrix.disconnect(PortHandle::new(0), PortHandle::new(1)).unwrap();
        assert_eq!(snapshot, vec![(PortHandle::new(0), PortHandle::new(1))]);
        assert!(matrix.active_connections().is_empty());
    }
}
