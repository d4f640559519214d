//! Lock-free SPSC PCM ring buffer with ALSA-style area descriptors.
//!
//! Built directly on `rtrb`'s byte ring (the same crate and chunk-commit
//! idiom the teacher uses in `gecko_core::stream`), with a PCM-aware
//! two-phase `begin_access`/`end_access` layer on top.
//!
//! `rtrb`'s chunk API hands back possibly-uninitialized, possibly
//! wrap-split memory tied to the borrow of the `Producer`/`Consumer`
//! for the call. Rather than fight that lifetime by caching a raw
//! pointer into it (what the original, pointer-based, area-descriptor
//! design would do), each side keeps one pre-allocated scratch buffer —
//! sized once at construction, never reallocated on the tick path — and
//! `begin_access` hands out [`AudioArea`] views into that scratch buffer
//! instead of directly into the ring's internal storage. Committing
//! copies the scratch contents into (or out of) the ring in one shot.
//! This costs one extra copy per period versus true zero-copy mmap
//! access, in exchange for a fully safe implementation.

use std::mem::MaybeUninit;

use smartx_model::clock::DataFormat;

use crate::error::{RuntimeError, RuntimeResult};

/// How channels are laid out within one period's worth of bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AreaLayout {
    /// Samples for all channels interleaved frame-by-frame: the common
    /// case, and the only layout any device in this system actually uses.
    Interleaved,
    /// Each channel occupies its own contiguous region of the period.
    Planar,
}

/// One channel's location within an accessed byte region, in the style
/// of ALSA's `snd_pcm_channel_area_t`: a base offset, a bit offset within
/// that byte (for sub-byte-aligned formats, always 0 for the integer/
/// float PCM formats this system supports), and the stride in bits
/// between consecutive frames for this channel.
#[derive(Debug, Clone, Copy)]
pub struct AudioArea {
    pub offset_bytes: usize,
    pub first_bit_offset: u32,
    pub stride_bits: u32,
    pub channel_index: u16,
}

fn channel_areas(
    layout: AreaLayout,
    channels: u16,
    format: DataFormat,
    period_frames: u32,
) -> Vec<AudioArea> {
    let sample_bits = format.bytes_per_sample() as u32 * 8;
    match layout {
        AreaLayout::Interleaved => (0..channels)
            .map(|ch| AudioArea {
                offset_bytes: ch as usize * format.bytes_per_sample(),
                first_bit_offset: 0,
                stride_bits: sample_bits * channels as u32,
                channel_index: ch,
            })
            .collect(),
        AreaLayout::Planar => {
            let region_bytes = period_frames as usize * format.bytes_per_sample();
            (0..channels)
                .map(|ch| AudioArea {
                    offset_bytes: ch as usize * region_bytes,
                    first_bit_offset: 0,
                    stride_bits: sample_bits,
                    channel_index: ch,
                })
                .collect()
        }
    }
}

impl AudioArea {
    /// Byte offset of `frame_index`'s sample for this channel, within
    /// the byte region the area was generated for.
    pub fn frame_offset_bytes(&self, frame_index: u32) -> usize {
        self.offset_bytes + (frame_index as u64 * self.stride_bits as u64 / 8) as usize
    }
}

pub(crate) fn read_sample_normalized(format: DataFormat, bytes: &[u8], offset: usize) -> f32 {
    match format {
        DataFormat::Int16 => {
            let raw = i16::from_le_bytes([bytes[offset], bytes[offset + 1]]);
            raw as f32 / i16::MAX as f32
        }
        DataFormat::Int32 => {
            let raw = i32::from_le_bytes([
                bytes[offset],
                bytes[offset + 1],
                bytes[offset + 2],
                bytes[offset + 3],
            ]);
            raw as f32 / i32::MAX as f32
        }
        DataFormat::Float32 => f32::from_le_bytes([
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ]),
    }
}

pub(crate) fn write_sample_normalized(format: DataFormat, bytes: &mut [u8], offset: usize, value: f32) {
    match format {
        DataFormat::Int16 => {
            let raw = (value.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            bytes[offset..offset + 2].copy_from_slice(&raw.to_le_bytes());
        }
        DataFormat::Int32 => {
            let raw = (value.clamp(-1.0, 1.0) * i32::MAX as f32) as i32;
            bytes[offset..offset + 4].copy_from_slice(&raw.to_le_bytes());
        }
        DataFormat::Float32 => {
            bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        }
    }
}

/// Copies `frame_count` frames from `src_areas`/`src_bytes` to
/// `dst_areas`/`dst_bytes`, converting sample format if the two sides
/// differ. This is the "copy" and "format-convert" switch-matrix job
/// kinds' shared implementation; sample-rate conversion is layered on
/// top separately since it changes the frame count.
pub fn copy_audio_areas(
    dst_areas: &[AudioArea],
    dst_format: DataFormat,
    dst_bytes: &mut [u8],
    src_areas: &[AudioArea],
    src_format: DataFormat,
    src_bytes: &[u8],
    frame_count: u32,
) -> RuntimeResult<()> {
    if dst_areas.len() != src_areas.len() {
        return Err(RuntimeError::FormatConversionFailed(format!(
            "channel count mismatch: dst has {}, src has {}",
            dst_areas.len(),
            src_areas.len()
        )));
    }
    for (dst_area, src_area) in dst_areas.iter().zip(src_areas.iter()) {
        for frame in 0..frame_count {
            let src_offset = src_area.frame_offset_bytes(frame);
            let dst_offset = dst_area.frame_offset_bytes(frame);
            let sample = read_sample_normalized(src_format, src_bytes, src_offset);
            write_sample_normalized(dst_format, dst_bytes, dst_offset, sample);
        }
    }
    Ok(())
}

fn frame_bytes(channels: u16, format: DataFormat) -> usize {
    channels as usize * format.bytes_per_sample()
}

/// The write side of a ring buffer, typically owned by whatever feeds the
/// device (a source device's hardware callback, or a switch-matrix job
/// writing into a zone's input port buffer).
pub struct RingBufferProducer {
    inner: rtrb::Producer<u8>,
    scratch: Vec<u8>,
    channels: u16,
    format: DataFormat,
    layout: AreaLayout,
    period_frames: u32,
}

impl RingBufferProducer {
    pub fn begin_access(&mut self, frames_requested: u32) -> WriteAccess<'_> {
        let fb = frame_bytes(self.channels, self.format);
        let free_frames = (self.inner.slots() / fb) as u32;
        let scratch_cap_frames = (self.scratch.len() / fb) as u32;
        let granted = frames_requested.min(free_frames).min(scratch_cap_frames);
        let areas = channel_areas(self.layout, self.channels, self.format, granted.max(1));
        WriteAccess {
            producer: self,
            areas,
            frames_granted: granted,
            frame_bytes: fb,
        }
    }

    pub fn capacity_frames(&self) -> u32 {
        (self.scratch.len() / frame_bytes(self.channels, self.format)) as u32
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn format(&self) -> DataFormat {
        self.format
    }
}

pub struct WriteAccess<'a> {
    producer: &'a mut RingBufferProducer,
    areas: Vec<AudioArea>,
    frames_granted: u32,
    frame_bytes: usize,
}

impl<'a> WriteAccess<'a> {
    pub fn areas(&self) -> &[AudioArea] {
        &self.areas
    }

    pub fn frames_granted(&self) -> u32 {
        self.frames_granted
    }

    /// The scratch region the caller should fill with exactly
    /// `frames_granted() * frame_bytes` bytes before calling `end_access`.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        let len = self.frames_granted as usize * self.frame_bytes;
        &mut self.producer.scratch[..len]
    }

    /// Commits `frames_committed` frames (clamped to what was granted)
    /// from the scratch region into the ring.
    pub fn end_access(self, frames_committed: u32) -> RuntimeResult<()> {
        let committed = frames_committed.min(self.frames_granted);
        let byte_len = committed as usize * self.frame_bytes;
        if byte_len == 0 {
            return Ok(());
        }
        let mut chunk = self
            .producer
            .inner
            .write_chunk_uninit(byte_len)
            .map_err(|_| RuntimeError::RingBufferFull)?;
        let (first, second) = chunk.as_mut_slices();
        let scratch = &self.producer.scratch[..byte_len];
        write_maybe_uninit(first, &scratch[..first.len()]);
        write_maybe_uninit(second, &scratch[first.len()..]);
        unsafe {
            chunk.commit_all();
        }
        Ok(())
    }
}

fn write_maybe_uninit(dst: &mut [MaybeUninit<u8>], src: &[u8]) {
    for (d, s) in dst.iter_mut().zip(src.iter()) {
        d.write(*s);
    }
}

/// The read side of a ring buffer, typically owned by whatever drains
/// the zone's pipeline input (the switch matrix) or the sink device.
pub struct RingBufferConsumer {
    inner: rtrb::Consumer<u8>,
    scratch: Vec<u8>,
    channels: u16,
    format: DataFormat,
    layout: AreaLayout,
}

impl RingBufferConsumer {
    pub fn begin_access(&mut self, frames_requested: u32) -> RuntimeResult<ReadAccess<'_>> {
        let fb = frame_bytes(self.channels, self.format);
        let available_frames = (self.inner.slots() / fb) as u32;
        let scratch_cap_frames = (self.scratch.len() / fb) as u32;
        let granted = frames_requested.min(available_frames).min(scratch_cap_frames);
        let byte_len = granted as usize * fb;
        if byte_len > 0 {
            let chunk = self
                .inner
                .read_chunk(byte_len)
                .map_err(|_| RuntimeError::RingBufferEmpty)?;
            let (first, second) = chunk.as_slices();
            self.scratch[..first.len()].copy_from_slice(first);
            self.scratch[first.len()..first.len() + second.len()].copy_from_slice(second);
            chunk.commit_all();
        }
        let areas = channel_areas(self.layout, self.channels, self.format, granted.max(1));
        Ok(ReadAccess {
            areas,
            frames_granted: granted,
            bytes: &self.scratch[..byte_len],
        })
    }

    pub fn capacity_frames(&self) -> u32 {
        (self.scratch.len() / frame_bytes(self.channels, self.format)) as u32
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn format(&self) -> DataFormat {
        self.format
    }
}

pub struct ReadAccess<'a> {
    areas: Vec<AudioArea>,
    frames_granted: u32,
    bytes: &'a [u8],
}

impl<'a> ReadAccess<'a> {
    pub fn areas(&self) -> &[AudioArea] {
        &self.areas
    }

    pub fn frames_granted(&self) -> u32 {
        self.frames_granted
    }

    pub fn bytes(&self) -> &[u8] {
        self.bytes
    }

    /// No-op: the scratch copy already happened in `begin_access`, so
    /// there is nothing left to commit. Kept for API symmetry with
    /// `WriteAccess::end_access` and so callers don't need to special-case
    /// the read side.
    pub fn end_access(self, _frames_consumed: u32) {}
}

/// Builds a producer/consumer pair sized to hold `period_count` periods
/// of `period_frames` frames each.
pub fn new_ring_buffer(
    channels: u16,
    format: DataFormat,
    layout: AreaLayout,
    period_frames: u32,
    period_count: u32,
) -> (RingBufferProducer, RingBufferConsumer) {
    let capacity_bytes = frame_bytes(channels, format) * period_frames as usize * period_count as usize;
    let (inner_producer, inner_consumer) = rtrb::RingBuffer::new(capacity_bytes.max(1));
    let producer = RingBufferProducer {
        inner: inner_producer,
        scratch: vec![0u8; capacity_bytes],
        channels,
        format,
        layout,
        period_frames,
    };
    let consumer = RingBufferConsumer {
        inner: inner_consumer,
        scratch: vec![0u8; capacity_bytes],
        channels,
        format,
        layout,
    };
    (producer, consumer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read_roundtrip() {
        let (mut producer, mut consumer) =
            new_ring_buffer(2, DataFormat::Float32, AreaLayout::Interleaved, 4, 4);
        {
            let mut access = producer.begin_access(4);
            assert_eq!(access.frames_granted(), 4);
            let bytes = access.bytes_mut();
            for frame in 0..4u32 {
                for ch in 0..2u32 {
                    let offset = (frame * 2 + ch) as usize * 4;
                    bytes[offset..offset + 4].copy_from_slice(&(frame as f32).to_le_bytes());
                }
            }
            access.end_access(4).unwrap();
        }
        let access = consumer.begin_access(4).unwrap();
        assert_eq!(access.frames_granted(), 4);
        let area0 = &access.areas()[0];
        let sample = read_sample_normalized(DataFormat::Float32, access.bytes(), area0.frame_offset_bytes(2));
        assert_eq!(sample, 2.0);
        access.end_access(4);
    }

    #[test]
    fn test_begin_access_caps_at_capacity() {
        let (mut producer, _consumer) =
            new_ring_buffer(2, DataFormat::Int16, AreaLayout::Interleaved, 4, 2);
        let access = producer.begin_access(1000);
        assert_eq!(access.frames_granted(), producer_capacity(&producer));
    }

    fn producer_capacity(p: &RingBufferProducer) -> u32 {
        p.capacity_frames()
    }

    #[test]
    fn test_copy_audio_areas_int16_to_float32() {
        let src_areas = channel_areas(AreaLayout::Interleaved, 1, DataFormat::Int16, 1);
        let dst_areas = channel_areas(AreaLayout::Interleaved, 1, DataFormat::Float32, 1);
        let mut src_bytes = vec![0u8; 2];
        write_sample_normalized(DataFormat::Int16, &mut src_bytes, 0, 0.5);
        let mut dst_bytes = vec![0u8; 4];
        copy_audio_areas(
            &dst_areas,
            DataFormat::Float32,
            &mut dst_bytes,
            &src_areas,
            DataFormat::Int16,
            &src_bytes,
            1,
        )
        .unwrap();
        let converted = read_sample_normalized(DataFormat::Float32, &dst_bytes, 0);
        assert!((converted - 0.5).abs() < 0.001);
    }
}
