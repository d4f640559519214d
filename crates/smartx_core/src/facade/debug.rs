//! Debug façade (§4.7): WAV probes tapping a port's still-unclaimed ring
//! buffer half, and a topology dump for inspection tooling.
//!
//! Probes are a one-shot tap: once a probe claims a port's spare ring
//! half, stopping the probe drops that half rather than handing it back,
//! so a port can be probed at most once over its lifetime. This mirrors
//! the strictly-SPSC nature of the ring buffers themselves — see
//! [`crate::bar::PortRing`] — and keeps the mechanism to a single
//! background thread per probe instead of a hand-back channel.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use smartx_model::clock::DataFormat;
use smartx_model::port::PortOwner;
use smartx_model::ModelError;

use crate::bar::ActiveProbe;
use crate::error::{BarError, BarResult};
use crate::SmartXbar;

fn read_sample(format: DataFormat, bytes: &[u8], offset: usize) -> f32 {
    match format {
        DataFormat::Int16 => i16::from_le_bytes([bytes[offset], bytes[offset + 1]]) as f32 / i16::MAX as f32,
        DataFormat::Int32 => {
            i32::from_le_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]]) as f32
                / i32::MAX as f32
        }
        DataFormat::Float32 => {
            f32::from_le_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
        }
    }
}

fn write_sample(format: DataFormat, bytes: &mut [u8], offset: usize, value: f32) {
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

fn hound_sample_format(format: DataFormat) -> hound::SampleFormat {
    match format {
        DataFormat::Float32 => hound::SampleFormat::Float,
        DataFormat::Int16 | DataFormat::Int32 => hound::SampleFormat::Int,
    }
}

fn wav_spec(channels: u16, sample_rate: u32, format: DataFormat) -> hound::WavSpec {
    hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: (format.bytes_per_sample() * 8) as u16,
        sample_format: hound_sample_format(format),
    }
}

fn write_wav_sample(writer: &mut hound::WavWriter<std::io::BufWriter<std::fs::File>>, format: DataFormat, value: f32) -> BarResult<()> {
    match format {
        DataFormat::Float32 => writer.write_sample(value)?,
        DataFormat::Int16 => writer.write_sample((value.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?,
        DataFormat::Int32 => writer.write_sample((value.clamp(-1.0, 1.0) * i32::MAX as f32) as i32)?,
    }
    Ok(())
}

impl SmartXbar {
    fn port_sample_rate(&self, port_handle: smartx_model::handle::PortHandle) -> BarResult<u32> {
        let registry = self.registry.lock();
        let port = registry.port(port_handle)?;
        match port.owner {
            PortOwner::Device(d) => Ok(registry.device(d)?.params.sample_rate),
            PortOwner::Zone(z) => {
                let pipeline = registry
                    .zone(z)?
                    .pipeline
                    .ok_or_else(|| ModelError::InvalidState("zone has no pipeline attached".into()))?;
                Ok(registry.pipeline(pipeline)?.sample_rate)
            }
        }
    }

    /// Drains a port's unclaimed ring-buffer consumer half into `out_path`
    /// as a WAV file for up to `seconds`, or until [`SmartXbar::stop_probe`]
    /// is called first.
    pub fn start_record(&self, port_name: &str, out_path: impl AsRef<Path>, seconds: f64) -> BarResult<()> {
        let mut probes = self.probes.lock();
        if probes.contains_key(port_name) {
            return Err(BarError::Model(ModelError::AlreadyExists(format!(
                "a probe is already active on port '{port_name}'"
            ))));
        }
        let port_handle = {
            let registry = self.registry.lock();
            registry
                .find_port_by_name(port_name)
                .ok_or_else(|| ModelError::NotFound(format!("port '{port_name}'")))?
        };
        let sample_rate = self.port_sample_rate(port_handle)?;
        let mut consumer = {
            let mut rings = self.port_rings.lock();
            rings
                .get_mut(&port_handle)
                .and_then(|ring| ring.consumer.take())
                .ok_or_else(|| ModelError::NoResources(format!("port '{port_name}' has no free consumer half to probe")))?
        };
        let channels = consumer.channels();
        let format = consumer.format();
        let out_path = out_path.as_ref().to_path_buf();
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let port_name_owned = port_name.to_string();

        let thread = std::thread::Builder::new()
            .name(format!("smartx-probe-record-{port_name_owned}"))
            .spawn(move || {
                let spec = wav_spec(channels, sample_rate, format);
                let mut writer = match hound::WavWriter::create(&out_path, spec) {
                    Ok(w) => w,
                    Err(err) => {
                        warn!(port = %port_name_owned, %err, "failed to create probe WAV file");
                        return;
                    }
                };
                let deadline = Instant::now() + Duration::from_secs_f64(seconds.max(0.0));
                let chunk = consumer.capacity_frames().max(1) / 4 + 1;
                while !thread_stop.load(Ordering::Acquire) && Instant::now() < deadline {
                    match consumer.begin_access(chunk) {
                        Ok(access) => {
                            let granted = access.frames_granted();
                            if granted > 0 {
                                let bytes = access.bytes();
                                for frame in 0..granted {
                                    for area in access.areas() {
                                        let sample = read_sample(format, bytes, area.frame_offset_bytes(frame));
                                        if let Err(err) = write_wav_sample(&mut writer, format, sample) {
                                            warn!(port = %port_name_owned, %err, "probe WAV write failed");
                                        }
                                    }
                                }
                            }
                            access.end_access(granted);
                        }
                        Err(_) => {
                            std::thread::sleep(Duration::from_millis(2));
                        }
                    }
                }
                if let Err(err) = writer.finalize() {
                    warn!(port = %port_name_owned, %err, "failed to finalize probe WAV file");
                }
            })
            .expect("failed to spawn probe recording thread");

        probes.insert(
            port_name.to_string(),
            ActiveProbe {
                stop,
                thread: Some(thread),
            },
        );
        info!(port = %port_name, "recording probe started");
        Ok(())
    }

    /// Feeds `wav_path`'s samples into a port's unclaimed ring-buffer
    /// producer half until the file is exhausted or
    /// [`SmartXbar::stop_probe`] is called.
    pub fn start_inject(&self, port_name: &str, wav_path: impl AsRef<Path>) -> BarResult<()> {
        let mut probes = self.probes.lock();
        if probes.contains_key(port_name) {
            return Err(BarError::Model(ModelError::AlreadyExists(format!(
                "a probe is already active on port '{port_name}'"
            ))));
        }
        let port_handle = {
            let registry = self.registry.lock();
            registry
                .find_port_by_name(port_name)
                .ok_or_else(|| ModelError::NotFound(format!("port '{port_name}'")))?
        };
        let mut producer = {
            let mut rings = self.port_rings.lock();
            rings
                .get_mut(&port_handle)
                .and_then(|ring| ring.producer.take())
                .ok_or_else(|| ModelError::NoResources(format!("port '{port_name}' has no free producer half to probe")))?
        };
        let format = producer.format();
        let channels = producer.channels() as usize;
        let reader = hound::WavReader::open(wav_path.as_ref())?;
        let spec = reader.spec();
        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader.into_samples::<f32>().filter_map(Result::ok).collect(),
            hound::SampleFormat::Int => {
                let max_value = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .filter_map(Result::ok)
                    .map(|s| s as f32 / max_value)
                    .collect()
            }
        };

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let port_name_owned = port_name.to_string();

        let thread = std::thread::Builder::new()
            .name(format!("smartx-probe-inject-{port_name_owned}"))
            .spawn(move || {
                let frame_count = if channels == 0 { 0 } else { samples.len() / channels };
                let mut frame = 0usize;
                while frame < frame_count && !thread_stop.load(Ordering::Acquire) {
                    let chunk_frames = producer.capacity_frames().max(1) / 4 + 1;
                    let mut access = producer.begin_access(chunk_frames);
                    let granted = access.frames_granted() as usize;
                    let n = granted.min(frame_count - frame);
                    {
                        let bytes = access.bytes_mut();
                        let frame_bytes = channels * format.bytes_per_sample();
                        for i in 0..n {
                            for ch in 0..channels {
                                let value = samples[(frame + i) * channels + ch];
                                let offset = i * frame_bytes + ch * format.bytes_per_sample();
                                write_sample(format, bytes, offset, value);
                            }
                        }
                    }
                    if let Err(err) = access.end_access(n as u32) {
                        warn!(port = %port_name_owned, %err, "probe injection write failed");
                        break;
                    }
                    frame += n.max(1);
                    std::thread::sleep(Duration::from_millis(5));
                }
            })
            .expect("failed to spawn probe injection thread");

        probes.insert(
            port_name.to_string(),
            ActiveProbe {
                stop,
                thread: Some(thread),
            },
        );
        info!(port = %port_name, "injection probe started");
        Ok(())
    }

    pub fn stop_probe(&self, port_name: &str) -> BarResult<()> {
        let mut probe = self
            .probes
            .lock()
            .remove(port_name)
            .ok_or_else(|| ModelError::NotFound(format!("no active probe on port '{port_name}'")))?;
        probe.stop.store(true, Ordering::Release);
        if let Some(thread) = probe.thread.take() {
            let _ = thread.join();
        }
        Ok(())
    }

    /// Renders the current topology as the documented hierarchical XML:
    /// sources and sinks with their ports, routing zones with their
    /// pipelines, and the active link list within each pipeline.
    pub fn dump_topology(&self) -> String {
        let registry = self.registry.lock();
        let mut xml = String::new();
        let _ = writeln!(xml, "<Topology>");

        let _ = writeln!(xml, "  <Sources>");
        for device in registry.devices().filter(|d| d.is_source()) {
            let _ = writeln!(xml, "    <Device name=\"{}\">", xml_escape(&device.name));
            for port in &device.ports {
                if let Ok(p) = registry.port(*port) {
                    let _ = writeln!(xml, "      <Port name=\"{}\" id=\"{}\"/>", xml_escape(&p.name), p.id);
                }
            }
            let _ = writeln!(xml, "    </Device>");
        }
        let _ = writeln!(xml, "  </Sources>");

        let _ = writeln!(xml, "  <Sinks>");
        for device in registry.devices().filter(|d| d.is_sink()) {
            let _ = writeln!(xml, "    <Device name=\"{}\">", xml_escape(&device.name));
            for port in &device.ports {
                if let Ok(p) = registry.port(*port) {
                    let _ = writeln!(xml, "      <Port name=\"{}\" id=\"{}\"/>", xml_escape(&p.name), p.id);
                }
            }
            let _ = writeln!(xml, "    </Device>");
        }
        let _ = writeln!(xml, "  </Sinks>");

        let _ = writeln!(xml, "  <RoutingZones>");
        for zone in registry.zones() {
            let _ = writeln!(xml, "    <RoutingZone name=\"{}\" state=\"{:?}\">", xml_escape(&zone.name), zone.state);
            for port in &zone.input_ports {
                if let Ok(p) = registry.port(*port) {
                    let _ = writeln!(xml, "      <Port name=\"{}\" id=\"{}\"/>", xml_escape(&p.name), p.id);
                }
            }
            if let Some(pipeline_handle) = zone.pipeline {
                if let Ok(pipeline) = registry.pipeline(pipeline_handle) {
                    let _ = writeln!(
                        xml,
                        "      <ProcessingPipeline name=\"{}\" sample_rate=\"{}\" period_frames=\"{}\">",
                        xml_escape(&pipeline.name),
                        pipeline.sample_rate,
                        pipeline.period_frames
                    );
                    for module in &pipeline.modules {
                        if let Ok(m) = registry.module(*module) {
                            let _ = writeln!(
                                xml,
                                "        <Module instance=\"{}\" type=\"{}\"/>",
                                xml_escape(&m.instance_name),
                                xml_escape(&m.type_name)
                            );
                        }
                    }
                    for link in &pipeline.links {
                        if let Ok(l) = registry.link(*link) {
                            let _ = writeln!(
                                xml,
                                "        <Link source=\"{}\" sink=\"{}\" type=\"{:?}\"/>",
                                l.source_pin, l.sink_pin, l.link_type
                            );
                        }
                    }
                    let _ = writeln!(xml, "      </ProcessingPipeline>");
                }
            }
            let _ = writeln!(xml, "    </RoutingZone>");
        }
        let _ = writeln!(xml, "  </RoutingZones>");

        let _ = writeln!(xml, "</Topology>");
        xml
    }
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use smartx_model::clock::ClockType;
    use smartx_model::device::DeviceParams;

    #[test]
    fn test_dump_topology_lists_devices_and_zones() {
        let bar = SmartXbar::with_config(crate::config::SchedulingConfig::default());
        bar.create_sink_device(
            "spk",
            DeviceParams {
                sample_rate: 48_000,
                period_frames: 32,
                num_periods: 4,
                format: DataFormat::Float32,
                channels: 2,
                clock: ClockType::Provided,
            },
        )
        .unwrap();
        bar.create_zone("z").unwrap();
        let xml = bar.dump_topology();
        assert!(xml.contains("<Device name=\"spk\">"));
        assert!(xml.contains("<RoutingZone name=\"z\""));
    }

    #[test]
    fn test_second_probe_on_same_port_rejected() {
        let bar = SmartXbar::with_config(crate::config::SchedulingConfig::default());
        let dev = bar
            .create_sink_device(
                "spk",
                DeviceParams {
                    sample_rate: 48_000,
                    period_frames: 32,
                    num_periods: 4,
                    format: DataFormat::Float32,
                    channels: 1,
                    clock: ClockType::Provided,
                },
            )
            .unwrap();
        bar.create_device_port(dev, "spk:0", 1, 1, 0).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        bar.start_record("spk:0", &path, 0.05).unwrap();
        let err = bar.start_record("spk:0", &path, 0.05).unwrap_err();
        assert!(matches!(err, BarError::Model(ModelError::AlreadyExists(_))));
        bar.stop_probe("spk:0").unwrap();
    }
}
