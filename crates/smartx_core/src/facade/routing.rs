//! Routing façade (§4.4): wire a source port to a zone's input port
//! through the switch matrix, and query/tear down those connections.
//!
//! A connection lives on whichever base zone owns the sink port — directly
//! if the sink port belongs to a base zone, or via that zone's `base_zone`
//! if it belongs to a derived zone (derived zones share their base's
//! switch matrix, since only base zones carry one).

use smartx_model::clock::{ClockType, DataFormat};
use smartx_model::event::ModelEvent;
use smartx_model::handle::ZoneHandle;
use smartx_model::port::{PortDirection, PortOwner};
use smartx_model::ModelError;

use smartx_runtime::switch_matrix::{build_resampler, JobKind};

use crate::error::{BarError, BarResult};
use crate::SmartXbar;

fn owning_base_zone(registry: &smartx_model::registry::Registry, zone: ZoneHandle) -> BarResult<ZoneHandle> {
    let data = registry.zone(zone)?;
    Ok(data.base_zone.unwrap_or(zone))
}

impl SmartXbar {
    /// Connects the source port with positive id `source_id` to the sink
    /// (zone input) port with positive id `sink_id`. `source_id ==
    /// sink_id == -1` (and any non-positive id) is the documented
    /// boundary case and always fails with `InvalidParameter`, since a
    /// registry lookup by non-positive id would otherwise just report
    /// `NotFound`.
    pub fn connect(&self, source_id: i32, sink_id: i32) -> BarResult<()> {
        if source_id <= 0 || sink_id <= 0 {
            return Err(BarError::Model(ModelError::InvalidParameter(
                "connect requires two positive port ids".into(),
            )));
        }
        let registry = self.registry.lock();
        let source_port = registry
            .find_port_by_id(PortDirection::Output, source_id)
            .ok_or_else(|| ModelError::NotFound(format!("source port {source_id}")))?;
        let sink_port = registry
            .find_port_by_id(PortDirection::Input, sink_id)
            .ok_or_else(|| ModelError::NotFound(format!("sink port {sink_id}")))?;

        let sink = registry.port(sink_port)?;
        let zone = match sink.owner {
            PortOwner::Zone(z) => z,
            PortOwner::Device(_) => {
                return Err(BarError::Model(ModelError::InvalidParameter(
                    "sink id must name a zone input port".into(),
                )))
            }
        };
        let base_zone = owning_base_zone(&registry, zone)?;

        let source = registry.port(source_port)?;
        let (source_format, source_rate, source_clock) = match source.owner {
            PortOwner::Device(d) => {
                let dev = registry.device(d)?;
                (dev.params.format, dev.params.sample_rate, dev.params.clock)
            }
            PortOwner::Zone(_) => {
                return Err(BarError::Model(ModelError::InvalidParameter(
                    "source id must name a device port".into(),
                )))
            }
        };
        let channels = sink.channel_count as usize;
        let sink_format = DataFormat::Float32;
        // A zone input port's target rate/period comes from its pipeline
        // when one is attached, or from the zone's own sink device for a
        // zone running in no-pipeline passthrough mode.
        let zone_data = registry.zone(zone)?;
        let (target_rate, period_frames) = match zone_data.pipeline {
            Some(p) => {
                let p = registry.pipeline(p)?;
                (p.sample_rate, p.period_frames)
            }
            None => {
                let sink_device = zone_data
                    .sink_device
                    .ok_or_else(|| ModelError::InvalidState("sink zone has neither a pipeline nor a sink device attached yet".into()))?;
                let dev = registry.device(sink_device)?;
                (dev.params.sample_rate, dev.params.period_frames)
            }
        };
        drop(registry);

        let base_zones = self.base_zones.lock();
        let runtime = base_zones
            .get(&base_zone)
            .ok_or_else(|| ModelError::NotFound(format!("zone runtime {base_zone}")))?;

        // §4.2: a zone input port accepts at most one active source.
        if runtime
            .switch_matrix
            .active_connections()
            .iter()
            .any(|(_, sink)| *sink == sink_port)
        {
            return Err(BarError::Model(ModelError::AlreadyExists(
                "sink port already has an active connection".into(),
            )));
        }

        // §4.2: an async-clocked source has no fixed phase relationship to the
        // sink's period, so it needs the ASRC job's drift tracking even when
        // the nominal rates already match.
        let kind = if source_clock == ClockType::ReceivedAsync || source_rate != target_rate {
            JobKind::Asrc(build_resampler(source_rate, target_rate, channels, period_frames as usize)?)
        } else if source_format != sink_format {
            JobKind::FormatConvert
        } else {
            JobKind::Copy
        };

        let source_consumer = {
            let mut rings = self.port_rings.lock();
            rings
                .get_mut(&source_port)
                .and_then(|ring| ring.consumer.take())
                .ok_or_else(|| ModelError::NoResources("source port's ring buffer consumer is already claimed".into()))?
        };
        let sink_producer = {
            let mut rings = self.port_rings.lock();
            rings
                .get_mut(&sink_port)
                .and_then(|ring| ring.producer.take())
                .ok_or_else(|| ModelError::NoResources("sink port's ring buffer producer is already claimed".into()))?
        };

        if let Err(err) = runtime.switch_matrix.connect(
            source_port,
            sink_port,
            source_consumer,
            sink_producer,
            source_format,
            sink_format,
            kind,
        ) {
            return Err(err.into());
        }
        drop(base_zones);

        self.event_bus.push(ModelEvent::ConnectionEstablished {
            source_port: source_id,
            sink_port: sink_id,
        });
        Ok(())
    }

    pub fn disconnect(&self, source_id: i32, sink_id: i32) -> BarResult<()> {
        if source_id <= 0 || sink_id <= 0 {
            return Err(BarError::Model(ModelError::InvalidParameter(
                "disconnect requires two positive port ids".into(),
            )));
        }
        let registry = self.registry.lock();
        let source_port = registry
            .find_port_by_id(PortDirection::Output, source_id)
            .ok_or_else(|| ModelError::NotFound(format!("source port {source_id}")))?;
        let sink_port = registry
            .find_port_by_id(PortDirection::Input, sink_id)
            .ok_or_else(|| ModelError::NotFound(format!("sink port {sink_id}")))?;
        let zone = match registry.port(sink_port)?.owner {
            PortOwner::Zone(z) => z,
            PortOwner::Device(_) => {
                return Err(BarError::Model(ModelError::InvalidParameter(
                    "sink id must name a zone input port".into(),
                )))
            }
        };
        let base_zone = owning_base_zone(&registry, zone)?;
        drop(registry);

        let base_zones = self.base_zones.lock();
        let runtime = base_zones
            .get(&base_zone)
            .ok_or_else(|| ModelError::NotFound(format!("zone runtime {base_zone}")))?;
        runtime.switch_matrix.disconnect(source_port, sink_port)?;
        drop(base_zones);

        self.event_bus.push(ModelEvent::ConnectionRemoved {
            source_port: source_id,
            sink_port: sink_id,
        });
        Ok(())
    }

    /// Snapshot of every active connection as `(source_id, sink_id)`
    /// pairs, across every base zone's switch matrix.
    pub fn get_active_connections(&self) -> BarResult<Vec<(i32, i32)>> {
        let registry = self.registry.lock();
        let base_zones = self.base_zones.lock();
        let mut out = Vec::new();
        for runtime in base_zones.values() {
            for (source, sink) in runtime.switch_matrix.active_connections() {
                let source_id = registry.port(source)?.id;
                let sink_id = registry.port(sink)?.id;
                out.push((source_id, sink_id));
            }
        }
        Ok(out)
    }

    /// Defines a named group of source port ids that `connect_group` can
    /// fan out to a single sink in one call.
    pub fn define_source_group(&self, name: &str, source_ids: Vec<i32>) {
        self.source_groups.lock().insert(name.to_string(), source_ids);
    }

    /// Connects every member of a previously defined source group to
    /// `sink_id`, collecting partial failures instead of aborting on the
    /// first one — one member failing to route (already connected, wrong
    /// rate, missing) shouldn't block the rest of the group.
    pub fn connect_group(&self, group_name: &str, sink_id: i32) -> BarResult<Vec<(i32, BarResult<()>)>> {
        let members = self
            .source_groups
            .lock()
            .get(group_name)
            .cloned()
            .ok_or_else(|| ModelError::NotFound(format!("source group '{group_name}'")))?;
        Ok(members
            .into_iter()
            .map(|source_id| {
                let result = self.connect(source_id, sink_id);
                (source_id, result)
            })
            .collect())
    }

    pub fn set_connection_gain_linear(&self, source_id: i32, sink_id: i32, gain_linear: f32) -> BarResult<()> {
        let registry = self.registry.lock();
        let source_port = registry
            .find_port_by_id(PortDirection::Output, source_id)
            .ok_or_else(|| ModelError::NotFound(format!("source port {source_id}")))?;
        let sink_port = registry
            .find_port_by_id(PortDirection::Input, sink_id)
            .ok_or_else(|| ModelError::NotFound(format!("sink port {sink_id}")))?;
        let zone = match registry.port(sink_port)?.owner {
            PortOwner::Zone(z) => z,
            PortOwner::Device(_) => {
                return Err(BarError::Model(ModelError::InvalidParameter(
                    "sink id must name a zone input port".into(),
                )))
            }
        };
        let base_zone = owning_base_zone(&registry, zone)?;
        drop(registry);
        let base_zones = self.base_zones.lock();
        let runtime = base_zones
            .get(&base_zone)
            .ok_or_else(|| ModelError::NotFound(format!("zone runtime {base_zone}")))?;
        runtime.switch_matrix.set_gain_linear(source_port, sink_port, gain_linear)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smartx_model::clock::ClockType;
    use smartx_model::device::DeviceParams;

    fn bar_with_zone() -> (SmartXbar, i32, i32) {
        let bar = SmartXbar::with_config(crate::config::SchedulingConfig::default());
        let src_dev = bar
            .create_source_device(
                "mic",
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
        let source_port = bar.create_device_port(src_dev, "mic:0", 1, 1, 0).unwrap();
        let _ = source_port;

        let zone = bar.create_zone("z").unwrap();
        bar.create_pipeline(zone, "p", 48_000, 32).unwrap();
        let sink_port = bar.add_zone_input_port(zone, "in", 2, 1).unwrap();
        let _ = sink_port;
        (bar, 1, 2)
    }

    #[test]
    fn test_connect_rejects_non_positive_ids() {
        let (bar, _, _) = bar_with_zone();
        let err = bar.connect(-1, -1).unwrap_err();
        assert!(matches!(err, BarError::Model(ModelError::InvalidParameter(_))));
    }

    #[test]
    fn test_connect_then_disconnect_roundtrip() {
        let (bar, src, sink) = bar_with_zone();
        bar.connect(src, sink).unwrap();
        assert_eq!(bar.get_active_connections().unwrap(), vec![(src, sink)]);
        bar.disconnect(src, sink).unwrap();
        assert!(bar.get_active_connections().unwrap().is_empty());
    }

    #[test]
    fn test_second_connection_to_same_sink_rejected() {
        let (bar, src, sink) = bar_with_zone();
        bar.connect(src, sink).unwrap();
        let err = bar.connect(src, sink).unwrap_err();
        assert!(matches!(err, BarError::Model(ModelError::AlreadyExists(_))));
    }

    /// A `ReceivedAsync` source has no fixed phase relationship to the
    /// sink's period even when its nominal rate matches the pipeline's, so
    /// it must still route through the ASRC job rather than a plain copy.
    #[test]
    fn test_received_async_source_forces_asrc_even_at_matching_rate() {
        let bar = SmartXbar::with_config(crate::config::SchedulingConfig::default());
        let src_dev = bar
            .create_source_device(
                "mic",
                DeviceParams {
                    sample_rate: 48_000,
                    period_frames: 32,
                    num_periods: 4,
                    format: DataFormat::Float32,
                    channels: 1,
                    clock: ClockType::ReceivedAsync,
                },
            )
            .unwrap();
        bar.create_device_port(src_dev, "mic:0", 1, 1, 0).unwrap();

        let zone = bar.create_zone("z").unwrap();
        bar.create_pipeline(zone, "p", 48_000, 32).unwrap();
        bar.add_zone_input_port(zone, "in", 2, 1).unwrap();

        bar.connect(1, 2).unwrap();

        let registry = bar.registry.lock();
        let source_handle = registry.find_port_by_id(PortDirection::Output, 1).unwrap();
        let sink_handle = registry.find_port_by_id(PortDirection::Input, 2).unwrap();
        drop(registry);

        let base_zones = bar.base_zones.lock();
        let runtime = base_zones.values().next().unwrap();
        assert!(runtime.switch_matrix.is_asrc_job(source_handle, sink_handle));
    }
}
