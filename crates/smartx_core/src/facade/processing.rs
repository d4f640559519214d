//! Processing façade (§4.6): the command-plane call into a running
//! module instance, via whichever zone worker currently owns it.

use smartx_model::properties::Properties;
use smartx_model::ModelError;

use crate::error::{BarError, BarResult};
use crate::SmartXbar;

impl SmartXbar {
    /// Dispatches `cmd` to the named module instance, trying every base
    /// zone's worker in turn (each worker itself tries its base engine
    /// then its derived engines) until one owns the instance. Module
    /// instance names are unique across the whole registry, so at most
    /// one worker can ever claim it.
    pub fn send_cmd(&self, instance_name: &str, cmd: Properties) -> BarResult<Properties> {
        let base_zones = self.base_zones.lock();
        for runtime in base_zones.values() {
            match runtime.worker.send_module_command(instance_name, cmd.clone()) {
                Err(smartx_runtime::RuntimeError::Model(ModelError::NotFound(_))) => continue,
                other => return Ok(other?),
            }
        }
        Err(BarError::Model(ModelError::NotFound(format!(
            "module instance '{instance_name}'"
        ))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smartx_model::clock::{ClockType, DataFormat};
    use smartx_model::device::DeviceParams;
    use smartx_model::pin::PinDirection;

    #[test]
    fn test_send_cmd_to_unknown_instance_is_not_found() {
        let bar = SmartXbar::with_config(crate::config::SchedulingConfig::default());
        let zone = bar.create_zone("z").unwrap();
        bar.create_pipeline(zone, "p", 48_000, 32).unwrap();
        let err = bar.send_cmd("nope", Properties::new()).unwrap_err();
        assert!(matches!(err, BarError::Model(ModelError::NotFound(_))));
    }

    #[test]
    fn test_send_cmd_reaches_running_module() {
        let bar = SmartXbar::with_config(crate::config::SchedulingConfig::default());
        bar.register_module_factory(std::sync::Arc::new(smartx_dsp::VolumeFactory));
        let zone = bar.create_zone("z").unwrap();
        let pipeline = bar.create_pipeline(zone, "p", 48_000, 32).unwrap();
        let module = bar
            .create_module(pipeline, "vol1", "volume", Properties::new())
            .unwrap();
        let io = bar
            .create_module_pin(module, "io", 1, PinDirection::ModuleInOut)
            .unwrap();
        let pipeline_in = bar
            .create_pipeline_pin(pipeline, "in", 1, PinDirection::PipelineInput)
            .unwrap();
        let pipeline_out = bar
            .create_pipeline_pin(pipeline, "out", 1, PinDirection::PipelineOutput)
            .unwrap();
        bar.create_link(pipeline, pipeline_in, io, smartx_model::link::LinkType::Immediate)
            .unwrap();
        bar.create_link(pipeline, io, pipeline_out, smartx_model::link::LinkType::Immediate)
            .unwrap();
        let sink = bar
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
        bar.link_sink_to_zone(zone, sink).unwrap();
        bar.start_zone(zone).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));

        let mut cmd = Properties::new();
        cmd.set("gain_db_tenths", -60i32);
        let reply = bar.send_cmd("vol1", cmd).unwrap();
        assert_eq!(reply.get_int32("gain_db_tenths").unwrap(), -60);
        bar.stop_zone(zone).unwrap();
    }
}
