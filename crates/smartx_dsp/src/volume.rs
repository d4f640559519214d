//! Reference gain module: a single in-out pin scaled by a gain set in
//! tenths of a decibel, clamped to `[-1440, 0]` (i.e. -144.0 dB to unity).

use smartx_model::properties::Properties;

use crate::error::{DspError, DspResult};
use crate::module::{AudioStream, ModuleBinding, ModuleConfig, ModuleCore, ModuleEventEmitter, ModuleFactory};

const MIN_GAIN_DB_TENTHS: i32 = -1440;
const MAX_GAIN_DB_TENTHS: i32 = 0;

fn clamp_gain_db_tenths(value: i32) -> i32 {
    value.clamp(MIN_GAIN_DB_TENTHS, MAX_GAIN_DB_TENTHS)
}

pub struct VolumeModule {
    name: String,
    stream: Option<AudioStream>,
    gain_db_tenths: i32,
    emitter: ModuleEventEmitter,
}

impl VolumeModule {
    fn linear_gain(&self) -> f32 {
        10f32.powf(self.gain_db_tenths as f32 / 10.0 / 20.0)
    }
}

impl ModuleCore for VolumeModule {
    fn process(&mut self) {
        let Some(stream) = &self.stream else { return };
        let gain = self.linear_gain();
        stream.with_samples_mut(|samples| {
            for sample in samples.iter_mut() {
                *sample *= gain;
            }
        });
    }

    fn send_cmd(&mut self, cmd: &Properties) -> DspResult<Properties> {
        let requested = cmd.get_int32("gain_db_tenths").map_err(|e| {
            DspError::InvalidCommand(format!("volume module expects 'gain_db_tenths': {e}"))
        })?;
        let clamped = clamp_gain_db_tenths(requested);
        self.gain_db_tenths = clamped;
        let mut reply = Properties::new();
        reply.set("gain_db_tenths", clamped);
        self.emitter.emit(reply.clone());
        Ok(reply)
    }

    fn reset(&mut self) {
        self.gain_db_tenths = 0;
    }

    fn name(&self) -> &str {
        &self.name
    }
}

pub struct VolumeFactory;

impl ModuleFactory for VolumeFactory {
    fn type_name(&self) -> &'static str {
        "volume"
    }

    fn create(&self, config: ModuleConfig) -> DspResult<Box<dyn ModuleCore>> {
        let initial = config
            .properties
            .get_int32("gain_db_tenths")
            .unwrap_or(0);
        let ModuleBinding {
            mut input_streams,
            output_streams: _,
        } = config.binding;
        let stream = input_streams.drain().next().map(|(_, s)| s);
        Ok(Box::new(VolumeModule {
            name: config.instance_name,
            stream,
            gain_db_tenths: clamp_gain_db_tenths(initial),
            emitter: config.emitter,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_upper_bound() {
        assert_eq!(clamp_gain_db_tenths(500), MAX_GAIN_DB_TENTHS);
    }

    #[test]
    fn test_clamp_lower_bound() {
        assert_eq!(clamp_gain_db_tenths(-5000), MIN_GAIN_DB_TENTHS);
    }

    #[test]
    fn test_unity_gain_is_one() {
        let (tx, _rx) = crossbeam_channel::unbounded();
        let module = VolumeModule {
            name: "vol".into(),
            stream: None,
            gain_db_tenths: 0,
            emitter: ModuleEventEmitter::new("vol".into(), "volume".into(), tx),
        };
        assert!((module.linear_gain() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_send_cmd_clamps_and_applies() {
        let (tx, _rx) = crossbeam_channel::unbounded();
        let mut module = VolumeModule {
            name: "vol".into(),
            stream: None,
            gain_db_tenths: 0,
            emitter: ModuleEventEmitter::new("vol".into(), "volume".into(), tx),
        };
        let mut cmd = Properties::new();
        cmd.set("gain_db_tenths", -9999i32);
        let reply = module.send_cmd(&cmd).unwrap();
        assert_eq!(reply.get_int32("gain_db_tenths").unwrap(), MIN_GAIN_DB_TENTHS);
        assert_eq!(module.gain_db_tenths, MIN_GAIN_DB_TENTHS);
    }
}
