//! Reference summing mixer: N module-input pins summed into a single
//! module-output pin. Exercises the module ABI's many-inputs-to-one-output
//! binding shape, as opposed to volume's single in-out pin.

use smartx_model::properties::Properties;

use crate::error::DspResult;
use crate::module::{AudioStream, ModuleConfig, ModuleCore, ModuleEventEmitter, ModuleFactory};

pub struct MixerModule {
    name: String,
    inputs: Vec<AudioStream>,
    output: Option<AudioStream>,
    #[allow(dead_code)]
    emitter: ModuleEventEmitter,
}

impl ModuleCore for MixerModule {
    fn process(&mut self) {
        let Some(output) = &self.output else { return };
        let frame_count = output.with_samples(|s| s.len());
        let mut mixed = vec![0.0f32; frame_count];
        for input in &self.inputs {
            input.with_samples(|s| {
                for (acc, v) in mixed.iter_mut().zip(s.iter()) {
                    *acc += *v;
                }
            });
        }
        output.with_samples_mut(|s| s.copy_from_slice(&mixed));
    }

    fn send_cmd(&mut self, _cmd: &Properties) -> DspResult<Properties> {
        Ok(Properties::new())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

pub struct MixerFactory;

impl ModuleFactory for MixerFactory {
    fn type_name(&self) -> &'static str {
        "mixer"
    }

    fn create(&self, config: ModuleConfig) -> DspResult<Box<dyn ModuleCore>> {
        let output = config.binding.output_streams.values().next().cloned();
        let inputs = config.binding.input_streams.into_values().collect();
        Ok(Box::new(MixerModule {
            name: config.instance_name,
            inputs,
            output,
            emitter: config.emitter,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixer_sums_inputs() {
        let (tx, _rx) = crossbeam_channel::unbounded();
        let in1 = AudioStream::new(1, 2);
        let in2 = AudioStream::new(1, 2);
        let out = AudioStream::new(1, 2);
        in1.with_samples_mut(|s| s.iter_mut().for_each(|v| *v = 0.3));
        in2.with_samples_mut(|s| s.iter_mut().for_each(|v| *v = 0.4));
        let mut mixer = MixerModule {
            name: "mix1".into(),
            inputs: vec![in1, in2],
            output: Some(out.clone()),
            emitter: ModuleEventEmitter::new("mix1".into(), "mixer".into(), tx),
        };
        mixer.process();
        out.with_samples(|s| {
            for v in s {
                assert!((*v - 0.7).abs() < 1e-6);
            }
        });
    }
}
