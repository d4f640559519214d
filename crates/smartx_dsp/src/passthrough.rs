//! Identity module: copies its input straight to its output. Used to
//! exercise pipeline wiring (immediate and delayed links, cycles) without
//! pulling in a real signal-processing algorithm.

use smartx_model::properties::Properties;

use crate::error::DspResult;
use crate::module::{ModuleConfig, ModuleCore, ModuleEventEmitter, ModuleFactory};

pub struct PassthroughModule {
    name: String,
    binding: crate::module::ModuleBinding,
    #[allow(dead_code)]
    emitter: ModuleEventEmitter,
}

impl ModuleCore for PassthroughModule {
    fn process(&mut self) {
        // In-out pins share a name (and the same underlying buffer, so
        // the copy is a no-op); a mapped input/output pair uses distinct
        // names, so fall back to positional pairing when a name lookup
        // misses and there is exactly one pin on each side.
        for (pin_name, output) in &self.binding.output_streams {
            if let Some(input) = self.binding.input_streams.get(pin_name) {
                output.copy_from(input);
            } else if self.binding.input_streams.len() == 1 && self.binding.output_streams.len() == 1 {
                let input = self.binding.input_streams.values().next().expect("checked len == 1");
                output.copy_from(input);
            }
        }
    }

    fn send_cmd(&mut self, _cmd: &Properties) -> DspResult<Properties> {
        Ok(Properties::new())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

pub struct PassthroughFactory;

impl ModuleFactory for PassthroughFactory {
    fn type_name(&self) -> &'static str {
        "passthrough"
    }

    fn create(&self, config: ModuleConfig) -> DspResult<Box<dyn ModuleCore>> {
        Ok(Box::new(PassthroughModule {
            name: config.instance_name,
            binding: config.binding,
            emitter: config.emitter,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::AudioStream;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_passthrough_copies_in_to_out() {
        let (tx, _rx) = unbounded();
        let mut binding = crate::module::ModuleBinding::default();
        let in_stream = AudioStream::new(1, 4);
        let out_stream = AudioStream::new(1, 4);
        in_stream.with_samples_mut(|s| s.iter_mut().for_each(|v| *v = 0.5));
        binding.input_streams.insert("in".into(), in_stream);
        binding.output_streams.insert("in".into(), out_stream.clone());

        let mut module = PassthroughModule {
            name: "pt1".into(),
            binding,
            emitter: ModuleEventEmitter::new("pt1".into(), "passthrough".into(), tx),
        };
        module.process();
        out_stream.with_samples(|s| assert!(s.iter().all(|&v| v == 0.5)));
    }
}
