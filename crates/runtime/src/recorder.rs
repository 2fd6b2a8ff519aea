// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! One-shot model recording: per-layer tensors, memory usage, and
//! accelerator traces.

use crate::accelerator::ToggleGuard;
use crate::context::Context;
use crate::metrics::{LayerCallback, LayerResult};
use crate::native::ModelDetails;
use crate::session::LoadOptions;
use crate::RuntimeError;
use memory_manager::MemoryPlan;
use model_ir::ModelHandle;
use tensor_core::Tensor;

/// Options for [`Context::record_model`].
pub struct RecordOptions {
    pub accelerator: Option<String>,
    /// One tensor per model input. Empty means all-zero inputs.
    pub input_data: Vec<Tensor>,
    /// Capture the accelerator's program trace. Needs an accelerator with
    /// a program recorder.
    pub enable_accelerator_recorder: bool,
    /// Skip the accelerator's numeric simulation. Needs an accelerator.
    pub disable_simulator_backend: bool,
    /// Capture each layer's input and output tensors.
    pub enable_tensor_recorder: bool,
    /// Called after every layer; returning `false` stops further calls.
    pub layer_callback: Option<LayerCallback>,
    /// Size of arena 0. Defaults to the configured
    /// `record_runtime_buffer_size`.
    pub runtime_buffer_size: Option<usize>,
}

impl Default for RecordOptions {
    fn default() -> Self {
        Self {
            accelerator: None,
            input_data: Vec::new(),
            enable_accelerator_recorder: false,
            disable_simulator_backend: false,
            enable_tensor_recorder: true,
            layer_callback: None,
            runtime_buffer_size: None,
        }
    }
}

impl std::fmt::Debug for RecordOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordOptions")
            .field("accelerator", &self.accelerator)
            .field("input_data", &self.input_data.len())
            .field("enable_accelerator_recorder", &self.enable_accelerator_recorder)
            .field("disable_simulator_backend", &self.disable_simulator_backend)
            .field("enable_tensor_recorder", &self.enable_tensor_recorder)
            .field("layer_callback", &self.layer_callback.is_some())
            .field("runtime_buffer_size", &self.runtime_buffer_size)
            .finish()
    }
}

/// Everything captured by [`Context::record_model`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct Recording {
    pub layers: Vec<LayerResult>,
    pub details: ModelDetails,
    pub memory_plan: Option<MemoryPlan>,
    /// Model outputs after the pass.
    pub outputs: Vec<Tensor>,
}

impl Context {
    /// Loads `model`, runs one recorded pass, and unloads it.
    pub fn record_model(
        &self,
        model: &ModelHandle,
        options: RecordOptions,
    ) -> Result<Recording, RuntimeError> {
        let accelerator = match options.accelerator.as_deref() {
            Some(name) => Some(self.accelerator(name)?),
            None => {
                if options.enable_accelerator_recorder {
                    return Err(RuntimeError::InvalidOption(
                        "enable_accelerator_recorder requires an accelerator".into(),
                    ));
                }
                if options.disable_simulator_backend {
                    return Err(RuntimeError::InvalidOption(
                        "disable_simulator_backend requires an accelerator".into(),
                    ));
                }
                None
            }
        };

        if let Some(acc) = &accelerator {
            let hooks = acc.hooks();
            if options.enable_accelerator_recorder && !hooks.program_recorder {
                return Err(RuntimeError::InvalidOption(format!(
                    "accelerator '{}' has no program recorder",
                    acc.name()
                )));
            }
            if options.disable_simulator_backend && !hooks.simulator_backend {
                return Err(RuntimeError::InvalidOption(format!(
                    "accelerator '{}' cannot disable its simulator backend",
                    acc.name()
                )));
            }
        }

        let runtime_buffer_size = match options.runtime_buffer_size {
            Some(size) => size,
            None => self.config().record_runtime_buffer_size()?,
        };
        let mut session = self.load(
            model,
            LoadOptions {
                accelerator: accelerator.as_ref().map(|a| a.name().to_string()),
                runtime_buffer_size: Some(runtime_buffer_size),
                enable_profiler: true,
                enable_recorder: true,
                enable_tensor_recorder: options.enable_tensor_recorder,
                ..Default::default()
            },
        )?;

        // Only touch the shared toggles while holding the engine lock.
        let toggles = ToggleGuard::new(accelerator.as_ref());
        if let Some(acc) = &accelerator {
            if options.enable_accelerator_recorder {
                acc.descriptor().set_program_recorder_enabled(true);
            }
            if options.disable_simulator_backend {
                acc.descriptor().set_simulator_backend_enabled(false);
            }
        }

        session.set_layer_callback(options.layer_callback);
        session.bind_inputs(&options.input_data)?;
        let layers = session.invoke()?;
        let outputs = (0..session.output_count())
            .map(|i| session.output(i))
            .collect::<Result<Vec<_>, _>>()?;
        let memory_plan = session.memory_plan()?;
        let details = session.details().clone();
        drop(toggles);
        session.unload()?;

        tracing::info!(
            "recorded '{}': {} layers, {} failed",
            details.name,
            layers.len(),
            layers.iter().filter(|l| !l.is_ok()).count()
        );
        Ok(Recording {
            layers,
            details,
            memory_plan,
            outputs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accelerator::{Accelerator, PlaceholderAccelerator, SimulatedAccelerator, SimulatedConfig};
    use crate::config::RuntimeConfig;
    use crate::metrics::LayerSnapshot;
    use crate::testing::{chain_model, kws_model};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tensor_core::{DType, Shape};

    fn context_with_sim() -> (Context, Arc<SimulatedAccelerator>) {
        let ctx = Context::with_reference_runtime(RuntimeConfig::default()).unwrap();
        let sim = Arc::new(SimulatedAccelerator::new(SimulatedConfig::default()));
        ctx.register_accelerator(sim.clone()).unwrap();
        ctx.register_accelerator(Arc::new(PlaceholderAccelerator::new(1))).unwrap();
        (ctx, sim)
    }

    #[test]
    fn test_record_software() {
        let (ctx, _sim) = context_with_sim();
        let input = Tensor::from_values(Shape::new(vec![1, 4, 4, 1]), &[5i8; 16]).unwrap();
        let rec = ctx
            .record_model(
                &kws_model(),
                RecordOptions {
                    input_data: vec![input.clone()],
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(rec.layers.len(), 2);
        assert_eq!(rec.details.arena_sizes[0], 16 * 1024 * 1024);
        assert_eq!(rec.layers[0].inputs, vec![input]);
        assert_eq!(rec.layers[0].outputs[0].shape().dims(), &[1, 4, 4, 2]);
        assert!(rec.layers.iter().all(|l| l.memory.is_some()));
        assert!(rec.memory_plan.is_some());
        assert_eq!(rec.outputs.len(), 1);
        assert_eq!(rec.outputs[0].values::<i8>().unwrap(), vec![5, 5, 5]);
    }

    #[test]
    fn test_tensor_recorder_off() {
        let (ctx, _sim) = context_with_sim();
        let rec = ctx
            .record_model(
                &kws_model(),
                RecordOptions {
                    enable_tensor_recorder: false,
                    runtime_buffer_size: Some(0),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(rec.layers.iter().all(|l| l.inputs.is_empty() && l.outputs.is_empty()));
        assert!(rec.details.arena_sizes[0] < 16 * 1024 * 1024);
    }

    #[test]
    fn test_options_need_accelerator() {
        let (ctx, _sim) = context_with_sim();
        for options in [
            RecordOptions {
                enable_accelerator_recorder: true,
                ..Default::default()
            },
            RecordOptions {
                disable_simulator_backend: true,
                ..Default::default()
            },
        ] {
            assert!(matches!(
                ctx.record_model(&kws_model(), options),
                Err(RuntimeError::InvalidOption(_))
            ));
        }

        let err = ctx
            .record_model(
                &kws_model(),
                RecordOptions {
                    accelerator: Some("cmsis".into()),
                    enable_accelerator_recorder: true,
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidOption(_)));
        // Nothing was left holding the engine.
        assert!(ctx.try_load(&kws_model(), Default::default()).is_ok());
    }

    #[test]
    fn test_accelerator_recorder() {
        let (ctx, sim) = context_with_sim();
        let rec = ctx
            .record_model(
                &kws_model(),
                RecordOptions {
                    accelerator: Some("mvp".into()),
                    enable_accelerator_recorder: true,
                    disable_simulator_backend: true,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(rec.details.accelerator.as_deref(), Some("mvp"));
        for layer in &rec.layers {
            assert_eq!(layer.accelerator_data["variant"], "mvp");
            assert!(layer.accelerator_cycles > 0);
        }
        assert!(!sim.program_recorder_enabled());
        assert!(sim.simulator_backend_enabled());
    }

    #[test]
    fn test_layer_callback() {
        let (ctx, _sim) = context_with_sim();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let rec = ctx
            .record_model(
                &chain_model(6, None),
                RecordOptions {
                    layer_callback: Some(Box::new(move |snapshot: &LayerSnapshot<'_>| {
                        assert_eq!(snapshot.outputs.len(), 1);
                        seen.fetch_add(1, Ordering::SeqCst) + 1 < 4
                    })),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(rec.layers.len(), 6);
    }

    #[test]
    fn test_zero_inputs_default() {
        let (ctx, _sim) = context_with_sim();
        let rec = ctx.record_model(&kws_model(), RecordOptions::default()).unwrap();
        let input = &rec.layers[0].inputs[0];
        assert_eq!(input.dtype(), DType::I8);
        assert!(input.as_bytes().iter().all(|&b| b == 0));
    }
}
