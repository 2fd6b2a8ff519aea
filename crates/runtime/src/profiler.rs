// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! One-shot model profiling.

use crate::accelerator::{RegisteredAccelerator, ToggleGuard};
use crate::context::Context;
use crate::metrics::ProfilingResult;
use crate::session::LoadOptions;
use crate::RuntimeError;
use model_ir::ModelHandle;
use std::collections::BTreeMap;
use tensor_core::Tensor;

/// Options for [`Context::profile_model`].
#[derive(Debug, Clone, Default)]
pub struct ProfileOptions {
    /// Accelerator to profile on. `None` profiles the software kernels.
    pub accelerator: Option<String>,
    /// Run an estimator over the results (energy, time).
    pub return_estimates: bool,
    /// Skip computing numeric outputs on the accelerator. Outputs are
    /// then meaningless but cycle counting is faster.
    pub disable_simulator_backend: bool,
    /// Size of arena 0. See [`LoadOptions::runtime_buffer_size`].
    pub runtime_buffer_size: Option<usize>,
    /// One tensor per model input. Empty means all-zero inputs.
    pub input_data: Vec<Tensor>,
}

impl Context {
    /// Loads `model`, runs one profiled pass, and unloads it.
    ///
    /// Accelerator toggles changed here are restored before returning,
    /// whether the run succeeded or not.
    pub fn profile_model(
        &self,
        model: &ModelHandle,
        options: ProfileOptions,
    ) -> Result<ProfilingResult, RuntimeError> {
        let accelerator = options
            .accelerator
            .as_deref()
            .map(|name| self.accelerator(name))
            .transpose()?;

        if accelerator.is_none() && options.disable_simulator_backend {
            tracing::warn!("disable_simulator_backend has no effect without an accelerator");
        }

        let mut session = self.load(
            model,
            LoadOptions {
                accelerator: accelerator.as_ref().map(|a| a.name().to_string()),
                runtime_buffer_size: options.runtime_buffer_size,
                enable_profiler: true,
                enable_recorder: true,
                enable_tensor_recorder: false,
                ..Default::default()
            },
        )?;

        // Shared toggles change only under the engine lock. Declared after
        // `session`, so early returns restore them before the unload.
        let toggles = ToggleGuard::new(accelerator.as_ref());
        if let Some(acc) = &accelerator {
            let hooks = acc.hooks();
            let descriptor = acc.descriptor();
            if options.disable_simulator_backend {
                if hooks.simulator_backend {
                    descriptor.set_simulator_backend_enabled(false);
                } else {
                    tracing::warn!(
                        "accelerator '{}' has no simulator backend switch; ignoring",
                        acc.name()
                    );
                }
            }
            if hooks.cycles_only {
                descriptor.set_cycles_only_enabled(true);
            }
        }

        session.bind_inputs(&options.input_data)?;
        let layers = session.invoke()?;
        let memory_plan = session.memory_plan()?;
        let details = session.details().clone();
        drop(toggles);
        session.unload()?;

        let mut result = ProfilingResult {
            model_name: details.name,
            accelerator: details.accelerator,
            cpu_clock_hz: self.config().cpu_clock_hz,
            runtime_memory_bytes: details.runtime_memory_bytes,
            layers,
            memory_plan,
            estimates: BTreeMap::new(),
        };
        if options.return_estimates {
            self.estimate(&mut result, accelerator.as_ref());
        }
        tracing::info!("{}", result.summary());
        Ok(result)
    }

    /// Runs the bound accelerator's estimator, else the configured
    /// default estimator in no-hardware mode.
    fn estimate(&self, result: &mut ProfilingResult, accelerator: Option<&RegisteredAccelerator>) {
        let (estimator, with_hardware) = match accelerator {
            Some(acc) if acc.hooks().estimator => (acc.clone(), true),
            _ => {
                let fallback = self
                    .resolve_accelerator(&self.config().default_estimator)
                    .and_then(|name| self.accelerator(&name).ok())
                    .filter(|acc| acc.hooks().estimator);
                match fallback {
                    Some(acc) => (acc, false),
                    None => {
                        tracing::debug!(
                            "no estimator available (default '{}' not registered)",
                            self.config().default_estimator
                        );
                        return;
                    }
                }
            }
        };

        if let Err(e) = estimator
            .descriptor()
            .estimate_profiling_results(result, with_hardware)
        {
            tracing::warn!("estimator '{}' failed: {e}", estimator.name());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accelerator::{Accelerator, PlaceholderAccelerator, SimulatedAccelerator, SimulatedConfig};
    use crate::config::RuntimeConfig;
    use crate::testing::{chain_model, kws_model};
    use std::sync::Arc;

    fn context_with_sim() -> (Context, Arc<SimulatedAccelerator>) {
        let ctx = Context::with_reference_runtime(RuntimeConfig::default()).unwrap();
        let sim = Arc::new(SimulatedAccelerator::new(SimulatedConfig::default()));
        ctx.register_accelerator(sim.clone()).unwrap();
        ctx.register_accelerator(Arc::new(PlaceholderAccelerator::new(1))).unwrap();
        (ctx, sim)
    }

    #[test]
    fn test_profile_on_accelerator() {
        let (ctx, sim) = context_with_sim();
        let result = ctx
            .profile_model(
                &kws_model(),
                ProfileOptions {
                    accelerator: Some("MVP".into()),
                    return_estimates: true,
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(result.accelerator.as_deref(), Some("mvp"));
        assert_eq!(result.layers.len(), 2);
        assert!(result.total_accelerator_cycles() > 0);
        assert_eq!(result.total_macs(), 288 + 96);
        assert!(result.estimates.contains_key("energy"));
        assert!(result.memory_plan.is_some());
        assert!(result.runtime_memory_bytes > 0);
        // Tensor recording is off while profiling.
        assert!(result.layers[0].outputs.is_empty());
        // Cycles-only mode was switched on for the run and restored after.
        assert!(!sim.cycles_only_enabled());
    }

    #[test]
    fn test_profile_software_uses_default_estimator() {
        let (ctx, _sim) = context_with_sim();
        let result = ctx
            .profile_model(
                &kws_model(),
                ProfileOptions {
                    return_estimates: true,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(result.accelerator, None);
        assert_eq!(result.total_accelerator_cycles(), 0);
        let expected_time = result.total_cpu_cycles() as f64 / result.cpu_clock_hz as f64;
        assert!((result.estimates["time"] - expected_time).abs() < 1e-12);

        // The placeholder has no estimator either, so it falls back too.
        let cmsis = ctx
            .profile_model(
                &kws_model(),
                ProfileOptions {
                    accelerator: Some("cmsis".into()),
                    return_estimates: true,
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(cmsis.estimates.contains_key("energy"));
    }

    #[test]
    fn test_profile_without_estimator_registered() {
        let ctx = Context::with_reference_runtime(RuntimeConfig::default()).unwrap();
        let result = ctx
            .profile_model(
                &kws_model(),
                ProfileOptions {
                    return_estimates: true,
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(result.estimates.is_empty());
    }

    #[test]
    fn test_profile_reports_layer_errors() {
        let (ctx, _sim) = context_with_sim();
        let result = ctx
            .profile_model(&chain_model(4, Some((2, "MYSTERY"))), ProfileOptions::default())
            .unwrap();
        assert_eq!(result.layers.len(), 4);
        assert_eq!(result.failed_layers().count(), 1);
        assert_eq!(result.failed_layers().next().map(|l| l.index), Some(2));
    }

    #[test]
    fn test_toggles_restored_after_failed_profile() {
        let (ctx, sim) = context_with_sim();
        let err = ctx
            .profile_model(
                &kws_model(),
                ProfileOptions {
                    accelerator: Some("mvp".into()),
                    disable_simulator_backend: true,
                    runtime_buffer_size: Some(32),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, RuntimeError::LoadError(_)));
        assert!(sim.simulator_backend_enabled());
        assert!(!sim.cycles_only_enabled());

        // A prior "off" state is restored as "off".
        sim.set_simulator_backend_enabled(false);
        ctx.profile_model(
            &kws_model(),
            ProfileOptions {
                accelerator: Some("mvp".into()),
                disable_simulator_backend: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(!sim.simulator_backend_enabled());
    }

    #[test]
    fn test_wrong_input_count() {
        let (ctx, _sim) = context_with_sim();
        let input = Tensor::zeros(tensor_core::Shape::new(vec![1, 4, 4, 1]), tensor_core::DType::I8);
        let err = ctx
            .profile_model(
                &kws_model(),
                ProfileOptions {
                    input_data: vec![input.clone(), input],
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidOption(_)));
        // The session was dropped on the error path.
        assert!(ctx.try_load(&kws_model(), Default::default()).is_ok());
    }
}
