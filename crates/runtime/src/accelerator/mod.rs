// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Hardware accelerator capability interface.
//!
//! An [`Accelerator`] is a backend that can replace the engine's software
//! kernels for some ops. Optional capabilities are declared explicitly
//! through [`AcceleratorHooks`]; callers consult the flags instead of
//! probing for methods.
//!
//! The registry shares one immutable descriptor between all of its
//! variants. The only per-variant state is the variant tag carried by
//! [`RegisteredAccelerator`].

mod discovery;
mod placeholder;
mod registry;
mod simulated;

pub use discovery::{
    AcceleratorFactories, AcceleratorFactory, DiscoveryReport, FactoryContext, PluginManifest,
    SkippedPlugin, ACCELERATOR_PATHS_ENV, PLUGIN_MANIFEST_FILE, POINTER_FILE_SUFFIX,
};
pub use placeholder::{PlaceholderAccelerator, PLACEHOLDER_ACCELERATOR};
pub use registry::AcceleratorRegistry;
pub use simulated::{SimulatedAccelerator, SimulatedConfig};

pub(crate) use discovery::discover;

use crate::metrics::ProfilingResult;
use model_ir::{LayerDef, OpCode};
use std::fmt;
use std::sync::Arc;

/// Failure reported by an accelerator hook.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct HookError(pub String);

/// The optional capabilities an accelerator implements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct AcceleratorHooks {
    /// `init_variant` must be called before a model is loaded.
    pub init_variant: bool,
    /// `deinit_variant` must be called when the model is unloaded.
    pub deinit_variant: bool,
    /// The simulator backend can be switched off.
    pub simulator_backend: bool,
    /// "Accelerator cycles only" mode is available.
    pub cycles_only: bool,
    /// The accelerator can record its program/instruction trace.
    pub program_recorder: bool,
    /// `estimate_profiling_results` produces metrics.
    pub estimator: bool,
}

/// Capability surface every accelerator backend implements.
///
/// Toggle setters take `&self`: a descriptor is shared behind an [`Arc`]
/// and keeps its switches in interior-mutable state.
pub trait Accelerator: Send + Sync + fmt::Debug {
    /// Canonical accelerator name.
    fn name(&self) -> &str;

    /// Names under which the accelerator is reachable. Defaults to the
    /// canonical name alone.
    fn variants(&self) -> Vec<String> {
        vec![self.name().to_string()]
    }

    /// Runtime API version this accelerator was built against.
    fn api_version(&self) -> u32;

    fn hooks(&self) -> AcceleratorHooks {
        AcceleratorHooks::default()
    }

    /// Returns `true` if the accelerator provides a kernel for `op`.
    fn supports_op(&self, _op: &OpCode) -> bool {
        false
    }

    /// Accelerator cycles spent on a layer it executes.
    fn layer_cycles(&self, _op: &OpCode, _macs: u64, _ops: u64) -> u64 {
        0
    }

    fn init_variant(&self, _variant: &str) -> Result<(), HookError> {
        Ok(())
    }

    fn deinit_variant(&self, _variant: &str) -> Result<(), HookError> {
        Ok(())
    }

    fn simulator_backend_enabled(&self) -> bool {
        true
    }

    fn set_simulator_backend_enabled(&self, _enabled: bool) {}

    fn cycles_only_enabled(&self) -> bool {
        false
    }

    fn set_cycles_only_enabled(&self, _enabled: bool) {}

    fn program_recorder_enabled(&self) -> bool {
        false
    }

    fn set_program_recorder_enabled(&self, _enabled: bool) {}

    /// Accelerator-specific trace data for one executed layer.
    fn record_layer(
        &self,
        _variant: &str,
        _layer: &LayerDef,
        _accelerator_cycles: u64,
    ) -> serde_json::Map<String, serde_json::Value> {
        serde_json::Map::new()
    }

    /// Adds estimated metrics (energy, time) to a profiling result.
    ///
    /// `with_hardware` is `false` when the run used no accelerator and this
    /// descriptor is only standing in as the default estimator.
    fn estimate_profiling_results(
        &self,
        _results: &mut ProfilingResult,
        _with_hardware: bool,
    ) -> Result<(), HookError> {
        Ok(())
    }
}

/// One registry entry: a shared descriptor plus the variant it was
/// reached through.
#[derive(Debug, Clone)]
pub struct RegisteredAccelerator {
    descriptor: Arc<dyn Accelerator>,
    variant: String,
}

impl RegisteredAccelerator {
    pub(crate) fn new(descriptor: Arc<dyn Accelerator>, variant: String) -> Self {
        Self {
            descriptor,
            variant,
        }
    }

    /// The normalized variant name.
    pub fn name(&self) -> &str {
        &self.variant
    }

    pub fn descriptor(&self) -> &Arc<dyn Accelerator> {
        &self.descriptor
    }

    pub fn hooks(&self) -> AcceleratorHooks {
        self.descriptor.hooks()
    }

    /// Runs `init_variant` if the accelerator declares it.
    pub fn init(&self) -> Result<(), HookError> {
        if self.hooks().init_variant {
            tracing::debug!("initialising accelerator variant '{}'", self.variant);
            self.descriptor.init_variant(&self.variant)?;
        }
        Ok(())
    }

    /// Runs `deinit_variant` if the accelerator declares it.
    pub fn deinit(&self) -> Result<(), HookError> {
        if self.hooks().deinit_variant {
            tracing::debug!("deinitialising accelerator variant '{}'", self.variant);
            self.descriptor.deinit_variant(&self.variant)?;
        }
        Ok(())
    }
}

/// Restores an accelerator's toggles to the values they had when the
/// guard was created.
///
/// Create it only while holding the engine lock, and drop it before
/// releasing the lock.
pub(crate) struct ToggleGuard {
    accelerator: Option<Arc<dyn Accelerator>>,
    simulator_backend: bool,
    cycles_only: bool,
    program_recorder: bool,
}

impl ToggleGuard {
    pub(crate) fn new(accelerator: Option<&RegisteredAccelerator>) -> Self {
        let accelerator = accelerator.map(|a| Arc::clone(a.descriptor()));
        let (simulator_backend, cycles_only, program_recorder) = match &accelerator {
            Some(acc) => (
                acc.simulator_backend_enabled(),
                acc.cycles_only_enabled(),
                acc.program_recorder_enabled(),
            ),
            None => (true, false, false),
        };
        Self {
            accelerator,
            simulator_backend,
            cycles_only,
            program_recorder,
        }
    }
}

impl Drop for ToggleGuard {
    fn drop(&mut self) {
        let Some(acc) = &self.accelerator else {
            return;
        };
        let hooks = acc.hooks();
        if hooks.simulator_backend {
            acc.set_simulator_backend_enabled(self.simulator_backend);
        }
        if hooks.cycles_only {
            acc.set_cycles_only_enabled(self.cycles_only);
        }
        if hooks.program_recorder {
            acc.set_program_recorder_enabled(self.program_recorder);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_guard_restores() {
        let sim = Arc::new(SimulatedAccelerator::new(SimulatedConfig::default()));
        let registered = RegisteredAccelerator::new(sim.clone(), "mvp".into());
        {
            let _guard = ToggleGuard::new(Some(&registered));
            sim.set_simulator_backend_enabled(false);
            sim.set_cycles_only_enabled(true);
            sim.set_program_recorder_enabled(true);
        }
        assert!(sim.simulator_backend_enabled());
        assert!(!sim.cycles_only_enabled());
        assert!(!sim.program_recorder_enabled());
    }

    #[test]
    fn test_toggle_guard_restores_on_panic() {
        let sim = Arc::new(SimulatedAccelerator::new(SimulatedConfig::default()));
        sim.set_cycles_only_enabled(true);
        let registered = RegisteredAccelerator::new(sim.clone(), "mvp".into());
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = ToggleGuard::new(Some(&registered));
            sim.set_cycles_only_enabled(false);
            panic!("kernel blew up");
        }));
        assert!(result.is_err());
        assert!(sim.cycles_only_enabled());
    }

    #[test]
    fn test_hooks_skipped_when_undeclared() {
        let placeholder = Arc::new(PlaceholderAccelerator::new(1));
        let registered = RegisteredAccelerator::new(placeholder, PLACEHOLDER_ACCELERATOR.into());
        assert!(registered.init().is_ok());
        assert!(registered.deinit().is_ok());
        assert_eq!(registered.hooks(), AcceleratorHooks::default());
    }
}
