// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Cycle-model accelerator with a software simulator backend.

use super::{Accelerator, AcceleratorHooks, HookError};
use crate::metrics::ProfilingResult;
use crate::native::REFERENCE_API_VERSION;
use model_ir::{LayerDef, OpCode};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

/// Parameters of a [`SimulatedAccelerator`].
#[derive(Debug, Clone)]
pub struct SimulatedConfig {
    pub name: String,
    pub variants: Vec<String>,
    pub api_version: u32,
    /// Ops with an accelerated kernel.
    pub supported_ops: Vec<OpCode>,
    /// Accelerator cycles per multiply-accumulate.
    pub cycles_per_mac: f64,
    /// Fixed accelerator cycles per accelerated layer.
    pub layer_overhead_cycles: u64,
    /// Clock used for time estimates.
    pub clock_hz: u64,
    /// Joules per CPU cycle.
    pub cpu_energy_per_cycle: f64,
    /// Joules per accelerator cycle.
    pub accelerator_energy_per_cycle: f64,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            name: "mvp".to_string(),
            variants: vec!["mvp".to_string()],
            api_version: REFERENCE_API_VERSION,
            supported_ops: vec![
                OpCode::Conv2d,
                OpCode::DepthwiseConv2d,
                OpCode::TransposeConv,
                OpCode::FullyConnected,
                OpCode::AveragePool2d,
                OpCode::MaxPool2d,
                OpCode::Add,
                OpCode::Mul,
            ],
            cycles_per_mac: 0.25,
            layer_overhead_cycles: 200,
            clock_hz: 78_000_000,
            cpu_energy_per_cycle: 9.0e-11,
            accelerator_energy_per_cycle: 2.5e-11,
        }
    }
}

/// An accelerator whose cycle counts come from a linear cost model.
///
/// Every optional hook is implemented, which makes it the default
/// estimator and the usual stand-in in tests.
#[derive(Debug)]
pub struct SimulatedAccelerator {
    config: SimulatedConfig,
    simulator_backend: AtomicBool,
    cycles_only: AtomicBool,
    program_recorder: AtomicBool,
    active_variants: Mutex<BTreeSet<String>>,
}

impl SimulatedAccelerator {
    pub fn new(config: SimulatedConfig) -> Self {
        Self {
            config,
            simulator_backend: AtomicBool::new(true),
            cycles_only: AtomicBool::new(false),
            program_recorder: AtomicBool::new(false),
            active_variants: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn config(&self) -> &SimulatedConfig {
        &self.config
    }

    /// Returns `true` between `init_variant` and `deinit_variant`.
    pub fn is_initialized(&self, variant: &str) -> bool {
        self.active_variants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(variant)
    }

    fn knows_variant(&self, variant: &str) -> bool {
        self.config
            .variants
            .iter()
            .any(|v| v.eq_ignore_ascii_case(variant))
    }
}

impl Accelerator for SimulatedAccelerator {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn variants(&self) -> Vec<String> {
        self.config.variants.clone()
    }

    fn api_version(&self) -> u32 {
        self.config.api_version
    }

    fn hooks(&self) -> AcceleratorHooks {
        AcceleratorHooks {
            init_variant: true,
            deinit_variant: true,
            simulator_backend: true,
            cycles_only: true,
            program_recorder: true,
            estimator: true,
        }
    }

    fn supports_op(&self, op: &OpCode) -> bool {
        self.config.supported_ops.contains(op)
    }

    fn layer_cycles(&self, _op: &OpCode, macs: u64, ops: u64) -> u64 {
        let work = if macs > 0 { macs } else { ops };
        self.config.layer_overhead_cycles + (work as f64 * self.config.cycles_per_mac).ceil() as u64
    }

    fn init_variant(&self, variant: &str) -> Result<(), HookError> {
        if !self.knows_variant(variant) {
            return Err(HookError(format!(
                "'{}' is not a variant of accelerator '{}'",
                variant, self.config.name
            )));
        }
        self.active_variants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(variant.to_string());
        Ok(())
    }

    fn deinit_variant(&self, variant: &str) -> Result<(), HookError> {
        self.active_variants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(variant);
        Ok(())
    }

    fn simulator_backend_enabled(&self) -> bool {
        self.simulator_backend.load(Ordering::SeqCst)
    }

    fn set_simulator_backend_enabled(&self, enabled: bool) {
        self.simulator_backend.store(enabled, Ordering::SeqCst);
    }

    fn cycles_only_enabled(&self) -> bool {
        self.cycles_only.load(Ordering::SeqCst)
    }

    fn set_cycles_only_enabled(&self, enabled: bool) {
        self.cycles_only.store(enabled, Ordering::SeqCst);
    }

    fn program_recorder_enabled(&self) -> bool {
        self.program_recorder.load(Ordering::SeqCst)
    }

    fn set_program_recorder_enabled(&self, enabled: bool) {
        self.program_recorder.store(enabled, Ordering::SeqCst);
    }

    fn record_layer(
        &self,
        variant: &str,
        layer: &LayerDef,
        accelerator_cycles: u64,
    ) -> serde_json::Map<String, serde_json::Value> {
        let mut data = serde_json::Map::new();
        data.insert("variant".into(), variant.into());
        data.insert(
            "instructions".into(),
            serde_json::json!([
                format!("load {}", layer.inputs.len()),
                format!("exec {}", layer.op_code),
                format!("store {}", layer.outputs.len()),
            ]),
        );
        data.insert("accelerator_cycles".into(), accelerator_cycles.into());
        data
    }

    fn estimate_profiling_results(
        &self,
        results: &mut ProfilingResult,
        with_hardware: bool,
    ) -> Result<(), HookError> {
        if results.cpu_clock_hz == 0 {
            return Err(HookError("cpu clock must be non-zero".into()));
        }
        let cpu_hz = results.cpu_clock_hz as f64;
        let acc_hz = self.config.clock_hz.max(1) as f64;

        let mut total_energy = 0.0;
        let mut total_time = 0.0;
        for layer in &mut results.layers {
            let acc_cycles = if with_hardware { layer.accelerator_cycles } else { 0 };
            let energy = layer.cpu_cycles as f64 * self.config.cpu_energy_per_cycle
                + acc_cycles as f64 * self.config.accelerator_energy_per_cycle;
            let time = layer.cpu_cycles as f64 / cpu_hz + acc_cycles as f64 / acc_hz;
            layer.estimates.insert("energy".into(), energy);
            layer.estimates.insert("time".into(), time);
            total_energy += energy;
            total_time += time;
        }
        results.estimates.insert("energy".into(), total_energy);
        results.estimates.insert("time".into(), total_time);
        Ok(())
    }
}
