// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-layer and aggregate results of one inference pass.

use memory_manager::{LayerMemory, MemoryPlan};
use model_ir::{LayerDef, OpCode};
use std::collections::BTreeMap;
use tensor_core::Tensor;

/// Outcome of one layer in one inference pass.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LayerResult {
    pub index: usize,
    pub name: String,
    pub op_code: OpCode,
    /// Multiply-accumulate operations the layer performs.
    pub macs: u64,
    /// Total arithmetic operations (a MAC counts as two).
    pub ops: u64,
    pub accelerator_cycles: u64,
    pub cpu_cycles: u64,
    /// `(cpu_cycles + accelerator_cycles) / cpu_clock_hz`.
    pub time_secs: f64,
    /// Kernel failure for this layer, if any. Other layers are unaffected.
    pub error_msg: Option<String>,
    /// Recorded activation (non-constant) inputs.
    pub inputs: Vec<Tensor>,
    /// Recorded outputs.
    pub outputs: Vec<Tensor>,
    /// Accelerator trace data, when the accelerator recorder was on.
    pub accelerator_data: serde_json::Map<String, serde_json::Value>,
    /// Memory attributed to this layer, when recording.
    pub memory: Option<LayerMemory>,
    /// Estimator output (e.g. `"energy"`, `"time"`).
    pub estimates: BTreeMap<String, f64>,
}

impl LayerResult {
    pub(crate) fn new(layer: &LayerDef) -> Self {
        Self {
            index: layer.index,
            name: layer.name.clone(),
            op_code: layer.op_code.clone(),
            macs: 0,
            ops: 0,
            accelerator_cycles: 0,
            cpu_cycles: 0,
            time_secs: 0.0,
            error_msg: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            accelerator_data: serde_json::Map::new(),
            memory: None,
            estimates: BTreeMap::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error_msg.is_none()
    }

    pub fn summary(&self) -> String {
        let status = match &self.error_msg {
            Some(msg) => format!(" ERROR: {msg}"),
            None => String::new(),
        };
        format!(
            "[{}] {} ({}): {} MACs, {} cpu cycles, {} accel cycles, {:.3} ms{}",
            self.index,
            self.name,
            self.op_code,
            self.macs,
            self.cpu_cycles,
            self.accelerator_cycles,
            self.time_secs * 1000.0,
            status,
        )
    }
}

/// Snapshot handed to a per-layer callback right after the layer runs.
#[derive(Debug)]
pub struct LayerSnapshot<'a> {
    pub index: usize,
    pub layer: &'a LayerDef,
    /// The layer's outputs, reconstructed with their declared shape/dtype.
    pub outputs: &'a [Tensor],
}

/// Per-layer callback. Returning `false` stops further callbacks for the
/// rest of the pass; the pass itself continues.
pub type LayerCallback = Box<dyn FnMut(&LayerSnapshot<'_>) -> bool + Send>;

/// Aggregate profile of one inference pass.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProfilingResult {
    pub model_name: String,
    /// Canonical accelerator name, if one was used.
    pub accelerator: Option<String>,
    pub cpu_clock_hz: u64,
    /// Runtime buffer bytes the model needed.
    pub runtime_memory_bytes: usize,
    pub layers: Vec<LayerResult>,
    pub memory_plan: Option<MemoryPlan>,
    /// Model-wide estimator output.
    pub estimates: BTreeMap<String, f64>,
}

impl ProfilingResult {
    pub fn total_cpu_cycles(&self) -> u64 {
        self.layers.iter().map(|l| l.cpu_cycles).sum()
    }

    pub fn total_accelerator_cycles(&self) -> u64 {
        self.layers.iter().map(|l| l.accelerator_cycles).sum()
    }

    pub fn total_macs(&self) -> u64 {
        self.layers.iter().map(|l| l.macs).sum()
    }

    pub fn total_ops(&self) -> u64 {
        self.layers.iter().map(|l| l.ops).sum()
    }

    pub fn total_time_secs(&self) -> f64 {
        self.layers.iter().map(|l| l.time_secs).sum()
    }

    /// Layers that reported a kernel error.
    pub fn failed_layers(&self) -> impl Iterator<Item = &LayerResult> {
        self.layers.iter().filter(|l| !l.is_ok())
    }

    /// Returns a human-readable summary.
    pub fn summary(&self) -> String {
        let mut s = format!(
            "Profile '{}' on {}: {} layers, {} MACs, {} cpu cycles, {} accel cycles, \
             {:.3} ms @ {:.0} MHz, runtime memory {:.1} KB",
            self.model_name,
            self.accelerator.as_deref().unwrap_or("reference kernels"),
            self.layers.len(),
            self.total_macs(),
            self.total_cpu_cycles(),
            self.total_accelerator_cycles(),
            self.total_time_secs() * 1000.0,
            self.cpu_clock_hz as f64 / 1e6,
            self.runtime_memory_bytes as f64 / 1024.0,
        );
        for (key, value) in &self.estimates {
            s.push_str(&format!(", {key}={value:.6}"));
        }
        let failed = self.failed_layers().count();
        if failed > 0 {
            s.push_str(&format!(", {failed} layer(s) failed"));
        }
        s
    }
}
