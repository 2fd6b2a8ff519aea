// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! One loaded model bound to at most one accelerator.
//!
//! # State machine
//! ```text
//! load ─► Loaded → (Invoking → Loaded)* → Unloading → Unloaded
//! ```
//!
//! A [`Session`] holds the context's engine lock from the moment it is
//! created until it is unloaded or dropped. Every exit path releases it:
//! a failed load returns without ever building a session, and
//! [`Session::unload`] drops the guard even when teardown reports errors.

use crate::accelerator::RegisteredAccelerator;
use crate::context::Context;
use crate::log_bridge::LogLevel;
use crate::metrics::{LayerCallback, LayerResult, LayerSnapshot};
use crate::native::{
    LayerObserver, ModelDetails, NativeLayerRecord, NativeLoadRequest, NativeRuntime,
};
use crate::RuntimeError;
use memory_manager::{AllocationEvent, LayerMemory, MemoryPlan};
use model_ir::graph::Validated;
use model_ir::{LayerDef, ModelGraph, ModelHandle, TensorSpec};
use std::sync::MutexGuard;
use tensor_core::{Tensor, TensorError};

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Unloaded,
    Loaded,
    Invoking,
    Unloading,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Unloaded => "unloaded",
            Self::Loaded => "loaded",
            Self::Invoking => "invoking",
            Self::Unloading => "unloading",
        })
    }
}

/// Options for [`Context::load`].
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Accelerator (any variant name, any case) to bind.
    pub accelerator: Option<String>,
    /// Size of arena 0 in bytes. Overrides the model's memory spec and
    /// the configured `runtime_buffer_size`. `Some(0)` lets the engine
    /// size the arena.
    pub runtime_buffer_size: Option<usize>,
    pub enable_profiler: bool,
    pub enable_recorder: bool,
    pub enable_tensor_recorder: bool,
    /// Let every planned activation buffer share the same arena bytes.
    /// Layer outputs are then garbage; only cycle counts stay meaningful.
    pub force_buffer_overlap: bool,
}

struct RecordedMemory {
    events: Vec<AllocationEvent>,
    layers: Vec<LayerMemory>,
    total_persistent_bytes: usize,
}

/// A loaded model holding the engine lock.
pub struct Session<'ctx> {
    context: &'ctx Context,
    native: Option<MutexGuard<'ctx, Box<dyn NativeRuntime>>>,
    model: ModelHandle,
    accelerator: Option<RegisteredAccelerator>,
    details: ModelDetails,
    state: SessionState,
    layer_callback: Option<LayerCallback>,
    memory: Option<RecordedMemory>,
}

impl<'ctx> Session<'ctx> {
    pub(crate) fn open(
        context: &'ctx Context,
        mut native: MutexGuard<'ctx, Box<dyn NativeRuntime>>,
        model: &ModelHandle,
        options: LoadOptions,
    ) -> Result<Self, RuntimeError> {
        let bridge = context.log_bridge();
        bridge.clear_errors();

        let accelerator = options
            .accelerator
            .as_deref()
            .map(|name| context.accelerator(name))
            .transpose()?;
        let explicit_size = match options.runtime_buffer_size {
            Some(size) => Some(size),
            None => context.config().runtime_buffer_size()?,
        };

        let mut runtime_buffer_sizes = accelerator
            .as_ref()
            .and_then(|acc| model.memory_spec(acc.name()))
            .map(|spec| spec.sizes)
            .filter(|sizes| !sizes.is_empty())
            .unwrap_or_else(|| vec![0]);
        if let Some(size) = explicit_size {
            runtime_buffer_sizes[0] = size;
        }

        if let Some(acc) = &accelerator {
            acc.init().map_err(|e| {
                RuntimeError::LoadError(format!("accelerator '{}' failed to initialise: {e}", acc.name()))
            })?;
        }

        tracing::info!(
            "loading model '{}' (accelerator: {}, runtime buffers: {:?})",
            model.name(),
            accelerator.as_ref().map_or("none", |a| a.name()),
            runtime_buffer_sizes
        );
        let request = NativeLoadRequest {
            model,
            accelerator: accelerator.clone(),
            runtime_buffer_sizes,
            enable_profiler: options.enable_profiler,
            enable_recorder: options.enable_recorder,
            enable_tensor_recorder: options.enable_tensor_recorder,
            force_buffer_overlap: options.force_buffer_overlap,
        };

        match native.load(request) {
            Ok(details) => {
                tracing::debug!(
                    "model '{}' loaded: {} runtime bytes, arenas {:?}",
                    details.name,
                    details.runtime_memory_bytes,
                    details.arena_sizes
                );
                Ok(Self {
                    context,
                    native: Some(native),
                    model: model.clone(),
                    accelerator,
                    details,
                    state: SessionState::Loaded,
                    layer_callback: None,
                    memory: None,
                })
            }
            Err(e) => {
                if let Some(acc) = &accelerator {
                    if let Err(de) = acc.deinit() {
                        tracing::warn!("accelerator '{}' deinit after failed load: {de}", acc.name());
                    }
                }
                drop(native);

                let mut message = e.to_string();
                let native_errors = bridge.drain_errors();
                if !native_errors.is_empty() {
                    message.push_str(&format!(" [engine: {}]", native_errors.join("; ")));
                }
                tracing::warn!("failed to load model '{}': {message}", model.name());
                Err(RuntimeError::LoadError(message))
            }
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn model(&self) -> &ModelHandle {
        &self.model
    }

    /// Variant name of the bound accelerator.
    pub fn accelerator(&self) -> Option<&str> {
        self.accelerator.as_ref().map(|a| a.name())
    }

    /// What the engine reported at load time.
    pub fn details(&self) -> &ModelDetails {
        &self.details
    }

    pub fn input_count(&self) -> usize {
        self.model.graph().inputs.len()
    }

    pub fn output_count(&self) -> usize {
        self.model.graph().outputs.len()
    }

    fn engine(&mut self, op: &'static str) -> Result<&mut dyn NativeRuntime, RuntimeError> {
        match self.native.as_mut() {
            Some(guard) => Ok(&mut ***guard),
            None => Err(RuntimeError::InvalidState {
                op,
                state: self.state,
            }),
        }
    }

    fn ensure_loaded(&self, op: &'static str) -> Result<(), RuntimeError> {
        if self.state == SessionState::Loaded {
            Ok(())
        } else {
            Err(RuntimeError::InvalidState {
                op,
                state: self.state,
            })
        }
    }

    /// Binds `tensor` to model input `index`.
    ///
    /// The tensor's shape and dtype must match the declaration exactly.
    /// The engine may reuse input memory during a pass, so inputs are set
    /// again before every [`invoke`](Self::invoke).
    pub fn set_input(&mut self, index: usize, tensor: &Tensor) -> Result<(), RuntimeError> {
        self.ensure_loaded("set an input")?;
        let spec = io_spec(self.model.graph(), &self.model.graph().inputs, "input", index)?;
        if spec.shape != *tensor.shape() || spec.dtype != tensor.dtype() {
            return Err(RuntimeError::ShapeMismatch {
                index,
                expected_shape: spec.shape.clone(),
                expected_dtype: spec.dtype,
                actual_shape: tensor.shape().clone(),
                actual_dtype: tensor.dtype(),
            });
        }
        self.engine("set an input")?
            .set_input(index, tensor.as_bytes())
            .map_err(|e| RuntimeError::InvocationError(e.to_string()))
    }

    /// Binds `inputs` in order, or zeros everywhere when `inputs` is empty.
    pub(crate) fn bind_inputs(&mut self, inputs: &[Tensor]) -> Result<(), RuntimeError> {
        let count = self.input_count();
        if inputs.is_empty() {
            let zeros: Vec<Tensor> = self
                .model
                .graph()
                .input_specs()
                .map(|s| Tensor::zeros(s.shape.clone(), s.dtype))
                .collect();
            for (index, tensor) in zeros.iter().enumerate() {
                self.set_input(index, tensor)?;
            }
            return Ok(());
        }
        if inputs.len() != count {
            return Err(RuntimeError::InvalidOption(format!(
                "model '{}' takes {count} input(s), {} given",
                self.model.name(),
                inputs.len()
            )));
        }
        for (index, tensor) in inputs.iter().enumerate() {
            self.set_input(index, tensor)?;
        }
        Ok(())
    }

    /// Returns model output `index` with its declared shape and dtype.
    pub fn output(&mut self, index: usize) -> Result<Tensor, RuntimeError> {
        self.ensure_loaded("read an output")?;
        let model = self.model.clone();
        let spec = io_spec(model.graph(), &model.graph().outputs, "output", index)?;
        let bytes = self
            .engine("read an output")?
            .output(index)
            .map_err(|e| RuntimeError::InvocationError(e.to_string()))?;
        Ok(Tensor::from_recorded(&spec.shape, spec.dtype, bytes)?)
    }

    /// Installs a per-layer callback for subsequent passes. Returns the
    /// previous one.
    pub fn set_layer_callback(&mut self, callback: Option<LayerCallback>) -> Option<LayerCallback> {
        std::mem::replace(&mut self.layer_callback, callback)
    }

    /// Sets the engine's minimum log severity. Returns the previous level.
    pub fn set_native_log_level(&mut self, level: LogLevel) -> Result<LogLevel, RuntimeError> {
        let previous = self.engine("set the log level")?.set_log_level(level);
        self.context.record_native_log_level(level);
        Ok(previous)
    }

    /// Runs one forward pass.
    ///
    /// Layer kernel failures are reported per layer in
    /// [`LayerResult::error_msg`]; the pass still covers every layer.
    /// `Err` means the engine itself failed.
    pub fn invoke(&mut self) -> Result<Vec<LayerResult>, RuntimeError> {
        self.ensure_loaded("invoke")?;
        self.state = SessionState::Invoking;

        let model = self.model.clone();
        let graph = model.graph();
        let mut callback = self.layer_callback.take();
        let outcome = {
            let mut observer = CallbackObserver {
                graph,
                callback: callback.as_mut(),
            };
            self.engine("invoke")?.invoke(&mut observer)
        };
        self.layer_callback = callback;

        let Some(engine) = self.native.as_deref_mut() else {
            return Err(RuntimeError::InvalidState {
                op: "invoke",
                state: self.state,
            });
        };
        if let Err(e) = outcome {
            self.state = SessionState::Loaded;
            tracing::warn!("invocation of '{}' failed: {e}", model.name());
            return Err(RuntimeError::InvocationError(e.to_string()));
        }
        let profiles = engine.profiling_results();
        let recording = engine.recorded_data();
        let errors: Vec<Option<String>> = (0..graph.num_layers()).map(|i| engine.layer_error(i)).collect();
        self.state = SessionState::Loaded;

        let clock = self.context.config().cpu_clock_hz as f64;
        let (mut records, memory): (Vec<Option<NativeLayerRecord>>, _) = match recording {
            Some(rec) => {
                let memory = RecordedMemory {
                    events: rec.events,
                    layers: rec.layers.iter().map(|l| l.memory).collect(),
                    total_persistent_bytes: rec.total_persistent_bytes,
                };
                (rec.layers.into_iter().map(Some).collect(), Some(memory))
            }
            None => (Vec::new(), None),
        };
        self.memory = memory;

        let mut results = Vec::with_capacity(graph.num_layers());
        for (layer, error) in graph.iter_layers().zip(errors) {
            let mut result = LayerResult::new(layer);
            if let Some(p) = profiles.get(layer.index) {
                result.macs = p.macs;
                result.ops = p.ops;
                result.cpu_cycles = p.cpu_cycles;
                result.accelerator_cycles = p.accelerator_cycles;
                result.time_secs = (p.cpu_cycles + p.accelerator_cycles) as f64 / clock;
            }
            result.error_msg = error;

            if let Some(record) = records.get_mut(layer.index).and_then(Option::take) {
                result.memory = Some(record.memory);
                result.accelerator_data = record.accelerator_data;
                let tensors = rebuild(activation_inputs(graph, layer), record.inputs).and_then(|inputs| {
                    let outputs = rebuild(
                        layer.outputs.iter().filter_map(|&t| graph.tensor(t)).collect(),
                        record.outputs,
                    )?;
                    Ok((inputs, outputs))
                });
                match tensors {
                    Ok((inputs, outputs)) => {
                        result.inputs = inputs;
                        result.outputs = outputs;
                    }
                    Err(e) => {
                        tracing::warn!("layer {} ({}): recorded tensors dropped: {e}", layer.index, layer.name);
                        let msg = format!("recorded tensors unreadable: {e}");
                        result.error_msg = Some(match result.error_msg.take() {
                            Some(kernel) => format!("{kernel}; {msg}"),
                            None => msg,
                        });
                    }
                }
            }
            results.push(result);
        }

        let failed = results.iter().filter(|r| !r.is_ok()).count();
        tracing::debug!(
            "invoked '{}': {} layers, {} with kernel errors",
            model.name(),
            results.len(),
            failed
        );
        Ok(results)
    }

    /// Memory plan of the last recorded pass, if the recorder was on.
    pub fn memory_plan(&self) -> Result<Option<MemoryPlan>, RuntimeError> {
        let Some(memory) = &self.memory else {
            return Ok(None);
        };
        let plan = MemoryPlan::reconstruct(
            memory.events.clone(),
            memory.layers.clone(),
            memory.total_persistent_bytes,
        )?;
        Ok(Some(plan))
    }

    /// Releases the model and the engine lock.
    ///
    /// The lock is released even when teardown fails; the failures are
    /// then reported as [`RuntimeError::Teardown`]. Unloading an unloaded
    /// session is a no-op.
    pub fn unload(&mut self) -> Result<(), RuntimeError> {
        let Some(mut native) = self.native.take() else {
            return Ok(());
        };
        self.state = SessionState::Unloading;

        let mut problems = Vec::new();
        if let Some(acc) = &self.accelerator {
            if let Err(e) = acc.deinit() {
                problems.push(format!("accelerator '{}' deinit: {e}", acc.name()));
            }
        }
        if let Err(e) = native.unload() {
            problems.push(format!("engine unload: {e}"));
        }
        drop(native);
        self.state = SessionState::Unloaded;

        if problems.is_empty() {
            tracing::info!("unloaded model '{}'", self.model.name());
            Ok(())
        } else {
            Err(RuntimeError::Teardown(problems.join("; ")))
        }
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        if self.native.is_some() {
            tracing::debug!("session for '{}' dropped while loaded", self.model.name());
            if let Err(e) = self.unload() {
                tracing::warn!("{e}");
            }
        }
    }
}

impl std::fmt::Debug for Session<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("model", &self.model.name())
            .field("accelerator", &self.accelerator())
            .field("state", &self.state)
            .field("has_layer_callback", &self.layer_callback.is_some())
            .finish()
    }
}

// ── Helpers ────────────────────────────────────────────────────────

fn io_spec<'g>(
    graph: &'g ModelGraph<Validated>,
    io: &[usize],
    kind: &'static str,
    index: usize,
) -> Result<&'g TensorSpec, RuntimeError> {
    io.get(index)
        .and_then(|&t| graph.tensor(t))
        .ok_or(RuntimeError::IndexOutOfRange {
            kind,
            index,
            count: io.len(),
        })
}

fn activation_inputs<'g>(graph: &'g ModelGraph<Validated>, layer: &LayerDef) -> Vec<&'g TensorSpec> {
    layer
        .inputs
        .iter()
        .filter_map(|&t| graph.tensor(t))
        .filter(|s| !s.constant)
        .collect()
}

fn rebuild(specs: Vec<&TensorSpec>, buffers: Vec<Vec<u8>>) -> Result<Vec<Tensor>, TensorError> {
    specs
        .into_iter()
        .zip(buffers)
        .map(|(spec, bytes)| Tensor::from_recorded(&spec.shape, spec.dtype, bytes))
        .collect()
}

/// Feeds layer outputs to the user callback until it asks to stop.
struct CallbackObserver<'a> {
    graph: &'a ModelGraph<Validated>,
    callback: Option<&'a mut LayerCallback>,
}

impl LayerObserver for CallbackObserver<'_> {
    fn on_layer(&mut self, index: usize, outputs: &[Vec<u8>]) {
        let graph = self.graph;
        let Some(layer) = graph.layer(index) else {
            return;
        };
        let keep_going = match self.callback.as_mut() {
            Some(callback) => {
                let tensors: Vec<Tensor> = layer
                    .outputs
                    .iter()
                    .zip(outputs)
                    .filter_map(|(&t, bytes)| {
                        let spec = graph.tensor(t)?;
                        Tensor::from_recorded(&spec.shape, spec.dtype, bytes.clone())
                            .map_err(|e| tracing::warn!("layer {index} output '{}': {e}", spec.name))
                            .ok()
                    })
                    .collect();
                callback(&LayerSnapshot {
                    index,
                    layer,
                    outputs: &tensors,
                })
            }
            None => return,
        };
        if !keep_going {
            tracing::debug!("layer callback stopped after layer {index}");
            self.callback = None;
        }
    }
}
