// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Software reference engine.
//!
//! Executes a model's layers in order on one arena. Activations are
//! placed by the greedy planner at load time; each layer gets its own
//! persistent block from the arena tail and its scratch from just above
//! the planned region. The kernels are data-movement stand-ins (each
//! output receives the layer's first activation input) with a cycle
//! model per op class, which is all the host layer needs to exercise
//! profiling, recording, and memory planning.

use super::{
    LayerObserver, ModelDetails, NativeError, NativeLayerProfile, NativeLayerRecord,
    NativeLoadRequest, NativeLogger, NativeRecording, NativeRuntime,
};
use crate::accelerator::RegisteredAccelerator;
use crate::log_bridge::LogLevel;
use memory_manager::{
    align_up, planned_extent, Arena, BufferRequest, GreedyPlanner, LayerMemory, ALIGNMENT,
};
use model_ir::graph::Validated;
use model_ir::{LayerDef, ModelGraph, ModelHandle, OpCode};
use std::collections::BTreeMap;

/// API version of the reference engine.
pub const REFERENCE_API_VERSION: u32 = 1;

/// Fixed CPU cost of dispatching a layer.
const LAYER_DISPATCH_CYCLES: u64 = 400;
/// CPU cost of handing a layer to an accelerator.
const ACCELERATED_DISPATCH_CYCLES: u64 = 200;
/// Kernel state every layer keeps.
const LAYER_PERSISTENT_BYTES: usize = 48;
/// Extra kernel state an accelerated layer keeps.
const ACCELERATOR_PERSISTENT_BYTES: usize = 64;
/// Per output channel quantization data of conv-like layers.
const PER_CHANNEL_BYTES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kernel {
    Reference,
    Accelerated,
    Unsupported,
}

fn select_kernel(layer: &LayerDef, accelerator: Option<&RegisteredAccelerator>) -> Kernel {
    if accelerator.is_some_and(|a| a.descriptor().supports_op(&layer.op_code)) {
        Kernel::Accelerated
    } else if layer.op_code.is_builtin() {
        Kernel::Reference
    } else {
        Kernel::Unsupported
    }
}

fn is_conv_like(op: &OpCode) -> bool {
    matches!(
        op,
        OpCode::Conv2d | OpCode::DepthwiseConv2d | OpCode::TransposeConv | OpCode::FullyConnected
    )
}

// ── Cost model ─────────────────────────────────────────────────────

struct LayerCost {
    macs: u64,
    ops: u64,
    output_elements: u64,
}

fn layer_cost(graph: &ModelGraph<Validated>, layer: &LayerDef) -> LayerCost {
    let output_elements: u64 = layer
        .outputs
        .iter()
        .filter_map(|&t| graph.tensor(t))
        .map(|s| s.shape.num_elements() as u64)
        .sum();
    let weights = layer
        .inputs
        .iter()
        .filter_map(|&t| graph.tensor(t))
        .find(|s| s.constant);

    let macs = match (&layer.op_code, weights) {
        (OpCode::DepthwiseConv2d, Some(w)) => {
            let channels = w.shape.dims().last().copied().unwrap_or(0) as u64;
            (w.shape.num_elements() as u64)
                .checked_div(channels)
                .map_or(0, |per_output| output_elements * per_output)
        }
        (op, Some(w)) if is_conv_like(op) => {
            let filters = w.shape.dim(0).unwrap_or(0) as u64;
            (w.shape.num_elements() as u64)
                .checked_div(filters)
                .map_or(0, |per_output| output_elements * per_output)
        }
        _ => 0,
    };

    let ops = match &layer.op_code {
        op if is_conv_like(op) => 2 * macs + output_elements,
        OpCode::AveragePool2d | OpCode::MaxPool2d => {
            let window = layer.option_u64("filter_height").unwrap_or(2)
                * layer.option_u64("filter_width").unwrap_or(2);
            output_elements * window
        }
        OpCode::Softmax => 5 * output_elements,
        OpCode::Reshape => 0,
        _ => output_elements,
    };

    LayerCost {
        macs,
        ops,
        output_elements,
    }
}

fn cycles_per_element(op: &OpCode) -> u64 {
    match op {
        OpCode::Reshape => 0,
        OpCode::Softmax => 12,
        OpCode::Mean => 3,
        OpCode::AveragePool2d
        | OpCode::MaxPool2d
        | OpCode::Add
        | OpCode::Mul
        | OpCode::Quantize
        | OpCode::Dequantize => 2,
        _ => 1,
    }
}

fn persistent_bytes(graph: &ModelGraph<Validated>, layer: &LayerDef, kernel: Kernel) -> usize {
    let mut bytes = LAYER_PERSISTENT_BYTES;
    if is_conv_like(&layer.op_code) {
        let channels = layer
            .outputs
            .first()
            .and_then(|&t| graph.tensor(t))
            .and_then(|s| s.shape.dims().last().copied())
            .unwrap_or(1);
        bytes += PER_CHANNEL_BYTES * channels;
    }
    if kernel == Kernel::Accelerated {
        bytes += ACCELERATOR_PERSISTENT_BYTES;
    }
    bytes
}

fn scratch_bytes(graph: &ModelGraph<Validated>, layer: &LayerDef) -> usize {
    let first_activation = layer
        .inputs
        .iter()
        .filter_map(|&t| graph.tensor(t))
        .find(|s| !s.constant)
        .map_or(0, |s| s.size_bytes());
    let output_bytes: usize = layer
        .outputs
        .iter()
        .filter_map(|&t| graph.tensor(t))
        .map(|s| s.size_bytes())
        .sum();
    match &layer.op_code {
        op if is_conv_like(op) => (first_activation / 4).max(16),
        OpCode::Softmax => 256,
        OpCode::Mean => output_bytes * 4,
        _ => 0,
    }
}

// ── Logging ────────────────────────────────────────────────────────

struct NativeLog {
    logger: Option<NativeLogger>,
    level: LogLevel,
}

impl NativeLog {
    fn emit(&self, level: LogLevel, message: &str) {
        if level < self.level {
            return;
        }
        if let Some(logger) = &self.logger {
            logger(&format!("{} {message}", level.tag()));
        }
    }
}

// ── Loaded model ───────────────────────────────────────────────────

struct LoadedModel {
    model: ModelHandle,
    accelerator: Option<RegisteredAccelerator>,
    kernels: Vec<Kernel>,
    arena: Arena,
    /// Planned arena offset per tensor index.
    offsets: Vec<Option<usize>>,
    /// Heap storage for outputs whose declared shape has no elements.
    dynamic: BTreeMap<usize, Vec<u8>>,
    layer_persistent: Vec<usize>,
    layer_scratch: Vec<usize>,
    enable_profiler: bool,
    enable_recorder: bool,
    enable_tensor_recorder: bool,
    profiles: Vec<NativeLayerProfile>,
    layer_errors: Vec<Option<String>>,
    recording: Option<NativeRecording>,
}

fn read_tensor(
    arena: &Arena,
    offsets: &[Option<usize>],
    dynamic: &BTreeMap<usize, Vec<u8>>,
    graph: &ModelGraph<Validated>,
    index: usize,
) -> Vec<u8> {
    let Some(spec) = graph.tensor(index) else {
        return Vec::new();
    };
    match offsets.get(index).copied().flatten() {
        Some(offset) => arena
            .bytes(offset, spec.size_bytes())
            .map(<[u8]>::to_vec)
            .unwrap_or_default(),
        None => dynamic.get(&index).cloned().unwrap_or_default(),
    }
}

// ── Engine ─────────────────────────────────────────────────────────

/// The built-in software engine ("reference kernels").
pub struct ReferenceRuntime {
    log: NativeLog,
    loaded: Option<LoadedModel>,
}

impl ReferenceRuntime {
    pub fn new() -> Self {
        Self {
            log: NativeLog {
                logger: None,
                level: LogLevel::Info,
            },
            loaded: None,
        }
    }
}

impl Default for ReferenceRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ReferenceRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceRuntime")
            .field("log_level", &self.log.level)
            .field("loaded", &self.loaded.as_ref().map(|m| m.model.name()))
            .finish()
    }
}

impl NativeRuntime for ReferenceRuntime {
    fn name(&self) -> &str {
        "reference"
    }

    fn api_version(&self) -> u32 {
        REFERENCE_API_VERSION
    }

    fn git_hash(&self) -> &str {
        option_env!("TFLM_GIT_HASH").unwrap_or("unknown")
    }

    fn set_logger(&mut self, logger: Option<NativeLogger>) {
        self.log.logger = logger;
    }

    fn set_log_level(&mut self, level: LogLevel) -> LogLevel {
        std::mem::replace(&mut self.log.level, level)
    }

    fn log_level(&self) -> LogLevel {
        self.log.level
    }

    fn load(&mut self, request: NativeLoadRequest<'_>) -> Result<ModelDetails, NativeError> {
        if let Some(previous) = self.loaded.take() {
            self.log.emit(
                LogLevel::Warn,
                &format!("replacing loaded model '{}'", previous.model.name()),
            );
        }

        let model = request.model;
        if !model.flatbuffer().has_tflite_identifier() {
            let detail = format!(
                "model '{}' is not a .tflite flatbuffer (missing TFL3 identifier)",
                model.name()
            );
            self.log.emit(LogLevel::Error, &detail);
            return Err(NativeError::Parse(detail));
        }
        if let Some(acc) = &request.accelerator {
            let version = acc.descriptor().api_version();
            if version != REFERENCE_API_VERSION {
                self.log.emit(
                    LogLevel::Error,
                    &format!("accelerator '{}' reports API version {version}", acc.name()),
                );
                return Err(NativeError::IncompatibleAccelerator {
                    name: acc.name().to_string(),
                    version,
                });
            }
        }

        let graph = model.graph();
        let kernels: Vec<Kernel> = graph
            .iter_layers()
            .map(|l| select_kernel(l, request.accelerator.as_ref()))
            .collect();

        let mut planner = GreedyPlanner::new();
        let mut planned_tensors = Vec::new();
        for (index, first, last) in graph.tensor_lifetimes() {
            let Some(spec) = graph.tensor(index) else {
                continue;
            };
            if spec.size_bytes() == 0 {
                continue;
            }
            planner.add(BufferRequest {
                size: spec.size_bytes(),
                first,
                last,
                tag: spec.name.clone(),
            });
            planned_tensors.push(index);
        }
        let mut planned = planner.plan();
        if request.force_buffer_overlap {
            for buffer in &mut planned {
                buffer.offset = 0;
            }
        }

        let layer_persistent: Vec<usize> = graph
            .iter_layers()
            .zip(&kernels)
            .map(|(l, &k)| persistent_bytes(graph, l, k))
            .collect();
        let layer_scratch: Vec<usize> = graph.iter_layers().map(|l| scratch_bytes(graph, l)).collect();
        let peak_scratch = layer_scratch.iter().copied().max().unwrap_or(0);
        let required = Arena::required_bytes(planned_extent(&planned), &layer_persistent, peak_scratch)
            .max(ALIGNMENT);

        let requested = request.runtime_buffer_sizes.first().copied().unwrap_or(0);
        let capacity = match requested {
            0 => required,
            n if n < required => {
                self.log.emit(
                    LogLevel::Error,
                    &format!(
                        "insufficient runtime buffer for '{}': needs {required} bytes, {n} provided",
                        model.name()
                    ),
                );
                return Err(NativeError::InsufficientBuffer {
                    required,
                    provided: n,
                });
            }
            n => n,
        };

        let mut arena = Arena::new(capacity)?;
        arena.reserve_planned(&planned)?;
        for (layer, &size) in graph.iter_layers().zip(&layer_persistent) {
            arena.alloc_persistent(size, &format!("{}:persistent", layer.name))?;
        }

        let mut offsets = vec![None; graph.tensors.len()];
        for (&index, buffer) in planned_tensors.iter().zip(&planned) {
            offsets[index] = Some(buffer.offset);
        }

        let mut arena_sizes = request.runtime_buffer_sizes.clone();
        match arena_sizes.first_mut() {
            Some(first) => *first = capacity,
            None => arena_sizes.push(capacity),
        }
        let details = ModelDetails {
            name: model.name().to_string(),
            accelerator: request.accelerator.as_ref().map(|a| a.name().to_string()),
            runtime_memory_bytes: required,
            arena_sizes,
            layer_count: graph.num_layers(),
            input_count: graph.inputs.len(),
            output_count: graph.outputs.len(),
            accelerated_layers: kernels.iter().filter(|&&k| k == Kernel::Accelerated).count(),
        };
        self.log.emit(
            LogLevel::Info,
            &format!(
                "loaded '{}': {} layers ({} accelerated), {} of {} arena bytes used",
                details.name, details.layer_count, details.accelerated_layers, required, capacity
            ),
        );

        self.loaded = Some(LoadedModel {
            model: model.clone(),
            accelerator: request.accelerator,
            kernels,
            arena,
            offsets,
            dynamic: BTreeMap::new(),
            layer_persistent,
            layer_scratch,
            enable_profiler: request.enable_profiler,
            enable_recorder: request.enable_recorder,
            enable_tensor_recorder: request.enable_tensor_recorder,
            profiles: Vec::new(),
            layer_errors: Vec::new(),
            recording: None,
        });
        Ok(details)
    }

    fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    fn input_count(&self) -> usize {
        self.loaded
            .as_ref()
            .map_or(0, |m| m.model.graph().inputs.len())
    }

    fn output_count(&self) -> usize {
        self.loaded
            .as_ref()
            .map_or(0, |m| m.model.graph().outputs.len())
    }

    fn set_input(&mut self, index: usize, data: &[u8]) -> Result<(), NativeError> {
        let state = self.loaded.as_mut().ok_or(NativeError::NotLoaded)?;
        let graph = state.model.graph();
        let count = graph.inputs.len();
        let tensor = *graph.inputs.get(index).ok_or(NativeError::IndexOutOfRange {
            kind: "input",
            index,
            count,
        })?;
        let expected = graph.tensors[tensor].size_bytes();
        if data.len() != expected {
            return Err(NativeError::InputSize {
                index,
                expected,
                actual: data.len(),
            });
        }
        if let Some(offset) = state.offsets[tensor] {
            if let Some(dst) = state.arena.bytes_mut(offset, expected) {
                dst.copy_from_slice(data);
            }
        }
        Ok(())
    }

    fn output(&self, index: usize) -> Result<Vec<u8>, NativeError> {
        let state = self.loaded.as_ref().ok_or(NativeError::NotLoaded)?;
        let graph = state.model.graph();
        let count = graph.outputs.len();
        let tensor = *graph.outputs.get(index).ok_or(NativeError::IndexOutOfRange {
            kind: "output",
            index,
            count,
        })?;
        Ok(read_tensor(
            &state.arena,
            &state.offsets,
            &state.dynamic,
            graph,
            tensor,
        ))
    }

    fn invoke(&mut self, observer: &mut dyn LayerObserver) -> Result<(), NativeError> {
        let Self { log, loaded } = self;
        let state = loaded.as_mut().ok_or(NativeError::NotLoaded)?;
        state.arena.forget_scratch_events();

        let model = state.model.clone();
        let graph = model.graph();
        let layer_count = graph.num_layers();
        let (simulate, program_recorder) = match &state.accelerator {
            Some(acc) => {
                let d = acc.descriptor();
                (
                    d.simulator_backend_enabled() && !d.cycles_only_enabled(),
                    d.program_recorder_enabled(),
                )
            }
            None => (true, false),
        };

        let mut profiles = Vec::with_capacity(layer_count);
        let mut layer_errors = vec![None; layer_count];
        let mut records = Vec::new();

        for layer in graph.iter_layers() {
            let index = layer.index;
            let kernel = state.kernels[index];
            let cost = layer_cost(graph, layer);
            let mut profile = NativeLayerProfile {
                macs: cost.macs,
                ops: cost.ops,
                ..Default::default()
            };

            let activation_inputs: Vec<usize> = layer
                .inputs
                .iter()
                .copied()
                .filter(|&t| graph.tensor(t).is_some_and(|s| !s.constant))
                .collect();
            let input_bytes: Vec<Vec<u8>> = activation_inputs
                .iter()
                .map(|&t| read_tensor(&state.arena, &state.offsets, &state.dynamic, graph, t))
                .collect();

            let copy_source = match kernel {
                Kernel::Reference => {
                    profile.cpu_cycles = LAYER_DISPATCH_CYCLES
                        + 2 * cost.macs
                        + cost.output_elements * cycles_per_element(&layer.op_code);
                    input_bytes.first()
                }
                Kernel::Accelerated => {
                    profile.cpu_cycles = ACCELERATED_DISPATCH_CYCLES;
                    if let Some(acc) = &state.accelerator {
                        profile.accelerator_cycles =
                            acc.descriptor()
                                .layer_cycles(&layer.op_code, cost.macs, cost.ops);
                    }
                    input_bytes.first().filter(|_| simulate)
                }
                Kernel::Unsupported => {
                    let msg = format!("no kernel registered for op '{}'", layer.op_code);
                    log.emit(LogLevel::Error, &format!("layer {index} ({}): {msg}", layer.name));
                    layer_errors[index] = Some(msg);
                    profile.cpu_cycles = LAYER_DISPATCH_CYCLES;
                    None
                }
            };

            let scratch = state.layer_scratch[index];
            let mut output_bytes = Vec::with_capacity(layer.outputs.len());
            {
                let mut scope = state.arena.scratch(index);
                if scratch > 0 {
                    scope
                        .alloc(scratch, &format!("{}:scratch", layer.name))
                        .map_err(|e| {
                            log.emit(
                                LogLevel::Error,
                                &format!("layer {index} ({}): scratch allocation failed: {e}", layer.name),
                            );
                            NativeError::Kernel {
                                layer: index,
                                detail: e.to_string(),
                            }
                        })?;
                }

                for &out in &layer.outputs {
                    let Some(spec) = graph.tensor(out) else {
                        continue;
                    };
                    let data = match state.offsets[out] {
                        Some(offset) => {
                            let mut data = vec![0u8; spec.size_bytes()];
                            if let Some(src) = copy_source {
                                let n = src.len().min(data.len());
                                data[..n].copy_from_slice(&src[..n]);
                            }
                            if let Some(dst) = scope.bytes_mut(offset, data.len()) {
                                dst.copy_from_slice(&data);
                            }
                            data
                        }
                        None if spec.constant => Vec::new(),
                        None => {
                            // Unknown declared shape: the output takes the size of its
                            // source, cut to whole elements of its own dtype.
                            let mut data = match copy_source {
                                Some(src) => src.clone(),
                                None => input_bytes.first().map(|b| vec![0; b.len()]).unwrap_or_default(),
                            };
                            let element = spec.dtype.size_bytes().max(1);
                            data.truncate(data.len() - data.len() % element);
                            state.dynamic.insert(out, data.clone());
                            data
                        }
                    };
                    output_bytes.push(data);
                }
            }

            if state.enable_recorder {
                let touched: usize = activation_inputs
                    .iter()
                    .chain(&layer.outputs)
                    .filter_map(|&t| graph.tensor(t))
                    .filter(|s| !s.constant)
                    .map(|s| align_up(s.size_bytes()))
                    .sum();
                let accelerator_data = match (&state.accelerator, kernel) {
                    (Some(acc), Kernel::Accelerated) if program_recorder => acc
                        .descriptor()
                        .record_layer(acc.name(), layer, profile.accelerator_cycles),
                    _ => serde_json::Map::new(),
                };
                let (inputs, outputs) = if state.enable_tensor_recorder {
                    (input_bytes.clone(), output_bytes.clone())
                } else {
                    (Vec::new(), Vec::new())
                };
                records.push(NativeLayerRecord {
                    inputs,
                    outputs,
                    accelerator_data,
                    memory: LayerMemory {
                        temporary_bytes: align_up(scratch) + touched,
                        persistent_bytes: align_up(state.layer_persistent[index]),
                    },
                });
            }

            log.emit(
                LogLevel::Debug,
                &format!(
                    "layer {index} ({}): {} cpu cycles, {} accelerator cycles",
                    layer.name, profile.cpu_cycles, profile.accelerator_cycles
                ),
            );
            profiles.push(profile);
            observer.on_layer(index, &output_bytes);
        }

        state.profiles = if state.enable_profiler {
            profiles
        } else {
            Vec::new()
        };
        state.layer_errors = layer_errors;
        state.recording = state.enable_recorder.then(|| NativeRecording {
            layers: records,
            events: state.arena.events().to_vec(),
            total_persistent_bytes: state.arena.persistent_bytes(),
        });
        Ok(())
    }

    fn profiling_results(&self) -> Vec<NativeLayerProfile> {
        self.loaded
            .as_ref()
            .map(|m| m.profiles.clone())
            .unwrap_or_default()
    }

    fn recorded_data(&mut self) -> Option<NativeRecording> {
        self.loaded.as_mut().and_then(|m| m.recording.take())
    }

    fn layer_error(&self, index: usize) -> Option<String> {
        self.loaded
            .as_ref()
            .and_then(|m| m.layer_errors.get(index).cloned().flatten())
    }

    fn unload(&mut self) -> Result<(), NativeError> {
        let model = self.loaded.take().ok_or(NativeError::NotLoaded)?;
        self.log
            .emit(LogLevel::Info, &format!("unloaded '{}'", model.model.name()));
        Ok(())
    }
}
