// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Example: profile and record a model on software kernels and on a
//! simulated accelerator.
//!
//! Pass a model directory (`model.json` + `model.tflite`) to profile it,
//! or run without arguments to use a built-in keyword-spotting model.
//!
//! ```bash
//! cargo run -p tflm-runtime --example profile_demo [-- ./models/kws]
//! RUST_LOG=tflm=debug cargo run -p tflm-runtime --example profile_demo
//! ```

use anyhow::Context as _;
use model_ir::{FlatbufferData, ModelHandle, ModelLoader, ModelManifest, TFLITE_FILE_IDENTIFIER};
use std::path::PathBuf;
use std::sync::Arc;
use tflm_runtime::{
    AcceleratorFactories, Context, ProfileOptions, RecordOptions, RuntimeConfig,
    SimulatedAccelerator, SimulatedConfig,
};
use tracing_subscriber::EnvFilter;

const DEMO_MANIFEST: &str = r#"{
    "name": "demo_kws",
    "tensors": [
        { "name": "input", "shape": [1, 16, 16, 1], "dtype": "int8" },
        { "name": "conv_w", "shape": [8, 3, 3, 1], "dtype": "int8", "constant": true },
        { "name": "conv_out", "shape": [1, 16, 16, 8], "dtype": "int8" },
        { "name": "dw_w", "shape": [1, 3, 3, 8], "dtype": "int8", "constant": true },
        { "name": "dw_out", "shape": [1, 16, 16, 8], "dtype": "int8" },
        { "name": "pool_out", "shape": [1, 8, 8, 8], "dtype": "int8" },
        { "name": "fc_w", "shape": [12, 512], "dtype": "int8", "constant": true },
        { "name": "logits", "shape": [1, 12], "dtype": "int8" },
        { "name": "probs", "shape": [1, 12], "dtype": "int8" }
    ],
    "layers": [
        { "op": "CONV_2D", "inputs": [0, 1], "outputs": [2] },
        { "op": "DEPTHWISE_CONV_2D", "inputs": [2, 3], "outputs": [4] },
        { "op": "AVERAGE_POOL_2D", "inputs": [4], "outputs": [5] },
        { "op": "FULLY_CONNECTED", "inputs": [5, 6], "outputs": [7] },
        { "op": "SOFTMAX", "inputs": [7], "outputs": [8] }
    ],
    "inputs": [0],
    "outputs": [8]
}"#;

fn demo_model() -> anyhow::Result<ModelHandle> {
    let manifest = ModelManifest::from_json(DEMO_MANIFEST)?;
    let mut flatbuffer = vec![0u8; 64];
    flatbuffer[4..8].copy_from_slice(TFLITE_FILE_IDENTIFIER);
    Ok(ModelLoader::from_manifest_and_flatbuffer(
        &manifest,
        FlatbufferData::Owned(flatbuffer),
    )?)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let model = match std::env::args().nth(1) {
        Some(dir) => ModelLoader::load(&PathBuf::from(&dir))
            .with_context(|| format!("loading model from '{dir}'"))?,
        None => demo_model()?,
    };

    let context = Context::with_reference_runtime(RuntimeConfig::default())?;
    context.register_accelerator(Arc::new(SimulatedAccelerator::new(SimulatedConfig::default())))?;
    let report = context.discover_accelerators(&AcceleratorFactories::new(), &[]);
    println!("Accelerators: {:?} ({} plugin(s) skipped)\n", context.supported_accelerators(), report.skipped.len());

    // ── Profile: software kernels vs. simulated accelerator ──
    for accelerator in [None, Some("mvp")] {
        let result = context.profile_model(
            &model,
            ProfileOptions {
                accelerator: accelerator.map(String::from),
                return_estimates: true,
                ..Default::default()
            },
        )?;
        println!("=== {} ===", accelerator.unwrap_or("software"));
        println!("{}", result.summary());
        for layer in &result.layers {
            println!("  {}", layer.summary());
        }
        if let Some(plan) = &result.memory_plan {
            println!("  {}", plan.summary());
        }
        println!();
    }

    // ── Record: tensors and the accelerator's program trace ──
    let recording = context.record_model(
        &model,
        RecordOptions {
            accelerator: Some("mvp".into()),
            enable_accelerator_recorder: true,
            ..Default::default()
        },
    )?;
    println!(
        "Recorded {} layers; arena sizes {:?}",
        recording.layers.len(),
        recording.details.arena_sizes
    );
    if let Some(first) = recording.layers.first() {
        println!("{}", serde_json::to_string_pretty(&first.accelerator_data)?);
    }

    Ok(())
}
