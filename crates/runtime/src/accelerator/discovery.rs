// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Accelerator plugin discovery.
//!
//! A plugin is a directory holding an `accelerator.toml` manifest:
//!
//! ```toml
//! name = "npu"
//! factory = "simulated"
//! variants = ["npu", "npu_v2"]
//! api_version = 1
//!
//! [options]
//! cycles_per_mac = 0.5
//! supported_ops = ["conv_2d", "fully_connected"]
//! ```
//!
//! The `factory` key names a constructor in an [`AcceleratorFactories`]
//! table. Discovery never aborts because of one bad plugin: each failure is
//! logged, recorded in the [`DiscoveryReport`], and skipped.

use super::{
    Accelerator, AcceleratorRegistry, PlaceholderAccelerator, SimulatedAccelerator,
    SimulatedConfig, PLACEHOLDER_ACCELERATOR,
};
use crate::config::RuntimeConfig;
use crate::RuntimeError;
use model_ir::OpCode;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Environment variable holding extra plugin search paths.
pub const ACCELERATOR_PATHS_ENV: &str = "TFLM_ACCELERATOR_PATHS";

/// Manifest file every plugin directory carries.
pub const PLUGIN_MANIFEST_FILE: &str = "accelerator.toml";

/// Suffix of pointer files naming an out-of-tree accelerator package.
pub const POINTER_FILE_SUFFIX: &str = "_mltk_accelerator.pth";

/// Name of the factory every [`AcceleratorFactories`] table starts with.
const SIMULATED_FACTORY: &str = "simulated";

// ── Manifest ───────────────────────────────────────────────────────

/// Parsed `accelerator.toml`.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct PluginManifest {
    pub name: String,
    pub factory: String,
    #[serde(default)]
    pub variants: Vec<String>,
    /// API version the plugin declares. Defaults to the runtime's.
    pub api_version: Option<u32>,
    /// Factory-specific settings.
    #[serde(default)]
    pub options: toml::Table,
}

impl PluginManifest {
    pub fn from_file(path: &Path) -> Result<Self, RuntimeError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RuntimeError::ConfigError(format!("cannot read '{}': {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self, RuntimeError> {
        let manifest: Self = toml::from_str(toml_str)
            .map_err(|e| RuntimeError::ConfigError(format!("plugin manifest: {e}")))?;
        if manifest.name.trim().is_empty() {
            return Err(RuntimeError::ConfigError(
                "plugin manifest: name must not be empty".into(),
            ));
        }
        Ok(manifest)
    }
}

// ── Factories ──────────────────────────────────────────────────────

/// What a factory gets to build an accelerator from.
#[derive(Debug)]
pub struct FactoryContext<'a> {
    pub manifest: &'a PluginManifest,
    pub plugin_dir: &'a Path,
    pub runtime_api_version: u32,
}

/// Builds an accelerator from a plugin manifest.
pub type AcceleratorFactory =
    Box<dyn Fn(&FactoryContext<'_>) -> Result<Arc<dyn Accelerator>, String> + Send + Sync>;

/// Named accelerator constructors plugins can select.
pub struct AcceleratorFactories {
    factories: BTreeMap<String, AcceleratorFactory>,
}

impl AcceleratorFactories {
    /// A table holding the built-in `simulated` factory.
    pub fn new() -> Self {
        let mut table = Self::empty();
        table.register(SIMULATED_FACTORY, Box::new(simulated_factory));
        table
    }

    /// A table with no factories at all.
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Adds or replaces the factory selected by `name`.
    pub fn register(&mut self, name: &str, factory: AcceleratorFactory) {
        self.factories.insert(name.to_lowercase(), factory);
    }

    pub fn get(&self, name: &str) -> Option<&AcceleratorFactory> {
        self.factories.get(&name.to_lowercase())
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

impl Default for AcceleratorFactories {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AcceleratorFactories {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcceleratorFactories")
            .field("factories", &self.names())
            .finish()
    }
}

fn simulated_factory(ctx: &FactoryContext<'_>) -> Result<Arc<dyn Accelerator>, String> {
    let manifest = ctx.manifest;
    let mut config = SimulatedConfig {
        name: manifest.name.clone(),
        variants: if manifest.variants.is_empty() {
            vec![manifest.name.clone()]
        } else {
            manifest.variants.clone()
        },
        api_version: manifest.api_version.unwrap_or(ctx.runtime_api_version),
        ..SimulatedConfig::default()
    };

    let opts = &manifest.options;
    if let Some(v) = opts.get("cycles_per_mac") {
        config.cycles_per_mac = v
            .as_float()
            .or_else(|| v.as_integer().map(|i| i as f64))
            .filter(|c| *c >= 0.0)
            .ok_or("options.cycles_per_mac must be a non-negative number")?;
    }
    if let Some(v) = opts.get("layer_overhead_cycles") {
        config.layer_overhead_cycles = v
            .as_integer()
            .and_then(|i| u64::try_from(i).ok())
            .ok_or("options.layer_overhead_cycles must be a non-negative integer")?;
    }
    if let Some(v) = opts.get("clock_hz") {
        config.clock_hz = v
            .as_integer()
            .and_then(|i| u64::try_from(i).ok())
            .filter(|hz| *hz > 0)
            .ok_or("options.clock_hz must be a positive integer")?;
    }
    if let Some(v) = opts.get("supported_ops") {
        let ops = v
            .as_array()
            .ok_or("options.supported_ops must be an array of op names")?;
        config.supported_ops = ops
            .iter()
            .map(|op| op.as_str().map(OpCode::parse))
            .collect::<Option<Vec<_>>>()
            .ok_or("options.supported_ops must hold strings")?;
    }

    Ok(Arc::new(SimulatedAccelerator::new(config)))
}

// ── Discovery ──────────────────────────────────────────────────────

/// A plugin that was found but not registered.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SkippedPlugin {
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome of one discovery pass.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct DiscoveryReport {
    /// Canonical variant names registered by this pass.
    pub loaded: Vec<String>,
    pub skipped: Vec<SkippedPlugin>,
}

impl DiscoveryReport {
    fn skip(&mut self, path: &Path, reason: String) {
        tracing::warn!("skipping accelerator plugin '{}': {reason}", path.display());
        self.skipped.push(SkippedPlugin {
            path: path.to_path_buf(),
            reason,
        });
    }
}

/// Scans every search path and registers the plugins found there, then
/// the placeholder accelerator if its name is still free.
pub(crate) fn discover(
    registry: &mut AcceleratorRegistry,
    factories: &AcceleratorFactories,
    config: &RuntimeConfig,
    extra_paths: &[PathBuf],
) -> DiscoveryReport {
    let mut report = DiscoveryReport::default();

    for dir in search_paths(config, extra_paths) {
        for plugin_dir in plugin_dirs(&dir) {
            load_plugin(registry, factories, &plugin_dir, &mut report);
        }
    }

    if !registry.is_supported(PLACEHOLDER_ACCELERATOR) {
        let placeholder = Arc::new(PlaceholderAccelerator::new(registry.runtime_api_version()));
        match registry.register(placeholder) {
            Ok(names) => report.loaded.extend(names),
            Err(e) => tracing::warn!("could not register placeholder accelerator: {e}"),
        }
    }

    tracing::info!(
        "accelerator discovery: {} registered, {} skipped",
        report.loaded.len(),
        report.skipped.len()
    );
    report
}

/// Search order: caller paths, configured paths, the environment
/// variable, then pointer-file targets.
fn search_paths(config: &RuntimeConfig, extra_paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = extra_paths.to_vec();
    paths.extend(config.accelerator_paths.iter().cloned());
    if let Some(env) = std::env::var_os(ACCELERATOR_PATHS_ENV) {
        paths.extend(std::env::split_paths(&env).filter(|p| !p.as_os_str().is_empty()));
    }
    for dir in &config.pointer_file_dirs {
        paths.extend(pointer_file_targets(dir));
    }

    let mut seen = std::collections::HashSet::new();
    paths.retain(|p| seen.insert(p.clone()));
    paths
}

/// Resolves every `<name>_mltk_accelerator.pth` file in `dir`.
fn pointer_file_targets(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        tracing::debug!("pointer file dir '{}' is not readable", dir.display());
        return Vec::new();
    };

    let mut pointer_files: Vec<(String, PathBuf)> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let file_name = entry.file_name().into_string().ok()?;
            let name = file_name.strip_suffix(POINTER_FILE_SUFFIX)?.to_string();
            (!name.is_empty()).then(|| (name, entry.path()))
        })
        .collect();
    pointer_files.sort();

    let mut targets = Vec::new();
    for (name, path) in pointer_files {
        let base = match std::fs::read_to_string(&path) {
            Ok(content) => match content.lines().next().map(str::trim) {
                Some(line) if !line.is_empty() => PathBuf::from(line),
                _ => {
                    tracing::debug!("pointer file '{}' is empty", path.display());
                    continue;
                }
            },
            Err(e) => {
                tracing::debug!("cannot read pointer file '{}': {e}", path.display());
                continue;
            }
        };

        let direct = base.join(&name);
        let wrapper = base.join(format!("{name}_wrapper"));
        if direct.is_dir() {
            targets.push(direct);
        } else if wrapper.is_dir() {
            targets.push(wrapper);
        } else {
            tracing::debug!(
                "pointer file '{}' names no accelerator package under '{}'",
                path.display(),
                base.display()
            );
        }
    }
    targets
}

/// A search path is either a plugin directory itself or a parent of
/// plugin directories.
fn plugin_dirs(dir: &Path) -> Vec<PathBuf> {
    if dir.join(PLUGIN_MANIFEST_FILE).is_file() {
        return vec![dir.to_path_buf()];
    }
    let Ok(entries) = std::fs::read_dir(dir) else {
        tracing::debug!("accelerator search path '{}' is not readable", dir.display());
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.join(PLUGIN_MANIFEST_FILE).is_file())
        .collect();
    dirs.sort();
    dirs
}

fn load_plugin(
    registry: &mut AcceleratorRegistry,
    factories: &AcceleratorFactories,
    plugin_dir: &Path,
    report: &mut DiscoveryReport,
) {
    let manifest = match PluginManifest::from_file(&plugin_dir.join(PLUGIN_MANIFEST_FILE)) {
        Ok(m) => m,
        Err(e) => return report.skip(plugin_dir, e.to_string()),
    };
    let Some(factory) = factories.get(&manifest.factory) else {
        return report.skip(
            plugin_dir,
            format!(
                "unknown factory '{}' (available: {})",
                manifest.factory,
                factories.names().join(", ")
            ),
        );
    };

    let ctx = FactoryContext {
        manifest: &manifest,
        plugin_dir,
        runtime_api_version: registry.runtime_api_version(),
    };
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| factory(&ctx)));
    let accelerator = match outcome {
        Ok(Ok(acc)) => acc,
        Ok(Err(e)) => return report.skip(plugin_dir, format!("factory '{}' failed: {e}", manifest.factory)),
        Err(payload) => {
            let detail = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".into());
            return report.skip(
                plugin_dir,
                format!("factory '{}' panicked: {detail}", manifest.factory),
            );
        }
    };
    match registry.register(accelerator) {
        Ok(names) => {
            tracing::debug!("loaded accelerator plugin '{}'", plugin_dir.display());
            report.loaded.extend(names);
        }
        Err(e) => report.skip(plugin_dir, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, MutexGuard, PoisonError};

    /// Serialises tests that run discovery, which reads the process
    /// environment.
    static ENV: Mutex<()> = Mutex::new(());

    fn env_lock() -> MutexGuard<'static, ()> {
        ENV.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_plugin(root: &Path, dir: &str, manifest: &str) -> PathBuf {
        let path = root.join(dir);
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join(PLUGIN_MANIFEST_FILE), manifest).unwrap();
        path
    }

    #[test]
    fn test_manifest_parse() {
        let m = PluginManifest::from_toml(
            "name = \"npu\"\nfactory = \"simulated\"\n[options]\nclock_hz = 100\n",
        )
        .unwrap();
        assert_eq!(m.name, "npu");
        assert!(m.variants.is_empty());
        assert_eq!(m.api_version, None);
        assert_eq!(m.options["clock_hz"].as_integer(), Some(100));
        assert!(PluginManifest::from_toml("factory = \"simulated\"").is_err());
    }

    #[test]
    fn test_discover_parent_dir() {
        let _env = env_lock();
        let root = tempfile::tempdir().unwrap();
        write_plugin(
            root.path(),
            "npu",
            "name = \"npu\"\nfactory = \"simulated\"\nvariants = [\"npu\", \"npu_v2\"]\n",
        );
        write_plugin(root.path(), "broken", "this is not toml =");
        write_plugin(root.path(), "alien", "name = \"x\"\nfactory = \"dlopen\"\n");
        write_plugin(
            root.path(),
            "old",
            "name = \"old\"\nfactory = \"simulated\"\napi_version = 7\n",
        );
        std::fs::create_dir_all(root.path().join("not_a_plugin")).unwrap();

        let mut registry = AcceleratorRegistry::new(1);
        let report = discover(
            &mut registry,
            &AcceleratorFactories::new(),
            &RuntimeConfig::default(),
            &[root.path().to_path_buf()],
        );

        assert_eq!(report.loaded, vec!["npu", "npu_v2", "cmsis"]);
        assert_eq!(report.skipped.len(), 3);
        assert!(report
            .skipped
            .iter()
            .any(|s| s.path.ends_with("alien") && s.reason.contains("unknown factory")));
        assert!(report
            .skipped
            .iter()
            .any(|s| s.path.ends_with("old") && s.reason.contains("API version")));
        assert!(registry.is_supported("NPU_V2"));
    }

    #[test]
    fn test_discover_plugin_dir_directly() {
        let _env = env_lock();
        let root = tempfile::tempdir().unwrap();
        let dir = write_plugin(
            root.path(),
            "fast",
            "name = \"fast\"\nfactory = \"simulated\"\n[options]\ncycles_per_mac = 2\nsupported_ops = [\"softmax\"]\n",
        );
        let mut registry = AcceleratorRegistry::new(1);
        let report = discover(
            &mut registry,
            &AcceleratorFactories::new(),
            &RuntimeConfig::default(),
            &[dir],
        );
        assert_eq!(report.loaded, vec!["fast", "cmsis"]);
        let acc = registry.get("fast").unwrap();
        assert!(acc.descriptor().supports_op(&OpCode::Softmax));
        assert!(!acc.descriptor().supports_op(&OpCode::Conv2d));
        assert_eq!(acc.descriptor().layer_cycles(&OpCode::Softmax, 10, 0), 200 + 20);
    }

    #[test]
    fn test_bad_factory_options_skipped() {
        let _env = env_lock();
        let root = tempfile::tempdir().unwrap();
        write_plugin(
            root.path(),
            "npu",
            "name = \"npu\"\nfactory = \"simulated\"\n[options]\nclock_hz = -5\n",
        );
        let mut registry = AcceleratorRegistry::new(1);
        let report = discover(
            &mut registry,
            &AcceleratorFactories::new(),
            &RuntimeConfig::default(),
            &[root.path().to_path_buf()],
        );
        assert_eq!(report.loaded, vec!["cmsis"]);
        assert!(report.skipped[0].reason.contains("clock_hz"));
    }

    #[test]
    fn test_pointer_files() {
        let _env = env_lock();
        let site = tempfile::tempdir().unwrap();
        let packages = tempfile::tempdir().unwrap();
        write_plugin(packages.path(), "acme_wrapper", "name = \"acme\"\nfactory = \"simulated\"\n");
        std::fs::write(
            site.path().join(format!("acme{POINTER_FILE_SUFFIX}")),
            format!("{}\n", packages.path().display()),
        )
        .unwrap();
        std::fs::write(site.path().join(format!("ghost{POINTER_FILE_SUFFIX}")), "/nonexistent\n")
            .unwrap();

        let config = RuntimeConfig {
            pointer_file_dirs: vec![site.path().to_path_buf()],
            ..Default::default()
        };
        let mut registry = AcceleratorRegistry::new(1);
        let report = discover(&mut registry, &AcceleratorFactories::new(), &config, &[]);
        assert!(report.loaded.contains(&"acme".to_string()));
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn test_placeholder_not_duplicated() {
        let _env = env_lock();
        let mut registry = AcceleratorRegistry::new(1);
        registry.register(Arc::new(PlaceholderAccelerator::new(1))).unwrap();
        let report = discover(
            &mut registry,
            &AcceleratorFactories::empty(),
            &RuntimeConfig::default(),
            &[],
        );
        assert!(report.loaded.is_empty());
        assert_eq!(registry.names(), vec!["cmsis"]);
    }

    #[test]
    fn test_custom_factory() {
        let _env = env_lock();
        let root = tempfile::tempdir().unwrap();
        write_plugin(root.path(), "p", "name = \"anything\"\nfactory = \"Placeholder\"\n");
        let mut factories = AcceleratorFactories::empty();
        factories.register(
            "placeholder",
            Box::new(|ctx: &FactoryContext<'_>| -> Result<Arc<dyn Accelerator>, String> {
                Ok(Arc::new(PlaceholderAccelerator::new(ctx.runtime_api_version)))
            }),
        );
        let mut registry = AcceleratorRegistry::new(1);
        let report = discover(&mut registry, &factories, &RuntimeConfig::default(), &[root.path().into()]);
        // The custom factory claims "cmsis", so the built-in placeholder step is a no-op.
        assert_eq!(report.loaded, vec!["cmsis"]);
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn test_env_search_path() {
        let _env = env_lock();
        let root = tempfile::tempdir().unwrap();
        write_plugin(root.path(), "envnpu", "name = \"envnpu\"\nfactory = \"simulated\"\n");
        let missing = root.path().join("missing");
        let joined = std::env::join_paths([missing, root.path().to_path_buf()]).unwrap();

        let previous = std::env::var_os(ACCELERATOR_PATHS_ENV);
        std::env::set_var(ACCELERATOR_PATHS_ENV, &joined);
        let mut registry = AcceleratorRegistry::new(1);
        let report = discover(
            &mut registry,
            &AcceleratorFactories::new(),
            &RuntimeConfig::default(),
            &[],
        );
        match previous {
            Some(value) => std::env::set_var(ACCELERATOR_PATHS_ENV, value),
            None => std::env::remove_var(ACCELERATOR_PATHS_ENV),
        }

        assert_eq!(report.loaded, vec!["envnpu", "cmsis"]);
        assert!(registry.is_supported("ENVNPU"));
    }

    #[test]
    fn test_panicking_factory_skipped() {
        let _env = env_lock();
        let root = tempfile::tempdir().unwrap();
        write_plugin(root.path(), "a_bad", "name = \"bad\"\nfactory = \"exploding\"\n");
        write_plugin(root.path(), "b_good", "name = \"good\"\nfactory = \"simulated\"\n");
        let mut factories = AcceleratorFactories::new();
        factories.register(
            "exploding",
            Box::new(|_: &FactoryContext<'_>| -> Result<Arc<dyn Accelerator>, String> {
                panic!("driver missing")
            }),
        );

        let mut registry = AcceleratorRegistry::new(1);
        let report = discover(&mut registry, &factories, &RuntimeConfig::default(), &[root.path().into()]);

        assert_eq!(report.loaded, vec!["good", "cmsis"]);
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].path.ends_with("a_bad"));
        assert!(report.skipped[0].reason.contains("panicked: driver missing"));
        assert!(registry.is_supported("cmsis"));
    }
}
