// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Process-scoped runtime context.
//!
//! A [`Context`] owns the engine behind the exclusive session lock, the
//! accelerator registry, the log bridge, and the configuration. Nothing
//! in this crate is global: independent contexts (e.g. one per test) do
//! not share locks or registries.

use crate::accelerator::{
    discover, Accelerator, AcceleratorFactories, AcceleratorRegistry, DiscoveryReport,
    RegisteredAccelerator,
};
use crate::config::RuntimeConfig;
use crate::log_bridge::{LogBridge, LogLevel};
use crate::native::{NativeRuntime, ReferenceRuntime};
use crate::session::{LoadOptions, Session};
use crate::RuntimeError;
use model_ir::ModelHandle;
use std::path::PathBuf;
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
    TryLockError,
};

/// Explicit owner of the engine singleton and its collaborators.
pub struct Context {
    native: Mutex<Box<dyn NativeRuntime>>,
    registry: RwLock<AcceleratorRegistry>,
    log_bridge: Arc<LogBridge>,
    native_log_level: Mutex<LogLevel>,
    git_hash: String,
    config: RuntimeConfig,
}

impl Context {
    /// Wraps `engine`, installing the log bridge as its logger.
    pub fn new(mut engine: Box<dyn NativeRuntime>, config: RuntimeConfig) -> Result<Self, RuntimeError> {
        config.validate()?;

        let log_bridge = Arc::new(LogBridge::new(config.log_buffer_capacity));
        let bridge = Arc::clone(&log_bridge);
        engine.set_logger(Some(Arc::new(move |line: &str| bridge.forward(line))));
        engine.set_log_level(config.native_log_level);

        let registry = AcceleratorRegistry::new(engine.api_version());
        tracing::info!(
            "runtime context on engine '{}' (API version {})",
            engine.name(),
            engine.api_version()
        );

        let git_hash = engine.git_hash().to_string();
        Ok(Self {
            native: Mutex::new(engine),
            registry: RwLock::new(registry),
            log_bridge,
            native_log_level: Mutex::new(config.native_log_level),
            git_hash,
            config,
        })
    }

    /// A context on the software [`ReferenceRuntime`].
    pub fn with_reference_runtime(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        Self::new(Box::new(ReferenceRuntime::new()), config)
    }

    /// Source revision of the wrapped engine.
    pub fn git_hash(&self) -> &str {
        &self.git_hash
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The bridge native log lines go through.
    pub fn log_bridge(&self) -> &LogBridge {
        &self.log_bridge
    }

    // ── Accelerators ───────────────────────────────────────────────

    /// Registers every variant of `accelerator`. See
    /// [`AcceleratorRegistry::register`].
    pub fn register_accelerator(
        &self,
        accelerator: Arc<dyn Accelerator>,
    ) -> Result<Vec<String>, RuntimeError> {
        self.registry_mut().register(accelerator)
    }

    pub fn resolve_accelerator(&self, name: &str) -> Option<String> {
        self.registry().resolve(name)
    }

    pub fn accelerator(&self, name: &str) -> Result<RegisteredAccelerator, RuntimeError> {
        self.registry().get(name)
    }

    pub fn supported_accelerators(&self) -> Vec<String> {
        self.registry().names()
    }

    pub fn accelerator_is_supported(&self, name: &str) -> bool {
        self.registry().is_supported(name)
    }

    /// Scans `extra_paths` and the configured search paths for plugins,
    /// then registers the placeholder accelerator.
    pub fn discover_accelerators(
        &self,
        factories: &AcceleratorFactories,
        extra_paths: &[PathBuf],
    ) -> DiscoveryReport {
        discover(&mut self.registry_mut(), factories, &self.config, extra_paths)
    }

    fn registry(&self) -> RwLockReadGuard<'_, AcceleratorRegistry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn registry_mut(&self) -> RwLockWriteGuard<'_, AcceleratorRegistry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Sessions ───────────────────────────────────────────────────

    /// Loads `model`, blocking until no other session holds the engine.
    ///
    /// There is no timeout: a session that is never unloaded or dropped
    /// starves every later `load`.
    pub fn load(&self, model: &ModelHandle, options: LoadOptions) -> Result<Session<'_>, RuntimeError> {
        let guard = self.native.lock().unwrap_or_else(PoisonError::into_inner);
        Session::open(self, guard, model, options)
    }

    /// Like [`load`](Self::load), but fails with
    /// [`RuntimeError::SessionBusy`] instead of blocking.
    pub fn try_load(&self, model: &ModelHandle, options: LoadOptions) -> Result<Session<'_>, RuntimeError> {
        let guard = match self.native.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return Err(RuntimeError::SessionBusy),
        };
        Session::open(self, guard, model, options)
    }

    // ── Native logging ─────────────────────────────────────────────

    /// Sets the engine's minimum log severity. Returns the previous level.
    ///
    /// Fails with [`RuntimeError::SessionBusy`] while a session holds the
    /// engine; use [`Session::set_native_log_level`] from inside one.
    pub fn set_native_log_level(&self, level: LogLevel) -> Result<LogLevel, RuntimeError> {
        let mut engine: MutexGuard<'_, Box<dyn NativeRuntime>> = match self.native.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return Err(RuntimeError::SessionBusy),
        };
        let previous = engine.set_log_level(level);
        self.record_native_log_level(level);
        Ok(previous)
    }

    /// The engine's current minimum log severity.
    pub fn native_log_level(&self) -> LogLevel {
        *self
            .native_log_level
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn record_native_log_level(&self, level: LogLevel) {
        *self
            .native_log_level
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = level;
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("accelerators", &self.supported_accelerators())
            .field("git_hash", &self.git_hash)
            .field("native_log_level", &self.native_log_level())
            .field("log_bridge", &self.log_bridge)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accelerator::{SimulatedAccelerator, SimulatedConfig};
    use crate::testing::kws_model;

    fn context() -> Context {
        Context::with_reference_runtime(RuntimeConfig::default()).unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = RuntimeConfig {
            cpu_clock_hz: 0,
            ..Default::default()
        };
        assert!(matches!(
            Context::with_reference_runtime(config),
            Err(RuntimeError::ConfigError(_))
        ));
    }

    #[test]
    fn test_registry_operations() {
        let ctx = context();
        ctx.register_accelerator(Arc::new(SimulatedAccelerator::new(SimulatedConfig::default())))
            .unwrap();
        assert_eq!(ctx.resolve_accelerator("MVP").as_deref(), Some("mvp"));
        assert!(ctx.accelerator_is_supported("Mvp"));
        assert_eq!(ctx.supported_accelerators(), vec!["mvp"]);
        assert!(matches!(
            ctx.accelerator("npu"),
            Err(RuntimeError::UnknownAccelerator { .. })
        ));
    }

    #[test]
    fn test_git_hash_readable_during_session() {
        let ctx = context();
        let hash = ctx.git_hash().to_string();
        assert!(!hash.is_empty());
        let _session = ctx.load(&kws_model(), LoadOptions::default()).unwrap();
        assert_eq!(ctx.git_hash(), hash);
    }

    #[test]
    fn test_try_load_busy() {
        let ctx = context();
        let model = kws_model();
        let session = ctx.load(&model, LoadOptions::default()).unwrap();
        assert!(matches!(
            ctx.try_load(&model, LoadOptions::default()),
            Err(RuntimeError::SessionBusy)
        ));
        drop(session);
        let mut session = ctx.try_load(&model, LoadOptions::default()).unwrap();
        session.unload().unwrap();
    }

    #[test]
    fn test_native_log_level() {
        let ctx = context();
        assert_eq!(ctx.native_log_level(), LogLevel::Info);
        assert_eq!(ctx.set_native_log_level(LogLevel::Debug).unwrap(), LogLevel::Info);
        assert_eq!(ctx.native_log_level(), LogLevel::Debug);

        let model = kws_model();
        let mut session = ctx.load(&model, LoadOptions::default()).unwrap();
        assert!(matches!(
            ctx.set_native_log_level(LogLevel::Warn),
            Err(RuntimeError::SessionBusy)
        ));
        assert_eq!(session.set_native_log_level(LogLevel::Warn).unwrap(), LogLevel::Debug);
        session.unload().unwrap();
        assert_eq!(ctx.native_log_level(), LogLevel::Warn);
    }

    #[test]
    fn test_load_error_carries_native_lines() {
        let ctx = context();
        let model = crate::testing::model_with_bytes(vec![1, 2, 3, 4]);
        let err = ctx.load(&model, LoadOptions::default()).unwrap_err();
        match err {
            RuntimeError::LoadError(msg) => assert!(msg.contains("TFL3"), "{msg}"),
            other => panic!("unexpected error: {other}"),
        }
        // The failed load drained what the engine logged.
        assert!(ctx.log_bridge().logged_errors().is_empty());
    }
}
