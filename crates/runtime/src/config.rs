// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Runtime configuration loaded from TOML files or constructed programmatically.
//!
//! # TOML Format
//! ```toml
//! accelerator_paths = ["/opt/tflm/accelerators"]
//! pointer_file_dirs = ["/usr/lib/python3/site-packages"]
//! cpu_clock_hz = 78000000
//! default_estimator = "mvp"
//! log_buffer_capacity = 256
//! runtime_buffer_size = "512K"
//! record_runtime_buffer_size = "16M"
//! native_log_level = "info"
//! ```
//!
//! Every key is optional.

use crate::log_bridge::LogLevel;
use crate::RuntimeError;
use memory_manager::MemoryBudget;
use std::path::{Path, PathBuf};

/// Configuration for a [`Context`](crate::Context).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Extra directories searched for accelerator plugins.
    pub accelerator_paths: Vec<PathBuf>,
    /// Directories scanned for `<name>_mltk_accelerator.pth` pointer files.
    pub pointer_file_dirs: Vec<PathBuf>,
    /// CPU clock used to turn cycle counts into seconds.
    pub cpu_clock_hz: u64,
    /// Accelerator whose estimator is used for software-only runs.
    pub default_estimator: String,
    /// Maximum number of native warning/error lines kept by the log bridge.
    pub log_buffer_capacity: usize,
    /// Arena 0 size for plain loads (human-readable, e.g. `"512K"`).
    /// Unset means the engine sizes the arena itself.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_buffer_size: Option<String>,
    /// Arena 0 size used by `record_model` unless the caller overrides it.
    pub record_runtime_buffer_size: String,
    /// Minimum severity the native engine emits.
    pub native_log_level: LogLevel,
}

impl RuntimeConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, RuntimeError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RuntimeError::ConfigError(format!("cannot read config '{}': {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, RuntimeError> {
        let config: Self = toml::from_str(toml_str)
            .map_err(|e| RuntimeError::ConfigError(format!("TOML parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, RuntimeError> {
        toml::to_string_pretty(self)
            .map_err(|e| RuntimeError::ConfigError(format!("TOML serialise error: {e}")))
    }

    /// Checks value ranges and that size strings parse.
    pub fn validate(&self) -> Result<(), RuntimeError> {
        if self.cpu_clock_hz == 0 {
            return Err(RuntimeError::ConfigError("cpu_clock_hz must be > 0".into()));
        }
        self.runtime_buffer_size()?;
        self.record_runtime_buffer_size()?;
        Ok(())
    }

    /// Parsed `runtime_buffer_size`, if set.
    pub fn runtime_buffer_size(&self) -> Result<Option<usize>, RuntimeError> {
        self.runtime_buffer_size
            .as_deref()
            .map(parse_size)
            .transpose()
    }

    /// Parsed `record_runtime_buffer_size`.
    pub fn record_runtime_buffer_size(&self) -> Result<usize, RuntimeError> {
        parse_size(&self.record_runtime_buffer_size)
    }
}

fn parse_size(s: &str) -> Result<usize, RuntimeError> {
    MemoryBudget::parse(s)
        .map(|b| b.as_bytes())
        .map_err(|e| RuntimeError::ConfigError(format!("invalid buffer size: {e}")))
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            accelerator_paths: Vec::new(),
            pointer_file_dirs: Vec::new(),
            cpu_clock_hz: 78_000_000,
            default_estimator: "mvp".to_string(),
            log_buffer_capacity: 256,
            runtime_buffer_size: None,
            record_runtime_buffer_size: "16M".to_string(),
            native_log_level: LogLevel::Info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default() {
        let c = RuntimeConfig::default();
        assert_eq!(c.cpu_clock_hz, 78_000_000);
        assert_eq!(c.default_estimator, "mvp");
        assert_eq!(c.record_runtime_buffer_size().unwrap(), 16 * 1024 * 1024);
        assert_eq!(c.runtime_buffer_size().unwrap(), None);
        assert_eq!(c.native_log_level, LogLevel::Info);
    }

    #[test]
    fn test_from_toml() {
        let toml = r#"
accelerator_paths = ["/opt/accel"]
cpu_clock_hz = 80000000
runtime_buffer_size = "96K"
native_log_level = "warning"
"#;
        let c = RuntimeConfig::from_toml(toml).unwrap();
        assert_eq!(c.accelerator_paths, vec![PathBuf::from("/opt/accel")]);
        assert_eq!(c.cpu_clock_hz, 80_000_000);
        assert_eq!(c.runtime_buffer_size().unwrap(), Some(96 * 1024));
        assert_eq!(c.native_log_level, LogLevel::Warn);
        // Unspecified keys keep their defaults.
        assert_eq!(c.log_buffer_capacity, 256);
    }

    #[test]
    fn test_to_toml_roundtrip() {
        let c = RuntimeConfig {
            pointer_file_dirs: vec![PathBuf::from("/tmp/site")],
            ..Default::default()
        };
        let toml = c.to_toml().unwrap();
        let back = RuntimeConfig::from_toml(&toml).unwrap();
        assert_eq!(back.pointer_file_dirs, c.pointer_file_dirs);
        assert_eq!(back.record_runtime_buffer_size, c.record_runtime_buffer_size);
        assert_eq!(back.runtime_buffer_size, None);
    }

    #[test]
    fn test_invalid_values() {
        assert!(RuntimeConfig::from_toml("cpu_clock_hz = 0").is_err());
        assert!(RuntimeConfig::from_toml("record_runtime_buffer_size = \"lots\"").is_err());
        assert!(RuntimeConfig::from_toml("native_log_level = \"verbose\"").is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tflm.toml");
        std::fs::write(&path, "default_estimator = \"sim\"\n").unwrap();
        let c = RuntimeConfig::from_file(&path).unwrap();
        assert_eq!(c.default_estimator, "sim");
        assert!(RuntimeConfig::from_file(&dir.path().join("missing.toml")).is_err());
    }
}
