// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Engine startup configuration via `visor.yaml`.

use crate::core::error::{Result, VisorError};
use serde::Deserialize;
use std::path::{Path, PathBuf};

fn default_cameradev() -> String {
    "pattern:".to_string()
}

fn default_gadgetdev() -> String {
    "null:".to_string()
}

fn default_serialdev() -> String {
    "stdio".to_string()
}

fn default_mapping_idx() -> i32 {
    -1
}

fn default_serport() -> String {
    "None".to_string()
}

/// Startup configuration for the engine and its drivers.
///
/// Every field has a host-friendly default, so a missing `visor.yaml` runs
/// the daemon on the synthetic camera with a discarding output and the
/// terminal as the only serial port.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Camera selector: `pattern:` for the synthetic source, or a platform
    /// device name understood by the hosting binary.
    #[serde(default = "default_cameradev")]
    pub cameradev: String,

    /// Number of capture buffers, 0 for automatic.
    #[serde(default)]
    pub cameranbuf: u32,

    /// Output selector: `null:`, `file:<stem>`, a platform device name, or
    /// empty for no streamed output at all.
    #[serde(default = "default_gadgetdev")]
    pub gadgetdev: String,

    /// Number of output buffers, 0 for automatic.
    #[serde(default)]
    pub gadgetnbuf: u32,

    /// Index of the video mapping to start with, or -1 for the default one.
    #[serde(default = "default_mapping_idx")]
    pub videomapping: i32,

    /// Hardware serial device name, `stdio` for the console, empty for none.
    #[serde(default = "default_serialdev")]
    pub serialdev: String,

    /// Serial-over-USB device name, or empty for none.
    #[serde(default)]
    pub usbserialdev: String,

    /// Initial value of the `serlog` parameter.
    #[serde(default = "default_serport")]
    pub serlog: String,

    /// Initial value of the `serout` parameter.
    #[serde(default = "default_serport")]
    pub serout: String,

    /// Startup command script, run before the first loop iteration.
    #[serde(default)]
    pub initscript: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cameradev: default_cameradev(),
            cameranbuf: 0,
            gadgetdev: default_gadgetdev(),
            gadgetnbuf: 0,
            videomapping: default_mapping_idx(),
            serialdev: default_serialdev(),
            usbserialdev: String::new(),
            serlog: default_serport(),
            serout: default_serport(),
            initscript: None,
        }
    }
}

impl EngineConfig {
    /// Configuration file name.
    pub const FILE_NAME: &'static str = "visor.yaml";

    /// Load configuration from a file. Returns an error if the file is
    /// missing or cannot be parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            VisorError::ConfigParse(format!("Failed to read {}: {e}", path.display()))
        })?;
        let config: Self = serde_yaml::from_str(&content).map_err(|e| {
            VisorError::ConfigParse(format!("Failed to parse {}: {e}", path.display()))
        })?;
        tracing::info!("Loaded engine config from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a directory, returning defaults if the file
    /// is missing.
    pub fn load_or_default(dir: &Path) -> Self {
        let path = dir.join(Self::FILE_NAME);
        if !path.exists() {
            tracing::debug!("No {} in {}, using defaults", Self::FILE_NAME, dir.display());
            return Self::default();
        }
        match Self::load(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("{e}, using defaults");
                Self::default()
            }
        }
    }
}
