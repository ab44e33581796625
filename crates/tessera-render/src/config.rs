// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Renderer configuration.
//!
//! Every field has a default, so a RON file only needs to list what it changes:
//!
//! ```ron
//! (
//!     frames_in_flight: 3,
//!     exhaustion_policy: Grow(max_slots: 6),
//! )
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tessera_core::renderer::MAX_FRAMES_IN_FLIGHT;

/// What a render command does when every frame resource slot is still in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExhaustionPolicy {
    /// Wait on the oldest slot's fence for at most `fence_wait_timeout_ms`,
    /// then defer the draw item to the next frame.
    #[default]
    BoundedWait,
    /// Allocate an extra slot, up to `max_slots` per command, then defer.
    Grow {
        /// Upper bound of slots per render command.
        max_slots: usize,
    },
}

/// Configuration of the [`Controller`](crate::Controller).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Number of frame resource slots each render command starts with.
    pub frames_in_flight: usize,
    /// Upper bound of a fence wait when no slot is free.
    pub fence_wait_timeout_ms: u64,
    /// Behavior when no slot is free.
    pub exhaustion_policy: ExhaustionPolicy,
    /// Minimum alignment of uniform blocks inside a slot's uniform buffer.
    /// Raised to the device limit if that is larger.
    pub uniform_alignment: u64,
    /// Run resource preparation on worker threads.
    pub parallel_prepare: bool,
    /// Number of preparation workers when `parallel_prepare` is set.
    pub prepare_workers: usize,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: MAX_FRAMES_IN_FLIGHT,
            fence_wait_timeout_ms: 16,
            exhaustion_policy: ExhaustionPolicy::BoundedWait,
            uniform_alignment: 256,
            parallel_prepare: false,
            prepare_workers: 4,
        }
    }
}

impl RendererConfig {
    /// Parses and validates a configuration from RON text.
    pub fn from_ron_str(text: &str) -> Result<Self, ConfigError> {
        let config: RendererConfig = ron::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a configuration file.
    pub fn from_ron_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_ron_str(&text)?;
        log::info!(
            "RendererConfig: loaded from {}",
            path.as_ref().display()
        );
        Ok(config)
    }

    /// Serializes the configuration as pretty-printed RON.
    pub fn to_ron_string(&self) -> Result<String, ConfigError> {
        let pretty = ron::ser::PrettyConfig::default().indentor("  ".to_string());
        Ok(ron::ser::to_string_pretty(self, pretty)?)
    }

    /// Checks that every value is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frames_in_flight == 0 {
            return Err(ConfigError::Invalid(
                "frames_in_flight must be at least 1".to_string(),
            ));
        }
        if !self.uniform_alignment.is_power_of_two() {
            return Err(ConfigError::Invalid(format!(
                "uniform_alignment must be a power of two, got {}",
                self.uniform_alignment
            )));
        }
        if let ExhaustionPolicy::Grow { max_slots } = self.exhaustion_policy {
            if max_slots < self.frames_in_flight {
                return Err(ConfigError::Invalid(format!(
                    "Grow max_slots ({max_slots}) is below frames_in_flight ({})",
                    self.frames_in_flight
                )));
            }
        }
        if self.parallel_prepare && self.prepare_workers == 0 {
            return Err(ConfigError::Invalid(
                "prepare_workers must be at least 1 with parallel_prepare".to_string(),
            ));
        }
        Ok(())
    }

    /// The bounded fence wait as a [`Duration`].
    pub fn fence_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.fence_wait_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = RendererConfig::default();
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.fence_wait_timeout(), Duration::from_millis(16));
        assert_eq!(config.exhaustion_policy, ExhaustionPolicy::BoundedWait);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_ron_keeps_defaults() {
        let config = RendererConfig::from_ron_str(
            "(frames_in_flight: 3, exhaustion_policy: Grow(max_slots: 6))",
        )
        .unwrap();
        assert_eq!(config.frames_in_flight, 3);
        assert_eq!(config.exhaustion_policy, ExhaustionPolicy::Grow { max_slots: 6 });
        assert_eq!(config.uniform_alignment, 256);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(
            RendererConfig::from_ron_str("(frames_in_flight: 0)"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            RendererConfig::from_ron_str("(uniform_alignment: 100)"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            RendererConfig::from_ron_str("(exhaustion_policy: Grow(max_slots: 1))"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            RendererConfig::from_ron_str("(frames_in_flight: \"two\")"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_file_round_trip() {
        let config = RendererConfig {
            parallel_prepare: true,
            prepare_workers: 2,
            ..Default::default()
        };
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_ron_string().unwrap().as_bytes())
            .unwrap();

        let loaded = RendererConfig::from_ron_file(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = RendererConfig::from_ron_file(dir.path().join("missing.ron"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
