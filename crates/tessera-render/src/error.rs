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

//! Error types of the frame renderer.
//!
//! Errors scoped to a single draw item are [`CommandError`]s and never abort a
//! frame. [`FrameError`] is reserved for failures of the frame as a whole.

use tessera_core::renderer::{FrameSerial, ResourceError};
use thiserror::Error;

/// A failure scoped to a single render command.
///
/// The draw item is skipped (or deferred) for the current frame; the rest of
/// the frame records normally.
#[derive(Debug, Clone, Error)]
pub enum CommandError {
    /// The backend rejected the pipeline or a descriptor set for this item.
    #[error("construction failed: {0}")]
    Construction(#[source] ResourceError),

    /// No frame resource slot was free within the bounded wait.
    #[error("no free frame resource slot after waiting {waited_ms} ms")]
    Exhausted {
        /// How long the command waited for a slot to retire.
        waited_ms: u64,
    },

    /// The same draw item appeared more than once in a frame.
    #[error("draw item submitted more than once in the same frame")]
    Duplicate,

    /// A bind or record step ran before `prepare_resources` succeeded.
    #[error("render command is not prepared")]
    NotPrepared,

    /// The target command buffer was already finished.
    #[error("command buffer for frame {0} is already finished")]
    Finished(FrameSerial),

    /// A backend call failed while writing resources for this item.
    #[error("resource operation failed: {0}")]
    Resource(#[from] ResourceError),
}

impl CommandError {
    /// Returns `true` if the item was deferred rather than rejected.
    pub fn is_deferred(&self) -> bool {
        matches!(self, CommandError::Exhausted { .. })
    }
}

/// A failure of a whole frame.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The backend refused the command buffer. Nothing from the frame executes.
    #[error("frame {frame} submission failed: {source}")]
    Submission {
        /// The frame that failed.
        frame: FrameSerial,
        /// The backend error.
        #[source]
        source: ResourceError,
    },

    /// The frame handed in is not the one currently being recorded.
    #[error("frame {0} is not the active frame")]
    NoActiveFrame(FrameSerial),

    /// The command buffer was already finished.
    #[error("command buffer for frame {0} is already finished")]
    AlreadyFinished(FrameSerial),

    /// A backend call failed outside of any single draw item.
    #[error("resource operation failed: {0}")]
    Resource(#[from] ResourceError),
}

/// A failure to load or validate a [`RendererConfig`](crate::RendererConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read renderer config: {0}")]
    Io(#[from] std::io::Error),

    /// The RON text could not be parsed.
    #[error("failed to parse renderer config: {0}")]
    Parse(#[from] ron::error::SpannedError),

    /// The configuration could not be serialized.
    #[error("failed to serialize renderer config: {0}")]
    Serialize(#[from] ron::Error),

    /// A value is out of range.
    #[error("invalid renderer config: {0}")]
    Invalid(String),
}
