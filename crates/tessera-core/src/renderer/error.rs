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

//! Defines the hierarchy of error types for the rendering subsystem.

use crate::renderer::api::{pipeline::PipelineId, shader::ShaderProgramId};
use std::fmt;

/// An error related to a shader program or its reflected interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShaderError {
    /// The shader program is unknown to the device.
    NotFound {
        /// The ID of the program that was not found.
        id: ShaderProgramId,
    },
    /// The specified entry point (e.g., `vs_main`) does not exist in the program.
    InvalidEntryPoint {
        /// The ID of the shader program.
        id: ShaderProgramId,
        /// The entry point name that was not found.
        entry_point: String,
    },
}

impl fmt::Display for ShaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderError::NotFound { id } => {
                write!(f, "Shader program not found for ID: {id:?}")
            }
            ShaderError::InvalidEntryPoint { id, entry_point } => {
                write!(
                    f,
                    "Invalid entry point '{entry_point}' for shader program {id:?}"
                )
            }
        }
    }
}

impl std::error::Error for ShaderError {}

/// An error related to the creation or management of a graphics pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// The graphics backend rejected the pipeline state object.
    CompilationFailed {
        /// The shader program the pipeline was built from.
        program: ShaderProgramId,
        /// Detailed error messages from the backend.
        details: String,
    },
    /// Construction of this exact state already failed and has not been
    /// invalidated since.
    PreviouslyFailed {
        /// The shader program the pipeline was built from.
        program: ShaderProgramId,
    },
    /// The specified pipeline ID is not valid.
    InvalidPipeline {
        /// The ID of the invalid pipeline.
        id: PipelineId,
    },
    /// The color target format is not compatible with the pipeline or device.
    IncompatibleColorTarget(String),
    /// The depth/stencil format is not compatible with the pipeline or device.
    IncompatibleDepthStencilFormat(String),
    /// The shader interface uses more descriptor sets than the device allows.
    TooManyDescriptorSets {
        /// Number of sets the interface needs.
        requested: u32,
        /// Device limit.
        max: u32,
    },
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::CompilationFailed { program, details } => {
                write!(f, "Pipeline compilation failed for {program:?}: {details}")
            }
            PipelineError::PreviouslyFailed { program } => {
                write!(
                    f,
                    "Pipeline for {program:?} failed earlier and awaits shader invalidation"
                )
            }
            PipelineError::InvalidPipeline { id } => {
                write!(f, "Invalid pipeline ID: {id:?}")
            }
            PipelineError::IncompatibleColorTarget(msg) => {
                write!(f, "Incompatible color target format: {msg}")
            }
            PipelineError::IncompatibleDepthStencilFormat(msg) => {
                write!(f, "Incompatible depth/stencil format: {msg}")
            }
            PipelineError::TooManyDescriptorSets { requested, max } => {
                write!(
                    f,
                    "Pipeline needs {requested} descriptor sets, device allows {max}"
                )
            }
        }
    }
}

impl std::error::Error for PipelineError {}

/// An error related to the creation or use of a GPU resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// A shader-specific error occurred.
    Shader(ShaderError),
    /// A pipeline-specific error occurred.
    Pipeline(PipelineError),
    /// A generic resource could not be found.
    NotFound,
    /// The handle or ID used to reference a resource is invalid.
    InvalidHandle,
    /// A write fell outside the bounds of a buffer.
    OutOfBounds {
        /// Write offset in bytes.
        offset: u64,
        /// Write length in bytes.
        len: u64,
        /// Buffer size in bytes.
        size: u64,
    },
    /// The device ran out of memory or descriptor pool space.
    OutOfMemory,
    /// The backend rejected a command buffer submission.
    SubmissionRejected(String),
    /// An error originating from the specific graphics backend implementation.
    BackendError(String),
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceError::Shader(err) => write!(f, "Shader resource error: {err}"),
            ResourceError::Pipeline(err) => write!(f, "Pipeline resource error: {err}"),
            ResourceError::NotFound => write!(f, "Resource not found with ID."),
            ResourceError::InvalidHandle => write!(f, "Invalid resource handle or ID."),
            ResourceError::OutOfBounds { offset, len, size } => write!(
                f,
                "Resource access out of bounds: {len} bytes at offset {offset} in a {size} byte buffer."
            ),
            ResourceError::OutOfMemory => write!(f, "Out of device memory."),
            ResourceError::SubmissionRejected(msg) => {
                write!(f, "Command buffer submission rejected: {msg}")
            }
            ResourceError::BackendError(msg) => {
                write!(f, "Backend-specific resource error: {msg}")
            }
        }
    }
}

impl std::error::Error for ResourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ResourceError::Shader(err) => Some(err),
            ResourceError::Pipeline(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ShaderError> for ResourceError {
    fn from(err: ShaderError) -> Self {
        ResourceError::Shader(err)
    }
}

impl From<PipelineError> for ResourceError {
    fn from(err: PipelineError) -> Self {
        ResourceError::Pipeline(err)
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;

    #[test]
    fn test_pipeline_error_display() {
        let err = PipelineError::CompilationFailed {
            program: ShaderProgramId(3),
            details: "vertex output mismatch".to_string(),
        };
        assert_eq!(
            format!("{err}"),
            "Pipeline compilation failed for ShaderProgramId(3): vertex output mismatch"
        );

        let err = PipelineError::TooManyDescriptorSets {
            requested: 6,
            max: 4,
        };
        assert_eq!(
            format!("{err}"),
            "Pipeline needs 6 descriptor sets, device allows 4"
        );
    }

    #[test]
    fn test_resource_error_display_wrapping_shader_error() {
        let shader_err = ShaderError::NotFound {
            id: ShaderProgramId(42),
        };
        let res_err: ResourceError = shader_err.into();
        assert_eq!(
            format!("{res_err}"),
            "Shader resource error: Shader program not found for ID: ShaderProgramId(42)"
        );
        assert!(res_err.source().is_some());
    }

    #[test]
    fn test_resource_error_chains_pipeline_source() {
        let pipeline_err = PipelineError::PreviouslyFailed {
            program: ShaderProgramId(7),
        };
        let err = ResourceError::from(pipeline_err.clone());
        let source = err.source().map(|e| e.to_string());
        assert_eq!(source, Some(pipeline_err.to_string()));
        assert!(ResourceError::OutOfMemory.source().is_none());
    }

    #[test]
    fn test_out_of_bounds_reports_range() {
        let err = ResourceError::OutOfBounds {
            offset: 240,
            len: 32,
            size: 256,
        };
        assert_eq!(
            format!("{err}"),
            "Resource access out of bounds: 32 bytes at offset 240 in a 256 byte buffer."
        );
    }
}
