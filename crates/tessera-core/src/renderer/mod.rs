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

//! Provides the public, backend-agnostic rendering contracts.
//!
//! This module defines the "common language" spoken between the frame renderer and
//! a graphics backend. It contains the abstract `traits` (like [`GraphicsDevice`]),
//! plain data structures (like [`PipelineStateDescriptor`]), the reference-counted
//! handles used to share backend objects, and the error types.
//!
//! The 'what' of rendering lives here; the 'how' is provided by a concrete backend
//! (e.g. the headless backend in `tessera-infra`) implementing these traits.

pub mod api;
pub mod error;
pub mod handle;
pub mod traits;

// Re-export the most important traits and types for easier use.
pub use self::api::*;
pub use self::error::{PipelineError, ResourceError, ShaderError};
pub use self::handle::{
    GpuResource, RefCounted, RefCountedBuffer, RefCountedDescriptorSet, RefCountedPipeline,
    ReleaseQueue, ReleaseRequest, ReleaseSender,
};
pub use self::traits::{CommandRecorder, GraphicsDevice};
