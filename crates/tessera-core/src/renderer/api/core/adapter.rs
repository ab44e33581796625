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

//! Adapter information and device limits.

use crate::renderer::api::util::enums::{GraphicsBackendType, RendererDeviceType};

/// Device limits the renderer has to respect when laying out resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    /// Required alignment, in bytes, of a uniform buffer binding offset.
    pub min_uniform_buffer_offset_alignment: u64,
    /// Maximum number of descriptor sets a pipeline may bind at once.
    pub max_bound_descriptor_sets: u32,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            min_uniform_buffer_offset_alignment: 256,
            max_bound_descriptor_sets: 4,
        }
    }
}

/// Describes the adapter a [`GraphicsDevice`](crate::renderer::GraphicsDevice) runs on.
#[derive(Debug, Clone, Default)]
pub struct GraphicsAdapterInfo {
    /// Human-readable adapter name.
    pub name: String,
    /// The graphics API backend this adapter is associated with.
    pub backend_type: GraphicsBackendType,
    /// The physical type of the adapter.
    pub device_type: RendererDeviceType,
    /// Limits reported by the device.
    pub limits: DeviceLimits,
}
