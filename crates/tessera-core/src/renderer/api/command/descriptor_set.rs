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

//! Descriptor sets and the writes that fill them.
//!
//! A descriptor set is the GPU-side binding table connecting shader inputs to
//! buffers, texture views and samplers. Sets are allocated against one set index
//! of a pipeline's layout and then filled with [`DescriptorWrite`]s.

use crate::renderer::api::{
    pipeline::PipelineId,
    resource::{BufferId, SamplerId, TextureViewId},
    shader::BindingKind,
};

/// An opaque handle to a descriptor set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorSetId(pub usize);

/// Describes a descriptor set to allocate.
#[derive(Debug, Clone)]
pub struct DescriptorSetDescriptor<'a> {
    /// Debug label.
    pub label: &'a str,
    /// The pipeline whose layout the set conforms to.
    pub pipeline: PipelineId,
    /// The set index within that layout.
    pub set: u32,
    /// The `(binding, kind)` slots of the set, in binding order.
    pub entries: &'a [(u32, BindingKind)],
}

/// A resource written into one binding slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorResource {
    /// A byte range of a uniform buffer.
    UniformBuffer {
        /// The buffer holding the block.
        buffer: BufferId,
        /// Offset of the block in bytes.
        offset: u64,
        /// Size of the block in bytes.
        size: u64,
    },
    /// A texture view sampled through a sampler.
    CombinedImageSampler {
        /// The texture view.
        view: TextureViewId,
        /// The sampler.
        sampler: SamplerId,
    },
}

impl DescriptorResource {
    /// The binding kind this resource satisfies.
    pub fn kind(&self) -> BindingKind {
        match self {
            DescriptorResource::UniformBuffer { .. } => BindingKind::UniformBuffer,
            DescriptorResource::CombinedImageSampler { .. } => BindingKind::CombinedImageSampler,
        }
    }
}

/// A single write into a descriptor set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorWrite {
    /// The binding index within the set.
    pub binding: u32,
    /// The resource bound there.
    pub resource: DescriptorResource,
}

impl DescriptorWrite {
    /// Writes the range `offset..offset + size` of `buffer` to `binding`.
    pub fn uniform(binding: u32, buffer: BufferId, offset: u64, size: u64) -> Self {
        Self {
            binding,
            resource: DescriptorResource::UniformBuffer {
                buffer,
                offset,
                size,
            },
        }
    }

    /// Writes a texture view and sampler pair to `binding`.
    pub fn texture(binding: u32, view: TextureViewId, sampler: SamplerId) -> Self {
        Self {
            binding,
            resource: DescriptorResource::CombinedImageSampler { view, sampler },
        }
    }
}
