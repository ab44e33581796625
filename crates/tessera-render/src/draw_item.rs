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

//! Draw items: the per-frame input handed over by the scene.

use std::ops::Range;
use tessera_core::renderer::{BufferId, IndexFormat, PipelineStateDescriptor, SamplerId, TextureViewId};

/// Stable identity of a draw item across frames.
///
/// The same id in consecutive frames maps to the same render command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DrawItemId(pub u64);

/// Bytes for one named uniform block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformBlockData {
    /// The uniform block name declared by the shader.
    pub name: String,
    /// Raw block contents.
    pub bytes: Vec<u8>,
}

impl UniformBlockData {
    /// A block from raw bytes.
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    /// A block from a plain-old-data value.
    pub fn from_pod<T: bytemuck::Pod>(name: impl Into<String>, value: &T) -> Self {
        Self::new(name, bytemuck::bytes_of(value).to_vec())
    }
}

/// A texture view and sampler bound to a named shader slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureBinding {
    /// The texture slot name declared by the shader.
    pub name: String,
    /// The texture view.
    pub view: TextureViewId,
    /// The sampler.
    pub sampler: SamplerId,
}

impl TextureBinding {
    /// Binds `view` sampled through `sampler` to the slot `name`.
    pub fn new(name: impl Into<String>, view: TextureViewId, sampler: SamplerId) -> Self {
        Self {
            name: name.into(),
            view,
            sampler,
        }
    }
}

/// An index buffer binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexBinding {
    /// The index buffer.
    pub buffer: BufferId,
    /// Byte offset into the buffer.
    pub offset: u64,
    /// Index element type.
    pub format: IndexFormat,
}

/// The geometry a draw item draws.
///
/// Buffers are owned by the asset layer; only their ids are carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Geometry {
    /// `(buffer, offset)` per vertex buffer slot.
    pub vertex_buffers: Vec<(BufferId, u64)>,
    /// The index buffer for indexed draws.
    pub index: Option<IndexBinding>,
    /// Vertex range, or index range for indexed draws.
    pub elements: Range<u32>,
    /// Instance range.
    pub instances: Range<u32>,
    /// Value added to each index before fetching vertices.
    pub base_vertex: i32,
}

impl Geometry {
    /// A draw of `vertex_count` vertices generated by the vertex shader alone.
    pub fn procedural(vertex_count: u32) -> Self {
        Self {
            vertex_buffers: Vec::new(),
            index: None,
            elements: 0..vertex_count,
            instances: 0..1,
            base_vertex: 0,
        }
    }

    /// A non-indexed draw reading from one vertex buffer.
    pub fn vertices(buffer: BufferId, vertex_count: u32) -> Self {
        Self {
            vertex_buffers: vec![(buffer, 0)],
            ..Self::procedural(vertex_count)
        }
    }

    /// An indexed draw of `index_count` indices.
    pub fn indexed(
        vertex_buffer: BufferId,
        index_buffer: BufferId,
        format: IndexFormat,
        index_count: u32,
    ) -> Self {
        Self {
            vertex_buffers: vec![(vertex_buffer, 0)],
            index: Some(IndexBinding {
                buffer: index_buffer,
                offset: 0,
                format,
            }),
            elements: 0..index_count,
            instances: 0..1,
            base_vertex: 0,
        }
    }

    /// Sets the instance range.
    pub fn with_instances(mut self, instances: Range<u32>) -> Self {
        self.instances = instances;
        self
    }
}

/// One unit of renderable work supplied by the scene for a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawItem {
    /// Stable identity across frames.
    pub id: DrawItemId,
    /// Debug label, used for logging and backend object labels.
    pub label: String,
    /// The pipeline state this item is drawn with.
    pub pipeline: PipelineStateDescriptor,
    /// Named uniform block contents.
    pub uniforms: Vec<UniformBlockData>,
    /// Named texture bindings.
    pub textures: Vec<TextureBinding>,
    /// What to draw.
    pub geometry: Geometry,
}

impl DrawItem {
    /// A draw item with no resource bindings.
    pub fn new(
        id: DrawItemId,
        label: impl Into<String>,
        pipeline: PipelineStateDescriptor,
        geometry: Geometry,
    ) -> Self {
        Self {
            id,
            label: label.into(),
            pipeline,
            uniforms: Vec::new(),
            textures: Vec::new(),
            geometry,
        }
    }

    /// Adds or replaces a uniform block.
    pub fn with_uniform(mut self, block: UniformBlockData) -> Self {
        self.set_uniform(block);
        self
    }

    /// Adds a texture binding.
    pub fn with_texture(mut self, texture: TextureBinding) -> Self {
        self.textures.retain(|t| t.name != texture.name);
        self.textures.push(texture);
        self
    }

    /// Adds or replaces a uniform block in place.
    pub fn set_uniform(&mut self, block: UniformBlockData) {
        match self.uniforms.iter_mut().find(|u| u.name == block.name) {
            Some(existing) => *existing = block,
            None => self.uniforms.push(block),
        }
    }
}
