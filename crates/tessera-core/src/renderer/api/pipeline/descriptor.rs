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

//! The pipeline state descriptor and pipeline handle.

use super::state::*;
use crate::renderer::api::shader::ShaderProgramId;
use crate::renderer::api::util::enums::TextureFormat;

/// The shader program and entry points a pipeline runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderStages {
    /// The linked shader program.
    pub program: ShaderProgramId,
    /// The name of the vertex entry point.
    pub vertex_entry_point: String,
    /// The name of the fragment entry point, if the pipeline has a fragment stage.
    pub fragment_entry_point: Option<String>,
}

impl ShaderStages {
    /// Stages using the conventional `vs_main` / `fs_main` entry points.
    pub fn new(program: ShaderProgramId) -> Self {
        Self {
            program,
            vertex_entry_point: "vs_main".to_owned(),
            fragment_entry_point: Some("fs_main".to_owned()),
        }
    }
}

/// A complete, immutable description of a graphics pipeline.
///
/// This is the key of the pipeline cache: two descriptors with identical field
/// values are equal and hash identically, whatever the order in which they were
/// built. It carries no debug label so that naming never splits a cache entry.
///
/// Any change of state produces a new descriptor, and therefore a new pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineStateDescriptor {
    /// The shader program and entry points.
    pub stages: ShaderStages,
    /// The layout of each vertex buffer slot.
    pub vertex_layouts: Vec<VertexBufferLayoutDescriptor>,
    /// Primitive assembly and rasterization state.
    pub primitive: PrimitiveStateDescriptor,
    /// Depth/stencil state. If `None`, these tests are disabled.
    pub depth_stencil: Option<DepthStencilStateDescriptor>,
    /// The state of every color target this pipeline renders to.
    pub color_targets: Vec<ColorTargetStateDescriptor>,
    /// The multisampling state.
    pub multisample: MultisampleStateDescriptor,
}

impl PipelineStateDescriptor {
    /// Creates a descriptor for `program` with one opaque `Bgra8UnormSrgb`
    /// color target and default raster state.
    pub fn new(program: ShaderProgramId) -> Self {
        Self {
            stages: ShaderStages::new(program),
            vertex_layouts: Vec::new(),
            primitive: PrimitiveStateDescriptor::default(),
            depth_stencil: None,
            color_targets: vec![ColorTargetStateDescriptor::opaque(
                TextureFormat::Bgra8UnormSrgb,
            )],
            multisample: MultisampleStateDescriptor::default(),
        }
    }

    /// The shader program this pipeline runs.
    pub fn program(&self) -> ShaderProgramId {
        self.stages.program
    }

    /// Appends a vertex buffer layout.
    pub fn with_vertex_layout(mut self, layout: VertexBufferLayoutDescriptor) -> Self {
        self.vertex_layouts.push(layout);
        self
    }

    /// Replaces the primitive state.
    pub fn with_primitive(mut self, primitive: PrimitiveStateDescriptor) -> Self {
        self.primitive = primitive;
        self
    }

    /// Enables depth/stencil testing.
    pub fn with_depth_stencil(mut self, depth_stencil: DepthStencilStateDescriptor) -> Self {
        self.depth_stencil = Some(depth_stencil);
        self
    }

    /// Sets the blend state of every color target.
    pub fn with_blend(mut self, blend: Option<BlendStateDescriptor>) -> Self {
        for target in &mut self.color_targets {
            target.blend = blend;
        }
        self
    }

    /// Replaces the color targets.
    pub fn with_color_targets(mut self, targets: Vec<ColorTargetStateDescriptor>) -> Self {
        self.color_targets = targets;
        self
    }

    /// Replaces the multisample state.
    pub fn with_multisample(mut self, multisample: MultisampleStateDescriptor) -> Self {
        self.multisample = multisample;
        self
    }
}

/// An opaque handle to a constructed backend pipeline object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineId(pub usize);
