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

use std::any::Any;
use std::ops::Range;
use tessera_core::renderer::{
    BufferId, CommandBufferId, CommandRecorder, DescriptorSetId, IndexFormat, PipelineId,
};

use super::device::HeadlessDevice;

/// One command recorded into a headless command buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCommand {
    /// `bind_pipeline`.
    BindPipeline(PipelineId),
    /// `bind_descriptor_set`.
    BindDescriptorSet {
        /// Set index.
        index: u32,
        /// The set.
        set: DescriptorSetId,
    },
    /// `bind_vertex_buffer`.
    BindVertexBuffer {
        /// Vertex buffer slot.
        slot: u32,
        /// The buffer.
        buffer: BufferId,
        /// Byte offset.
        offset: u64,
    },
    /// `bind_index_buffer`.
    BindIndexBuffer {
        /// The buffer.
        buffer: BufferId,
        /// Byte offset.
        offset: u64,
        /// Index type.
        format: IndexFormat,
    },
    /// `draw`.
    Draw {
        /// Vertex range.
        vertices: Range<u32>,
        /// Instance range.
        instances: Range<u32>,
    },
    /// `draw_indexed`.
    DrawIndexed {
        /// Index range.
        indices: Range<u32>,
        /// Base vertex.
        base_vertex: i32,
        /// Instance range.
        instances: Range<u32>,
    },
}

impl RecordedCommand {
    /// Returns `true` for draw calls.
    pub fn is_draw(&self) -> bool {
        matches!(
            self,
            RecordedCommand::Draw { .. } | RecordedCommand::DrawIndexed { .. }
        )
    }
}

/// Records commands into memory and hands them to the device on `finish`.
#[derive(Debug)]
pub struct HeadlessRecorder {
    pub(crate) label: Option<String>,
    pub(crate) commands: Vec<RecordedCommand>,
    pub(crate) device: HeadlessDevice,
}

impl HeadlessRecorder {
    /// The commands recorded so far.
    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }
}

impl CommandRecorder for HeadlessRecorder {
    fn bind_pipeline(&mut self, pipeline: PipelineId) {
        self.commands.push(RecordedCommand::BindPipeline(pipeline));
    }

    fn bind_descriptor_set(&mut self, index: u32, set: DescriptorSetId) {
        self.commands
            .push(RecordedCommand::BindDescriptorSet { index, set });
    }

    fn bind_vertex_buffer(&mut self, slot: u32, buffer: BufferId, offset: u64) {
        self.commands.push(RecordedCommand::BindVertexBuffer {
            slot,
            buffer,
            offset,
        });
    }

    fn bind_index_buffer(&mut self, buffer: BufferId, offset: u64, format: IndexFormat) {
        self.commands.push(RecordedCommand::BindIndexBuffer {
            buffer,
            offset,
            format,
        });
    }

    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) {
        self.commands.push(RecordedCommand::Draw {
            vertices,
            instances,
        });
    }

    fn draw_indexed(&mut self, indices: Range<u32>, base_vertex: i32, instances: Range<u32>) {
        self.commands.push(RecordedCommand::DrawIndexed {
            indices,
            base_vertex,
            instances,
        });
    }

    fn finish(self: Box<Self>) -> CommandBufferId {
        let HeadlessRecorder {
            label,
            commands,
            device,
        } = *self;
        device.register_command_buffer(label, commands)
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
