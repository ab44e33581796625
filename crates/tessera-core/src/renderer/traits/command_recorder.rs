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

use crate::renderer::api::{
    BufferId, CommandBufferId, DescriptorSetId, IndexFormat, PipelineId,
};
use std::any::Any;
use std::ops::Range;

/// A trait for an object that records a sequence of GPU commands.
///
/// A `CommandRecorder` builds one [`CommandBufferId`]. Commands are recorded in
/// call order and executed by the GPU in that same order.
pub trait CommandRecorder: Send {
    /// Sets the active pipeline for subsequent draw calls.
    fn bind_pipeline(&mut self, pipeline: PipelineId);

    /// Binds a descriptor set at set index `index` of the active pipeline's layout.
    fn bind_descriptor_set(&mut self, index: u32, set: DescriptorSetId);

    /// Binds a vertex buffer to a specific slot.
    fn bind_vertex_buffer(&mut self, slot: u32, buffer: BufferId, offset: u64);

    /// Binds an index buffer for indexed drawing.
    fn bind_index_buffer(&mut self, buffer: BufferId, offset: u64, format: IndexFormat);

    /// Records a non-indexed draw call.
    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>);

    /// Records an indexed draw call.
    fn draw_indexed(&mut self, indices: Range<u32>, base_vertex: i32, instances: Range<u32>);

    /// Finalizes the command recording and returns a handle to the resulting command buffer.
    ///
    /// This method consumes the recorder. The returned [`CommandBufferId`] can then
    /// be submitted to, or discarded by, the [`GraphicsDevice`](crate::renderer::GraphicsDevice).
    fn finish(self: Box<Self>) -> CommandBufferId;

    /// Returns a mutable reference to the underlying trait object as `Any`.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}
