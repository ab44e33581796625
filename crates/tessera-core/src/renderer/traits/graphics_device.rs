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

use crate::renderer::api::*;
use crate::renderer::error::ResourceError;
use crate::renderer::traits::CommandRecorder;
use std::fmt::Debug;
use std::time::Duration;

/// The backend boundary of the renderer: an explicit, command-buffer and
/// pipeline-state-object based graphics API.
///
/// Every method takes `&self`; implementations synchronize internally so a
/// device can be shared as `Arc<dyn GraphicsDevice>` across preparation threads.
pub trait GraphicsDevice: Send + Sync + Debug + 'static {
    /// Creates a pipeline state object from the provided descriptor.
    /// ## Arguments
    /// * `descriptor` - The complete, immutable pipeline state.
    /// ## Returns
    /// A `Result` containing the ID of the created pipeline.
    /// ## Errors
    /// * `ResourceError::Pipeline` - If the backend rejects the state combination.
    /// * `ResourceError::Shader` - If the program or an entry point is unknown.
    fn create_pipeline(
        &self,
        descriptor: &PipelineStateDescriptor,
    ) -> Result<PipelineId, ResourceError>;

    /// Destroys the pipeline associated with the given ID.
    fn destroy_pipeline(&self, id: PipelineId) -> Result<(), ResourceError>;

    /// Returns the reflected binding interface of a shader program.
    /// ## Arguments
    /// * `program` - The shader program to reflect.
    /// ## Errors
    /// * `ResourceError::Shader` - If the program is unknown.
    fn shader_interface(&self, program: ShaderProgramId) -> Result<ShaderInterface, ResourceError>;

    /// Creates a new GPU buffer.
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferId, ResourceError>;

    /// Writes data to a GPU buffer from the CPU.
    /// ## Arguments
    /// * `id` - The ID of the buffer to write to.
    /// * `offset` - The offset in the buffer where the data will be written.
    /// * `data` - The bytes to write.
    /// ## Errors
    /// * `ResourceError::OutOfBounds` - If the range exceeds the buffer size.
    fn write_buffer(&self, id: BufferId, offset: u64, data: &[u8]) -> Result<(), ResourceError>;

    /// Destroys a GPU buffer.
    fn destroy_buffer(&self, id: BufferId) -> Result<(), ResourceError>;

    /// Allocates a descriptor set for one set index of a pipeline's layout.
    fn create_descriptor_set(
        &self,
        descriptor: &DescriptorSetDescriptor,
    ) -> Result<DescriptorSetId, ResourceError>;

    /// Writes resources into an existing descriptor set.
    ///
    /// The set must not be referenced by a submission the GPU has not finished.
    fn update_descriptor_set(
        &self,
        id: DescriptorSetId,
        writes: &[DescriptorWrite],
    ) -> Result<(), ResourceError>;

    /// Frees a descriptor set.
    fn destroy_descriptor_set(&self, id: DescriptorSetId) -> Result<(), ResourceError>;

    /// Creates a new command recorder.
    /// ## Arguments
    /// * `label` - An optional debug label for the command buffer.
    fn create_command_recorder(&self, label: Option<&str>) -> Box<dyn CommandRecorder>;

    /// Submits a finished command buffer to the GPU queue.
    /// ## Returns
    /// A fence signaled once the GPU has consumed the whole command buffer.
    /// ## Errors
    /// * `ResourceError::SubmissionRejected` - If the queue refuses the command buffer.
    ///   Nothing from it is executed in that case.
    fn submit(&self, command_buffer: CommandBufferId) -> Result<FenceId, ResourceError>;

    /// Drops a finished command buffer without submitting it.
    fn discard_command_buffer(&self, command_buffer: CommandBufferId);

    /// Returns `true` once the GPU has signaled the fence.
    fn is_fence_signaled(&self, fence: FenceId) -> bool;

    /// Blocks until the fence is signaled or `timeout` elapses.
    /// ## Returns
    /// `true` if the fence was signaled within the timeout.
    fn wait_for_fence(&self, fence: FenceId, timeout: Duration) -> bool;

    /// Releases a fence. Unknown fences are ignored.
    fn destroy_fence(&self, fence: FenceId);

    /// Gets the adapter information of the device.
    fn adapter_info(&self) -> GraphicsAdapterInfo;
}
