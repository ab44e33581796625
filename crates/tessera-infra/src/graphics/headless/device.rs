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

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::ops::Range;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tessera_core::renderer::{
    BindingKind, BufferDescriptor, BufferId, BufferUsage, CommandBufferId, CommandRecorder,
    DescriptorResource, DescriptorSetDescriptor, DescriptorSetId, DescriptorWrite, DeviceLimits,
    FenceId, GpuResource, GraphicsAdapterInfo, GraphicsBackendType, GraphicsDevice, PipelineError,
    PipelineId, PipelineStateDescriptor, RendererDeviceType, ResourceError, SamplerId,
    ShaderError, ShaderInterface, ShaderProgramId, TextureViewId,
};

use super::recorder::{HeadlessRecorder, RecordedCommand};
use super::timeline::GpuTimeline;

/// Number of calls made to each backend entry point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    /// `create_pipeline`.
    pub create_pipeline: usize,
    /// `destroy_pipeline`.
    pub destroy_pipeline: usize,
    /// `shader_interface`.
    pub shader_interface: usize,
    /// `create_buffer`.
    pub create_buffer: usize,
    /// `write_buffer`.
    pub write_buffer: usize,
    /// `destroy_buffer`.
    pub destroy_buffer: usize,
    /// `create_descriptor_set`.
    pub create_descriptor_set: usize,
    /// `update_descriptor_set`.
    pub update_descriptor_set: usize,
    /// `destroy_descriptor_set`.
    pub destroy_descriptor_set: usize,
    /// `submit`.
    pub submit: usize,
}

impl CallCounts {
    /// Calls that create, write or destroy a backend object.
    pub fn total(&self) -> usize {
        self.create_pipeline
            + self.destroy_pipeline
            + self.shader_interface
            + self.create_buffer
            + self.write_buffer
            + self.destroy_buffer
            + self.create_descriptor_set
            + self.update_descriptor_set
            + self.destroy_descriptor_set
    }
}

#[derive(Debug, Default)]
struct Counters {
    create_pipeline: AtomicUsize,
    destroy_pipeline: AtomicUsize,
    shader_interface: AtomicUsize,
    create_buffer: AtomicUsize,
    write_buffer: AtomicUsize,
    destroy_buffer: AtomicUsize,
    create_descriptor_set: AtomicUsize,
    update_descriptor_set: AtomicUsize,
    destroy_descriptor_set: AtomicUsize,
    submit: AtomicUsize,
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// What kind of misuse the simulated GPU observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HazardKind {
    /// A buffer was written while a pending submission reads it.
    WriteInFlight,
    /// A descriptor set was updated while a pending submission binds it.
    UpdateInFlight,
    /// An object was destroyed while a pending submission references it.
    DestroyInFlight,
    /// A submission referenced an object that does not exist.
    UnknownResource,
}

/// A resource hazard, always a bug in the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hazard {
    /// What happened.
    pub kind: HazardKind,
    /// The object involved.
    pub resource: GpuResource,
    /// The submission that was still using it.
    pub submission: u64,
}

/// Uniform data read by an executed draw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformRead {
    /// Descriptor set index.
    pub set: u32,
    /// Binding index.
    pub binding: u32,
    /// The bytes of the bound range when the draw executed.
    pub bytes: Vec<u8>,
}

impl UniformRead {
    /// Reinterprets the leading bytes as `T`.
    pub fn read<T: bytemuck::Pod>(&self) -> Option<T> {
        let size = std::mem::size_of::<T>();
        self.bytes
            .get(..size)
            .and_then(|bytes| bytemuck::try_pod_read_unaligned(bytes).ok())
    }
}

/// A draw call as the simulated GPU executed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedDraw {
    /// The submission the draw belonged to, starting at 1.
    pub submission: u64,
    /// The command buffer label.
    pub label: Option<String>,
    /// The bound pipeline.
    pub pipeline: Option<PipelineId>,
    /// Uniform ranges visible through the bound descriptor sets.
    pub uniforms: Vec<UniformRead>,
    /// `(set, binding, view, sampler)` visible through the bound descriptor sets.
    pub textures: Vec<(u32, u32, TextureViewId, SamplerId)>,
    /// Vertex or index range.
    pub elements: Range<u32>,
    /// Instance range.
    pub instances: Range<u32>,
    /// Whether the draw was indexed.
    pub indexed: bool,
}

impl ExecutedDraw {
    /// The uniform range bound at `(set, binding)`.
    pub fn uniform(&self, set: u32, binding: u32) -> Option<&UniformRead> {
        self.uniforms
            .iter()
            .find(|u| u.set == set && u.binding == binding)
    }
}

#[derive(Debug)]
struct ProgramEntry {
    label: String,
    interface: ShaderInterface,
    failure: Option<String>,
}

#[derive(Debug)]
struct BufferEntry {
    label: String,
    usage: BufferUsage,
    data: Vec<u8>,
}

#[derive(Debug)]
struct DescriptorSetEntry {
    entries: Vec<(u32, BindingKind)>,
    writes: BTreeMap<u32, DescriptorResource>,
}

#[derive(Debug)]
struct FinishedBuffer {
    label: Option<String>,
    commands: Vec<RecordedCommand>,
}

#[derive(Debug)]
struct Submission {
    index: u64,
    label: Option<String>,
    commands: Vec<RecordedCommand>,
    references: HashSet<GpuResource>,
}

#[derive(Debug, Default)]
struct State {
    timeline: GpuTimeline,
    programs: HashMap<ShaderProgramId, ProgramEntry>,
    pipelines: HashMap<PipelineId, ShaderProgramId>,
    buffers: HashMap<BufferId, BufferEntry>,
    descriptor_sets: HashMap<DescriptorSetId, DescriptorSetEntry>,
    texture_views: HashSet<TextureViewId>,
    samplers: HashSet<SamplerId>,
    command_buffers: HashMap<CommandBufferId, FinishedBuffer>,

    // --- Simulated queue ---
    queue: VecDeque<Submission>,
    fences: HashMap<FenceId, u64>,
    submitted: u64,
    completed: u64,
    reject_next: Option<String>,

    // --- Observations ---
    history: Vec<Vec<RecordedCommand>>,
    executed: Vec<ExecutedDraw>,
    hazards: Vec<Hazard>,
    discarded: usize,
}

impl State {
    fn is_alive(&self, resource: GpuResource) -> bool {
        match resource {
            GpuResource::Pipeline(id) => self.pipelines.contains_key(&id),
            GpuResource::Buffer(id) => self.buffers.contains_key(&id),
            GpuResource::DescriptorSet(id) => self.descriptor_sets.contains_key(&id),
        }
    }

    fn references_of(&self, commands: &[RecordedCommand]) -> HashSet<GpuResource> {
        let mut references = HashSet::new();
        for command in commands {
            match command {
                RecordedCommand::BindPipeline(id) => {
                    references.insert(GpuResource::Pipeline(*id));
                }
                RecordedCommand::BindDescriptorSet { set, .. } => {
                    references.insert(GpuResource::DescriptorSet(*set));
                    let Some(entry) = self.descriptor_sets.get(set) else {
                        continue;
                    };
                    for resource in entry.writes.values() {
                        if let DescriptorResource::UniformBuffer { buffer, .. } = resource {
                            references.insert(GpuResource::Buffer(*buffer));
                        }
                    }
                }
                RecordedCommand::BindVertexBuffer { buffer, .. }
                | RecordedCommand::BindIndexBuffer { buffer, .. } => {
                    references.insert(GpuResource::Buffer(*buffer));
                }
                RecordedCommand::Draw { .. } | RecordedCommand::DrawIndexed { .. } => {}
            }
        }
        references
    }

    /// The oldest pending submission referencing `resource`.
    fn in_flight_use(&self, resource: GpuResource) -> Option<u64> {
        self.queue
            .iter()
            .find(|s| s.references.contains(&resource))
            .map(|s| s.index)
    }

    fn check_hazard(&mut self, kind: HazardKind, resource: GpuResource) {
        if let Some(submission) = self.in_flight_use(resource) {
            log::error!(
                "HeadlessDevice: {:?} on {:?} still used by submission {}",
                kind,
                resource,
                submission
            );
            self.hazards.push(Hazard {
                kind,
                resource,
                submission,
            });
        }
    }

    fn retire_front(&mut self) -> bool {
        let Some(submission) = self.queue.pop_front() else {
            return false;
        };
        self.execute(&submission);
        self.completed = submission.index;
        log::trace!("HeadlessDevice: submission {} completed", submission.index);
        true
    }

    fn execute(&mut self, submission: &Submission) {
        let mut pipeline = None;
        let mut bound: BTreeMap<u32, DescriptorSetId> = BTreeMap::new();
        for command in &submission.commands {
            let (elements, instances, indexed) = match command {
                RecordedCommand::BindPipeline(id) => {
                    pipeline = Some(*id);
                    bound.clear();
                    continue;
                }
                RecordedCommand::BindDescriptorSet { index, set } => {
                    bound.insert(*index, *set);
                    continue;
                }
                RecordedCommand::Draw {
                    vertices,
                    instances,
                } => (vertices.clone(), instances.clone(), false),
                RecordedCommand::DrawIndexed {
                    indices, instances, ..
                } => (indices.clone(), instances.clone(), true),
                _ => continue,
            };
            let draw = self.read_draw(submission, pipeline, &bound, elements, instances, indexed);
            self.executed.push(draw);
        }
    }

    fn read_draw(
        &self,
        submission: &Submission,
        pipeline: Option<PipelineId>,
        bound: &BTreeMap<u32, DescriptorSetId>,
        elements: Range<u32>,
        instances: Range<u32>,
        indexed: bool,
    ) -> ExecutedDraw {
        let mut uniforms = Vec::new();
        let mut textures = Vec::new();
        for (index, set) in bound {
            let Some(entry) = self.descriptor_sets.get(set) else {
                continue;
            };
            for (binding, resource) in &entry.writes {
                match *resource {
                    DescriptorResource::UniformBuffer {
                        buffer,
                        offset,
                        size,
                    } => {
                        let bytes = self
                            .buffers
                            .get(&buffer)
                            .and_then(|b| b.data.get(offset as usize..(offset + size) as usize))
                            .map(<[u8]>::to_vec)
                            .unwrap_or_default();
                        uniforms.push(UniformRead {
                            set: *index,
                            binding: *binding,
                            bytes,
                        });
                    }
                    DescriptorResource::CombinedImageSampler { view, sampler } => {
                        textures.push((*index, *binding, view, sampler));
                    }
                }
            }
        }
        ExecutedDraw {
            submission: submission.index,
            label: submission.label.clone(),
            pipeline,
            uniforms,
            textures,
            elements,
            instances,
            indexed,
        }
    }

    fn retire_excess(&mut self) {
        if let Some(max) = self.timeline.max_pending() {
            while self.queue.len() > max && self.retire_front() {}
        }
    }
}

/// The internal, non-clonable state of the [`HeadlessDevice`].
#[derive(Debug)]
pub struct HeadlessDeviceInternal {
    state: Mutex<State>,
    // Signaled whenever a submission completes.
    retired: Condvar,
    calls: Counters,
    limits: DeviceLimits,

    next_program_id: AtomicUsize,
    next_pipeline_id: AtomicUsize,
    next_buffer_id: AtomicUsize,
    next_descriptor_set_id: AtomicUsize,
    next_texture_view_id: AtomicUsize,
    next_sampler_id: AtomicUsize,
    next_command_buffer_id: AtomicU64,
    next_fence_id: AtomicU64,
}

/// A clonable, thread-safe handle to a CPU-simulated graphics device.
///
/// Clones share the same simulated GPU, so a test can keep one clone for
/// inspection while the renderer owns another as `Arc<dyn GraphicsDevice>`.
#[derive(Clone, Debug)]
pub struct HeadlessDevice {
    internal: Arc<HeadlessDeviceInternal>,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDevice {
    /// A device with default limits and an [`Immediate`](GpuTimeline::Immediate)
    /// timeline.
    pub fn new() -> Self {
        Self::with_limits(DeviceLimits::default())
    }

    /// A device reporting the given limits.
    pub fn with_limits(limits: DeviceLimits) -> Self {
        Self {
            internal: Arc::new(HeadlessDeviceInternal {
                state: Mutex::new(State::default()),
                retired: Condvar::new(),
                calls: Counters::default(),
                limits,
                next_program_id: AtomicUsize::new(0),
                next_pipeline_id: AtomicUsize::new(0),
                next_buffer_id: AtomicUsize::new(0),
                next_descriptor_set_id: AtomicUsize::new(0),
                next_texture_view_id: AtomicUsize::new(0),
                next_sampler_id: AtomicUsize::new(0),
                next_command_buffer_id: AtomicU64::new(0),
                next_fence_id: AtomicU64::new(0),
            }),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, ResourceError> {
        self.internal
            .state
            .lock()
            .map_err(|e| ResourceError::BackendError(format!("Mutex poisoned (state): {e}")))
    }

    // Inspection never fails; a poisoned state is still worth looking at.
    fn inspect(&self) -> MutexGuard<'_, State> {
        self.internal
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // --- Shader programs ---

    /// Registers a shader program with its reflected interface.
    pub fn register_program(
        &self,
        label: impl Into<String>,
        interface: ShaderInterface,
    ) -> ShaderProgramId {
        let id = ShaderProgramId(self.internal.next_program_id.fetch_add(1, Ordering::Relaxed));
        let label = label.into();
        log::debug!("HeadlessDevice: registered program '{label}' as {id:?}");
        self.inspect().programs.insert(
            id,
            ProgramEntry {
                label,
                interface,
                failure: None,
            },
        );
        id
    }

    /// Replaces the interface of a program, as a shader recompilation would.
    pub fn set_program_interface(&self, program: ShaderProgramId, interface: ShaderInterface) {
        if let Some(entry) = self.inspect().programs.get_mut(&program) {
            entry.interface = interface;
        }
    }

    /// Makes every pipeline construction for `program` fail with `details`.
    pub fn fail_program(&self, program: ShaderProgramId, details: impl Into<String>) {
        if let Some(entry) = self.inspect().programs.get_mut(&program) {
            entry.failure = Some(details.into());
        }
    }

    /// Undoes [`fail_program`](Self::fail_program).
    pub fn heal_program(&self, program: ShaderProgramId) {
        if let Some(entry) = self.inspect().programs.get_mut(&program) {
            entry.failure = None;
        }
    }

    // --- Externally owned resources ---

    /// Creates a texture view, standing in for the asset layer.
    pub fn create_texture_view(&self, label: &str) -> TextureViewId {
        let id = TextureViewId(
            self.internal
                .next_texture_view_id
                .fetch_add(1, Ordering::Relaxed),
        );
        log::trace!("HeadlessDevice: texture view '{label}' is {id:?}");
        self.inspect().texture_views.insert(id);
        id
    }

    /// Creates a sampler, standing in for the asset layer.
    pub fn create_sampler(&self, label: &str) -> SamplerId {
        let id = SamplerId(self.internal.next_sampler_id.fetch_add(1, Ordering::Relaxed));
        log::trace!("HeadlessDevice: sampler '{label}' is {id:?}");
        self.inspect().samplers.insert(id);
        id
    }

    // --- Timeline control ---

    /// Changes when submitted work completes.
    pub fn set_timeline(&self, timeline: GpuTimeline) {
        let mut state = self.inspect();
        state.timeline = timeline;
        state.retire_excess();
        drop(state);
        self.internal.retired.notify_all();
    }

    /// Completes the oldest pending submission. Returns `false` if none.
    pub fn retire_next(&self) -> bool {
        let retired = self.inspect().retire_front();
        self.internal.retired.notify_all();
        retired
    }

    /// Completes every pending submission. Returns how many.
    pub fn retire_all(&self) -> usize {
        let mut state = self.inspect();
        let mut count = 0;
        while state.retire_front() {
            count += 1;
        }
        drop(state);
        self.internal.retired.notify_all();
        count
    }

    /// Makes the next submission fail with `reason`.
    pub fn reject_next_submission(&self, reason: impl Into<String>) {
        self.inspect().reject_next = Some(reason.into());
    }

    // --- Inspection ---

    /// Backend call counts so far.
    pub fn calls(&self) -> CallCounts {
        let c = &self.internal.calls;
        CallCounts {
            create_pipeline: c.create_pipeline.load(Ordering::Relaxed),
            destroy_pipeline: c.destroy_pipeline.load(Ordering::Relaxed),
            shader_interface: c.shader_interface.load(Ordering::Relaxed),
            create_buffer: c.create_buffer.load(Ordering::Relaxed),
            write_buffer: c.write_buffer.load(Ordering::Relaxed),
            destroy_buffer: c.destroy_buffer.load(Ordering::Relaxed),
            create_descriptor_set: c.create_descriptor_set.load(Ordering::Relaxed),
            update_descriptor_set: c.update_descriptor_set.load(Ordering::Relaxed),
            destroy_descriptor_set: c.destroy_descriptor_set.load(Ordering::Relaxed),
            submit: c.submit.load(Ordering::Relaxed),
        }
    }

    /// Every hazard observed so far.
    pub fn hazards(&self) -> Vec<Hazard> {
        self.inspect().hazards.clone()
    }

    /// Every draw executed so far, in execution order.
    pub fn executed_draws(&self) -> Vec<ExecutedDraw> {
        self.inspect().executed.clone()
    }

    /// The commands of every accepted submission, in submission order.
    pub fn submissions(&self) -> Vec<Vec<RecordedCommand>> {
        self.inspect().history.clone()
    }

    /// Submissions not completed yet.
    pub fn pending_submissions(&self) -> usize {
        self.inspect().queue.len()
    }

    /// Command buffers discarded without submission.
    pub fn discarded_command_buffers(&self) -> usize {
        self.inspect().discarded
    }

    /// Returns `true` if the object has been created and not destroyed.
    pub fn is_alive(&self, resource: GpuResource) -> bool {
        self.inspect().is_alive(resource)
    }

    /// Number of live pipelines.
    pub fn live_pipelines(&self) -> usize {
        self.inspect().pipelines.len()
    }

    /// Number of live buffers.
    pub fn live_buffers(&self) -> usize {
        self.inspect().buffers.len()
    }

    /// Number of live descriptor sets.
    pub fn live_descriptor_sets(&self) -> usize {
        self.inspect().descriptor_sets.len()
    }

    /// Current contents of a buffer.
    pub fn buffer_contents(&self, id: BufferId) -> Option<Vec<u8>> {
        self.inspect().buffers.get(&id).map(|b| b.data.clone())
    }

    /// The label a buffer was created with.
    pub fn buffer_label(&self, id: BufferId) -> Option<String> {
        self.inspect().buffers.get(&id).map(|b| b.label.clone())
    }

    /// Current writes of a descriptor set, in binding order.
    pub fn descriptor_writes(&self, id: DescriptorSetId) -> Vec<DescriptorWrite> {
        self.inspect()
            .descriptor_sets
            .get(&id)
            .map(|entry| {
                entry
                    .writes
                    .iter()
                    .map(|(binding, resource)| DescriptorWrite {
                        binding: *binding,
                        resource: *resource,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn register_command_buffer(
        &self,
        label: Option<String>,
        commands: Vec<RecordedCommand>,
    ) -> CommandBufferId {
        let id = CommandBufferId(
            self.internal
                .next_command_buffer_id
                .fetch_add(1, Ordering::Relaxed),
        );
        self.inspect()
            .command_buffers
            .insert(id, FinishedBuffer { label, commands });
        id
    }

    fn generate_pipeline_id(&self) -> PipelineId {
        PipelineId(
            self.internal
                .next_pipeline_id
                .fetch_add(1, Ordering::Relaxed),
        )
    }

    fn generate_buffer_id(&self) -> BufferId {
        BufferId(self.internal.next_buffer_id.fetch_add(1, Ordering::Relaxed))
    }

    fn generate_descriptor_set_id(&self) -> DescriptorSetId {
        DescriptorSetId(
            self.internal
                .next_descriptor_set_id
                .fetch_add(1, Ordering::Relaxed),
        )
    }
}

impl GraphicsDevice for HeadlessDevice {
    fn create_pipeline(
        &self,
        descriptor: &PipelineStateDescriptor,
    ) -> Result<PipelineId, ResourceError> {
        bump(&self.internal.calls.create_pipeline);
        let mut state = self.state()?;
        let program = descriptor.program();
        let entry = state
            .programs
            .get(&program)
            .ok_or(ShaderError::NotFound { id: program })?;

        let stages = &descriptor.stages;
        let bad_entry_point = if stages.vertex_entry_point.is_empty() {
            Some(&stages.vertex_entry_point)
        } else {
            stages.fragment_entry_point.as_ref().filter(|e| e.is_empty())
        };
        if let Some(entry_point) = bad_entry_point {
            return Err(ShaderError::InvalidEntryPoint {
                id: program,
                entry_point: entry_point.clone(),
            }
            .into());
        }
        if let Some(details) = &entry.failure {
            return Err(PipelineError::CompilationFailed {
                program,
                details: details.clone(),
            }
            .into());
        }
        if let Some(target) = descriptor.color_targets.iter().find(|t| t.format.is_depth()) {
            return Err(PipelineError::IncompatibleColorTarget(format!(
                "{:?} is a depth format",
                target.format
            ))
            .into());
        }
        if let Some(ds) = descriptor.depth_stencil.filter(|ds| !ds.format.is_depth()) {
            return Err(PipelineError::IncompatibleDepthStencilFormat(format!(
                "{:?} has no depth aspect",
                ds.format
            ))
            .into());
        }

        let label = entry.label.clone();
        let id = self.generate_pipeline_id();
        state.pipelines.insert(id, program);
        log::debug!("HeadlessDevice: created {id:?} for program '{label}'");
        Ok(id)
    }

    fn destroy_pipeline(&self, id: PipelineId) -> Result<(), ResourceError> {
        bump(&self.internal.calls.destroy_pipeline);
        let mut state = self.state()?;
        state.check_hazard(HazardKind::DestroyInFlight, id.into());
        state
            .pipelines
            .remove(&id)
            .map(|_| ())
            .ok_or(ResourceError::NotFound)
    }

    fn shader_interface(&self, program: ShaderProgramId) -> Result<ShaderInterface, ResourceError> {
        bump(&self.internal.calls.shader_interface);
        let state = self.state()?;
        state
            .programs
            .get(&program)
            .map(|entry| entry.interface.clone())
            .ok_or_else(|| ShaderError::NotFound { id: program }.into())
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferId, ResourceError> {
        bump(&self.internal.calls.create_buffer);
        let size = usize::try_from(descriptor.size).map_err(|_| ResourceError::OutOfMemory)?;
        let id = self.generate_buffer_id();
        self.state()?.buffers.insert(
            id,
            BufferEntry {
                label: descriptor.label.clone(),
                usage: descriptor.usage,
                data: vec![0; size],
            },
        );
        log::trace!(
            "HeadlessDevice: created {:?} '{}' ({} bytes)",
            id,
            descriptor.label,
            descriptor.size
        );
        Ok(id)
    }

    fn write_buffer(&self, id: BufferId, offset: u64, data: &[u8]) -> Result<(), ResourceError> {
        bump(&self.internal.calls.write_buffer);
        let mut state = self.state()?;
        state.check_hazard(HazardKind::WriteInFlight, id.into());
        let entry = state.buffers.get_mut(&id).ok_or(ResourceError::NotFound)?;
        if !entry.usage.contains(BufferUsage::COPY_DST) {
            return Err(ResourceError::BackendError(format!(
                "buffer '{}' was not created with COPY_DST",
                entry.label
            )));
        }
        let size = entry.data.len() as u64;
        let len = data.len() as u64;
        if offset + len > size {
            return Err(ResourceError::OutOfBounds { offset, len, size });
        }
        let start = offset as usize;
        entry.data[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn destroy_buffer(&self, id: BufferId) -> Result<(), ResourceError> {
        bump(&self.internal.calls.destroy_buffer);
        let mut state = self.state()?;
        state.check_hazard(HazardKind::DestroyInFlight, id.into());
        state
            .buffers
            .remove(&id)
            .map(|_| ())
            .ok_or(ResourceError::NotFound)
    }

    fn create_descriptor_set(
        &self,
        descriptor: &DescriptorSetDescriptor,
    ) -> Result<DescriptorSetId, ResourceError> {
        bump(&self.internal.calls.create_descriptor_set);
        let mut state = self.state()?;
        if !state.pipelines.contains_key(&descriptor.pipeline) {
            return Err(PipelineError::InvalidPipeline {
                id: descriptor.pipeline,
            }
            .into());
        }
        let max = self.internal.limits.max_bound_descriptor_sets;
        if descriptor.set >= max {
            return Err(PipelineError::TooManyDescriptorSets {
                requested: descriptor.set + 1,
                max,
            }
            .into());
        }
        let id = self.generate_descriptor_set_id();
        state.descriptor_sets.insert(
            id,
            DescriptorSetEntry {
                entries: descriptor.entries.to_vec(),
                writes: BTreeMap::new(),
            },
        );
        log::trace!("HeadlessDevice: created {:?} '{}'", id, descriptor.label);
        Ok(id)
    }

    fn update_descriptor_set(
        &self,
        id: DescriptorSetId,
        writes: &[DescriptorWrite],
    ) -> Result<(), ResourceError> {
        bump(&self.internal.calls.update_descriptor_set);
        let mut state = self.state()?;
        state.check_hazard(HazardKind::UpdateInFlight, id.into());

        for write in writes {
            let known = match write.resource {
                DescriptorResource::UniformBuffer { buffer, .. } => {
                    state.buffers.contains_key(&buffer)
                }
                DescriptorResource::CombinedImageSampler { view, sampler } => {
                    state.texture_views.contains(&view) && state.samplers.contains(&sampler)
                }
            };
            if !known {
                return Err(ResourceError::NotFound);
            }
        }

        let entry = state
            .descriptor_sets
            .get_mut(&id)
            .ok_or(ResourceError::NotFound)?;
        for write in writes {
            let expected = entry
                .entries
                .iter()
                .find(|(binding, _)| *binding == write.binding)
                .map(|(_, kind)| *kind);
            if expected != Some(write.resource.kind()) {
                return Err(ResourceError::BackendError(format!(
                    "binding {} of {:?} expects {:?}, got {:?}",
                    write.binding,
                    id,
                    expected,
                    write.resource.kind()
                )));
            }
            entry.writes.insert(write.binding, write.resource);
        }
        Ok(())
    }

    fn destroy_descriptor_set(&self, id: DescriptorSetId) -> Result<(), ResourceError> {
        bump(&self.internal.calls.destroy_descriptor_set);
        let mut state = self.state()?;
        state.check_hazard(HazardKind::DestroyInFlight, id.into());
        state
            .descriptor_sets
            .remove(&id)
            .map(|_| ())
            .ok_or(ResourceError::NotFound)
    }

    fn create_command_recorder(&self, label: Option<&str>) -> Box<dyn CommandRecorder> {
        Box::new(HeadlessRecorder {
            label: label.map(str::to_owned),
            commands: Vec::new(),
            device: self.clone(),
        })
    }

    fn submit(&self, command_buffer: CommandBufferId) -> Result<FenceId, ResourceError> {
        bump(&self.internal.calls.submit);
        let mut state = self.state()?;
        let buffer = state
            .command_buffers
            .remove(&command_buffer)
            .ok_or(ResourceError::InvalidHandle)?;
        if let Some(reason) = state.reject_next.take() {
            log::warn!("HeadlessDevice: rejecting {command_buffer:?}: {reason}");
            return Err(ResourceError::SubmissionRejected(reason));
        }

        state.submitted += 1;
        let index = state.submitted;
        let references = state.references_of(&buffer.commands);
        let unknown: Vec<GpuResource> = references
            .iter()
            .copied()
            .filter(|r| !state.is_alive(*r))
            .collect();
        for resource in unknown {
            log::error!("HeadlessDevice: submission {index} references unknown {resource:?}");
            state.hazards.push(Hazard {
                kind: HazardKind::UnknownResource,
                resource,
                submission: index,
            });
        }

        let fence = FenceId(self.internal.next_fence_id.fetch_add(1, Ordering::Relaxed));
        state.fences.insert(fence, index);
        state.history.push(buffer.commands.clone());
        state.queue.push_back(Submission {
            index,
            label: buffer.label,
            commands: buffer.commands,
            references,
        });
        state.retire_excess();
        drop(state);
        self.internal.retired.notify_all();
        Ok(fence)
    }

    fn discard_command_buffer(&self, command_buffer: CommandBufferId) {
        let mut state = self.inspect();
        if state.command_buffers.remove(&command_buffer).is_some() {
            state.discarded += 1;
        }
    }

    fn is_fence_signaled(&self, fence: FenceId) -> bool {
        let state = self.inspect();
        state
            .fences
            .get(&fence)
            .is_none_or(|index| *index <= state.completed)
    }

    fn wait_for_fence(&self, fence: FenceId, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.inspect();
        loop {
            let Some(&index) = state.fences.get(&fence) else {
                return true;
            };
            if index <= state.completed {
                return true;
            }
            if state.timeline.completes_on_wait() {
                while state.completed < index && state.retire_front() {}
                drop(state);
                self.internal.retired.notify_all();
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .internal
                .retired
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn destroy_fence(&self, fence: FenceId) {
        self.inspect().fences.remove(&fence);
    }

    fn adapter_info(&self) -> GraphicsAdapterInfo {
        GraphicsAdapterInfo {
            name: "Tessera Headless".to_owned(),
            backend_type: GraphicsBackendType::Headless,
            device_type: RendererDeviceType::Cpu,
            limits: self.internal.limits,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::renderer::InterfaceBinding;

    fn new_device() -> HeadlessDevice {
        let _ = env_logger::builder().is_test(true).try_init();
        HeadlessDevice::new()
    }

    fn device_with_program() -> (HeadlessDevice, ShaderProgramId) {
        let device = new_device();
        let program = device.register_program(
            "unlit",
            ShaderInterface::new(vec![InterfaceBinding::uniform("transform", 0, 0, 16)]),
        );
        (device, program)
    }

    /// Builds a pipeline, a uniform buffer holding `value` and a set pointing at it.
    fn uniform_setup(
        device: &HeadlessDevice,
        program: ShaderProgramId,
        value: u32,
    ) -> (PipelineId, BufferId, DescriptorSetId) {
        let pipeline = device
            .create_pipeline(&PipelineStateDescriptor::new(program))
            .unwrap();
        let buffer = device
            .create_buffer(&BufferDescriptor::uniform("ubo", 16))
            .unwrap();
        device
            .write_buffer(buffer, 0, bytemuck::bytes_of(&value))
            .unwrap();
        let set = device
            .create_descriptor_set(&DescriptorSetDescriptor {
                label: "set 0",
                pipeline,
                set: 0,
                entries: &[(0, BindingKind::UniformBuffer)],
            })
            .unwrap();
        device
            .update_descriptor_set(set, &[DescriptorWrite::uniform(0, buffer, 0, 16)])
            .unwrap();
        (pipeline, buffer, set)
    }

    fn submit_draw(
        device: &HeadlessDevice,
        pipeline: PipelineId,
        set: DescriptorSetId,
    ) -> FenceId {
        let mut recorder = device.create_command_recorder(Some("test"));
        recorder.bind_pipeline(pipeline);
        recorder.bind_descriptor_set(0, set);
        recorder.draw(0..3, 0..1);
        device.submit(recorder.finish()).unwrap()
    }

    #[test]
    fn test_pipeline_creation_errors() {
        let (device, program) = device_with_program();

        let unknown = device.create_pipeline(&PipelineStateDescriptor::new(ShaderProgramId(99)));
        assert!(matches!(
            unknown,
            Err(ResourceError::Shader(ShaderError::NotFound { .. }))
        ));

        device.fail_program(program, "missing varying");
        let failed = device.create_pipeline(&PipelineStateDescriptor::new(program));
        assert!(matches!(
            failed,
            Err(ResourceError::Pipeline(PipelineError::CompilationFailed { .. }))
        ));

        device.heal_program(program);
        assert!(device
            .create_pipeline(&PipelineStateDescriptor::new(program))
            .is_ok());
        assert_eq!(device.calls().create_pipeline, 3);
        assert_eq!(device.live_pipelines(), 1);
    }

    #[test]
    fn test_write_out_of_bounds_is_rejected() {
        let device = new_device();
        let buffer = device
            .create_buffer(&BufferDescriptor::uniform("small", 4))
            .unwrap();
        assert_eq!(
            device.write_buffer(buffer, 2, &[0; 4]),
            Err(ResourceError::OutOfBounds {
                offset: 2,
                len: 4,
                size: 4
            })
        );
    }

    #[test]
    fn test_draws_read_uniforms_when_they_execute() {
        let (device, program) = device_with_program();
        device.set_timeline(GpuTimeline::Manual);
        let (pipeline, buffer, set) = uniform_setup(&device, program, 7);

        let fence = submit_draw(&device, pipeline, set);
        assert!(!device.is_fence_signaled(fence));
        assert_eq!(device.pending_submissions(), 1);

        // Overwriting the buffer before the GPU caught up is a hazard, and the
        // draw sees the new value.
        device
            .write_buffer(buffer, 0, bytemuck::bytes_of(&8u32))
            .unwrap();
        assert_eq!(device.hazards().len(), 1);
        assert_eq!(device.hazards()[0].kind, HazardKind::WriteInFlight);

        assert!(device.retire_next());
        assert!(device.is_fence_signaled(fence));
        let draws = device.executed_draws();
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].uniform(0, 0).and_then(|u| u.read::<u32>()), Some(8));
    }

    #[test]
    fn test_manual_wait_times_out_and_latency_wait_completes() {
        let (device, program) = device_with_program();
        let (pipeline, _, set) = uniform_setup(&device, program, 1);

        device.set_timeline(GpuTimeline::Manual);
        let fence = submit_draw(&device, pipeline, set);
        assert!(!device.wait_for_fence(fence, Duration::from_millis(5)));

        device.set_timeline(GpuTimeline::Latency(4));
        let second = submit_draw(&device, pipeline, set);
        assert!(!device.is_fence_signaled(second));
        assert!(device.wait_for_fence(second, Duration::ZERO));
        assert!(device.is_fence_signaled(fence));
        assert_eq!(device.pending_submissions(), 0);
    }

    #[test]
    fn test_manual_wait_wakes_when_another_thread_retires() {
        let (device, program) = device_with_program();
        device.set_timeline(GpuTimeline::Manual);
        let (pipeline, _, set) = uniform_setup(&device, program, 1);
        let fence = submit_draw(&device, pipeline, set);

        let gpu = device.clone();
        let worker = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            gpu.retire_all()
        });
        assert!(device.wait_for_fence(fence, Duration::from_secs(5)));
        assert_eq!(worker.join().unwrap(), 1);
    }

    #[test]
    fn test_rejected_submission_executes_nothing() {
        let (device, program) = device_with_program();
        let (pipeline, _, set) = uniform_setup(&device, program, 1);

        device.reject_next_submission("device lost");
        let mut recorder = device.create_command_recorder(None);
        recorder.bind_pipeline(pipeline);
        recorder.bind_descriptor_set(0, set);
        recorder.draw(0..3, 0..1);
        let result = device.submit(recorder.finish());

        assert_eq!(
            result,
            Err(ResourceError::SubmissionRejected("device lost".to_owned()))
        );
        assert!(device.executed_draws().is_empty());
        assert!(device.submissions().is_empty());
    }

    #[test]
    fn test_descriptor_kind_is_checked() {
        let (device, program) = device_with_program();
        let (_, _, set) = uniform_setup(&device, program, 1);
        let view = device.create_texture_view("albedo");
        let sampler = device.create_sampler("linear");

        let result = device.update_descriptor_set(set, &[DescriptorWrite::texture(0, view, sampler)]);
        assert!(matches!(result, Err(ResourceError::BackendError(_))));
    }

    #[test]
    fn test_destroying_in_flight_resource_is_a_hazard() {
        let (device, program) = device_with_program();
        device.set_timeline(GpuTimeline::Manual);
        let (pipeline, buffer, set) = uniform_setup(&device, program, 1);
        submit_draw(&device, pipeline, set);

        device.destroy_buffer(buffer).unwrap();
        let hazards = device.hazards();
        assert_eq!(hazards.len(), 1);
        assert_eq!(hazards[0].kind, HazardKind::DestroyInFlight);
        assert_eq!(hazards[0].resource, GpuResource::Buffer(buffer));
        assert!(!device.is_alive(GpuResource::Buffer(buffer)));
    }
}
