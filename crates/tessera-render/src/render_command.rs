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

//! The render command: the persistent unit of work for one draw item.
//!
//! A command is created the first time its draw item is seen and reused on
//! every later frame until the item is removed. Each frame the controller
//! drives it through four phases, in order:
//!
//! 1. [`prepare_resources`](RenderCommand::prepare_resources) resolves the
//!    pipeline and (re)allocates the frame resource ring. It is a no-op when
//!    nothing changed since the last call.
//! 2. [`bind_uniform_buffers`](RenderCommand::bind_uniform_buffers) claims a
//!    retired ring slot and writes uniform data into it.
//! 3. [`bind_textures_and_samplers`](RenderCommand::bind_textures_and_samplers)
//!    writes texture entries into the same slot's descriptor sets.
//! 4. [`bind_pipeline`](RenderCommand::bind_pipeline) records the binds and the
//!    draw into the frame's command buffer.

use std::sync::Arc;
use tessera_core::renderer::{
    DescriptorSetId, DescriptorWrite, FrameSerial, GraphicsDevice, PipelineError,
    PipelineStateDescriptor, ReleaseSender, ResourceError,
};

use crate::binder::{BindingMismatch, DescriptorBinder, ResolvedBindings, UniformLayout};
use crate::command_buffer::CommandBuffer;
use crate::config::RendererConfig;
use crate::draw_item::{DrawItem, DrawItemId, Geometry, TextureBinding, UniformBlockData};
use crate::error::CommandError;
use crate::frame::FrameTracker;
use crate::pipeline_cache::{Pipeline, PipelineCache};
use crate::ring::{FrameResourceRing, FrameSlot, SlotLayout};

/// Shared state needed to prepare render commands.
///
/// Everything here is `Sync`, so commands can be prepared from several threads.
#[derive(Clone, Copy)]
pub struct PrepareContext<'a> {
    /// The backend.
    pub device: &'a dyn GraphicsDevice,
    /// The pipeline cache.
    pub cache: &'a PipelineCache,
    /// Where released handles go.
    pub releaser: &'a ReleaseSender,
    /// Renderer configuration.
    pub config: &'a RendererConfig,
    /// The binder, with the effective uniform alignment.
    pub binder: DescriptorBinder,
}

/// Per-frame state needed to bind and record render commands.
#[derive(Clone, Copy)]
pub struct FrameContext<'a> {
    /// The frame being recorded.
    pub serial: FrameSerial,
    /// The backend.
    pub device: &'a dyn GraphicsDevice,
    /// Submitted frames, for slot retirement checks.
    pub tracker: &'a FrameTracker,
    /// Where released handles go.
    pub releaser: &'a ReleaseSender,
    /// Renderer configuration.
    pub config: &'a RendererConfig,
    /// The binder, with the effective uniform alignment.
    pub binder: DescriptorBinder,
}

#[derive(Debug, Clone)]
enum State {
    Unprepared,
    Ready,
    Invalid(CommandError),
}

/// One draw call, persistent across frames.
#[derive(Debug)]
pub struct RenderCommand {
    id: DrawItemId,
    label: String,
    descriptor: PipelineStateDescriptor,
    uniforms: Vec<UniformBlockData>,
    textures: Vec<TextureBinding>,
    geometry: Geometry,

    pipeline: Option<Arc<Pipeline>>,
    layout: UniformLayout,
    resolved: ResolvedBindings,
    ring: Option<FrameResourceRing>,

    uniform_version: u64,
    binding_version: u64,
    dirty: bool,
    state: State,
}

impl RenderCommand {
    /// Creates the command for a newly seen draw item.
    pub fn new(item: &DrawItem) -> Self {
        Self {
            id: item.id,
            label: item.label.clone(),
            descriptor: item.pipeline.clone(),
            uniforms: item.uniforms.clone(),
            textures: item.textures.clone(),
            geometry: item.geometry.clone(),
            pipeline: None,
            layout: UniformLayout::default(),
            resolved: ResolvedBindings::default(),
            ring: None,
            uniform_version: 1,
            binding_version: 1,
            dirty: true,
            state: State::Unprepared,
        }
    }

    /// Takes this frame's version of the draw item.
    ///
    /// Marks the command dirty if its pipeline state or bindings changed.
    /// Uniform data changes bump the uniform version so every ring slot is
    /// rewritten when next claimed; texture changes do the same for descriptor
    /// entries. Returns `true` if anything changed.
    pub fn update(&mut self, item: &DrawItem) -> bool {
        let mut changed = false;
        if self.descriptor != item.pipeline {
            self.descriptor = item.pipeline.clone();
            self.dirty = true;
            changed = true;
        }
        if self.uniforms != item.uniforms {
            self.uniforms.clone_from(&item.uniforms);
            self.uniform_version += 1;
            self.dirty = true;
            changed = true;
        }
        if self.textures != item.textures {
            self.textures.clone_from(&item.textures);
            self.binding_version += 1;
            self.dirty = true;
            changed = true;
        }
        if self.geometry != item.geometry {
            self.geometry = item.geometry.clone();
            changed = true;
        }
        if self.label != item.label {
            self.label.clone_from(&item.label);
        }
        changed
    }

    /// Makes sure the command has a valid pipeline and resources for its
    /// current state.
    ///
    /// If the cached pipeline is stale (the state changed, or the cache
    /// invalidated it) a new one is requested and the frame resource ring is
    /// reallocated for the new binding layout. Calling this again with no
    /// state change in between makes no backend call.
    ///
    /// A construction failure marks the command invalid; it records nothing
    /// until a later preparation succeeds.
    pub fn prepare_resources(&mut self, ctx: &PrepareContext<'_>) -> Result<(), CommandError> {
        let pipeline_current = self
            .pipeline
            .as_ref()
            .is_some_and(|p| p.is_valid() && p.descriptor() == &self.descriptor);

        if pipeline_current && !self.dirty && matches!(self.state, State::Ready) {
            return Ok(());
        }

        if !pipeline_current {
            let pipeline = match ctx.cache.get_or_create(&self.descriptor) {
                Ok(pipeline) => pipeline,
                Err(err) => return Err(self.invalidate(err)),
            };
            if let Err(err) = self.install(pipeline, ctx) {
                return Err(self.invalidate(err));
            }
        }

        if let Some(pipeline) = &self.pipeline {
            self.resolved = ctx.binder.resolve(
                &self.label,
                pipeline.interface(),
                &self.layout,
                &self.uniforms,
                &self.textures,
            );
        }
        self.dirty = false;
        self.state = State::Ready;
        Ok(())
    }

    /// Claims a ring slot for the frame and writes uniform data and uniform
    /// descriptor entries into it.
    ///
    /// Only a slot whose last frame has retired is written. Data is rewritten
    /// only if the slot holds an older uniform version.
    pub fn bind_uniform_buffers(&mut self, ctx: &FrameContext<'_>) -> Result<(), CommandError> {
        if !matches!(self.state, State::Ready) {
            return Err(CommandError::NotPrepared);
        }
        let index = self.acquire_clean_slot(ctx)?;
        let Some(ring) = self.ring.as_mut() else {
            return Err(CommandError::NotPrepared);
        };
        let slot = ring.slot_mut(index);

        let Some(buffer) = slot.uniform_buffer().map(|b| b.id()) else {
            return Ok(());
        };

        if slot.uniform_version != self.uniform_version {
            // The whole image is rewritten so blocks no longer supplied read zero.
            let mut image = vec![0u8; self.layout.total_size as usize];
            for resolved in &self.resolved.uniforms {
                let block = &self.layout.blocks[resolved.block];
                let bytes = &self.uniforms[resolved.source].bytes;
                let start = block.offset as usize;
                if let Some(dst) = image.get_mut(start..start + bytes.len()) {
                    dst.copy_from_slice(bytes);
                }
            }
            ctx.device.write_buffer(buffer, 0, &image)?;
            slot.uniform_version = self.uniform_version;
        }

        if !slot.uniform_sets_written {
            let writes = ctx.binder.uniform_writes(&self.layout, buffer);
            write_sets(ctx.device, slot, &writes)?;
            slot.uniform_sets_written = true;
        }
        Ok(())
    }

    /// Writes texture and sampler entries into the slot claimed for the frame.
    pub fn bind_textures_and_samplers(
        &mut self,
        ctx: &FrameContext<'_>,
    ) -> Result<(), CommandError> {
        if !matches!(self.state, State::Ready) {
            return Err(CommandError::NotPrepared);
        }
        let index = self.acquire_clean_slot(ctx)?;
        let Some(ring) = self.ring.as_mut() else {
            return Err(CommandError::NotPrepared);
        };
        let slot = ring.slot_mut(index);

        if slot.binding_version != self.binding_version {
            let writes = ctx.binder.texture_writes(&self.resolved.textures);
            write_sets(ctx.device, slot, &writes)?;
            slot.texture_entries = self
                .resolved
                .textures
                .iter()
                .map(|t| (t.set, t.binding))
                .collect();
            slot.binding_version = self.binding_version;
        }
        Ok(())
    }

    /// Claims the frame's slot and drops descriptor sets still holding a
    /// texture the current bindings no longer name.
    fn acquire_clean_slot(&mut self, ctx: &FrameContext<'_>) -> Result<usize, CommandError> {
        let ring = self.ring.as_mut().ok_or(CommandError::NotPrepared)?;
        let index = ring.acquire(ctx)?;
        if ring.slot_mut(index).binding_version != self.binding_version {
            let keep: Vec<(u32, u32)> = self
                .resolved
                .textures
                .iter()
                .map(|t| (t.set, t.binding))
                .collect();
            ring.drop_stale_entries(index, &keep, ctx.device, ctx.releaser)?;
        }
        Ok(index)
    }

    /// Records the pipeline bind, descriptor set binds, geometry binds and the
    /// draw call into `command_buffer`.
    ///
    /// The command itself is not modified; the only state touched is the
    /// command buffer and the last-use stamps of the shared handles.
    pub fn bind_pipeline(&self, command_buffer: &CommandBuffer) -> Result<(), CommandError> {
        if !matches!(self.state, State::Ready) {
            return Err(CommandError::NotPrepared);
        }
        let serial = command_buffer.serial();
        let pipeline = self.pipeline.as_ref().ok_or(CommandError::NotPrepared)?;
        let slot = self
            .ring
            .as_ref()
            .and_then(|ring| ring.current(serial))
            .ok_or(CommandError::NotPrepared)?;
        let geometry = &self.geometry;

        command_buffer
            .record(|recorder| {
                recorder.bind_pipeline(pipeline.id());
                for (index, set) in slot.descriptor_sets() {
                    recorder.bind_descriptor_set(*index, set.id());
                }
                for (vb_slot, (buffer, offset)) in geometry.vertex_buffers.iter().enumerate() {
                    recorder.bind_vertex_buffer(vb_slot as u32, *buffer, *offset);
                }
                match geometry.index {
                    Some(index) => {
                        recorder.bind_index_buffer(index.buffer, index.offset, index.format);
                        recorder.draw_indexed(
                            geometry.elements.clone(),
                            geometry.base_vertex,
                            geometry.instances.clone(),
                        );
                    }
                    None => recorder.draw(geometry.elements.clone(), geometry.instances.clone()),
                }
            })
            .map_err(|_| CommandError::Finished(serial))?;

        pipeline.handle().mark_used(serial);
        if let Some(buffer) = slot.uniform_buffer() {
            buffer.mark_used(serial);
        }
        for (_, set) in slot.descriptor_sets() {
            set.mark_used(serial);
        }
        command_buffer.count_draw();
        log::trace!("RenderCommand: '{}' recorded into frame {}", self.label, serial);
        Ok(())
    }

    /// The draw item this command renders.
    pub fn id(&self) -> DrawItemId {
        self.id
    }

    /// The debug label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The resolved pipeline, if preparation succeeded.
    pub fn pipeline(&self) -> Option<&Arc<Pipeline>> {
        self.pipeline.as_ref()
    }

    /// The descriptor sets claimed for frame `serial`, in set order.
    pub fn descriptor_sets(&self, serial: FrameSerial) -> Vec<DescriptorSetId> {
        self.ring
            .as_ref()
            .and_then(|ring| ring.current(serial))
            .map(|slot| slot.descriptor_sets().iter().map(|(_, s)| s.id()).collect())
            .unwrap_or_default()
    }

    /// The frame resource ring, once allocated.
    pub fn ring(&self) -> Option<&FrameResourceRing> {
        self.ring.as_ref()
    }

    /// Bindings skipped during the last resolution.
    pub fn mismatches(&self) -> &[BindingMismatch] {
        &self.resolved.mismatches
    }

    /// Returns `true` if state changed since the last successful preparation.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Returns `true` if the last preparation succeeded.
    pub fn is_ready(&self) -> bool {
        matches!(self.state, State::Ready)
    }

    /// The error that made the command invalid, if any.
    pub fn error(&self) -> Option<&CommandError> {
        match &self.state {
            State::Invalid(err) => Some(err),
            _ => None,
        }
    }

    fn install(
        &mut self,
        pipeline: Arc<Pipeline>,
        ctx: &PrepareContext<'_>,
    ) -> Result<(), ResourceError> {
        let unchanged_layout = self.pipeline.as_ref().is_some_and(|old| {
            old.id() == pipeline.id() && old.interface() == pipeline.interface()
        });
        if !unchanged_layout || self.ring.is_none() {
            let layout = ctx.binder.layout(pipeline.interface());
            let slot_layout = SlotLayout::new(pipeline.id(), pipeline.interface(), layout.total_size);
            // The old ring's handles go through the release queue and outlive
            // any frame still reading them.
            self.ring = None;
            let ring = FrameResourceRing::new(
                &self.label,
                slot_layout,
                ctx.config.frames_in_flight,
                ctx.device,
                ctx.releaser,
            )?;
            self.layout = layout;
            self.ring = Some(ring);
        }
        log::debug!(
            "RenderCommand: '{}' now uses {:?}",
            self.label,
            pipeline.id()
        );
        self.pipeline = Some(pipeline);
        Ok(())
    }

    fn invalidate(&mut self, err: ResourceError) -> CommandError {
        match &err {
            ResourceError::Pipeline(PipelineError::PreviouslyFailed { .. }) => {
                log::debug!("RenderCommand: '{}' skipped, {}", self.label, err);
            }
            _ => log::error!("RenderCommand: '{}' is invalid: {}", self.label, err),
        }
        self.pipeline = None;
        self.ring = None;
        self.resolved = ResolvedBindings::default();
        let err = CommandError::Construction(err);
        self.state = State::Invalid(err.clone());
        err
    }
}

fn write_sets(
    device: &dyn GraphicsDevice,
    slot: &FrameSlot,
    writes: &[(u32, DescriptorWrite)],
) -> Result<(), ResourceError> {
    for (index, set) in slot.descriptor_sets() {
        let batch: Vec<DescriptorWrite> = writes
            .iter()
            .filter(|(s, _)| s == index)
            .map(|(_, w)| *w)
            .collect();
        if !batch.is_empty() {
            device.update_descriptor_set(set.id(), &batch)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draw_item::Geometry;
    use tessera_core::renderer::{
        BlendStateDescriptor, InterfaceBinding, ReleaseQueue, ShaderInterface, ShaderProgramId,
    };
    use tessera_infra::{HeadlessDevice, RecordedCommand};

    struct Fixture {
        device: HeadlessDevice,
        cache: PipelineCache,
        _queue: ReleaseQueue,
        releaser: ReleaseSender,
        config: RendererConfig,
        tracker: FrameTracker,
    }

    impl Fixture {
        fn new() -> Self {
            let device = HeadlessDevice::new();
            let queue = ReleaseQueue::new();
            let releaser = queue.sender();
            Self {
                cache: PipelineCache::new(Arc::new(device.clone()), releaser.clone()),
                device,
                _queue: queue,
                releaser,
                config: RendererConfig::default(),
                tracker: FrameTracker::new(),
            }
        }

        fn program(&self, bindings: Vec<InterfaceBinding>) -> ShaderProgramId {
            self.device
                .register_program("test", ShaderInterface::new(bindings))
        }

        fn prepare_ctx(&self) -> PrepareContext<'_> {
            PrepareContext {
                device: &self.device,
                cache: &self.cache,
                releaser: &self.releaser,
                config: &self.config,
                binder: DescriptorBinder::new(256),
            }
        }

        fn frame_ctx(&self, serial: u64) -> FrameContext<'_> {
            FrameContext {
                serial: FrameSerial(serial),
                device: &self.device,
                tracker: &self.tracker,
                releaser: &self.releaser,
                config: &self.config,
                binder: DescriptorBinder::new(256),
            }
        }
    }

    fn item(program: ShaderProgramId, value: u32) -> DrawItem {
        DrawItem::new(
            DrawItemId(1),
            "quad",
            PipelineStateDescriptor::new(program),
            Geometry::procedural(6),
        )
        .with_uniform(UniformBlockData::from_pod("transform", &value))
    }

    #[test]
    fn test_prepare_is_idempotent() {
        let fixture = Fixture::new();
        let program = fixture.program(vec![InterfaceBinding::uniform("transform", 0, 0, 16)]);
        let mut command = RenderCommand::new(&item(program, 1));

        command.prepare_resources(&fixture.prepare_ctx()).unwrap();
        assert!(command.is_ready());
        assert!(!command.is_dirty());
        let calls = fixture.device.calls();

        command.prepare_resources(&fixture.prepare_ctx()).unwrap();
        assert_eq!(fixture.device.calls(), calls);
    }

    #[test]
    fn test_uniform_change_is_written_to_the_next_slot() {
        let fixture = Fixture::new();
        let program = fixture.program(vec![InterfaceBinding::uniform("transform", 0, 0, 16)]);
        let mut command = RenderCommand::new(&item(program, 1));
        command.prepare_resources(&fixture.prepare_ctx()).unwrap();
        command.bind_uniform_buffers(&fixture.frame_ctx(1)).unwrap();
        assert_eq!(fixture.device.calls().write_buffer, 1);

        assert!(command.update(&item(program, 2)));
        assert!(command.is_dirty());
        let before = fixture.device.calls();
        command.prepare_resources(&fixture.prepare_ctx()).unwrap();
        assert_eq!(fixture.device.calls(), before);

        command.bind_uniform_buffers(&fixture.frame_ctx(2)).unwrap();
        let slot = command.ring().unwrap().current(FrameSerial(2)).unwrap();
        let buffer = slot.uniform_buffer().unwrap().id();
        let contents = fixture.device.buffer_contents(buffer).unwrap();
        assert_eq!(&contents[..4], bytemuck::bytes_of(&2u32));
    }

    #[test]
    fn test_state_change_builds_a_new_pipeline_and_ring() {
        let fixture = Fixture::new();
        let program = fixture.program(vec![InterfaceBinding::uniform("transform", 0, 0, 16)]);
        let mut command = RenderCommand::new(&item(program, 1));
        command.prepare_resources(&fixture.prepare_ctx()).unwrap();
        let first = command.pipeline().map(|p| p.id());

        let mut blended = item(program, 1);
        blended.pipeline = blended
            .pipeline
            .with_blend(Some(BlendStateDescriptor::ADDITIVE));
        command.update(&blended);
        command.prepare_resources(&fixture.prepare_ctx()).unwrap();

        assert_ne!(command.pipeline().map(|p| p.id()), first);
        assert_eq!(fixture.device.calls().create_pipeline, 2);
        assert_eq!(fixture.device.calls().create_descriptor_set, 4);
    }

    #[test]
    fn test_failed_command_records_nothing() {
        let fixture = Fixture::new();
        let program = fixture.program(Vec::new());
        fixture.device.fail_program(program, "link error");
        let mut command = RenderCommand::new(&item(program, 1));

        let err = command.prepare_resources(&fixture.prepare_ctx()).unwrap_err();
        assert!(matches!(err, CommandError::Construction(_)));
        assert!(command.error().is_some());
        assert!(matches!(
            command.bind_uniform_buffers(&fixture.frame_ctx(1)),
            Err(CommandError::NotPrepared)
        ));

        let cb = CommandBuffer::new(
            FrameSerial(1),
            fixture.device.create_command_recorder(None),
        );
        assert!(matches!(
            command.bind_pipeline(&cb),
            Err(CommandError::NotPrepared)
        ));
        assert_eq!(cb.draw_count(), 0);
    }

    #[test]
    fn test_pipeline_only_draw_records_bind_and_draw() {
        let fixture = Fixture::new();
        let program = fixture.program(Vec::new());
        let quad = DrawItem::new(
            DrawItemId(3),
            "fullscreen",
            PipelineStateDescriptor::new(program),
            Geometry::procedural(3),
        );
        let mut command = RenderCommand::new(&quad);
        let ctx = fixture.frame_ctx(1);
        command.prepare_resources(&fixture.prepare_ctx()).unwrap();
        command.bind_uniform_buffers(&ctx).unwrap();
        command.bind_textures_and_samplers(&ctx).unwrap();

        let cb = CommandBuffer::new(
            FrameSerial(1),
            fixture.device.create_command_recorder(None),
        );
        command.bind_pipeline(&cb).unwrap();
        fixture.device.submit(cb.finish().unwrap()).unwrap();

        let pipeline = command.pipeline().unwrap().id();
        assert_eq!(
            fixture.device.submissions(),
            vec![vec![
                RecordedCommand::BindPipeline(pipeline),
                RecordedCommand::Draw {
                    vertices: 0..3,
                    instances: 0..1
                },
            ]]
        );
        assert_eq!(command.pipeline().unwrap().handle().last_use(), FrameSerial(1));
    }
}
