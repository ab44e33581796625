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

//! Per-command ring of frame resource slots.
//!
//! A render command never rewrites a uniform buffer or descriptor set that a
//! submitted, unretired frame may still read. Instead it owns a small ring of
//! slots, each with its own uniform buffer and descriptor sets, and claims the
//! next slot whose last using frame has retired:
//!
//! ```text
//! frame N     slot 0 ◄── GPU reading
//! frame N+1   slot 1 ◄── CPU writing
//! frame N+2   slot 0 ◄── reused only once frame N retired
//! ```
//!
//! When every slot is still in flight the [`ExhaustionPolicy`] decides between a
//! bounded fence wait and growing the ring.

use std::fmt;
use std::time::Instant;
use tessera_core::renderer::{
    BindingKind, BufferDescriptor, DescriptorSetDescriptor, FrameSerial, GraphicsDevice,
    PipelineId, RefCountedBuffer, RefCountedDescriptorSet, ReleaseSender, ResourceError,
    ShaderInterface,
};

use crate::config::ExhaustionPolicy;
use crate::error::CommandError;
use crate::render_command::FrameContext;

/// What each slot of a ring has to contain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotLayout {
    /// The pipeline whose layout the descriptor sets conform to.
    pub pipeline: PipelineId,
    /// `(set index, [(binding, kind)])` for each descriptor set.
    pub sets: Vec<(u32, Vec<(u32, BindingKind)>)>,
    /// Size of the uniform buffer, `0` for none.
    pub uniform_size: u64,
}

impl SlotLayout {
    /// The layout needed by `pipeline` with the given reflected interface.
    pub fn new(pipeline: PipelineId, interface: &ShaderInterface, uniform_size: u64) -> Self {
        let sets = interface
            .set_indices()
            .into_iter()
            .map(|set| {
                let entries = interface
                    .entries_for_set(set)
                    .map(|b| (b.binding, b.kind))
                    .collect();
                (set, entries)
            })
            .collect();
        Self {
            pipeline,
            sets,
            uniform_size,
        }
    }

    /// Returns `true` if slots hold no backend resources at all.
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty() && self.uniform_size == 0
    }
}

/// One slot of the ring.
#[derive(Debug)]
pub struct FrameSlot {
    uniform_buffer: Option<RefCountedBuffer>,
    sets: Vec<(u32, RefCountedDescriptorSet)>,
    last_use: FrameSerial,
    pub(crate) uniform_version: u64,
    pub(crate) uniform_sets_written: bool,
    pub(crate) binding_version: u64,
    // (set, binding) of the texture entries currently written.
    pub(crate) texture_entries: Vec<(u32, u32)>,
}

impl FrameSlot {
    /// The slot's uniform buffer, if the pipeline declares uniform blocks.
    pub fn uniform_buffer(&self) -> Option<&RefCountedBuffer> {
        self.uniform_buffer.as_ref()
    }

    /// The slot's descriptor sets with their set indices, ascending.
    pub fn descriptor_sets(&self) -> &[(u32, RefCountedDescriptorSet)] {
        &self.sets
    }

    /// The last frame that claimed this slot.
    pub fn last_use(&self) -> FrameSerial {
        self.last_use
    }
}

/// The frame resource ring of one render command.
pub struct FrameResourceRing {
    label: String,
    layout: SlotLayout,
    slots: Vec<FrameSlot>,
    cursor: usize,
    current: Option<(FrameSerial, usize)>,
}

impl FrameResourceRing {
    /// Allocates `count` slots for `layout`.
    pub fn new(
        label: &str,
        layout: SlotLayout,
        count: usize,
        device: &dyn GraphicsDevice,
        releaser: &ReleaseSender,
    ) -> Result<Self, ResourceError> {
        let mut ring = Self {
            label: label.to_owned(),
            layout,
            slots: Vec::with_capacity(count),
            cursor: 0,
            current: None,
        };
        for _ in 0..count.max(1) {
            let slot = ring.allocate_slot(device, releaser)?;
            ring.slots.push(slot);
        }
        log::debug!(
            "FrameResourceRing: '{}' allocated {} slots ({} sets, {} uniform bytes each)",
            ring.label,
            ring.slots.len(),
            ring.layout.sets.len(),
            ring.layout.uniform_size
        );
        Ok(ring)
    }

    /// Claims a slot for frame `ctx.serial`.
    ///
    /// Claiming again within the same frame returns the same slot.
    pub fn acquire(&mut self, ctx: &FrameContext<'_>) -> Result<usize, CommandError> {
        if let Some((serial, index)) = self.current {
            if serial == ctx.serial {
                return Ok(index);
            }
        }
        if self.layout.is_empty() {
            return Ok(self.claim(0, ctx.serial));
        }

        let len = self.slots.len();
        for step in 0..len {
            let index = (self.cursor + step) % len;
            if ctx.tracker.is_retired(self.slots[index].last_use, ctx.device) {
                return Ok(self.claim(index, ctx.serial));
            }
        }

        match ctx.config.exhaustion_policy {
            ExhaustionPolicy::Grow { max_slots } if len < max_slots => {
                let slot = self
                    .allocate_slot(ctx.device, ctx.releaser)
                    .map_err(CommandError::Construction)?;
                self.slots.push(slot);
                log::debug!(
                    "FrameResourceRing: '{}' grew to {} slots",
                    self.label,
                    self.slots.len()
                );
                Ok(self.claim(len, ctx.serial))
            }
            ExhaustionPolicy::Grow { max_slots } => {
                log::warn!(
                    "FrameResourceRing: '{}' has all {} slots in flight, deferring",
                    self.label,
                    max_slots
                );
                Err(CommandError::Exhausted { waited_ms: 0 })
            }
            ExhaustionPolicy::BoundedWait => {
                let Some(oldest) = (0..len).min_by_key(|i| self.slots[*i].last_use) else {
                    return Err(CommandError::Exhausted { waited_ms: 0 });
                };
                let start = Instant::now();
                let timeout = ctx.config.fence_wait_timeout();
                if ctx
                    .tracker
                    .wait_for(self.slots[oldest].last_use, timeout, ctx.device)
                {
                    return Ok(self.claim(oldest, ctx.serial));
                }
                let waited_ms = start.elapsed().as_millis() as u64;
                log::warn!(
                    "FrameResourceRing: '{}' found no free slot within {} ms, deferring",
                    self.label,
                    waited_ms
                );
                Err(CommandError::Exhausted { waited_ms })
            }
        }
    }

    /// The slot claimed for `serial`, if any.
    pub fn current(&self, serial: FrameSerial) -> Option<&FrameSlot> {
        match self.current {
            Some((s, index)) if s == serial => self.slots.get(index),
            _ => None,
        }
    }

    pub(crate) fn slot_mut(&mut self, index: usize) -> &mut FrameSlot {
        &mut self.slots[index]
    }

    /// Replaces the descriptor sets of slot `index` that hold a texture entry
    /// missing from `keep`.
    ///
    /// Descriptor entries cannot be unwritten, so a set losing a binding is
    /// reallocated empty. The old sets go through the release queue. Uniform
    /// entries must be written again afterwards. Returns the number of sets
    /// replaced.
    pub(crate) fn drop_stale_entries(
        &mut self,
        index: usize,
        keep: &[(u32, u32)],
        device: &dyn GraphicsDevice,
        releaser: &ReleaseSender,
    ) -> Result<usize, ResourceError> {
        let slot = &self.slots[index];
        let mut stale: Vec<u32> = slot
            .texture_entries
            .iter()
            .filter(|entry| !keep.contains(entry))
            .map(|(set, _)| *set)
            .collect();
        if stale.is_empty() {
            return Ok(0);
        }
        stale.sort_unstable();
        stale.dedup();

        let mut fresh = Vec::with_capacity(stale.len());
        for (set, entries) in self.layout.sets.iter().filter(|(set, _)| stale.contains(set)) {
            let label = format!("{} set {set} [slot {index}]", self.label);
            let id = device.create_descriptor_set(&DescriptorSetDescriptor {
                label: &label,
                pipeline: self.layout.pipeline,
                set: *set,
                entries,
            })?;
            fresh.push((*set, releaser.track(id)));
        }

        let slot = &mut self.slots[index];
        for (set, handle) in fresh {
            if let Some(entry) = slot.sets.iter_mut().find(|(s, _)| *s == set) {
                entry.1 = handle;
            }
        }
        slot.texture_entries.retain(|(set, _)| !stale.contains(set));
        slot.uniform_sets_written = false;
        log::debug!(
            "FrameResourceRing: '{}' slot {} reallocated sets {:?} to drop unbound textures",
            self.label,
            index,
            stale
        );
        Ok(stale.len())
    }

    /// All slots, in ring order.
    pub fn slots(&self) -> &[FrameSlot] {
        &self.slots
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` if the ring has no slots.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// What each slot contains.
    pub fn layout(&self) -> &SlotLayout {
        &self.layout
    }

    fn claim(&mut self, index: usize, serial: FrameSerial) -> usize {
        self.slots[index].last_use = serial;
        self.cursor = (index + 1) % self.slots.len();
        self.current = Some((serial, index));
        index
    }

    fn allocate_slot(
        &self,
        device: &dyn GraphicsDevice,
        releaser: &ReleaseSender,
    ) -> Result<FrameSlot, ResourceError> {
        let index = self.slots.len();
        let uniform_buffer = if self.layout.uniform_size > 0 {
            let descriptor = BufferDescriptor::uniform(
                format!("{} uniforms [slot {index}]", self.label),
                self.layout.uniform_size,
            );
            Some(releaser.track(device.create_buffer(&descriptor)?))
        } else {
            None
        };

        let mut sets = Vec::with_capacity(self.layout.sets.len());
        for (set, entries) in &self.layout.sets {
            let label = format!("{} set {set} [slot {index}]", self.label);
            let id = device.create_descriptor_set(&DescriptorSetDescriptor {
                label: &label,
                pipeline: self.layout.pipeline,
                set: *set,
                entries,
            })?;
            sets.push((*set, releaser.track(id)));
        }

        Ok(FrameSlot {
            uniform_buffer,
            sets,
            last_use: FrameSerial::NONE,
            uniform_version: 0,
            uniform_sets_written: false,
            binding_version: 0,
            texture_entries: Vec::new(),
        })
    }
}

impl fmt::Debug for FrameResourceRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameResourceRing")
            .field("label", &self.label)
            .field("slots", &self.slots.len())
            .field("cursor", &self.cursor)
            .field("current", &self.current)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::DescriptorBinder;
    use crate::config::RendererConfig;
    use crate::frame::FrameTracker;
    use tessera_core::renderer::{
        DescriptorSetId, FenceId, InterfaceBinding, PipelineStateDescriptor, ReleaseQueue,
    };
    use tessera_infra::{GpuTimeline, HeadlessDevice};

    struct Fixture {
        device: HeadlessDevice,
        tracker: FrameTracker,
        queue: ReleaseQueue,
        config: RendererConfig,
        layout: SlotLayout,
    }

    impl Fixture {
        fn new(config: RendererConfig) -> Self {
            let device = HeadlessDevice::new();
            device.set_timeline(GpuTimeline::Manual);
            let interface = ShaderInterface::new(vec![
                InterfaceBinding::uniform("transform", 0, 0, 64),
                InterfaceBinding::texture("albedo", 1, 0),
            ]);
            let program = device.register_program("mesh", interface.clone());
            let pipeline = device
                .create_pipeline(&PipelineStateDescriptor::new(program))
                .unwrap();
            Self {
                device,
                tracker: FrameTracker::new(),
                queue: ReleaseQueue::new(),
                config,
                layout: SlotLayout::new(pipeline, &interface, 256),
            }
        }

        fn ring(&self) -> FrameResourceRing {
            FrameResourceRing::new(
                "mesh",
                self.layout.clone(),
                self.config.frames_in_flight,
                &self.device,
                &self.queue.sender(),
            )
            .unwrap()
        }

        fn acquire(&self, ring: &mut FrameResourceRing, serial: u64) -> Result<usize, CommandError> {
            let releaser = self.queue.sender();
            let ctx = FrameContext {
                serial: FrameSerial(serial),
                device: &self.device,
                tracker: &self.tracker,
                releaser: &releaser,
                config: &self.config,
                binder: DescriptorBinder::new(256),
            };
            ring.acquire(&ctx)
        }

        fn submit(&mut self, serial: u64) {
            let recorder = self.device.create_command_recorder(None);
            let fence: FenceId = self.device.submit(recorder.finish()).unwrap();
            self.tracker.submitted(FrameSerial(serial), fence);
        }
    }

    #[test]
    fn test_slots_hold_one_buffer_and_one_set_per_index() {
        let fixture = Fixture::new(RendererConfig::default());
        let ring = fixture.ring();

        assert_eq!(ring.len(), 2);
        assert_eq!(fixture.device.live_buffers(), 2);
        assert_eq!(fixture.device.live_descriptor_sets(), 4);
        let indices: Vec<u32> = ring.slots()[0]
            .descriptor_sets()
            .iter()
            .map(|(i, _)| *i)
            .collect();
        assert_eq!(indices, vec![0, 1]);
    }

    #[test]
    fn test_stale_texture_entries_reallocate_only_their_set() {
        let fixture = Fixture::new(RendererConfig::default());
        let mut ring = fixture.ring();
        let releaser = fixture.queue.sender();
        let before: Vec<DescriptorSetId> =
            ring.slots()[0].descriptor_sets().iter().map(|(_, s)| s.id()).collect();
        let slot = ring.slot_mut(0);
        slot.texture_entries = vec![(1, 0)];
        slot.uniform_sets_written = true;

        let kept = ring
            .drop_stale_entries(0, &[(1, 0)], &fixture.device, &releaser)
            .unwrap();
        assert_eq!(kept, 0);
        assert_eq!(fixture.device.calls().create_descriptor_set, 4);

        let replaced = ring
            .drop_stale_entries(0, &[], &fixture.device, &releaser)
            .unwrap();
        assert_eq!(replaced, 1);
        let after: Vec<DescriptorSetId> =
            ring.slots()[0].descriptor_sets().iter().map(|(_, s)| s.id()).collect();
        assert_eq!(after[0], before[0]);
        assert_ne!(after[1], before[1]);
        assert!(ring.slots()[0].texture_entries.is_empty());
        assert!(!ring.slots()[0].uniform_sets_written);
        assert_eq!(fixture.device.calls().create_descriptor_set, 5);
    }

    #[test]
    fn test_same_frame_same_slot_next_frame_next_slot() {
        let mut fixture = Fixture::new(RendererConfig::default());
        let mut ring = fixture.ring();

        assert_eq!(fixture.acquire(&mut ring, 1).unwrap(), 0);
        assert_eq!(fixture.acquire(&mut ring, 1).unwrap(), 0);
        fixture.submit(1);

        assert_eq!(fixture.acquire(&mut ring, 2).unwrap(), 1);
        assert_eq!(ring.current(FrameSerial(2)).map(|s| s.last_use()), Some(FrameSerial(2)));
        assert!(ring.current(FrameSerial(1)).is_none());
    }

    #[test]
    fn test_bounded_wait_defers_then_reuses_retired_slot() {
        let mut fixture = Fixture::new(RendererConfig {
            fence_wait_timeout_ms: 1,
            ..RendererConfig::default()
        });
        let mut ring = fixture.ring();

        fixture.acquire(&mut ring, 1).unwrap();
        fixture.submit(1);
        fixture.acquire(&mut ring, 2).unwrap();
        fixture.submit(2);

        let err = fixture.acquire(&mut ring, 3).unwrap_err();
        assert!(err.is_deferred());

        // Frame 1 retires: its slot is free again.
        fixture.device.retire_next();
        assert_eq!(fixture.acquire(&mut ring, 3).unwrap(), 0);
    }

    #[test]
    fn test_grow_allocates_up_to_the_limit() {
        let mut fixture = Fixture::new(RendererConfig {
            exhaustion_policy: ExhaustionPolicy::Grow { max_slots: 3 },
            ..RendererConfig::default()
        });
        let mut ring = fixture.ring();

        for serial in 1..=3 {
            fixture.acquire(&mut ring, serial).unwrap();
            fixture.submit(serial);
        }
        assert_eq!(ring.len(), 3);
        assert!(matches!(
            fixture.acquire(&mut ring, 4),
            Err(CommandError::Exhausted { waited_ms: 0 })
        ));
    }
}
