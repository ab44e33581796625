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

//! Reference-counted handles around backend objects.
//!
//! Several render commands can share one backend allocation (most commonly a
//! pipeline). A [`RefCounted`] handle is the shared owner: cloning it is cheap,
//! and every command buffer that references the object stamps the handle with
//! the frame serial that used it.
//!
//! Dropping the last handle never destroys the object directly, because a
//! command buffer still in flight may reference it. Instead a [`ReleaseRequest`]
//! is sent to the [`ReleaseQueue`], which destroys the object once its last
//! using frame has been retired by the GPU.
//!
//! ```text
//! last clone dropped ──► ReleaseRequest { resource, last_use }
//!                                │
//!   collect(retired) ◄───────────┘   destroys when last_use <= retired
//! ```

use crate::renderer::api::{BufferId, DescriptorSetId, FrameSerial, PipelineId};
use crate::renderer::error::ResourceError;
use crate::renderer::traits::GraphicsDevice;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A backend object that can be released through the [`ReleaseQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuResource {
    /// A pipeline state object.
    Pipeline(PipelineId),
    /// A GPU buffer.
    Buffer(BufferId),
    /// A descriptor set.
    DescriptorSet(DescriptorSetId),
}

impl GpuResource {
    /// Destroys the backend object on `device`.
    pub fn destroy(self, device: &dyn GraphicsDevice) -> Result<(), ResourceError> {
        match self {
            GpuResource::Pipeline(id) => device.destroy_pipeline(id),
            GpuResource::Buffer(id) => device.destroy_buffer(id),
            GpuResource::DescriptorSet(id) => device.destroy_descriptor_set(id),
        }
    }
}

impl From<PipelineId> for GpuResource {
    fn from(id: PipelineId) -> Self {
        GpuResource::Pipeline(id)
    }
}

impl From<BufferId> for GpuResource {
    fn from(id: BufferId) -> Self {
        GpuResource::Buffer(id)
    }
}

impl From<DescriptorSetId> for GpuResource {
    fn from(id: DescriptorSetId) -> Self {
        GpuResource::DescriptorSet(id)
    }
}

/// A resource whose last owner went away, waiting for its last frame to retire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseRequest {
    /// The resource to destroy.
    pub resource: GpuResource,
    /// The last frame that referenced the resource.
    pub last_use: FrameSerial,
}

/// The sending side of a [`ReleaseQueue`], held by every handle it created.
#[derive(Debug, Clone)]
pub struct ReleaseSender(flume::Sender<ReleaseRequest>);

impl ReleaseSender {
    /// Wraps `id` into a new handle with a reference count of one.
    pub fn track<T>(&self, id: T) -> RefCounted<T>
    where
        T: Copy + Into<GpuResource>,
    {
        RefCounted::new(id, self.clone())
    }
}

struct Tracked<T: Copy + Into<GpuResource>> {
    id: T,
    last_use: AtomicU64,
    releaser: ReleaseSender,
}

impl<T: Copy + Into<GpuResource>> Drop for Tracked<T> {
    fn drop(&mut self) {
        let request = ReleaseRequest {
            resource: self.id.into(),
            last_use: FrameSerial(self.last_use.load(Ordering::Acquire)),
        };
        if let Err(err) = self.releaser.0.send(request) {
            log::warn!(
                "ReleaseQueue: queue is gone, leaking {:?}",
                err.into_inner().resource
            );
        }
    }
}

/// A shared, reference-counted handle to a backend object.
pub struct RefCounted<T: Copy + Into<GpuResource>> {
    inner: Arc<Tracked<T>>,
}

/// A shared pipeline handle.
pub type RefCountedPipeline = RefCounted<PipelineId>;
/// A shared buffer handle.
pub type RefCountedBuffer = RefCounted<BufferId>;
/// A shared descriptor set handle.
pub type RefCountedDescriptorSet = RefCounted<DescriptorSetId>;

impl<T: Copy + Into<GpuResource>> RefCounted<T> {
    /// Takes ownership of the backend object `id`.
    pub fn new(id: T, releaser: ReleaseSender) -> Self {
        Self {
            inner: Arc::new(Tracked {
                id,
                last_use: AtomicU64::new(FrameSerial::NONE.0),
                releaser,
            }),
        }
    }

    /// The backend id.
    pub fn id(&self) -> T {
        self.inner.id
    }

    /// Records that the frame `serial` references this object.
    ///
    /// The stamp only ever moves forward.
    pub fn mark_used(&self, serial: FrameSerial) {
        self.inner.last_use.fetch_max(serial.0, Ordering::AcqRel);
    }

    /// The last frame that referenced this object.
    pub fn last_use(&self) -> FrameSerial {
        FrameSerial(self.inner.last_use.load(Ordering::Acquire))
    }

    /// Number of live handles to this object.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Returns `true` if both handles share the same backend object.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: Copy + Into<GpuResource>> Clone for RefCounted<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Copy + Into<GpuResource> + fmt::Debug> fmt::Debug for RefCounted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefCounted")
            .field("id", &self.inner.id)
            .field("last_use", &self.last_use())
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

/// Deferred destruction of backend objects whose handles have all been dropped.
#[derive(Debug)]
pub struct ReleaseQueue {
    sender: flume::Sender<ReleaseRequest>,
    receiver: flume::Receiver<ReleaseRequest>,
    pending: Vec<ReleaseRequest>,
}

impl Default for ReleaseQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ReleaseQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        let (sender, receiver) = flume::unbounded();
        Self {
            sender,
            receiver,
            pending: Vec::new(),
        }
    }

    /// A sender for creating handles that release into this queue.
    pub fn sender(&self) -> ReleaseSender {
        ReleaseSender(self.sender.clone())
    }

    /// Destroys every released object whose last use is at or before `retired`.
    ///
    /// Objects still referenced by an unretired frame stay queued.
    /// Returns the number of objects destroyed.
    pub fn collect(&mut self, retired: FrameSerial, device: &dyn GraphicsDevice) -> usize {
        self.pending.extend(self.receiver.try_iter());

        let mut destroyed = 0;
        self.pending.retain(|request| {
            if request.last_use > retired {
                return true;
            }
            Self::destroy(request, device);
            destroyed += 1;
            false
        });

        if destroyed > 0 {
            log::debug!(
                "ReleaseQueue: destroyed {} resources up to frame {}, {} still pending",
                destroyed,
                retired,
                self.pending.len()
            );
        }
        destroyed
    }

    /// Destroys everything released so far, regardless of frame use.
    ///
    /// Only call this once the device is idle.
    pub fn flush(&mut self, device: &dyn GraphicsDevice) -> usize {
        self.pending.extend(self.receiver.try_iter());
        let count = self.pending.len();
        for request in self.pending.drain(..) {
            Self::destroy(&request, device);
        }
        count
    }

    /// Number of released objects not yet destroyed.
    pub fn pending_len(&self) -> usize {
        self.pending.len() + self.receiver.len()
    }

    fn destroy(request: &ReleaseRequest, device: &dyn GraphicsDevice) {
        if let Err(e) = request.resource.destroy(device) {
            log::warn!(
                "ReleaseQueue: failed to destroy {:?}: {:?}",
                request.resource,
                e
            );
        }
    }
}
