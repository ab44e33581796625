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

//! Deduplicating cache of pipeline state objects.
//!
//! The cache maps a [`PipelineStateDescriptor`] (by structural equality) to a
//! shared, immutable [`Pipeline`]. Entries are weak: the render commands that use
//! a pipeline own it, and once the last of them lets go the backend object goes
//! through the deferred release queue and the entry becomes dead.
//!
//! Lookups take the read lock. A miss re-checks under the write lock before
//! constructing, so concurrent preparation of many commands sharing a
//! descriptor constructs the backend object exactly once.

use ahash::AHashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tessera_core::renderer::{
    GraphicsDevice, PipelineError, PipelineId, PipelineStateDescriptor, RefCountedPipeline,
    ReleaseSender, ResourceError, ShaderInterface, ShaderProgramId,
};

/// A constructed pipeline shared by every render command with the same state.
#[derive(Debug)]
pub struct Pipeline {
    handle: RefCountedPipeline,
    descriptor: PipelineStateDescriptor,
    interface: Arc<ShaderInterface>,
    invalidated: AtomicBool,
}

impl Pipeline {
    /// The backend pipeline id.
    pub fn id(&self) -> PipelineId {
        self.handle.id()
    }

    /// The shared backend handle.
    pub fn handle(&self) -> &RefCountedPipeline {
        &self.handle
    }

    /// The state this pipeline was built from.
    pub fn descriptor(&self) -> &PipelineStateDescriptor {
        &self.descriptor
    }

    /// The reflected binding interface of the pipeline's shader program.
    pub fn interface(&self) -> &Arc<ShaderInterface> {
        &self.interface
    }

    /// Returns `false` once the cache invalidated this pipeline.
    pub fn is_valid(&self) -> bool {
        !self.invalidated.load(Ordering::Acquire)
    }
}

/// Counters of cache activity since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that required construction.
    pub misses: u64,
    /// Pipelines constructed successfully.
    pub created: u64,
    /// Constructions rejected by the backend.
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    created: AtomicU64,
    failed: AtomicU64,
}

/// The pipeline cache.
#[derive(Debug)]
pub struct PipelineCache {
    device: Arc<dyn GraphicsDevice>,
    releaser: ReleaseSender,
    max_sets: u32,
    entries: RwLock<AHashMap<PipelineStateDescriptor, Weak<Pipeline>>>,
    failures: RwLock<AHashMap<PipelineStateDescriptor, PipelineError>>,
    interfaces: RwLock<AHashMap<ShaderProgramId, Arc<ShaderInterface>>>,
    counters: Counters,
}

impl PipelineCache {
    /// Creates an empty cache whose pipelines release into `releaser`.
    pub fn new(device: Arc<dyn GraphicsDevice>, releaser: ReleaseSender) -> Self {
        let max_sets = device.adapter_info().limits.max_bound_descriptor_sets;
        Self {
            device,
            releaser,
            max_sets,
            entries: RwLock::new(AHashMap::new()),
            failures: RwLock::new(AHashMap::new()),
            interfaces: RwLock::new(AHashMap::new()),
            counters: Counters::default(),
        }
    }

    /// Returns the pipeline for `descriptor`, constructing it on a miss.
    ///
    /// A descriptor whose construction failed is not retried until its shader
    /// program is invalidated; until then this returns
    /// [`PipelineError::PreviouslyFailed`] without touching the backend.
    pub fn get_or_create(
        &self,
        descriptor: &PipelineStateDescriptor,
    ) -> Result<Arc<Pipeline>, ResourceError> {
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(pipeline) = Self::live(&entries, descriptor) {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(pipeline);
            }
        }
        self.check_failed(descriptor)?;

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(pipeline) = Self::live(&entries, descriptor) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(pipeline);
        }
        self.check_failed(descriptor)?;

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        match self.construct(descriptor) {
            Ok(pipeline) => {
                entries.insert(descriptor.clone(), Arc::downgrade(&pipeline));
                self.counters.created.fetch_add(1, Ordering::Relaxed);
                log::debug!(
                    "PipelineCache: created {:?} for {:?} ({} entries)",
                    pipeline.id(),
                    descriptor.program(),
                    entries.len()
                );
                Ok(pipeline)
            }
            Err(err) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                log::error!(
                    "PipelineCache: construction failed for {:?}: {}",
                    descriptor.program(),
                    err
                );
                if let ResourceError::Pipeline(pipeline_err) = &err {
                    self.failures
                        .write()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(descriptor.clone(), pipeline_err.clone());
                }
                Err(err)
            }
        }
    }

    /// Invalidates every pipeline built from `program` and forgets its
    /// remembered construction failures and reflected interface.
    ///
    /// Render commands holding an invalidated pipeline rebuild it on their next
    /// preparation. Returns the number of live pipelines invalidated.
    pub fn invalidate_program(&self, program: ShaderProgramId) -> usize {
        let count = self.invalidate_where(|descriptor| descriptor.program() == program);
        self.failures
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|descriptor, _| descriptor.program() != program);
        self.interfaces
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&program);
        log::info!("PipelineCache: invalidated {count} pipelines of {program:?}");
        count
    }

    /// Invalidates every pipeline and forgets every remembered failure.
    pub fn invalidate_all(&self) -> usize {
        let count = self.invalidate_where(|_| true);
        self.failures
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.interfaces
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        log::info!("PipelineCache: invalidated all {count} pipelines");
        count
    }

    /// Drops entries whose pipeline has been released. Returns how many.
    pub fn purge(&self) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, weak| weak.strong_count() > 0);
        before - entries.len()
    }

    /// Number of entries, including dead ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if construction of `descriptor` failed and is remembered.
    pub fn has_failed(&self, descriptor: &PipelineStateDescriptor) -> bool {
        self.failures
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(descriptor)
    }

    /// A snapshot of the activity counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            created: self.counters.created.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    fn live(
        entries: &AHashMap<PipelineStateDescriptor, Weak<Pipeline>>,
        descriptor: &PipelineStateDescriptor,
    ) -> Option<Arc<Pipeline>> {
        entries
            .get(descriptor)
            .and_then(Weak::upgrade)
            .filter(|pipeline| pipeline.is_valid())
    }

    fn check_failed(&self, descriptor: &PipelineStateDescriptor) -> Result<(), ResourceError> {
        if self.has_failed(descriptor) {
            return Err(PipelineError::PreviouslyFailed {
                program: descriptor.program(),
            }
            .into());
        }
        Ok(())
    }

    fn construct(
        &self,
        descriptor: &PipelineStateDescriptor,
    ) -> Result<Arc<Pipeline>, ResourceError> {
        let interface = self.interface_for(descriptor.program())?;
        let set_count = interface.set_indices().len() as u32;
        if set_count > self.max_sets {
            return Err(PipelineError::TooManyDescriptorSets {
                requested: set_count,
                max: self.max_sets,
            }
            .into());
        }

        let id = self.device.create_pipeline(descriptor)?;
        Ok(Arc::new(Pipeline {
            handle: self.releaser.track(id),
            descriptor: descriptor.clone(),
            interface,
            invalidated: AtomicBool::new(false),
        }))
    }

    fn interface_for(&self, program: ShaderProgramId) -> Result<Arc<ShaderInterface>, ResourceError> {
        if let Some(interface) = self
            .interfaces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&program)
        {
            return Ok(Arc::clone(interface));
        }

        let interface = Arc::new(self.device.shader_interface(program)?);
        self.interfaces
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(program, Arc::clone(&interface));
        Ok(interface)
    }

    fn invalidate_where(&self, predicate: impl Fn(&PipelineStateDescriptor) -> bool) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let mut count = 0;
        entries.retain(|descriptor, weak| {
            if !predicate(descriptor) {
                return true;
            }
            if let Some(pipeline) = weak.upgrade() {
                pipeline.invalidated.store(true, Ordering::Release);
                count += 1;
            }
            false
        });
        count
    }
}
