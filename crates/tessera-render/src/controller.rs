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

//! The frame controller.
//!
//! The [`Controller`] owns every render command, the pipeline cache, the frame
//! tracker and the deferred release queue. Each frame it takes the scene's
//! ordered draw items, prepares and binds their render commands, records them
//! in that exact order, and submits the command buffer.
//!
//! ```text
//! begin_frame ──► record(items) ──► submit ──► (GPU) ──► poll: retire + release
//!                       │
//!                       └──────────► abandon (nothing reaches the GPU)
//! ```

use ahash::{AHashMap, AHashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tessera_core::renderer::{
    FrameSerial, GraphicsDevice, ReleaseQueue, ReleaseSender, ShaderProgramId,
};

use crate::binder::{BindingMismatch, DescriptorBinder};
use crate::command_buffer::CommandBuffer;
use crate::config::RendererConfig;
use crate::draw_item::{DrawItem, DrawItemId};
use crate::error::{CommandError, ConfigError, FrameError};
use crate::frame::{CompletionStatus, FrameCompletion, FrameTracker};
use crate::pipeline_cache::{CacheStats, PipelineCache};
use crate::render_command::{FrameContext, PrepareContext, RenderCommand};

/// How long dropping a controller waits for the GPU before releasing resources.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// A draw item that recorded nothing this frame.
#[derive(Debug, Clone)]
pub struct SkippedItem {
    /// The draw item.
    pub id: DrawItemId,
    /// Why it was skipped.
    pub reason: CommandError,
}

/// What happened to the draw items of one frame.
#[derive(Debug, Clone, Default)]
pub struct FrameReport {
    /// The frame.
    pub frame: FrameSerial,
    /// Items recorded, in draw order.
    pub recorded: Vec<DrawItemId>,
    /// Items skipped or deferred, in draw order.
    pub skipped: Vec<SkippedItem>,
    /// Bindings skipped on recorded items.
    pub mismatches: Vec<BindingMismatch>,
}

impl FrameReport {
    /// Number of skipped items that were deferred for lack of a free slot.
    pub fn deferred(&self) -> usize {
        self.skipped.iter().filter(|s| s.reason.is_deferred()).count()
    }

    /// Returns `true` if `id` was skipped this frame.
    pub fn was_skipped(&self, id: DrawItemId) -> bool {
        self.skipped.iter().any(|s| s.id == id)
    }
}

/// Statistics of the last submitted frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameStats {
    /// The frame.
    pub frame: FrameSerial,
    /// Draw calls recorded.
    pub draw_calls: usize,
    /// Items skipped for any reason other than deferral.
    pub skipped: usize,
    /// Items deferred for lack of a free frame resource slot.
    pub deferred: usize,
    /// Binding mismatches on recorded items.
    pub binding_mismatches: usize,
    /// Pipeline cache counters, cumulative.
    pub cache: CacheStats,
    /// CPU time spent preparing render commands, in milliseconds.
    pub prepare_ms: f64,
    /// CPU time spent binding and recording, in milliseconds.
    pub record_ms: f64,
    /// CPU time spent finishing and submitting, in milliseconds.
    pub submit_ms: f64,
    /// Frames submitted and not yet retired.
    pub in_flight: usize,
}

/// A frame being recorded.
///
/// Obtained from [`Controller::begin_frame`] and consumed by
/// [`Controller::submit`] or [`Controller::abandon`].
#[derive(Debug)]
pub struct Frame {
    serial: FrameSerial,
    command_buffer: CommandBuffer,
    report: FrameReport,
    seen: AHashSet<DrawItemId>,
    prepare_time: Duration,
    record_time: Duration,
}

impl Frame {
    /// The frame serial.
    pub fn serial(&self) -> FrameSerial {
        self.serial
    }

    /// The command buffer being recorded.
    pub fn command_buffer(&self) -> &CommandBuffer {
        &self.command_buffer
    }

    /// What happened to the items recorded so far.
    pub fn report(&self) -> &FrameReport {
        &self.report
    }
}

/// Drives frames from draw items to submission.
pub struct Controller {
    device: Arc<dyn GraphicsDevice>,
    config: RendererConfig,
    // Shared by every render command; read-mostly.
    cache: PipelineCache,
    binder: DescriptorBinder,
    // One render command per persistent draw item.
    commands: AHashMap<DrawItemId, RenderCommand>,
    // --- Frame lifetime ---
    tracker: FrameTracker,
    releases: ReleaseQueue,
    releaser: ReleaseSender,
    last_serial: FrameSerial,
    active: Option<FrameSerial>,
    subscribers: Vec<flume::Sender<FrameCompletion>>,
    stats: FrameStats,
}

impl Controller {
    /// Creates a controller rendering through `device`.
    ///
    /// The effective uniform alignment is the larger of the configured value
    /// and the device's minimum uniform buffer offset alignment.
    pub fn new(device: Arc<dyn GraphicsDevice>, config: RendererConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let info = device.adapter_info();
        let alignment = config
            .uniform_alignment
            .max(info.limits.min_uniform_buffer_offset_alignment);
        let releases = ReleaseQueue::new();
        let releaser = releases.sender();
        let cache = PipelineCache::new(Arc::clone(&device), releaser.clone());

        log::info!(
            "Controller: rendering on '{}' ({:?}), {} frames in flight, {} byte uniform alignment",
            info.name,
            info.backend_type,
            config.frames_in_flight,
            alignment
        );

        Ok(Self {
            device,
            config,
            cache,
            binder: DescriptorBinder::new(alignment),
            commands: AHashMap::new(),
            tracker: FrameTracker::new(),
            releases,
            releaser,
            last_serial: FrameSerial::NONE,
            active: None,
            subscribers: Vec::new(),
            stats: FrameStats::default(),
        })
    }

    /// Records and submits one frame drawing `items` in order.
    ///
    /// Individual draw item failures are reported in the returned
    /// [`FrameReport`]; only a failure of the whole frame is an error.
    pub fn render_frame(&mut self, items: &[DrawItem]) -> Result<FrameReport, FrameError> {
        let mut frame = self.begin_frame();
        if let Err(err) = self.record(&mut frame, items) {
            self.abandon(frame)?;
            return Err(err);
        }
        self.submit(frame)
    }

    /// Starts a new frame.
    ///
    /// Retired frames are polled first so their resources can be reused. A
    /// previous frame that was neither submitted nor abandoned is abandoned.
    pub fn begin_frame(&mut self) -> Frame {
        if let Some(stale) = self.active.take() {
            log::warn!("Controller: frame {stale} was never submitted, abandoning it");
            self.tracker.abandoned(stale);
            self.notify(stale, CompletionStatus::Abandoned);
        }
        self.poll();

        let serial = self.last_serial.next();
        self.last_serial = serial;
        self.active = Some(serial);

        let label = format!("frame {serial}");
        let recorder = self.device.create_command_recorder(Some(&label));
        log::trace!("Controller: began frame {serial}");
        Frame {
            serial,
            command_buffer: CommandBuffer::new(serial, recorder),
            report: FrameReport {
                frame: serial,
                ..FrameReport::default()
            },
            seen: AHashSet::new(),
            prepare_time: Duration::ZERO,
            record_time: Duration::ZERO,
        }
    }

    /// Prepares, binds and records `items` into `frame`, in order.
    ///
    /// May be called several times per frame; later calls record after earlier
    /// ones. An item already recorded in this frame is skipped as a duplicate.
    pub fn record(&mut self, frame: &mut Frame, items: &[DrawItem]) -> Result<(), FrameError> {
        if self.active != Some(frame.serial) {
            return Err(FrameError::NoActiveFrame(frame.serial));
        }
        if frame.command_buffer.is_finished() {
            return Err(FrameError::AlreadyFinished(frame.serial));
        }

        let mut order = Vec::with_capacity(items.len());
        for item in items {
            if !frame.seen.insert(item.id) {
                log::warn!(
                    "Controller: draw item {:?} ('{}') appears twice in frame {}",
                    item.id,
                    item.label,
                    frame.serial
                );
                frame.report.skipped.push(SkippedItem {
                    id: item.id,
                    reason: CommandError::Duplicate,
                });
                continue;
            }
            match self.commands.get_mut(&item.id) {
                Some(command) => {
                    command.update(item);
                }
                None => {
                    log::debug!("Controller: new render command for '{}'", item.label);
                    self.commands.insert(item.id, RenderCommand::new(item));
                }
            }
            order.push(item.id);
        }

        let start = Instant::now();
        let mut prepared = self.prepare(&order);
        frame.prepare_time += start.elapsed();

        let start = Instant::now();
        let ctx = FrameContext {
            serial: frame.serial,
            device: &*self.device,
            tracker: &self.tracker,
            releaser: &self.releaser,
            config: &self.config,
            binder: self.binder,
        };
        for id in &order {
            let Some(command) = self.commands.get_mut(id) else {
                continue;
            };
            let outcome = prepared
                .remove(id)
                .unwrap_or(Err(CommandError::NotPrepared))
                .and_then(|()| {
                    command.bind_uniform_buffers(&ctx)?;
                    command.bind_textures_and_samplers(&ctx)?;
                    command.bind_pipeline(&frame.command_buffer)
                });
            match outcome {
                Ok(()) => {
                    frame.report.recorded.push(*id);
                    frame
                        .report
                        .mismatches
                        .extend(command.mismatches().iter().cloned());
                }
                Err(reason) => {
                    log::trace!(
                        "Controller: '{}' skipped in frame {}: {}",
                        command.label(),
                        frame.serial,
                        reason
                    );
                    frame.report.skipped.push(SkippedItem { id: *id, reason });
                }
            }
        }
        frame.record_time += start.elapsed();
        Ok(())
    }

    /// Finishes and submits `frame`.
    ///
    /// If the backend rejects the submission nothing from the frame executes;
    /// the frame is reported to subscribers as
    /// [`CompletionStatus::SubmissionFailed`] and its resources become
    /// reusable immediately.
    pub fn submit(&mut self, frame: Frame) -> Result<FrameReport, FrameError> {
        if self.active != Some(frame.serial) {
            return Err(FrameError::NoActiveFrame(frame.serial));
        }
        self.active = None;
        let start = Instant::now();
        let serial = frame.serial;

        let submitted = frame
            .command_buffer
            .finish()
            .and_then(|cb| self.device.submit(cb).map_err(FrameError::from));
        let submit_time = start.elapsed();
        self.update_stats(&frame, submit_time);

        match submitted {
            Ok(fence) => {
                self.tracker.submitted(serial, fence);
                log::trace!(
                    "Controller: submitted frame {} ({} draws)",
                    serial,
                    self.stats.draw_calls
                );
                Ok(frame.report)
            }
            Err(err) => {
                let source = match err {
                    FrameError::Resource(source) => source,
                    other => {
                        self.tracker.abandoned(serial);
                        self.notify(serial, CompletionStatus::Abandoned);
                        return Err(other);
                    }
                };
                log::error!("Controller: frame {serial} submission failed: {source}");
                self.tracker.abandoned(serial);
                self.notify(serial, CompletionStatus::SubmissionFailed);
                Err(FrameError::Submission {
                    frame: serial,
                    source,
                })
            }
        }
    }

    /// Discards `frame` without submitting it.
    ///
    /// Resources written for the frame stay inert and are reusable right away.
    pub fn abandon(&mut self, frame: Frame) -> Result<(), FrameError> {
        if self.active != Some(frame.serial) {
            return Err(FrameError::NoActiveFrame(frame.serial));
        }
        self.active = None;
        if let Ok(cb) = frame.command_buffer.finish() {
            self.device.discard_command_buffer(cb);
        }
        self.tracker.abandoned(frame.serial);
        self.notify(frame.serial, CompletionStatus::Abandoned);
        log::info!(
            "Controller: abandoned frame {} ({} draws discarded)",
            frame.serial,
            frame.report.recorded.len()
        );
        Ok(())
    }

    /// Removes the render command of a draw item.
    ///
    /// Its uniform buffers and descriptor sets are destroyed once no submitted
    /// frame still references them. Returns `false` if the item was unknown.
    pub fn remove_draw_item(&mut self, id: DrawItemId) -> bool {
        match self.commands.remove(&id) {
            Some(command) => {
                log::debug!("Controller: removed render command for '{}'", command.label());
                true
            }
            None => false,
        }
    }

    /// Returns `true` if a render command exists for `id`.
    pub fn contains(&self, id: DrawItemId) -> bool {
        self.commands.contains_key(&id)
    }

    /// The render command of a draw item.
    pub fn command(&self, id: DrawItemId) -> Option<&RenderCommand> {
        self.commands.get(&id)
    }

    /// Number of live render commands.
    pub fn command_count(&self) -> usize {
        self.commands.len()
    }

    /// Invalidates every pipeline built from `program`, for shader hot reload.
    ///
    /// Render commands using them rebuild on their next preparation, and
    /// commands whose pipeline failed to build get another attempt.
    pub fn invalidate_shader(&mut self, program: ShaderProgramId) -> usize {
        self.cache.invalidate_program(program)
    }

    /// Subscribes to frame completion notifications.
    ///
    /// Every submitted frame is reported once when it retires, or when its
    /// submission fails. Abandoned frames are reported too.
    pub fn subscribe(&mut self) -> flume::Receiver<FrameCompletion> {
        let (sender, receiver) = flume::unbounded();
        self.subscribers.push(sender);
        receiver
    }

    /// Retires completed frames, notifies subscribers and destroys released
    /// resources no retired frame can still use.
    ///
    /// Returns the newly retired frames, oldest first.
    pub fn poll(&mut self) -> Vec<FrameSerial> {
        let retired = self.tracker.poll(&*self.device);
        for serial in &retired {
            self.notify(*serial, CompletionStatus::Retired);
        }
        self.releases
            .collect(self.tracker.watermark(), &*self.device);
        self.cache.purge();
        retired
    }

    /// Waits up to `timeout` for every submitted frame to retire, then polls.
    ///
    /// Returns `true` if the GPU is idle.
    pub fn wait_idle(&mut self, timeout: Duration) -> bool {
        let idle = self.tracker.wait_idle(timeout, &*self.device);
        self.poll();
        idle && self.tracker.in_flight_len() == 0
    }

    /// Statistics of the last submitted frame.
    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// The pipeline cache.
    pub fn cache(&self) -> &PipelineCache {
        &self.cache
    }

    /// The submitted frames.
    pub fn tracker(&self) -> &FrameTracker {
        &self.tracker
    }

    /// The renderer configuration.
    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Released resources still waiting for their last frame to retire.
    pub fn pending_releases(&self) -> usize {
        self.releases.pending_len()
    }

    fn prepare(&mut self, order: &[DrawItemId]) -> AHashMap<DrawItemId, Result<(), CommandError>> {
        let ctx = PrepareContext {
            device: &*self.device,
            cache: &self.cache,
            releaser: &self.releaser,
            config: &self.config,
            binder: self.binder,
        };
        let wanted: AHashSet<DrawItemId> = order.iter().copied().collect();
        let mut pending: Vec<&mut RenderCommand> = self
            .commands
            .values_mut()
            .filter(|command| wanted.contains(&command.id()))
            .collect();

        let workers = self.config.prepare_workers.max(1);
        if !self.config.parallel_prepare || workers == 1 || pending.len() < 2 {
            return pending
                .into_iter()
                .map(|command| (command.id(), command.prepare_resources(&ctx)))
                .collect();
        }

        let chunk_size = pending.len().div_ceil(workers);
        std::thread::scope(|scope| {
            let handles: Vec<_> = pending
                .chunks_mut(chunk_size)
                .map(|chunk| {
                    scope.spawn(move || {
                        chunk
                            .iter_mut()
                            .map(|command| (command.id(), command.prepare_resources(&ctx)))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
                })
                .collect()
        })
    }

    fn update_stats(&mut self, frame: &Frame, submit_time: Duration) {
        let deferred = frame.report.deferred();
        self.stats = FrameStats {
            frame: frame.serial,
            draw_calls: frame.command_buffer.draw_count(),
            skipped: frame.report.skipped.len() - deferred,
            deferred,
            binding_mismatches: frame.report.mismatches.len(),
            cache: self.cache.stats(),
            prepare_ms: frame.prepare_time.as_secs_f64() * 1000.0,
            record_ms: frame.record_time.as_secs_f64() * 1000.0,
            submit_ms: submit_time.as_secs_f64() * 1000.0,
            in_flight: self.tracker.in_flight_len(),
        };
    }

    fn notify(&mut self, frame: FrameSerial, status: CompletionStatus) {
        let completion = FrameCompletion { frame, status };
        self.subscribers
            .retain(|subscriber| subscriber.send(completion).is_ok());
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("device", &self.device)
            .field("commands", &self.commands.len())
            .field("last_serial", &self.last_serial)
            .field("active", &self.active)
            .field("in_flight", &self.tracker.in_flight_len())
            .finish()
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.commands.clear();
        if self.tracker.wait_idle(SHUTDOWN_TIMEOUT, &*self.device) {
            self.poll();
            let destroyed = self.releases.flush(&*self.device);
            log::info!("Controller: shut down, released {destroyed} resources");
        } else {
            log::warn!(
                "Controller: GPU still busy after {:?}, leaking {} resources",
                SHUTDOWN_TIMEOUT,
                self.releases.pending_len()
            );
        }
    }
}
