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

//! Tracking of submitted frames and their GPU completion.
//!
//! Every submitted frame is remembered with the fence its submission returned.
//! Frames retire in submission order; the retired watermark `W` is the newest
//! serial such that every frame up to and including `W` is done with the GPU.
//! Frames abandoned before submission never reach the GPU and count as retired.

use std::collections::{BTreeSet, VecDeque};
use std::time::{Duration, Instant};
use tessera_core::renderer::{FenceId, FrameSerial, GraphicsDevice};

/// How a frame ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    /// The GPU finished executing the frame.
    Retired,
    /// The frame was discarded before submission.
    Abandoned,
    /// The backend rejected the submission; nothing executed.
    SubmissionFailed,
}

/// Notification that a frame no longer uses any GPU resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCompletion {
    /// The frame.
    pub frame: FrameSerial,
    /// How it ended.
    pub status: CompletionStatus,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    serial: FrameSerial,
    fence: FenceId,
}

/// Submitted frames and the retired watermark.
#[derive(Debug, Default)]
pub struct FrameTracker {
    in_flight: VecDeque<InFlight>,
    abandoned: BTreeSet<FrameSerial>,
    latest_closed: FrameSerial,
}

impl FrameTracker {
    /// An empty tracker: no frame has been submitted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the submission of `serial`, guarded by `fence`.
    pub fn submitted(&mut self, serial: FrameSerial, fence: FenceId) {
        debug_assert!(serial > self.latest_closed);
        self.in_flight.push_back(InFlight { serial, fence });
        self.latest_closed = serial;
    }

    /// Records that `serial` will never be submitted.
    pub fn abandoned(&mut self, serial: FrameSerial) {
        self.abandoned.insert(serial);
        self.latest_closed = self.latest_closed.max(serial);
        self.prune();
    }

    /// All frames up to and including the returned serial have retired.
    pub fn watermark(&self) -> FrameSerial {
        match self.in_flight.front() {
            Some(oldest) => FrameSerial(oldest.serial.0 - 1),
            None => self.latest_closed,
        }
    }

    /// Returns `true` if the GPU can no longer be reading anything frame
    /// `serial` referenced.
    pub fn is_retired(&self, serial: FrameSerial, device: &dyn GraphicsDevice) -> bool {
        if serial.is_none() || serial <= self.watermark() || self.abandoned.contains(&serial) {
            return true;
        }
        self.in_flight
            .iter()
            .find(|f| f.serial == serial)
            .is_some_and(|f| device.is_fence_signaled(f.fence))
    }

    /// Retires leading frames whose fences have signaled, releasing their fences.
    ///
    /// Returns the newly retired serials, oldest first.
    pub fn poll(&mut self, device: &dyn GraphicsDevice) -> Vec<FrameSerial> {
        let mut retired = Vec::new();
        while let Some(oldest) = self.in_flight.front().copied() {
            if !device.is_fence_signaled(oldest.fence) {
                break;
            }
            device.destroy_fence(oldest.fence);
            self.in_flight.pop_front();
            retired.push(oldest.serial);
        }
        if !retired.is_empty() {
            self.prune();
            log::trace!(
                "FrameTracker: retired {:?}, watermark {}",
                retired,
                self.watermark()
            );
        }
        retired
    }

    /// Waits up to `timeout` for frame `serial` to retire.
    ///
    /// Returns `false` on timeout, or if `serial` was never submitted.
    pub fn wait_for(
        &self,
        serial: FrameSerial,
        timeout: Duration,
        device: &dyn GraphicsDevice,
    ) -> bool {
        if self.is_retired(serial, device) {
            return true;
        }
        match self.in_flight.iter().find(|f| f.serial == serial) {
            Some(frame) => device.wait_for_fence(frame.fence, timeout),
            None => false,
        }
    }

    /// Waits for every in-flight frame, sharing one `timeout` budget.
    ///
    /// Returns `true` if all of them signaled.
    pub fn wait_idle(&self, timeout: Duration, device: &dyn GraphicsDevice) -> bool {
        let deadline = Instant::now() + timeout;
        self.in_flight.iter().all(|frame| {
            let remaining = deadline.saturating_duration_since(Instant::now());
            device.wait_for_fence(frame.fence, remaining)
        })
    }

    /// Number of submitted frames not yet retired.
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    fn prune(&mut self) {
        let watermark = self.watermark();
        self.abandoned.retain(|s| *s > watermark);
    }
}
