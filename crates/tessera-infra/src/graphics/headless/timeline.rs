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

//! The simulated GPU timeline.

/// When submitted work completes on the simulated GPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GpuTimeline {
    /// Work completes as soon as it is submitted.
    #[default]
    Immediate,
    /// At most `n` submissions are pending; submitting one more completes the
    /// oldest. Waiting on a fence completes everything up to that fence.
    Latency(usize),
    /// Nothing completes until [`retire_next`](super::HeadlessDevice::retire_next)
    /// or [`retire_all`](super::HeadlessDevice::retire_all) is called. Waiting on
    /// a fence blocks until another thread retires it or the timeout expires.
    Manual,
}

impl GpuTimeline {
    /// How many submissions may stay pending after a submit.
    pub(crate) fn max_pending(self) -> Option<usize> {
        match self {
            GpuTimeline::Immediate => Some(0),
            GpuTimeline::Latency(n) => Some(n),
            GpuTimeline::Manual => None,
        }
    }

    /// Returns `true` if waiting on a fence makes the GPU catch up.
    pub(crate) fn completes_on_wait(self) -> bool {
        !matches!(self, GpuTimeline::Manual)
    }
}
