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

//! A headless, CPU-simulated graphics backend.
//!
//! [`HeadlessDevice`] implements [`GraphicsDevice`](tessera_core::renderer::GraphicsDevice)
//! without any GPU. Submissions are queued on a simulated timeline
//! ([`GpuTimeline`]) and "execute" when they retire: every draw reads the
//! uniform data its descriptor sets point at *at that moment*, so a CPU write
//! that lands before the GPU caught up shows up as corrupted data in
//! [`ExecutedDraw`], and as a [`Hazard`].

mod device;
mod recorder;
mod timeline;

pub use self::device::{CallCounts, ExecutedDraw, Hazard, HazardKind, HeadlessDevice, UniformRead};
pub use self::recorder::{HeadlessRecorder, RecordedCommand};
pub use self::timeline::GpuTimeline;
