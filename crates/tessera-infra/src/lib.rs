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

//! # Tessera Infra
//!
//! Concrete implementations of the backend contracts defined in `tessera-core`.
//!
//! The only backend shipped today is the [`HeadlessDevice`], a CPU-simulated
//! explicit graphics API. It keeps buffer contents in memory, executes recorded
//! draws when their submission retires, and lets the caller decide when the
//! simulated GPU catches up.

#![warn(missing_docs)]

#[cfg(feature = "graphics")]
pub mod graphics;

#[cfg(feature = "graphics")]
pub use graphics::headless::{
    CallCounts, ExecutedDraw, GpuTimeline, Hazard, HazardKind, HeadlessDevice, HeadlessRecorder,
    RecordedCommand, UniformRead,
};
