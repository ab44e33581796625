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

//! The per-frame rendering core of Tessera.
//!
//! This crate turns an ordered list of [`DrawItem`]s into recorded, submitted
//! command buffers. It is built from a handful of collaborating parts:
//!
//! - [`PipelineCache`]: deduplicates pipeline construction by structural
//!   equality of [`PipelineStateDescriptor`](tessera_core::renderer::PipelineStateDescriptor).
//! - [`DescriptorBinder`]: maps named uniform blocks and texture slots onto the
//!   shader interface of a pipeline.
//! - [`FrameResourceRing`]: per-command uniform buffers and descriptor sets,
//!   cycled so the CPU never writes what an in-flight frame still reads.
//! - [`RenderCommand`]: the persistent unit of work for one draw item.
//! - [`FrameTracker`]: submission fences and the retired-frame watermark.
//! - [`Controller`]: drives a frame from draw items to submission.

#![warn(missing_docs)]

pub mod binder;
pub mod command_buffer;
pub mod config;
pub mod controller;
pub mod draw_item;
pub mod error;
pub mod frame;
pub mod pipeline_cache;
pub mod render_command;
pub mod ring;

pub use binder::{BindingMismatch, DescriptorBinder, MismatchReason, ResolvedBindings, UniformLayout};
pub use command_buffer::CommandBuffer;
pub use config::{ExhaustionPolicy, RendererConfig};
pub use controller::{Controller, Frame, FrameReport, FrameStats, SkippedItem};
pub use draw_item::{DrawItem, DrawItemId, Geometry, IndexBinding, TextureBinding, UniformBlockData};
pub use error::{CommandError, ConfigError, FrameError};
pub use frame::{CompletionStatus, FrameCompletion, FrameTracker};
pub use pipeline_cache::{CacheStats, Pipeline, PipelineCache};
pub use render_command::{FrameContext, PrepareContext, RenderCommand};
pub use ring::{FrameResourceRing, FrameSlot, SlotLayout};
