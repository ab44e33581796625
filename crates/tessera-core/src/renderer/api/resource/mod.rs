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

//! GPU resource handles the renderer refers to.
//!
//! Buffers are created by the renderer itself for uniform data. Texture views,
//! samplers and geometry buffers are owned by the asset layer; only their ids
//! travel through the renderer.

pub mod buffer;
pub mod texture;

pub use self::buffer::*;
pub use self::texture::*;
