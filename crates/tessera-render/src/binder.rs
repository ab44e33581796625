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

//! Translation of named bindings into descriptor set slots.
//!
//! A draw item names its uniform blocks and textures the way the shader declares
//! them. The binder validates those names against the pipeline's reflected
//! [`ShaderInterface`] and turns them into `(set, binding)` writes. A name the
//! shader does not know, or a resource of the wrong kind, is a
//! [`BindingMismatch`]: it is logged and skipped, and the draw still records.

use std::fmt;
use tessera_core::renderer::{
    BindingKind, BufferId, DescriptorWrite, SamplerId, ShaderInterface, TextureViewId,
};

use crate::draw_item::{TextureBinding, UniformBlockData};

/// Why a named binding was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MismatchReason {
    /// The shader interface has no binding with that name.
    UnknownName,
    /// The name exists but expects another kind of resource.
    KindMismatch {
        /// What the shader expects at that slot.
        expected: BindingKind,
    },
    /// The uniform data is larger than the block the shader declares.
    Oversized {
        /// Declared block size in bytes.
        block_size: u64,
        /// Supplied data size in bytes.
        data_size: u64,
    },
}

/// A named binding that does not fit the shader interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingMismatch {
    /// Label of the draw item that supplied the binding.
    pub item: String,
    /// The binding name.
    pub name: String,
    /// Why it was skipped.
    pub reason: MismatchReason,
}

impl fmt::Display for BindingMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason {
            MismatchReason::UnknownName => write!(
                f,
                "'{}': shader has no binding named '{}'",
                self.item, self.name
            ),
            MismatchReason::KindMismatch { expected } => write!(
                f,
                "'{}': binding '{}' expects {:?}",
                self.item, self.name, expected
            ),
            MismatchReason::Oversized {
                block_size,
                data_size,
            } => write!(
                f,
                "'{}': {} bytes supplied for {}-byte block '{}'",
                self.item, data_size, block_size, self.name
            ),
        }
    }
}

/// Placement of one uniform block inside a slot's uniform buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformBlockSlot {
    /// The block name.
    pub name: String,
    /// Descriptor set index.
    pub set: u32,
    /// Binding index within the set.
    pub binding: u32,
    /// Byte offset inside the uniform buffer.
    pub offset: u64,
    /// Declared block size in bytes.
    pub size: u64,
}

/// How every uniform block of an interface is packed into one buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UniformLayout {
    /// One entry per uniform block, in `(set, binding)` order.
    pub blocks: Vec<UniformBlockSlot>,
    /// Total buffer size in bytes.
    pub total_size: u64,
}

impl UniformLayout {
    /// Returns `true` if the interface declares no uniform blocks.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// A uniform block matched to the data supplying it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedUniform {
    /// Index into [`UniformLayout::blocks`].
    pub block: usize,
    /// Index into the draw item's uniform list.
    pub source: usize,
}

/// A texture binding matched to its descriptor slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedTexture {
    /// Descriptor set index.
    pub set: u32,
    /// Binding index within the set.
    pub binding: u32,
    /// The texture view.
    pub view: TextureViewId,
    /// The sampler.
    pub sampler: SamplerId,
}

/// The outcome of resolving a draw item's bindings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedBindings {
    /// Uniform blocks with data.
    pub uniforms: Vec<ResolvedUniform>,
    /// Texture bindings with a matching slot.
    pub textures: Vec<ResolvedTexture>,
    /// Skipped bindings.
    pub mismatches: Vec<BindingMismatch>,
}

/// The Descriptor/UBO binder.
#[derive(Debug, Clone, Copy)]
pub struct DescriptorBinder {
    alignment: u64,
}

impl DescriptorBinder {
    /// A binder placing uniform blocks at multiples of `alignment` bytes.
    pub fn new(alignment: u64) -> Self {
        Self {
            alignment: alignment.max(1),
        }
    }

    /// Packs every uniform block of `interface` into one buffer layout.
    pub fn layout(&self, interface: &ShaderInterface) -> UniformLayout {
        let mut offset = 0;
        let blocks = interface
            .uniform_blocks()
            .map(|b| {
                let slot = UniformBlockSlot {
                    name: b.name.clone(),
                    set: b.set,
                    binding: b.binding,
                    offset,
                    size: b.size,
                };
                offset = align_up(offset + b.size.max(1), self.alignment);
                slot
            })
            .collect();

        UniformLayout {
            blocks,
            total_size: offset,
        }
    }

    /// Matches a draw item's named bindings against `interface`.
    ///
    /// Mismatches are logged at `warn` level and reported; they never fail.
    pub fn resolve(
        &self,
        label: &str,
        interface: &ShaderInterface,
        layout: &UniformLayout,
        uniforms: &[UniformBlockData],
        textures: &[TextureBinding],
    ) -> ResolvedBindings {
        let mut resolved = ResolvedBindings::default();
        let mismatch = |name: &str, reason: MismatchReason| {
            let m = BindingMismatch {
                item: label.to_owned(),
                name: name.to_owned(),
                reason,
            };
            log::warn!("DescriptorBinder: skipping binding, {m}");
            m
        };

        for (source, data) in uniforms.iter().enumerate() {
            let Some(binding) = interface.find(&data.name) else {
                resolved
                    .mismatches
                    .push(mismatch(&data.name, MismatchReason::UnknownName));
                continue;
            };
            if binding.kind != BindingKind::UniformBuffer {
                resolved.mismatches.push(mismatch(
                    &data.name,
                    MismatchReason::KindMismatch {
                        expected: binding.kind,
                    },
                ));
                continue;
            }
            if data.bytes.len() as u64 > binding.size {
                resolved.mismatches.push(mismatch(
                    &data.name,
                    MismatchReason::Oversized {
                        block_size: binding.size,
                        data_size: data.bytes.len() as u64,
                    },
                ));
                continue;
            }
            if let Some(block) = layout.blocks.iter().position(|b| b.name == data.name) {
                resolved.uniforms.push(ResolvedUniform { block, source });
            }
        }

        for texture in textures {
            let Some(binding) = interface.find(&texture.name) else {
                resolved
                    .mismatches
                    .push(mismatch(&texture.name, MismatchReason::UnknownName));
                continue;
            };
            if binding.kind != BindingKind::CombinedImageSampler {
                resolved.mismatches.push(mismatch(
                    &texture.name,
                    MismatchReason::KindMismatch {
                        expected: binding.kind,
                    },
                ));
                continue;
            }
            resolved.textures.push(ResolvedTexture {
                set: binding.set,
                binding: binding.binding,
                view: texture.view,
                sampler: texture.sampler,
            });
        }

        resolved
    }

    /// Descriptor writes pointing every uniform block at its range of `buffer`,
    /// grouped by set index.
    pub fn uniform_writes(&self, layout: &UniformLayout, buffer: BufferId) -> Vec<(u32, DescriptorWrite)> {
        layout
            .blocks
            .iter()
            .map(|b| {
                (
                    b.set,
                    DescriptorWrite::uniform(b.binding, buffer, b.offset, b.size),
                )
            })
            .collect()
    }

    /// Descriptor writes for resolved textures, grouped by set index.
    pub fn texture_writes(&self, textures: &[ResolvedTexture]) -> Vec<(u32, DescriptorWrite)> {
        textures
            .iter()
            .map(|t| (t.set, DescriptorWrite::texture(t.binding, t.view, t.sampler)))
            .collect()
    }
}

fn align_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::renderer::InterfaceBinding;

    fn interface() -> ShaderInterface {
        ShaderInterface::new(vec![
            InterfaceBinding::uniform("transform", 0, 0, 64),
            InterfaceBinding::uniform("material", 0, 1, 16),
            InterfaceBinding::texture("albedo", 1, 0),
        ])
    }

    #[test]
    fn test_layout_aligns_blocks() {
        let layout = DescriptorBinder::new(256).layout(&interface());
        let offsets: Vec<u64> = layout.blocks.iter().map(|b| b.offset).collect();
        assert_eq!(offsets, vec![0, 256]);
        assert_eq!(layout.total_size, 512);
    }

    #[test]
    fn test_resolve_matches_names_and_reports_mismatches() {
        let binder = DescriptorBinder::new(256);
        let interface = interface();
        let layout = binder.layout(&interface);
        let uniforms = vec![
            UniformBlockData::new("material", vec![0; 16]),
            UniformBlockData::new("lighting", vec![0; 16]),
            UniformBlockData::new("albedo", vec![0; 4]),
        ];
        let textures = vec![
            TextureBinding::new("albedo", TextureViewId(3), SamplerId(4)),
            TextureBinding::new("normal_map", TextureViewId(5), SamplerId(4)),
        ];

        let resolved = binder.resolve("crate", &interface, &layout, &uniforms, &textures);

        assert_eq!(resolved.uniforms, vec![ResolvedUniform { block: 1, source: 0 }]);
        assert_eq!(resolved.textures.len(), 1);
        assert_eq!((resolved.textures[0].set, resolved.textures[0].binding), (1, 0));

        let reasons: Vec<(&str, MismatchReason)> = resolved
            .mismatches
            .iter()
            .map(|m| (m.name.as_str(), m.reason))
            .collect();
        assert_eq!(
            reasons,
            vec![
                ("lighting", MismatchReason::UnknownName),
                (
                    "albedo",
                    MismatchReason::KindMismatch {
                        expected: BindingKind::CombinedImageSampler
                    }
                ),
                ("normal_map", MismatchReason::UnknownName),
            ]
        );
    }

    #[test]
    fn test_oversized_uniform_is_skipped() {
        let binder = DescriptorBinder::new(16);
        let interface = interface();
        let layout = binder.layout(&interface);
        let uniforms = vec![UniformBlockData::new("material", vec![0; 32])];

        let resolved = binder.resolve("big", &interface, &layout, &uniforms, &[]);
        assert!(resolved.uniforms.is_empty());
        assert_eq!(
            resolved.mismatches[0].reason,
            MismatchReason::Oversized {
                block_size: 16,
                data_size: 32
            }
        );
    }

    #[test]
    fn test_uniform_writes_cover_every_block() {
        let binder = DescriptorBinder::new(256);
        let layout = binder.layout(&interface());
        let writes = binder.uniform_writes(&layout, BufferId(9));
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[1], (0, DescriptorWrite::uniform(1, BufferId(9), 256, 16)));
    }
}
