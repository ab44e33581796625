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

//! Shader programs and their reflected binding interface.

use crate::renderer::api::util::flags::ShaderStageFlags;

/// An opaque handle representing a linked shader program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderProgramId(pub usize);

/// The kind of resource a shader binding expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    /// A uniform block backed by a uniform buffer range.
    UniformBuffer,
    /// A texture view paired with a sampler.
    CombinedImageSampler,
}

/// One named input of a shader program's binding interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceBinding {
    /// The name the shader declares for the uniform block or texture.
    pub name: String,
    /// The descriptor set index.
    pub set: u32,
    /// The binding index within the set.
    pub binding: u32,
    /// What kind of resource the slot expects.
    pub kind: BindingKind,
    /// Size in bytes of a uniform block, `0` for textures.
    pub size: u64,
    /// The stages that read this binding.
    pub visibility: ShaderStageFlags,
}

impl InterfaceBinding {
    /// A uniform block of `size` bytes at `(set, binding)`.
    pub fn uniform(name: impl Into<String>, set: u32, binding: u32, size: u64) -> Self {
        Self {
            name: name.into(),
            set,
            binding,
            kind: BindingKind::UniformBuffer,
            size,
            visibility: ShaderStageFlags::VERTEX_FRAGMENT,
        }
    }

    /// A combined texture/sampler slot at `(set, binding)`.
    pub fn texture(name: impl Into<String>, set: u32, binding: u32) -> Self {
        Self {
            name: name.into(),
            set,
            binding,
            kind: BindingKind::CombinedImageSampler,
            size: 0,
            visibility: ShaderStageFlags::FRAGMENT,
        }
    }
}

/// The reflected binding interface of a shader program.
///
/// Entries are kept sorted by `(set, binding)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderInterface {
    bindings: Vec<InterfaceBinding>,
}

impl ShaderInterface {
    /// Builds an interface from an unordered list of bindings.
    pub fn new(mut bindings: Vec<InterfaceBinding>) -> Self {
        bindings.sort_by_key(|b| (b.set, b.binding));
        Self { bindings }
    }

    /// Looks up a binding by the name the shader declares.
    pub fn find(&self, name: &str) -> Option<&InterfaceBinding> {
        self.bindings.iter().find(|b| b.name == name)
    }

    /// All bindings, sorted by `(set, binding)`.
    pub fn bindings(&self) -> &[InterfaceBinding] {
        &self.bindings
    }

    /// The distinct descriptor set indices used, ascending.
    pub fn set_indices(&self) -> Vec<u32> {
        let mut sets: Vec<u32> = self.bindings.iter().map(|b| b.set).collect();
        sets.dedup();
        sets
    }

    /// Bindings belonging to descriptor set `set`.
    pub fn entries_for_set(&self, set: u32) -> impl Iterator<Item = &InterfaceBinding> {
        self.bindings.iter().filter(move |b| b.set == set)
    }

    /// All uniform block bindings.
    pub fn uniform_blocks(&self) -> impl Iterator<Item = &InterfaceBinding> {
        self.bindings
            .iter()
            .filter(|b| b.kind == BindingKind::UniformBuffer)
    }

    /// Returns `true` if the program binds no resources at all.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interface() -> ShaderInterface {
        ShaderInterface::new(vec![
            InterfaceBinding::texture("albedo", 1, 0),
            InterfaceBinding::uniform("material", 0, 1, 32),
            InterfaceBinding::uniform("transform", 0, 0, 64),
        ])
    }

    #[test]
    fn test_bindings_are_sorted_and_grouped_by_set() {
        let interface = interface();
        let order: Vec<&str> = interface.bindings().iter().map(|b| b.name.as_str()).collect();
        assert_eq!(order, vec!["transform", "material", "albedo"]);
        assert_eq!(interface.set_indices(), vec![0, 1]);
        assert_eq!(interface.entries_for_set(0).count(), 2);
        assert_eq!(interface.uniform_blocks().count(), 2);
    }

    #[test]
    fn test_find_by_name() {
        let interface = interface();
        let albedo = interface.find("albedo").map(|b| (b.set, b.binding, b.kind));
        assert_eq!(albedo, Some((1, 0, BindingKind::CombinedImageSampler)));
        assert!(interface.find("missing").is_none());
        assert!(ShaderInterface::default().is_empty());
    }
}
