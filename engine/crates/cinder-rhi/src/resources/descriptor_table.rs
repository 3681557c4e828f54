use std::collections::HashMap;

use crate::device::NativeTable;
use crate::handle::{BufferHandle, Handle, RootSignatureHandle, SamplerHandle, TextureHandle};
use crate::lifetime::{Lifetime, LifetimeTagged};
use crate::resources::format::DescriptorType;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DescriptorTableDesc {
    pub name: String,
    pub root_signature: RootSignatureHandle,
    pub lifetime: Lifetime,
}

impl DescriptorTableDesc {
    pub fn new(name: impl Into<String>, root_signature: RootSignatureHandle) -> Self {
        Self {
            name: name.into(),
            root_signature,
            lifetime: Lifetime::Persistent,
        }
    }

    #[inline]
    pub fn short_lived(mut self) -> Self {
        self.lifetime = Lifetime::ShortLived;
        self
    }
}

/// RW texture 绑定哪些 mip
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MipSelection {
    /// 每个 texture 绑定同一个 mip
    Slice(u32),
    /// 第一个 texture 的连续 mip 依次绑定到连续的 slot，从 mip 0 开始
    Chain,
}

/// 一次描述符表更新写入的资源
#[derive(Clone, Copy, Debug)]
pub enum DescriptorResources<'a> {
    Buffers(&'a [BufferHandle]),
    RwBuffers(&'a [BufferHandle]),
    Textures(&'a [TextureHandle]),
    RwTextures {
        textures: &'a [TextureHandle],
        mip: MipSelection,
    },
    Samplers(&'a [SamplerHandle]),
}

impl DescriptorResources<'_> {
    pub fn descriptor_type(&self) -> DescriptorType {
        match self {
            DescriptorResources::Buffers(_) => DescriptorType::Buffer,
            DescriptorResources::RwBuffers(_) => DescriptorType::RwBuffer,
            DescriptorResources::Textures(_) => DescriptorType::Texture,
            DescriptorResources::RwTextures { .. } => DescriptorType::RwTexture,
            DescriptorResources::Samplers(_) => DescriptorType::Sampler,
        }
    }
}

#[derive(Debug)]
pub struct DescriptorTableRecord {
    pub(crate) name: String,
    pub(crate) root_signature: RootSignatureHandle,
    pub(crate) native: NativeTable,
    /// 当前指向真实资源（而不是 null view）的 slot
    pub(crate) bindings: HashMap<(DescriptorType, u32), Handle>,
    pub(crate) lifetime: Lifetime,
}

impl DescriptorTableRecord {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
    #[inline]
    pub fn root_signature(&self) -> RootSignatureHandle {
        self.root_signature
    }
    #[inline]
    pub fn native(&self) -> NativeTable {
        self.native
    }

    /// slot 当前绑定的资源；`None` 表示 null view
    #[inline]
    pub fn binding(&self, ty: DescriptorType, index: u32) -> Option<Handle> {
        self.bindings.get(&(ty, index)).copied()
    }

    #[inline]
    pub fn bound_slot_count(&self) -> usize {
        self.bindings.len()
    }

    /// 引用了 `resource` 的所有 slot
    pub(crate) fn slots_referencing(&self, resource: Handle) -> Vec<(DescriptorType, u32)> {
        let mut slots: Vec<_> = self
            .bindings
            .iter()
            .filter(|(_, bound)| **bound == resource)
            .map(|(slot, _)| *slot)
            .collect();
        slots.sort_unstable();
        slots
    }
}

impl LifetimeTagged for DescriptorTableRecord {
    fn lifetime(&self) -> Lifetime {
        self.lifetime
    }
}
