use crate::descriptor::DescriptorIndex;
use crate::device::NativeSampler;
use crate::lifetime::{Lifetime, LifetimeTagged};
use crate::resources::format::{TextureFilter, WrapMode};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SamplerDesc {
    pub name: String,
    pub wrap_mode: WrapMode,
    pub filter: TextureFilter,
    pub lifetime: Lifetime,
}

impl SamplerDesc {
    pub fn new(name: impl Into<String>, wrap_mode: WrapMode, filter: TextureFilter) -> Self {
        Self {
            name: name.into(),
            wrap_mode,
            filter,
            lifetime: Lifetime::Persistent,
        }
    }

    #[inline]
    pub fn short_lived(mut self) -> Self {
        self.lifetime = Lifetime::ShortLived;
        self
    }
}

#[derive(Debug)]
pub struct SamplerRecord {
    pub(crate) desc: SamplerDesc,
    pub(crate) native: NativeSampler,
    pub(crate) descriptor: DescriptorIndex,
}

impl SamplerRecord {
    #[inline]
    pub fn desc(&self) -> &SamplerDesc {
        &self.desc
    }
    #[inline]
    pub fn native(&self) -> NativeSampler {
        self.native
    }
    #[inline]
    pub fn descriptor(&self) -> DescriptorIndex {
        self.descriptor
    }
}

impl LifetimeTagged for SamplerRecord {
    fn lifetime(&self) -> Lifetime {
        self.desc.lifetime
    }
}
