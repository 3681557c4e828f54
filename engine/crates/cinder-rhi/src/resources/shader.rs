use crate::device::NativeShader;
use crate::lifetime::{Lifetime, LifetimeTagged};
use crate::resources::states::ShaderStage;

/// 已编译的 shader 字节码；编译本身不属于 RHI
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderDesc {
    pub name: String,
    pub stage: ShaderStage,
    pub bytecode: Vec<u8>,
    pub lifetime: Lifetime,
}

impl ShaderDesc {
    pub fn new(name: impl Into<String>, stage: ShaderStage, bytecode: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            stage,
            bytecode,
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
pub struct ShaderRecord {
    pub(crate) name: String,
    pub(crate) stage: ShaderStage,
    pub(crate) byte_count: usize,
    pub(crate) native: NativeShader,
    pub(crate) lifetime: Lifetime,
}

impl ShaderRecord {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
    #[inline]
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }
    #[inline]
    pub fn byte_count(&self) -> usize {
        self.byte_count
    }
    #[inline]
    pub fn native(&self) -> NativeShader {
        self.native
    }
}

impl LifetimeTagged for ShaderRecord {
    fn lifetime(&self) -> Lifetime {
        self.lifetime
    }
}
