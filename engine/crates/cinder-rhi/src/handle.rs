use std::fmt;

/// RHI 管理的所有资源种类
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Buffer,
    Texture,
    Sampler,
    RootSignature,
    DescriptorTable,
    Pipeline,
    Shader,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 7] = [
        ResourceKind::Buffer,
        ResourceKind::Texture,
        ResourceKind::Sampler,
        ResourceKind::RootSignature,
        ResourceKind::DescriptorTable,
        ResourceKind::Pipeline,
        ResourceKind::Shader,
    ];

    #[inline]
    pub const fn name(self) -> &'static str {
        match self {
            ResourceKind::Buffer => "Buffer",
            ResourceKind::Texture => "Texture",
            ResourceKind::Sampler => "Sampler",
            ResourceKind::RootSignature => "RootSignature",
            ResourceKind::DescriptorTable => "DescriptorTable",
            ResourceKind::Pipeline => "Pipeline",
            ResourceKind::Shader => "Shader",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 未区分类型的代际句柄
///
/// 句柄只是对池中 slot 的弱引用：可以随意复制、比较，不持有资源。
/// 只有当 `pool[index]` 正在使用且 generation 相同时句柄才有效。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle {
    kind: ResourceKind,
    index: u32,
    generation: u16,
}

impl Handle {
    /// index 的上限，和 16 bit 的 slot 索引空间保持一致
    pub const MAX_INDEX: u32 = u16::MAX as u32;

    #[inline]
    pub const fn new(kind: ResourceKind, index: u32, generation: u16) -> Self {
        Self {
            kind,
            index,
            generation,
        }
    }

    #[inline]
    pub const fn kind(&self) -> ResourceKind {
        self.kind
    }

    #[inline]
    pub const fn index(&self) -> u32 {
        self.index
    }

    #[inline]
    pub const fn generation(&self) -> u16 {
        self.generation
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.kind, self.index, self.generation)
    }
}

/// 强类型句柄的公共接口，`HandlePool` 通过它在类型句柄和原始句柄之间转换
pub trait PoolHandle: Copy + Eq + fmt::Debug {
    const KIND: ResourceKind;

    /// 不做校验的转换；kind 的检查发生在池查询时
    fn from_raw(raw: Handle) -> Self;

    fn raw(&self) -> Handle;
}

macro_rules! typed_handle {
    ($(#[$meta:meta])* $name:ident => $kind:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Handle);

        impl PoolHandle for $name {
            const KIND: ResourceKind = ResourceKind::$kind;

            #[inline]
            fn from_raw(raw: Handle) -> Self {
                Self(raw)
            }

            #[inline]
            fn raw(&self) -> Handle {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<$name> for Handle {
            #[inline]
            fn from(value: $name) -> Handle {
                value.0
            }
        }
    };
}

typed_handle!(
    /// GPU Buffer
    BufferHandle => Buffer
);
typed_handle!(
    /// GPU Texture，包括 render target 与 depth stencil
    TextureHandle => Texture
);
typed_handle!(SamplerHandle => Sampler);
typed_handle!(RootSignatureHandle => RootSignature);
typed_handle!(DescriptorTableHandle => DescriptorTable);
typed_handle!(
    /// graphics 与 compute pipeline 共用一个池
    PipelineHandle => Pipeline
);
typed_handle!(ShaderHandle => Shader);
