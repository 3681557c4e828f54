use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TextureFormat {
    #[default]
    Rgba8Unorm,
    Rgba16Float,
    Rgba32Float,
    Depth24UnormStencil8,
}

impl TextureFormat {
    #[inline]
    pub const fn bytes_per_pixel(self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm => 4,
            TextureFormat::Rgba16Float => 8,
            TextureFormat::Rgba32Float => 16,
            TextureFormat::Depth24UnormStencil8 => 4,
        }
    }

    #[inline]
    pub const fn is_depth_stencil(self) -> bool {
        matches!(self, TextureFormat::Depth24UnormStencil8)
    }
}

/// 顶点属性的分量类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Float32,
    UNorm8,
    UInt32,
}

impl DataType {
    #[inline]
    pub const fn byte_size(self) -> u32 {
        match self {
            DataType::Float32 => 4,
            DataType::UNorm8 => 1,
            DataType::UInt32 => 4,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShaderSemantic {
    Position,
    Normal,
    TexCoord,
    Color,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ComparisonFunction {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    /// reversed-z 下的默认比较
    #[default]
    GreaterEqual,
    Always,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CullMode {
    None,
    #[default]
    Front,
    Back,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TextureFilter {
    Point,
    #[default]
    Linear,
    Anisotropic,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum WrapMode {
    #[default]
    Repeat,
    Clamp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum IndexType {
    #[default]
    UInt32,
    UInt16,
}

impl IndexType {
    #[inline]
    pub const fn byte_size(self) -> u32 {
        match self {
            IndexType::UInt32 => 4,
            IndexType::UInt16 => 2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PipelineType {
    #[default]
    Graphics,
    Compute,
}

/// 描述符表中一个 slot 的类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DescriptorType {
    /// constant buffer view
    Buffer,
    RwBuffer,
    /// shader resource view
    Texture,
    RwTexture,
    Sampler,
}

impl DescriptorType {
    pub const ALL: [DescriptorType; 5] = [
        DescriptorType::Buffer,
        DescriptorType::RwBuffer,
        DescriptorType::Texture,
        DescriptorType::RwTexture,
        DescriptorType::Sampler,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        match self {
            DescriptorType::Buffer => 0,
            DescriptorType::RwBuffer => 1,
            DescriptorType::Texture => 2,
            DescriptorType::RwTexture => 3,
            DescriptorType::Sampler => 4,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstColor,
    OneMinusDstColor,
    DstAlpha,
    OneMinusDstAlpha,
}

/// 颜色混合：`src * src_factor + dst * dst_factor`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlendState {
    pub src_factor: BlendFactor,
    pub dst_factor: BlendFactor,
}

impl BlendState {
    pub const ALPHA: BlendState = BlendState {
        src_factor: BlendFactor::SrcAlpha,
        dst_factor: BlendFactor::OneMinusSrcAlpha,
    };
    pub const ADDITIVE: BlendState = BlendState {
        src_factor: BlendFactor::One,
        dst_factor: BlendFactor::One,
    };
}
