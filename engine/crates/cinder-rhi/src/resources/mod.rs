//! 资源的创建描述与池中保存的资源记录

pub mod buffer;
pub mod descriptor_table;
pub mod format;
pub mod pipeline;
pub mod root_signature;
pub mod sampler;
pub mod shader;
pub mod states;
pub mod texture;

/// 单个 texture 的最大 mip 数
pub const MAX_TEXTURE_MIPS: u32 = 16;
/// 同时绑定的 render target 数量上限
pub const MAX_RENDER_TARGETS: usize = 8;
/// 顶点 buffer 与顶点属性的数量上限
pub const MAX_VERTEX_BUFFERS: usize = 16;
/// texture 上传时每行的对齐
pub const TEXTURE_ROW_PITCH_ALIGNMENT: u32 = 256;
/// texture 上传数据在 staging 中的起始偏移对齐
pub const TEXTURE_PLACEMENT_ALIGNMENT: u64 = 512;
