//! RHI 枚举到 vk 枚举的转换

use ash::vk;

use cinder_rhi::resources::format::{
    BlendFactor, ComparisonFunction, CullMode, DataType, DescriptorType, IndexType, PipelineType, TextureFilter,
    TextureFormat, WrapMode,
};
use cinder_rhi::resources::states::{MemoryUsage, ResourceStates, ShaderStage, ShaderStages};

pub fn format(format: TextureFormat) -> vk::Format {
    match format {
        TextureFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        TextureFormat::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
        TextureFormat::Depth24UnormStencil8 => vk::Format::D24_UNORM_S8_UINT,
    }
}

pub fn aspect(format: TextureFormat) -> vk::ImageAspectFlags {
    if format.is_depth_stencil() {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

pub fn vertex_format(data_type: DataType, vector_length: u32) -> vk::Format {
    match (data_type, vector_length) {
        (DataType::Float32, 1) => vk::Format::R32_SFLOAT,
        (DataType::Float32, 2) => vk::Format::R32G32_SFLOAT,
        (DataType::Float32, 3) => vk::Format::R32G32B32_SFLOAT,
        (DataType::Float32, _) => vk::Format::R32G32B32A32_SFLOAT,
        (DataType::UNorm8, 1) => vk::Format::R8_UNORM,
        (DataType::UNorm8, 2) => vk::Format::R8G8_UNORM,
        (DataType::UNorm8, 3) => vk::Format::R8G8B8_UNORM,
        (DataType::UNorm8, _) => vk::Format::R8G8B8A8_UNORM,
        (DataType::UInt32, 1) => vk::Format::R32_UINT,
        (DataType::UInt32, 2) => vk::Format::R32G32_UINT,
        (DataType::UInt32, 3) => vk::Format::R32G32B32_UINT,
        (DataType::UInt32, _) => vk::Format::R32G32B32A32_UINT,
    }
}

pub fn index_type(index_type: IndexType) -> vk::IndexType {
    match index_type {
        IndexType::UInt32 => vk::IndexType::UINT32,
        IndexType::UInt16 => vk::IndexType::UINT16,
    }
}

pub fn bind_point(pipeline_type: PipelineType) -> vk::PipelineBindPoint {
    match pipeline_type {
        PipelineType::Graphics => vk::PipelineBindPoint::GRAPHICS,
        PipelineType::Compute => vk::PipelineBindPoint::COMPUTE,
    }
}

/// 每种描述符类型占用 set 中的一个 binding
pub fn descriptor_type(ty: DescriptorType) -> vk::DescriptorType {
    match ty {
        DescriptorType::Buffer => vk::DescriptorType::UNIFORM_BUFFER,
        DescriptorType::RwBuffer => vk::DescriptorType::STORAGE_BUFFER,
        DescriptorType::Texture => vk::DescriptorType::SAMPLED_IMAGE,
        DescriptorType::RwTexture => vk::DescriptorType::STORAGE_IMAGE,
        DescriptorType::Sampler => vk::DescriptorType::SAMPLER,
    }
}

#[inline]
pub fn binding(ty: DescriptorType) -> u32 {
    ty.index() as u32
}

pub fn shader_stage(stage: ShaderStage) -> vk::ShaderStageFlags {
    match stage {
        ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
        ShaderStage::Pixel => vk::ShaderStageFlags::FRAGMENT,
        ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
    }
}

pub fn shader_stages(stages: ShaderStages) -> vk::ShaderStageFlags {
    ShaderStage::ALL
        .into_iter()
        .filter(|stage| stages.contains(stage.flag()))
        .fold(vk::ShaderStageFlags::empty(), |acc, stage| acc | shader_stage(stage))
}

pub fn filter(filter: TextureFilter) -> (vk::Filter, vk::SamplerMipmapMode) {
    match filter {
        TextureFilter::Point => (vk::Filter::NEAREST, vk::SamplerMipmapMode::NEAREST),
        TextureFilter::Linear | TextureFilter::Anisotropic => (vk::Filter::LINEAR, vk::SamplerMipmapMode::LINEAR),
    }
}

pub fn address_mode(wrap_mode: WrapMode) -> vk::SamplerAddressMode {
    match wrap_mode {
        WrapMode::Repeat => vk::SamplerAddressMode::REPEAT,
        WrapMode::Clamp => vk::SamplerAddressMode::CLAMP_TO_EDGE,
    }
}

pub fn compare_op(func: ComparisonFunction) -> vk::CompareOp {
    match func {
        ComparisonFunction::Never => vk::CompareOp::NEVER,
        ComparisonFunction::Less => vk::CompareOp::LESS,
        ComparisonFunction::Equal => vk::CompareOp::EQUAL,
        ComparisonFunction::LessEqual => vk::CompareOp::LESS_OR_EQUAL,
        ComparisonFunction::Greater => vk::CompareOp::GREATER,
        ComparisonFunction::NotEqual => vk::CompareOp::NOT_EQUAL,
        ComparisonFunction::GreaterEqual => vk::CompareOp::GREATER_OR_EQUAL,
        ComparisonFunction::Always => vk::CompareOp::ALWAYS,
    }
}

pub fn cull_mode(cull_mode: CullMode) -> vk::CullModeFlags {
    match cull_mode {
        CullMode::None => vk::CullModeFlags::NONE,
        CullMode::Front => vk::CullModeFlags::FRONT,
        CullMode::Back => vk::CullModeFlags::BACK,
    }
}

pub fn blend_factor(factor: BlendFactor) -> vk::BlendFactor {
    match factor {
        BlendFactor::Zero => vk::BlendFactor::ZERO,
        BlendFactor::One => vk::BlendFactor::ONE,
        BlendFactor::SrcColor => vk::BlendFactor::SRC_COLOR,
        BlendFactor::OneMinusSrcColor => vk::BlendFactor::ONE_MINUS_SRC_COLOR,
        BlendFactor::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
        BlendFactor::OneMinusSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        BlendFactor::DstColor => vk::BlendFactor::DST_COLOR,
        BlendFactor::OneMinusDstColor => vk::BlendFactor::ONE_MINUS_DST_COLOR,
        BlendFactor::DstAlpha => vk::BlendFactor::DST_ALPHA,
        BlendFactor::OneMinusDstAlpha => vk::BlendFactor::ONE_MINUS_DST_ALPHA,
    }
}

pub fn sample_count(count: u32) -> vk::SampleCountFlags {
    match count {
        2 => vk::SampleCountFlags::TYPE_2,
        4 => vk::SampleCountFlags::TYPE_4,
        8 => vk::SampleCountFlags::TYPE_8,
        16 => vk::SampleCountFlags::TYPE_16,
        _ => vk::SampleCountFlags::TYPE_1,
    }
}

pub fn buffer_usage(states: ResourceStates) -> vk::BufferUsageFlags {
    let mut usage = vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST;
    if states.contains(ResourceStates::VERTEX_BUFFER) {
        usage |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if states.contains(ResourceStates::INDEX_BUFFER) {
        usage |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if states.contains(ResourceStates::CONSTANT_BUFFER) {
        usage |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if states.intersects(ResourceStates::UNORDERED_ACCESS | ResourceStates::SHADER_ACCESS) {
        usage |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    usage
}

pub fn image_usage(states: ResourceStates) -> vk::ImageUsageFlags {
    let mut usage = vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST;
    if states.intersects(ResourceStates::SHADER_ACCESS) {
        usage |= vk::ImageUsageFlags::SAMPLED;
    }
    if states.contains(ResourceStates::UNORDERED_ACCESS) {
        usage |= vk::ImageUsageFlags::STORAGE;
    }
    if states.contains(ResourceStates::RENDER_TARGET) {
        usage |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
    }
    if states.intersects(ResourceStates::DEPTH_ACCESS) {
        usage |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
    }
    usage
}

pub fn memory_usage(usage: MemoryUsage) -> (vk_mem::MemoryUsage, vk_mem::AllocationCreateFlags) {
    match usage {
        MemoryUsage::Gpu => (vk_mem::MemoryUsage::AutoPreferDevice, vk_mem::AllocationCreateFlags::empty()),
        MemoryUsage::Upload => (
            vk_mem::MemoryUsage::AutoPreferHost,
            vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
        ),
        MemoryUsage::Cpu | MemoryUsage::Readback => (
            vk_mem::MemoryUsage::AutoPreferHost,
            vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM,
        ),
    }
}

/// 一个资源状态对应的 sync2 stage、access 和 image layout
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StateSync {
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
    pub layout: vk::ImageLayout,
}

impl StateSync {
    /// 新建 image 的内容可以丢弃
    pub const UNDEFINED: StateSync = StateSync {
        stage: vk::PipelineStageFlags2::NONE,
        access: vk::AccessFlags2::NONE,
        layout: vk::ImageLayout::UNDEFINED,
    };
}

pub fn state_sync(states: ResourceStates) -> StateSync {
    let table: [(ResourceStates, vk::PipelineStageFlags2, vk::AccessFlags2); 12] = [
        (
            ResourceStates::VERTEX_BUFFER,
            vk::PipelineStageFlags2::VERTEX_ATTRIBUTE_INPUT,
            vk::AccessFlags2::VERTEX_ATTRIBUTE_READ,
        ),
        (ResourceStates::INDEX_BUFFER, vk::PipelineStageFlags2::INDEX_INPUT, vk::AccessFlags2::INDEX_READ),
        (
            ResourceStates::CONSTANT_BUFFER,
            vk::PipelineStageFlags2::VERTEX_SHADER
                | vk::PipelineStageFlags2::FRAGMENT_SHADER
                | vk::PipelineStageFlags2::COMPUTE_SHADER,
            vk::AccessFlags2::UNIFORM_READ,
        ),
        (
            ResourceStates::RENDER_TARGET,
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags2::COLOR_ATTACHMENT_READ | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        ),
        (
            ResourceStates::VERTEX_SHADER_ACCESS,
            vk::PipelineStageFlags2::VERTEX_SHADER,
            vk::AccessFlags2::SHADER_READ,
        ),
        (
            ResourceStates::PIXEL_SHADER_ACCESS,
            vk::PipelineStageFlags2::FRAGMENT_SHADER,
            vk::AccessFlags2::SHADER_READ,
        ),
        (
            ResourceStates::COMPUTE_SHADER_ACCESS,
            vk::PipelineStageFlags2::COMPUTE_SHADER,
            vk::AccessFlags2::SHADER_READ,
        ),
        (ResourceStates::COPY_SOURCE, vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_READ),
        (ResourceStates::COPY_DESTINATION, vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE),
        (
            ResourceStates::DEPTH_READ,
            vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ,
        ),
        (
            ResourceStates::DEPTH_WRITE,
            vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        (
            ResourceStates::UNORDERED_ACCESS,
            vk::PipelineStageFlags2::VERTEX_SHADER
                | vk::PipelineStageFlags2::FRAGMENT_SHADER
                | vk::PipelineStageFlags2::COMPUTE_SHADER,
            vk::AccessFlags2::SHADER_STORAGE_READ | vk::AccessFlags2::SHADER_STORAGE_WRITE,
        ),
    ];

    let (stage, access) = table
        .iter()
        .filter(|(state, _, _)| states.contains(*state))
        .fold((vk::PipelineStageFlags2::NONE, vk::AccessFlags2::NONE), |(stage, access), (_, s, a)| {
            (stage | *s, access | *a)
        });

    // COMMON 对应 "任何之前的操作"
    let stage = if stage.is_empty() { vk::PipelineStageFlags2::ALL_COMMANDS } else { stage };

    StateSync {
        stage,
        access,
        layout: image_layout(states),
    }
}

/// 写状态各自有专用的 layout；只读组合中只有纯 shader 读取才使用 SHADER_READ_ONLY_OPTIMAL
pub fn image_layout(states: ResourceStates) -> vk::ImageLayout {
    if states.is_empty() {
        return vk::ImageLayout::GENERAL;
    }
    if states == ResourceStates::RENDER_TARGET {
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
    } else if states == ResourceStates::DEPTH_WRITE {
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
    } else if states == ResourceStates::COPY_DESTINATION {
        vk::ImageLayout::TRANSFER_DST_OPTIMAL
    } else if states == ResourceStates::COPY_SOURCE {
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL
    } else if states == ResourceStates::DEPTH_READ {
        vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
    } else if ResourceStates::SHADER_ACCESS.contains(states) {
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
    } else {
        vk::ImageLayout::GENERAL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_states_get_dedicated_layouts() {
        assert_eq!(image_layout(ResourceStates::RENDER_TARGET), vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(image_layout(ResourceStates::COPY_DESTINATION), vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(image_layout(ResourceStates::UNORDERED_ACCESS), vk::ImageLayout::GENERAL);
    }

    #[test]
    fn read_combinations_fall_back_to_general() {
        let pixel_and_compute = ResourceStates::PIXEL_SHADER_ACCESS | ResourceStates::COMPUTE_SHADER_ACCESS;
        assert_eq!(image_layout(pixel_and_compute), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);

        let sampled_and_copied = ResourceStates::PIXEL_SHADER_ACCESS | ResourceStates::COPY_SOURCE;
        assert_eq!(image_layout(sampled_and_copied), vk::ImageLayout::GENERAL);
    }

    #[test]
    fn common_waits_on_all_commands() {
        let sync = state_sync(ResourceStates::COMMON);
        assert_eq!(sync.stage, vk::PipelineStageFlags2::ALL_COMMANDS);
        assert_eq!(sync.access, vk::AccessFlags2::NONE);

        let sync = state_sync(ResourceStates::VERTEX_BUFFER | ResourceStates::INDEX_BUFFER);
        assert_eq!(
            sync.stage,
            vk::PipelineStageFlags2::VERTEX_ATTRIBUTE_INPUT | vk::PipelineStageFlags2::INDEX_INPUT
        );
    }

    #[test]
    fn stage_sets_map_per_stage() {
        assert_eq!(
            shader_stages(ShaderStages::ALL_GRAPHICS),
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        );
        assert_eq!(shader_stages(ShaderStages::empty()), vk::ShaderStageFlags::empty());
    }
}
