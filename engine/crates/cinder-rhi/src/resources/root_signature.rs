use crate::device::NativeRootSignature;
use crate::error::{RhiError, RhiResult};
use crate::lifetime::{Lifetime, LifetimeTagged};
use crate::resources::format::{DescriptorType, PipelineType};
use crate::resources::states::{ShaderStage, ShaderStages};

/// 每个 stage 的 root constants 上限（字节）
pub const MAX_ROOT_CONSTANTS_BYTES: u32 = 128;

/// 描述符表中一段连续的同类型 slot
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DescriptorRange {
    pub ty: DescriptorType,
    pub first_index: u32,
    pub count: u32,
}

impl DescriptorRange {
    #[inline]
    pub fn end(&self) -> u32 {
        self.first_index + self.count
    }

    #[inline]
    pub fn contains(&self, ty: DescriptorType, first_index: u32, count: u32) -> bool {
        self.ty == ty && first_index >= self.first_index && first_index + count <= self.end()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RootSignatureDesc {
    pub name: String,
    pub pipeline_type: PipelineType,
    pub using_vertex_buffers: bool,
    /// 按 `ShaderStage::index()` 存放每个 stage 的 root constants 字节数
    pub constants: [u32; 3],
    /// 非 sampler 的描述符范围
    pub generic_ranges: Vec<DescriptorRange>,
    pub sampler_count: u32,
    pub generic_visibility: ShaderStages,
    pub sampler_visibility: ShaderStages,
    pub lifetime: Lifetime,
}

impl RootSignatureDesc {
    pub fn new(name: impl Into<String>, pipeline_type: PipelineType) -> Self {
        let visibility = match pipeline_type {
            PipelineType::Graphics => ShaderStages::ALL_GRAPHICS,
            PipelineType::Compute => ShaderStages::COMPUTE,
        };
        Self {
            name: name.into(),
            pipeline_type,
            using_vertex_buffers: false,
            constants: [0; 3],
            generic_ranges: Vec::new(),
            sampler_count: 0,
            generic_visibility: visibility,
            sampler_visibility: visibility,
            lifetime: Lifetime::Persistent,
        }
    }

    #[inline]
    pub fn with_vertex_buffers(mut self) -> Self {
        self.using_vertex_buffers = true;
        self
    }

    #[inline]
    pub fn with_constants(mut self, stage: ShaderStage, byte_count: u32) -> Self {
        self.constants[stage.index()] = byte_count;
        self
    }

    #[inline]
    pub fn add_range(mut self, ty: DescriptorType, first_index: u32, count: u32) -> Self {
        self.generic_ranges.push(DescriptorRange { ty, first_index, count });
        self
    }

    #[inline]
    pub fn with_samplers(mut self, count: u32) -> Self {
        self.sampler_count = count;
        self
    }

    #[inline]
    pub fn short_lived(mut self) -> Self {
        self.lifetime = Lifetime::ShortLived;
        self
    }

    #[inline]
    pub fn constants_byte_count(&self, stage: ShaderStage) -> u32 {
        self.constants[stage.index()]
    }

    /// 所有范围，包括 sampler 范围
    pub fn ranges(&self) -> impl Iterator<Item = DescriptorRange> + '_ {
        let samplers = (self.sampler_count > 0).then_some(DescriptorRange {
            ty: DescriptorType::Sampler,
            first_index: 0,
            count: self.sampler_count,
        });
        self.generic_ranges.iter().copied().chain(samplers)
    }

    pub fn find_range(&self, ty: DescriptorType, first_index: u32, count: u32) -> Option<DescriptorRange> {
        self.ranges().find(|range| range.contains(ty, first_index, count))
    }

    pub fn validate(&self) -> RhiResult<()> {
        let fail = |message: String| Err(RhiError::invalid_argument(format!("root signature '{}': {message}", self.name)));

        for stage in ShaderStage::ALL {
            let bytes = self.constants_byte_count(stage);
            if bytes % 4 != 0 || bytes > MAX_ROOT_CONSTANTS_BYTES {
                return fail(format!(
                    "{stage:?} constants must be a multiple of 4 and at most {MAX_ROOT_CONSTANTS_BYTES} bytes, got {bytes}"
                ));
            }
        }

        match self.pipeline_type {
            PipelineType::Compute => {
                if self.using_vertex_buffers {
                    return fail("compute root signatures cannot use vertex buffers".to_string());
                }
                if self.constants_byte_count(ShaderStage::Vertex) != 0
                    || self.constants_byte_count(ShaderStage::Pixel) != 0
                {
                    return fail("compute root signatures only take compute constants".to_string());
                }
            }
            PipelineType::Graphics => {
                if self.constants_byte_count(ShaderStage::Compute) != 0 {
                    return fail("graphics root signatures cannot take compute constants".to_string());
                }
            }
        }

        for (i, range) in self.generic_ranges.iter().enumerate() {
            if range.ty == DescriptorType::Sampler {
                return fail("samplers are declared with the sampler count, not a generic range".to_string());
            }
            if range.count == 0 {
                return fail(format!("range {i} is empty"));
            }
            let overlapping = self.generic_ranges[..i].iter().any(|other| {
                other.ty == range.ty && range.first_index < other.end() && other.first_index < range.end()
            });
            if overlapping {
                return fail(format!("range {i} ({:?}) overlaps an earlier range", range.ty));
            }
        }

        Ok(())
    }
}

#[derive(Debug)]
pub struct RootSignatureRecord {
    pub(crate) desc: RootSignatureDesc,
    pub(crate) native: NativeRootSignature,
}

impl RootSignatureRecord {
    #[inline]
    pub fn desc(&self) -> &RootSignatureDesc {
        &self.desc
    }
    #[inline]
    pub fn native(&self) -> NativeRootSignature {
        self.native
    }
    #[inline]
    pub fn pipeline_type(&self) -> PipelineType {
        self.desc.pipeline_type
    }
}

impl LifetimeTagged for RootSignatureRecord {
    fn lifetime(&self) -> Lifetime {
        self.desc.lifetime
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_include_samplers() {
        let desc = RootSignatureDesc::new("world", PipelineType::Graphics)
            .add_range(DescriptorType::Texture, 0, 16)
            .add_range(DescriptorType::Buffer, 0, 2)
            .with_samplers(4);
        assert!(desc.validate().is_ok());

        let ranges: Vec<_> = desc.ranges().collect();
        assert_eq!(ranges.len(), 3);
        assert_eq!(ranges[2].ty, DescriptorType::Sampler);

        assert!(desc.find_range(DescriptorType::Texture, 4, 12).is_some());
        assert!(desc.find_range(DescriptorType::Texture, 4, 13).is_none());
        assert!(desc.find_range(DescriptorType::Sampler, 3, 1).is_some());
        assert!(desc.find_range(DescriptorType::RwTexture, 0, 1).is_none());
    }

    #[test]
    fn invalid_layouts_are_rejected() {
        let overlapping = RootSignatureDesc::new("overlap", PipelineType::Graphics)
            .add_range(DescriptorType::Texture, 0, 8)
            .add_range(DescriptorType::Texture, 4, 8);
        assert!(overlapping.validate().is_err());

        let odd_constants = RootSignatureDesc::new("odd", PipelineType::Graphics).with_constants(ShaderStage::Vertex, 6);
        assert!(odd_constants.validate().is_err());

        let compute_with_vertex = RootSignatureDesc::new("mip gen", PipelineType::Compute).with_vertex_buffers();
        assert!(compute_with_vertex.validate().is_err());

        let compute = RootSignatureDesc::new("mip gen", PipelineType::Compute)
            .with_constants(ShaderStage::Compute, 64)
            .add_range(DescriptorType::RwTexture, 0, 16);
        assert!(compute.validate().is_ok());
    }
}
