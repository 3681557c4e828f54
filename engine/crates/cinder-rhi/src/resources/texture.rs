use crate::descriptor::DescriptorIndex;
use crate::device::NativeTexture;
use crate::frame_pipeline::TransitionMarks;
use crate::lifetime::{Lifetime, LifetimeTagged};
use crate::resources::format::TextureFormat;
use crate::resources::states::ResourceStates;

#[derive(Clone, Debug, PartialEq)]
pub struct TextureDesc {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub mip_count: u32,
    pub sample_count: u32,
    pub initial_state: ResourceStates,
    pub allowed_states: ResourceStates,
    pub format: TextureFormat,
    pub clear_color: [f32; 4],
    pub clear_depth: f32,
    pub clear_stencil: u8,
    pub lifetime: Lifetime,
}

impl TextureDesc {
    /// 默认是只在 pixel shader 中采样的 RGBA8 texture
    pub fn new(name: impl Into<String>, width: u32, height: u32, mip_count: u32) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            mip_count,
            sample_count: 1,
            initial_state: ResourceStates::PIXEL_SHADER_ACCESS,
            allowed_states: ResourceStates::PIXEL_SHADER_ACCESS,
            format: TextureFormat::Rgba8Unorm,
            clear_color: [0.0; 4],
            clear_depth: 0.0,
            clear_stencil: 0,
            lifetime: Lifetime::Persistent,
        }
    }

    #[inline]
    pub fn with_format(mut self, format: TextureFormat) -> Self {
        self.format = format;
        self
    }

    #[inline]
    pub fn with_initial_state(mut self, state: ResourceStates) -> Self {
        self.initial_state = state;
        self
    }

    /// 追加允许的状态
    #[inline]
    pub fn allow(mut self, states: ResourceStates) -> Self {
        self.allowed_states |= states;
        self
    }

    #[inline]
    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    #[inline]
    pub fn with_clear_depth_stencil(mut self, depth: f32, stencil: u8) -> Self {
        self.clear_depth = depth;
        self.clear_stencil = stencil;
        self
    }

    #[inline]
    pub fn short_lived(mut self) -> Self {
        self.lifetime = Lifetime::ShortLived;
        self
    }

    #[inline]
    pub fn all_allowed_states(&self) -> ResourceStates {
        self.allowed_states | self.initial_state
    }

    /// 指定 mip 的尺寸，最小为 1
    #[inline]
    pub fn mip_extent(&self, mip: u32) -> (u32, u32) {
        ((self.width >> mip).max(1), (self.height >> mip).max(1))
    }
}

/// Texture 在池中的记录
#[derive(Debug)]
pub struct TextureRecord {
    pub(crate) desc: TextureDesc,
    pub(crate) native: NativeTexture,
    pub(crate) current_state: ResourceStates,
    /// `current_state` 由哪些尚未提交的 command list 设置
    pub(crate) transitions: TransitionMarks,
    pub(crate) srv: Option<DescriptorIndex>,
    /// 每个 mip 一个 UAV
    pub(crate) uav_mips: Vec<DescriptorIndex>,
    pub(crate) rtv: Option<DescriptorIndex>,
    pub(crate) dsv: Option<DescriptorIndex>,
}

// getters
impl TextureRecord {
    #[inline]
    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }
    #[inline]
    pub fn name(&self) -> &str {
        &self.desc.name
    }
    #[inline]
    pub fn native(&self) -> NativeTexture {
        self.native
    }
    #[inline]
    pub fn current_state(&self) -> ResourceStates {
        self.current_state
    }
    #[inline]
    pub fn srv(&self) -> Option<DescriptorIndex> {
        self.srv
    }
    #[inline]
    pub fn uav_mips(&self) -> &[DescriptorIndex] {
        &self.uav_mips
    }
    #[inline]
    pub fn rtv(&self) -> Option<DescriptorIndex> {
        self.rtv
    }
    #[inline]
    pub fn dsv(&self) -> Option<DescriptorIndex> {
        self.dsv
    }
}

impl LifetimeTagged for TextureRecord {
    fn lifetime(&self) -> Lifetime {
        self.desc.lifetime
    }
}

/// mip 0 的一块上传区域，`data` 按紧密排列的行存放
#[derive(Clone, Copy, Debug)]
pub struct TextureUpload<'a> {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub data: &'a [u8],
}

impl<'a> TextureUpload<'a> {
    pub fn full(width: u32, height: u32, data: &'a [u8]) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_extent_clamps_to_one() {
        let desc = TextureDesc::new("t", 64, 8, 7);
        assert_eq!(desc.mip_extent(0), (64, 8));
        assert_eq!(desc.mip_extent(3), (8, 1));
        assert_eq!(desc.mip_extent(6), (1, 1));
    }

    #[test]
    fn initial_state_is_always_allowed() {
        let desc = TextureDesc::new("rt", 4, 4, 1).with_initial_state(ResourceStates::RENDER_TARGET);
        assert!(desc.all_allowed_states().contains(ResourceStates::RENDER_TARGET | ResourceStates::PIXEL_SHADER_ACCESS));
    }
}
