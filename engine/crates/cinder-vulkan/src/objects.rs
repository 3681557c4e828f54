use ash::vk;
use slotmap::{Key, KeyData, new_key_type};

use cinder_rhi::device::QueueKind;
use cinder_rhi::resources::format::{DescriptorType, TextureFormat};
use cinder_rhi::resources::root_signature::DescriptorRange;

new_key_type! { pub(crate) struct BufferKey; }
new_key_type! { pub(crate) struct TextureKey; }
new_key_type! { pub(crate) struct SamplerKey; }
new_key_type! { pub(crate) struct ViewKey; }
new_key_type! { pub(crate) struct RootSignatureKey; }
new_key_type! { pub(crate) struct TableKey; }
new_key_type! { pub(crate) struct ShaderKey; }
new_key_type! { pub(crate) struct PipelineKey; }
new_key_type! { pub(crate) struct FenceKey; }
new_key_type! { pub(crate) struct ListKey; }
new_key_type! { pub(crate) struct QueryPoolKey; }

#[inline]
pub(crate) fn to_id<K: Key>(key: K) -> u64 {
    key.data().as_ffi()
}

#[inline]
pub(crate) fn from_id<K: Key>(id: u64) -> K {
    K::from(KeyData::from_ffi(id))
}

pub(crate) struct VkBuffer {
    pub handle: vk::Buffer,
    pub allocation: vk_mem::Allocation,
    pub size: u64,
    /// 持久映射的地址，只有 CPU 可见的 buffer 才有
    pub mapped: Option<*mut u8>,
}

pub(crate) struct VkTexture {
    pub handle: vk::Image,
    pub allocation: vk_mem::Allocation,
    pub format: TextureFormat,
    pub extent: vk::Extent2D,
}

pub(crate) enum VkView {
    Buffer {
        buffer: vk::Buffer,
        range: u64,
    },
    Image {
        view: vk::ImageView,
        layout: vk::ImageLayout,
    },
    Sampler(vk::Sampler),
    /// RTV / DSV
    Attachment {
        view: vk::ImageView,
        extent: vk::Extent2D,
    },
    /// 指向 null 资源，不拥有任何 vk 对象
    Null(DescriptorType),
}

impl VkView {
    /// 需要随 view 销毁的 image view
    pub fn owned_image_view(&self) -> Option<vk::ImageView> {
        match self {
            VkView::Image { view, .. } | VkView::Attachment { view, .. } => Some(*view),
            _ => None,
        }
    }
}

pub(crate) struct VkRootSignature {
    pub set_layout: vk::DescriptorSetLayout,
    pub pipeline_layout: vk::PipelineLayout,
    /// 按 `ShaderStage::index()` 排列的 push constant (offset, size)
    pub push_constants: [(u32, u32); 3],
    /// 被描述符表引用的次数
    pub table_count: u32,
}

pub(crate) struct VkTable {
    pub root_signature: RootSignatureKey,
    pub pool: vk::DescriptorPool,
    pub set: vk::DescriptorSet,
    pub ranges: Vec<DescriptorRange>,
}

pub(crate) struct VkCommandList {
    pub queue: QueueKind,
    pub pool: vk::CommandPool,
    pub buffer: vk::CommandBuffer,
    pub recording: bool,
    /// 当前 dynamic rendering 的 color attachment
    pub rendering: Option<RenderingScope>,
}

#[derive(Clone, Debug)]
pub(crate) struct RenderingScope {
    pub colors: Vec<vk::ImageView>,
    pub extent: vk::Extent2D,
}
