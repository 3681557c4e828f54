use std::io::Cursor;
use std::time::Duration;

use ash::vk;
use itertools::Itertools;
use slotmap::SlotMap;
use vk_mem::Alloc;

use cinder_rhi::device::{
    ComputePipelineInfo, FenceSignal, FenceWait, GraphicsPipelineInfo, NativeBuffer, NativeCommand, NativeCommandList,
    NativeFence, NativePipeline, NativeQueryPool, NativeRootSignature, NativeSampler, NativeShader, NativeTable,
    NativeTexture, NativeView, QueueKind, RhiDevice, ViewDesc,
};
use cinder_rhi::resources::buffer::BufferDesc;
use cinder_rhi::resources::format::{DescriptorType, TextureFilter, TextureFormat};
use cinder_rhi::resources::root_signature::{DescriptorRange, RootSignatureDesc};
use cinder_rhi::resources::sampler::SamplerDesc;
use cinder_rhi::resources::shader::ShaderDesc;
use cinder_rhi::resources::states::{ResourceStates, ShaderStage};
use cinder_rhi::resources::texture::TextureDesc;
use cinder_rhi::{RhiError, RhiResult};

use crate::commands::layout_barrier;
use crate::convert::{self, StateSync};
use crate::core::{VulkanCore, VulkanCreateInfo};
use crate::error::{unknown, vk_error};
use crate::objects::*;

/// shader 的入口函数名
const SHADER_ENTRY: &std::ffi::CStr = c"main";
const NULL_BUFFER_SIZE: u64 = 256;

/// 创建 texture 时做 layout 转换用的一次性命令
struct SetupCommands {
    pool: vk::CommandPool,
    buffer: vk::CommandBuffer,
}

impl SetupCommands {
    fn new(core: &VulkanCore) -> RhiResult<Self> {
        let pool_ci = vk::CommandPoolCreateInfo::default()
            .queue_family_index(core.queue_family_index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let pool = unsafe { core.device.create_command_pool(&pool_ci, None) }.map_err(vk_error("create_command_pool"))?;
        core.set_debug_name(pool, "setup-commands");

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { core.device.allocate_command_buffers(&alloc_info) }
            .map_err(vk_error("allocate_command_buffers"))?;
        Ok(Self {
            pool,
            buffer: buffers[0],
        })
    }

    /// 录制并提交，阻塞直到 queue 空闲
    fn exec(&self, core: &VulkanCore, func: impl FnOnce(&ash::Device, vk::CommandBuffer)) -> RhiResult<()> {
        let device = &core.device;
        unsafe {
            device
                .reset_command_buffer(self.buffer, vk::CommandBufferResetFlags::empty())
                .map_err(vk_error("reset_command_buffer"))?;
            device
                .begin_command_buffer(
                    self.buffer,
                    &vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
                )
                .map_err(vk_error("begin_command_buffer"))?;
            func(device, self.buffer);
            device.end_command_buffer(self.buffer).map_err(vk_error("end_command_buffer"))?;

            let cmds = [vk::CommandBufferSubmitInfo::default().command_buffer(self.buffer)];
            let submit = vk::SubmitInfo2::default().command_buffer_infos(&cmds);
            device
                .queue_submit2(core.queue, &[submit], vk::Fence::null())
                .map_err(vk_error("queue_submit2"))?;
            device.queue_wait_idle(core.queue).map_err(vk_error("queue_wait_idle"))?;
        }
        Ok(())
    }

    fn destroy(self, core: &VulkanCore) {
        unsafe { core.device.destroy_command_pool(self.pool, None) };
    }
}

/// null view 指向的占位资源
struct NullResources {
    image: vk::Image,
    image_allocation: vk_mem::Allocation,
    image_view: vk::ImageView,
    buffer: vk::Buffer,
    buffer_allocation: vk_mem::Allocation,
    sampler: vk::Sampler,
}

impl NullResources {
    fn new(core: &VulkanCore, setup: &SetupCommands) -> RhiResult<Self> {
        let allocator = core.allocator()?;
        let device = &core.device;
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        };

        let image_ci = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(vk::Format::R8G8B8A8_UNORM)
            .extent(vk::Extent3D {
                width: 1,
                height: 1,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::STORAGE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let (image, image_allocation) =
            unsafe { allocator.create_image(&image_ci, &alloc_ci) }.map_err(vk_error("vmaCreateImage"))?;
        core.set_debug_name(image, "null-image");

        let view_ci = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(vk::Format::R8G8B8A8_UNORM)
            .subresource_range(color_range(0, 1));
        let image_view = unsafe { device.create_image_view(&view_ci, None) }.map_err(vk_error("create_image_view"))?;

        // null image 一直处于 GENERAL，SRV 和 UAV 都可以使用
        setup.exec(core, |device, cmd| {
            let barrier = layout_barrier(
                image,
                vk::ImageAspectFlags::COLOR,
                StateSync::UNDEFINED,
                StateSync {
                    stage: vk::PipelineStageFlags2::ALL_COMMANDS,
                    access: vk::AccessFlags2::SHADER_READ,
                    layout: vk::ImageLayout::GENERAL,
                },
            );
            unsafe {
                device.cmd_pipeline_barrier2(cmd, &vk::DependencyInfo::default().image_memory_barriers(&[barrier]))
            };
        })?;

        let buffer_ci = vk::BufferCreateInfo::default()
            .size(NULL_BUFFER_SIZE)
            .usage(vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::STORAGE_BUFFER);
        let (buffer, buffer_allocation) =
            unsafe { allocator.create_buffer(&buffer_ci, &alloc_ci) }.map_err(vk_error("vmaCreateBuffer"))?;
        core.set_debug_name(buffer, "null-buffer");

        let sampler = unsafe { device.create_sampler(&vk::SamplerCreateInfo::default(), None) }
            .map_err(vk_error("create_sampler"))?;
        core.set_debug_name(sampler, "null-sampler");

        Ok(Self {
            image,
            image_allocation,
            image_view,
            buffer,
            buffer_allocation,
            sampler,
        })
    }

    fn destroy(mut self, core: &VulkanCore) {
        unsafe {
            core.device.destroy_image_view(self.image_view, None);
            core.device.destroy_sampler(self.sampler, None);
            if let Ok(allocator) = core.allocator() {
                allocator.destroy_image(self.image, &mut self.image_allocation);
                allocator.destroy_buffer(self.buffer, &mut self.buffer_allocation);
            }
        }
    }
}

/// 写入描述符的两种形式
enum DescriptorInfo {
    Buffer(vk::DescriptorBufferInfo),
    Image(vk::DescriptorImageInfo),
}

/// `RhiDevice` 的 Vulkan 实现
///
/// 所有对象存放在 `SlotMap` 中，native id 就是 slotmap 的 key。
/// 不再使用时需要调用 [`VulkanDevice::destroy`]。
pub struct VulkanDevice {
    pub(crate) core: VulkanCore,
    setup: Option<SetupCommands>,
    null: Option<NullResources>,

    pub(crate) buffers: SlotMap<BufferKey, VkBuffer>,
    pub(crate) textures: SlotMap<TextureKey, VkTexture>,
    pub(crate) samplers: SlotMap<SamplerKey, vk::Sampler>,
    pub(crate) views: SlotMap<ViewKey, VkView>,
    pub(crate) root_signatures: SlotMap<RootSignatureKey, VkRootSignature>,
    pub(crate) tables: SlotMap<TableKey, VkTable>,
    pub(crate) shaders: SlotMap<ShaderKey, vk::ShaderModule>,
    pub(crate) pipelines: SlotMap<PipelineKey, vk::Pipeline>,
    pub(crate) fences: SlotMap<FenceKey, vk::Semaphore>,
    pub(crate) lists: SlotMap<ListKey, VkCommandList>,
    pub(crate) query_pools: SlotMap<QueryPoolKey, (vk::QueryPool, u32)>,
}

// new & init
impl VulkanDevice {
    pub fn new(info: &VulkanCreateInfo) -> RhiResult<Self> {
        let _span = cinder_rhi::profile_span!("VulkanDevice::new");

        let core = VulkanCore::new(info)?;
        let setup = SetupCommands::new(&core)?;
        let null = NullResources::new(&core, &setup)?;

        Ok(Self {
            core,
            setup: Some(setup),
            null: Some(null),
            buffers: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            samplers: SlotMap::with_key(),
            views: SlotMap::with_key(),
            root_signatures: SlotMap::with_key(),
            tables: SlotMap::with_key(),
            shaders: SlotMap::with_key(),
            pipelines: SlotMap::with_key(),
            fences: SlotMap::with_key(),
            lists: SlotMap::with_key(),
            query_pools: SlotMap::with_key(),
        })
    }
}

// destroy
impl VulkanDevice {
    /// 销毁所有残留对象以及 device 本身
    pub fn destroy(mut self) {
        let _span = cinder_rhi::profile_span!("VulkanDevice::destroy");
        if let Err(err) = self.wait_idle() {
            log::error!("wait idle before destroy: {err}");
        }

        let leaked = self.object_count();
        if leaked > 0 {
            log::warn!("{leaked} vulkan objects are still alive, destroying them");
        }

        for id in self.pipelines.keys().map(to_id).collect_vec() {
            self.destroy_pipeline(NativePipeline(id));
        }
        for id in self.tables.keys().map(to_id).collect_vec() {
            self.destroy_descriptor_table(NativeTable(id));
        }
        for id in self.root_signatures.keys().map(to_id).collect_vec() {
            self.destroy_root_signature(NativeRootSignature(id));
        }
        for id in self.views.keys().map(to_id).collect_vec() {
            self.destroy_view(NativeView(id));
        }
        for id in self.shaders.keys().map(to_id).collect_vec() {
            self.destroy_shader(NativeShader(id));
        }
        for id in self.samplers.keys().map(to_id).collect_vec() {
            self.destroy_sampler(NativeSampler(id));
        }
        for id in self.textures.keys().map(to_id).collect_vec() {
            self.destroy_texture(NativeTexture(id));
        }
        for id in self.buffers.keys().map(to_id).collect_vec() {
            self.destroy_buffer(NativeBuffer(id));
        }
        for id in self.fences.keys().map(to_id).collect_vec() {
            self.destroy_fence(NativeFence(id));
        }
        for id in self.lists.keys().map(to_id).collect_vec() {
            self.destroy_command_list(NativeCommandList(id));
        }
        for id in self.query_pools.keys().map(to_id).collect_vec() {
            self.destroy_query_pool(NativeQueryPool(id));
        }

        if let Some(null) = self.null.take() {
            null.destroy(&self.core);
        }
        if let Some(setup) = self.setup.take() {
            setup.destroy(&self.core);
        }
        self.core.destroy();
    }
}

// getters
impl VulkanDevice {
    /// 尚未销毁的 native 对象数量
    pub fn object_count(&self) -> usize {
        self.buffers.len()
            + self.textures.len()
            + self.samplers.len()
            + self.views.len()
            + self.root_signatures.len()
            + self.tables.len()
            + self.shaders.len()
            + self.pipelines.len()
            + self.fences.len()
            + self.lists.len()
            + self.query_pools.len()
    }

    pub(crate) fn buffer(&self, id: NativeBuffer) -> RhiResult<&VkBuffer> {
        self.buffers.get(from_id(id.0)).ok_or_else(|| unknown("lookup", id))
    }

    pub(crate) fn texture(&self, id: NativeTexture) -> RhiResult<&VkTexture> {
        self.textures.get(from_id(id.0)).ok_or_else(|| unknown("lookup", id))
    }

    pub(crate) fn view(&self, id: NativeView) -> RhiResult<&VkView> {
        self.views.get(from_id(id.0)).ok_or_else(|| unknown("lookup", id))
    }

    pub(crate) fn root_signature(&self, id: NativeRootSignature) -> RhiResult<&VkRootSignature> {
        self.root_signatures.get(from_id(id.0)).ok_or_else(|| unknown("lookup", id))
    }

    fn shader(&self, id: NativeShader) -> RhiResult<vk::ShaderModule> {
        self.shaders.get(from_id(id.0)).copied().ok_or_else(|| unknown("lookup", id))
    }

    fn fence(&self, id: NativeFence) -> RhiResult<vk::Semaphore> {
        self.fences.get(from_id(id.0)).copied().ok_or_else(|| unknown("lookup", id))
    }

    fn null(&self) -> RhiResult<&NullResources> {
        self.null.as_ref().ok_or_else(|| unknown("null resources", "null view"))
    }
}

// tools
impl VulkanDevice {
    fn transition_texture(&self, image: vk::Image, format: TextureFormat, state: ResourceStates) -> RhiResult<()> {
        let setup = self.setup.as_ref().ok_or_else(|| unknown("transition", "setup commands"))?;
        setup.exec(&self.core, |device, cmd| {
            let barrier =
                layout_barrier(image, convert::aspect(format), StateSync::UNDEFINED, convert::state_sync(state));
            unsafe {
                device.cmd_pipeline_barrier2(cmd, &vk::DependencyInfo::default().image_memory_barriers(&[barrier]))
            };
        })
    }

    /// 每种描述符类型的 binding 中 slot 的数量
    fn binding_counts(ranges: impl Iterator<Item = DescriptorRange>) -> [u32; 5] {
        let mut counts = [0; 5];
        for range in ranges {
            let count = &mut counts[range.ty.index()];
            *count = (*count).max(range.end());
        }
        counts
    }

    fn null_info(&self, ty: DescriptorType) -> RhiResult<DescriptorInfo> {
        let null = self.null()?;
        Ok(match ty {
            DescriptorType::Buffer | DescriptorType::RwBuffer => DescriptorInfo::Buffer(
                vk::DescriptorBufferInfo::default().buffer(null.buffer).offset(0).range(vk::WHOLE_SIZE),
            ),
            DescriptorType::Texture | DescriptorType::RwTexture => DescriptorInfo::Image(
                vk::DescriptorImageInfo::default().image_view(null.image_view).image_layout(vk::ImageLayout::GENERAL),
            ),
            DescriptorType::Sampler => DescriptorInfo::Image(vk::DescriptorImageInfo::default().sampler(null.sampler)),
        })
    }

    fn descriptor_info(&self, ty: DescriptorType, view: &VkView) -> RhiResult<DescriptorInfo> {
        Ok(match view {
            VkView::Buffer { buffer, range } => {
                DescriptorInfo::Buffer(vk::DescriptorBufferInfo::default().buffer(*buffer).offset(0).range(*range))
            }
            VkView::Image { view, layout } => {
                DescriptorInfo::Image(vk::DescriptorImageInfo::default().image_view(*view).image_layout(*layout))
            }
            VkView::Sampler(sampler) => DescriptorInfo::Image(vk::DescriptorImageInfo::default().sampler(*sampler)),
            VkView::Attachment { .. } => {
                log::warn!("render target views cannot be bound to a descriptor table, binding null instead");
                self.null_info(ty)?
            }
            VkView::Null(_) => self.null_info(ty)?,
        })
    }

    fn write_infos(&self, set: vk::DescriptorSet, ty: DescriptorType, first: u32, infos: &[DescriptorInfo]) {
        let buffer_infos = infos
            .iter()
            .filter_map(|info| match info {
                DescriptorInfo::Buffer(info) => Some(*info),
                DescriptorInfo::Image(_) => None,
            })
            .collect_vec();
        let image_infos = infos
            .iter()
            .filter_map(|info| match info {
                DescriptorInfo::Image(info) => Some(*info),
                DescriptorInfo::Buffer(_) => None,
            })
            .collect_vec();

        let write = vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(convert::binding(ty))
            .dst_array_element(first)
            .descriptor_type(convert::descriptor_type(ty));
        let write = if buffer_infos.is_empty() {
            write.image_info(&image_infos)
        } else {
            write.buffer_info(&buffer_infos)
        };
        unsafe { self.core.device.update_descriptor_sets(&[write], &[]) };
    }
}

impl RhiDevice for VulkanDevice {
    fn name(&self) -> &str {
        &self.core.device_name
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> RhiResult<NativeBuffer> {
        let allocator = self.core.allocator()?;
        let buffer_ci = vk::BufferCreateInfo::default()
            .size(desc.byte_count.max(1))
            .usage(convert::buffer_usage(desc.all_allowed_states()))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let (usage, flags) = convert::memory_usage(desc.memory_usage);
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage,
            flags,
            ..Default::default()
        };

        let (handle, mut allocation) =
            unsafe { allocator.create_buffer(&buffer_ci, &alloc_ci) }.map_err(vk_error("vmaCreateBuffer"))?;

        // CPU 可见的 buffer 一直保持映射
        let mapped = if desc.memory_usage.is_cpu_visible() {
            match unsafe { allocator.map_memory(&mut allocation) } {
                Ok(ptr) => Some(ptr),
                Err(err) => {
                    unsafe { allocator.destroy_buffer(handle, &mut allocation) };
                    return Err(vk_error("vmaMapMemory")(err));
                }
            }
        } else {
            None
        };

        self.core.set_debug_name(handle, &desc.name);
        let key = self.buffers.insert(VkBuffer {
            handle,
            allocation,
            size: desc.byte_count,
            mapped,
        });
        Ok(NativeBuffer(to_id(key)))
    }

    fn destroy_buffer(&mut self, buffer: NativeBuffer) {
        let Some(mut record) = self.buffers.remove(from_id(buffer.0)) else {
            log::error!("destroying unknown {buffer}");
            return;
        };
        let Ok(allocator) = self.core.allocator() else {
            return;
        };
        unsafe {
            if record.mapped.is_some() {
                allocator.unmap_memory(&mut record.allocation);
            }
            allocator.destroy_buffer(record.handle, &mut record.allocation);
        }
    }

    fn map_buffer(&mut self, buffer: NativeBuffer) -> RhiResult<&mut [u8]> {
        let record = self.buffers.get(from_id(buffer.0)).ok_or_else(|| unknown("map_buffer", buffer))?;
        let ptr = record.mapped.ok_or_else(|| RhiError::Native {
            call: "map_buffer",
            message: format!("{buffer} is not cpu visible"),
        })?;
        // 映射在 buffer 销毁前一直有效，返回的切片借用 self
        Ok(unsafe { std::slice::from_raw_parts_mut(ptr, record.size as usize) })
    }

    fn unmap_buffer(&mut self, buffer: NativeBuffer) {
        let Some(record) = self.buffers.get(from_id(buffer.0)) else {
            log::error!("unmapping unknown {buffer}");
            return;
        };
        let Ok(allocator) = self.core.allocator() else {
            return;
        };
        // 非 coherent 的内存需要 flush
        if let Err(err) = allocator.flush_allocation(&record.allocation, 0, vk::WHOLE_SIZE) {
            log::error!("failed to flush {buffer}: {err:?}");
        }
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> RhiResult<NativeTexture> {
        let allocator = self.core.allocator()?;
        let extent = vk::Extent2D {
            width: desc.width,
            height: desc.height,
        };
        let image_ci = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(convert::format(desc.format))
            .extent(extent.into())
            .mip_levels(desc.mip_count.max(1))
            .array_layers(1)
            .samples(convert::sample_count(desc.sample_count))
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(convert::image_usage(desc.allowed_states | desc.initial_state))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        };

        let (handle, mut allocation) =
            unsafe { allocator.create_image(&image_ci, &alloc_ci) }.map_err(vk_error("vmaCreateImage"))?;

        if let Err(err) = self.transition_texture(handle, desc.format, desc.initial_state) {
            if let Ok(allocator) = self.core.allocator() {
                unsafe { allocator.destroy_image(handle, &mut allocation) };
            }
            return Err(err);
        }

        self.core.set_debug_name(handle, &desc.name);
        let key = self.textures.insert(VkTexture {
            handle,
            allocation,
            format: desc.format,
            extent,
        });
        Ok(NativeTexture(to_id(key)))
    }

    fn destroy_texture(&mut self, texture: NativeTexture) {
        let Some(mut record) = self.textures.remove(from_id(texture.0)) else {
            log::error!("destroying unknown {texture}");
            return;
        };
        if let Ok(allocator) = self.core.allocator() {
            unsafe { allocator.destroy_image(record.handle, &mut record.allocation) };
        }
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> RhiResult<NativeSampler> {
        let (filter, mipmap_mode) = convert::filter(desc.filter);
        let address_mode = convert::address_mode(desc.wrap_mode);
        let anisotropic = desc.filter == TextureFilter::Anisotropic;
        let sampler_ci = vk::SamplerCreateInfo::default()
            .mag_filter(filter)
            .min_filter(filter)
            .mipmap_mode(mipmap_mode)
            .address_mode_u(address_mode)
            .address_mode_v(address_mode)
            .address_mode_w(address_mode)
            .anisotropy_enable(anisotropic)
            .max_anisotropy(if anisotropic { 16.0 } else { 1.0 })
            .max_lod(vk::LOD_CLAMP_NONE);

        let sampler =
            unsafe { self.core.device.create_sampler(&sampler_ci, None) }.map_err(vk_error("create_sampler"))?;
        self.core.set_debug_name(sampler, &desc.name);
        Ok(NativeSampler(to_id(self.samplers.insert(sampler))))
    }

    fn destroy_sampler(&mut self, sampler: NativeSampler) {
        match self.samplers.remove(from_id(sampler.0)) {
            Some(handle) => unsafe { self.core.device.destroy_sampler(handle, None) },
            None => log::error!("destroying unknown {sampler}"),
        }
    }

    fn create_view(&mut self, desc: &ViewDesc) -> RhiResult<NativeView> {
        let image_view = |texture: &VkTexture, format: TextureFormat, aspect, base_mip, level_count| {
            let view_ci = vk::ImageViewCreateInfo::default()
                .image(texture.handle)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(convert::format(format))
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: aspect,
                    base_mip_level: base_mip,
                    level_count,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            unsafe { self.core.device.create_image_view(&view_ci, None) }.map_err(vk_error("create_image_view"))
        };

        let view = match *desc {
            ViewDesc::Null(ty) => VkView::Null(ty),
            ViewDesc::Buffer { buffer, byte_count, .. } => VkView::Buffer {
                buffer: self.buffer(buffer)?.handle,
                range: byte_count,
            },
            ViewDesc::Texture { texture, ty, format, mip } => {
                let record = self.texture(texture)?;
                // 采样深度时只能使用 depth aspect
                let aspect = if format.is_depth_stencil() {
                    vk::ImageAspectFlags::DEPTH
                } else {
                    vk::ImageAspectFlags::COLOR
                };
                let (base_mip, level_count) = match mip {
                    Some(mip) => (mip, 1),
                    None => (0, vk::REMAINING_MIP_LEVELS),
                };
                let layout = match ty {
                    DescriptorType::RwTexture => vk::ImageLayout::GENERAL,
                    _ => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                };
                VkView::Image {
                    view: image_view(record, format, aspect, base_mip, level_count)?,
                    layout,
                }
            }
            ViewDesc::Sampler(sampler) => VkView::Sampler(
                self.samplers.get(from_id(sampler.0)).copied().ok_or_else(|| unknown("create_view", sampler))?,
            ),
            ViewDesc::RenderTarget { texture, format } | ViewDesc::DepthStencil { texture, format } => {
                let record = self.texture(texture)?;
                VkView::Attachment {
                    view: image_view(record, format, convert::aspect(format), 0, 1)?,
                    extent: record.extent,
                }
            }
        };
        Ok(NativeView(to_id(self.views.insert(view))))
    }

    fn destroy_view(&mut self, view: NativeView) {
        match self.views.remove(from_id(view.0)) {
            Some(record) => {
                if let Some(image_view) = record.owned_image_view() {
                    unsafe { self.core.device.destroy_image_view(image_view, None) };
                }
            }
            None => log::error!("destroying unknown {view}"),
        }
    }

    fn create_root_signature(&mut self, desc: &RootSignatureDesc) -> RhiResult<NativeRootSignature> {
        let device = &self.core.device;
        let counts = Self::binding_counts(desc.ranges());

        let bindings = DescriptorType::ALL
            .into_iter()
            .filter(|ty| counts[ty.index()] > 0)
            .map(|ty| {
                let visibility = match ty {
                    DescriptorType::Sampler => desc.sampler_visibility,
                    _ => desc.generic_visibility,
                };
                vk::DescriptorSetLayoutBinding::default()
                    .binding(convert::binding(ty))
                    .descriptor_type(convert::descriptor_type(ty))
                    .descriptor_count(counts[ty.index()])
                    .stage_flags(convert::shader_stages(visibility))
            })
            .collect_vec();
        let set_layout =
            unsafe { device.create_descriptor_set_layout(&vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings), None) }
                .map_err(vk_error("create_descriptor_set_layout"))?;

        // vertex 和 pixel 的 push constants 依次排列，compute 单独从 0 开始
        let mut push_constants = [(0, 0); 3];
        let mut offset = 0;
        for stage in ShaderStage::ALL {
            let size = desc.constants_byte_count(stage);
            if stage == ShaderStage::Compute {
                offset = 0;
            }
            push_constants[stage.index()] = (offset, size);
            offset += size;
        }
        let push_ranges = ShaderStage::ALL
            .into_iter()
            .filter(|stage| push_constants[stage.index()].1 > 0)
            .map(|stage| {
                let (offset, size) = push_constants[stage.index()];
                vk::PushConstantRange::default().stage_flags(convert::shader_stage(stage)).offset(offset).size(size)
            })
            .collect_vec();

        let set_layouts = [set_layout];
        let layout_ci =
            vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts).push_constant_ranges(&push_ranges);
        let pipeline_layout = match unsafe { device.create_pipeline_layout(&layout_ci, None) } {
            Ok(layout) => layout,
            Err(err) => {
                unsafe { device.destroy_descriptor_set_layout(set_layout, None) };
                return Err(vk_error("create_pipeline_layout")(err));
            }
        };

        self.core.set_debug_name(set_layout, &desc.name);
        self.core.set_debug_name(pipeline_layout, &desc.name);
        let key = self.root_signatures.insert(VkRootSignature {
            set_layout,
            pipeline_layout,
            push_constants,
            table_count: 0,
        });
        Ok(NativeRootSignature(to_id(key)))
    }

    fn destroy_root_signature(&mut self, root_signature: NativeRootSignature) {
        let Some(record) = self.root_signatures.remove(from_id(root_signature.0)) else {
            log::error!("destroying unknown {root_signature}");
            return;
        };
        if record.table_count > 0 {
            log::warn!("{root_signature} is destroyed while {} tables still use it", record.table_count);
        }
        unsafe {
            self.core.device.destroy_pipeline_layout(record.pipeline_layout, None);
            self.core.device.destroy_descriptor_set_layout(record.set_layout, None);
        }
    }

    fn create_descriptor_table(
        &mut self,
        root_signature: NativeRootSignature,
        layout: &RootSignatureDesc,
        name: &str,
    ) -> RhiResult<NativeTable> {
        let rs_key: RootSignatureKey = from_id(root_signature.0);
        let set_layout = self.root_signature(root_signature)?.set_layout;
        let device = &self.core.device;
        let counts = Self::binding_counts(layout.ranges());

        let pool_sizes = DescriptorType::ALL
            .into_iter()
            .filter(|ty| counts[ty.index()] > 0)
            .map(|ty| vk::DescriptorPoolSize {
                ty: convert::descriptor_type(ty),
                descriptor_count: counts[ty.index()],
            })
            .collect_vec();

        // 没有任何描述符的 root signature 也允许创建空表
        let pool_ci = vk::DescriptorPoolCreateInfo::default().max_sets(1).pool_sizes(&pool_sizes);
        let pool = unsafe { device.create_descriptor_pool(&pool_ci, None) }.map_err(vk_error("create_descriptor_pool"))?;

        let set_layouts = [set_layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default().descriptor_pool(pool).set_layouts(&set_layouts);
        let set = match unsafe { device.allocate_descriptor_sets(&alloc_info) } {
            Ok(sets) => sets[0],
            Err(err) => {
                unsafe { device.destroy_descriptor_pool(pool, None) };
                return Err(vk_error("allocate_descriptor_sets")(err));
            }
        };
        self.core.set_debug_name(set, name);

        // 新表的每个 slot 都指向 null view
        for ty in DescriptorType::ALL {
            let count = counts[ty.index()];
            if count == 0 {
                continue;
            }
            let infos = (0..count).map(|_| self.null_info(ty)).collect::<RhiResult<Vec<_>>>()?;
            self.write_infos(set, ty, 0, &infos);
        }

        if let Some(record) = self.root_signatures.get_mut(rs_key) {
            record.table_count += 1;
        }
        let key = self.tables.insert(VkTable {
            root_signature: rs_key,
            pool,
            set,
            ranges: layout.ranges().collect(),
        });
        Ok(NativeTable(to_id(key)))
    }

    fn destroy_descriptor_table(&mut self, table: NativeTable) {
        let Some(record) = self.tables.remove(from_id(table.0)) else {
            log::error!("destroying unknown {table}");
            return;
        };
        if let Some(rs) = self.root_signatures.get_mut(record.root_signature) {
            rs.table_count = rs.table_count.saturating_sub(1);
        }
        unsafe { self.core.device.destroy_descriptor_pool(record.pool, None) };
    }

    fn write_descriptor(&mut self, table: NativeTable, ty: DescriptorType, index: u32, view: NativeView) {
        let Some(record) = self.tables.get(from_id(table.0)) else {
            log::error!("writing to unknown {table}");
            return;
        };
        if !record.ranges.iter().any(|range| range.contains(ty, index, 1)) {
            log::error!("{table} has no {ty:?} slot {index}");
            return;
        }
        let info = self.view(view).and_then(|record| self.descriptor_info(ty, record));
        match info {
            Ok(info) => self.write_infos(record.set, ty, index, &[info]),
            Err(err) => log::error!("failed to write {ty:?}[{index}] of {table}: {err}"),
        }
    }

    fn create_shader(&mut self, desc: &ShaderDesc) -> RhiResult<NativeShader> {
        let code = ash::util::read_spv(&mut Cursor::new(&desc.bytecode)).map_err(|err| RhiError::Native {
            call: "read_spv",
            message: format!("shader '{}': {err}", desc.name),
        })?;
        let module = unsafe {
            self.core.device.create_shader_module(&vk::ShaderModuleCreateInfo::default().code(&code), None)
        }
        .map_err(vk_error("create_shader_module"))?;
        self.core.set_debug_name(module, &desc.name);
        Ok(NativeShader(to_id(self.shaders.insert(module))))
    }

    fn destroy_shader(&mut self, shader: NativeShader) {
        match self.shaders.remove(from_id(shader.0)) {
            Some(module) => unsafe { self.core.device.destroy_shader_module(module, None) },
            None => log::error!("destroying unknown {shader}"),
        }
    }

    fn create_graphics_pipeline(&mut self, info: &GraphicsPipelineInfo<'_>) -> RhiResult<NativePipeline> {
        let _span = cinder_rhi::profile_span!("VulkanDevice::create_graphics_pipeline");
        let desc = info.desc;
        let layout = self.root_signature(info.root_signature)?.pipeline_layout;

        let mut stages = vec![
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(self.shader(info.vertex_shader)?)
                .name(SHADER_ENTRY),
        ];
        if let Some(pixel_shader) = info.pixel_shader {
            stages.push(
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(vk::ShaderStageFlags::FRAGMENT)
                    .module(self.shader(pixel_shader)?)
                    .name(SHADER_ENTRY),
            );
        }

        let vertex_bindings = desc
            .vertex_layout
            .binding_strides
            .iter()
            .enumerate()
            .map(|(binding, stride)| vk::VertexInputBindingDescription {
                binding: binding as u32,
                stride: *stride,
                input_rate: vk::VertexInputRate::VERTEX,
            })
            .collect_vec();
        let vertex_attributes = desc
            .vertex_layout
            .attributes
            .iter()
            .enumerate()
            .map(|(location, attribute)| vk::VertexInputAttributeDescription {
                location: location as u32,
                binding: attribute.buffer_index,
                format: convert::vertex_format(attribute.data_type, attribute.vector_length),
                offset: attribute.offset,
            })
            .collect_vec();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&vertex_bindings)
            .vertex_attribute_descriptions(&vertex_attributes);

        let input_assembly =
            vk::PipelineInputAssemblyStateCreateInfo::default().topology(vk::PrimitiveTopology::TRIANGLE_LIST);
        let viewport = vk::PipelineViewportStateCreateInfo::default().viewport_count(1).scissor_count(1);
        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(convert::cull_mode(desc.cull_mode))
            .front_face(vk::FrontFace::CLOCKWISE)
            .line_width(1.0);
        let multisample =
            vk::PipelineMultisampleStateCreateInfo::default().rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth = &desc.depth_stencil;
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(depth.enable_depth_test)
            .depth_write_enable(depth.enable_depth_writes)
            .depth_compare_op(convert::compare_op(depth.depth_comparison));

        let blend_attachments = desc
            .render_targets
            .iter()
            .map(|rt| {
                let attachment = vk::PipelineColorBlendAttachmentState::default().color_write_mask(vk::ColorComponentFlags::RGBA);
                match rt.blend {
                    Some(blend) => attachment
                        .blend_enable(true)
                        .src_color_blend_factor(convert::blend_factor(blend.src_factor))
                        .dst_color_blend_factor(convert::blend_factor(blend.dst_factor))
                        .color_blend_op(vk::BlendOp::ADD)
                        .src_alpha_blend_factor(vk::BlendFactor::ONE)
                        .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
                        .alpha_blend_op(vk::BlendOp::ADD),
                    None => attachment.blend_enable(false),
                }
            })
            .collect_vec();
        let color_blend = vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let color_formats = desc.render_targets.iter().map(|rt| convert::format(rt.format)).collect_vec();
        let depth_format = if depth.enable_depth_test || depth.enable_depth_writes {
            convert::format(depth.format)
        } else {
            vk::Format::UNDEFINED
        };
        let mut rendering = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&color_formats)
            .depth_attachment_format(depth_format)
            .stencil_attachment_format(depth_format);

        let pipeline_ci = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic)
            .layout(layout)
            .push_next(&mut rendering);

        let pipeline = unsafe {
            self.core.device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_ci], None)
        }
        .map_err(|(_, err)| vk_error("create_graphics_pipelines")(err))?[0];

        self.core.set_debug_name(pipeline, &desc.name);
        Ok(NativePipeline(to_id(self.pipelines.insert(pipeline))))
    }

    fn create_compute_pipeline(&mut self, info: &ComputePipelineInfo<'_>) -> RhiResult<NativePipeline> {
        let layout = self.root_signature(info.root_signature)?.pipeline_layout;
        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(self.shader(info.shader)?)
            .name(SHADER_ENTRY);
        let pipeline_ci = vk::ComputePipelineCreateInfo::default().stage(stage).layout(layout);

        let pipeline = unsafe {
            self.core.device.create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_ci], None)
        }
        .map_err(|(_, err)| vk_error("create_compute_pipelines")(err))?[0];

        self.core.set_debug_name(pipeline, &info.desc.name);
        Ok(NativePipeline(to_id(self.pipelines.insert(pipeline))))
    }

    fn destroy_pipeline(&mut self, pipeline: NativePipeline) {
        match self.pipelines.remove(from_id(pipeline.0)) {
            Some(handle) => unsafe { self.core.device.destroy_pipeline(handle, None) },
            None => log::error!("destroying unknown {pipeline}"),
        }
    }

    fn create_fence(&mut self, initial_value: u64, name: &str) -> RhiResult<NativeFence> {
        let mut timeline_ci = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(initial_value);
        let semaphore_ci = vk::SemaphoreCreateInfo::default().push_next(&mut timeline_ci);
        let semaphore =
            unsafe { self.core.device.create_semaphore(&semaphore_ci, None) }.map_err(vk_error("create_semaphore"))?;
        self.core.set_debug_name(semaphore, name);
        Ok(NativeFence(to_id(self.fences.insert(semaphore))))
    }

    fn destroy_fence(&mut self, fence: NativeFence) {
        match self.fences.remove(from_id(fence.0)) {
            Some(semaphore) => unsafe { self.core.device.destroy_semaphore(semaphore, None) },
            None => log::error!("destroying unknown {fence}"),
        }
    }

    fn fence_completed_value(&mut self, fence: NativeFence) -> RhiResult<u64> {
        let semaphore = self.fence(fence)?;
        unsafe { self.core.device.get_semaphore_counter_value(semaphore) }
            .map_err(vk_error("get_semaphore_counter_value"))
    }

    fn wait_fence(&mut self, fence: NativeFence, value: u64, timeout: Duration) -> RhiResult<bool> {
        let _span = cinder_rhi::profile_span!("VulkanDevice::wait_fence");
        let semaphores = [self.fence(fence)?];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default().semaphores(&semaphores).values(&values);
        let timeout_ns = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        match unsafe { self.core.device.wait_semaphores(&wait_info, timeout_ns) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(err) => Err(vk_error("wait_semaphores")(err)),
        }
    }

    fn create_command_list(&mut self, queue: QueueKind, name: &str) -> RhiResult<NativeCommandList> {
        let device = &self.core.device;
        let pool_ci = vk::CommandPoolCreateInfo::default()
            .queue_family_index(self.core.queue_family_index)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let pool = unsafe { device.create_command_pool(&pool_ci, None) }.map_err(vk_error("create_command_pool"))?;

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffer = match unsafe { device.allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers[0],
            Err(err) => {
                unsafe { device.destroy_command_pool(pool, None) };
                return Err(vk_error("allocate_command_buffers")(err));
            }
        };
        self.core.set_debug_name(pool, name);
        self.core.set_debug_name(buffer, name);

        let key = self.lists.insert(VkCommandList {
            queue,
            pool,
            buffer,
            recording: false,
            rendering: None,
        });
        Ok(NativeCommandList(to_id(key)))
    }

    fn destroy_command_list(&mut self, list: NativeCommandList) {
        match self.lists.remove(from_id(list.0)) {
            Some(record) => unsafe { self.core.device.destroy_command_pool(record.pool, None) },
            None => log::error!("destroying unknown {list}"),
        }
    }

    fn reset_command_list(&mut self, list: NativeCommandList) -> RhiResult<()> {
        let record = self.lists.get_mut(from_id(list.0)).ok_or_else(|| unknown("reset_command_list", list))?;
        let device = &self.core.device;
        unsafe {
            device
                .reset_command_pool(record.pool, vk::CommandPoolResetFlags::empty())
                .map_err(vk_error("reset_command_pool"))?;
            device
                .begin_command_buffer(
                    record.buffer,
                    &vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
                )
                .map_err(vk_error("begin_command_buffer"))?;
        }
        record.recording = true;
        record.rendering = None;
        Ok(())
    }

    fn record(&mut self, list: NativeCommandList, command: NativeCommand) {
        if let Err(err) = self.record_command(from_id(list.0), command) {
            log::error!("failed to record into {list}: {err}");
        }
    }

    fn close_command_list(&mut self, list: NativeCommandList) -> RhiResult<()> {
        let record = self.lists.get_mut(from_id(list.0)).ok_or_else(|| unknown("close_command_list", list))?;
        let device = &self.core.device;
        unsafe {
            if record.rendering.take().is_some() {
                device.cmd_end_rendering(record.buffer);
            }
            device.end_command_buffer(record.buffer).map_err(vk_error("end_command_buffer"))?;
        }
        record.recording = false;
        Ok(())
    }

    fn submit(
        &mut self,
        queue: QueueKind,
        list: NativeCommandList,
        waits: &[FenceWait],
        signal: FenceSignal,
    ) -> RhiResult<()> {
        let _span = cinder_rhi::profile_span!("VulkanDevice::submit");
        let record = self.lists.get(from_id(list.0)).ok_or_else(|| unknown("submit", list))?;
        if record.queue != queue {
            log::warn!("{list} was created for {:?} but is submitted to {queue:?}", record.queue);
        }

        let wait_infos = waits
            .iter()
            .map(|wait| {
                Ok(vk::SemaphoreSubmitInfo::default()
                    .semaphore(self.fence(wait.fence)?)
                    .value(wait.value)
                    .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS))
            })
            .collect::<RhiResult<Vec<_>>>()?;
        let signal_infos = [vk::SemaphoreSubmitInfo::default()
            .semaphore(self.fence(signal.fence)?)
            .value(signal.value)
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)];
        let cmd_infos = [vk::CommandBufferSubmitInfo::default().command_buffer(record.buffer)];

        let submit = vk::SubmitInfo2::default()
            .wait_semaphore_infos(&wait_infos)
            .command_buffer_infos(&cmd_infos)
            .signal_semaphore_infos(&signal_infos);
        unsafe { self.core.device.queue_submit2(self.core.queue, &[submit], vk::Fence::null()) }
            .map_err(vk_error("queue_submit2"))
    }

    fn create_query_pool(&mut self, count: u32, name: &str) -> RhiResult<NativeQueryPool> {
        let pool_ci = vk::QueryPoolCreateInfo::default().query_type(vk::QueryType::TIMESTAMP).query_count(count);
        let pool =
            unsafe { self.core.device.create_query_pool(&pool_ci, None) }.map_err(vk_error("create_query_pool"))?;
        // 新建的 query 处于未定义状态
        unsafe { self.core.device.reset_query_pool(pool, 0, count) };
        self.core.set_debug_name(pool, name);
        Ok(NativeQueryPool(to_id(self.query_pools.insert((pool, count)))))
    }

    fn destroy_query_pool(&mut self, pool: NativeQueryPool) {
        match self.query_pools.remove(from_id(pool.0)) {
            Some((handle, _)) => unsafe { self.core.device.destroy_query_pool(handle, None) },
            None => log::error!("destroying unknown {pool}"),
        }
    }

    fn read_timestamps(&mut self, pool: NativeQueryPool, first: u32, out: &mut [u64]) -> RhiResult<()> {
        let (handle, count) =
            self.query_pools.get(from_id(pool.0)).copied().ok_or_else(|| unknown("read_timestamps", pool))?;
        if first as usize + out.len() > count as usize {
            return Err(RhiError::Native {
                call: "read_timestamps",
                message: format!("{pool} has {count} queries, reading {}..{}", first, first as usize + out.len()),
            });
        }
        if out.is_empty() {
            return Ok(());
        }
        let device = &self.core.device;
        unsafe {
            device
                .get_query_pool_results(handle, first, out, vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WAIT)
                .map_err(vk_error("get_query_pool_results"))?;
            // 读完后复位，下一次在同一个 slot 写入前必须是 reset 状态
            device.reset_query_pool(handle, first, out.len() as u32);
        }
        Ok(())
    }

    fn timestamp_frequency(&self) -> u64 {
        self.core.timestamp_frequency()
    }

    fn wait_idle(&mut self) -> RhiResult<()> {
        let _span = cinder_rhi::profile_span!("VulkanDevice::wait_idle");
        unsafe { self.core.device.device_wait_idle() }.map_err(vk_error("device_wait_idle"))
    }
}

#[inline]
pub(crate) fn color_range(base_mip: u32, level_count: u32) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: base_mip,
        level_count,
        base_array_layer: 0,
        layer_count: 1,
    }
}

#[cfg(test)]
mod tests {
    use slotmap::Key;

    use super::*;

    #[test]
    fn binding_counts_cover_the_highest_slot() {
        let desc = RootSignatureDesc::new("rs", cinder_rhi::resources::format::PipelineType::Graphics)
            .add_range(DescriptorType::Texture, 0, 2)
            .add_range(DescriptorType::Texture, 4, 1)
            .add_range(DescriptorType::Buffer, 1, 1)
            .with_samplers(3);
        let counts = VulkanDevice::binding_counts(desc.ranges());
        assert_eq!(counts[DescriptorType::Texture.index()], 5);
        assert_eq!(counts[DescriptorType::Buffer.index()], 2);
        assert_eq!(counts[DescriptorType::Sampler.index()], 3);
        assert_eq!(counts[DescriptorType::RwBuffer.index()], 0);
    }

    #[test]
    fn native_ids_round_trip_through_slotmap_keys() {
        let mut map: SlotMap<BufferKey, u32> = SlotMap::with_key();
        let key = map.insert(7);
        let id = to_id(key);
        assert_eq!(map.get(from_id::<BufferKey>(id)), Some(&7));
        assert!(!key.is_null());
    }
}
