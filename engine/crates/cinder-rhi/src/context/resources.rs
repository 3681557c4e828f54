use std::collections::HashMap;

use crate::context::Rhi;
use crate::descriptor::{DescriptorHeapKind, DescriptorHeaps, DescriptorIndex};
use crate::device::{ComputePipelineInfo, GraphicsPipelineInfo, NativeShader, RhiDevice, ViewDesc};
use crate::error::{RhiError, RhiResult};
use crate::frame_pipeline::TransitionMarks;
use crate::handle::{
    BufferHandle, DescriptorTableHandle, Handle, PipelineHandle, PoolHandle, RootSignatureHandle, SamplerHandle,
    ShaderHandle, TextureHandle,
};
use crate::handle_pool::HandlePool;
use crate::resources::MAX_TEXTURE_MIPS;
use crate::resources::buffer::{BufferDesc, BufferRecord};
use crate::resources::descriptor_table::{DescriptorResources, DescriptorTableDesc, DescriptorTableRecord, MipSelection};
use crate::resources::format::{DescriptorType, PipelineType};
use crate::resources::pipeline::{ComputePipelineDesc, GraphicsPipelineDesc, PipelineRecord};
use crate::resources::root_signature::{RootSignatureDesc, RootSignatureRecord};
use crate::resources::sampler::{SamplerDesc, SamplerRecord};
use crate::resources::shader::{ShaderDesc, ShaderRecord};
use crate::resources::states::{ResourceStates, ShaderStage};
use crate::resources::texture::{TextureDesc, TextureRecord};

fn ensure_room<T, H: PoolHandle>(pool: &HandlePool<T, H>) -> RhiResult<()> {
    if pool.is_full() {
        return Err(RhiError::PoolExhausted {
            kind: H::KIND,
            capacity: pool.capacity(),
        });
    }
    Ok(())
}

/// 资源创建过程中已经分配的 view，失败时整体回滚
#[derive(Default)]
struct ViewSet {
    views: Vec<(DescriptorHeapKind, DescriptorIndex)>,
}

impl ViewSet {
    fn allocate(
        &mut self,
        heaps: &mut DescriptorHeaps,
        device: &mut dyn RhiDevice,
        kind: DescriptorHeapKind,
        desc: &ViewDesc,
    ) -> RhiResult<DescriptorIndex> {
        let index = heaps.allocate_view(device, kind, desc)?;
        self.views.push((kind, index));
        Ok(index)
    }

    fn rollback(self, heaps: &mut DescriptorHeaps, device: &mut dyn RhiDevice) {
        for (kind, index) in self.views {
            if let Err(err) = heaps.free_view(device, kind, index) {
                log::error!("failed to roll back descriptor {index} of the {kind} heap: {err}");
            }
        }
    }
}

// buffer
impl<D: RhiDevice> Rhi<D> {
    pub fn create_buffer(&mut self, desc: &BufferDesc) -> RhiResult<BufferHandle> {
        let _span = crate::profile_span!("Rhi::create_buffer");
        if desc.byte_count == 0 {
            return Err(RhiError::invalid_argument(format!("buffer '{}' has zero size", desc.name)));
        }
        desc.initial_state.validate()?;
        ensure_room(&self.buffers)?;

        let native = self.device.create_buffer(desc)?;
        let states = desc.all_allowed_states();
        let mut views = ViewSet::default();
        let created = (|| -> RhiResult<_> {
            let cbv = if states.intersects(ResourceStates::CONSTANT_BUFFER | ResourceStates::SHADER_ACCESS) {
                Some(views.allocate(
                    &mut self.heaps,
                    &mut self.device,
                    DescriptorHeapKind::ShaderResource,
                    &ViewDesc::Buffer {
                        buffer: native,
                        ty: DescriptorType::Buffer,
                        byte_count: desc.byte_count,
                    },
                )?)
            } else {
                None
            };
            let uav = if states.contains(ResourceStates::UNORDERED_ACCESS) {
                Some(views.allocate(
                    &mut self.heaps,
                    &mut self.device,
                    DescriptorHeapKind::ShaderResource,
                    &ViewDesc::Buffer {
                        buffer: native,
                        ty: DescriptorType::RwBuffer,
                        byte_count: desc.byte_count,
                    },
                )?)
            } else {
                None
            };
            Ok((cbv, uav))
        })();

        let (cbv, uav) = match created {
            Ok(views) => views,
            Err(err) => {
                views.rollback(&mut self.heaps, &mut self.device);
                self.device.destroy_buffer(native);
                return Err(err);
            }
        };

        let handle = self.buffers.add(BufferRecord {
            desc: desc.clone(),
            native,
            current_state: desc.initial_state,
            cbv,
            uav,
            mapped: false,
        })?;
        log::debug!("buffer '{}' created: {handle}, {} bytes", desc.name, desc.byte_count);
        Ok(handle)
    }

    pub fn destroy_buffer(&mut self, handle: BufferHandle) -> RhiResult<()> {
        self.ensure_not_uploading(handle.raw())?;
        let record = self.buffers.remove(handle)?;
        self.reset_table_bindings(handle.raw());
        self.release_buffer(record)
    }

    pub(crate) fn release_buffer(&mut self, record: BufferRecord) -> RhiResult<()> {
        if record.mapped {
            self.device.unmap_buffer(record.native);
        }
        for index in [record.cbv, record.uav].into_iter().flatten() {
            self.heaps.free_view(&mut self.device, DescriptorHeapKind::ShaderResource, index)?;
        }
        self.device.destroy_buffer(record.native);
        Ok(())
    }

    /// 返回整个 buffer 的 CPU 可见内存
    pub fn map_buffer(&mut self, handle: BufferHandle) -> RhiResult<&mut [u8]> {
        let record = self.buffers.get_mut(handle)?;
        if !record.desc.memory_usage.is_cpu_visible() {
            return Err(RhiError::invalid_operation(format!(
                "buffer '{}' lives in {:?} memory and cannot be mapped",
                record.desc.name, record.desc.memory_usage
            )));
        }
        if record.mapped {
            return Err(RhiError::invalid_operation(format!("buffer '{}' is already mapped", record.desc.name)));
        }
        record.mapped = true;
        let native = record.native;

        match self.device.map_buffer(native) {
            Ok(memory) => Ok(memory),
            Err(err) => {
                if let Some(record) = self.buffers.try_get_mut(handle) {
                    record.mapped = false;
                }
                Err(err)
            }
        }
    }

    pub fn unmap_buffer(&mut self, handle: BufferHandle) -> RhiResult<()> {
        let record = self.buffers.get_mut(handle)?;
        if !record.mapped {
            return Err(RhiError::invalid_operation(format!("buffer '{}' is not mapped", record.desc.name)));
        }
        record.mapped = false;
        self.device.unmap_buffer(record.native);
        Ok(())
    }
}

// texture
impl<D: RhiDevice> Rhi<D> {
    pub fn create_texture(&mut self, desc: &TextureDesc) -> RhiResult<TextureHandle> {
        let _span = crate::profile_span!("Rhi::create_texture");
        validate_texture_desc(desc)?;
        ensure_room(&self.textures)?;

        let native = self.device.create_texture(desc)?;
        let states = desc.all_allowed_states();
        let mut views = ViewSet::default();
        let mut record = TextureRecord {
            desc: desc.clone(),
            native,
            current_state: desc.initial_state,
            transitions: TransitionMarks::default(),
            srv: None,
            uav_mips: Vec::new(),
            rtv: None,
            dsv: None,
        };

        let created = (|| -> RhiResult<()> {
            let heaps = &mut self.heaps;
            let device = &mut self.device;
            if states.intersects(ResourceStates::SHADER_ACCESS) {
                let view = ViewDesc::Texture {
                    texture: native,
                    ty: DescriptorType::Texture,
                    format: desc.format,
                    mip: None,
                };
                record.srv = Some(views.allocate(heaps, device, DescriptorHeapKind::ShaderResource, &view)?);
            }
            if states.contains(ResourceStates::UNORDERED_ACCESS) {
                for mip in 0..desc.mip_count {
                    let view = ViewDesc::Texture {
                        texture: native,
                        ty: DescriptorType::RwTexture,
                        format: desc.format,
                        mip: Some(mip),
                    };
                    let index = views.allocate(heaps, device, DescriptorHeapKind::ShaderResource, &view)?;
                    record.uav_mips.push(index);
                }
            }
            if states.contains(ResourceStates::RENDER_TARGET) {
                let view = ViewDesc::RenderTarget {
                    texture: native,
                    format: desc.format,
                };
                record.rtv = Some(views.allocate(heaps, device, DescriptorHeapKind::RenderTarget, &view)?);
            }
            if states.intersects(ResourceStates::DEPTH_ACCESS) {
                let view = ViewDesc::DepthStencil {
                    texture: native,
                    format: desc.format,
                };
                record.dsv = Some(views.allocate(heaps, device, DescriptorHeapKind::DepthStencil, &view)?);
            }
            Ok(())
        })();

        if let Err(err) = created {
            views.rollback(&mut self.heaps, &mut self.device);
            self.device.destroy_texture(native);
            return Err(err);
        }

        let handle = self.textures.add(record)?;
        log::debug!(
            "texture '{}' created: {handle}, {}x{} {:?}, {} mips",
            desc.name,
            desc.width,
            desc.height,
            desc.format,
            desc.mip_count
        );
        Ok(handle)
    }

    pub fn destroy_texture(&mut self, handle: TextureHandle) -> RhiResult<()> {
        if self.back_buffers.contains(&handle) {
            return Err(RhiError::invalid_operation(format!("{handle} is a back buffer owned by the RHI")));
        }
        self.ensure_not_uploading(handle.raw())?;
        let record = self.textures.remove(handle)?;
        self.reset_table_bindings(handle.raw());
        self.release_texture(record)
    }

    pub(crate) fn release_texture(&mut self, record: TextureRecord) -> RhiResult<()> {
        for index in record.srv.into_iter().chain(record.uav_mips.iter().copied()) {
            self.heaps.free_view(&mut self.device, DescriptorHeapKind::ShaderResource, index)?;
        }
        if let Some(index) = record.rtv {
            self.heaps.free_view(&mut self.device, DescriptorHeapKind::RenderTarget, index)?;
        }
        if let Some(index) = record.dsv {
            self.heaps.free_view(&mut self.device, DescriptorHeapKind::DepthStencil, index)?;
        }
        self.device.destroy_texture(record.native);
        Ok(())
    }
}

fn validate_texture_desc(desc: &TextureDesc) -> RhiResult<()> {
    let fail = |message: String| Err(RhiError::invalid_argument(format!("texture '{}': {message}", desc.name)));

    if desc.width == 0 || desc.height == 0 {
        return fail(format!("empty extent {}x{}", desc.width, desc.height));
    }
    let max_mips = (u32::BITS - desc.width.max(desc.height).leading_zeros()).min(MAX_TEXTURE_MIPS);
    if desc.mip_count == 0 || desc.mip_count > max_mips {
        return fail(format!("mip count {} must be in 1..={max_mips}", desc.mip_count));
    }
    if desc.sample_count == 0 {
        return fail("sample count must be positive".to_string());
    }
    desc.initial_state.validate()?;

    let states = desc.all_allowed_states();
    if desc.format.is_depth_stencil() {
        if states.intersects(ResourceStates::RENDER_TARGET | ResourceStates::UNORDERED_ACCESS) {
            return fail(format!("{:?} cannot be used as a color target or UAV", desc.format));
        }
    } else if states.intersects(ResourceStates::DEPTH_ACCESS) {
        return fail(format!("{:?} is not a depth-stencil format", desc.format));
    }
    Ok(())
}

// sampler
impl<D: RhiDevice> Rhi<D> {
    pub fn create_sampler(&mut self, desc: &SamplerDesc) -> RhiResult<SamplerHandle> {
        ensure_room(&self.samplers)?;
        let native = self.device.create_sampler(desc)?;
        let descriptor =
            match self
                .heaps
                .allocate_view(&mut self.device, DescriptorHeapKind::Sampler, &ViewDesc::Sampler(native))
            {
                Ok(index) => index,
                Err(err) => {
                    self.device.destroy_sampler(native);
                    return Err(err);
                }
            };

        let handle = self.samplers.add(SamplerRecord {
            desc: desc.clone(),
            native,
            descriptor,
        })?;
        log::debug!("sampler '{}' created: {handle}", desc.name);
        Ok(handle)
    }

    pub fn destroy_sampler(&mut self, handle: SamplerHandle) -> RhiResult<()> {
        let record = self.samplers.remove(handle)?;
        self.reset_table_bindings(handle.raw());
        self.release_sampler(record)
    }

    pub(crate) fn release_sampler(&mut self, record: SamplerRecord) -> RhiResult<()> {
        self.heaps.free_view(&mut self.device, DescriptorHeapKind::Sampler, record.descriptor)?;
        self.device.destroy_sampler(record.native);
        Ok(())
    }
}

// root signature & descriptor table
impl<D: RhiDevice> Rhi<D> {
    pub fn create_root_signature(&mut self, desc: &RootSignatureDesc) -> RhiResult<RootSignatureHandle> {
        desc.validate()?;
        ensure_room(&self.root_signatures)?;
        let native = self.device.create_root_signature(desc)?;
        let handle = self.root_signatures.add(RootSignatureRecord {
            desc: desc.clone(),
            native,
        })?;
        log::debug!("root signature '{}' created: {handle}", desc.name);
        Ok(handle)
    }

    /// 仍被描述符表或 pipeline 使用的 root signature 不能销毁
    pub fn destroy_root_signature(&mut self, handle: RootSignatureHandle) -> RhiResult<()> {
        self.root_signatures.get(handle)?;
        let tables = self.descriptor_tables.iter().filter(|(_, t)| t.root_signature == handle).count();
        let pipelines = self.pipelines.iter().filter(|(_, p)| p.root_signature == handle).count();
        if tables + pipelines > 0 {
            return Err(RhiError::invalid_operation(format!(
                "{handle} is still used by {tables} descriptor tables and {pipelines} pipelines"
            )));
        }

        let record = self.root_signatures.remove(handle)?;
        self.device.destroy_root_signature(record.native);
        Ok(())
    }

    /// 新表的每个 slot 都指向对应类型的 null view
    pub fn create_descriptor_table(&mut self, desc: &DescriptorTableDesc) -> RhiResult<DescriptorTableHandle> {
        let root_signature = self.root_signatures.get(desc.root_signature)?;
        ensure_room(&self.descriptor_tables)?;

        let native = self
            .device
            .create_descriptor_table(root_signature.native, &root_signature.desc, &desc.name)?;
        self.heaps.fill_with_null(&mut self.device, native, &root_signature.desc);

        let handle = self.descriptor_tables.add(DescriptorTableRecord {
            name: desc.name.clone(),
            root_signature: desc.root_signature,
            native,
            bindings: HashMap::new(),
            lifetime: desc.lifetime,
        })?;
        log::debug!("descriptor table '{}' created: {handle}", desc.name);
        Ok(handle)
    }

    pub fn destroy_descriptor_table(&mut self, handle: DescriptorTableHandle) -> RhiResult<()> {
        let record = self.descriptor_tables.remove(handle)?;
        self.device.destroy_descriptor_table(record.native);
        Ok(())
    }

    /// 把 `resources` 写入表中从 `first_index` 开始的连续 slot
    ///
    /// 写入前检查所有资源；任何一个不合法时表保持不变。
    pub fn update_descriptor_table(
        &mut self,
        table: DescriptorTableHandle,
        first_index: u32,
        resources: DescriptorResources<'_>,
    ) -> RhiResult<()> {
        let _span = crate::profile_span!("Rhi::update_descriptor_table");
        let record = self.descriptor_tables.get(table)?;
        let layout = &self.root_signatures.get(record.root_signature)?.desc;
        let native_table = record.native;
        let ty = resources.descriptor_type();

        // (slot 内容所在的 heap, 下标, 资源)
        let mut sources: Vec<(DescriptorHeapKind, DescriptorIndex, Handle)> = Vec::new();
        let missing = |handle: Handle, view: &str| {
            RhiError::invalid_argument(format!("{handle} has no {view} view"))
        };
        match resources {
            DescriptorResources::Buffers(buffers) => {
                for &handle in buffers {
                    let index = self.buffers.get(handle)?.cbv.ok_or_else(|| missing(handle.raw(), "constant buffer"))?;
                    sources.push((DescriptorHeapKind::ShaderResource, index, handle.raw()));
                }
            }
            DescriptorResources::RwBuffers(buffers) => {
                for &handle in buffers {
                    let index = self.buffers.get(handle)?.uav.ok_or_else(|| missing(handle.raw(), "unordered access"))?;
                    sources.push((DescriptorHeapKind::ShaderResource, index, handle.raw()));
                }
            }
            DescriptorResources::Textures(textures) => {
                for &handle in textures {
                    let index = self.textures.get(handle)?.srv.ok_or_else(|| missing(handle.raw(), "shader resource"))?;
                    sources.push((DescriptorHeapKind::ShaderResource, index, handle.raw()));
                }
            }
            DescriptorResources::RwTextures {
                textures,
                mip: MipSelection::Slice(mip),
            } => {
                for &handle in textures {
                    let index = *self
                        .textures
                        .get(handle)?
                        .uav_mips
                        .get(mip as usize)
                        .ok_or_else(|| missing(handle.raw(), format!("mip {mip} unordered access").as_str()))?;
                    sources.push((DescriptorHeapKind::ShaderResource, index, handle.raw()));
                }
            }
            DescriptorResources::RwTextures {
                textures,
                mip: MipSelection::Chain,
            } => {
                let &[handle] = textures else {
                    return Err(RhiError::invalid_argument(format!(
                        "a mip chain binds exactly one texture, got {}",
                        textures.len()
                    )));
                };
                let uav_mips = &self.textures.get(handle)?.uav_mips;
                if uav_mips.is_empty() {
                    return Err(missing(handle.raw(), "unordered access"));
                }
                sources.extend(
                    uav_mips
                        .iter()
                        .map(|&index| (DescriptorHeapKind::ShaderResource, index, handle.raw())),
                );
            }
            DescriptorResources::Samplers(samplers) => {
                for &handle in samplers {
                    let index = self.samplers.get(handle)?.descriptor;
                    sources.push((DescriptorHeapKind::Sampler, index, handle.raw()));
                }
            }
        }

        let count = sources.len() as u32;
        if count == 0 {
            return Err(RhiError::invalid_argument("descriptor table update without resources"));
        }
        if layout.find_range(ty, first_index, count).is_none() {
            return Err(RhiError::invalid_argument(format!(
                "{count} {ty:?} descriptors at {first_index} are outside the layout of '{}'",
                layout.name
            )));
        }

        for (slot, (kind, index, _)) in (first_index..).zip(&sources) {
            self.heaps
                .copy_descriptor(&mut self.device, native_table, ty, slot, *kind, *index)?;
        }
        let record = self.descriptor_tables.get_mut(table)?;
        for (slot, (_, _, owner)) in (first_index..).zip(sources) {
            record.bindings.insert((ty, slot), owner);
        }
        Ok(())
    }

    /// 把所有引用 `resource` 的表 slot 重新指向 null view
    pub(crate) fn reset_table_bindings(&mut self, resource: Handle) {
        let mut reset = 0;
        for (_, table) in self.descriptor_tables.iter_mut() {
            for (ty, index) in table.slots_referencing(resource) {
                self.heaps.write_null(&mut self.device, table.native, ty, index);
                table.bindings.remove(&(ty, index));
                reset += 1;
            }
        }
        if reset > 0 {
            log::debug!("{reset} descriptor table slots referencing {resource} were reset to null");
        }
    }
}

// shader & pipeline
impl<D: RhiDevice> Rhi<D> {
    pub fn create_shader(&mut self, desc: &ShaderDesc) -> RhiResult<ShaderHandle> {
        ensure_room(&self.shaders)?;
        let native = self.device.create_shader(desc)?;
        let handle = self.shaders.add(ShaderRecord {
            name: desc.name.clone(),
            stage: desc.stage,
            byte_count: desc.bytecode.len(),
            native,
            lifetime: desc.lifetime,
        })?;
        log::debug!("{:?} shader '{}' created: {handle}", desc.stage, desc.name);
        Ok(handle)
    }

    /// pipeline 创建之后即可销毁 shader
    pub fn destroy_shader(&mut self, handle: ShaderHandle) -> RhiResult<()> {
        let record = self.shaders.remove(handle)?;
        self.device.destroy_shader(record.native);
        Ok(())
    }

    pub fn create_graphics_pipeline(&mut self, desc: &GraphicsPipelineDesc) -> RhiResult<PipelineHandle> {
        let _span = crate::profile_span!("Rhi::create_graphics_pipeline");
        desc.validate()?;
        let root_signature = self.root_signatures.get(desc.root_signature)?;
        if root_signature.pipeline_type() != PipelineType::Graphics {
            return Err(RhiError::invalid_argument(format!(
                "pipeline '{}' needs a graphics root signature, '{}' is {:?}",
                desc.name,
                root_signature.desc.name,
                root_signature.pipeline_type()
            )));
        }
        if !desc.vertex_layout.attributes.is_empty() && !root_signature.desc.using_vertex_buffers {
            return Err(RhiError::invalid_argument(format!(
                "pipeline '{}' has vertex attributes but '{}' does not use vertex buffers",
                desc.name, root_signature.desc.name
            )));
        }
        let vertex_shader = self.shader_of_stage(desc.vertex_shader, ShaderStage::Vertex)?;
        let pixel_shader = desc
            .pixel_shader
            .map(|shader| self.shader_of_stage(shader, ShaderStage::Pixel))
            .transpose()?;
        ensure_room(&self.pipelines)?;

        let native = self.device.create_graphics_pipeline(&GraphicsPipelineInfo {
            desc,
            root_signature: root_signature.native,
            vertex_shader,
            pixel_shader,
        })?;
        let handle = self.pipelines.add(PipelineRecord {
            name: desc.name.clone(),
            pipeline_type: PipelineType::Graphics,
            root_signature: desc.root_signature,
            native,
            lifetime: desc.lifetime,
        })?;
        log::debug!("graphics pipeline '{}' created: {handle}", desc.name);
        Ok(handle)
    }

    pub fn create_compute_pipeline(&mut self, desc: &ComputePipelineDesc) -> RhiResult<PipelineHandle> {
        let _span = crate::profile_span!("Rhi::create_compute_pipeline");
        let root_signature = self.root_signatures.get(desc.root_signature)?;
        if root_signature.pipeline_type() != PipelineType::Compute {
            return Err(RhiError::invalid_argument(format!(
                "pipeline '{}' needs a compute root signature, '{}' is {:?}",
                desc.name,
                root_signature.desc.name,
                root_signature.pipeline_type()
            )));
        }
        let shader = self.shader_of_stage(desc.shader, ShaderStage::Compute)?;
        ensure_room(&self.pipelines)?;

        let native = self.device.create_compute_pipeline(&ComputePipelineInfo {
            desc,
            root_signature: root_signature.native,
            shader,
        })?;
        let handle = self.pipelines.add(PipelineRecord {
            name: desc.name.clone(),
            pipeline_type: PipelineType::Compute,
            root_signature: desc.root_signature,
            native,
            lifetime: desc.lifetime,
        })?;
        log::debug!("compute pipeline '{}' created: {handle}", desc.name);
        Ok(handle)
    }

    pub fn destroy_pipeline(&mut self, handle: PipelineHandle) -> RhiResult<()> {
        let record = self.pipelines.remove(handle)?;
        self.device.destroy_pipeline(record.native);
        Ok(())
    }

    fn shader_of_stage(&self, handle: ShaderHandle, stage: ShaderStage) -> RhiResult<NativeShader> {
        let shader = self.shaders.get(handle)?;
        if shader.stage != stage {
            return Err(RhiError::invalid_argument(format!(
                "shader '{}' is a {:?} shader, expected {stage:?}",
                shader.name, shader.stage
            )));
        }
        Ok(shader.native)
    }
}
