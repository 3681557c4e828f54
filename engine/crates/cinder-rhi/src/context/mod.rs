//! RHI 的上下文对象
//!
//! [`Rhi`] 持有设备、所有资源池、描述符 heap、帧流水线、上传环形缓冲和 duration query。
//! 所有操作都通过 `&mut self` 调用；只允许单线程录制。

mod commands;
mod resources;
mod sweep;
mod upload;

pub use commands::{BufferBarrier, TextureBarrier};

use crate::config::RhiConfig;
use crate::descriptor::DescriptorHeaps;
use crate::device::{FenceWait, RhiDevice};
use crate::error::{RhiError, RhiResult};
use crate::frame_pipeline::{FrameLabel, FramePipeline, FrameState};
use crate::handle::{
    BufferHandle, DescriptorTableHandle, PipelineHandle, ResourceKind, RootSignatureHandle, SamplerHandle,
    ShaderHandle, TextureHandle,
};
use crate::handle_pool::HandlePool;
use crate::queries::{DurationQueries, DurationSample};
use crate::resources::buffer::BufferRecord;
use crate::resources::descriptor_table::DescriptorTableRecord;
use crate::resources::pipeline::PipelineRecord;
use crate::resources::root_signature::RootSignatureRecord;
use crate::resources::sampler::SamplerRecord;
use crate::resources::shader::ShaderRecord;
use crate::resources::states::ResourceStates;
use crate::resources::texture::{TextureDesc, TextureRecord};
use crate::upload_ring::UploadRing;

/// `shutdown` 之前被 drop 时报错
struct ShutdownGuard {
    armed: bool,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        if self.armed {
            log::error!("Rhi dropped without shutdown(), GPU objects were leaked");
        }
    }
}

pub struct Rhi<D: RhiDevice> {
    config: RhiConfig,
    device: D,

    buffers: HandlePool<BufferRecord, BufferHandle>,
    textures: HandlePool<TextureRecord, TextureHandle>,
    samplers: HandlePool<SamplerRecord, SamplerHandle>,
    root_signatures: HandlePool<RootSignatureRecord, RootSignatureHandle>,
    descriptor_tables: HandlePool<DescriptorTableRecord, DescriptorTableHandle>,
    pipelines: HandlePool<PipelineRecord, PipelineHandle>,
    shaders: HandlePool<ShaderRecord, ShaderHandle>,

    heaps: DescriptorHeaps,
    frames: FramePipeline,
    upload: UploadRing,
    queries: DurationQueries,

    /// 每个 frame slot 一个
    back_buffers: Vec<TextureHandle>,

    guard: ShutdownGuard,
}

// new & init
impl<D: RhiDevice> Rhi<D> {
    pub fn new(mut device: D, config: RhiConfig) -> RhiResult<Self> {
        let _span = crate::profile_span!("Rhi::new");
        config.validate()?;
        log::info!("creating RHI on device '{}'", device.name());

        let heaps = DescriptorHeaps::new(&mut device, config.descriptor_capacities())?;
        let frames = FramePipeline::new(&mut device, config.frame_count)?;
        let upload = UploadRing::new(&mut device, config.upload_ring_bytes)?;
        let queries = DurationQueries::new(&mut device, config.frame_count, config.max_duration_queries)?;

        let capacity = |kind: ResourceKind| config.pool_capacity(kind) as usize;
        let mut rhi = Self {
            buffers: HandlePool::new(capacity(ResourceKind::Buffer))?,
            textures: HandlePool::new(capacity(ResourceKind::Texture))?,
            samplers: HandlePool::new(capacity(ResourceKind::Sampler))?,
            root_signatures: HandlePool::new(capacity(ResourceKind::RootSignature))?,
            descriptor_tables: HandlePool::new(capacity(ResourceKind::DescriptorTable))?,
            pipelines: HandlePool::new(capacity(ResourceKind::Pipeline))?,
            shaders: HandlePool::new(capacity(ResourceKind::Shader))?,
            config,
            device,
            heaps,
            frames,
            upload,
            queries,
            back_buffers: Vec::new(),
            guard: ShutdownGuard { armed: true },
        };

        for label in FrameLabel::ALL.iter().take(rhi.config.frame_count as usize) {
            let desc = TextureDesc::new(
                format!("back buffer [{label}]"),
                rhi.config.back_buffer_width,
                rhi.config.back_buffer_height,
                1,
            )
            .with_format(rhi.config.back_buffer_format)
            .with_initial_state(ResourceStates::RENDER_TARGET)
            .allow(ResourceStates::PIXEL_SHADER_ACCESS | ResourceStates::COPY_SOURCE);
            let handle = rhi.create_texture(&desc)?;
            rhi.back_buffers.push(handle);
        }

        log::info!(
            "RHI created: {} frames in flight, {} back buffers of {}x{}",
            rhi.config.frame_count,
            rhi.back_buffers.len(),
            rhi.config.back_buffer_width,
            rhi.config.back_buffer_height
        );
        Ok(rhi)
    }
}

// destroy
impl<D: RhiDevice> Rhi<D> {
    /// 结束正在录制的帧，等待 GPU 空闲，销毁所有资源，最后把设备交还给调用方
    pub fn shutdown(mut self) -> RhiResult<D> {
        let _span = crate::profile_span!("Rhi::shutdown");
        self.guard.armed = false;
        log::info!("RHI shutting down");

        if self.upload.is_open() {
            log::warn!("an upload was still open at shutdown, it is dropped");
            self.cancel_upload();
        }
        if self.frames.is_temp_open() {
            self.end_temp_command_list()?;
        }
        if self.frames.is_frame_recording() {
            log::warn!("frame {} was still recording at shutdown, ending it", self.frame_name());
            self.end_frame()?;
        }
        self.wait_until_device_idle()?;

        let report = self.sweep_all()?;
        log::info!("shutdown sweep destroyed {report}");

        for handle in std::mem::take(&mut self.back_buffers) {
            let record = self.textures.remove(handle)?;
            self.release_texture(record)?;
        }

        let Self {
            mut device,
            heaps,
            frames,
            upload,
            queries,
            ..
        } = self;
        queries.destroy(&mut device);
        upload.destroy(&mut device);
        frames.destroy(&mut device);
        heaps.destroy(&mut device);

        log::info!("RHI destroyed");
        Ok(device)
    }
}

// phase call
impl<D: RhiDevice> Rhi<D> {
    /// 等待当前 frame slot 上一次提交完成，并开始录制
    pub fn begin_frame(&mut self) -> RhiResult<()> {
        let _span = crate::profile_span!("Rhi::begin_frame");
        let index = self.frames.begin_frame(&mut self.device, self.config.fence_timeout())?;

        // slot 已经完成，读回它上一次的 duration query
        self.queries.resolve(&mut self.device, index)?;
        self.queries.start_frame(index, self.frames.counter().frame_id());
        self.upload.retire(&mut self.device)?;
        Ok(())
    }

    /// 提交当前帧；主队列会先等待最近一次上传完成
    pub fn end_frame(&mut self) -> RhiResult<()> {
        let _span = crate::profile_span!("Rhi::end_frame");
        if self.upload.is_open() {
            return Err(RhiError::invalid_operation("end_frame while an upload is open"));
        }
        if self.frames.is_frame_recording() && !self.frames.is_temp_open() {
            let index = self.frames.frame_index();
            for command in self.queries.close_open(index) {
                self.frames.frame_recorder()?.record(&mut self.device, command);
            }
        }
        let waits = self.upload_waits();
        self.frames.end_frame(&mut self.device, &waits)?;
        Ok(())
    }

    /// 阻塞直到所有已提交的工作完成
    pub fn wait_until_device_idle(&mut self) -> RhiResult<()> {
        let _span = crate::profile_span!("Rhi::wait_until_device_idle");
        let timeout = self.config.fence_timeout();
        self.frames.wait_all(&mut self.device, timeout)?;
        let latest_upload = self.upload.latest_value();
        self.upload.wait(&mut self.device, latest_upload, timeout)?;
        self.device.wait_idle()?;
        self.upload.retire(&mut self.device)?;
        Ok(())
    }

    /// 打开一个一次性的 command list，用于帧外的 GPU 工作（例如生成 mip）
    pub fn begin_temp_command_list(&mut self) -> RhiResult<()> {
        self.frames.begin_temp(&mut self.device)
    }

    /// 提交临时 command list，返回时 GPU 已经执行完毕
    pub fn end_temp_command_list(&mut self) -> RhiResult<()> {
        let _span = crate::profile_span!("Rhi::end_temp_command_list");
        let waits = self.upload_waits();
        self.frames.end_temp(&mut self.device, &waits, self.config.fence_timeout())
    }

    fn upload_waits(&self) -> Vec<FenceWait> {
        let latest = self.upload.latest_value();
        if latest == 0 {
            return Vec::new();
        }
        vec![FenceWait {
            fence: self.upload.fence().native(),
            value: latest,
        }]
    }
}

// getters
impl<D: RhiDevice> Rhi<D> {
    #[inline]
    pub fn config(&self) -> &RhiConfig {
        &self.config
    }
    #[inline]
    pub fn device(&self) -> &D {
        &self.device
    }
    /// 测试用：直接访问设备（例如 headless 设备的 hook）
    #[inline]
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    #[inline]
    pub fn buffers(&self) -> &HandlePool<BufferRecord, BufferHandle> {
        &self.buffers
    }
    #[inline]
    pub fn textures(&self) -> &HandlePool<TextureRecord, TextureHandle> {
        &self.textures
    }
    #[inline]
    pub fn samplers(&self) -> &HandlePool<SamplerRecord, SamplerHandle> {
        &self.samplers
    }
    #[inline]
    pub fn root_signatures(&self) -> &HandlePool<RootSignatureRecord, RootSignatureHandle> {
        &self.root_signatures
    }
    #[inline]
    pub fn descriptor_tables(&self) -> &HandlePool<DescriptorTableRecord, DescriptorTableHandle> {
        &self.descriptor_tables
    }
    #[inline]
    pub fn pipelines(&self) -> &HandlePool<PipelineRecord, PipelineHandle> {
        &self.pipelines
    }
    #[inline]
    pub fn shaders(&self) -> &HandlePool<ShaderRecord, ShaderHandle> {
        &self.shaders
    }

    /// 所有池中存活的资源数，包括 back buffer
    pub fn live_resource_count(&self) -> usize {
        self.buffers.count_used()
            + self.textures.count_used()
            + self.samplers.count_used()
            + self.root_signatures.count_used()
            + self.descriptor_tables.count_used()
            + self.pipelines.count_used()
            + self.shaders.count_used()
    }

    #[inline]
    pub fn descriptor_heaps(&self) -> &DescriptorHeaps {
        &self.heaps
    }
    #[inline]
    pub fn upload_ring(&self) -> &UploadRing {
        &self.upload
    }
    #[inline]
    pub fn frame_pipeline(&self) -> &FramePipeline {
        &self.frames
    }
    #[inline]
    pub fn frame_state(&self, frame_index: usize) -> Option<FrameState> {
        self.frames.frame_state(frame_index)
    }

    /// 当前帧的 frame slot
    #[inline]
    pub fn frame_index(&self) -> usize {
        self.frames.frame_index()
    }
    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frames.counter().frame_id()
    }
    #[inline]
    pub fn frame_name(&self) -> String {
        self.frames.counter().frame_name()
    }

    /// 当前帧的 back buffer
    #[inline]
    pub fn swap_chain_texture(&self) -> TextureHandle {
        self.back_buffers[self.frames.frame_index()]
    }

    /// 最近一次完成的帧的 duration query 结果
    #[inline]
    pub fn get_durations(&self) -> &[DurationSample] {
        self.queries.durations()
    }

    #[inline]
    pub fn buffer(&self, handle: BufferHandle) -> RhiResult<&BufferRecord> {
        self.buffers.get(handle)
    }
    #[inline]
    pub fn texture(&self, handle: TextureHandle) -> RhiResult<&TextureRecord> {
        self.textures.get(handle)
    }
    #[inline]
    pub fn descriptor_table(&self, handle: DescriptorTableHandle) -> RhiResult<&DescriptorTableRecord> {
        self.descriptor_tables.get(handle)
    }
}
