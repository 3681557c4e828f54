//! Native 图形 API 的边界
//!
//! RHI 核心只通过 [`RhiDevice`] 和具体的图形 API 交互：创建对象时传入描述结构，拿回不透明的
//! native id；录制命令时传入 [`NativeCommand`]。参数翻译、shader 编译、present 等都属于实现方。

use std::fmt;
use std::time::Duration;

use crate::error::RhiResult;
use crate::resources::buffer::BufferDesc;
use crate::resources::format::{DescriptorType, IndexType, PipelineType, TextureFormat};
use crate::resources::pipeline::{ComputePipelineDesc, GraphicsPipelineDesc};
use crate::resources::root_signature::RootSignatureDesc;
use crate::resources::sampler::SamplerDesc;
use crate::resources::shader::ShaderDesc;
use crate::resources::states::{ResourceStates, ShaderStage};
use crate::resources::texture::TextureDesc;

macro_rules! native_id {
    ($($(#[$meta:meta])* $name:ident;)*) => {
        $(
            $(#[$meta])*
            #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub u64);

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}({:#x})", stringify!($name), self.0)
                }
            }
        )*
    };
}

native_id! {
    NativeBuffer;
    NativeTexture;
    NativeSampler;
    /// 任意类型的 view：CBV/SRV/UAV、sampler、RTV、DSV 或 null view
    NativeView;
    NativeRootSignature;
    /// shader 可见的描述符表
    NativeTable;
    NativePipeline;
    NativeShader;
    NativeFence;
    NativeCommandList;
    NativeQueryPool;
}

/// 命令提交的目标队列
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Main,
    /// 上传专用，和 Main 并行执行，消费前必须用 fence 等待
    Copy,
}

impl QueueKind {
    pub const ALL: [QueueKind; 2] = [QueueKind::Main, QueueKind::Copy];

    #[inline]
    pub const fn index(self) -> usize {
        match self {
            QueueKind::Main => 0,
            QueueKind::Copy => 1,
        }
    }
}

/// 创建 view 所需的信息
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewDesc {
    /// 占位 view：未被更新的描述符表 slot 指向它
    Null(DescriptorType),
    Buffer {
        buffer: NativeBuffer,
        ty: DescriptorType,
        byte_count: u64,
    },
    Texture {
        texture: NativeTexture,
        ty: DescriptorType,
        format: TextureFormat,
        /// `None` 表示整个 mip 链
        mip: Option<u32>,
    },
    Sampler(NativeSampler),
    RenderTarget {
        texture: NativeTexture,
        format: TextureFormat,
    },
    DepthStencil {
        texture: NativeTexture,
        format: TextureFormat,
    },
}

pub struct GraphicsPipelineInfo<'a> {
    pub desc: &'a GraphicsPipelineDesc,
    pub root_signature: NativeRootSignature,
    pub vertex_shader: NativeShader,
    pub pixel_shader: Option<NativeShader>,
}

pub struct ComputePipelineInfo<'a> {
    pub desc: &'a ComputePipelineDesc,
    pub root_signature: NativeRootSignature,
    pub shader: NativeShader,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureTransition {
    pub texture: NativeTexture,
    pub format: TextureFormat,
    pub before: ResourceStates,
    pub after: ResourceStates,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferTransition {
    pub buffer: NativeBuffer,
    pub before: ResourceStates,
    pub after: ResourceStates,
}

/// 从 staging buffer 到 texture 某个 mip 的拷贝区域
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureCopyRegion {
    pub mip: u32,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    /// staging 中每行的字节数（已按 row pitch 对齐）
    pub row_pitch: u32,
}

/// 可以录制到 command list 中的所有命令
#[derive(Clone, Debug, PartialEq)]
pub enum NativeCommand {
    Barrier {
        textures: Vec<TextureTransition>,
        buffers: Vec<BufferTransition>,
    },
    BindRenderTargets {
        colors: Vec<NativeView>,
        color_formats: Vec<TextureFormat>,
        depth_stencil: Option<NativeView>,
        width: u32,
        height: u32,
    },
    ClearColor {
        view: NativeView,
        color: [f32; 4],
    },
    BindRootSignature {
        root_signature: NativeRootSignature,
        pipeline_type: PipelineType,
    },
    BindDescriptorTable {
        root_signature: NativeRootSignature,
        table: NativeTable,
        pipeline_type: PipelineType,
    },
    BindPipeline {
        pipeline: NativePipeline,
        pipeline_type: PipelineType,
    },
    BindVertexBuffers {
        buffers: Vec<NativeBuffer>,
        strides: Vec<u32>,
        offsets: Vec<u32>,
    },
    BindIndexBuffer {
        buffer: NativeBuffer,
        index_type: IndexType,
        offset: u32,
    },
    SetViewport {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        min_depth: f32,
        max_depth: f32,
    },
    SetScissor {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
    SetRootConstants {
        root_signature: NativeRootSignature,
        stage: ShaderStage,
        data: Vec<u8>,
    },
    Draw {
        vertex_count: u32,
        first_vertex: u32,
    },
    DrawIndexed {
        index_count: u32,
        first_index: u32,
        first_vertex: i32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    WriteTimestamp {
        pool: NativeQueryPool,
        index: u32,
    },
    CopyBuffer {
        dst: NativeBuffer,
        dst_offset: u64,
        src: NativeBuffer,
        src_offset: u64,
        byte_count: u64,
    },
    CopyBufferToTexture {
        dst: NativeTexture,
        /// 拷贝前后 texture 所处的状态
        dst_state: ResourceStates,
        src: NativeBuffer,
        src_offset: u64,
        region: TextureCopyRegion,
    },
}

impl NativeCommand {
    #[inline]
    pub fn is_barrier(&self) -> bool {
        matches!(self, NativeCommand::Barrier { .. })
    }
}

/// 提交时等待的 fence 值（GPU 端等待）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FenceWait {
    pub fence: NativeFence,
    pub value: u64,
}

/// 提交完成后 signal 的 fence 值
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FenceSignal {
    pub fence: NativeFence,
    pub value: u64,
}

/// Native 图形 API 层
///
/// 所有返回 `RhiResult` 的方法在设备丢失时都应返回 `RhiError::DeviceLost`。
pub trait RhiDevice {
    fn name(&self) -> &str;

    // buffer
    fn create_buffer(&mut self, desc: &BufferDesc) -> RhiResult<NativeBuffer>;
    fn destroy_buffer(&mut self, buffer: NativeBuffer);
    /// 返回整个 buffer 的 CPU 可见内存；只对 CPU 可见的 memory usage 有效
    fn map_buffer(&mut self, buffer: NativeBuffer) -> RhiResult<&mut [u8]>;
    fn unmap_buffer(&mut self, buffer: NativeBuffer);

    // texture
    fn create_texture(&mut self, desc: &TextureDesc) -> RhiResult<NativeTexture>;
    fn destroy_texture(&mut self, texture: NativeTexture);

    // sampler
    fn create_sampler(&mut self, desc: &SamplerDesc) -> RhiResult<NativeSampler>;
    fn destroy_sampler(&mut self, sampler: NativeSampler);

    // view
    fn create_view(&mut self, desc: &ViewDesc) -> RhiResult<NativeView>;
    fn destroy_view(&mut self, view: NativeView);

    // binding
    fn create_root_signature(&mut self, desc: &RootSignatureDesc) -> RhiResult<NativeRootSignature>;
    fn destroy_root_signature(&mut self, root_signature: NativeRootSignature);
    fn create_descriptor_table(
        &mut self,
        root_signature: NativeRootSignature,
        layout: &RootSignatureDesc,
        name: &str,
    ) -> RhiResult<NativeTable>;
    fn destroy_descriptor_table(&mut self, table: NativeTable);
    /// 把 view 拷贝到描述符表的 slot 中；表中保存的是独立的 view 副本
    fn write_descriptor(&mut self, table: NativeTable, ty: DescriptorType, index: u32, view: NativeView);

    // shader & pipeline
    fn create_shader(&mut self, desc: &ShaderDesc) -> RhiResult<NativeShader>;
    fn destroy_shader(&mut self, shader: NativeShader);
    fn create_graphics_pipeline(&mut self, info: &GraphicsPipelineInfo<'_>) -> RhiResult<NativePipeline>;
    fn create_compute_pipeline(&mut self, info: &ComputePipelineInfo<'_>) -> RhiResult<NativePipeline>;
    fn destroy_pipeline(&mut self, pipeline: NativePipeline);

    // fence
    fn create_fence(&mut self, initial_value: u64, name: &str) -> RhiResult<NativeFence>;
    fn destroy_fence(&mut self, fence: NativeFence);
    fn fence_completed_value(&mut self, fence: NativeFence) -> RhiResult<u64>;
    /// CPU 阻塞等待；超时返回 `Ok(false)`
    fn wait_fence(&mut self, fence: NativeFence, value: u64, timeout: Duration) -> RhiResult<bool>;

    // command list
    fn create_command_list(&mut self, queue: QueueKind, name: &str) -> RhiResult<NativeCommandList>;
    fn destroy_command_list(&mut self, list: NativeCommandList);
    /// 重置并开始录制；调用者保证该 list 之前的提交已经完成
    fn reset_command_list(&mut self, list: NativeCommandList) -> RhiResult<()>;
    fn record(&mut self, list: NativeCommandList, command: NativeCommand);
    fn close_command_list(&mut self, list: NativeCommandList) -> RhiResult<()>;
    fn submit(
        &mut self,
        queue: QueueKind,
        list: NativeCommandList,
        waits: &[FenceWait],
        signal: FenceSignal,
    ) -> RhiResult<()>;

    // query
    fn create_query_pool(&mut self, count: u32, name: &str) -> RhiResult<NativeQueryPool>;
    fn destroy_query_pool(&mut self, pool: NativeQueryPool);
    /// 读取已完成的 timestamp，调用者保证写入它们的提交已经完成
    fn read_timestamps(&mut self, pool: NativeQueryPool, first: u32, out: &mut [u64]) -> RhiResult<()>;
    /// timestamp 每秒的 tick 数
    fn timestamp_frequency(&self) -> u64;

    fn wait_idle(&mut self) -> RhiResult<()>;
}
