//! 不依赖图形 API 的软件设备
//!
//! 用于测试和 demo：所有对象存放在 `SlotMap` 中，buffer/texture 的内存是 `Vec<u8>`。
//!
//! GPU 模型：
//! - 每个 queue 有一个提交队列，提交的 command list 不会立即执行
//! - CPU 等待 fence、`gpu_step`、`gpu_flush`、`wait_idle` 时才依次执行，
//!   执行时遵守跨 queue 的 fence 等待
//! - `HeadlessConfig::auto_complete` 为 true 时提交后立即执行
//!
//! 执行时会真正完成 buffer -> buffer、buffer -> texture 的拷贝，并写入合成的 timestamp。

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use slotmap::{Key, KeyData, SlotMap, new_key_type};

use crate::device::{
    ComputePipelineInfo, FenceSignal, FenceWait, GraphicsPipelineInfo, NativeBuffer, NativeCommand, NativeCommandList,
    NativeFence, NativePipeline, NativeQueryPool, NativeRootSignature, NativeSampler, NativeShader, NativeTable,
    NativeTexture, NativeView, QueueKind, RhiDevice, ViewDesc,
};
use crate::error::{RhiError, RhiResult};
use crate::resources::buffer::BufferDesc;
use crate::resources::format::{DescriptorType, PipelineType, TextureFormat};
use crate::resources::root_signature::{DescriptorRange, RootSignatureDesc};
use crate::resources::sampler::SamplerDesc;
use crate::resources::shader::ShaderDesc;
use crate::resources::states::{MemoryUsage, ShaderStage};
use crate::resources::texture::TextureDesc;

new_key_type! { struct BufferKey; }
new_key_type! { struct TextureKey; }
new_key_type! { struct SamplerKey; }
new_key_type! { struct ViewKey; }
new_key_type! { struct RootSignatureKey; }
new_key_type! { struct TableKey; }
new_key_type! { struct ShaderKey; }
new_key_type! { struct PipelineKey; }
new_key_type! { struct FenceKey; }
new_key_type! { struct ListKey; }
new_key_type! { struct QueryPoolKey; }

#[inline]
fn to_id<K: Key>(key: K) -> u64 {
    key.data().as_ffi()
}

#[inline]
fn from_id<K: Key>(id: u64) -> K {
    K::from(KeyData::from_ffi(id))
}

#[derive(Clone, Debug)]
pub struct HeadlessConfig {
    pub name: String,
    /// 提交后立即执行
    pub auto_complete: bool,
    /// timestamp 每秒的 tick 数
    pub timestamp_frequency: u64,
    /// 每执行一个命令，GPU 时钟前进的 tick 数
    pub ticks_per_command: u64,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            name: "headless".to_string(),
            auto_complete: false,
            timestamp_frequency: 1_000_000_000,
            ticks_per_command: 1_000,
        }
    }
}

/// 设备侧的统计，测试用它来验证 RHI 的行为
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    /// 按 `QueueKind::index` 排列
    pub submissions: [u64; 2],
    pub commands_recorded: u64,
    pub commands_executed: u64,
    pub draws: u64,
    pub dispatches: u64,
    /// 合并后的 barrier 命令数
    pub barrier_batches: u64,
    pub copies: u64,
    pub clears: u64,
    /// 同时在 main queue 上未执行的提交数的最大值
    pub max_frames_in_flight: usize,
    /// 写到描述符表声明范围之外的次数
    pub invalid_descriptor_writes: u64,
}

struct HeadlessBuffer {
    name: String,
    data: Vec<u8>,
    memory_usage: MemoryUsage,
    mapped: bool,
}

struct HeadlessTexture {
    name: String,
    format: TextureFormat,
    /// 每个 mip 的宽高以及紧密排列的像素
    mips: Vec<(u32, u32, Vec<u8>)>,
}

struct HeadlessTable {
    name: String,
    ranges: Vec<DescriptorRange>,
    /// slot 中保存的是 view 的副本
    slots: HashMap<(DescriptorType, u32), ViewDesc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ListState {
    Initial,
    Recording,
    Closed,
    /// 已提交，尚未执行
    Pending,
}

struct HeadlessList {
    name: String,
    queue: QueueKind,
    commands: Vec<NativeCommand>,
    state: ListState,
}

struct Submission {
    list: ListKey,
    waits: Vec<FenceWait>,
    signal: FenceSignal,
}

pub struct HeadlessDevice {
    config: HeadlessConfig,

    buffers: SlotMap<BufferKey, HeadlessBuffer>,
    textures: SlotMap<TextureKey, HeadlessTexture>,
    samplers: SlotMap<SamplerKey, SamplerDesc>,
    views: SlotMap<ViewKey, ViewDesc>,
    root_signatures: SlotMap<RootSignatureKey, RootSignatureDesc>,
    tables: SlotMap<TableKey, HeadlessTable>,
    shaders: SlotMap<ShaderKey, (String, ShaderStage)>,
    pipelines: SlotMap<PipelineKey, (String, PipelineType)>,
    fences: SlotMap<FenceKey, (String, u64)>,
    lists: SlotMap<ListKey, HeadlessList>,
    query_pools: SlotMap<QueryPoolKey, Vec<u64>>,

    /// 按 `QueueKind::index` 排列
    queues: [VecDeque<Submission>; 2],
    gpu_clock: u64,

    hung: bool,
    /// 按 `QueueKind::index` 排列，只停止单个队列
    hung_queues: [bool; 2],
    lost: Option<String>,

    stats: HeadlessStats,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new(HeadlessConfig::default())
    }
}

// new & init
impl HeadlessDevice {
    pub fn new(config: HeadlessConfig) -> Self {
        log::info!("headless device '{}' created", config.name);
        Self {
            config,
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
            queues: [VecDeque::new(), VecDeque::new()],
            gpu_clock: 0,
            hung: false,
            hung_queues: [false; 2],
            lost: None,
            stats: HeadlessStats::default(),
        }
    }
}

// test hooks
impl HeadlessDevice {
    /// GPU 停止执行，fence 不再前进
    pub fn hang(&mut self) {
        log::warn!("headless device '{}' hung", self.config.name);
        self.hung = true;
    }

    /// 只停止 `queue`，其余队列照常执行
    pub fn hang_queue(&mut self, queue: QueueKind) {
        log::warn!("headless device '{}' hung on {queue:?} queue", self.config.name);
        self.hung_queues[queue.index()] = true;
    }

    pub fn resume(&mut self) {
        self.hung = false;
        self.hung_queues = [false; 2];
    }

    /// 之后所有可失败的调用都返回 `DeviceLost`
    pub fn lose_device(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        log::error!("headless device '{}' lost: {reason}", self.config.name);
        self.lost = Some(reason);
    }

    #[inline]
    pub fn is_lost(&self) -> bool {
        self.lost.is_some()
    }

    /// 执行一个提交；没有可以执行的提交时返回 false
    pub fn gpu_step(&mut self) -> bool {
        if self.hung || self.lost.is_some() {
            return false;
        }
        for queue in QueueKind::ALL {
            if self.hung_queues[queue.index()] {
                continue;
            }
            let ready = self.queues[queue.index()]
                .front()
                .is_some_and(|submission| submission.waits.iter().all(|wait| self.fence_reached(*wait)));
            if ready {
                if let Some(submission) = self.queues[queue.index()].pop_front() {
                    self.execute(submission);
                    return true;
                }
            }
        }
        false
    }

    /// 执行所有可以执行的提交
    pub fn gpu_flush(&mut self) {
        while self.gpu_step() {}
    }

    #[inline]
    pub fn pending_submissions(&self, queue: QueueKind) -> usize {
        self.queues[queue.index()].len()
    }
}

// getters
impl HeadlessDevice {
    #[inline]
    pub fn config(&self) -> &HeadlessConfig {
        &self.config
    }

    #[inline]
    pub fn stats(&self) -> &HeadlessStats {
        &self.stats
    }

    pub fn live_object_count(&self) -> usize {
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

    pub fn buffer_contents(&self, buffer: NativeBuffer) -> Option<&[u8]> {
        self.buffers.get(from_id::<BufferKey>(buffer.0)).map(|b| b.data.as_slice())
    }

    pub fn is_buffer_mapped(&self, buffer: NativeBuffer) -> bool {
        self.buffers.get(from_id::<BufferKey>(buffer.0)).is_some_and(|b| b.mapped)
    }

    pub fn buffer_name(&self, buffer: NativeBuffer) -> Option<&str> {
        self.buffers.get(from_id::<BufferKey>(buffer.0)).map(|b| b.name.as_str())
    }

    pub fn texture_contents(&self, texture: NativeTexture, mip: u32) -> Option<&[u8]> {
        let texture = self.textures.get(from_id::<TextureKey>(texture.0))?;
        texture.mips.get(mip as usize).map(|(_, _, data)| data.as_slice())
    }

    pub fn texture_name(&self, texture: NativeTexture) -> Option<&str> {
        self.textures.get(from_id::<TextureKey>(texture.0)).map(|t| t.name.as_str())
    }

    /// 描述符表 slot 中的 view 副本
    pub fn table_slot(&self, table: NativeTable, ty: DescriptorType, index: u32) -> Option<ViewDesc> {
        self.tables.get(from_id::<TableKey>(table.0))?.slots.get(&(ty, index)).copied()
    }

    pub fn table_name(&self, table: NativeTable) -> Option<&str> {
        self.tables.get(from_id::<TableKey>(table.0)).map(|t| t.name.as_str())
    }

    pub fn view_desc(&self, view: NativeView) -> Option<ViewDesc> {
        self.views.get(from_id::<ViewKey>(view.0)).copied()
    }

    pub fn fence_value(&self, fence: NativeFence) -> Option<u64> {
        self.fences.get(from_id::<FenceKey>(fence.0)).map(|(_, value)| *value)
    }
}

// tools
impl HeadlessDevice {
    fn check_lost(&self) -> RhiResult<()> {
        match &self.lost {
            Some(reason) => Err(RhiError::DeviceLost { reason: reason.clone() }),
            None => Ok(()),
        }
    }

    fn fence_reached(&self, wait: FenceWait) -> bool {
        self.fences
            .get(from_id::<FenceKey>(wait.fence.0))
            .is_some_and(|(_, completed)| *completed >= wait.value)
    }

    fn unknown(call: &'static str, what: impl std::fmt::Display) -> RhiError {
        RhiError::Native {
            call,
            message: format!("unknown {what}"),
        }
    }

    fn execute(&mut self, submission: Submission) {
        let commands = match self.lists.get_mut(submission.list) {
            Some(list) => {
                list.state = ListState::Closed;
                std::mem::take(&mut list.commands)
            }
            None => Vec::new(),
        };

        for command in &commands {
            self.execute_command(command);
        }

        if let Some(list) = self.lists.get_mut(submission.list) {
            // 执行完之后保留命令，方便 reset 前再次查看
            list.commands = commands;
        }
        if let Some((_, completed)) = self.fences.get_mut(from_id::<FenceKey>(submission.signal.fence.0)) {
            *completed = (*completed).max(submission.signal.value);
        }
    }

    fn execute_command(&mut self, command: &NativeCommand) {
        self.gpu_clock += self.config.ticks_per_command;
        self.stats.commands_executed += 1;

        match command {
            NativeCommand::Barrier { .. } => self.stats.barrier_batches += 1,
            NativeCommand::ClearColor { .. } => self.stats.clears += 1,
            NativeCommand::Draw { .. } | NativeCommand::DrawIndexed { .. } => self.stats.draws += 1,
            NativeCommand::Dispatch { .. } => self.stats.dispatches += 1,
            NativeCommand::WriteTimestamp { pool, index } => {
                let clock = self.gpu_clock;
                if let Some(slot) = self
                    .query_pools
                    .get_mut(from_id::<QueryPoolKey>(pool.0))
                    .and_then(|timestamps| timestamps.get_mut(*index as usize))
                {
                    *slot = clock;
                }
            }
            NativeCommand::CopyBuffer {
                dst,
                dst_offset,
                src,
                src_offset,
                byte_count,
            } => {
                self.stats.copies += 1;
                let Some(bytes) = self
                    .buffers
                    .get(from_id::<BufferKey>(src.0))
                    .and_then(|b| b.data.get(*src_offset as usize..(*src_offset + *byte_count) as usize))
                    .map(<[u8]>::to_vec)
                else {
                    log::error!("copy from {src} out of range");
                    return;
                };
                match self
                    .buffers
                    .get_mut(from_id::<BufferKey>(dst.0))
                    .and_then(|b| b.data.get_mut(*dst_offset as usize..(*dst_offset + *byte_count) as usize))
                {
                    Some(target) => target.copy_from_slice(&bytes),
                    None => log::error!("copy to {dst} out of range"),
                }
            }
            NativeCommand::CopyBufferToTexture {
                dst,
                src,
                src_offset,
                region,
                ..
            } => {
                self.stats.copies += 1;
                let Some(source) = self.buffers.get(from_id::<BufferKey>(src.0)).map(|b| b.data.clone()) else {
                    log::error!("copy from unknown {src}");
                    return;
                };
                let Some((mip_width, _, pixels)) = self
                    .textures
                    .get_mut(from_id::<TextureKey>(dst.0))
                    .and_then(|t| t.mips.get_mut(region.mip as usize))
                else {
                    log::error!("copy to unknown {dst} mip {}", region.mip);
                    return;
                };

                let bpp = region.format.bytes_per_pixel() as usize;
                let row_bytes = region.width as usize * bpp;
                for row in 0..region.height as usize {
                    let src_start = *src_offset as usize + row * region.row_pitch as usize;
                    let dst_start = ((region.y as usize + row) * *mip_width as usize + region.x as usize) * bpp;
                    let (Some(from), Some(to)) = (
                        source.get(src_start..src_start + row_bytes),
                        pixels.get_mut(dst_start..dst_start + row_bytes),
                    ) else {
                        log::error!("texture copy row {row} out of range");
                        return;
                    };
                    to.copy_from_slice(from);
                }
            }
            _ => {}
        }
    }
}

impl RhiDevice for HeadlessDevice {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> RhiResult<NativeBuffer> {
        self.check_lost()?;
        let key = self.buffers.insert(HeadlessBuffer {
            name: desc.name.clone(),
            data: vec![0; desc.byte_count as usize],
            memory_usage: desc.memory_usage,
            mapped: false,
        });
        Ok(NativeBuffer(to_id(key)))
    }

    fn destroy_buffer(&mut self, buffer: NativeBuffer) {
        if self.buffers.remove(from_id::<BufferKey>(buffer.0)).is_none() {
            log::error!("destroying unknown {buffer}");
        }
    }

    fn map_buffer(&mut self, buffer: NativeBuffer) -> RhiResult<&mut [u8]> {
        self.check_lost()?;
        let record = self
            .buffers
            .get_mut(from_id::<BufferKey>(buffer.0))
            .ok_or_else(|| Self::unknown("map_buffer", buffer))?;
        if !record.memory_usage.is_cpu_visible() {
            return Err(RhiError::Native {
                call: "map_buffer",
                message: format!("'{}' is not CPU visible", record.name),
            });
        }
        record.mapped = true;
        Ok(record.data.as_mut_slice())
    }

    fn unmap_buffer(&mut self, buffer: NativeBuffer) {
        if let Some(record) = self.buffers.get_mut(from_id::<BufferKey>(buffer.0)) {
            record.mapped = false;
        }
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> RhiResult<NativeTexture> {
        self.check_lost()?;
        let bpp = desc.format.bytes_per_pixel() as usize;
        let mips = (0..desc.mip_count)
            .map(|mip| {
                let (width, height) = desc.mip_extent(mip);
                (width, height, vec![0; width as usize * height as usize * bpp])
            })
            .collect();
        let key = self.textures.insert(HeadlessTexture {
            name: desc.name.clone(),
            format: desc.format,
            mips,
        });
        Ok(NativeTexture(to_id(key)))
    }

    fn destroy_texture(&mut self, texture: NativeTexture) {
        if self.textures.remove(from_id::<TextureKey>(texture.0)).is_none() {
            log::error!("destroying unknown {texture}");
        }
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> RhiResult<NativeSampler> {
        self.check_lost()?;
        Ok(NativeSampler(to_id(self.samplers.insert(desc.clone()))))
    }

    fn destroy_sampler(&mut self, sampler: NativeSampler) {
        self.samplers.remove(from_id::<SamplerKey>(sampler.0));
    }

    fn create_view(&mut self, desc: &ViewDesc) -> RhiResult<NativeView> {
        self.check_lost()?;
        let target_exists = match desc {
            ViewDesc::Null(_) => true,
            ViewDesc::Buffer { buffer, .. } => self.buffers.contains_key(from_id::<BufferKey>(buffer.0)),
            ViewDesc::Texture { texture, format, .. }
            | ViewDesc::RenderTarget { texture, format }
            | ViewDesc::DepthStencil { texture, format } => self
                .textures
                .get(from_id::<TextureKey>(texture.0))
                .is_some_and(|t| t.format == *format),
            ViewDesc::Sampler(sampler) => self.samplers.contains_key(from_id::<SamplerKey>(sampler.0)),
        };
        if !target_exists {
            return Err(Self::unknown("create_view", format_args!("view target {desc:?}")));
        }
        Ok(NativeView(to_id(self.views.insert(*desc))))
    }

    fn destroy_view(&mut self, view: NativeView) {
        self.views.remove(from_id::<ViewKey>(view.0));
    }

    fn create_root_signature(&mut self, desc: &RootSignatureDesc) -> RhiResult<NativeRootSignature> {
        self.check_lost()?;
        Ok(NativeRootSignature(to_id(self.root_signatures.insert(desc.clone()))))
    }

    fn destroy_root_signature(&mut self, root_signature: NativeRootSignature) {
        self.root_signatures.remove(from_id::<RootSignatureKey>(root_signature.0));
    }

    fn create_descriptor_table(
        &mut self,
        root_signature: NativeRootSignature,
        layout: &RootSignatureDesc,
        name: &str,
    ) -> RhiResult<NativeTable> {
        self.check_lost()?;
        if !self.root_signatures.contains_key(from_id::<RootSignatureKey>(root_signature.0)) {
            return Err(Self::unknown("create_descriptor_table", root_signature));
        }
        let key = self.tables.insert(HeadlessTable {
            name: name.to_string(),
            ranges: layout.ranges().collect(),
            slots: HashMap::new(),
        });
        Ok(NativeTable(to_id(key)))
    }

    fn destroy_descriptor_table(&mut self, table: NativeTable) {
        self.tables.remove(from_id::<TableKey>(table.0));
    }

    fn write_descriptor(&mut self, table: NativeTable, ty: DescriptorType, index: u32, view: NativeView) {
        let Some(desc) = self.views.get(from_id::<ViewKey>(view.0)).copied() else {
            log::error!("writing unknown {view} into {table}");
            self.stats.invalid_descriptor_writes += 1;
            return;
        };
        let Some(record) = self.tables.get_mut(from_id::<TableKey>(table.0)) else {
            log::error!("writing into unknown {table}");
            self.stats.invalid_descriptor_writes += 1;
            return;
        };
        if !record.ranges.iter().any(|range| range.contains(ty, index, 1)) {
            log::error!("{ty:?} slot {index} is not declared by table '{}'", record.name);
            self.stats.invalid_descriptor_writes += 1;
            return;
        }
        record.slots.insert((ty, index), desc);
    }

    fn create_shader(&mut self, desc: &ShaderDesc) -> RhiResult<NativeShader> {
        self.check_lost()?;
        if desc.bytecode.is_empty() {
            return Err(RhiError::Native {
                call: "create_shader",
                message: format!("shader '{}' has no bytecode", desc.name),
            });
        }
        Ok(NativeShader(to_id(self.shaders.insert((desc.name.clone(), desc.stage)))))
    }

    fn destroy_shader(&mut self, shader: NativeShader) {
        self.shaders.remove(from_id::<ShaderKey>(shader.0));
    }

    fn create_graphics_pipeline(&mut self, info: &GraphicsPipelineInfo<'_>) -> RhiResult<NativePipeline> {
        self.check_lost()?;
        let key = self.pipelines.insert((info.desc.name.clone(), PipelineType::Graphics));
        Ok(NativePipeline(to_id(key)))
    }

    fn create_compute_pipeline(&mut self, info: &ComputePipelineInfo<'_>) -> RhiResult<NativePipeline> {
        self.check_lost()?;
        let key = self.pipelines.insert((info.desc.name.clone(), PipelineType::Compute));
        Ok(NativePipeline(to_id(key)))
    }

    fn destroy_pipeline(&mut self, pipeline: NativePipeline) {
        self.pipelines.remove(from_id::<PipelineKey>(pipeline.0));
    }

    fn create_fence(&mut self, initial_value: u64, name: &str) -> RhiResult<NativeFence> {
        self.check_lost()?;
        Ok(NativeFence(to_id(self.fences.insert((name.to_string(), initial_value)))))
    }

    fn destroy_fence(&mut self, fence: NativeFence) {
        self.fences.remove(from_id::<FenceKey>(fence.0));
    }

    fn fence_completed_value(&mut self, fence: NativeFence) -> RhiResult<u64> {
        self.check_lost()?;
        if self.config.auto_complete {
            self.gpu_flush();
        }
        self.fence_value(fence).ok_or_else(|| Self::unknown("fence_completed_value", fence))
    }

    /// 执行提交直到 fence 达到目标值；GPU 卡住时不会真的等待 `timeout`
    fn wait_fence(&mut self, fence: NativeFence, value: u64, _timeout: Duration) -> RhiResult<bool> {
        self.check_lost()?;
        let key = from_id::<FenceKey>(fence.0);
        if !self.fences.contains_key(key) {
            return Err(Self::unknown("wait_fence", fence));
        }
        while !self.fence_reached(FenceWait { fence, value }) {
            if !self.gpu_step() {
                break;
            }
        }
        Ok(self.fence_reached(FenceWait { fence, value }))
    }

    fn create_command_list(&mut self, queue: QueueKind, name: &str) -> RhiResult<NativeCommandList> {
        self.check_lost()?;
        let key = self.lists.insert(HeadlessList {
            name: name.to_string(),
            queue,
            commands: Vec::new(),
            state: ListState::Initial,
        });
        Ok(NativeCommandList(to_id(key)))
    }

    fn destroy_command_list(&mut self, list: NativeCommandList) {
        if let Some(record) = self.lists.remove(from_id::<ListKey>(list.0)) {
            if record.state == ListState::Pending {
                log::error!("command list '{}' destroyed while still pending", record.name);
            }
        }
    }

    fn reset_command_list(&mut self, list: NativeCommandList) -> RhiResult<()> {
        self.check_lost()?;
        let record = self
            .lists
            .get_mut(from_id::<ListKey>(list.0))
            .ok_or_else(|| Self::unknown("reset_command_list", list))?;
        if record.state == ListState::Pending {
            return Err(RhiError::Native {
                call: "reset_command_list",
                message: format!("command list '{}' is still executing", record.name),
            });
        }
        record.commands.clear();
        record.state = ListState::Recording;
        Ok(())
    }

    fn record(&mut self, list: NativeCommandList, command: NativeCommand) {
        match self.lists.get_mut(from_id::<ListKey>(list.0)) {
            Some(record) if record.state == ListState::Recording => {
                record.commands.push(command);
                self.stats.commands_recorded += 1;
            }
            Some(record) => log::error!("recording into command list '{}' in state {:?}", record.name, record.state),
            None => log::error!("recording into unknown {list}"),
        }
    }

    fn close_command_list(&mut self, list: NativeCommandList) -> RhiResult<()> {
        self.check_lost()?;
        let record = self
            .lists
            .get_mut(from_id::<ListKey>(list.0))
            .ok_or_else(|| Self::unknown("close_command_list", list))?;
        if record.state != ListState::Recording {
            return Err(RhiError::Native {
                call: "close_command_list",
                message: format!("command list '{}' is not recording", record.name),
            });
        }
        record.state = ListState::Closed;
        Ok(())
    }

    fn submit(
        &mut self,
        queue: QueueKind,
        list: NativeCommandList,
        waits: &[FenceWait],
        signal: FenceSignal,
    ) -> RhiResult<()> {
        self.check_lost()?;
        let key = from_id::<ListKey>(list.0);
        let record = self.lists.get_mut(key).ok_or_else(|| Self::unknown("submit", list))?;
        if record.state != ListState::Closed || record.queue != queue {
            return Err(RhiError::Native {
                call: "submit",
                message: format!(
                    "command list '{}' ({:?}, {:?}) cannot be submitted to the {queue:?} queue",
                    record.name, record.state, record.queue
                ),
            });
        }
        record.state = ListState::Pending;

        self.queues[queue.index()].push_back(Submission {
            list: key,
            waits: waits.to_vec(),
            signal,
        });
        self.stats.submissions[queue.index()] += 1;
        let in_flight = self.queues[QueueKind::Main.index()].len();
        self.stats.max_frames_in_flight = self.stats.max_frames_in_flight.max(in_flight);

        if self.config.auto_complete {
            self.gpu_flush();
        }
        Ok(())
    }

    fn create_query_pool(&mut self, count: u32, _name: &str) -> RhiResult<NativeQueryPool> {
        self.check_lost()?;
        Ok(NativeQueryPool(to_id(self.query_pools.insert(vec![0; count as usize]))))
    }

    fn destroy_query_pool(&mut self, pool: NativeQueryPool) {
        self.query_pools.remove(from_id::<QueryPoolKey>(pool.0));
    }

    fn read_timestamps(&mut self, pool: NativeQueryPool, first: u32, out: &mut [u64]) -> RhiResult<()> {
        self.check_lost()?;
        let timestamps = self
            .query_pools
            .get(from_id::<QueryPoolKey>(pool.0))
            .ok_or_else(|| Self::unknown("read_timestamps", pool))?;
        let source = timestamps
            .get(first as usize..first as usize + out.len())
            .ok_or_else(|| Self::unknown("read_timestamps", format_args!("query range {first}+{}", out.len())))?;
        out.copy_from_slice(source);
        Ok(())
    }

    fn timestamp_frequency(&self) -> u64 {
        self.config.timestamp_frequency
    }

    fn wait_idle(&mut self) -> RhiResult<()> {
        self.check_lost()?;
        self.gpu_flush();
        let stuck = self.queues.iter().map(VecDeque::len).sum::<usize>();
        if stuck > 0 {
            return Err(RhiError::Native {
                call: "wait_idle",
                message: format!("{stuck} submissions never completed"),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::states::ResourceStates;

    fn signal(device: &mut HeadlessDevice, queue: QueueKind, fence: NativeFence, value: u64, waits: &[FenceWait]) {
        let list = device.create_command_list(queue, "test").unwrap();
        device.reset_command_list(list).unwrap();
        device.record(list, NativeCommand::Draw { vertex_count: 3, first_vertex: 0 });
        device.close_command_list(list).unwrap();
        device.submit(queue, list, waits, FenceSignal { fence, value }).unwrap();
    }

    #[test]
    fn submissions_execute_lazily_and_honour_cross_queue_waits() {
        let mut device = HeadlessDevice::default();
        let main = device.create_fence(0, "main").unwrap();
        let copy = device.create_fence(0, "copy").unwrap();

        // main 等待 copy 的值 1，而 copy 还没有提交
        signal(&mut device, QueueKind::Main, main, 1, &[FenceWait { fence: copy, value: 1 }]);
        assert!(!device.gpu_step());
        assert_eq!(device.fence_value(main), Some(0));

        signal(&mut device, QueueKind::Copy, copy, 1, &[]);
        assert!(device.wait_fence(main, 1, Duration::ZERO).unwrap());
        assert_eq!(device.fence_value(copy), Some(1));
        assert_eq!(device.stats().draws, 2);
        assert_eq!(device.stats().submissions, [1, 1]);
    }

    #[test]
    fn pending_lists_cannot_be_reset() {
        let mut device = HeadlessDevice::default();
        let fence = device.create_fence(0, "f").unwrap();
        let list = device.create_command_list(QueueKind::Main, "frame").unwrap();
        device.reset_command_list(list).unwrap();
        device.close_command_list(list).unwrap();
        device.submit(QueueKind::Main, list, &[], FenceSignal { fence, value: 1 }).unwrap();

        assert!(device.reset_command_list(list).is_err());
        device.gpu_flush();
        device.reset_command_list(list).unwrap();
    }

    #[test]
    fn copies_land_in_device_memory() {
        let mut device = HeadlessDevice::new(HeadlessConfig {
            auto_complete: true,
            ..HeadlessConfig::default()
        });
        let fence = device.create_fence(0, "f").unwrap();
        let staging = device
            .create_buffer(&BufferDesc::new("staging", 64, ResourceStates::COPY_SOURCE))
            .unwrap();
        let texture = device
            .create_texture(&TextureDesc::new("t", 2, 2, 1).with_format(TextureFormat::Rgba8Unorm))
            .unwrap();
        {
            let data = device.map_buffer(staging).unwrap();
            // 两行，每行 8 字节像素 + 8 字节 padding
            data[..8].copy_from_slice(&[1; 8]);
            data[16..24].copy_from_slice(&[2; 8]);
        }
        device.unmap_buffer(staging);

        let list = device.create_command_list(QueueKind::Copy, "upload").unwrap();
        device.reset_command_list(list).unwrap();
        device.record(
            list,
            NativeCommand::CopyBufferToTexture {
                dst: texture,
                dst_state: ResourceStates::PIXEL_SHADER_ACCESS,
                src: staging,
                src_offset: 0,
                region: crate::device::TextureCopyRegion {
                    mip: 0,
                    x: 0,
                    y: 0,
                    width: 2,
                    height: 2,
                    format: TextureFormat::Rgba8Unorm,
                    row_pitch: 16,
                },
            },
        );
        device.close_command_list(list).unwrap();
        device.submit(QueueKind::Copy, list, &[], FenceSignal { fence, value: 1 }).unwrap();

        let pixels = device.texture_contents(texture, 0).unwrap();
        assert_eq!(&pixels[..8], &[1; 8]);
        assert_eq!(&pixels[8..], &[2; 8]);
    }

    #[test]
    fn lost_device_fails_every_fallible_call() {
        let mut device = HeadlessDevice::default();
        device.lose_device("driver reset");
        let err = device.create_fence(0, "f").unwrap_err();
        assert!(matches!(err, RhiError::DeviceLost { ref reason } if reason == "driver reset"));
        assert!(err.is_device_failure());
        assert!(device.wait_idle().is_err());
    }

    #[test]
    fn gpu_only_buffers_cannot_be_mapped() {
        let mut device = HeadlessDevice::default();
        let buffer = device
            .create_buffer(
                &BufferDesc::new("vb", 16, ResourceStates::VERTEX_BUFFER).with_memory_usage(MemoryUsage::Gpu),
            )
            .unwrap();
        assert!(device.map_buffer(buffer).is_err());
    }
}
