//! CPU -> GPU 的 staging 环形缓冲
//!
//! 所有上传共用一个固定大小的 staging buffer。每次上传占用一段连续的区域，在 copy queue
//! 上提交拷贝命令后，区域和该次提交 signal 的 upload fence 值绑定；只有 fence 完成之后，
//! 这段字节才能被后续的上传复用。
//!
//! 分配不会跨越 buffer 末尾：放不下时游标回到 0。如果新区域与尚未回收的区域重叠，CPU 会
//! 阻塞在最旧区域的 fence 值上。

use std::collections::VecDeque;
use std::time::Duration;

use crate::device::{
    FenceSignal, FenceWait, NativeBuffer, NativeCommand, NativeCommandList, NativeTexture, QueueKind, RhiDevice,
    TextureCopyRegion,
};
use crate::error::{RhiError, RhiResult};
use crate::fence::Fence;
use crate::handle::Handle;
use crate::resources::buffer::BufferDesc;
use crate::resources::states::{MemoryUsage, ResourceStates};

/// 一次上传占用的 staging 区域
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UploadRegion {
    pub offset: u64,
    pub size: u64,
    /// 上传的目标资源
    pub owner: Handle,
    /// upload fence 达到该值后区域被回收
    pub retire_at: u64,
}

impl UploadRegion {
    #[inline]
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }

    #[inline]
    pub fn overlaps(&self, offset: u64, size: u64) -> bool {
        offset < self.end() && self.offset < offset + size
    }
}

/// 上传的目的地
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadTarget {
    Buffer {
        owner: Handle,
        buffer: NativeBuffer,
        offset: u64,
        byte_count: u64,
    },
    Texture {
        owner: Handle,
        texture: NativeTexture,
        /// 拷贝前后 texture 所处的状态
        state: ResourceStates,
        region: TextureCopyRegion,
    },
}

impl UploadTarget {
    #[inline]
    pub fn owner(&self) -> Handle {
        match self {
            UploadTarget::Buffer { owner, .. } | UploadTarget::Texture { owner, .. } => *owner,
        }
    }

    /// 在 staging 中占用的字节数
    #[inline]
    pub fn staging_size(&self) -> u64 {
        match self {
            UploadTarget::Buffer { byte_count, .. } => *byte_count,
            UploadTarget::Texture { region, .. } => region.row_pitch as u64 * region.height as u64,
        }
    }
}

/// `begin_texture_upload` 返回的可写区域
///
/// staging 中的行按 `dst_row_byte_count` 对齐，源数据按 `src_row_byte_count` 紧密排列。
pub struct MappedTexture<'a> {
    pub data: &'a mut [u8],
    pub row_count: u32,
    pub src_row_byte_count: u32,
    pub dst_row_byte_count: u32,
}

impl MappedTexture<'_> {
    /// 把紧密排列的像素逐行写入 staging
    pub fn write_rows(&mut self, pixels: &[u8]) -> RhiResult<()> {
        let src_row = self.src_row_byte_count as usize;
        let dst_row = self.dst_row_byte_count as usize;
        let expected = src_row * self.row_count as usize;
        if pixels.len() != expected {
            return Err(RhiError::invalid_argument(format!(
                "texture upload expects {expected} bytes ({} rows of {src_row}), got {}",
                self.row_count,
                pixels.len()
            )));
        }

        for (src, dst) in pixels.chunks_exact(src_row).zip(self.data.chunks_mut(dst_row)) {
            dst[..src_row].copy_from_slice(src);
        }
        Ok(())
    }
}

struct PendingUpload {
    offset: u64,
    target: UploadTarget,
}

pub struct UploadRing {
    staging: NativeBuffer,
    capacity: u64,
    cursor: u64,

    /// 未回收的区域，按提交顺序排列
    regions: VecDeque<UploadRegion>,
    pending: Option<PendingUpload>,

    fence: Fence,
    /// copy queue 的 command list 以及最后一次使用它的 fence 值
    lists: VecDeque<(NativeCommandList, u64)>,

    total_bytes: u64,
    total_uploads: u64,
}

// new & init
impl UploadRing {
    pub fn new(device: &mut dyn RhiDevice, capacity: u64) -> RhiResult<Self> {
        if capacity == 0 {
            return Err(RhiError::InvalidConfig("the upload ring cannot be empty".to_string()));
        }

        let desc = BufferDesc::new("upload ring", capacity, ResourceStates::COPY_SOURCE)
            .with_memory_usage(MemoryUsage::Upload);
        let staging = device.create_buffer(&desc)?;
        let fence = match Fence::new(device, "upload") {
            Ok(fence) => fence,
            Err(err) => {
                device.destroy_buffer(staging);
                return Err(err);
            }
        };

        log::info!("upload ring created: {} KiB", capacity >> 10);
        Ok(Self {
            staging,
            capacity,
            cursor: 0,
            regions: VecDeque::new(),
            pending: None,
            fence,
            lists: VecDeque::new(),
            total_bytes: 0,
            total_uploads: 0,
        })
    }
}

// destroy
impl UploadRing {
    /// 调用方保证设备已经空闲
    pub fn destroy(self, device: &mut dyn RhiDevice) {
        if self.pending.is_some() {
            log::warn!("upload ring destroyed with an open upload");
        }
        for (list, _) in self.lists {
            device.destroy_command_list(list);
        }
        device.destroy_buffer(self.staging);
        self.fence.destroy(device);
        log::info!(
            "upload ring destroyed after {} uploads ({} KiB)",
            self.total_uploads,
            self.total_bytes >> 10
        );
    }
}

// getters
impl UploadRing {
    #[inline]
    pub fn staging(&self) -> NativeBuffer {
        self.staging
    }
    #[inline]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }
    /// 下一次分配开始查找的位置
    #[inline]
    pub fn cursor(&self) -> u64 {
        self.cursor
    }
    #[inline]
    pub fn unretired_count(&self) -> usize {
        self.regions.len()
    }
    #[inline]
    pub fn regions(&self) -> impl Iterator<Item = &UploadRegion> {
        self.regions.iter()
    }
    #[inline]
    pub fn is_open(&self) -> bool {
        self.pending.is_some()
    }

    /// 已经 begin 但尚未提交的上传的目标资源
    #[inline]
    pub fn pending_owner(&self) -> Option<Handle> {
        self.pending.as_ref().map(|pending| pending.target.owner())
    }
    #[inline]
    pub fn fence(&self) -> &Fence {
        &self.fence
    }
    /// 最近一次上传 signal 的值；主队列在开始绘制前等待它
    #[inline]
    pub fn latest_value(&self) -> u64 {
        self.fence.value()
    }
    #[inline]
    pub fn total_uploads(&self) -> u64 {
        self.total_uploads
    }
}

// tools
impl UploadRing {
    /// 预留 staging 区域，返回它在 staging buffer 中的偏移
    ///
    /// 超过容量的请求在写入任何字节之前就会失败。
    pub fn begin(
        &mut self,
        device: &mut dyn RhiDevice,
        target: UploadTarget,
        alignment: u64,
        timeout: Duration,
    ) -> RhiResult<u64> {
        let _span = crate::profile_span!("UploadRing::begin");
        if self.pending.is_some() {
            return Err(RhiError::invalid_operation("an upload is already open, call end_upload first"));
        }

        let size = target.staging_size();
        if size == 0 {
            return Err(RhiError::invalid_argument(format!("empty upload for {}", target.owner())));
        }
        if size > self.capacity {
            return Err(RhiError::UploadTooLarge {
                requested: size,
                capacity: self.capacity,
            });
        }

        let mut offset = self.cursor.next_multiple_of(alignment.max(1));
        if offset + size > self.capacity {
            offset = 0;
        }

        self.retire(device)?;
        while self.regions.iter().any(|region| region.overlaps(offset, size)) {
            // 按 FIFO 顺序等待最旧的区域
            let Some(oldest) = self.regions.front().copied() else {
                break;
            };
            log::debug!(
                "upload ring full, waiting for upload fence value {} ({} bytes at {offset})",
                oldest.retire_at,
                size
            );
            self.fence.wait(device, oldest.retire_at, timeout)?;
            self.retire(device)?;
        }

        self.pending = Some(PendingUpload { offset, target });
        Ok(offset)
    }

    /// 在 copy queue 上提交拷贝，返回区域回收所需的 upload fence 值
    ///
    /// `waits` 是拷贝开始前 copy queue 需要等待的 fence 值。
    pub fn end(&mut self, device: &mut dyn RhiDevice, waits: &[FenceWait]) -> RhiResult<u64> {
        let _span = crate::profile_span!("UploadRing::end");
        let Some(PendingUpload { offset, target }) = self.pending.take() else {
            return Err(RhiError::invalid_operation("end_upload without a matching begin"));
        };
        let size = target.staging_size();

        let list = self.acquire_list(device)?;
        device.reset_command_list(list)?;
        let command = match target {
            UploadTarget::Buffer {
                buffer,
                offset: dst_offset,
                byte_count,
                ..
            } => NativeCommand::CopyBuffer {
                dst: buffer,
                dst_offset,
                src: self.staging,
                src_offset: offset,
                byte_count,
            },
            UploadTarget::Texture {
                texture, state, region, ..
            } => NativeCommand::CopyBufferToTexture {
                dst: texture,
                dst_state: state,
                src: self.staging,
                src_offset: offset,
                region,
            },
        };
        device.record(list, command);
        device.close_command_list(list)?;

        let value = self.fence.next_value();
        device.submit(
            QueueKind::Copy,
            list,
            waits,
            FenceSignal {
                fence: self.fence.native(),
                value,
            },
        )?;
        self.lists.push_back((list, value));

        self.regions.push_back(UploadRegion {
            offset,
            size,
            owner: target.owner(),
            retire_at: value,
        });
        self.cursor = offset + size;
        self.total_bytes += size;
        self.total_uploads += 1;
        Ok(value)
    }

    /// 阻塞直到 upload fence 达到 `value`；0 表示没有上传过，直接返回
    pub fn wait(&mut self, device: &mut dyn RhiDevice, value: u64, timeout: Duration) -> RhiResult<()> {
        if value == 0 {
            return Ok(());
        }
        self.fence.wait(device, value, timeout)?;
        self.retire(device)
    }

    /// 放弃尚未提交的上传；区域不会被占用
    pub fn cancel(&mut self) {
        self.pending = None;
    }

    /// 回收所有 fence 已经完成的区域
    pub fn retire(&mut self, device: &mut dyn RhiDevice) -> RhiResult<()> {
        if self.regions.is_empty() {
            return Ok(());
        }
        let completed = self.fence.poll(device)?;
        while self.regions.front().is_some_and(|region| region.retire_at <= completed) {
            self.regions.pop_front();
        }
        Ok(())
    }

    /// 复用最旧的已完成 command list，否则新建一个
    fn acquire_list(&mut self, device: &mut dyn RhiDevice) -> RhiResult<NativeCommandList> {
        if let Some(&(list, last_value)) = self.lists.front() {
            if self.fence.is_complete(device, last_value)? {
                self.lists.pop_front();
                return Ok(list);
            }
        }
        let name = format!("upload #{}", self.lists.len());
        device.create_command_list(QueueKind::Copy, &name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::ResourceKind;
    use crate::headless::{HeadlessConfig, HeadlessDevice};

    const TIMEOUT: Duration = Duration::from_millis(100);

    fn buffer_target(device: &mut HeadlessDevice, byte_count: u64) -> UploadTarget {
        let buffer = device
            .create_buffer(&BufferDesc::new("dst", byte_count, ResourceStates::COPY_DESTINATION))
            .unwrap();
        UploadTarget::Buffer {
            owner: Handle::new(ResourceKind::Buffer, 0, 0),
            buffer,
            offset: 0,
            byte_count,
        }
    }

    #[test]
    fn oversized_request_fails_before_reserving() {
        let mut device = HeadlessDevice::default();
        let mut ring = UploadRing::new(&mut device, 1024).unwrap();
        let target = buffer_target(&mut device, 2048);

        let err = ring.begin(&mut device, target, 4, TIMEOUT).unwrap_err();
        assert!(matches!(err, RhiError::UploadTooLarge { requested: 2048, capacity: 1024 }));
        assert!(!ring.is_open());
        assert_eq!(ring.cursor(), 0);
        assert_eq!(ring.unretired_count(), 0);
        assert!(device.buffer_contents(ring.staging()).unwrap().iter().all(|b| *b == 0));
    }

    #[test]
    fn allocation_wraps_instead_of_splitting() {
        let mut device = HeadlessDevice::new(HeadlessConfig {
            auto_complete: true,
            ..HeadlessConfig::default()
        });
        let mut ring = UploadRing::new(&mut device, 1000).unwrap();

        let target = buffer_target(&mut device, 600);
        assert_eq!(ring.begin(&mut device, target, 4, TIMEOUT).unwrap(), 0);
        ring.end(&mut device, &[]).unwrap();

        let target = buffer_target(&mut device, 600);
        assert_eq!(ring.begin(&mut device, target, 4, TIMEOUT).unwrap(), 0);
        ring.end(&mut device, &[]).unwrap();
        assert_eq!(ring.cursor(), 600);
    }

    #[test]
    fn unretired_regions_never_overlap() {
        let mut device = HeadlessDevice::default();
        let mut ring = UploadRing::new(&mut device, 4096).unwrap();

        let mut seed = 7_u32;
        for _ in 0..300 {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let size = 1 + (seed >> 8) as u64 % 1500;
            let target = buffer_target(&mut device, size);
            let offset = ring.begin(&mut device, target, 16, TIMEOUT).unwrap();
            assert!(offset + size <= ring.capacity());
            assert!(ring.regions().all(|region| !region.overlaps(offset, size)));
            ring.end(&mut device, &[]).unwrap();

            let regions: Vec<_> = ring.regions().copied().collect();
            for (i, a) in regions.iter().enumerate() {
                for b in &regions[i + 1..] {
                    assert!(!a.overlaps(b.offset, b.size), "{a:?} overlaps {b:?}");
                }
            }

            // GPU 偶尔推进
            if seed & 0x3000 == 0 {
                device.gpu_step();
            }
        }
    }

    #[test]
    fn full_ring_blocks_on_the_oldest_region() {
        let mut device = HeadlessDevice::default();
        let mut ring = UploadRing::new(&mut device, 1024).unwrap();

        for _ in 0..4 {
            let target = buffer_target(&mut device, 256);
            ring.begin(&mut device, target, 1, TIMEOUT).unwrap();
            ring.end(&mut device, &[]).unwrap();
        }
        assert_eq!(ring.unretired_count(), 4);
        assert_eq!(ring.fence().completed_value(), 0);

        // 第五次上传必须等待第一次上传完成
        let target = buffer_target(&mut device, 256);
        assert_eq!(ring.begin(&mut device, target, 1, TIMEOUT).unwrap(), 0);
        assert!(ring.fence().completed_value() >= 1);
        ring.end(&mut device, &[]).unwrap();
    }

    #[test]
    fn hung_gpu_turns_a_full_ring_into_a_timeout() {
        let mut device = HeadlessDevice::default();
        let mut ring = UploadRing::new(&mut device, 512).unwrap();
        let target = buffer_target(&mut device, 512);
        ring.begin(&mut device, target, 1, TIMEOUT).unwrap();
        ring.end(&mut device, &[]).unwrap();

        device.hang();
        let target = buffer_target(&mut device, 8);
        let err = ring.begin(&mut device, target, 1, Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, RhiError::FenceTimeout { .. }));
        assert!(!ring.is_open());
    }

    #[test]
    fn write_rows_respects_pitch() {
        let mut staging = vec![0u8; 2 * 8];
        let mut mapped = MappedTexture {
            data: &mut staging,
            row_count: 2,
            src_row_byte_count: 4,
            dst_row_byte_count: 8,
        };
        assert!(mapped.write_rows(&[1, 2, 3]).is_err());
        mapped.write_rows(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        assert_eq!(staging, vec![1, 2, 3, 4, 0, 0, 0, 0, 5, 6, 7, 8, 0, 0, 0, 0]);
    }
}
